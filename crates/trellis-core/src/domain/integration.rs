use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health of an org's declared external dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Pending,
    Active,
    Error,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Pending => "pending",
            IntegrationStatus::Active => "active",
            IntegrationStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IntegrationStatus::Pending),
            "active" => Some(IntegrationStatus::Active),
            "error" => Some(IntegrationStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An org's declared dependency on an external system and the last known
/// health. Name uniqueness is case-insensitive within the org.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub status: IntegrationStatus,
    pub test_url: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Integration {
    pub fn new(org_id: Uuid, name: impl Into<String>, test_url: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            name: name.into(),
            status: IntegrationStatus::Pending,
            test_url,
            last_checked: None,
            created_at: Utc::now(),
        }
    }
}

/// Provider environment a connection targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderEnv {
    Sandbox,
    Production,
}

impl ProviderEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderEnv::Sandbox => "sandbox",
            ProviderEnv::Production => "production",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sandbox" => Some(ProviderEnv::Sandbox),
            "production" => Some(ProviderEnv::Production),
            _ => None,
        }
    }
}

/// Provider credentials owned by the user who created them.
///
/// `config_enc` is a Secret Vault envelope; plaintext never reaches the
/// store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub provider: String,
    pub env: ProviderEnv,
    pub label: String,
    pub config_enc: String,
    pub created_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(
        owner_user_id: Uuid,
        provider: impl Into<String>,
        env: ProviderEnv,
        label: impl Into<String>,
        config_enc: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_user_id,
            provider: provider.into(),
            env,
            label: label.into(),
            config_enc,
            created_at: Utc::now(),
        }
    }
}
