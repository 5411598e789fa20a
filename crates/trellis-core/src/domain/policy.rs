use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only log row used for rate accounting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRateSample {
    pub user_id: Uuid,
    pub endpoint: String,
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ApiRateSample {
    pub fn new(user_id: Uuid, endpoint: impl Into<String>, ip_address: Option<String>) -> Self {
        Self {
            user_id,
            endpoint: endpoint.into(),
            ip_address,
            timestamp: Utc::now(),
        }
    }
}

/// One permitted source address for a user with the allowlist enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAllowlistEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ip_address: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IpAllowlistEntry {
    pub fn new(user_id: Uuid, ip_address: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            ip_address: ip_address.into(),
            description,
            created_at: Utc::now(),
        }
    }
}
