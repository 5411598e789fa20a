use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a flow definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Draft,
    Active,
    Inactive,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::Draft => "draft",
            FlowStatus::Active => "active",
            FlowStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(FlowStatus::Draft),
            "active" => Some(FlowStatus::Active),
            "inactive" => Some(FlowStatus::Inactive),
            _ => None,
        }
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, org-scoped DAG definition; the template.
///
/// The graph itself lives in versioned snapshots; the flow row only carries
/// identity, status and soft-delete state. Name uniqueness is
/// case-insensitive within the org.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub status: FlowStatus,
    pub is_deleted: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    pub fn new(org_id: Uuid, name: impl Into<String>, created_by: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            org_id,
            name: name.into(),
            status: FlowStatus::Draft,
            is_deleted: false,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An immutable snapshot of a flow's graph.
///
/// `version` values form a gap-free sequence starting at 1; the repository
/// assigns `max(version) + 1` atomically at insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowVersion {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub version: i32,
    pub graph: Value,
    pub variables: Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_status_round_trip() {
        for status in [FlowStatus::Draft, FlowStatus::Active, FlowStatus::Inactive] {
            assert_eq!(FlowStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(FlowStatus::parse("archived"), None);
    }

    #[test]
    fn test_new_flow_defaults() {
        let flow = Flow::new(Uuid::new_v4(), "Pay", Uuid::new_v4());
        assert_eq!(flow.status, FlowStatus::Draft);
        assert!(!flow.is_deleted);
    }
}
