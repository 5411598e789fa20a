use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Severity of a user-visible notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Warn,
    Error,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Warn => "warn",
            NotificationKind::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(NotificationKind::Info),
            "warn" => Some(NotificationKind::Warn),
            "error" => Some(NotificationKind::Error),
            _ => None,
        }
    }
}

/// Queue of user-visible events, org-scoped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub org_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Optional pointer at the entity that caused the notification
    pub related_id: Option<Uuid>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        org_id: Uuid,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            kind,
            title: title.into(),
            message: message.into(),
            related_id: None,
            is_read: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_related(mut self, related_id: Uuid) -> Self {
        self.related_id = Some(related_id);
        self
    }
}

/// Aggregated rollup of one outbound provider call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEvent {
    pub id: Uuid,
    pub org_id: Uuid,
    pub success: bool,
    pub latency_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl TxEvent {
    pub fn new(org_id: Uuid, success: bool, latency_ms: Option<i64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            success,
            latency_ms,
            created_at: Utc::now(),
        }
    }
}

/// Dashboard rollup over an org's TxEvents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TxSummary {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    /// 0.0 when there is no traffic
    pub success_rate: f64,
    pub avg_latency_ms: Option<f64>,
}

/// One row of metadata kept for every state-changing authenticated call.
/// Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub route: Option<String>,
    pub method: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub status_code: Option<i32>,
    pub request_id: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            action: action.into(),
            target_type: None,
            target_id: None,
            route: None,
            method: None,
            ip: None,
            user_agent: None,
            status_code: None,
            request_id: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_defaults_unread() {
        let n = Notification::new(Uuid::new_v4(), NotificationKind::Info, "t", "m");
        assert!(!n.is_read);
        assert!(n.related_id.is_none());
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            NotificationKind::Info,
            NotificationKind::Warn,
            NotificationKind::Error,
        ] {
            assert_eq!(NotificationKind::parse(kind.as_str()), Some(kind));
        }
    }
}
