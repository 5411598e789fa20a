use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The authenticated caller, resolved from a verified session token.
///
/// Every org-scoped query takes its `org_id` from here, never from the
/// request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// The user the session belongs to
    pub user_id: Uuid,
    /// The tenancy boundary for every read and write
    pub org_id: Uuid,
    /// Email as stored (lowercased)
    pub email: String,
}

/// Log severity for execution logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Stable lowercase name used in the store and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parse a stored level; unknown values come back as `None`
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events fanned out over the per-org bus.
///
/// Both kinds are payload-free: subscribers re-read the relevant collection
/// on receipt, which keeps ordering invariants cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// A notification row changed for the org
    NotificationsUpdate,
    /// An integration row changed for the org
    IntegrationsUpdate,
}

impl BusEvent {
    /// The wire name delivered to subscribers
    pub fn as_str(&self) -> &'static str {
        match self {
            BusEvent::NotificationsUpdate => "notifications:update",
            BusEvent::IntegrationsUpdate => "integrations:update",
        }
    }
}

/// Org-scoped publish half of the event bus, consumed by the engine and the
/// verification worker. The server owns the concrete room dispatcher.
#[async_trait::async_trait]
pub trait BusPublisher: Send + Sync {
    /// Deliver an event to every subscriber of `org:<org_id>`.
    /// Must never block on slow consumers.
    async fn publish(&self, org_id: Uuid, event: BusEvent);
}

/// A publisher that drops everything; used in tests and when no bus is wired.
#[derive(Debug, Default)]
pub struct NullBusPublisher;

#[async_trait::async_trait]
impl BusPublisher for NullBusPublisher {
    async fn publish(&self, _org_id: Uuid, _event: BusEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_round_trip() {
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
            assert_eq!(LogLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(LogLevel::parse("trace"), None);
    }

    #[test]
    fn test_bus_event_names() {
        assert_eq!(BusEvent::NotificationsUpdate.as_str(), "notifications:update");
        assert_eq!(BusEvent::IntegrationsUpdate.as_str(), "integrations:update");
    }
}
