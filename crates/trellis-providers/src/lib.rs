//!
//! Trellis Providers - thin per-provider adapters.
//!
//! Each provider exposes a narrow capability interface keyed by operation
//! name. All outbound calls observe a 6 s connect/read timeout, and every
//! call that touches a provider endpoint appends a TxEvent scoped to the
//! initiating org. Credentials arrive as already-decrypted structs and are
//! dropped when the call returns; encrypted blobs never reach this crate.

#![forbid(unsafe_code)]

pub mod flutterwave;
pub mod mtn;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use trellis_core::domain::repository::{NotificationRepository, UserRepository};
use trellis_core::error::CoreError;
use trellis_core::types::{BusEvent, BusPublisher};
use trellis_core::{Notification, NotificationKind, TxEvent};
use trellis_monitoring::logging::LogExt;

pub use flutterwave::{FlutterwaveClient, FlutterwaveCredentials};
pub use mtn::{MtnClient, MtnCredentials};
pub use registry::ProviderRegistry;

/// Deadline for every provider endpoint call
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(6);

/// One provider's capability surface, keyed by operation name
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Canonical provider key (`mtn`, `flutterwave`)
    fn provider(&self) -> &'static str;

    /// Execute a named operation against the provider
    async fn call(&self, operation: &str, params: &Value) -> Result<Value, CoreError>;
}

/// Sink for provider-call rollups, consumed by dashboards
#[async_trait]
pub trait TxRecorder: Send + Sync {
    async fn record(&self, org_id: Uuid, success: bool, latency_ms: Option<i64>);
}

/// Records TxEvents straight into the store.
///
/// A failed call additionally surfaces to the org as an error Notification
/// (which the store's notification trigger bridges to the event bus),
/// provided someone in the org still wants error alerts.
pub struct StoreTxRecorder {
    notifications: Arc<dyn NotificationRepository>,
    users: Arc<dyn UserRepository>,
    bus: Arc<dyn BusPublisher>,
}

impl StoreTxRecorder {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        users: Arc<dyn UserRepository>,
        bus: Arc<dyn BusPublisher>,
    ) -> Self {
        Self {
            notifications,
            users,
            bus,
        }
    }
}

#[async_trait]
impl TxRecorder for StoreTxRecorder {
    async fn record(&self, org_id: Uuid, success: bool, latency_ms: Option<i64>) {
        let event = TxEvent::new(org_id, success, latency_ms);
        let _ = self
            .notifications
            .insert_tx_event(&event)
            .await
            .log_err("failed to record tx event");

        if success {
            return;
        }

        // Error-typed rollups become user-visible notifications, gated on
        // User.send_error_alerts
        match self.users.org_wants_error_alerts(org_id).await {
            Ok(true) => {
                let message = match latency_ms {
                    Some(ms) => format!("An outbound provider call failed after {} ms", ms),
                    None => "An outbound provider call failed".to_string(),
                };
                let notification = Notification::new(
                    org_id,
                    NotificationKind::Error,
                    "Provider call failed",
                    message,
                )
                .with_related(event.id);
                let _ = self
                    .notifications
                    .insert_notification(&notification)
                    .await
                    .log_err("failed to insert provider-failure notification");
                self.bus.publish(org_id, BusEvent::NotificationsUpdate).await;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(org_id = %org_id, "alert-subscriber lookup failed: {}", e)
            }
        }
    }
}

/// Recorder that drops everything; for tests
#[derive(Debug, Default)]
pub struct NullTxRecorder;

#[async_trait]
impl TxRecorder for NullTxRecorder {
    async fn record(&self, _org_id: Uuid, _success: bool, _latency_ms: Option<i64>) {}
}

/// Shared reqwest client with the provider deadline applied
pub(crate) fn provider_http_client() -> Result<reqwest::Client, CoreError> {
    reqwest::Client::builder()
        .timeout(PROVIDER_TIMEOUT)
        .connect_timeout(PROVIDER_TIMEOUT)
        .build()
        .map_err(|e| CoreError::Internal(format!("failed to build HTTP client: {}", e)))
}
