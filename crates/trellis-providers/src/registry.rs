//! Operation-keyed provider dispatch.
//!
//! The engine's action nodes reach providers through here; every endpoint
//! call is timed and rolled up as a TxEvent for the initiating org.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use trellis_core::error::CoreError;

use crate::{ProviderClient, TxRecorder};

/// Registry of provider clients keyed by provider name (plus aliases)
pub struct ProviderRegistry {
    clients: HashMap<String, Arc<dyn ProviderClient>>,
    tx: Arc<dyn TxRecorder>,
}

impl ProviderRegistry {
    pub fn new(tx: Arc<dyn TxRecorder>) -> Self {
        Self {
            clients: HashMap::new(),
            tx,
        }
    }

    /// Register a client under its canonical name
    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        self.clients.insert(client.provider().to_string(), client);
    }

    /// Register a client under an extra key (`fW` for flutterwave)
    pub fn register_alias(&mut self, alias: &str, client: Arc<dyn ProviderClient>) {
        self.clients.insert(alias.to_string(), client);
    }

    pub fn has_provider(&self, provider: &str) -> bool {
        self.clients.contains_key(provider)
    }

    /// Dispatch one operation. Records a TxEvent with the call latency;
    /// lookup failures record nothing since no endpoint was touched.
    pub async fn call(
        &self,
        org_id: Uuid,
        provider: &str,
        operation: &str,
        params: &Value,
    ) -> Result<Value, CoreError> {
        let client = self.clients.get(provider).ok_or_else(|| {
            CoreError::Validation(format!("no provider client registered for {}", provider))
        })?;

        debug!(provider, operation, "dispatching provider call");

        let started = Instant::now();
        let result = client.call(operation, params).await;
        let latency_ms = started.elapsed().as_millis() as i64;

        self.tx
            .record(org_id, result.is_ok(), Some(latency_ms))
            .await;

        result
    }
}
