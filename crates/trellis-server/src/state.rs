//! Shared application state.
//!
//! Constructed once at startup from configuration; every handler and
//! middleware sees the same `Arc<AppState>`. There are no process-wide
//! globals.

use std::sync::Arc;

use trellis_core::domain::repository::{
    ExecutionRepository, FlowRepository, IntegrationRepository, NotificationRepository,
    PolicyRepository, UserRepository,
};
use trellis_core::engine::ExecutionEngine;
use trellis_core::vault::SecretVault;

use crate::auth::oidc::OidcClient;
use crate::auth::session::SessionKeys;
use crate::bus::EventBus;
use crate::config::ServerConfig;
use crate::mailer::Mailer;
use crate::reports::ReportSink;
use crate::worker::verification::VerificationWorker;
use crate::worker::Supervisor;

/// Repository handles split by concern; every facet may point at the same
/// underlying store
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub flows: Arc<dyn FlowRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub integrations: Arc<dyn IntegrationRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub policy: Arc<dyn PolicyRepository>,
}

impl Repositories {
    /// Build every facet from one store implementing all repository traits
    pub fn from_store<S>(store: S) -> Self
    where
        S: UserRepository
            + FlowRepository
            + ExecutionRepository
            + IntegrationRepository
            + NotificationRepository
            + PolicyRepository
            + Clone
            + Send
            + Sync
            + 'static,
    {
        Self {
            users: Arc::new(store.clone()),
            flows: Arc::new(store.clone()),
            executions: Arc::new(store.clone()),
            integrations: Arc::new(store.clone()),
            notifications: Arc::new(store.clone()),
            policy: Arc::new(store),
        }
    }
}

/// Everything the API surface needs
pub struct AppState {
    pub config: ServerConfig,
    pub repos: Repositories,
    pub engine: ExecutionEngine,
    pub bus: Arc<EventBus>,
    pub sessions: SessionKeys,
    /// Absent when `SECRETS_ENC_KEY` is missing; secret writes fail closed
    pub vault: Option<Arc<SecretVault>>,
    pub mailer: Arc<dyn Mailer>,
    pub oidc: Option<Arc<dyn OidcClient>>,
    pub verifier: Arc<VerificationWorker>,
    pub supervisor: Arc<Supervisor>,
    pub reports: ReportSink,
}

/// Handler-facing alias
pub type SharedState = Arc<AppState>;
