//!
//! Trellis Core - domain models, execution engine and interfaces for the
//! Trellis integration-flow platform.
//!
//! This crate defines the entities, the repository traits over the store,
//! the flow execution engine, the secret vault and the shared outbound
//! network policy. Everything else in the workspace builds on it.

#![forbid(unsafe_code)]

/// Domain layer - entities and repository interfaces
pub mod domain;

/// Flow execution engine
pub mod engine;

/// Error types
pub mod error;

/// Outbound network policy (SSRF guard)
pub mod net;

/// Core types shared across components
pub mod types;

/// Secret vault (AES-256-GCM)
pub mod vault;

pub use domain::execution::{
    ExecutionLog, ExecutionStatus, ExecutionStep, FlowExecution, StepStatus, TriggerType,
};
pub use domain::flow::{Flow, FlowStatus, FlowVersion};
pub use domain::graph::{Edge, Graph, HttpActionConfig, Node, NodeAction, Transformation};
pub use domain::integration::{Connection, Integration, IntegrationStatus, ProviderEnv};
pub use domain::notification::{AuditLog, Notification, NotificationKind, TxEvent, TxSummary};
pub use domain::org::{Organization, PendingUser, User};
pub use domain::policy::{ApiRateSample, IpAllowlistEntry};
pub use engine::{ActionDispatcher, ExecutionEngine, HttpAction, StartedExecution};
pub use error::CoreError;
pub use types::{BusEvent, BusPublisher, LogLevel, NullBusPublisher, Principal};
pub use vault::SecretVault;
