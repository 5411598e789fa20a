//! Repository interfaces over the relational store.
//!
//! The engine, gate and workers only ever see these traits; concrete
//! implementations live in the store crates and are constructed once at
//! startup, then shared by reference.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::execution::{ExecutionLog, ExecutionStatus, ExecutionStep, FlowExecution};
use crate::domain::flow::{Flow, FlowStatus, FlowVersion};
use crate::domain::integration::{Connection, Integration, IntegrationStatus};
use crate::domain::notification::{AuditLog, Notification, TxEvent, TxSummary};
use crate::domain::org::{Organization, PendingUser, User};
use crate::domain::policy::{ApiRateSample, IpAllowlistEntry};
use crate::error::CoreError;

/// Organizations, users and pending signups
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_org(&self, org: &Organization) -> Result<(), CoreError>;
    async fn find_org(&self, id: Uuid) -> Result<Option<Organization>, CoreError>;

    async fn create_user(&self, user: &User) -> Result<(), CoreError>;
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, CoreError>;
    /// Case-insensitive lookup
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, CoreError>;
    async fn update_user(&self, user: &User) -> Result<(), CoreError>;
    /// True when any non-deactivated user of the org has error alerts
    /// enabled; gates provider-failure notifications
    async fn org_wants_error_alerts(&self, org_id: Uuid) -> Result<bool, CoreError>;

    /// Insert or replace the pending signup for this email
    async fn upsert_pending(&self, pending: &PendingUser) -> Result<(), CoreError>;
    async fn find_pending(&self, email: &str) -> Result<Option<PendingUser>, CoreError>;
    async fn delete_pending(&self, email: &str) -> Result<(), CoreError>;
}

/// Flows and their immutable versions
#[async_trait]
pub trait FlowRepository: Send + Sync {
    /// Fails with `Conflict` on a case-insensitive name collision in the org
    async fn create_flow(&self, flow: &Flow) -> Result<(), CoreError>;
    /// Org-scoped read; soft-deleted flows are invisible
    async fn get_flow(&self, org_id: Uuid, id: Uuid) -> Result<Option<Flow>, CoreError>;
    /// Unscoped lookup for internal ownership checks; includes deleted rows
    async fn find_flow(&self, id: Uuid) -> Result<Option<Flow>, CoreError>;
    async fn list_flows(&self, org_id: Uuid) -> Result<Vec<Flow>, CoreError>;
    async fn set_status(&self, org_id: Uuid, id: Uuid, status: FlowStatus) -> Result<(), CoreError>;
    async fn soft_delete(&self, org_id: Uuid, id: Uuid) -> Result<(), CoreError>;

    /// Assigns `max(version) + 1` atomically; the returned row carries the
    /// assigned number
    async fn create_version(
        &self,
        flow_id: Uuid,
        graph: &Value,
        variables: &Value,
    ) -> Result<FlowVersion, CoreError>;
    async fn list_versions(&self, flow_id: Uuid) -> Result<Vec<FlowVersion>, CoreError>;
    async fn get_version(&self, flow_id: Uuid, version: i32) -> Result<Option<FlowVersion>, CoreError>;
    async fn latest_version(&self, flow_id: Uuid) -> Result<Option<FlowVersion>, CoreError>;
}

/// Executions, steps and logs
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn insert_execution(&self, exec: &FlowExecution) -> Result<(), CoreError>;
    async fn get_execution(&self, id: Uuid) -> Result<Option<FlowExecution>, CoreError>;
    async fn update_execution(&self, exec: &FlowExecution) -> Result<(), CoreError>;
    /// Cheap status-only read, used for the cooperative cancel check
    async fn execution_status(&self, id: Uuid) -> Result<Option<ExecutionStatus>, CoreError>;

    async fn insert_step(&self, step: &ExecutionStep) -> Result<(), CoreError>;
    async fn update_step(&self, step: &ExecutionStep) -> Result<(), CoreError>;
    async fn get_steps(&self, execution_id: Uuid) -> Result<Vec<ExecutionStep>, CoreError>;

    async fn insert_log(&self, log: &ExecutionLog) -> Result<(), CoreError>;
    async fn get_logs(&self, execution_id: Uuid, limit: i64) -> Result<Vec<ExecutionLog>, CoreError>;

    async fn list_for_flow(&self, flow_id: Uuid, limit: i64) -> Result<Vec<FlowExecution>, CoreError>;
    /// Joins through Flow for org scoping; newest first
    async fn list_recent_for_org(&self, org_id: Uuid, limit: i64) -> Result<Vec<FlowExecution>, CoreError>;

    /// Deletes logs, then steps, then the execution row, in that order
    async fn delete_execution(&self, id: Uuid) -> Result<(), CoreError>;
    /// Ids of every execution currently in `running`
    async fn list_running(&self) -> Result<Vec<Uuid>, CoreError>;
}

/// Integrations and provider connections
#[async_trait]
pub trait IntegrationRepository: Send + Sync {
    /// Fails with `Conflict` on a case-insensitive name collision in the org
    async fn create_integration(&self, integration: &Integration) -> Result<(), CoreError>;
    async fn update_integration(&self, integration: &Integration) -> Result<(), CoreError>;
    async fn delete_integration(&self, org_id: Uuid, id: Uuid) -> Result<(), CoreError>;
    async fn get_integration(&self, org_id: Uuid, id: Uuid) -> Result<Option<Integration>, CoreError>;
    async fn list_integrations(&self, org_id: Uuid) -> Result<Vec<Integration>, CoreError>;
    /// Every integration across every org; startup self-check only
    async fn list_all_integrations(&self) -> Result<Vec<Integration>, CoreError>;
    /// Last write wins on `last_checked`; concurrent re-verification is fine
    async fn set_integration_status(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        last_checked: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    async fn create_connection(&self, connection: &Connection) -> Result<(), CoreError>;
    async fn list_connections(&self, owner_user_id: Uuid) -> Result<Vec<Connection>, CoreError>;
    async fn delete_connection(&self, owner_user_id: Uuid, id: Uuid) -> Result<(), CoreError>;
}

/// Notifications and provider-call rollups
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), CoreError>;
    async fn list_notifications(&self, org_id: Uuid, limit: i64) -> Result<Vec<Notification>, CoreError>;
    async fn mark_read(&self, org_id: Uuid, id: Uuid) -> Result<(), CoreError>;
    async fn mark_all_read(&self, org_id: Uuid) -> Result<(), CoreError>;

    async fn insert_tx_event(&self, event: &TxEvent) -> Result<(), CoreError>;
    async fn tx_summary(&self, org_id: Uuid) -> Result<TxSummary, CoreError>;
}

/// Rate samples, IP allowlist and the audit trail
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn count_samples_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, CoreError>;
    async fn insert_sample(&self, sample: &ApiRateSample) -> Result<(), CoreError>;
    /// Periodic sweep; returns how many rows went away
    async fn delete_samples_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError>;

    async fn list_allowlist(&self, user_id: Uuid) -> Result<Vec<IpAllowlistEntry>, CoreError>;
    async fn insert_allowlist(&self, entry: &IpAllowlistEntry) -> Result<(), CoreError>;
    async fn delete_allowlist(&self, user_id: Uuid, id: Uuid) -> Result<(), CoreError>;

    async fn insert_audit(&self, entry: &AuditLog) -> Result<(), CoreError>;
    /// Org-scoped via the users table; newest first
    async fn list_audit_for_org(&self, org_id: Uuid, limit: i64) -> Result<Vec<AuditLog>, CoreError>;
}
