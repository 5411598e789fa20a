//!
//! Trellis Store (memory) - in-memory repository implementations.
//!
//! Backs tests and the `DISABLE_DB=1` mode. One [`MemoryStore`] implements
//! every repository trait; state lives behind a single `RwLock`, which keeps
//! cross-entity operations (cascading deletes, org-scoped joins) trivially
//! consistent.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use trellis_core::domain::execution::{ExecutionLog, ExecutionStatus, ExecutionStep, FlowExecution};
use trellis_core::domain::flow::{Flow, FlowStatus, FlowVersion};
use trellis_core::domain::integration::{Connection, Integration, IntegrationStatus};
use trellis_core::domain::notification::{AuditLog, Notification, TxEvent, TxSummary};
use trellis_core::domain::org::{Organization, PendingUser, User};
use trellis_core::domain::policy::{ApiRateSample, IpAllowlistEntry};
use trellis_core::domain::repository::{
    ExecutionRepository, FlowRepository, IntegrationRepository, NotificationRepository,
    PolicyRepository, UserRepository,
};
use trellis_core::error::CoreError;

#[derive(Default)]
struct State {
    orgs: HashMap<Uuid, Organization>,
    users: HashMap<Uuid, User>,
    pending: HashMap<String, PendingUser>,
    flows: HashMap<Uuid, Flow>,
    versions: Vec<FlowVersion>,
    executions: HashMap<Uuid, FlowExecution>,
    steps: Vec<ExecutionStep>,
    logs: Vec<ExecutionLog>,
    integrations: HashMap<Uuid, Integration>,
    connections: HashMap<Uuid, Connection>,
    notifications: HashMap<Uuid, Notification>,
    tx_events: Vec<TxEvent>,
    samples: Vec<ApiRateSample>,
    allowlist: HashMap<Uuid, IpAllowlistEntry>,
    audit: Vec<AuditLog>,
}

/// Every repository trait behind one shared lock
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_org(&self, org: &Organization) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        if state.orgs.values().any(|o| o.name == org.name) {
            return Err(CoreError::Conflict(format!(
                "organization {} already exists",
                org.name
            )));
        }
        state.orgs.insert(org.id, org.clone());
        Ok(())
    }

    async fn find_org(&self, id: Uuid) -> Result<Option<Organization>, CoreError> {
        Ok(self.state.read().await.orgs.get(&id).cloned())
    }

    async fn create_user(&self, user: &User) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        if state
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(CoreError::Conflict("email already registered".to_string()));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, CoreError> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update_user(&self, user: &User) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user.id) {
            return Err(CoreError::NotFound("user".to_string()));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn org_wants_error_alerts(&self, org_id: Uuid) -> Result<bool, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .any(|u| u.org_id == org_id && u.deactivated_at.is_none() && u.send_error_alerts))
    }

    async fn upsert_pending(&self, pending: &PendingUser) -> Result<(), CoreError> {
        self.state
            .write()
            .await
            .pending
            .insert(pending.email.to_lowercase(), pending.clone());
        Ok(())
    }

    async fn find_pending(&self, email: &str) -> Result<Option<PendingUser>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .pending
            .get(&email.to_lowercase())
            .cloned())
    }

    async fn delete_pending(&self, email: &str) -> Result<(), CoreError> {
        self.state.write().await.pending.remove(&email.to_lowercase());
        Ok(())
    }
}

#[async_trait]
impl FlowRepository for MemoryStore {
    async fn create_flow(&self, flow: &Flow) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        let collision = state.flows.values().any(|f| {
            f.org_id == flow.org_id
                && !f.is_deleted
                && f.name.to_lowercase() == flow.name.to_lowercase()
        });
        if collision {
            return Err(CoreError::Conflict(format!(
                "flow {} already exists",
                flow.name
            )));
        }
        state.flows.insert(flow.id, flow.clone());
        Ok(())
    }

    async fn get_flow(&self, org_id: Uuid, id: Uuid) -> Result<Option<Flow>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .flows
            .get(&id)
            .filter(|f| f.org_id == org_id && !f.is_deleted)
            .cloned())
    }

    async fn find_flow(&self, id: Uuid) -> Result<Option<Flow>, CoreError> {
        Ok(self.state.read().await.flows.get(&id).cloned())
    }

    async fn list_flows(&self, org_id: Uuid) -> Result<Vec<Flow>, CoreError> {
        let state = self.state.read().await;
        let mut flows: Vec<Flow> = state
            .flows
            .values()
            .filter(|f| f.org_id == org_id && !f.is_deleted)
            .cloned()
            .collect();
        flows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(flows)
    }

    async fn set_status(&self, org_id: Uuid, id: Uuid, status: FlowStatus) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        match state.flows.get_mut(&id) {
            Some(flow) if flow.org_id == org_id && !flow.is_deleted => {
                flow.status = status;
                flow.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(CoreError::NotFound("flow".to_string())),
        }
    }

    async fn soft_delete(&self, org_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        match state.flows.get_mut(&id) {
            Some(flow) if flow.org_id == org_id && !flow.is_deleted => {
                flow.is_deleted = true;
                flow.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(CoreError::NotFound("flow".to_string())),
        }
    }

    async fn create_version(
        &self,
        flow_id: Uuid,
        graph: &Value,
        variables: &Value,
    ) -> Result<FlowVersion, CoreError> {
        let mut state = self.state.write().await;
        if !state.flows.contains_key(&flow_id) {
            return Err(CoreError::NotFound("flow".to_string()));
        }
        let next = state
            .versions
            .iter()
            .filter(|v| v.flow_id == flow_id)
            .map(|v| v.version)
            .max()
            .unwrap_or(0)
            + 1;
        let version = FlowVersion {
            id: Uuid::new_v4(),
            flow_id,
            version: next,
            graph: graph.clone(),
            variables: variables.clone(),
            created_at: Utc::now(),
        };
        state.versions.push(version.clone());
        Ok(version)
    }

    async fn list_versions(&self, flow_id: Uuid) -> Result<Vec<FlowVersion>, CoreError> {
        let state = self.state.read().await;
        let mut versions: Vec<FlowVersion> = state
            .versions
            .iter()
            .filter(|v| v.flow_id == flow_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| std::cmp::Reverse(v.version));
        Ok(versions)
    }

    async fn get_version(
        &self,
        flow_id: Uuid,
        version: i32,
    ) -> Result<Option<FlowVersion>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .versions
            .iter()
            .find(|v| v.flow_id == flow_id && v.version == version)
            .cloned())
    }

    async fn latest_version(&self, flow_id: Uuid) -> Result<Option<FlowVersion>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .versions
            .iter()
            .filter(|v| v.flow_id == flow_id)
            .max_by_key(|v| v.version)
            .cloned())
    }
}

#[async_trait]
impl ExecutionRepository for MemoryStore {
    async fn insert_execution(&self, exec: &FlowExecution) -> Result<(), CoreError> {
        self.state
            .write()
            .await
            .executions
            .insert(exec.id, exec.clone());
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<FlowExecution>, CoreError> {
        Ok(self.state.read().await.executions.get(&id).cloned())
    }

    async fn update_execution(&self, exec: &FlowExecution) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        if !state.executions.contains_key(&exec.id) {
            return Err(CoreError::NotFound("execution".to_string()));
        }
        state.executions.insert(exec.id, exec.clone());
        Ok(())
    }

    async fn execution_status(&self, id: Uuid) -> Result<Option<ExecutionStatus>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .executions
            .get(&id)
            .map(|e| e.status))
    }

    async fn insert_step(&self, step: &ExecutionStep) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        if state
            .steps
            .iter()
            .any(|s| s.execution_id == step.execution_id && s.node_id == step.node_id)
        {
            return Err(CoreError::Conflict(format!(
                "step for node {} already recorded",
                step.node_id
            )));
        }
        state.steps.push(step.clone());
        Ok(())
    }

    async fn update_step(&self, step: &ExecutionStep) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        match state.steps.iter_mut().find(|s| s.id == step.id) {
            Some(existing) => {
                *existing = step.clone();
                Ok(())
            }
            None => Err(CoreError::NotFound("execution step".to_string())),
        }
    }

    async fn get_steps(&self, execution_id: Uuid) -> Result<Vec<ExecutionStep>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .steps
            .iter()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn insert_log(&self, log: &ExecutionLog) -> Result<(), CoreError> {
        self.state.write().await.logs.push(log.clone());
        Ok(())
    }

    async fn get_logs(
        &self,
        execution_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExecutionLog>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .logs
            .iter()
            .filter(|l| l.execution_id == execution_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_for_flow(
        &self,
        flow_id: Uuid,
        limit: i64,
    ) -> Result<Vec<FlowExecution>, CoreError> {
        let state = self.state.read().await;
        let mut executions: Vec<FlowExecution> = state
            .executions
            .values()
            .filter(|e| e.flow_id == flow_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions.truncate(limit.max(0) as usize);
        Ok(executions)
    }

    async fn list_recent_for_org(
        &self,
        org_id: Uuid,
        limit: i64,
    ) -> Result<Vec<FlowExecution>, CoreError> {
        let state = self.state.read().await;
        let mut executions: Vec<FlowExecution> = state
            .executions
            .values()
            .filter(|e| {
                state
                    .flows
                    .get(&e.flow_id)
                    .map(|f| f.org_id == org_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions.truncate(limit.max(0) as usize);
        Ok(executions)
    }

    async fn delete_execution(&self, id: Uuid) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        // Ownership order: logs, then steps, then the execution row
        state.logs.retain(|l| l.execution_id != id);
        state.steps.retain(|s| s.execution_id != id);
        state
            .executions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound("execution".to_string()))
    }

    async fn list_running(&self) -> Result<Vec<Uuid>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Running)
            .map(|e| e.id)
            .collect())
    }
}

#[async_trait]
impl IntegrationRepository for MemoryStore {
    async fn create_integration(&self, integration: &Integration) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        let collision = state.integrations.values().any(|i| {
            i.org_id == integration.org_id
                && i.name.to_lowercase() == integration.name.to_lowercase()
        });
        if collision {
            return Err(CoreError::Conflict(format!(
                "integration {} already exists",
                integration.name
            )));
        }
        state
            .integrations
            .insert(integration.id, integration.clone());
        Ok(())
    }

    async fn update_integration(&self, integration: &Integration) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        if !state.integrations.contains_key(&integration.id) {
            return Err(CoreError::NotFound("integration".to_string()));
        }
        let collision = state.integrations.values().any(|i| {
            i.id != integration.id
                && i.org_id == integration.org_id
                && i.name.to_lowercase() == integration.name.to_lowercase()
        });
        if collision {
            return Err(CoreError::Conflict(format!(
                "integration {} already exists",
                integration.name
            )));
        }
        state
            .integrations
            .insert(integration.id, integration.clone());
        Ok(())
    }

    async fn delete_integration(&self, org_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        match state.integrations.get(&id) {
            Some(it) if it.org_id == org_id => {
                state.integrations.remove(&id);
                Ok(())
            }
            _ => Err(CoreError::NotFound("integration".to_string())),
        }
    }

    async fn get_integration(
        &self,
        org_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Integration>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .integrations
            .get(&id)
            .filter(|i| i.org_id == org_id)
            .cloned())
    }

    async fn list_integrations(&self, org_id: Uuid) -> Result<Vec<Integration>, CoreError> {
        let state = self.state.read().await;
        let mut integrations: Vec<Integration> = state
            .integrations
            .values()
            .filter(|i| i.org_id == org_id)
            .cloned()
            .collect();
        integrations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(integrations)
    }

    async fn list_all_integrations(&self) -> Result<Vec<Integration>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .integrations
            .values()
            .cloned()
            .collect())
    }

    async fn set_integration_status(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        last_checked: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        match state.integrations.get_mut(&id) {
            Some(it) => {
                it.status = status;
                it.last_checked = Some(last_checked);
                Ok(())
            }
            None => Err(CoreError::NotFound("integration".to_string())),
        }
    }

    async fn create_connection(&self, connection: &Connection) -> Result<(), CoreError> {
        self.state
            .write()
            .await
            .connections
            .insert(connection.id, connection.clone());
        Ok(())
    }

    async fn list_connections(&self, owner_user_id: Uuid) -> Result<Vec<Connection>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .connections
            .values()
            .filter(|c| c.owner_user_id == owner_user_id)
            .cloned()
            .collect())
    }

    async fn delete_connection(&self, owner_user_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        match state.connections.get(&id) {
            Some(c) if c.owner_user_id == owner_user_id => {
                state.connections.remove(&id);
                Ok(())
            }
            _ => Err(CoreError::NotFound("connection".to_string())),
        }
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), CoreError> {
        self.state
            .write()
            .await
            .notifications
            .insert(notification.id, notification.clone());
        Ok(())
    }

    async fn list_notifications(
        &self,
        org_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Notification>, CoreError> {
        let state = self.state.read().await;
        let mut notifications: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.org_id == org_id)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notifications.truncate(limit.max(0) as usize);
        Ok(notifications)
    }

    async fn mark_read(&self, org_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        match state.notifications.get_mut(&id) {
            Some(n) if n.org_id == org_id => {
                n.is_read = true;
                Ok(())
            }
            _ => Err(CoreError::NotFound("notification".to_string())),
        }
    }

    async fn mark_all_read(&self, org_id: Uuid) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        for n in state.notifications.values_mut() {
            if n.org_id == org_id {
                n.is_read = true;
            }
        }
        Ok(())
    }

    async fn insert_tx_event(&self, event: &TxEvent) -> Result<(), CoreError> {
        self.state.write().await.tx_events.push(event.clone());
        Ok(())
    }

    async fn tx_summary(&self, org_id: Uuid) -> Result<TxSummary, CoreError> {
        let state = self.state.read().await;
        let events: Vec<&TxEvent> = state
            .tx_events
            .iter()
            .filter(|e| e.org_id == org_id)
            .collect();

        let total = events.len() as i64;
        let succeeded = events.iter().filter(|e| e.success).count() as i64;
        let latencies: Vec<i64> = events.iter().filter_map(|e| e.latency_ms).collect();

        Ok(TxSummary {
            total,
            succeeded,
            failed: total - succeeded,
            success_rate: if total > 0 {
                succeeded as f64 / total as f64
            } else {
                0.0
            },
            avg_latency_ms: if latencies.is_empty() {
                None
            } else {
                Some(latencies.iter().sum::<i64>() as f64 / latencies.len() as f64)
            },
        })
    }
}

#[async_trait]
impl PolicyRepository for MemoryStore {
    async fn count_samples_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .samples
            .iter()
            .filter(|s| s.user_id == user_id && s.timestamp >= since)
            .count() as i64)
    }

    async fn insert_sample(&self, sample: &ApiRateSample) -> Result<(), CoreError> {
        self.state.write().await.samples.push(sample.clone());
        Ok(())
    }

    async fn delete_samples_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError> {
        let mut state = self.state.write().await;
        let before = state.samples.len();
        state.samples.retain(|s| s.timestamp >= cutoff);
        Ok((before - state.samples.len()) as u64)
    }

    async fn list_allowlist(&self, user_id: Uuid) -> Result<Vec<IpAllowlistEntry>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .allowlist
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_allowlist(&self, entry: &IpAllowlistEntry) -> Result<(), CoreError> {
        self.state
            .write()
            .await
            .allowlist
            .insert(entry.id, entry.clone());
        Ok(())
    }

    async fn delete_allowlist(&self, user_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        match state.allowlist.get(&id) {
            Some(e) if e.user_id == user_id => {
                state.allowlist.remove(&id);
                Ok(())
            }
            _ => Err(CoreError::NotFound("allowlist entry".to_string())),
        }
    }

    async fn insert_audit(&self, entry: &AuditLog) -> Result<(), CoreError> {
        self.state.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit_for_org(
        &self,
        org_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditLog>, CoreError> {
        let state = self.state.read().await;
        let mut entries: Vec<AuditLog> = state
            .audit
            .iter()
            .filter(|a| {
                a.user_id
                    .and_then(|uid| state.users.get(&uid))
                    .map(|u| u.org_id == org_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }
}
