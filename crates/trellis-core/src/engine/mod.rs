//! Flow Execution Engine.
//!
//! Loads a versioned graph, computes a sequential execution plan,
//! materializes one ExecutionStep per node in dependency order, and
//! persists a log stream alongside. Failure is fail-fast: a failed node
//! halts the plan and fails the execution; no retry, no compensation.

pub mod condition;
pub mod http_action;
pub mod plan;
pub mod transform;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::execution::{
    ExecutionLog, ExecutionStatus, ExecutionStep, FlowExecution, TriggerType,
};
use crate::domain::graph::{Graph, Node, NodeAction};
use crate::domain::notification::{Notification, NotificationKind};
use crate::domain::repository::{ExecutionRepository, FlowRepository, NotificationRepository};
use crate::error::CoreError;
use crate::types::{BusEvent, BusPublisher, LogLevel};

pub use http_action::{HttpAction, ACTION_HTTP_TIMEOUT};

/// Handles action nodes the engine does not evaluate itself (HTTP, email,
/// provider operations). The server wires the full platform dispatcher;
/// tests substitute their own.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        org_id: Uuid,
        node: &Node,
        action: &NodeAction,
        inputs: &Value,
    ) -> Result<Value, CoreError>;
}

/// Dispatcher that knows HTTP actions only; every other action kind fails
/// with a clear error. Useful on its own for tests and minimal deployments.
pub struct HttpOnlyDispatcher {
    http: HttpAction,
}

impl HttpOnlyDispatcher {
    pub fn new(http: HttpAction) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ActionDispatcher for HttpOnlyDispatcher {
    async fn dispatch(
        &self,
        _org_id: Uuid,
        node: &Node,
        action: &NodeAction,
        _inputs: &Value,
    ) -> Result<Value, CoreError> {
        match action {
            NodeAction::Http(config) => self.http.execute(config).await,
            NodeAction::Provider { provider, .. } => Err(CoreError::Validation(format!(
                "node {}: no provider client registered for {}",
                node.id, provider
            ))),
            NodeAction::Email { .. } => Err(CoreError::Validation(format!(
                "node {}: no mailer configured",
                node.id
            ))),
            NodeAction::Unrecognized { node_type, kind } => Err(CoreError::Validation(format!(
                "node {}: unrecognized action (type {:?}, kind {:?})",
                node.id, node_type, kind
            ))),
            other => Err(CoreError::Internal(format!(
                "node {}: {:?} should not reach the dispatcher",
                node.id, other
            ))),
        }
    }
}

/// What `start_execution` returns as soon as the running row is committed
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StartedExecution {
    pub execution_id: Uuid,
    pub flow_name: String,
    pub version: i32,
    pub status: ExecutionStatus,
}

/// The execution and coordination plane for flows.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct ExecutionEngine {
    flows: Arc<dyn FlowRepository>,
    executions: Arc<dyn ExecutionRepository>,
    notifications: Arc<dyn NotificationRepository>,
    dispatcher: Arc<dyn ActionDispatcher>,
    bus: Arc<dyn BusPublisher>,
    in_flight: Arc<DashMap<Uuid, ()>>,
}

impl ExecutionEngine {
    pub fn new(
        flows: Arc<dyn FlowRepository>,
        executions: Arc<dyn ExecutionRepository>,
        notifications: Arc<dyn NotificationRepository>,
        dispatcher: Arc<dyn ActionDispatcher>,
        bus: Arc<dyn BusPublisher>,
    ) -> Self {
        Self {
            flows,
            executions,
            notifications,
            dispatcher,
            bus,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Begin an execution of the latest version of a flow.
    ///
    /// Returns as soon as the `running` row is committed; the graph is
    /// driven by a separate task and this call never waits for completion.
    pub async fn start_execution(
        &self,
        org_id: Uuid,
        flow_id: Uuid,
        trigger_type: TriggerType,
        trigger_data: Value,
    ) -> Result<StartedExecution, CoreError> {
        let flow = self
            .flows
            .get_flow(org_id, flow_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("flow".to_string()))?;

        let version = self
            .flows
            .latest_version(flow_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("flow version".to_string()))?;

        let execution = FlowExecution::new(flow_id, version.version, trigger_type, trigger_data);
        self.executions.insert_execution(&execution).await?;

        info!(
            execution_id = %execution.id,
            flow_id = %flow_id,
            version = version.version,
            trigger = trigger_type.as_str(),
            "starting flow execution"
        );

        let engine = self.clone();
        let execution_id = execution.id;
        let graph_json = version.graph.clone();
        let trigger = execution.trigger_data.clone();
        self.in_flight.insert(execution_id, ());
        tokio::spawn(async move {
            engine.drive(org_id, execution_id, graph_json, trigger).await;
            engine.in_flight.remove(&execution_id);
        });

        Ok(StartedExecution {
            execution_id,
            flow_name: flow.name,
            version: version.version,
            status: ExecutionStatus::Running,
        })
    }

    /// Drive one execution to a terminal state. Never returns an error;
    /// every failure path lands in the store.
    async fn drive(&self, org_id: Uuid, execution_id: Uuid, graph_json: Value, trigger: Value) {
        let graph = match Graph::from_value(&graph_json) {
            Ok(graph) => graph,
            Err(e) => {
                self.fail_execution(org_id, execution_id, e.to_string()).await;
                return;
            }
        };

        // Plan and decode every node action before the first step runs
        let plan = match plan::build_plan(&graph) {
            Ok(plan) => plan,
            Err(e) => {
                self.log(execution_id, None, LogLevel::Error, e.to_string()).await;
                self.fail_execution(org_id, execution_id, e.to_string()).await;
                return;
            }
        };

        let mut actions: HashMap<String, NodeAction> = HashMap::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            match NodeAction::resolve(node) {
                Ok(action) => {
                    actions.insert(node.id.clone(), action);
                }
                Err(e) => {
                    self.log(execution_id, None, LogLevel::Error, e.to_string()).await;
                    self.fail_execution(org_id, execution_id, e.to_string()).await;
                    return;
                }
            }
        }

        let mut node_outputs: Map<String, Value> = Map::new();

        for node_id in &plan {
            // Cooperative cancellation, checked between nodes
            match self.executions.execution_status(execution_id).await {
                Ok(Some(ExecutionStatus::Running)) => {}
                Ok(_) => {
                    info!(execution_id = %execution_id, "execution no longer running, stopping");
                    return;
                }
                Err(e) => {
                    error!(execution_id = %execution_id, "status check failed: {}", e);
                    self.fail_execution(org_id, execution_id, e.to_string()).await;
                    return;
                }
            }

            let node = graph.node(node_id).expect("planned node exists");
            let action = &actions[node_id];

            if let Err(step_error) = self
                .run_node(org_id, execution_id, &graph, node, action, &trigger, &mut node_outputs)
                .await
            {
                self.fail_execution(org_id, execution_id, step_error).await;
                return;
            }
        }

        self.complete_execution(org_id, execution_id).await;
    }

    /// One node through its lifecycle. `Err` carries the message that fails
    /// the whole execution.
    #[allow(clippy::too_many_arguments)]
    async fn run_node(
        &self,
        org_id: Uuid,
        execution_id: Uuid,
        graph: &Graph,
        node: &Node,
        action: &NodeAction,
        trigger: &Value,
        node_outputs: &mut Map<String, Value>,
    ) -> Result<(), String> {
        let mut step = ExecutionStep::started(
            execution_id,
            &node.id,
            &node.node_type,
            node.kind.as_deref(),
        );
        if let Err(e) = self.executions.insert_step(&step).await {
            return Err(format!("failed to record step for node {}: {}", node.id, e));
        }

        self.log(
            execution_id,
            Some(step.id),
            LogLevel::Info,
            format!("Executing node: {}", node.display_name()),
        )
        .await;

        // Gather predecessor outputs keyed by node id
        let mut inputs: Map<String, Value> = Map::new();
        for pred in graph.predecessors(&node.id) {
            if let Some(output) = node_outputs.get(pred) {
                inputs.insert(pred.to_string(), output.clone());
            }
        }
        let inputs_value = transform::inputs_value(&inputs);

        let result: Result<Value, CoreError> = match action {
            NodeAction::Start | NodeAction::Trigger => Ok(trigger.clone()),
            NodeAction::End => Ok(json!({
                "completed": true,
                "inputs": Value::Object(inputs.clone()),
                "timestamp": Utc::now(),
            })),
            NodeAction::Condition { condition } => {
                Ok(condition::evaluate(condition.as_deref(), &inputs))
            }
            NodeAction::Transform { transformation, fields } => {
                Ok(transform::apply(*transformation, fields.as_deref(), &inputs))
            }
            other => {
                if let NodeAction::Unrecognized { node_type, .. } = other {
                    warn!(node = %node.id, "unknown node type {}, treating as action", node_type);
                    self.log(
                        execution_id,
                        Some(step.id),
                        LogLevel::Warn,
                        format!("Unknown node type: {}", node_type),
                    )
                    .await;
                }
                self.dispatcher.dispatch(org_id, node, other, &inputs_value).await
            }
        };

        match result {
            Ok(output) => {
                node_outputs.insert(node.id.clone(), output.clone());
                step.complete(inputs_value, output);
                if let Err(e) = self.executions.update_step(&step).await {
                    return Err(format!("failed to persist step for node {}: {}", node.id, e));
                }
                Ok(())
            }
            Err(e) => {
                let message = format!("node {}: {}", node.id, e);
                step.fail(inputs_value, message.clone());
                if let Err(update_err) = self.executions.update_step(&step).await {
                    error!(execution_id = %execution_id, "failed to persist failed step: {}", update_err);
                }
                self.log(
                    execution_id,
                    Some(step.id),
                    LogLevel::Error,
                    message.clone(),
                )
                .await;
                Err(message)
            }
        }
    }

    async fn complete_execution(&self, org_id: Uuid, execution_id: Uuid) {
        let Ok(Some(mut execution)) = self.executions.get_execution(execution_id).await else {
            error!(execution_id = %execution_id, "execution vanished before completion");
            return;
        };
        if execution.status.is_terminal() {
            return;
        }
        execution.complete();
        if let Err(e) = self.executions.update_execution(&execution).await {
            error!(execution_id = %execution_id, "failed to mark execution completed: {}", e);
            return;
        }
        self.log(execution_id, None, LogLevel::Info, "Execution completed").await;
        self.notify_result(org_id, &execution).await;
    }

    async fn fail_execution(&self, org_id: Uuid, execution_id: Uuid, message: String) {
        let Ok(Some(mut execution)) = self.executions.get_execution(execution_id).await else {
            error!(execution_id = %execution_id, "execution vanished before failure record");
            return;
        };
        if execution.status.is_terminal() {
            return;
        }
        execution.fail(message);
        if let Err(e) = self.executions.update_execution(&execution).await {
            error!(execution_id = %execution_id, "failed to mark execution failed: {}", e);
            return;
        }
        self.notify_result(org_id, &execution).await;
    }

    /// Surface the terminal state as an org notification and a bus event
    async fn notify_result(&self, org_id: Uuid, execution: &FlowExecution) {
        let notification = match execution.status {
            ExecutionStatus::Completed => Notification::new(
                org_id,
                NotificationKind::Info,
                "Flow execution completed",
                format!("Execution {} completed", execution.id),
            ),
            ExecutionStatus::Failed => Notification::new(
                org_id,
                NotificationKind::Error,
                "Flow execution failed",
                execution
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("Execution {} failed", execution.id)),
            ),
            _ => return,
        }
        .with_related(execution.id);

        if let Err(e) = self.notifications.insert_notification(&notification).await {
            error!(execution_id = %execution.id, "failed to insert notification: {}", e);
        }
        self.bus.publish(org_id, BusEvent::NotificationsUpdate).await;
    }

    async fn log(
        &self,
        execution_id: Uuid,
        step_id: Option<Uuid>,
        level: LogLevel,
        message: impl Into<String>,
    ) {
        let entry = ExecutionLog::new(execution_id, step_id, level, message);
        if let Err(e) = self.executions.insert_log(&entry).await {
            error!(execution_id = %execution_id, "failed to insert execution log: {}", e);
        }
    }

    // ---- reads -----------------------------------------------------------

    pub async fn get_execution(&self, id: Uuid) -> Result<Option<FlowExecution>, CoreError> {
        self.executions.get_execution(id).await
    }

    pub async fn get_steps(&self, execution_id: Uuid) -> Result<Vec<ExecutionStep>, CoreError> {
        self.executions.get_steps(execution_id).await
    }

    pub async fn get_logs(
        &self,
        execution_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExecutionLog>, CoreError> {
        self.executions.get_logs(execution_id, limit).await
    }

    pub async fn list_flow_executions(
        &self,
        flow_id: Uuid,
        limit: i64,
    ) -> Result<Vec<FlowExecution>, CoreError> {
        self.executions.list_for_flow(flow_id, limit).await
    }

    /// Recent executions across the org, capped at 100
    pub async fn list_recent_for_org(
        &self,
        org_id: Uuid,
        limit: i64,
    ) -> Result<Vec<FlowExecution>, CoreError> {
        self.executions
            .list_recent_for_org(org_id, limit.clamp(1, 100))
            .await
    }

    // ---- state changes ---------------------------------------------------

    /// Transition `running -> cancelled`. No-op on terminal states.
    /// Cooperative: an in-flight node runs to its own timeout; the driver
    /// observes the flag before starting the next node.
    pub async fn cancel_execution(&self, id: Uuid) -> Result<FlowExecution, CoreError> {
        let mut execution = self
            .executions
            .get_execution(id)
            .await?
            .ok_or_else(|| CoreError::NotFound("execution".to_string()))?;

        if execution.status == ExecutionStatus::Running {
            execution.cancel();
            self.executions.update_execution(&execution).await?;
            info!(execution_id = %id, "execution cancelled");
        }
        Ok(execution)
    }

    /// Delete an execution (logs, then steps, then the row), permitted only
    /// when the execution's flow belongs to `org_id`.
    pub async fn delete_execution(&self, id: Uuid, org_id: Uuid) -> Result<(), CoreError> {
        let execution = self
            .executions
            .get_execution(id)
            .await?
            .ok_or_else(|| CoreError::NotFound("execution".to_string()))?;

        let flow = self
            .flows
            .find_flow(execution.flow_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("flow".to_string()))?;

        if flow.org_id != org_id {
            return Err(CoreError::Forbidden(
                "execution belongs to another organization".to_string(),
            ));
        }

        self.executions.delete_execution(id).await
    }

    /// Number of executions currently being driven by this process
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Drain in-flight executions for up to `grace`, then mark survivors
    /// failed with `error_message="shutdown"`.
    pub async fn shutdown(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        while !self.in_flight.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let survivors: Vec<Uuid> = self.in_flight.iter().map(|e| *e.key()).collect();
        for id in survivors {
            match self.executions.get_execution(id).await {
                Ok(Some(mut execution)) if execution.status == ExecutionStatus::Running => {
                    execution.fail("shutdown");
                    if let Err(e) = self.executions.update_execution(&execution).await {
                        error!(execution_id = %id, "failed to mark execution failed on shutdown: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => error!(execution_id = %id, "shutdown status check failed: {}", e),
            }
        }
        if !self.in_flight.is_empty() {
            warn!(survivors = self.in_flight.len(), "shutdown grace expired with executions in flight");
        }
    }
}
