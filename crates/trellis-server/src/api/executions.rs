//! Execution read and control handlers.
//!
//! Every read joins through the flow for org scoping: an execution id from
//! another org is indistinguishable from a missing one.

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use trellis_core::error::CoreError;
use trellis_core::types::Principal;
use trellis_core::{ExecutionLog, ExecutionStep, FlowExecution, TriggerType};

use crate::api::errors::ApiError;
use crate::state::SharedState;

fn execution_json(exec: &FlowExecution) -> Value {
    json!({
        "id": exec.id,
        "flowId": exec.flow_id,
        "flowVersion": exec.flow_version,
        "status": exec.status,
        "triggerType": exec.trigger_type,
        "triggerData": exec.trigger_data,
        "startedAt": exec.started_at,
        "completedAt": exec.completed_at,
        "errorMessage": exec.error_message,
        "executionTimeMs": exec.execution_time_ms,
    })
}

/// A `running` row past the stale threshold has no proven live worker; it
/// is flagged so readers can treat it as suspect.
fn execution_json_flagged(exec: &FlowExecution, stale_threshold_secs: u64) -> Value {
    let mut value = execution_json(exec);
    let threshold = chrono::Duration::seconds(stale_threshold_secs as i64);
    if exec.is_stale_running(threshold, chrono::Utc::now()) {
        value["suspectStale"] = json!(true);
    }
    value
}

fn step_json(step: &ExecutionStep) -> Value {
    json!({
        "id": step.id,
        "executionId": step.execution_id,
        "nodeId": step.node_id,
        "nodeType": step.node_type,
        "nodeKind": step.node_kind,
        "status": step.status,
        "startedAt": step.started_at,
        "completedAt": step.completed_at,
        "inputData": step.input_data,
        "outputData": step.output_data,
        "errorMessage": step.error_message,
        "executionTimeMs": step.execution_time_ms,
        "retryCount": step.retry_count,
    })
}

fn log_json(log: &ExecutionLog) -> Value {
    json!({
        "id": log.id,
        "executionId": log.execution_id,
        "stepId": log.step_id,
        "level": log.level,
        "message": log.message,
        "metadata": log.metadata,
        "createdAt": log.created_at,
    })
}

/// Load an execution and prove it belongs to the caller's org
async fn load_org_execution(
    state: &SharedState,
    org_id: Uuid,
    execution_id: Uuid,
) -> Result<FlowExecution, CoreError> {
    let execution = state
        .engine
        .get_execution(execution_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("execution".to_string()))?;

    let flow = state
        .repos
        .flows
        .find_flow(execution.flow_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("execution".to_string()))?;
    if flow.org_id != org_id {
        return Err(CoreError::NotFound("execution".to_string()));
    }
    Ok(execution)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartExecutionRequest {
    pub flow_id: Uuid,
    #[serde(default)]
    pub trigger_type: Option<TriggerType>,
    #[serde(default)]
    pub trigger_data: Option<Value>,
}

/// POST /executions/start — returns as soon as the running row commits
pub async fn start_execution(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<StartExecutionRequest>,
) -> Result<Response, ApiError> {
    let started = state
        .engine
        .start_execution(
            principal.org_id,
            body.flow_id,
            body.trigger_type.unwrap_or(TriggerType::Manual),
            body.trigger_data.unwrap_or_else(|| json!({})),
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "executionId": started.execution_id,
            "flowName": started.flow_name,
            "version": started.version,
            "status": started.status,
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/// GET /executions/recent?limit= — org-wide, capped at 100
pub async fn recent(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, ApiError> {
    let executions = state
        .engine
        .list_recent_for_org(principal.org_id, query.limit.unwrap_or(20))
        .await?;
    let threshold = state.config.stale_running_threshold_secs;
    Ok(Json(json!({
        "executions": executions
            .iter()
            .map(|e| execution_json_flagged(e, threshold))
            .collect::<Vec<_>>()
    })))
}

/// GET /executions/flow/:id?limit=
pub async fn list_for_flow(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(flow_id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, ApiError> {
    state
        .repos
        .flows
        .get_flow(principal.org_id, flow_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("flow".to_string()))?;

    let executions = state
        .engine
        .list_flow_executions(flow_id, query.limit.unwrap_or(50))
        .await?;
    Ok(Json(json!({
        "executions": executions.iter().map(execution_json).collect::<Vec<_>>()
    })))
}

/// GET /executions/:id
pub async fn get_execution(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let execution = load_org_execution(&state, principal.org_id, id).await?;
    Ok(Json(execution_json_flagged(
        &execution,
        state.config.stale_running_threshold_secs,
    )))
}

/// GET /executions/:id/steps
pub async fn get_steps(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    load_org_execution(&state, principal.org_id, id).await?;
    let steps = state.engine.get_steps(id).await?;
    Ok(Json(json!({
        "steps": steps.iter().map(step_json).collect::<Vec<_>>()
    })))
}

/// GET /executions/:id/logs?limit=
pub async fn get_logs(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, ApiError> {
    load_org_execution(&state, principal.org_id, id).await?;
    let logs = state.engine.get_logs(id, query.limit.unwrap_or(100)).await?;
    Ok(Json(json!({
        "logs": logs.iter().map(log_json).collect::<Vec<_>>()
    })))
}

/// POST /executions/:id/cancel — cooperative; in-flight nodes finish on
/// their own deadline
pub async fn cancel(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    load_org_execution(&state, principal.org_id, id).await?;
    let execution = state.engine.cancel_execution(id).await?;
    Ok(Json(execution_json(&execution)))
}

/// DELETE /executions/:id
pub async fn delete(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_execution(id, principal.org_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
