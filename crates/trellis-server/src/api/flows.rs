//! Flow CRUD and versioning handlers.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use trellis_core::error::CoreError;
use trellis_core::types::Principal;
use trellis_core::{Flow, FlowStatus, FlowVersion, Graph, TriggerType};

use crate::api::errors::ApiError;
use crate::state::SharedState;

fn flow_json(flow: &Flow) -> Value {
    json!({
        "id": flow.id,
        "orgId": flow.org_id,
        "name": flow.name,
        "status": flow.status,
        "createdBy": flow.created_by,
        "createdAt": flow.created_at,
        "updatedAt": flow.updated_at,
    })
}

fn version_json(version: &FlowVersion) -> Value {
    json!({
        "id": version.id,
        "flowId": version.flow_id,
        "version": version.version,
        "graph": version.graph,
        "variables": version.variables,
        "createdAt": version.created_at,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlowRequest {
    pub name: String,
}

/// POST /flows
pub async fn create_flow(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CreateFlowRequest>,
) -> Result<Response, ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(CoreError::Validation("flow name is required".to_string()).into());
    }

    let flow = Flow::new(principal.org_id, name, principal.user_id);
    state.repos.flows.create_flow(&flow).await?;
    Ok((StatusCode::CREATED, Json(flow_json(&flow))).into_response())
}

/// GET /flows
pub async fn list_flows(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, ApiError> {
    let flows = state.repos.flows.list_flows(principal.org_id).await?;
    Ok(Json(json!({
        "flows": flows.iter().map(flow_json).collect::<Vec<_>>()
    })))
}

/// GET /flows/:id
pub async fn get_flow(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let flow = state
        .repos
        .flows
        .get_flow(principal.org_id, id)
        .await?
        .ok_or_else(|| CoreError::NotFound("flow".to_string()))?;
    Ok(Json(flow_json(&flow)))
}

/// DELETE /flows/:id — soft delete
pub async fn delete_flow(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.repos.flows.soft_delete(principal.org_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVersionRequest {
    pub graph: Value,
    #[serde(default)]
    pub variables: Option<Value>,
}

/// POST /flows/:id/versions — validate the graph and snapshot it
pub async fn create_version(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(body): Json<CreateVersionRequest>,
) -> Result<Response, ApiError> {
    state
        .repos
        .flows
        .get_flow(principal.org_id, id)
        .await?
        .ok_or_else(|| CoreError::NotFound("flow".to_string()))?;

    // Structural validation happens at insert time; cycles and dangling
    // edges never reach the store
    let graph = Graph::from_value(&body.graph)?;
    graph.validate()?;

    let variables = body.variables.unwrap_or_else(|| json!({}));
    let version = state
        .repos
        .flows
        .create_version(id, &body.graph, &variables)
        .await?;

    Ok((StatusCode::CREATED, Json(version_json(&version))).into_response())
}

/// GET /flows/:id/versions
pub async fn list_versions(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    state
        .repos
        .flows
        .get_flow(principal.org_id, id)
        .await?
        .ok_or_else(|| CoreError::NotFound("flow".to_string()))?;

    let versions = state.repos.flows.list_versions(id).await?;
    Ok(Json(json!({
        "versions": versions.iter().map(version_json).collect::<Vec<_>>()
    })))
}

/// GET /flows/:id/versions/latest
pub async fn latest_version(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    state
        .repos
        .flows
        .get_flow(principal.org_id, id)
        .await?
        .ok_or_else(|| CoreError::NotFound("flow".to_string()))?;

    let version = state
        .repos
        .flows
        .latest_version(id)
        .await?
        .ok_or_else(|| CoreError::NotFound("flow version".to_string()))?;
    Ok(Json(version_json(&version)))
}

/// GET /flows/:id/versions/:v
pub async fn get_version(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path((id, v)): Path<(Uuid, i32)>,
) -> Result<Json<Value>, ApiError> {
    state
        .repos
        .flows
        .get_flow(principal.org_id, id)
        .await?
        .ok_or_else(|| CoreError::NotFound("flow".to_string()))?;

    let version = state
        .repos
        .flows
        .get_version(id, v)
        .await?
        .ok_or_else(|| CoreError::NotFound("flow version".to_string()))?;
    Ok(Json(version_json(&version)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStatusRequest {
    pub status: FlowStatus,
}

/// PATCH /flows/:id/status — activation deploys: it starts an execution
/// with `trigger_type=deploy`
pub async fn set_status(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(body): Json<SetStatusRequest>,
) -> Result<Response, ApiError> {
    state
        .repos
        .flows
        .set_status(principal.org_id, id, body.status)
        .await?;

    if body.status == FlowStatus::Active {
        let started = state
            .engine
            .start_execution(
                principal.org_id,
                id,
                TriggerType::Deploy,
                json!({ "source": "deploy" }),
            )
            .await?;
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "status": body.status,
                "execution": {
                    "executionId": started.execution_id,
                    "flowName": started.flow_name,
                    "version": started.version,
                    "status": started.status,
                }
            })),
        )
            .into_response());
    }

    Ok(Json(json!({ "status": body.status })).into_response())
}
