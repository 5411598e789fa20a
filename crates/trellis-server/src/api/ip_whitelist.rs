//! IP allowlist management.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use trellis_core::error::CoreError;
use trellis_core::types::Principal;
use trellis_core::IpAllowlistEntry;

use crate::api::errors::ApiError;
use crate::gate::client_ip;
use crate::state::SharedState;

fn entry_json(entry: &IpAllowlistEntry) -> Value {
    json!({
        "id": entry.id,
        "ipAddress": entry.ip_address,
        "description": entry.description,
        "createdAt": entry.created_at,
    })
}

/// GET /ip-whitelist
pub async fn list(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, ApiError> {
    let entries = state.repos.policy.list_allowlist(principal.user_id).await?;
    Ok(Json(json!({
        "entries": entries.iter().map(entry_json).collect::<Vec<_>>()
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntryRequest {
    pub ip_address: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// POST /ip-whitelist
pub async fn create(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CreateEntryRequest>,
) -> Result<Response, ApiError> {
    let raw = body.ip_address.trim();
    if raw.parse::<IpAddr>().is_err() {
        return Err(CoreError::Validation(format!("not a valid IP address: {}", raw)).into());
    }

    let entry = IpAllowlistEntry::new(principal.user_id, raw, body.description);
    state.repos.policy.insert_allowlist(&entry).await?;
    Ok((StatusCode::CREATED, Json(entry_json(&entry))).into_response())
}

/// DELETE /ip-whitelist/:id
pub async fn delete(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .repos
        .policy
        .delete_allowlist(principal.user_id, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /ip-whitelist/current-ip — what the gate sees for this caller
pub async fn current_ip(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Json<Value> {
    let ip = client_ip(&headers, connect_info.map(|c| c.0));
    Json(json!({ "currentIp": ip }))
}
