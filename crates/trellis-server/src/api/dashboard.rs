//! Dashboard rollups, the audit-log read and compliance reports.

use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use trellis_core::types::Principal;

use crate::api::errors::ApiError;
use crate::state::SharedState;

/// GET /dashboard/summary — TxEvent rollup for the org
pub async fn summary(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, ApiError> {
    let tx = state.repos.notifications.tx_summary(principal.org_id).await?;
    let integrations = state
        .repos
        .integrations
        .list_integrations(principal.org_id)
        .await?;
    let flows = state.repos.flows.list_flows(principal.org_id).await?;

    Ok(Json(json!({
        "transactions": {
            "total": tx.total,
            "succeeded": tx.succeeded,
            "failed": tx.failed,
            "successRate": tx.success_rate,
            "avgLatencyMs": tx.avg_latency_ms,
        },
        "integrations": {
            "total": integrations.len(),
            "active": integrations
                .iter()
                .filter(|i| i.status == trellis_core::IntegrationStatus::Active)
                .count(),
        },
        "flows": { "total": flows.len() },
    })))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

/// GET /audit-logs?limit= — org-scoped, newest first, capped at 200
pub async fn audit_logs(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, ApiError> {
    let entries = state
        .repos
        .policy
        .list_audit_for_org(principal.org_id, query.limit.unwrap_or(50).clamp(1, 200))
        .await?;

    let entries: Vec<Value> = entries
        .iter()
        .map(|a| {
            json!({
                "id": a.id,
                "userId": a.user_id,
                "action": a.action,
                "route": a.route,
                "method": a.method,
                "ip": a.ip,
                "statusCode": a.status_code,
                "requestId": a.request_id,
                "createdAt": a.created_at,
            })
        })
        .collect();
    Ok(Json(json!({ "auditLogs": entries })))
}

/// POST /compliance/reports — generate and persist a JSON report; the file
/// name comes back to the caller
pub async fn generate_report(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
) -> Result<Response, ApiError> {
    let tx = state.repos.notifications.tx_summary(principal.org_id).await?;
    let integrations = state
        .repos
        .integrations
        .list_integrations(principal.org_id)
        .await?;
    let flows = state.repos.flows.list_flows(principal.org_id).await?;

    let report = json!({
        "orgId": principal.org_id,
        "generatedAt": Utc::now(),
        "transactions": {
            "total": tx.total,
            "succeeded": tx.succeeded,
            "failed": tx.failed,
            "successRate": tx.success_rate,
            "avgLatencyMs": tx.avg_latency_ms,
        },
        "integrations": integrations
            .iter()
            .map(|i| json!({
                "name": i.name,
                "status": i.status,
                "lastChecked": i.last_checked,
            }))
            .collect::<Vec<_>>(),
        "flows": flows
            .iter()
            .map(|f| json!({ "name": f.name, "status": f.status }))
            .collect::<Vec<_>>(),
    });

    let file_name = state.reports.write_json(principal.org_id, &report).await?;
    Ok((StatusCode::CREATED, Json(json!({ "fileName": file_name }))).into_response())
}
