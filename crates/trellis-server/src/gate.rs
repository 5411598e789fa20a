//! Principal & Policy Gate.
//!
//! Runs before every authenticated endpoint: resolves the principal from
//! the session cookies, enforces the per-user IP allowlist and hourly rate
//! quota, and appends an audit row for state-changing calls. The allowlist
//! check fails OPEN on unexpected store errors — a deliberate, documented
//! policy to avoid locking every user out during a misconfiguration.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use trellis_core::error::CoreError;
use trellis_core::{ApiRateSample, AuditLog, User};

use crate::api::errors::ApiError;
use crate::auth::session;
use crate::state::SharedState;

/// Quota window
const RATE_WINDOW_SECS: i64 = 3600;

/// The authenticated user row, attached to the request by the gate
#[derive(Clone)]
pub struct CurrentUser(pub Arc<User>);

/// Per-request id, attached before any handler runs
#[derive(Clone)]
pub struct RequestId(pub String);

/// Outer middleware: stamp a request id on the way in and the response on
/// the way out.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// The gate itself; see module docs.
pub async fn policy_gate(State(state): State<SharedState>, mut req: Request, next: Next) -> Response {
    // -- principal resolution --------------------------------------------
    let Some(token) = session::token_from_headers(req.headers()) else {
        return ApiError(CoreError::Unauthenticated("missing session".to_string()))
            .into_response();
    };
    let principal = match state.sessions.verify(&token) {
        Ok(principal) => principal,
        Err(e) => return ApiError(e).into_response(),
    };

    let user = match state.repos.users.find_user_by_id(principal.user_id).await {
        Ok(Some(user)) => Arc::new(user),
        Ok(None) => {
            return ApiError(CoreError::Unauthenticated("unknown session subject".to_string()))
                .into_response()
        }
        Err(e) => return ApiError(e).into_response(),
    };

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let client_ip = client_ip(
        req.headers(),
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|c| c.0),
    );

    // Deactivated users are read-only
    if user.is_deactivated() && method != Method::GET {
        return ApiError(CoreError::Forbidden("account is deactivated".to_string()))
            .into_response();
    }

    // -- IP allowlist ----------------------------------------------------
    if user.allow_ip_whitelist {
        match state.repos.policy.list_allowlist(user.id).await {
            Ok(entries) => {
                let allowed = client_ip
                    .as_deref()
                    .map(|ip| entries.iter().any(|e| e.ip_address == ip))
                    .unwrap_or(false);
                if !allowed {
                    return (
                        StatusCode::FORBIDDEN,
                        Json(json!({
                            "error": "request origin is not on the IP allowlist",
                            "currentIp": client_ip,
                        })),
                    )
                        .into_response();
                }
            }
            // Fail open: a broken allowlist store must not lock everyone out
            Err(e) => warn!(user = %user.id, "allowlist check failed, admitting request: {}", e),
        }
    }

    // -- rate quota ------------------------------------------------------
    let limit = user.rate_limit.max(1) as u32;
    let window_start = Utc::now() - Duration::seconds(RATE_WINDOW_SECS);
    let used = match state
        .repos
        .policy
        .count_samples_since(user.id, window_start)
        .await
    {
        Ok(count) => count,
        Err(e) => return ApiError(e).into_response(),
    };

    if used >= limit as i64 {
        let mut response = ApiError(CoreError::RateLimited {
            limit,
            retry_after_secs: RATE_WINDOW_SECS as u64,
        })
        .into_response();
        set_rate_headers(response.headers_mut(), limit, 0);
        return response;
    }

    let sample = ApiRateSample::new(user.id, path.clone(), client_ip.clone());
    if let Err(e) = state.repos.policy.insert_sample(&sample).await {
        // Accounting failure is not worth a 500; the sweep will reconcile
        warn!(user = %user.id, "failed to record rate sample: {}", e);
    }

    let request_id = req.extensions().get::<RequestId>().cloned();
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    req.extensions_mut().insert(principal.clone());
    req.extensions_mut().insert(CurrentUser(user.clone()));

    let mut response = next.run(req).await;

    let remaining = limit.saturating_sub(used as u32 + 1);
    set_rate_headers(response.headers_mut(), limit, remaining);

    // -- audit trail -----------------------------------------------------
    if state_changing(&method) {
        let mut entry = AuditLog::new(format!("{} {}", method, path));
        entry.user_id = Some(principal.user_id);
        entry.route = Some(path);
        entry.method = Some(method.to_string());
        entry.ip = client_ip;
        entry.user_agent = user_agent;
        entry.status_code = Some(response.status().as_u16() as i32);
        entry.request_id = request_id.map(|r| r.0);

        // Failures are logged, never surfaced to the caller
        if let Err(e) = state.repos.policy.insert_audit(&entry).await {
            error!(user = %principal.user_id, "audit insert failed: {}", e);
        }
    }

    response
}

fn state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn set_rate_headers(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    let reset = Utc::now().timestamp() + RATE_WINDOW_SECS;
    for (name, value) in [
        ("X-RateLimit-Limit", limit.to_string()),
        ("X-RateLimit-Remaining", remaining.to_string()),
        ("X-RateLimit-Reset", reset.to_string()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

/// Derive the client IP: first `X-Forwarded-For` hop, then `X-Real-IP`,
/// then the socket peer. IPv6-mapped IPv4 is normalized to dotted quad.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let from_headers = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        });

    from_headers
        .map(|raw| normalize_ip(&raw))
        .or_else(|| peer.map(|addr| normalize_ip(&addr.ip().to_string())))
}

fn normalize_ip(raw: &str) -> String {
    match raw.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        Ok(v4) => v4.to_string(),
        // Not parseable as an address; pass through as received
        Err(_) => raw.to_string(),
    }
}
