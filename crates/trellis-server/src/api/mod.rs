//! API surface: route table and handlers.
//!
//! Auth endpoints are public; everything else sits behind the Principal &
//! Policy Gate. All bodies are JSON, auth rides on cookies.

pub mod dashboard;
pub mod errors;
pub mod executions;
pub mod flows;
pub mod integrations;
pub mod ip_whitelist;
pub mod notifications;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Extension, State};
use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::response::Response;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use trellis_core::types::Principal;

use crate::auth;
use crate::bus;
use crate::gate;
use crate::state::SharedState;

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /ws — join the caller's `org:<uuid>` room
async fn ws_handler(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    ws: WebSocketUpgrade,
) -> Response {
    let bus = state.bus.clone();
    let org_id = principal.org_id;
    ws.on_upgrade(move |socket| async move {
        bus::run_subscriber(socket, &bus, org_id).await;
    })
}

/// Build the full application router
pub fn build_router(state: SharedState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/verify", post(auth::verify))
        .route("/auth/resend-code", post(auth::resend_code))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/auth/reactivate", post(auth::reactivate))
        .route("/auth/google", get(auth::google_start))
        .route("/auth/google/callback", get(auth::google_callback));

    let gated = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/profile", patch(auth::update_profile))
        // Flows
        .route("/flows", post(flows::create_flow).get(flows::list_flows))
        .route("/flows/:id", get(flows::get_flow).delete(flows::delete_flow))
        .route(
            "/flows/:id/versions",
            post(flows::create_version).get(flows::list_versions),
        )
        .route("/flows/:id/versions/latest", get(flows::latest_version))
        .route("/flows/:id/versions/:v", get(flows::get_version))
        .route("/flows/:id/status", patch(flows::set_status))
        // Executions
        .route("/executions/start", post(executions::start_execution))
        .route("/executions/recent", get(executions::recent))
        .route("/executions/flow/:id", get(executions::list_for_flow))
        .route(
            "/executions/:id",
            get(executions::get_execution).delete(executions::delete),
        )
        .route("/executions/:id/steps", get(executions::get_steps))
        .route("/executions/:id/logs", get(executions::get_logs))
        .route("/executions/:id/cancel", post(executions::cancel))
        // Integrations
        .route(
            "/integrations",
            post(integrations::create).get(integrations::list),
        )
        .route(
            "/integrations/:id",
            patch(integrations::update).delete(integrations::delete),
        )
        .route("/integrations/:id/verify", post(integrations::verify))
        // Notifications
        .route(
            "/notifications",
            get(notifications::list).post(notifications::create),
        )
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/:id/read", post(notifications::mark_read))
        // IP allowlist
        .route(
            "/ip-whitelist",
            get(ip_whitelist::list).post(ip_whitelist::create),
        )
        .route("/ip-whitelist/current-ip", get(ip_whitelist::current_ip))
        .route("/ip-whitelist/:id", delete(ip_whitelist::delete))
        // Dashboards & compliance
        .route("/dashboard/summary", get(dashboard::summary))
        .route("/audit-logs", get(dashboard::audit_logs))
        .route("/compliance/reports", post(dashboard::generate_report))
        // Event bus subscribers
        .route("/ws", get(ws_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            gate::policy_gate,
        ));

    let mut router = public
        .merge(gated)
        .layer(middleware::from_fn(gate::request_id))
        .layer(TraceLayer::new_for_http());

    // Cookies only cross origins the front-end is actually served from
    if let Some(origin) = &state.config.frontend_origin {
        if let Ok(origin) = origin.parse::<HeaderValue>() {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(origin)
                    .allow_credentials(true)
                    .allow_methods([
                        Method::GET,
                        Method::POST,
                        Method::PATCH,
                        Method::DELETE,
                    ])
                    .allow_headers([axum::http::header::CONTENT_TYPE]),
            );
        }
    }

    router.with_state(state)
}
