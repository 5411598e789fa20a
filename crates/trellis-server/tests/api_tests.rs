//! API-level tests: the full router over the in-memory store, driven with
//! tower's `oneshot`. Covers the policy gate (rate quota, IP allowlist),
//! the auth surface and the verification worker's observable protocol.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{header as req_header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trellis_core::domain::repository::{
    IntegrationRepository, NotificationRepository, PolicyRepository, UserRepository,
};
use trellis_core::engine::{ExecutionEngine, HttpAction};
use trellis_core::vault::SecretVault;
use trellis_core::{IntegrationStatus, NotificationKind, User};
use trellis_providers::{NullTxRecorder, ProviderRegistry};
use trellis_store_memory::MemoryStore;

use trellis_server::api::build_router;
use trellis_server::auth::password::hash_password;
use trellis_server::auth::session::{session_ttl_default, SessionKeys, SESSION_COOKIE};
use trellis_server::bus::EventBus;
use trellis_server::config::ServerConfig;
use trellis_server::dispatch::PlatformDispatcher;
use trellis_server::mailer::{LogMailer, Mailer};
use trellis_server::reports::ReportSink;
use trellis_server::state::{AppState, Repositories, SharedState};
use trellis_server::worker::verification::VerificationWorker;
use trellis_server::worker::Supervisor;

struct Harness {
    router: Router,
    state: SharedState,
    store: MemoryStore,
}

fn vault_key() -> String {
    BASE64.encode([7u8; 32])
}

/// Test state: in-memory store, unguarded HTTP (stub servers live on
/// loopback), 50 ms verification deferral.
fn harness() -> Harness {
    let store = MemoryStore::new();
    let repos = Repositories::from_store(store.clone());

    let config = ServerConfig {
        secrets_enc_key: Some(vault_key()),
        ..Default::default()
    };

    let bus = Arc::new(EventBus::new(config.bus_queue_depth));
    let supervisor = Arc::new(Supervisor::new());
    let mailer: Arc<dyn Mailer> = Arc::new(LogMailer);
    let registry = Arc::new(ProviderRegistry::new(Arc::new(NullTxRecorder)));
    let dispatcher = Arc::new(PlatformDispatcher::new(
        HttpAction::unguarded().unwrap(),
        registry,
        mailer.clone(),
    ));
    let engine = ExecutionEngine::new(
        repos.flows.clone(),
        repos.executions.clone(),
        repos.notifications.clone(),
        dispatcher,
        bus.clone(),
    );
    let verifier = Arc::new(
        VerificationWorker::with_options(
            repos.integrations.clone(),
            repos.notifications.clone(),
            bus.clone(),
            supervisor.clone(),
            Duration::from_millis(50),
            false,
        )
        .unwrap(),
    );

    let state = Arc::new(AppState {
        sessions: SessionKeys::new(&config.jwt_secret),
        vault: Some(Arc::new(
            SecretVault::from_base64_key(&vault_key()).unwrap(),
        )),
        reports: ReportSink::new(std::env::temp_dir().join(format!("trellis-{}", Uuid::new_v4()))),
        config,
        repos,
        engine,
        bus,
        mailer,
        oidc: None,
        verifier,
        supervisor,
    });

    Harness {
        router: build_router(state.clone()),
        state,
        store,
    }
}

impl Harness {
    async fn seed_user(&self, rate_limit: i32) -> (User, String) {
        let org = trellis_core::Organization::new(format!("org-{}", Uuid::new_v4()));
        self.store.create_org(&org).await.unwrap();

        let mut user = User::new(
            org.id,
            format!("user-{}@example.test", Uuid::new_v4()),
            Some(hash_password("password123").unwrap()),
        );
        user.rate_limit = rate_limit;
        self.store.create_user(&user).await.unwrap();

        let token = self
            .state
            .sessions
            .issue(&user, session_ttl_default())
            .unwrap();
        (user, format!("{}={}", SESSION_COOKIE, token))
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, headers, body)
    }
}

fn get(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, cookie: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::COOKIE, cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ---- gate ------------------------------------------------------------------

#[tokio::test]
async fn test_unauthenticated_request_rejected() {
    let h = harness();
    let request = Request::builder()
        .method("GET")
        .uri("/flows")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = h.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errorDetails"]["errorCode"], "ERR_UNAUTHENTICATED");
}

#[tokio::test]
async fn test_rate_limit_exhaustion() {
    let h = harness();
    let (user, cookie) = h.seed_user(5).await;

    // First five requests are admitted with quota headers
    for i in 0..5 {
        let (status, headers, _) = h.send(get("/flows", &cookie)).await;
        assert_eq!(status, StatusCode::OK, "request {} should pass", i);
        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "5");
    }

    // The sixth answers 429 with retry metadata and no extra sample
    let (status, headers, _) = h.send(get("/flows", &cookie)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers.get(header::RETRY_AFTER).unwrap(), "3600");
    assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "0");

    let samples = h
        .store
        .count_samples_since(user.id, chrono::Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(samples, 5);
}

#[tokio::test]
async fn test_ip_allowlist_denial_and_admission() {
    let h = harness();
    let (user, cookie) = h.seed_user(1000).await;

    let mut restricted = user.clone();
    restricted.allow_ip_whitelist = true;
    h.store.update_user(&restricted).await.unwrap();
    h.store
        .insert_allowlist(&trellis_core::IpAllowlistEntry::new(user.id, "10.0.0.5", None))
        .await
        .unwrap();

    // Off-list source is refused and told what the gate saw
    let mut request = get("/flows", &cookie);
    request
        .headers_mut()
        .insert("x-forwarded-for", "198.51.100.7".parse().unwrap());
    let (status, _, body) = h.send(request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["currentIp"], "198.51.100.7");

    // Listed source passes
    let mut request = get("/flows", &cookie);
    request
        .headers_mut()
        .insert("x-forwarded-for", "10.0.0.5".parse().unwrap());
    let (status, _, _) = h.send(request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_deactivated_user_is_read_only() {
    let h = harness();
    let (user, cookie) = h.seed_user(1000).await;

    let mut deactivated = user.clone();
    deactivated.deactivated_at = Some(chrono::Utc::now());
    h.store.update_user(&deactivated).await.unwrap();

    let (status, _, _) = h.send(get("/flows", &cookie)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = h
        .send(post_json("/flows", &cookie, json!({"name": "Pay"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_state_changing_calls_are_audited() {
    let h = harness();
    let (user, cookie) = h.seed_user(1000).await;

    let (status, _, _) = h
        .send(post_json("/flows", &cookie, json!({"name": "Audited"})))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let entries = h.store.list_audit_for_org(user.org_id, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "POST /flows");
    assert_eq!(entries[0].status_code, Some(201));
    assert!(entries[0].request_id.is_some());
}

// ---- auth ------------------------------------------------------------------

#[tokio::test]
async fn test_signup_verify_login_round_trip() {
    let h = harness();

    let (status, _, _) = h
        .send(post_json(
            "/auth/signup",
            "",
            json!({"email": "new@example.test", "password": "password123"}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Pull the code straight from the pending row (the mail went to the
    // log transport)
    let pending = h.store.find_pending("new@example.test").await.unwrap().unwrap();

    let (status, headers, body) = h
        .send(post_json(
            "/auth/verify",
            "",
            json!({
                "email": "new@example.test",
                "code": pending.verification_code,
                "organization": "Acme",
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["email"], "new@example.test");
    assert!(headers
        .get_all(header::SET_COOKIE)
        .iter()
        .any(|c| c.to_str().unwrap().starts_with(SESSION_COOKIE)));

    // Pending row is gone; the user can log in
    assert!(h.store.find_pending("new@example.test").await.unwrap().is_none());

    let (status, _, _) = h
        .send(post_json(
            "/auth/login",
            "",
            json!({"email": "New@Example.TEST", "password": "password123"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_login_failures_indistinguishable() {
    let h = harness();
    let (user, _) = h.seed_user(1000).await;

    let (status_a, _, body_a) = h
        .send(post_json(
            "/auth/login",
            "",
            json!({"email": user.email, "password": "wrong-password"}),
        ))
        .await;
    let (status_b, _, body_b) = h
        .send(post_json(
            "/auth/login",
            "",
            json!({"email": "ghost@example.test", "password": "wrong-password"}),
        ))
        .await;

    assert_eq!(status_a, StatusCode::UNAUTHORIZED);
    assert_eq!(status_b, StatusCode::UNAUTHORIZED);
    assert_eq!(body_a["error"], body_b["error"]);
}

#[tokio::test]
async fn test_forgot_password_always_200() {
    let h = harness();
    let (user, _) = h.seed_user(1000).await;

    for email in [user.email.as_str(), "nobody@example.test"] {
        let (status, _, body) = h
            .send(post_json("/auth/forgot-password", "", json!({"email": email})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }
}

#[tokio::test]
async fn test_logout_clears_both_cookie_scopes() {
    let h = harness();
    let (_, cookie) = h.seed_user(1000).await;

    let (status, headers, _) = h.send(post_json("/auth/logout", &cookie, json!({}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let cleared: Vec<&str> = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap())
        .collect();
    assert_eq!(cleared.len(), 4);
    assert!(cleared.iter().all(|c| c.contains("Max-Age=0")));
}

// ---- flows + versions ------------------------------------------------------

#[tokio::test]
async fn test_cyclic_version_rejected_at_insert() {
    let h = harness();
    let (_, cookie) = h.seed_user(1000).await;

    let (status, _, flow) = h
        .send(post_json("/flows", &cookie, json!({"name": "Loop"})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let flow_id = flow["id"].as_str().unwrap().to_string();

    let (status, _, body) = h
        .send(post_json(
            &format!("/flows/{}/versions", flow_id),
            &cookie,
            json!({
                "graph": {
                    "nodes": [
                        {"id": "a", "type": "start"},
                        {"id": "b", "type": "end"}
                    ],
                    "edges": [
                        {"from": "a", "to": "b"},
                        {"from": "b", "to": "a"}
                    ]
                }
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("cycle"));
}

#[tokio::test]
async fn test_soft_deleted_flow_vanishes_from_lists() {
    let h = harness();
    let (_, cookie) = h.seed_user(1000).await;

    let (_, _, flow) = h
        .send(post_json("/flows", &cookie, json!({"name": "Ephemeral"})))
        .await;
    let flow_id = flow["id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/flows/{}", flow_id))
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = h.send(request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, _, listing) = h.send(get("/flows", &cookie)).await;
    assert!(listing["flows"].as_array().unwrap().is_empty());

    let (status, _, _) = h.send(get(&format!("/flows/{}", flow_id), &cookie)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_activation_deploys() {
    let h = harness();
    let (user, cookie) = h.seed_user(1000).await;

    let (_, _, flow) = h
        .send(post_json("/flows", &cookie, json!({"name": "Deployable"})))
        .await;
    let flow_id = flow["id"].as_str().unwrap().to_string();

    let (status, _, _) = h
        .send(post_json(
            &format!("/flows/{}/versions", flow_id),
            &cookie,
            json!({
                "graph": {
                    "nodes": [
                        {"id": "start", "type": "start"},
                        {"id": "end", "type": "end"}
                    ],
                    "edges": [{"from": "start", "to": "end"}]
                }
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/flows/{}/status", flow_id))
        .header(header::COOKIE, &cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"status": "active"}).to_string()))
        .unwrap();
    let (status, _, body) = h.send(request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["execution"]["status"], "running");
    assert_eq!(body["execution"]["version"], 1);

    // The deploy-triggered execution settles as completed
    let execution_id: Uuid = body["execution"]["executionId"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    for _ in 0..100 {
        if h.state.engine.in_flight_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let execution = h.state.engine.get_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, trellis_core::ExecutionStatus::Completed);
    assert_eq!(execution.trigger_type, trellis_core::TriggerType::Deploy);
    let _ = user;
}

// ---- integrations / verification worker ------------------------------------

#[tokio::test]
async fn test_verification_transitions_to_active() {
    let h = harness();
    let (_, cookie) = h.seed_user(1000).await;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/probe"))
        .and(req_header("Authorization", "Bearer sk_test_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let org_id = {
        let (status, _, body) = h
            .send(post_json(
                "/integrations",
                &cookie,
                json!({
                    "name": "Stripe Test",
                    "apiKey": "sk_test_abc",
                    "testUrl": format!("{}/probe", server.uri()),
                }),
            ))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        // Immediately pending
        assert_eq!(body["status"], "pending");
        body["orgId"].as_str().unwrap().parse::<Uuid>().unwrap()
    };

    // Subscribe before the probe lands so the final broadcast is observed
    let mut room = h.state.bus.subscribe(org_id);

    // After the deferral the probe flips the integration to active
    tokio::time::sleep(Duration::from_millis(600)).await;
    let integrations = h.store.list_integrations(org_id).await.unwrap();
    assert_eq!(integrations.len(), 1);
    assert_eq!(integrations[0].status, IntegrationStatus::Active);
    assert!(integrations[0].last_checked.is_some());

    let notifications = h.store.list_notifications(org_id, 10).await.unwrap();
    assert!(notifications
        .iter()
        .any(|n| n.kind == NotificationKind::Info && n.message.contains("Integration active")));

    // The room saw integrations:update
    let mut saw_update = false;
    while let Ok(event) = room.try_recv() {
        if event == trellis_core::BusEvent::IntegrationsUpdate {
            saw_update = true;
        }
    }
    assert!(saw_update);
}

#[tokio::test]
async fn test_verification_unauthorized_key_marks_error() {
    let h = harness();
    let (_, cookie) = h.seed_user(1000).await;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/probe"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (status, _, body) = h
        .send(post_json(
            "/integrations",
            &cookie,
            json!({
                "name": "Broken Gateway",
                "apiKey": "bad-key",
                "testUrl": format!("{}/probe", server.uri()),
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let org_id: Uuid = body["orgId"].as_str().unwrap().parse().unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    let integrations = h.store.list_integrations(org_id).await.unwrap();
    assert_eq!(integrations[0].status, IntegrationStatus::Error);

    let notifications = h.store.list_notifications(org_id, 10).await.unwrap();
    assert!(notifications
        .iter()
        .any(|n| n.kind == NotificationKind::Error && n.message.contains("401")));
}

#[tokio::test]
async fn test_integration_without_probe_url_errors() {
    let h = harness();
    let (_, cookie) = h.seed_user(1000).await;

    let (status, _, body) = h
        .send(post_json(
            "/integrations",
            &cookie,
            json!({"name": "Mystery Service", "apiKey": "key-1"}),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let org_id: Uuid = body["orgId"].as_str().unwrap().parse().unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    let integrations = h.store.list_integrations(org_id).await.unwrap();
    assert_eq!(integrations[0].status, IntegrationStatus::Error);

    let notifications = h.store.list_notifications(org_id, 10).await.unwrap();
    assert!(notifications
        .iter()
        .any(|n| n.message.contains("no valid Test URL")));
}

#[tokio::test]
async fn test_integration_secret_is_stored_encrypted() {
    let h = harness();
    let (user, cookie) = h.seed_user(1000).await;

    let (status, _, _) = h
        .send(post_json(
            "/integrations",
            &cookie,
            json!({"name": "Stripe Live", "apiKey": "sk_live_secret"}),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let connections = h.store.list_connections(user.id).await.unwrap();
    assert_eq!(connections.len(), 1);
    assert!(connections[0].config_enc.starts_with("enc:v1:"));
    assert!(!connections[0].config_enc.contains("sk_live_secret"));
}

// ---- misc surface ----------------------------------------------------------

#[tokio::test]
async fn test_current_ip_endpoint() {
    let h = harness();
    let (_, cookie) = h.seed_user(1000).await;

    let mut request = get("/ip-whitelist/current-ip", &cookie);
    request
        .headers_mut()
        .insert("x-forwarded-for", "203.0.113.44".parse().unwrap());
    let (status, _, body) = h.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currentIp"], "203.0.113.44");
}

#[tokio::test]
async fn test_dashboard_summary_rolls_up_tx_events() {
    let h = harness();
    let (user, cookie) = h.seed_user(1000).await;

    h.store
        .insert_tx_event(&trellis_core::TxEvent::new(user.org_id, true, Some(120)))
        .await
        .unwrap();
    h.store
        .insert_tx_event(&trellis_core::TxEvent::new(user.org_id, false, Some(80)))
        .await
        .unwrap();

    let (status, _, body) = h.send(get("/dashboard/summary", &cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transactions"]["total"], 2);
    assert_eq!(body["transactions"]["succeeded"], 1);
    assert_eq!(body["transactions"]["avgLatencyMs"], 100.0);
}

#[tokio::test]
async fn test_health_is_public() {
    let h = harness();
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = h.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
