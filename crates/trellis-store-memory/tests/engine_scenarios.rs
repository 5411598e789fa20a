//! End-to-end engine scenarios driven against the in-memory store, with
//! stub HTTP endpoints standing in for external services.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trellis_core::engine::{ExecutionEngine, HttpAction, HttpOnlyDispatcher};
use trellis_core::{
    BusEvent, BusPublisher, ExecutionStatus, Flow, LogLevel, StepStatus, TriggerType,
};
use trellis_store_memory::MemoryStore;

/// Publisher that remembers everything it was asked to fan out
#[derive(Default)]
struct RecordingBus {
    events: Mutex<Vec<(Uuid, BusEvent)>>,
}

#[async_trait]
impl BusPublisher for RecordingBus {
    async fn publish(&self, org_id: Uuid, event: BusEvent) {
        self.events.lock().await.push((org_id, event));
    }
}

struct Harness {
    store: MemoryStore,
    engine: ExecutionEngine,
    bus: Arc<RecordingBus>,
    org_id: Uuid,
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    let bus = Arc::new(RecordingBus::default());
    let dispatcher = Arc::new(HttpOnlyDispatcher::new(HttpAction::unguarded().unwrap()));
    let engine = ExecutionEngine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        dispatcher,
        bus.clone(),
    );
    Harness {
        store,
        engine,
        bus,
        org_id: Uuid::new_v4(),
    }
}

/// Create a flow with one version holding the given graph
async fn seed_flow(h: &Harness, graph: serde_json::Value) -> Uuid {
    use trellis_core::domain::repository::FlowRepository;
    let flow = Flow::new(h.org_id, format!("flow-{}", Uuid::new_v4()), Uuid::new_v4());
    h.store.create_flow(&flow).await.unwrap();
    h.store
        .create_version(flow.id, &graph, &json!({}))
        .await
        .unwrap();
    flow.id
}

/// Poll until the driver task for `execution_id` has finished
async fn wait_for_settled(h: &Harness, execution_id: Uuid) -> trellis_core::FlowExecution {
    use trellis_core::domain::repository::ExecutionRepository;
    for _ in 0..200 {
        if h.engine.in_flight_count() == 0 {
            if let Some(exec) = h.store.get_execution(execution_id).await.unwrap() {
                if exec.status.is_terminal() {
                    return exec;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("execution {} did not settle", execution_id);
}

#[tokio::test]
async fn test_happy_path_deploy() {
    use trellis_core::domain::repository::{ExecutionRepository, NotificationRepository};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/200"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"paid": true})))
        .mount(&server)
        .await;

    let h = harness();
    let flow_id = seed_flow(
        &h,
        json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "pay", "type": "action", "kind": "http",
                 "config": {"url": format!("{}/200", server.uri())}},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"from": "start", "to": "pay"},
                {"from": "pay", "to": "end"}
            ]
        }),
    )
    .await;

    let started = h
        .engine
        .start_execution(h.org_id, flow_id, TriggerType::Deploy, json!({"source": "deploy"}))
        .await
        .unwrap();
    assert_eq!(started.status, ExecutionStatus::Running);
    assert_eq!(started.version, 1);

    let exec = wait_for_settled(&h, started.execution_id).await;
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.trigger_type, TriggerType::Deploy);
    assert!(exec.completed_at.is_some());

    // Three steps, all completed
    let steps = h.store.get_steps(exec.id).await.unwrap();
    assert_eq!(steps.len(), 3);
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));

    // The http step carries the parsed response as output
    let pay = steps.iter().find(|s| s.node_id == "pay").unwrap();
    let output = pay.output_data.as_ref().unwrap();
    assert_eq!(output["status"], 200);
    assert_eq!(output["body"]["paid"], true);

    // At least three info logs (one per node) plus the completion line
    let logs = h.store.get_logs(exec.id, 100).await.unwrap();
    let infos = logs.iter().filter(|l| l.level == LogLevel::Info).count();
    assert!(infos >= 3, "expected at least 3 info logs, got {}", infos);

    // Completion surfaced as a notification and a bus event
    let notifications = h.store.list_notifications(h.org_id, 10).await.unwrap();
    assert_eq!(notifications.len(), 1);
    let events = h.bus.events.lock().await;
    assert!(events.contains(&(h.org_id, BusEvent::NotificationsUpdate)));
}

#[tokio::test]
async fn test_cycle_rejected_before_any_step() {
    use trellis_core::domain::repository::ExecutionRepository;

    let h = harness();
    let flow_id = seed_flow(
        &h,
        json!({
            "nodes": [
                {"id": "a", "type": "start"},
                {"id": "b", "type": "transform"},
                {"id": "c", "type": "end"}
            ],
            "edges": [
                {"from": "a", "to": "b"},
                {"from": "b", "to": "a"},
                {"from": "b", "to": "c"}
            ]
        }),
    )
    .await;

    let started = h
        .engine
        .start_execution(h.org_id, flow_id, TriggerType::Manual, json!({}))
        .await
        .unwrap();

    let exec = wait_for_settled(&h, started.execution_id).await;
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.error_message.as_ref().unwrap().contains("cycle"));

    // The engine halts before the first node: no step rows at all
    let steps = h.store.get_steps(exec.id).await.unwrap();
    assert!(steps.is_empty());
}

#[tokio::test]
async fn test_node_failure_is_fail_fast() {
    use trellis_core::domain::repository::ExecutionRepository;

    let h = harness();
    // Transport error: nothing listens on .invalid
    let flow_id = seed_flow(
        &h,
        json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "broken", "type": "action", "kind": "http",
                 "config": {"url": "http://unreachable.invalid/x"}},
                {"id": "after", "type": "end"}
            ],
            "edges": [
                {"from": "start", "to": "broken"},
                {"from": "broken", "to": "after"}
            ]
        }),
    )
    .await;

    let started = h
        .engine
        .start_execution(h.org_id, flow_id, TriggerType::Manual, json!({}))
        .await
        .unwrap();

    let exec = wait_for_settled(&h, started.execution_id).await;
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.error_message.as_ref().unwrap().contains("broken"));

    let steps = h.store.get_steps(exec.id).await.unwrap();
    // start completed, broken failed, downstream never started
    assert_eq!(steps.len(), 2);
    assert_eq!(
        steps.iter().find(|s| s.node_id == "broken").unwrap().status,
        StepStatus::Failed
    );
    assert!(steps.iter().all(|s| s.node_id != "after"));
}

#[tokio::test]
async fn test_http_error_status_is_data_downstream_continues() {
    use trellis_core::domain::repository::ExecutionRepository;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fail"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream broke"))
        .mount(&server)
        .await;

    let h = harness();
    let flow_id = seed_flow(
        &h,
        json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "call", "type": "action", "kind": "http",
                 "config": {"url": format!("{}/fail", server.uri())}},
                {"id": "check", "type": "condition", "config": {"condition": "call.status"}},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"from": "start", "to": "call"},
                {"from": "call", "to": "check"},
                {"from": "check", "to": "end"}
            ]
        }),
    )
    .await;

    let started = h
        .engine
        .start_execution(h.org_id, flow_id, TriggerType::Manual, json!({}))
        .await
        .unwrap();

    let exec = wait_for_settled(&h, started.execution_id).await;
    // Protocol error is data: the whole plan still completes
    assert_eq!(exec.status, ExecutionStatus::Completed);

    let steps = h.store.get_steps(exec.id).await.unwrap();
    assert_eq!(steps.len(), 4);
    let call = steps.iter().find(|s| s.node_id == "call").unwrap();
    assert_eq!(call.status, StepStatus::Completed);
    let output = call.output_data.as_ref().unwrap();
    assert_eq!(output["status"], 500);
    assert_eq!(output["error"], "upstream broke");

    // The condition saw a non-empty input map and passed
    let check = steps.iter().find(|s| s.node_id == "check").unwrap();
    assert_eq!(check.output_data.as_ref().unwrap()["passed"], true);
}

#[tokio::test]
async fn test_cooperative_cancellation() {
    use trellis_core::domain::repository::ExecutionRepository;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"ok": true}))
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&server)
        .await;

    let h = harness();
    let flow_id = seed_flow(
        &h,
        json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "slow", "type": "action", "kind": "http",
                 "config": {"url": format!("{}/slow", server.uri())}},
                {"id": "never", "type": "end"}
            ],
            "edges": [
                {"from": "start", "to": "slow"},
                {"from": "slow", "to": "never"}
            ]
        }),
    )
    .await;

    let started = h
        .engine
        .start_execution(h.org_id, flow_id, TriggerType::Manual, json!({}))
        .await
        .unwrap();

    // Let the slow node get in flight, then request cancellation
    tokio::time::sleep(Duration::from_millis(300)).await;
    let cancelled = h.engine.cancel_execution(started.execution_id).await.unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    // The in-flight node runs to completion; nothing after it starts
    let exec = wait_for_settled(&h, started.execution_id).await;
    assert_eq!(exec.status, ExecutionStatus::Cancelled);

    let steps = h.store.get_steps(exec.id).await.unwrap();
    assert!(steps.iter().all(|s| s.node_id != "never"));

    // Cancel is a no-op on terminal executions
    let again = h.engine.cancel_execution(started.execution_id).await.unwrap();
    assert_eq!(again.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn test_unrecognized_action_fails_its_step() {
    use trellis_core::domain::repository::ExecutionRepository;

    let h = harness();
    let flow_id = seed_flow(
        &h,
        json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "mystery", "type": "quantum"},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"from": "start", "to": "mystery"},
                {"from": "mystery", "to": "end"}
            ]
        }),
    )
    .await;

    let started = h
        .engine
        .start_execution(h.org_id, flow_id, TriggerType::Manual, json!({}))
        .await
        .unwrap();

    let exec = wait_for_settled(&h, started.execution_id).await;
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.error_message.as_ref().unwrap().contains("unrecognized"));

    // The unknown type was logged as a warning before failing
    let logs = h.store.get_logs(exec.id, 100).await.unwrap();
    assert!(logs
        .iter()
        .any(|l| l.level == LogLevel::Warn && l.message.contains("quantum")));
}

#[tokio::test]
async fn test_start_execution_not_found_cases() {
    use trellis_core::domain::repository::FlowRepository;

    let h = harness();

    // Unknown flow
    let err = h
        .engine
        .start_execution(h.org_id, Uuid::new_v4(), TriggerType::Manual, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, trellis_core::CoreError::NotFound(_)));

    // Flow without versions
    let flow = Flow::new(h.org_id, "empty", Uuid::new_v4());
    h.store.create_flow(&flow).await.unwrap();
    let err = h
        .engine
        .start_execution(h.org_id, flow.id, TriggerType::Manual, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, trellis_core::CoreError::NotFound(_)));

    // Soft-deleted flow
    let deleted = Flow::new(h.org_id, "gone", Uuid::new_v4());
    h.store.create_flow(&deleted).await.unwrap();
    h.store
        .create_version(deleted.id, &json!({"nodes": [], "edges": []}), &json!({}))
        .await
        .unwrap();
    h.store.soft_delete(h.org_id, deleted.id).await.unwrap();
    let err = h
        .engine
        .start_execution(h.org_id, deleted.id, TriggerType::Manual, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, trellis_core::CoreError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_execution_requires_owning_org() {
    use trellis_core::domain::repository::ExecutionRepository;

    let h = harness();
    let flow_id = seed_flow(
        &h,
        json!({"nodes": [{"id": "s", "type": "start"}], "edges": []}),
    )
    .await;

    let started = h
        .engine
        .start_execution(h.org_id, flow_id, TriggerType::Manual, json!({}))
        .await
        .unwrap();
    wait_for_settled(&h, started.execution_id).await;

    // Wrong org is refused
    let err = h
        .engine
        .delete_execution(started.execution_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, trellis_core::CoreError::Forbidden(_)));

    // Owning org deletes logs, steps and the row
    h.engine
        .delete_execution(started.execution_id, h.org_id)
        .await
        .unwrap();
    assert!(h
        .store
        .get_execution(started.execution_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_shutdown_marks_survivors_failed() {
    use trellis_core::domain::repository::ExecutionRepository;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hang"))
        .respond_with(
            ResponseTemplate::new(200).set_delay(Duration::from_secs(20)),
        )
        .mount(&server)
        .await;

    let h = harness();
    let flow_id = seed_flow(
        &h,
        json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "hang", "type": "action", "kind": "http",
                 "config": {"url": format!("{}/hang", server.uri())}}
            ],
            "edges": [{"from": "start", "to": "hang"}]
        }),
    )
    .await;

    let started = h
        .engine
        .start_execution(h.org_id, flow_id, TriggerType::Manual, json!({}))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Grace window far shorter than the hung call
    h.engine.shutdown(Duration::from_millis(300)).await;

    let exec = h
        .store
        .get_execution(started.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error_message.as_deref(), Some("shutdown"));
}
