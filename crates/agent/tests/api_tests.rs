//! Integration tests for the agent API endpoints

#[allow(dead_code)]
#[path = "../src/api.rs"]
mod api;

use api::{AppState, DomainView};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use mba_lib::{
    health::{components, HealthRegistry},
    Admitter, Controller, CounterSample, CounterSource, DomainManager, MbConstants,
    StructuredLogger, TaskManager, Topology,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

struct IdleSource;

#[async_trait]
impl CounterSource for IdleSource {
    async fn sample(&self) -> anyhow::Result<CounterSample> {
        Ok(CounterSample {
            timestamp: chrono::Utc::now(),
            counters: HashMap::new(),
        })
    }
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    controller: Controller,
}

async fn setup_test_app() -> TestApp {
    let topology = Arc::new(
        Topology::builder()
            .add_ccd(0, 0, 0..8)
            .add_ccd(1, 1, 8..16)
            .assign_node(0, 0)
            .assign_node(1, 0)
            .build()
            .unwrap(),
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::MONITOR).await;
    health_registry.register(components::WRITER).await;

    let domains = Arc::new(DomainManager::new(topology.clone(), MbConstants::default()));
    let controller = Controller::builder()
        .source(Arc::new(IdleSource))
        .domains(domains.clone())
        .health(health_registry.clone())
        .build()
        .unwrap();
    let handle = controller.handle();
    let admitter = Arc::new(Admitter::new(
        domains.clone(),
        Arc::new(TaskManager::new(topology)),
        handle.clone(),
        StructuredLogger::new("test-node"),
    ));

    let state = Arc::new(AppState::new(health_registry, domains, handle, admitter));
    let router = api::create_router(state.clone());

    TestApp {
        router,
        state,
        controller,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn json(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let app = setup_test_app().await;

    let (status, body) = send(&app.router, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .set_degraded(components::WRITER, "schemata write failed")
        .await;

    let (status, body) = send(&app.router, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .set_unhealthy(components::MONITOR, "resctrl missing")
        .await;

    let (status, _) = send(&app.router, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_waits_for_first_plan() {
    let app = setup_test_app().await;
    app.state.health_registry.set_ready(true).await;

    let (status, body) = send(&app.router, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json(&body)["ready"], false);

    app.controller.run_cycle().await.unwrap();

    let (status, body) = send(&app.router, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup_test_app().await;
    app.controller.run_cycle().await.unwrap();

    let (status, body) = send(&app.router, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("mba_agent_planning_cycles_total"));
}

#[tokio::test]
async fn test_plan_404_until_first_cycle() {
    let app = setup_test_app().await;

    let (status, body) = send(&app.router, "GET", "/api/v1/plan", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json(&body)["error"].is_string());

    app.controller.run_cycle().await.unwrap();

    let (status, body) = send(&app.router, "GET", "/api/v1/plan", None).await;
    assert_eq!(status, StatusCode::OK);
    let report = json(&body);
    assert_eq!(report["written"], true);
    assert!(report["plan"]["plan"].is_object());
    assert_eq!(report["budgets"][0]["plannable_mb"], 120_000);
}

#[tokio::test]
async fn test_adjust_is_coalesced() {
    let app = setup_test_app().await;

    let (status, body) = send(&app.router, "POST", "/api/v1/adjust", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json(&body)["queued"], true);

    let (status, body) = send(&app.router, "POST", "/api/v1/adjust", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json(&body)["queued"], false);
}

#[tokio::test]
async fn test_admit_dedicated_preempts_and_shrinks_budget() {
    let app = setup_test_app().await;

    let request = serde_json::json!({
        "pod_uid": "a47c5c03",
        "pod_namespace": "default",
        "pod_name": "socket-pod",
        "qos_level": "dedicated_cores",
        "hint": [1]
    });
    let (status, body) = send(&app.router, "POST", "/api/v1/admit", Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    let outcome = json(&body);
    assert_eq!(outcome["action"], "preempted");
    assert_eq!(outcome["newly_preempted"], serde_json::json!([1]));

    let (status, body) = send(&app.router, "GET", "/api/v1/domains", None).await;
    assert_eq!(status, StatusCode::OK);
    let domains: Vec<DomainView> = serde_json::from_slice(&body).unwrap();
    assert_eq!(domains.len(), 1);
    assert_eq!(domains[0].budget.plannable_mb, 114_000);
    assert!(domains[0].budget.preempted_nodes.contains(&1));
}

#[tokio::test]
async fn test_admit_empty_hint_rejected() {
    let app = setup_test_app().await;

    let request = serde_json::json!({
        "pod_uid": "a47c5c03",
        "qos_level": "dedicated_cores",
        "hint": []
    });
    let (status, body) = send(&app.router, "POST", "/api/v1/admit", Some(request)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "hint is empty");
}

#[tokio::test]
async fn test_task_registration_and_removal() {
    let app = setup_test_app().await;

    let binding = serde_json::json!({ "qos_group": "shared_30", "cpus": [0, 1] });
    let (status, _) = send(&app.router, "PUT", "/api/v1/tasks/pod1", Some(binding)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Node 0 is in use now, so only node 1 gets preempted
    let request = serde_json::json!({
        "pod_uid": "pod2",
        "qos_level": "dedicated_cores",
        "hint": [0, 1]
    });
    let (_, body) = send(&app.router, "POST", "/api/v1/admit", Some(request)).await;
    assert_eq!(json(&body)["newly_preempted"], serde_json::json!([1]));

    let (status, body) = send(&app.router, "DELETE", "/api/v1/pods/pod1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["qos_group"], "shared_30");

    let (status, _) = send(&app.router, "DELETE", "/api/v1/pods/pod1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
