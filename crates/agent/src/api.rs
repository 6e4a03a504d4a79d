//! HTTP API for health checks, Prometheus metrics, plans and admission

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use mba_lib::{
    health::{components, ComponentStatus, HealthRegistry},
    AdmissionRequest, Admitter, ControllerHandle, DomainBudget, DomainManager, MbError, QosGroup,
    Task,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub domains: Arc<DomainManager>,
    pub controller: ControllerHandle,
    pub admitter: Arc<Admitter>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        domains: Arc<DomainManager>,
        controller: ControllerHandle,
        admitter: Arc<Admitter>,
    ) -> Self {
        Self {
            health_registry,
            domains,
            controller,
            admitter,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.into(),
        }),
    )
        .into_response()
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Report of the most recent planning cycle
async fn get_plan(State(state): State<Arc<AppState>>) -> Response {
    match state.controller.latest_report() {
        Some(report) => Json(report).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no plan produced yet"),
    }
}

/// A sharing domain with its current budget
#[derive(Debug, Serialize, Deserialize)]
pub struct DomainView {
    pub id: u32,
    pub nodes: BTreeSet<u32>,
    pub ccds: BTreeSet<u32>,
    pub budget: DomainBudget,
}

async fn get_domains(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.domains.snapshot();
    let views: Vec<DomainView> = state
        .domains
        .topology()
        .domains()
        .filter_map(|domain| {
            let budget = state.domains.budget(domain.id, &snapshot)?;
            Some(DomainView {
                id: domain.id,
                nodes: domain.nodes.clone(),
                ccds: domain.ccds.clone(),
                budget,
            })
        })
        .collect();

    Json(views)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdjustResponse {
    pub queued: bool,
}

async fn post_adjust(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let queued = state.controller.req_to_adjust_mb();
    info!(queued = queued, "Adjust requested over API");
    (StatusCode::ACCEPTED, Json(AdjustResponse { queued }))
}

async fn post_admit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AdmissionRequest>,
) -> Response {
    match state.admitter.admit(&request) {
        Ok(outcome) => {
            state
                .health_registry
                .set_healthy(components::ADMISSION)
                .await;
            Json(outcome).into_response()
        }
        Err(e) => {
            warn!(pod_uid = %request.pod_uid, error = %e, "Admission rejected");
            let status = match e {
                MbError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            };
            error_response(status, e.to_string())
        }
    }
}

/// CPU binding of a pod
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskBinding {
    pub qos_group: QosGroup,
    pub cpus: Vec<u32>,
}

async fn put_task(
    State(state): State<Arc<AppState>>,
    Path(pod_uid): Path<String>,
    Json(binding): Json<TaskBinding>,
) -> impl IntoResponse {
    state
        .admitter
        .register_task(Task::new(binding.qos_group, pod_uid, binding.cpus));
    StatusCode::NO_CONTENT
}

async fn delete_pod(State(state): State<Arc<AppState>>, Path(pod_uid): Path<String>) -> Response {
    match state.admitter.remove_pod(&pod_uid) {
        Some(task) => Json(task).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("pod {} not registered", pod_uid)),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/plan", get(get_plan))
        .route("/api/v1/domains", get(get_domains))
        .route("/api/v1/adjust", post(post_adjust))
        .route("/api/v1/admit", post(post_admit))
        .route("/api/v1/tasks/:pod_uid", put(put_task))
        .route("/api/v1/pods/:pod_uid", delete(delete_pod))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
