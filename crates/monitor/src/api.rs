//! HTTP surface: REST endpoints, streaming endpoints, health and metrics

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use monitor_lib::{
    bus::BusSubscription,
    scheduler::{CancelOutcome, DispatchError, InvestigationRequest, RequestedMode},
    ComponentStatus, EventBus, HealthRegistry, InvestigationMode, MonitorState, ReportStore,
    SchedulerHandle,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ReportStore>,
    pub bus: EventBus,
    pub monitor: Arc<MonitorState>,
    pub scheduler: SchedulerHandle,
    pub health: HealthRegistry,
    pub safe_mode: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInvestigationBody {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub issue_fingerprint: Option<String>,
    #[serde(default)]
    pub timeout_sec: Option<u64>,
}

#[derive(Debug, Serialize)]
struct StartedResponse {
    id: String,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_body(message: &str) -> Json<ErrorBody> {
    Json(ErrorBody {
        error: message.to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_list_limit")]
    pub limit: usize,
    #[serde(default)]
    pub mode: Option<InvestigationMode>,
}

fn default_list_limit() -> usize {
    50
}

async fn monitoring_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.monitor.status() {
        Some(status) => (StatusCode::OK, Json(status)).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            error_body("no status observed yet"),
        )
            .into_response(),
    }
}

async fn cluster_snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.monitor.snapshot() {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            error_body("no snapshot observed yet"),
        )
            .into_response(),
    }
}

async fn start_deterministic(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartInvestigationBody>,
) -> impl IntoResponse {
    start_investigation(state, RequestedMode::Deterministic, body).await
}

async fn start_agentic(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartInvestigationBody>,
) -> impl IntoResponse {
    if state.safe_mode {
        return (StatusCode::CONFLICT, error_body("safe_mode")).into_response();
    }
    start_investigation(state, RequestedMode::Agentic, body).await
}

async fn start_investigation(
    state: Arc<AppState>,
    mode: RequestedMode,
    body: StartInvestigationBody,
) -> axum::response::Response {
    let request = InvestigationRequest {
        mode,
        namespace: body.namespace,
        issue_fingerprint: body.issue_fingerprint,
        timeout: body.timeout_sec.map(Duration::from_secs),
    };

    match state.scheduler.investigate(request).await {
        Ok(id) => (
            StatusCode::OK,
            Json(StartedResponse {
                id,
                status: "in_progress",
            }),
        )
            .into_response(),
        Err(DispatchError::SafeMode) => {
            (StatusCode::CONFLICT, error_body("safe_mode")).into_response()
        }
        Err(DispatchError::Unavailable) => (
            StatusCode::SERVICE_UNAVAILABLE,
            error_body("scheduler unavailable"),
        )
            .into_response(),
    }
}

async fn list_investigations(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    Json(state.store.list(params.limit, params.mode))
}

async fn get_investigation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get(&id) {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => (StatusCode::NOT_FOUND, error_body("unknown investigation")).into_response(),
    }
}

async fn cancel_investigation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.scheduler.cancel(&id).await {
        CancelOutcome::Accepted | CancelOutcome::AlreadyTerminal => StatusCode::NO_CONTENT,
        CancelOutcome::NotFound => StatusCode::NOT_FOUND,
    }
}

async fn get_report_file(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> impl IntoResponse {
    match state.store.read_file(&filename) {
        Some(bytes) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            bytes,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, error_body("unknown report file")).into_response(),
    }
}

/// Adapt a bus subscription into a chunked JSON-lines body. Clients that
/// stop reading fall behind and are subject to the bus drop policy.
fn ndjson_stream<T: Serialize + Clone + Send + 'static>(
    subscription: BusSubscription<T>,
) -> impl IntoResponse {
    let stream = subscription.into_stream().map(|event| {
        let mut line = serde_json::to_vec(&event).unwrap_or_default();
        line.push(b'\n');
        Ok::<_, Infallible>(Bytes::from(line))
    });

    (
        [("content-type", "application/x-ndjson")],
        Body::from_stream(stream),
    )
}

async fn stream_logs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ndjson_stream(state.bus.subscribe_logs())
}

async fn stream_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ndjson_stream(state.bus.subscribe_status())
}

async fn stream_reports(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ndjson_stream(state.bus.subscribe_reports())
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health.health().await;
    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health.readiness().await;
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/monitoring/status", get(monitoring_status))
        .route("/api/cluster/snapshot", get(cluster_snapshot))
        .route("/api/investigations", get(list_investigations))
        .route("/api/investigations/deterministic", post(start_deterministic))
        .route("/api/investigations/agentic", post(start_agentic))
        .route("/api/investigations/:id", get(get_investigation))
        .route("/api/investigations/:id/cancel", post(cancel_investigation))
        .route("/api/reports/:filename", get(get_report_file))
        .route("/stream/logs", get(stream_logs))
        .route("/stream/status", get(stream_status))
        .route("/stream/reports", get(stream_reports))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{port}");
    info!(addr = %addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
