//! # HTTP Server
//!
//! HTTP server for the control surface, metrics, and Kubernetes probes.
//!
//! Provides endpoints:
//! - `/metrics` - Prometheus metrics in text format
//! - `/healthz` - Liveness probe (always returns 200)
//! - `/readyz` - Readiness probe (returns 200 when the reconciler is ready)
//! - `/api/v1/applications` - Application control surface
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | GET | `/api/v1/applications` | list |
//! | POST | `/api/v1/applications` | create |
//! | GET | `/api/v1/applications/{name}` | get |
//! | PUT | `/api/v1/applications/{name}` | update |
//! | DELETE | `/api/v1/applications/{name}?cascade=true` | remove |
//! | GET | `/api/v1/applications/{name}/status` | status |
//! | GET | `/api/v1/applications/{name}/history` | Sync Run history |
//! | POST | `/api/v1/applications/{name}/sync` | manual sync |
//! | POST | `/api/v1/applications/{name}/pause` | pause |
//! | POST | `/api/v1/applications/{name}/resume` | resume |

use crate::controller::control::{ControlError, ControlPlane};
use crate::crd::ApplicationSpec;
use crate::observability::metrics;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Debug)]
pub struct ServerState {
    pub is_ready: Arc<AtomicBool>,
    pub control: Arc<ControlPlane>,
}

#[derive(Debug, Deserialize)]
pub struct CreateApplicationRequest {
    pub name: String,
    pub spec: ApplicationSpec,
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoveParams {
    #[serde(default)]
    pub cascade: bool,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControlError::NotFound(_) => StatusCode::NOT_FOUND,
            ControlError::AlreadyExists(_) | ControlError::Paused(_) => StatusCode::CONFLICT,
            ControlError::Invalid(_) => StatusCode::BAD_REQUEST,
            ControlError::Cluster(_) => StatusCode::BAD_GATEWAY,
            ControlError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Routes served by [`start_server`]
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route(
            "/api/v1/applications",
            get(list_applications).post(create_application),
        )
        .route(
            "/api/v1/applications/{name}",
            get(get_application)
                .put(update_application)
                .delete(remove_application),
        )
        .route("/api/v1/applications/{name}/status", get(get_status))
        .route("/api/v1/applications/{name}/history", get(get_history))
        .route("/api/v1/applications/{name}/sync", post(sync_application))
        .route("/api/v1/applications/{name}/pause", post(pause_application))
        .route("/api/v1/applications/{name}/resume", post(resume_application))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve; marks the state ready once the listener is bound
pub async fn start_server(port: u16, state: Arc<ServerState>) -> Result<(), anyhow::Error> {
    let app = router(Arc::clone(&state));

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;

    info!("HTTP server listening on {}", addr);
    state.is_ready.store(true, Ordering::Relaxed);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = metrics::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn list_applications(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.control.list_applications().await)
}

async fn create_application(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateApplicationRequest>,
) -> Result<impl IntoResponse, ControlError> {
    let view = state
        .control
        .create_application(&request.name, request.spec)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_application(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ControlError> {
    Ok(Json(state.control.get_application(&name).await?))
}

async fn update_application(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Json(spec): Json<ApplicationSpec>,
) -> Result<impl IntoResponse, ControlError> {
    Ok(Json(state.control.update_application(&name, spec).await?))
}

async fn remove_application(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Query(params): Query<RemoveParams>,
) -> Result<impl IntoResponse, ControlError> {
    Ok(Json(
        state
            .control
            .remove_application(&name, params.cascade)
            .await?,
    ))
}

async fn get_status(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ControlError> {
    Ok(Json(state.control.get_application_status(&name).await?))
}

async fn get_history(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ControlError> {
    Ok(Json(state.control.get_history(&name).await?))
}

async fn sync_application(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ControlError> {
    state.control.sync_application(&name).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn pause_application(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ControlError> {
    Ok(Json(state.control.pause_application(&name).await?))
}

async fn resume_application(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ControlError> {
    Ok(Json(state.control.resume_application(&name).await?))
}
