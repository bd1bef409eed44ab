//! HTTP delivery surface for the control plane.
//!
//! Consumed by the web UI and CLI layers:
//! - worker listing and start/stop/restart by name
//! - typed config get/set/delete over the encrypted store
//! - a server-sent-events stream of notifications (history replay, then
//!   live fan-out)
//!
//! The handlers are a thin translation layer; all invariants live in the
//! core components.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::warn;

use fbox_events::Notification;

use crate::state::AppState;
use crate::store::{ConfigEntry, ConfigValue, StoreError};
use crate::workers::{OrchestratorError, WorkerStatus};

/// API error with an HTTP status mapping.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::KeyNotFound(_) => ApiError::NotFound(e.to_string()),
            StoreError::ValueTypeMismatch { .. } => ApiError::Conflict(e.to_string()),
            StoreError::InvalidValue(_) => ApiError::BadRequest(e.to_string()),
            StoreError::WrongKey | StoreError::Corrupt(_) | StoreError::EncryptFailed => {
                ApiError::Internal(e.to_string())
            }
            StoreError::Io(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::UnknownWorker(_) => ApiError::NotFound(e.to_string()),
            OrchestratorError::AlreadyRunning(_)
            | OrchestratorError::DuplicateWorker(_)
            | OrchestratorError::NotRunning(_)
            | OrchestratorError::MailboxFull(_) => ApiError::Conflict(e.to_string()),
            OrchestratorError::ShuttingDown => ApiError::Unavailable(e.to_string()),
        }
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/workers", get(list_workers))
        .route("/v1/workers/{name}/start", post(start_worker))
        .route("/v1/workers/{name}/stop", post(stop_worker))
        .route("/v1/workers/{name}/restart", post(restart_worker))
        .route("/v1/config", get(list_config))
        .route("/v1/config/{key}", get(get_config))
        .route("/v1/config/{key}", put(put_config))
        .route("/v1/config/{key}", delete(delete_config))
        .route("/v1/notifications/stream", get(stream_notifications))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// One worker in the list response.
#[derive(Debug, Serialize)]
struct WorkerResponse {
    name: String,
    #[serde(flatten)]
    status: WorkerStatus,
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerResponse>> {
    let workers = state
        .orchestrator()
        .list()
        .into_iter()
        .map(|(name, status)| WorkerResponse { name, status })
        .collect();
    Json(workers)
}

#[derive(Debug, Serialize)]
struct WorkerActionResponse {
    name: String,
    state: crate::workers::WorkerState,
}

async fn start_worker(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WorkerActionResponse>, ApiError> {
    let worker_state = state.orchestrator().start(&name).await?;
    Ok(Json(WorkerActionResponse {
        name,
        state: worker_state,
    }))
}

async fn stop_worker(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WorkerActionResponse>, ApiError> {
    let worker_state = state
        .orchestrator()
        .stop(&name, state.worker_stop_timeout())
        .await?;
    Ok(Json(WorkerActionResponse {
        name,
        state: worker_state,
    }))
}

async fn restart_worker(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WorkerActionResponse>, ApiError> {
    let worker_state = state
        .orchestrator()
        .restart(&name, state.worker_stop_timeout())
        .await?;
    Ok(Json(WorkerActionResponse {
        name,
        state: worker_state,
    }))
}

async fn list_config(State(state): State<AppState>) -> Json<Vec<ConfigEntry>> {
    Json(state.store().entries())
}

async fn get_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ConfigEntry>, ApiError> {
    state
        .store()
        .get(&key)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("config key not found: {key}")))
}

/// Body for config writes.
#[derive(Debug, Deserialize)]
struct SetConfigRequest {
    /// Tagged value, e.g. `{"type": "string", "value": "influxdb"}`.
    value: ConfigValue,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct SetConfigResponse {
    key: String,
    version: u64,
}

async fn put_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<SetConfigRequest>,
) -> Result<Json<SetConfigResponse>, ApiError> {
    state
        .store()
        .set(&key, request.value, request.description.as_deref())?;
    Ok(Json(SetConfigResponse {
        key,
        version: state.store().version(),
    }))
}

async fn delete_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store().delete(&key)?;
    Ok(StatusCode::NO_CONTENT)
}

/// SSE stream: buffered history first, then live notifications. A lagged
/// subscriber silently loses its oldest undelivered messages and continues.
async fn stream_notifications(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (history, rx) = state.bus().subscribe();

    let stream = futures_util::stream::unfold(
        (history.into_iter(), rx),
        |(mut history, mut rx)| async move {
            if let Some(notification) = history.next() {
                return Some((Ok(sse_event(&notification)), (history, rx)));
            }
            loop {
                match rx.recv().await {
                    Ok(notification) => {
                        return Some((Ok(sse_event(&notification)), (history, rx)));
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Notification subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn sse_event(notification: &Notification) -> Event {
    match Event::default()
        .id(notification.id.to_string())
        .json_data(notification)
    {
        Ok(event) => event,
        Err(e) => Event::default().comment(format!("encode error: {e}")),
    }
}
