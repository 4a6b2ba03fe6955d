//! REST API endpoints for larder-service.
//!
//! All endpoints return structured JSON errors via [`AppError`]. Storage
//! failures map to 500, rejected import batches to 400, and remote failures
//! during an import to 502 (after the import has been rolled back).
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use larder_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{info, warn};

use larder_core::{CachedRead, DrainReport};
use larder_store::OperationQuery;
use larder_types::{
    ImportBatch, ImportResult, OperationId, OperationKind, OperationStatus, QueuedOperation,
    SyncStatus,
};

use crate::state::AppState;

/// Upper bound on `limit` for operation listings.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/operations", get(list_operations).post(queue_operation))
        .route("/api/operations/retry-failed", post(retry_all_failed))
        .route("/api/operations/{id}", get(get_operation))
        .route("/api/operations/{id}/retry", post(retry_operation))
        .route("/api/sync", post(force_sync))
        .route("/api/connectivity", put(set_connectivity))
        .route("/api/imports", post(run_import))
        .route("/api/cache/{key}", get(read_cache).put(write_cache))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        started_at: state.started_at,
    })
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<SyncStatus> {
    Json(state.engine.status())
}

/// Body of `POST /api/operations`.
#[derive(Debug, Deserialize)]
pub struct QueueRequest {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub collection: String,
    #[serde(default)]
    pub payload: Value,
}

/// Response to a queued operation.
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub id: OperationId,
}

async fn queue_operation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueueRequest>,
) -> Result<(StatusCode, Json<QueuedResponse>), AppError> {
    if request.collection.trim().is_empty() {
        return Err(AppError::BadRequest("collection cannot be empty".to_string()));
    }
    if !request.payload.is_object() {
        return Err(AppError::BadRequest("payload must be a JSON object".to_string()));
    }

    let id = state
        .engine
        .queue_operation(request.kind, &request.collection, request.payload)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(QueuedResponse { id })))
}

/// Query parameters for `GET /api/operations`.
#[derive(Debug, Default, Deserialize)]
pub struct OperationsQuery {
    pub status: Option<OperationStatus>,
    pub collection: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl OperationsQuery {
    fn validate(&self) -> Result<(), AppError> {
        if let Some(limit) = self.limit
            && (limit == 0 || limit > MAX_PAGE_SIZE)
        {
            return Err(AppError::BadRequest(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(())
    }

    fn to_query(&self) -> OperationQuery {
        let mut query = OperationQuery::new();
        if let Some(status) = self.status {
            query = query.status(status);
        }
        if let Some(collection) = &self.collection {
            query = query.collection(collection);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }
        query
    }
}

async fn list_operations(
    State(state): State<Arc<AppState>>,
    Query(params): Query<OperationsQuery>,
) -> Result<Json<Vec<QueuedOperation>>, AppError> {
    params.validate()?;
    let operations = state.engine.query_operations(&params.to_query()).await?;
    Ok(Json(operations))
}

async fn get_operation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<QueuedOperation>, AppError> {
    state
        .engine
        .get_operation(&OperationId::from(id.as_str()))
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Operation '{}' not found", id)))
}

async fn retry_operation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.engine.retry_failed(&OperationId::from(id.as_str())).await? {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(AppError::NotFound(format!("No failed operation '{}'", id)))
    }
}

/// Response to a bulk requeue.
#[derive(Debug, Serialize)]
pub struct RequeuedResponse {
    pub requeued: usize,
}

async fn retry_all_failed(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RequeuedResponse>, AppError> {
    let requeued = state.engine.retry_all_failed().await?;
    Ok(Json(RequeuedResponse { requeued }))
}

/// Result of `POST /api/sync`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SyncResponse {
    Completed(DrainReport),
    Skipped { skipped: bool },
}

async fn force_sync(State(state): State<Arc<AppState>>) -> Json<SyncResponse> {
    match state.engine.force_sync().await {
        Some(report) => Json(SyncResponse::Completed(report)),
        None => Json(SyncResponse::Skipped { skipped: true }),
    }
}

/// Connectivity report from the platform.
#[derive(Debug, Deserialize)]
pub struct ConnectivityRequest {
    pub online: bool,
}

async fn set_connectivity(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConnectivityRequest>,
) -> Json<SyncStatus> {
    if state.engine.set_online(request.online).await {
        info!(
            "Connectivity reported {}",
            if request.online { "online" } else { "offline" }
        );
    }
    Json(state.engine.status())
}

async fn run_import(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<ImportBatch>,
) -> Result<(StatusCode, Json<ImportResult>), AppError> {
    let result = state.engine.save_import_batch(&batch).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn read_cache(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<CachedRead>, AppError> {
    state
        .engine
        .read_cached(&key)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No cached data for '{}'", key)))
}

/// Body of `PUT /api/cache/{key}`.
#[derive(Debug, Deserialize)]
pub struct CacheRequest {
    pub collection: String,
    pub data: Value,
}

async fn write_cache(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(request): Json<CacheRequest>,
) -> Result<StatusCode, AppError> {
    state
        .engine
        .cache_snapshot(&key, &request.collection, &request.data)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// API error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Engine(larder_core::Error),
}

impl From<larder_core::Error> for AppError {
    fn from(e: larder_core::Error) -> Self {
        AppError::Engine(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Engine(e) => {
                let status = match &e {
                    larder_core::Error::InvalidBatch(_) => StatusCode::BAD_REQUEST,
                    larder_core::Error::Remote(_) | larder_core::Error::Timeout { .. } => {
                        StatusCode::BAD_GATEWAY
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    warn!("Request failed: {}", e);
                }
                (status, e.to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
