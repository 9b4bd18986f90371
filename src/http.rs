//! HTTP surface
//!
//! Provides:
//! - Health and status endpoints
//! - Verified course payloads by id
//! - Random unplayed samples per category
//! - The pool directory itself under `/smmdb`, so course URLs resolve

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;

use crate::error::PoolError;
use crate::models::{Category, ContentRecord};
use crate::pipeline::{CycleState, QueueStats};
use crate::pool::CoursePool;
use crate::store::PoolStats;

pub type SharedPool = Arc<CoursePool>;

/// Create the router; `data_dir` is served statically under `/smmdb`
pub fn create_router(pool: SharedPool, data_dir: &std::path::Path) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/courses/:id", get(course_payload))
        .route("/courses/:id/record", get(course_record))
        .route("/categories/:category/sample", get(sample))
        .nest_service("/smmdb", ServeDir::new(data_dir))
        .with_state(pool)
}

/// Pool errors rendered as HTTP responses
pub struct ApiError(PoolError);

impl From<PoolError> for ApiError {
    fn from(e: PoolError) -> Self {
        Self(e)
    }
}

pub fn status_for(err: &PoolError) -> StatusCode {
    match err {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        PoolError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        PoolError::InsufficientPool { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (status_for(&self.0), self.0.to_string()).into_response()
    }
}

pub async fn health() -> impl IntoResponse {
    "OK"
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub stats: PoolStats,
    pub cycle: CycleState,
    pub queue: QueueStats,
}

/// GET /status
pub async fn status(State(pool): State<SharedPool>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        stats: pool.stats().await,
        cycle: pool.cycle_state(),
        queue: pool.queue_stats(),
    })
}

/// GET /courses/:id
pub async fn course_payload(
    State(pool): State<SharedPool>,
    Path(id): Path<u64>,
) -> Result<Response, ApiError> {
    let payload = pool.read_payload(id).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], payload).into_response())
}

/// GET /courses/:id/record
pub async fn course_record(
    State(pool): State<SharedPool>,
    Path(id): Path<u64>,
) -> Result<Json<ContentRecord>, ApiError> {
    Ok(Json(pool.lookup_by_id(id).await?))
}

#[derive(Deserialize)]
pub struct SampleQuery {
    #[serde(default = "default_sample_count")]
    pub count: usize,
}

fn default_sample_count() -> usize {
    1
}

/// GET /categories/:category/sample?count=N
pub async fn sample(
    State(pool): State<SharedPool>,
    Path(category): Path<String>,
    Query(query): Query<SampleQuery>,
) -> Result<Json<Vec<ContentRecord>>, ApiError> {
    let category: Category = category.parse()?;
    Ok(Json(pool.sample_unplayed(category, query.count).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_for(&PoolError::NotFound(1)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&PoolError::CorruptRecord {
                id: 1,
                reason: "bad crc".to_string()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&PoolError::InvalidArgument("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&PoolError::InsufficientPool {
                category: Category::Easy,
                requested: 3,
                available: 1
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&PoolError::QueueClosed),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
