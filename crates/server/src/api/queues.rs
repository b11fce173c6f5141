//! Queue administration handlers.
//!
//! Queues are shared by every brand; these routes still require a caller
//! identity but report global figures.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use pce_core::queue::{QueueCounts, QueueJob, QueueStatus};

use super::error::ApiResult;
use super::middleware::AuthBrand;
use crate::state::AppState;

/// Failed jobs shown on the queue detail view
const FAILED_JOBS_SHOWN: usize = 20;

/// Default cap for `retry-failed`
const DEFAULT_RETRY_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct QueueDetailResponse {
    pub name: String,
    #[serde(flatten)]
    pub counts: QueueCounts,
    pub failed_jobs: Vec<QueueJob>,
}

#[derive(Debug, Deserialize)]
pub struct RetryFailedParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RetryFailedResponse {
    pub queue: String,
    pub retried: usize,
}

#[derive(Debug, Serialize)]
pub struct QueueActionResponse {
    pub queue: String,
    pub is_paused: bool,
}

pub async fn list_queues(
    State(state): State<Arc<AppState>>,
    _brand: AuthBrand,
) -> ApiResult<Json<Vec<QueueStatus>>> {
    Ok(Json(state.queues().get_all_queues_status()?))
}

pub async fn get_queue(
    State(state): State<Arc<AppState>>,
    _brand: AuthBrand,
    Path(name): Path<String>,
) -> ApiResult<Json<QueueDetailResponse>> {
    let queues = state.queues();
    let counts = queues.get_queue_counts(&name)?;
    let failed_jobs = queues.failed_jobs(&name, FAILED_JOBS_SHOWN)?;
    Ok(Json(QueueDetailResponse {
        name,
        counts,
        failed_jobs,
    }))
}

pub async fn pause_queue(
    State(state): State<Arc<AppState>>,
    _brand: AuthBrand,
    Path(name): Path<String>,
) -> ApiResult<Json<QueueActionResponse>> {
    state.queues().pause_queue(&name)?;
    Ok(Json(QueueActionResponse {
        queue: name,
        is_paused: true,
    }))
}

pub async fn resume_queue(
    State(state): State<Arc<AppState>>,
    _brand: AuthBrand,
    Path(name): Path<String>,
) -> ApiResult<Json<QueueActionResponse>> {
    state.queues().resume_queue(&name)?;
    Ok(Json(QueueActionResponse {
        queue: name,
        is_paused: false,
    }))
}

/// Re-queue up to `limit` failed jobs
pub async fn retry_failed(
    State(state): State<Arc<AppState>>,
    _brand: AuthBrand,
    Path(name): Path<String>,
    Query(params): Query<RetryFailedParams>,
) -> ApiResult<Json<RetryFailedResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_RETRY_LIMIT);
    let retried = state.queues().retry_failed_jobs(&name, limit)?;
    Ok(Json(RetryFailedResponse {
        queue: name,
        retried,
    }))
}
