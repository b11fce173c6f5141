//! Order intake and pipeline API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use pce_core::orchestrator::{
    CancelPipelineResult, PipelineList, PipelineStatusView, ProcessOrderResult,
};
use pce_core::{OrderSnapshot, Pipeline, PipelineFilter, PipelineOptions, PipelineStage};

use super::error::{ApiError, ApiResult};
use super::middleware::AuthBrand;
use crate::state::AppState;

/// Maximum allowed limit for list queries
pub const MAX_LIMIT: i64 = 1000;

/// Default limit for list queries
pub const DEFAULT_LIMIT: i64 = 100;

/// Trigger recorded for operator-driven stage moves
const ADMIN_TRIGGER: &str = "admin";

// ============================================================================
// Request Types
// ============================================================================

/// Request body for `POST /orders`
#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub order: OrderSnapshot,
    #[serde(default)]
    pub options: PipelineOptions,
}

/// Request body for `POST /pipelines`, for an order recorded earlier
#[derive(Debug, Deserialize)]
pub struct CreatePipelineBody {
    pub order_id: String,
    #[serde(default)]
    pub options: PipelineOptions,
}

/// Query parameters for listing pipelines
#[derive(Debug, Deserialize)]
pub struct ListPipelinesParams {
    pub status: Option<String>,
    pub stage: Option<String>,
    pub order_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceBody {
    pub stage: PipelineStage,
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub reason: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Record a payment-confirmed order and start its pipeline
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Json(body): Json<CreateOrderBody>,
) -> ApiResult<(StatusCode, Json<ProcessOrderResult>)> {
    if body.order.brand_id != brand {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "order belongs to another brand",
        ));
    }
    if let Some(existing) = state.orders().get(&body.order.order_id)? {
        if existing.brand_id != brand {
            return Err(ApiError::new(
                StatusCode::FORBIDDEN,
                "order belongs to another brand",
            ));
        }
    }
    state.orders().record(&body.order)?;
    start_pipeline(&state, &body.order.order_id, &brand, body.options).await
}

/// Start a pipeline for an order that was recorded earlier
pub async fn create_pipeline(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Json(body): Json<CreatePipelineBody>,
) -> ApiResult<(StatusCode, Json<ProcessOrderResult>)> {
    let order = state
        .orders()
        .get(&body.order_id)?
        .filter(|o| o.brand_id == brand)
        .ok_or_else(|| ApiError::not_found(format!("order {}", body.order_id)))?;
    start_pipeline(&state, &order.order_id, &brand, body.options).await
}

async fn start_pipeline(
    state: &AppState,
    order_id: &str,
    brand: &str,
    options: PipelineOptions,
) -> ApiResult<(StatusCode, Json<ProcessOrderResult>)> {
    let result = state
        .orchestrator()
        .process_order(order_id, brand, options)
        .await?;
    let status = if result.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(result)))
}

/// List the caller's pipelines, newest first
pub async fn list_pipelines(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Query(params): Query<ListPipelinesParams>,
) -> ApiResult<Json<PipelineList>> {
    let mut filter = PipelineFilter::new()
        .with_limit(params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT))
        .with_offset(params.offset.unwrap_or(0).max(0));
    if let Some(status) = params.status {
        filter = filter.with_status(status.parse().map_err(ApiError::bad_request)?);
    }
    if let Some(stage) = params.stage {
        filter = filter.with_stage(stage.parse().map_err(ApiError::bad_request)?);
    }
    if let Some(order_id) = params.order_id {
        filter = filter.with_order(order_id);
    }

    Ok(Json(state.orchestrator().list_pipelines(&brand, filter)?))
}

pub async fn get_pipeline(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Path(id): Path<String>,
) -> ApiResult<Json<PipelineStatusView>> {
    Ok(Json(state.orchestrator().get_pipeline_status(&id, &brand)?))
}

/// Move a pipeline to the next stage by hand
pub async fn advance_pipeline(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Path(id): Path<String>,
    Json(body): Json<AdvanceBody>,
) -> ApiResult<Json<Pipeline>> {
    let orchestrator = state.orchestrator();
    orchestrator.get_pipeline(&id, &brand)?;
    let pipeline = orchestrator
        .advance_stage(&id, body.stage, ADMIN_TRIGGER)
        .await?;
    Ok(Json(pipeline))
}

/// Re-run the current stage of a failed pipeline
pub async fn retry_pipeline(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Path(id): Path<String>,
) -> ApiResult<Json<Pipeline>> {
    let orchestrator = state.orchestrator();
    orchestrator.get_pipeline(&id, &brand)?;
    Ok(Json(orchestrator.retry_stage(&id).await?))
}

pub async fn cancel_pipeline(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Path(id): Path<String>,
    body: Option<Json<CancelBody>>,
) -> ApiResult<Json<CancelPipelineResult>> {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "Cancelled by operator".to_string());

    let orchestrator = state.orchestrator();
    orchestrator.get_pipeline(&id, &brand)?;
    Ok(Json(orchestrator.cancel_pipeline(&id, &reason).await?))
}
