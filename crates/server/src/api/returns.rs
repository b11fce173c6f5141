//! Return and refund handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use pce_core::returns::{NewReturn, ReturnFilter, ReturnRequest};
use pce_core::ReturnStatus;

use super::error::{ApiError, ApiResult};
use super::middleware::AuthBrand;
use crate::state::AppState;

const MAX_LIMIT: u32 = 1000;
const DEFAULT_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct ListReturnsParams {
    pub status: Option<String>,
    pub order_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListReturnsResponse {
    pub items: Vec<ReturnRequest>,
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Deserialize)]
pub struct ReturnStatusBody {
    pub status: ReturnStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub amount_cents: i64,
    pub notes: Option<String>,
}

pub async fn list_returns(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Query(params): Query<ListReturnsParams>,
) -> ApiResult<Json<ListReturnsResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0);

    let mut filter = ReturnFilter::default().with_limit(limit).with_offset(offset);
    if let Some(status) = params.status {
        filter = filter.with_status(status.parse().map_err(ApiError::bad_request)?);
    }
    if let Some(order_id) = params.order_id {
        filter = filter.with_order(order_id);
    }

    let (items, total) = state.returns().list_returns(&brand, filter)?;
    Ok(Json(ListReturnsResponse {
        items,
        total,
        limit,
        offset,
    }))
}

pub async fn create_return(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Json(body): Json<NewReturn>,
) -> ApiResult<(StatusCode, Json<ReturnRequest>)> {
    let created = state.returns().create_return(&brand, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_return(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Path(id): Path<String>,
) -> ApiResult<Json<ReturnRequest>> {
    Ok(Json(state.returns().get_return(&id, &brand)?))
}

/// Approve, reject or receive a return
pub async fn update_return_status(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Path(id): Path<String>,
    Json(body): Json<ReturnStatusBody>,
) -> ApiResult<Json<ReturnRequest>> {
    if body.status == ReturnStatus::Refunded {
        return Err(ApiError::bad_request(
            "use the refund endpoint to refund a return",
        ));
    }
    let updated = state
        .returns()
        .process_return(&id, &brand, body.status, body.notes.as_deref())
        .await?;
    Ok(Json(updated))
}

pub async fn refund_return(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Path(id): Path<String>,
    Json(body): Json<RefundBody>,
) -> ApiResult<Json<ReturnRequest>> {
    let updated = state
        .returns()
        .process_refund(&id, &brand, body.amount_cents, body.notes.as_deref())
        .await?;
    Ok(Json(updated))
}
