//! Fulfillment, shipping quote and tracking handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use pce_core::fulfillment::{FulfillmentCancellation, ShipmentDetails};
use pce_core::provider::{OrderItem, ShippingAddress, ShippingRate};
use pce_core::tracking::TrackingStatus;
use pce_core::{Fulfillment, FulfillmentFilter, FulfillmentStatus};

use super::error::{ApiError, ApiResult};
use super::middleware::AuthBrand;
use super::pipelines::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListFulfillmentsParams {
    pub status: Option<String>,
    pub pipeline_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListFulfillmentsResponse {
    pub items: Vec<Fulfillment>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct CancelFulfillmentBody {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    pub status: FulfillmentStatus,
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ShippingQuoteBody {
    pub address: ShippingAddress,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize)]
pub struct ShippingQuoteResponse {
    pub rates: Vec<ShippingRate>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_fulfillments(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Query(params): Query<ListFulfillmentsParams>,
) -> ApiResult<Json<ListFulfillmentsResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = FulfillmentFilter::default()
        .with_limit(limit)
        .with_offset(offset);
    if let Some(status) = params.status {
        filter = filter.with_status(status.parse().map_err(ApiError::bad_request)?);
    }
    if let Some(pipeline_id) = params.pipeline_id {
        filter = filter.with_pipeline(pipeline_id);
    }

    let (items, total) = state.fulfillments().list_fulfillments(&brand, filter)?;
    Ok(Json(ListFulfillmentsResponse {
        items,
        total,
        limit,
        offset,
    }))
}

pub async fn get_fulfillment(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Path(id): Path<String>,
) -> ApiResult<Json<Fulfillment>> {
    Ok(Json(state.fulfillments().get_fulfillment(&id, &brand)?))
}

/// Record the carrier handoff by hand
pub async fn mark_shipped(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Path(id): Path<String>,
    Json(shipment): Json<ShipmentDetails>,
) -> ApiResult<Json<Fulfillment>> {
    if shipment.carrier.trim().is_empty() || shipment.tracking_number.trim().is_empty() {
        return Err(ApiError::bad_request(
            "carrier and tracking_number are required",
        ));
    }
    let fulfillment = state
        .fulfillments()
        .mark_as_shipped(&id, &brand, shipment)
        .await?;
    Ok(Json(fulfillment))
}

pub async fn mark_delivered(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Path(id): Path<String>,
) -> ApiResult<Json<Fulfillment>> {
    Ok(Json(state.fulfillments().mark_as_delivered(&id, &brand).await?))
}

pub async fn cancel_fulfillment(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Path(id): Path<String>,
    body: Option<Json<CancelFulfillmentBody>>,
) -> ApiResult<Json<FulfillmentCancellation>> {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "Cancelled by operator".to_string());
    let result = state
        .fulfillments()
        .cancel_fulfillment(&id, &brand, &reason)
        .await?;
    Ok(Json(result))
}

/// Forward-only status write; regressions are ignored
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Path(id): Path<String>,
    Json(body): Json<UpdateStatusBody>,
) -> ApiResult<Json<Fulfillment>> {
    let source = body.source.unwrap_or_else(|| "admin".to_string());
    let fulfillment = state
        .fulfillments()
        .update_fulfillment_status(&id, &brand, body.status, &source)
        .await?;
    Ok(Json(fulfillment))
}

/// Pull the provider's current view of the order
pub async fn sync_fulfillment(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Path(id): Path<String>,
) -> ApiResult<Json<Fulfillment>> {
    Ok(Json(state.fulfillments().sync_from_provider(&id, &brand).await?))
}

/// Quotes from every configured provider, cheapest first
pub async fn shipping_quotes(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Json(body): Json<ShippingQuoteBody>,
) -> ApiResult<Json<ShippingQuoteResponse>> {
    if body.items.is_empty() {
        return Err(ApiError::bad_request("at least one item is required"));
    }
    let rates = state
        .fulfillments()
        .get_shipping_quotes(&brand, &body.address, &body.items)
        .await;
    Ok(Json(ShippingQuoteResponse { rates }))
}

/// Latest known status for a tracking number owned by the caller's brand
pub async fn get_tracking(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Path(tracking_number): Path<String>,
) -> ApiResult<Json<TrackingStatus>> {
    let status = state
        .tracking()
        .get_status(&tracking_number)?
        .ok_or_else(|| ApiError::not_found(format!("tracking number {}", tracking_number)))?;
    // Another brand's shipment is reported as missing
    state
        .fulfillments()
        .get_fulfillment(&status.fulfillment_id, &brand)
        .map_err(|_| ApiError::not_found(format!("tracking number {}", tracking_number)))?;
    Ok(Json(status))
}
