//! Domain event log query handler.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use pce_core::{EventFilter, EventRecord};

use super::error::ApiResult;
use super::middleware::AuthBrand;
use crate::state::AppState;

const MAX_LIMIT: i64 = 1000;
const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for the event log
#[derive(Debug, Deserialize)]
pub struct EventQueryParams {
    pub event_type: Option<String>,
    pub pipeline_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EventQueryResponse {
    pub events: Vec<EventRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// The caller's events, newest first
pub async fn query_events(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
    Query(params): Query<EventQueryParams>,
) -> ApiResult<Json<EventQueryResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = EventFilter::new()
        .with_brand(brand)
        .with_time_range(params.from, params.to)
        .with_limit(limit)
        .with_offset(offset);
    if let Some(event_type) = params.event_type {
        filter = filter.with_event_type(event_type.to_ascii_uppercase());
    }
    if let Some(pipeline_id) = params.pipeline_id {
        filter = filter.with_pipeline(pipeline_id);
    }

    let events = state.event_log().query(&filter)?;
    let total = state.event_log().count(&filter)?;
    Ok(Json(EventQueryResponse {
        events,
        total,
        limit,
        offset,
    }))
}
