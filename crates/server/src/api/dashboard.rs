//! Operator dashboard handler.

use axum::{extract::State, Json};
use std::sync::Arc;
use pce_core::Dashboard;

use super::error::ApiResult;
use super::middleware::AuthBrand;
use crate::state::AppState;

/// Counts, queue depths, recent pipelines and alerts for the caller's brand
pub async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    AuthBrand(brand): AuthBrand,
) -> ApiResult<Json<Dashboard>> {
    let dashboard = state.orchestrator().get_dashboard(&brand, state.queues())?;
    Ok(Json(dashboard))
}
