//! Types for the pipeline orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fulfillment::{Fulfillment, FulfillmentError, FulfillmentStatus};
use crate::order::OrderError;
use crate::pipeline::{
    Pipeline, PipelineErrorEntry, PipelineStage, PipelineStatus, RenderedArtifact,
    StageHistoryEntry, TransitionError,
};
use crate::provider::ProviderSlug;
use crate::queue::QueueError;
use crate::storage::StoreError;

/// Errors surfaced by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Missing, or owned by another brand.
    #[error("not found: {0}")]
    NotFound(String),

    /// Out-of-order stage move, or a write to a terminal pipeline.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Retryable provider or collaborator failure.
    #[error("provider temporarily unavailable: {0}")]
    ProviderTransient(String),

    /// Business-level refusal. Not retryable.
    #[error("provider rejected request: {0}")]
    ProviderRejected(String),

    /// Lost the compare-and-swap race on every internal retry.
    #[error("concurrent modification: {0}")]
    ConcurrencyConflict(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(what) => OrchestratorError::ConcurrencyConflict(what),
            StoreError::NotFound(what) => OrchestratorError::NotFound(what),
            other => OrchestratorError::Store(other),
        }
    }
}

impl From<TransitionError> for OrchestratorError {
    fn from(e: TransitionError) -> Self {
        OrchestratorError::InvalidTransition(e.to_string())
    }
}

impl From<OrderError> for OrchestratorError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::NotFound(id) => OrchestratorError::NotFound(format!("order {}", id)),
            OrderError::Store(e) => e.into(),
        }
    }
}

impl From<FulfillmentError> for OrchestratorError {
    fn from(e: FulfillmentError) -> Self {
        match e {
            FulfillmentError::NotFound(what) => OrchestratorError::NotFound(what),
            FulfillmentError::PipelineCancelled(_)
            | FulfillmentError::TrackingNumberImmutable { .. }
            | FulfillmentError::InvalidStatus { .. } => {
                OrchestratorError::InvalidTransition(e.to_string())
            }
            FulfillmentError::InvalidOrder(msg) => OrchestratorError::ProviderRejected(msg),
            FulfillmentError::Provider(p) if p.is_transient() => {
                OrchestratorError::ProviderTransient(p.to_string())
            }
            FulfillmentError::Provider(p) => OrchestratorError::ProviderRejected(p.to_string()),
            FulfillmentError::Store(s) => s.into(),
        }
    }
}

/// Returned by `process_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOrderResult {
    pub pipeline_id: String,
    pub status: PipelineStatus,
    pub current_stage: PipelineStage,
    pub estimated_completion: Option<DateTime<Utc>>,
    /// False when an active pipeline for the order already existed.
    pub created: bool,
}

/// Fulfillment fields shown alongside a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentSummary {
    pub id: String,
    pub provider: ProviderSlug,
    pub status: FulfillmentStatus,
    pub external_order_id: Option<String>,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

impl From<&Fulfillment> for FulfillmentSummary {
    fn from(f: &Fulfillment) -> Self {
        Self {
            id: f.id.clone(),
            provider: f.provider,
            status: f.status,
            external_order_id: f.external_order_id.clone(),
            carrier: f.carrier.clone(),
            tracking_number: f.tracking_number.clone(),
            tracking_url: f.tracking_url.clone(),
            shipped_at: f.shipped_at,
            delivered_at: f.delivered_at,
            estimated_delivery: f.estimated_delivery,
        }
    }
}

/// Full status of one pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatusView {
    pub pipeline_id: String,
    pub order_id: String,
    pub brand_id: String,
    pub status: PipelineStatus,
    pub current_stage: PipelineStage,
    /// 0-100
    pub progress: u8,
    pub stage_history: Vec<StageHistoryEntry>,
    pub errors: Vec<PipelineErrorEntry>,
    pub artifacts: Vec<RenderedArtifact>,
    pub cancel_reason: Option<String>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub fulfillment: Option<FulfillmentSummary>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Outcome of `cancel_pipeline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelPipelineResult {
    pub pipeline: Pipeline,
    /// `None` when there was no cancellable fulfillment.
    pub provider_cancelled: Option<bool>,
    pub provider_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineList {
    pub items: Vec<Pipeline>,
    pub total: i64,
}
