//! What each pipeline stage does.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use crate::fulfillment::{FulfillmentError, FulfillmentService, FulfillmentStatus};
use crate::order::OrderStore;
use crate::pipeline::{Pipeline, PipelineStage, RenderedArtifact};
use crate::render::{RenderError, Renderer};

use super::config::OrchestratorConfig;
use super::jobs::StageJob;

/// Result of one execution of a stage job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult {
    /// Work is done; move to the next stage.
    Advance,
    /// Nothing to do yet; look again after the delay without using an attempt.
    Wait(Duration),
}

#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// Retried by the queue's policy.
    #[error("{0}")]
    Transient(String),

    /// Not retryable; the pipeline fails immediately.
    #[error("{0}")]
    Rejected(String),

    /// The pipeline was cancelled while the stage ran.
    #[error("pipeline cancelled")]
    Cancelled,
}

impl From<FulfillmentError> for StageError {
    fn from(e: FulfillmentError) -> Self {
        match e {
            FulfillmentError::PipelineCancelled(_) => StageError::Cancelled,
            FulfillmentError::Provider(p) if p.is_transient() => StageError::Transient(p.to_string()),
            FulfillmentError::Store(s) => StageError::Transient(s.to_string()),
            other => StageError::Rejected(other.to_string()),
        }
    }
}

impl From<RenderError> for StageError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::Transient(msg) => StageError::Transient(msg),
            RenderError::Rejected(msg) => StageError::Rejected(msg),
        }
    }
}

impl From<crate::storage::StoreError> for StageError {
    fn from(e: crate::storage::StoreError) -> Self {
        StageError::Transient(e.to_string())
    }
}

/// Performs the external work behind each stage.
pub struct StageExecutor {
    orders: Arc<dyn OrderStore>,
    renderer: Arc<dyn Renderer>,
    fulfillments: Arc<FulfillmentService>,
    pipelines: Arc<dyn crate::pipeline::PipelineStore>,
    fulfillment_poll: Duration,
    delivery_poll: Duration,
}

impl StageExecutor {
    pub fn new(
        config: &OrchestratorConfig,
        orders: Arc<dyn OrderStore>,
        renderer: Arc<dyn Renderer>,
        fulfillments: Arc<FulfillmentService>,
        pipelines: Arc<dyn crate::pipeline::PipelineStore>,
    ) -> Self {
        Self {
            orders,
            renderer,
            fulfillments,
            pipelines,
            fulfillment_poll: Duration::from_secs(config.fulfillment_poll_secs),
            delivery_poll: Duration::from_secs(config.delivery_poll_secs),
        }
    }

    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        job: &StageJob,
    ) -> Result<StageResult, StageError> {
        match job.stage {
            PipelineStage::Validation => self.validate(pipeline, job),
            PipelineStage::Render => self.render(pipeline, job).await,
            PipelineStage::Manufacturing => self.manufacture(pipeline).await,
            PipelineStage::Fulfillment => self.await_shipment(pipeline).await,
            PipelineStage::Shipped => self.await_delivery(pipeline).await,
            PipelineStage::Delivered => Err(StageError::Rejected(
                "DELIVERED has no stage work".to_string(),
            )),
        }
    }

    fn validate(&self, pipeline: &Pipeline, job: &StageJob) -> Result<StageResult, StageError> {
        let order = self
            .orders
            .get(&pipeline.order_id)?
            .filter(|o| o.brand_id == pipeline.brand_id)
            .ok_or_else(|| {
                StageError::Rejected(format!("order {} not found for brand", pipeline.order_id))
            })?;

        let errors = order.validation_errors(job.options.skip_render);
        if !errors.is_empty() {
            return Err(StageError::Rejected(errors.join("; ")));
        }
        debug!(pipeline_id = %pipeline.id, "Order validated");
        Ok(StageResult::Advance)
    }

    async fn render(&self, pipeline: &Pipeline, job: &StageJob) -> Result<StageResult, StageError> {
        if job.options.skip_render {
            debug!(pipeline_id = %pipeline.id, "Render skipped");
            return Ok(StageResult::Advance);
        }
        let order = self
            .orders
            .get(&pipeline.order_id)?
            .ok_or_else(|| StageError::Rejected(format!("order {} not found", pipeline.order_id)))?;

        // Items rendered by an earlier attempt are kept.
        let mut artifacts = pipeline.artifacts.clone();
        for item in &order.line_items {
            if artifacts.iter().any(|a| a.line_item_id == item.id) {
                continue;
            }
            let rendered = match self.renderer.render(&order, item).await {
                Ok(rendered) => rendered,
                Err(e) => {
                    // Keep partial progress for the retry.
                    self.pipelines.record_artifacts(&pipeline.id, &artifacts)?;
                    return Err(e.into());
                }
            };
            artifacts.push(RenderedArtifact {
                line_item_id: rendered.line_item_id,
                file_url: rendered.file_url,
                rendered_at: Utc::now(),
            });
        }
        self.pipelines.record_artifacts(&pipeline.id, &artifacts)?;
        info!(
            pipeline_id = %pipeline.id,
            renderer = self.renderer.name(),
            files = artifacts.len(),
            "Line items rendered"
        );
        Ok(StageResult::Advance)
    }

    async fn manufacture(&self, pipeline: &Pipeline) -> Result<StageResult, StageError> {
        let f = self
            .fulfillments
            .create_fulfillment(&pipeline.id, &pipeline.brand_id)
            .await?;
        match f.status {
            FulfillmentStatus::Failed => Err(StageError::Rejected(
                f.failure_reason
                    .unwrap_or_else(|| "provider rejected the order".to_string()),
            )),
            FulfillmentStatus::Cancelled => Err(StageError::Cancelled),
            _ => Ok(StageResult::Advance),
        }
    }

    async fn await_shipment(&self, pipeline: &Pipeline) -> Result<StageResult, StageError> {
        let f = self.fulfillments.sync_for_pipeline(&pipeline.id).await?;
        match f.status {
            s if s.has_shipped() => Ok(StageResult::Advance),
            FulfillmentStatus::Cancelled => {
                Err(StageError::Rejected("fulfillment was cancelled".to_string()))
            }
            FulfillmentStatus::Failed => Err(StageError::Rejected(
                f.failure_reason
                    .unwrap_or_else(|| "manufacturing failed".to_string()),
            )),
            _ => Ok(StageResult::Wait(self.fulfillment_poll)),
        }
    }

    async fn await_delivery(&self, pipeline: &Pipeline) -> Result<StageResult, StageError> {
        let f = self.fulfillments.sync_for_pipeline(&pipeline.id).await?;
        match f.status {
            FulfillmentStatus::Delivered => Ok(StageResult::Advance),
            FulfillmentStatus::Cancelled | FulfillmentStatus::Failed => Err(StageError::Rejected(
                format!("fulfillment ended as {} after shipping", f.status),
            )),
            _ => Ok(StageResult::Wait(self.delivery_poll)),
        }
    }
}
