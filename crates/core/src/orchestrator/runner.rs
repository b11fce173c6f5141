//! Pipeline orchestrator: the stage state machine and the operations that
//! drive it.
//!
//! Every mutation is load, apply a rule from [`crate::pipeline`], then
//! compare-and-swap. A lost race reloads and re-evaluates, so two workers can
//! never both advance the same pipeline.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::events::{DomainEvent, EventHandle};
use crate::fulfillment::FulfillmentService;
use crate::metrics;
use crate::pipeline::{
    apply_advance, apply_cancel, apply_failure, apply_retry, apply_start, check_advance,
    AdvancePlan, InsertOutcome, Pipeline, PipelineFilter, PipelineOptions, PipelineStage,
    PipelineStatus, PipelineStore, RenderedArtifact, TransitionError,
};
use crate::queue::{EnqueueOptions, JobQueue};
use crate::storage::StoreError;

use super::config::OrchestratorConfig;
use super::jobs::{queue_for_stage, StageJob};
use super::types::{
    CancelPipelineResult, FulfillmentSummary, OrchestratorError, PipelineList,
    PipelineStatusView, ProcessOrderResult,
};

/// Owns pipeline stage transitions and the jobs behind them.
pub struct PipelineOrchestrator {
    pub(super) config: OrchestratorConfig,
    pub(super) pipelines: Arc<dyn PipelineStore>,
    pub(super) queue: Arc<dyn JobQueue>,
    pub(super) fulfillments: Arc<FulfillmentService>,
    events: Option<EventHandle>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        pipelines: Arc<dyn PipelineStore>,
        queue: Arc<dyn JobQueue>,
        fulfillments: Arc<FulfillmentService>,
    ) -> Self {
        Self {
            config,
            pipelines,
            queue,
            fulfillments,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventHandle) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // =========================================================================
    // Entry
    // =========================================================================

    /// Start fulfilling an order.
    ///
    /// Idempotent on `order_id`: while a non-terminal pipeline exists for the
    /// order, its current state is returned instead of creating another.
    pub async fn process_order(
        &self,
        order_id: &str,
        brand_id: &str,
        options: PipelineOptions,
    ) -> Result<ProcessOrderResult, OrchestratorError> {
        if order_id.trim().is_empty() || brand_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "order_id and brand_id are required".to_string(),
            ));
        }

        let candidate = Pipeline::new(order_id, brand_id, options);
        let pipeline = match self.pipelines.insert_if_absent(&candidate)? {
            InsertOutcome::Existing(existing) => {
                if existing.brand_id != brand_id {
                    return Err(OrchestratorError::NotFound(format!("order {}", order_id)));
                }
                debug!(pipeline_id = %existing.id, order_id, "Pipeline already active for order");
                return Ok(self.process_result(&existing, false));
            }
            InsertOutcome::Created(created) => created,
        };

        metrics::PIPELINES_CREATED.inc();
        info!(pipeline_id = %pipeline.id, order_id, brand_id, "Pipeline created");
        self.emit(DomainEvent::PipelineCreated {
            pipeline_id: pipeline.id.clone(),
            order_id: order_id.to_string(),
            brand_id: brand_id.to_string(),
        })
        .await;

        let (_, started) = self.mutate(&pipeline.id, |p| Ok(apply_start(p)))?;
        if let Err(e) = self.enqueue_stage(&started) {
            warn!(pipeline_id = %started.id, error = %e, "Failed to enqueue first stage");
            self.fail_pipeline(&started.id, started.current_stage, &e.to_string())
                .await?;
            return Err(e);
        }
        Ok(self.process_result(&started, true))
    }

    fn process_result(&self, p: &Pipeline, created: bool) -> ProcessOrderResult {
        ProcessOrderResult {
            pipeline_id: p.id.clone(),
            status: p.status,
            current_stage: p.current_stage,
            estimated_completion: self.estimated_completion(p),
            created,
        }
    }

    fn estimated_completion(&self, p: &Pipeline) -> Option<chrono::DateTime<Utc>> {
        if p.is_terminal() {
            return p.completed_at;
        }
        let hours = i64::try_from(self.config.estimated_turnaround_hours).unwrap_or(i64::MAX / 3600);
        Some(p.created_at + chrono::Duration::hours(hours))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// A pipeline owned by `brand_id`. Other brands' pipelines are not found.
    pub fn get_pipeline(&self, pipeline_id: &str, brand_id: &str) -> Result<Pipeline, OrchestratorError> {
        self.pipelines
            .get(pipeline_id)?
            .filter(|p| p.brand_id == brand_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("pipeline {}", pipeline_id)))
    }

    pub fn get_pipeline_status(
        &self,
        pipeline_id: &str,
        brand_id: &str,
    ) -> Result<PipelineStatusView, OrchestratorError> {
        let p = self.get_pipeline(pipeline_id, brand_id)?;
        let fulfillment = self.fulfillments.find_for_pipeline(&p.id)?;
        Ok(PipelineStatusView {
            progress: p.progress(),
            estimated_completion: fulfillment
                .as_ref()
                .and_then(|f| f.estimated_delivery)
                .or_else(|| self.estimated_completion(&p)),
            fulfillment: fulfillment.as_ref().map(FulfillmentSummary::from),
            pipeline_id: p.id,
            order_id: p.order_id,
            brand_id: p.brand_id,
            status: p.status,
            current_stage: p.current_stage,
            stage_history: p.stage_history,
            errors: p.errors,
            artifacts: p.artifacts,
            cancel_reason: p.cancel_reason,
            version: p.version,
            created_at: p.created_at,
            updated_at: p.updated_at,
            completed_at: p.completed_at,
            cancelled_at: p.cancelled_at,
        })
    }

    pub fn list_pipelines(
        &self,
        brand_id: &str,
        filter: PipelineFilter,
    ) -> Result<PipelineList, OrchestratorError> {
        let filter = filter.with_brand(brand_id);
        Ok(PipelineList {
            items: self.pipelines.list(&filter)?,
            total: self.pipelines.count(&filter)?,
        })
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Move to `target`, which must be the stage right after the current one.
    ///
    /// Asking for the current stage is an idempotent no-op so a retried
    /// worker can repeat its callback. Reaching DELIVERED completes the
    /// pipeline; any other stage gets its job enqueued.
    pub async fn advance_stage(
        &self,
        pipeline_id: &str,
        target: PipelineStage,
        trigger: &str,
    ) -> Result<Pipeline, OrchestratorError> {
        let (before, after) = self.mutate(pipeline_id, |p| match check_advance(p, target)? {
            AdvancePlan::AlreadyAt => Ok(false),
            AdvancePlan::Advance => {
                apply_advance(p, target, trigger, Utc::now());
                Ok(true)
            }
        })?;
        if before.version == after.version {
            debug!(pipeline_id, stage = %target, "Pipeline already at stage");
            return Ok(after);
        }

        let from = before.current_stage;
        info!(pipeline_id, from = %from, to = %target, trigger, "Stage advanced");
        metrics::STAGE_TRANSITIONS
            .with_label_values(&[from.as_str(), target.as_str()])
            .inc();
        if let Some(entry) = before.open_history_entry() {
            let elapsed = (Utc::now() - entry.entered_at).num_milliseconds().max(0) as f64;
            metrics::STAGE_DURATION
                .with_label_values(&[from.as_str()])
                .observe(elapsed / 1000.0);
        }
        self.emit(DomainEvent::StageAdvanced {
            pipeline_id: after.id.clone(),
            brand_id: after.brand_id.clone(),
            from_stage: from,
            to_stage: target,
            trigger: trigger.to_string(),
        })
        .await;

        if after.status == PipelineStatus::Completed {
            info!(pipeline_id, "Pipeline completed");
            metrics::PIPELINE_OUTCOMES.with_label_values(&["completed"]).inc();
            self.emit(DomainEvent::PipelineCompleted {
                pipeline_id: after.id.clone(),
                brand_id: after.brand_id.clone(),
            })
            .await;
            return Ok(after);
        }

        if let Err(e) = self.enqueue_stage(&after) {
            warn!(pipeline_id, error = %e, "Failed to enqueue stage job");
            self.fail_pipeline(pipeline_id, target, &e.to_string()).await?;
            return Err(e);
        }
        Ok(after)
    }

    /// Re-run the current stage. Used after automatic retries are exhausted;
    /// a FAILED pipeline goes back to IN_PROGRESS.
    pub async fn retry_stage(&self, pipeline_id: &str) -> Result<Pipeline, OrchestratorError> {
        let (_, after) = self.mutate(pipeline_id, |p| {
            apply_retry(p, Utc::now())?;
            Ok(true)
        })?;
        info!(pipeline_id, stage = %after.current_stage, "Stage retried");
        metrics::PIPELINE_OUTCOMES.with_label_values(&["retried"]).inc();

        self.enqueue_stage(&after)?;
        self.emit(DomainEvent::StageRetried {
            pipeline_id: after.id.clone(),
            brand_id: after.brand_id.clone(),
            stage: after.current_stage,
        })
        .await;
        Ok(after)
    }

    /// Re-open a FAILED pipeline whose failed stage job was moved back to
    /// waiting by an operator. The job itself carries on, so nothing is
    /// enqueued. `None` when the pipeline is no longer failed at `stage`.
    pub async fn reopen_failed_stage(
        &self,
        pipeline_id: &str,
        stage: PipelineStage,
    ) -> Result<Option<Pipeline>, OrchestratorError> {
        let (before, after) = self.mutate(pipeline_id, |p| {
            if p.status != PipelineStatus::Failed || p.current_stage != stage {
                return Ok(false);
            }
            apply_retry(p, Utc::now())?;
            Ok(true)
        })?;
        if before.version == after.version {
            return Ok(None);
        }
        info!(pipeline_id, stage = %stage, "Failed stage reopened by job retry");
        metrics::PIPELINE_OUTCOMES.with_label_values(&["retried"]).inc();
        self.emit(DomainEvent::StageRetried {
            pipeline_id: after.id.clone(),
            brand_id: after.brand_id.clone(),
            stage,
        })
        .await;
        Ok(Some(after))
    }

    /// Stop the pipeline. An unshipped fulfillment is cancelled with its
    /// provider; a provider failure is logged and does not fail the call.
    /// In-flight stage jobs notice the cancellation and become no-ops.
    pub async fn cancel_pipeline(
        &self,
        pipeline_id: &str,
        reason: &str,
    ) -> Result<CancelPipelineResult, OrchestratorError> {
        let (before, after) = self.mutate(pipeline_id, |p| {
            if p.status == PipelineStatus::Cancelled {
                return Ok(false);
            }
            apply_cancel(p, reason, Utc::now())?;
            Ok(true)
        })?;
        if before.version == after.version {
            return Ok(CancelPipelineResult {
                pipeline: after,
                provider_cancelled: None,
                provider_message: None,
            });
        }
        info!(pipeline_id, reason, "Pipeline cancelled");
        metrics::PIPELINE_OUTCOMES.with_label_values(&["cancelled"]).inc();

        let (provider_cancelled, provider_message) =
            match self.fulfillments.cancel_for_pipeline(pipeline_id, reason).await {
                Ok(Some(result)) => (Some(result.provider_cancelled), result.provider_message),
                Ok(None) => (None, None),
                Err(e) => {
                    warn!(pipeline_id, error = %e, "Fulfillment cancellation failed; pipeline stays cancelled");
                    (Some(false), Some(e.to_string()))
                }
            };

        self.emit(DomainEvent::PipelineCancelled {
            pipeline_id: after.id.clone(),
            brand_id: after.brand_id.clone(),
            reason: reason.to_string(),
        })
        .await;

        Ok(CancelPipelineResult {
            pipeline: after,
            provider_cancelled,
            provider_message,
        })
    }

    /// Record a stage failure and stop the pipeline until someone retries it.
    pub async fn fail_pipeline(
        &self,
        pipeline_id: &str,
        stage: PipelineStage,
        message: &str,
    ) -> Result<Pipeline, OrchestratorError> {
        let (_, after) = self.mutate(pipeline_id, |p| {
            apply_failure(p, stage, message, Utc::now())?;
            Ok(true)
        })?;
        warn!(pipeline_id, stage = %stage, error = message, "Pipeline failed");
        metrics::PIPELINE_OUTCOMES.with_label_values(&["failed"]).inc();
        self.emit(DomainEvent::PipelineFailed {
            pipeline_id: after.id.clone(),
            brand_id: after.brand_id.clone(),
            stage,
            error: message.to_string(),
        })
        .await;
        Ok(after)
    }

    /// Store rendered files. Not a stage change.
    pub fn record_artifacts(
        &self,
        pipeline_id: &str,
        artifacts: &[RenderedArtifact],
    ) -> Result<(), OrchestratorError> {
        self.pipelines.record_artifacts(pipeline_id, artifacts)?;
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    pub(super) fn stage_job(p: &Pipeline) -> StageJob {
        let attempt = p
            .stage_history
            .iter()
            .filter(|entry| entry.stage == p.current_stage)
            .count()
            .max(1) as u32;
        StageJob {
            pipeline_id: p.id.clone(),
            order_id: p.order_id.clone(),
            brand_id: p.brand_id.clone(),
            stage: p.current_stage,
            attempt,
            options: p.options.clone(),
        }
    }

    fn enqueue_stage(&self, p: &Pipeline) -> Result<(), OrchestratorError> {
        let Some(queue) = queue_for_stage(p.current_stage) else {
            return Ok(());
        };
        let payload = serde_json::to_value(Self::stage_job(p))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let job_id = self.queue.enqueue(queue, &payload, EnqueueOptions::default())?;
        debug!(pipeline_id = %p.id, queue, job_id = %job_id, "Stage job enqueued");
        Ok(())
    }

    /// Load, apply, compare-and-swap; reload and re-apply on conflict.
    /// `apply` returns whether it changed anything. Returns (before, after).
    fn mutate<F>(&self, pipeline_id: &str, mut apply: F) -> Result<(Pipeline, Pipeline), OrchestratorError>
    where
        F: FnMut(&mut Pipeline) -> Result<bool, TransitionError>,
    {
        let attempts = self.config.max_conflict_retries.max(1);
        for _ in 0..attempts {
            let current = self
                .pipelines
                .get(pipeline_id)?
                .ok_or_else(|| OrchestratorError::NotFound(format!("pipeline {}", pipeline_id)))?;
            let mut next = current.clone();
            if !apply(&mut next)? {
                return Ok((current.clone(), current));
            }
            match self.pipelines.update(&next) {
                Ok(stored) => return Ok((current, stored)),
                Err(StoreError::Conflict(_)) => {
                    metrics::VERSION_CONFLICTS.inc();
                    debug!(pipeline_id, "Pipeline version conflict, reloading");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrchestratorError::ConcurrencyConflict(format!(
            "pipeline {}",
            pipeline_id
        )))
    }

    async fn emit(&self, event: DomainEvent) {
        if let Some(ref events) = self.events {
            events.emit(event).await;
        }
    }
}
