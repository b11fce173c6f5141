//! Queue consumers: stage workers and the webhook worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::OrchestratorConfig;
use super::jobs::{StageJob, WebhookJob, STAGE_QUEUES, WEBHOOK_QUEUE};
use super::runner::PipelineOrchestrator;
use super::stages::{StageError, StageExecutor, StageResult};
use super::types::OrchestratorError;
use super::webhooks::WebhookIngest;
use crate::metrics;
use crate::pipeline::PipelineStatus;
use crate::queue::{FailOutcome, JobQueue, QueueError, QueueJob};

/// What a worker did with one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The job no longer matched its pipeline and was dropped.
    Skipped,
    Waiting(Duration),
    Retrying { attempt: u32 },
    Exhausted,
    DeadLettered,
}

impl JobOutcome {
    fn label(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Skipped => "skipped",
            JobOutcome::Waiting(_) => "waiting",
            JobOutcome::Retrying { .. } => "retrying",
            JobOutcome::Exhausted => "exhausted",
            JobOutcome::DeadLettered => "dead_lettered",
        }
    }
}

/// Reserves and handles single jobs. Shared by every worker task.
pub struct JobProcessor {
    orchestrator: Arc<PipelineOrchestrator>,
    executor: Arc<StageExecutor>,
    webhooks: Arc<WebhookIngest>,
    queue: Arc<dyn JobQueue>,
    visibility: Duration,
}

impl JobProcessor {
    pub fn new(
        orchestrator: Arc<PipelineOrchestrator>,
        executor: Arc<StageExecutor>,
        webhooks: Arc<WebhookIngest>,
        visibility: Duration,
    ) -> Self {
        let queue = Arc::clone(&orchestrator.queue);
        Self {
            orchestrator,
            executor,
            webhooks,
            queue,
            visibility,
        }
    }

    /// Reserve and handle one job from `queue`. `None` when nothing is runnable.
    pub async fn process_next(&self, queue: &str) -> Result<Option<JobOutcome>, QueueError> {
        let Some(job) = self.queue.reserve(queue, self.visibility)? else {
            return Ok(None);
        };
        let handled = if queue == WEBHOOK_QUEUE {
            self.handle_webhook(&job).await
        } else {
            self.handle_stage(&job).await
        };
        let outcome = match handled {
            Ok(outcome) => outcome,
            // Another worker reclaimed the job after our visibility timeout.
            Err(QueueError::LeaseLost(_)) => {
                warn!(job_id = %job.id, queue, "Job was reclaimed while running; result discarded");
                JobOutcome::Skipped
            }
            Err(e) => return Err(e),
        };
        metrics::QUEUE_JOBS
            .with_label_values(&[queue, outcome.label()])
            .inc();
        Ok(Some(outcome))
    }

    /// Handle jobs until the queue has nothing runnable. Returns how many ran.
    pub async fn drain(&self, queue: &str) -> Result<usize, QueueError> {
        let mut handled = 0;
        while self.process_next(queue).await?.is_some() {
            handled += 1;
        }
        Ok(handled)
    }

    async fn handle_stage(&self, job: &QueueJob) -> Result<JobOutcome, QueueError> {
        let stage_job: StageJob = match job.decode() {
            Ok(j) => j,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Undecodable stage job");
                self.queue.dead_letter(job, &e.to_string())?;
                return Ok(JobOutcome::DeadLettered);
            }
        };

        let pipeline = match self.orchestrator.pipelines.get(&stage_job.pipeline_id) {
            Ok(Some(p)) => p,
            Ok(None) => {
                warn!(pipeline_id = %stage_job.pipeline_id, "Stage job for unknown pipeline");
                self.queue.complete(job)?;
                return Ok(JobOutcome::Skipped);
            }
            Err(e) => return self.retry(job, &e.to_string()),
        };

        // A dead-lettered job moved back by an operator resumes its stage.
        let pipeline = if pipeline.status == PipelineStatus::Failed
            && pipeline.current_stage == stage_job.stage
        {
            match self
                .orchestrator
                .reopen_failed_stage(&pipeline.id, stage_job.stage)
                .await
            {
                Ok(Some(reopened)) => reopened,
                Ok(None) => pipeline,
                Err(e) => return self.retry(job, &e.to_string()),
            }
        } else {
            pipeline
        };

        // Cancelled, failed, or moved on since this job was queued.
        if pipeline.status != PipelineStatus::InProgress || pipeline.current_stage != stage_job.stage {
            debug!(
                pipeline_id = %pipeline.id,
                job_stage = %stage_job.stage,
                current_stage = %pipeline.current_stage,
                status = %pipeline.status,
                "Stale stage job dropped"
            );
            self.queue.complete(job)?;
            return Ok(JobOutcome::Skipped);
        }

        debug!(
            pipeline_id = %pipeline.id,
            stage = %stage_job.stage,
            attempt = job.attempts,
            "Running stage"
        );
        let started = Instant::now();
        let result = self.executor.execute(&pipeline, &stage_job).await;
        debug!(
            pipeline_id = %pipeline.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stage work finished"
        );

        match result {
            Ok(StageResult::Advance) => {
                let Some(next) = stage_job.stage.next() else {
                    self.queue.complete(job)?;
                    return Ok(JobOutcome::Skipped);
                };
                match self
                    .orchestrator
                    .advance_stage(&pipeline.id, next, "worker")
                    .await
                {
                    Ok(_) => {
                        self.queue.complete(job)?;
                        Ok(JobOutcome::Completed)
                    }
                    Err(OrchestratorError::InvalidTransition(msg)) | Err(OrchestratorError::NotFound(msg)) => {
                        debug!(pipeline_id = %pipeline.id, reason = %msg, "Advance no longer applies");
                        self.queue.complete(job)?;
                        Ok(JobOutcome::Skipped)
                    }
                    Err(e) => self.retry(job, &e.to_string()),
                }
            }
            Ok(StageResult::Wait(delay)) => {
                debug!(pipeline_id = %pipeline.id, delay_secs = delay.as_secs(), "Stage waiting");
                self.queue.reschedule(job, delay)?;
                Ok(JobOutcome::Waiting(delay))
            }
            Err(StageError::Cancelled) => {
                info!(pipeline_id = %pipeline.id, "Pipeline cancelled during stage work");
                self.queue.complete(job)?;
                Ok(JobOutcome::Skipped)
            }
            Err(StageError::Transient(msg)) => {
                let outcome = self.retry(job, &msg)?;
                if outcome == JobOutcome::Exhausted {
                    self.fail_pipeline(&stage_job, &msg).await;
                }
                Ok(outcome)
            }
            Err(StageError::Rejected(msg)) => {
                self.queue.dead_letter(job, &msg)?;
                self.fail_pipeline(&stage_job, &msg).await;
                Ok(JobOutcome::DeadLettered)
            }
        }
    }

    async fn handle_webhook(&self, job: &QueueJob) -> Result<JobOutcome, QueueError> {
        let webhook: WebhookJob = match job.decode() {
            Ok(w) => w,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Undecodable webhook job");
                self.queue.dead_letter(job, &e.to_string())?;
                return Ok(JobOutcome::DeadLettered);
            }
        };
        match self.webhooks.process(webhook).await {
            Ok(()) => {
                self.queue.complete(job)?;
                Ok(JobOutcome::Completed)
            }
            Err(e) => self.retry(job, &e.to_string()),
        }
    }

    fn retry(&self, job: &QueueJob, error: &str) -> Result<JobOutcome, QueueError> {
        match self.queue.fail(job, error)? {
            FailOutcome::Retrying { attempt, retry_in } => {
                warn!(
                    job_id = %job.id,
                    queue = %job.queue,
                    attempt,
                    retry_in_ms = retry_in.as_millis() as u64,
                    error,
                    "Job failed, retrying"
                );
                Ok(JobOutcome::Retrying { attempt })
            }
            FailOutcome::Exhausted { attempts } => {
                warn!(job_id = %job.id, queue = %job.queue, attempts, error, "Job attempts exhausted");
                Ok(JobOutcome::Exhausted)
            }
        }
    }

    async fn fail_pipeline(&self, job: &StageJob, message: &str) {
        if let Err(e) = self
            .orchestrator
            .fail_pipeline(&job.pipeline_id, job.stage, message)
            .await
        {
            warn!(pipeline_id = %job.pipeline_id, error = %e, "Could not mark pipeline failed");
        }
    }
}

/// Background worker tasks: `workers_per_queue` per stage queue plus the
/// webhook queue.
pub struct StageWorkers {
    processor: Arc<JobProcessor>,
    config: OrchestratorConfig,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl StageWorkers {
    pub fn new(processor: Arc<JobProcessor>, config: OrchestratorConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            processor,
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub async fn start(&self) {
        if !self.config.enabled {
            info!("Stage workers disabled");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Stage workers already running");
            return;
        }

        let poll = Duration::from_millis(self.config.poll_interval_ms.max(10));
        let mut handles = self.handles.lock().await;
        for queue in STAGE_QUEUES.iter().copied().chain(std::iter::once(WEBHOOK_QUEUE)) {
            for worker in 0..self.config.workers_per_queue {
                handles.push(self.spawn_worker(queue, worker, poll));
            }
        }
        info!(
            queues = STAGE_QUEUES.len() + 1,
            workers_per_queue = self.config.workers_per_queue,
            "Stage workers started"
        );
    }

    fn spawn_worker(&self, queue: &'static str, worker: usize, poll: Duration) -> JoinHandle<()> {
        let processor = Arc::clone(&self.processor);
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!(queue, worker, "Worker started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                    _ = tokio::time::sleep(poll) => {
                        while running.load(Ordering::Relaxed) {
                            match processor.process_next(queue).await {
                                // A waiting job went back to the delayed set; pause before the next poll.
                                Ok(Some(JobOutcome::Waiting(_))) | Ok(None) => break,
                                Ok(Some(_)) => continue,
                                Err(e) => {
                                    warn!(queue, error = %e, "Worker poll failed");
                                    break;
                                }
                            }
                        }
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                    }
                }
            }
            debug!(queue, worker, "Worker stopped");
        })
    }

    /// Signal every worker and wait for in-flight jobs to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Stage workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulfillment::FulfillmentStatus;
    use crate::orchestrator::{PIPELINE_QUEUE, RENDER_QUEUE};
    use crate::order::PaymentStatus;
    use crate::pipeline::{PipelineOptions, PipelineStage};
    use crate::render::RenderError;
    use crate::testing::{fixtures, TestEngine};

    #[tokio::test]
    async fn test_pipeline_runs_to_completion() {
        let engine = TestEngine::new().unwrap();
        let created = engine.submit("o1", "b1").await.unwrap();

        engine.run_until_idle().await;
        let p = engine.pipeline(&created.pipeline_id).unwrap();
        assert_eq!(p.current_stage, PipelineStage::Fulfillment);
        assert_eq!(p.status, PipelineStatus::InProgress);

        let external_id = engine.provider.created_orders()[0].external_order_id.clone();
        engine.provider.set_order_status(
            &external_id,
            FulfillmentStatus::Shipped,
            Some(fixtures::shipment("UPS", "1Z100")),
        );
        engine.run_until_idle().await;
        assert_eq!(
            engine.pipeline(&created.pipeline_id).unwrap().current_stage,
            PipelineStage::Shipped
        );

        engine
            .provider
            .set_order_status(&external_id, FulfillmentStatus::Delivered, None);
        engine.run_until_idle().await;
        let p = engine.pipeline(&created.pipeline_id).unwrap();
        assert_eq!(p.status, PipelineStatus::Completed);
        assert_eq!(p.current_stage, PipelineStage::Delivered);
        assert_eq!(engine.provider.create_count(), 1);
    }

    #[tokio::test]
    async fn test_rejection_dead_letters_and_fails() {
        let engine = TestEngine::new().unwrap();
        let mut order = fixtures::order("o1", "b1");
        order.payment_status = PaymentStatus::Refunded;
        let created = engine
            .submit_order(&order, PipelineOptions::default())
            .await
            .unwrap();

        let outcome = engine.processor.process_next(PIPELINE_QUEUE).await.unwrap();
        assert_eq!(outcome, Some(JobOutcome::DeadLettered));

        let p = engine.pipeline(&created.pipeline_id).unwrap();
        assert_eq!(p.status, PipelineStatus::Failed);
        assert_eq!(p.current_stage, PipelineStage::Validation);
        assert!(p.last_error().unwrap().message.contains("not paid"));
        assert_eq!(engine.queue.counts(PIPELINE_QUEUE).unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_exhausted_transient_fails_then_retry_recovers() {
        let engine = TestEngine::new().unwrap();
        for _ in 0..3 {
            engine
                .renderer
                .fail_next(RenderError::Transient("render farm busy".into()));
        }
        let created = engine.submit("o1", "b1").await.unwrap();

        engine.run_until_idle().await;
        let p = engine.pipeline(&created.pipeline_id).unwrap();
        assert_eq!(p.status, PipelineStatus::Failed);
        assert_eq!(p.current_stage, PipelineStage::Render);
        assert_eq!(engine.queue.counts(RENDER_QUEUE).unwrap().failed, 1);

        engine
            .orchestrator
            .retry_stage(&created.pipeline_id)
            .await
            .unwrap();
        engine.run_until_idle().await;
        let p = engine.pipeline(&created.pipeline_id).unwrap();
        assert_eq!(p.status, PipelineStatus::InProgress);
        assert_eq!(p.current_stage, PipelineStage::Fulfillment);
    }

    #[tokio::test]
    async fn test_jobs_for_cancelled_pipeline_are_skipped() {
        let engine = TestEngine::new().unwrap();
        let created = engine.submit("o1", "b1").await.unwrap();
        engine
            .orchestrator
            .cancel_pipeline(&created.pipeline_id, "customer changed mind")
            .await
            .unwrap();

        let outcome = engine.processor.process_next(PIPELINE_QUEUE).await.unwrap();
        assert_eq!(outcome, Some(JobOutcome::Skipped));
        assert_eq!(engine.run_until_idle().await, 0);
        assert_eq!(engine.provider.create_count(), 0);
        assert_eq!(
            engine.pipeline(&created.pipeline_id).unwrap().status,
            PipelineStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_reclaimed_job_is_settled_by_its_new_holder_only() {
        let engine = TestEngine::new().unwrap();
        let created = engine.submit("o1", "b1").await.unwrap();

        let slow = engine
            .queue
            .reserve(PIPELINE_QUEUE, Duration::from_millis(1))
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let current = engine
            .queue
            .reserve(PIPELINE_QUEUE, Duration::from_secs(30))
            .unwrap()
            .unwrap();
        assert_eq!(current.id, slow.id);

        // The slow worker finishes its stage but can no longer settle the job.
        let late = engine.processor.handle_stage(&slow).await;
        assert!(matches!(late, Err(QueueError::LeaseLost(_))));
        assert_eq!(
            engine.pipeline(&created.pipeline_id).unwrap().current_stage,
            PipelineStage::Render
        );

        let outcome = engine.processor.handle_stage(&current).await.unwrap();
        assert_eq!(outcome, JobOutcome::Skipped);
        let counts = engine.queue.counts(PIPELINE_QUEUE).unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.active, 0);
    }

    #[tokio::test]
    async fn test_background_workers_advance_pipelines() {
        let engine = TestEngine::new().unwrap();
        let config = OrchestratorConfig {
            poll_interval_ms: 10,
            workers_per_queue: 2,
            ..Default::default()
        };
        let workers = StageWorkers::new(engine.processor.clone(), config);
        let created = engine.submit("o1", "b1").await.unwrap();

        workers.start().await;
        assert!(workers.is_running());
        let reached = engine
            .eventually(|| {
                engine
                    .pipeline(&created.pipeline_id)
                    .map(|p| p.current_stage == PipelineStage::Fulfillment)
                    .unwrap_or(false)
            })
            .await;
        workers.stop().await;

        assert!(reached);
        assert!(!workers.is_running());
        assert_eq!(engine.provider.create_count(), 1);
    }
}
