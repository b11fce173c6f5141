//! The whole orchestration stack wired against in-memory SQLite and mocks.

use std::sync::Arc;
use std::time::Duration;

use crate::events::{create_event_system, EventHandle, EventLogWriter, SqliteEventLog};
use crate::fulfillment::{
    Fulfillment, FulfillmentFilter, FulfillmentService, FulfillmentStore, SqliteFulfillmentStore,
};
use crate::orchestrator::{
    all_queue_names, JobOutcome, JobProcessor, OrchestratorConfig, OrchestratorError,
    PipelineOrchestrator, ProcessOrderResult, StageExecutor, WebhookIngest,
};
use crate::order::{OrderSnapshot, OrderStore, SqliteOrderStore};
use crate::pipeline::{Pipeline, PipelineOptions, PipelineStore, SqlitePipelineStore};
use crate::provider::{ProviderRegistry, ProviderSlug};
use crate::queue::{JobQueue, QueueManager, RetryPolicy, SqliteJobQueue};
use crate::returns::{ReturnService, SqliteReturnStore};
use crate::storage::StoreError;
use crate::tracking::{TrackingService, TrackingUpdateHandler};

use super::{fixtures, MockProvider, MockRenderer, MOCK_TRACKING_SECRET};

/// Everything a scenario test needs, with handles to every collaborator.
///
/// Jobs are never picked up in the background; tests drive the queues with
/// [`TestEngine::run_until_idle`]. Waiting stages poll with no delay so a
/// scenario can advance as soon as the mock provider changes state.
///
/// Must be created inside a Tokio runtime: the event dispatcher is spawned.
pub struct TestEngine {
    pub pipelines: Arc<SqlitePipelineStore>,
    pub orders: Arc<SqliteOrderStore>,
    pub fulfillment_store: Arc<SqliteFulfillmentStore>,
    pub queue: Arc<SqliteJobQueue>,
    pub queues: Arc<QueueManager>,
    pub provider: Arc<MockProvider>,
    pub providers: Arc<ProviderRegistry>,
    pub renderer: Arc<MockRenderer>,
    pub tracking: Arc<TrackingService>,
    pub fulfillments: Arc<FulfillmentService>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub webhooks: Arc<WebhookIngest>,
    pub processor: Arc<JobProcessor>,
    pub returns: Arc<ReturnService>,
    pub event_log: Arc<SqliteEventLog>,
    pub events: EventHandle,
}

impl TestEngine {
    pub fn new() -> Result<Self, StoreError> {
        let policy = RetryPolicy::default()
            .with_max_attempts(3)
            .with_initial_backoff(Duration::ZERO);
        let config = OrchestratorConfig {
            fulfillment_poll_secs: 0,
            delivery_poll_secs: 0,
            ..Default::default()
        };
        Self::with_config(config, policy)
    }

    pub fn with_config(config: OrchestratorConfig, policy: RetryPolicy) -> Result<Self, StoreError> {
        let pipelines = Arc::new(SqlitePipelineStore::in_memory()?);
        let orders = Arc::new(SqliteOrderStore::in_memory()?);
        let fulfillment_store = Arc::new(SqliteFulfillmentStore::in_memory()?);
        let visibility = policy.visibility_timeout();
        let queue = Arc::new(
            SqliteJobQueue::in_memory(policy).map_err(|e| StoreError::Database(e.to_string()))?,
        );
        let queues = Arc::new(QueueManager::new(queue.clone(), all_queue_names()));
        let event_log = Arc::new(SqliteEventLog::in_memory()?);

        let (events, mut dispatcher) = create_event_system(1024);
        dispatcher.add_handler(Arc::new(EventLogWriter::new(event_log.clone())));

        let provider = Arc::new(MockProvider::new(ProviderSlug::Printful));
        let providers =
            Arc::new(ProviderRegistry::new(ProviderSlug::Printful).with_provider(provider.clone()));
        let renderer = Arc::new(MockRenderer::new());

        let tracking = Arc::new(
            TrackingService::new(fulfillment_store.clone()).with_events(events.clone()),
        );
        let fulfillments = Arc::new(
            FulfillmentService::new(
                fulfillment_store.clone(),
                pipelines.clone(),
                orders.clone(),
                providers.clone(),
            )
            .with_tracking(tracking.clone())
            .with_events(events.clone()),
        );
        dispatcher.add_handler(Arc::new(TrackingUpdateHandler::new(fulfillments.clone())));
        tokio::spawn(dispatcher.run());

        let orchestrator = Arc::new(
            PipelineOrchestrator::new(
                config.clone(),
                pipelines.clone(),
                queue.clone(),
                fulfillments.clone(),
            )
            .with_events(events.clone()),
        );
        let executor = Arc::new(StageExecutor::new(
            &config,
            orders.clone(),
            renderer.clone(),
            fulfillments.clone(),
            pipelines.clone(),
        ));
        let webhooks = Arc::new(
            WebhookIngest::new(
                queue.clone(),
                providers.clone(),
                tracking.clone(),
                fulfillments.clone(),
                true,
            )
            .with_tracking_secret(Some(MOCK_TRACKING_SECRET.to_string())),
        );
        let processor = Arc::new(JobProcessor::new(
            orchestrator.clone(),
            executor,
            webhooks.clone(),
            visibility,
        ));
        let returns = Arc::new(
            ReturnService::new(Arc::new(SqliteReturnStore::in_memory()?), orders.clone())
                .with_events(events.clone()),
        );

        Ok(Self {
            pipelines,
            orders,
            fulfillment_store,
            queue,
            queues,
            provider,
            providers,
            renderer,
            tracking,
            fulfillments,
            orchestrator,
            webhooks,
            processor,
            returns,
            event_log,
            events,
        })
    }

    /// Record a paid fixture order and start its pipeline.
    pub async fn submit(
        &self,
        order_id: &str,
        brand_id: &str,
    ) -> Result<ProcessOrderResult, OrchestratorError> {
        self.submit_order(&fixtures::order(order_id, brand_id), PipelineOptions::default())
            .await
    }

    pub async fn submit_order(
        &self,
        order: &OrderSnapshot,
        options: PipelineOptions,
    ) -> Result<ProcessOrderResult, OrchestratorError> {
        self.orders.record(order)?;
        self.orchestrator
            .process_order(&order.order_id, &order.brand_id, options)
            .await
    }

    /// Handle queued jobs until a full pass over every queue does nothing
    /// but wait. Returns the number of jobs that made progress.
    pub async fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let mut progressed = 0;
            for queue in all_queue_names() {
                loop {
                    match self.processor.process_next(queue).await {
                        Ok(Some(JobOutcome::Waiting(_))) | Ok(None) => break,
                        Ok(Some(_)) => progressed += 1,
                        Err(e) => {
                            tracing::warn!(queue, error = %e, "Test engine poll failed");
                            break;
                        }
                    }
                }
            }
            if progressed == 0 {
                return total;
            }
            total += progressed;
        }
    }

    pub fn pipeline(&self, pipeline_id: &str) -> Option<Pipeline> {
        self.pipelines.get(pipeline_id).ok().flatten()
    }

    /// The pipeline's newest fulfillment, cancelled ones included.
    pub fn fulfillment_for(&self, pipeline_id: &str) -> Option<Fulfillment> {
        let filter = FulfillmentFilter::default().with_pipeline(pipeline_id);
        self.fulfillment_store
            .list(&filter)
            .ok()
            .and_then(|list| list.into_iter().next())
    }

    /// Poll `check` until it holds or a second passes. Event handlers run
    /// on the dispatcher task, so their effects land asynchronously.
    pub async fn eventually<F>(&self, mut check: F) -> bool
    where
        F: FnMut() -> bool,
    {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }
}
