use std::sync::Arc;

use pce_core::{
    Authenticator, Config, EventLog, FulfillmentService, OrderStore, PipelineOrchestrator,
    PipelineStore, QueueManager, ReturnService, SanitizedConfig, TrackingService, WebhookIngest,
};

/// Domain services the handlers talk to.
#[derive(Clone)]
pub struct Services {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub pipelines: Arc<dyn PipelineStore>,
    pub queues: Arc<QueueManager>,
    pub orders: Arc<dyn OrderStore>,
    pub fulfillments: Arc<FulfillmentService>,
    pub tracking: Arc<TrackingService>,
    pub returns: Arc<ReturnService>,
    pub webhooks: Arc<WebhookIngest>,
    pub event_log: Arc<dyn EventLog>,
}

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    services: Services,
}

impl AppState {
    pub fn new(config: Config, authenticator: Arc<dyn Authenticator>, services: Services) -> Self {
        Self {
            config,
            authenticator,
            services,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn orchestrator(&self) -> &PipelineOrchestrator {
        &self.services.orchestrator
    }

    pub fn pipelines(&self) -> &dyn PipelineStore {
        self.services.pipelines.as_ref()
    }

    pub fn queues(&self) -> &QueueManager {
        &self.services.queues
    }

    pub fn orders(&self) -> &dyn OrderStore {
        self.services.orders.as_ref()
    }

    pub fn fulfillments(&self) -> &FulfillmentService {
        &self.services.fulfillments
    }

    pub fn tracking(&self) -> &TrackingService {
        &self.services.tracking
    }

    pub fn returns(&self) -> &ReturnService {
        &self.services.returns
    }

    pub fn webhooks(&self) -> &WebhookIngest {
        &self.services.webhooks
    }

    pub fn event_log(&self) -> &dyn EventLog {
        self.services.event_log.as_ref()
    }
}

impl Services {
    /// Services backed by an in-memory test engine.
    pub fn from_engine(engine: &pce_core::testing::TestEngine) -> Self {
        Self {
            orchestrator: engine.orchestrator.clone(),
            pipelines: engine.pipelines.clone(),
            queues: engine.queues.clone(),
            orders: engine.orders.clone(),
            fulfillments: engine.fulfillments.clone(),
            tracking: engine.tracking.clone(),
            returns: engine.returns.clone(),
            webhooks: engine.webhooks.clone(),
            event_log: engine.event_log.clone(),
        }
    }
}
