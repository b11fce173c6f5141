//! Pipeline orchestration for print-on-demand order fulfillment.
//!
//! An order becomes a [`Pipeline`] that moves through a fixed sequence of
//! stages, each backed by a durable job queue. Manufacturing is delegated to
//! pluggable [`PodProvider`]s; shipment state arrives through provider and
//! carrier webhooks, polling, and operator actions.

pub mod auth;
pub mod config;
pub mod events;
pub mod fulfillment;
pub mod metrics;
pub mod orchestrator;
pub mod order;
pub mod pipeline;
pub mod provider;
pub mod queue;
pub mod render;
pub mod returns;
pub mod storage;
pub mod testing;
pub mod tracking;

pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, AuthRequest, Authenticator,
    GatewayAuthenticator, Identity,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthConfig, AuthMethod, Config,
    ConfigError, LogFormat, SanitizedConfig,
};
pub use events::{
    create_event_system, DomainEvent, EventDispatcher, EventEnvelope, EventFilter, EventHandle,
    EventHandler, EventLog, EventLogWriter, EventRecord, SqliteEventLog,
};
pub use fulfillment::{
    Fulfillment, FulfillmentError, FulfillmentFilter, FulfillmentService, FulfillmentStatus,
    FulfillmentStore, SqliteFulfillmentStore,
};
pub use orchestrator::{
    Dashboard, IngestOutcome, JobProcessor, OrchestratorConfig, OrchestratorError,
    PipelineOrchestrator, StageExecutor, StageWorkers, WebhookIngest,
    TRACKING_SIGNATURE_HEADER,
};
pub use order::{OrderSnapshot, OrderStore, SqliteOrderStore};
pub use pipeline::{
    Pipeline, PipelineFilter, PipelineOptions, PipelineStage, PipelineStatus, PipelineStore,
    SqlitePipelineStore,
};
pub use provider::{PodProvider, ProviderError, ProviderRegistry, ProviderSlug};
pub use queue::{JobQueue, QueueError, QueueManager, RetryPolicy, SqliteJobQueue};
pub use render::{HttpRenderer, PassthroughRenderer, Renderer};
pub use returns::{ReturnError, ReturnService, ReturnStatus, SqliteReturnStore};
pub use storage::StoreError;
pub use tracking::{TrackingService, TrackingSweeper, TrackingUpdateHandler};
