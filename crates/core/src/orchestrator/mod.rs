//! Pipeline orchestrator: drives orders through the stage state machine.
//!
//! - [`PipelineOrchestrator`] owns every pipeline write (create, advance,
//!   retry, fail, cancel) and enqueues the job for each stage it enters.
//! - [`StageExecutor`] performs the external work of a stage.
//! - [`StageWorkers`] consume the stage queues and the webhook queue.
//! - [`WebhookIngest`] verifies inbound webhooks and queues them.

mod config;
mod dashboard;
mod jobs;
mod runner;
mod stages;
mod types;
mod webhooks;
mod workers;

pub use config::OrchestratorConfig;
pub use dashboard::{Alert, AlertKind, Dashboard};
pub use jobs::{
    all_queue_names, queue_for_stage, StageJob, WebhookJob, FULFILLMENT_QUEUE,
    MANUFACTURING_QUEUE, PIPELINE_QUEUE, RENDER_QUEUE, SHIPPING_QUEUE, STAGE_QUEUES,
    WEBHOOK_QUEUE,
};
pub use runner::PipelineOrchestrator;
pub use stages::{StageError, StageExecutor, StageResult};
pub use types::*;
pub use webhooks::{IngestOutcome, WebhookIngest, TRACKING_SIGNATURE_HEADER};
pub use workers::{JobOutcome, JobProcessor, StageWorkers};
