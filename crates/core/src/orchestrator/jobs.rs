//! Queue names and job payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::{PipelineOptions, PipelineStage};
use crate::provider::ProviderSlug;

/// VALIDATION; the entry queue for every pipeline.
pub const PIPELINE_QUEUE: &str = "pce:pipeline";
pub const RENDER_QUEUE: &str = "pce:render";
pub const MANUFACTURING_QUEUE: &str = "pce:manufacturing";
pub const FULFILLMENT_QUEUE: &str = "pce:fulfillment";
/// Watches shipped orders until delivery.
pub const SHIPPING_QUEUE: &str = "pce:shipping";
pub const WEBHOOK_QUEUE: &str = "pce:webhooks";

pub const STAGE_QUEUES: [&str; 5] = [
    PIPELINE_QUEUE,
    RENDER_QUEUE,
    MANUFACTURING_QUEUE,
    FULFILLMENT_QUEUE,
    SHIPPING_QUEUE,
];

/// Every queue the orchestrator owns.
pub fn all_queue_names() -> Vec<&'static str> {
    STAGE_QUEUES
        .iter()
        .copied()
        .chain(std::iter::once(WEBHOOK_QUEUE))
        .collect()
}

/// `None` for DELIVERED, which has no work.
pub fn queue_for_stage(stage: PipelineStage) -> Option<&'static str> {
    match stage {
        PipelineStage::Validation => Some(PIPELINE_QUEUE),
        PipelineStage::Render => Some(RENDER_QUEUE),
        PipelineStage::Manufacturing => Some(MANUFACTURING_QUEUE),
        PipelineStage::Fulfillment => Some(FULFILLMENT_QUEUE),
        PipelineStage::Shipped => Some(SHIPPING_QUEUE),
        PipelineStage::Delivered => None,
    }
}

/// Payload of a stage job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageJob {
    pub pipeline_id: String,
    pub order_id: String,
    pub brand_id: String,
    pub stage: PipelineStage,
    /// How many times this stage has been entered, 1 on the first run.
    pub attempt: u32,
    #[serde(default)]
    pub options: PipelineOptions,
}

/// Payload of a webhook job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum WebhookJob {
    /// Carrier tracking payload.
    Tracking { payload: Value },
    /// Manufacturing provider payload, signature already checked.
    Provider {
        provider: ProviderSlug,
        payload: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_working_stage_has_a_queue() {
        for stage in PipelineStage::ALL {
            assert_eq!(queue_for_stage(stage).is_none(), stage.is_terminal());
        }
        assert_eq!(all_queue_names().len(), 6);
    }

    #[test]
    fn test_stage_job_wire_shape() {
        let job = StageJob {
            pipeline_id: "p1".into(),
            order_id: "o1".into(),
            brand_id: "b1".into(),
            stage: PipelineStage::Render,
            attempt: 1,
            options: PipelineOptions::default(),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["pipelineId"], "p1");
        assert_eq!(value["stage"], "RENDER");
        assert_eq!(value["attempt"], 1);
    }

    #[test]
    fn test_webhook_job_tagging() {
        let job: WebhookJob = serde_json::from_value(json!({
            "source": "provider",
            "provider": "gelato",
            "payload": {"event": "order_status_updated"}
        }))
        .unwrap();
        assert!(matches!(
            job,
            WebhookJob::Provider {
                provider: ProviderSlug::Gelato,
                ..
            }
        ));
    }
}
