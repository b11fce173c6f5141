use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fulfillment::FulfillmentStatus;
use crate::pipeline::PipelineStage;

/// Everything the subsystem announces to downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEvent {
    // System events
    ServiceStarted {
        version: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Pipeline lifecycle
    PipelineCreated {
        pipeline_id: String,
        order_id: String,
        brand_id: String,
    },
    StageAdvanced {
        pipeline_id: String,
        brand_id: String,
        from_stage: PipelineStage,
        to_stage: PipelineStage,
        trigger: String,
    },
    /// A failed stage was started again.
    StageRetried {
        pipeline_id: String,
        brand_id: String,
        stage: PipelineStage,
    },
    PipelineCompleted {
        pipeline_id: String,
        brand_id: String,
    },
    PipelineFailed {
        pipeline_id: String,
        brand_id: String,
        stage: PipelineStage,
        error: String,
    },
    PipelineCancelled {
        pipeline_id: String,
        brand_id: String,
        reason: String,
    },

    // Fulfillment
    FulfillmentCreated {
        fulfillment_id: String,
        pipeline_id: String,
        brand_id: String,
        provider: String,
        external_order_id: Option<String>,
    },
    FulfillmentStatusChanged {
        fulfillment_id: String,
        pipeline_id: String,
        brand_id: String,
        from_status: FulfillmentStatus,
        to_status: FulfillmentStatus,
        source: String,
    },
    FulfillmentShipped {
        fulfillment_id: String,
        pipeline_id: String,
        brand_id: String,
        carrier: String,
        tracking_number: String,
    },

    // Tracking
    TrackingUpdated {
        tracking_number: String,
        carrier: Option<String>,
        status: Option<FulfillmentStatus>,
        /// Carrier's own status string
        raw_status: Option<String>,
        occurred_at: Option<DateTime<Utc>>,
    },

    // Returns
    ReturnRequested {
        return_id: String,
        order_id: String,
        brand_id: String,
    },
    ReturnApproved {
        return_id: String,
        brand_id: String,
    },
    ReturnRejected {
        return_id: String,
        brand_id: String,
        reason: Option<String>,
    },
    ReturnReceived {
        return_id: String,
        brand_id: String,
    },
    ReturnRefunded {
        return_id: String,
        order_id: String,
        brand_id: String,
        amount_cents: i64,
        refund_status: String,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "SERVICE_STARTED",
            Self::ServiceStopped { .. } => "SERVICE_STOPPED",
            Self::PipelineCreated { .. } => "PIPELINE_CREATED",
            Self::StageAdvanced { .. } => "STAGE_ADVANCED",
            Self::StageRetried { .. } => "STAGE_RETRIED",
            Self::PipelineCompleted { .. } => "PIPELINE_COMPLETED",
            Self::PipelineFailed { .. } => "PIPELINE_FAILED",
            Self::PipelineCancelled { .. } => "PIPELINE_CANCELLED",
            Self::FulfillmentCreated { .. } => "FULFILLMENT_CREATED",
            Self::FulfillmentStatusChanged { .. } => "FULFILLMENT_STATUS_CHANGED",
            Self::FulfillmentShipped { .. } => "FULFILLMENT_SHIPPED",
            Self::TrackingUpdated { .. } => "TRACKING_UPDATED",
            Self::ReturnRequested { .. } => "RETURN_REQUESTED",
            Self::ReturnApproved { .. } => "RETURN_APPROVED",
            Self::ReturnRejected { .. } => "RETURN_REJECTED",
            Self::ReturnReceived { .. } => "RETURN_RECEIVED",
            Self::ReturnRefunded { .. } => "RETURN_REFUNDED",
        }
    }

    pub fn brand_id(&self) -> Option<&str> {
        match self {
            Self::ServiceStarted { .. }
            | Self::ServiceStopped { .. }
            | Self::TrackingUpdated { .. } => None,
            Self::PipelineCreated { brand_id, .. }
            | Self::StageAdvanced { brand_id, .. }
            | Self::StageRetried { brand_id, .. }
            | Self::PipelineCompleted { brand_id, .. }
            | Self::PipelineFailed { brand_id, .. }
            | Self::PipelineCancelled { brand_id, .. }
            | Self::FulfillmentCreated { brand_id, .. }
            | Self::FulfillmentStatusChanged { brand_id, .. }
            | Self::FulfillmentShipped { brand_id, .. }
            | Self::ReturnRequested { brand_id, .. }
            | Self::ReturnApproved { brand_id, .. }
            | Self::ReturnRejected { brand_id, .. }
            | Self::ReturnReceived { brand_id, .. }
            | Self::ReturnRefunded { brand_id, .. } => Some(brand_id),
        }
    }

    pub fn pipeline_id(&self) -> Option<&str> {
        match self {
            Self::PipelineCreated { pipeline_id, .. }
            | Self::StageAdvanced { pipeline_id, .. }
            | Self::StageRetried { pipeline_id, .. }
            | Self::PipelineCompleted { pipeline_id, .. }
            | Self::PipelineFailed { pipeline_id, .. }
            | Self::PipelineCancelled { pipeline_id, .. }
            | Self::FulfillmentCreated { pipeline_id, .. }
            | Self::FulfillmentStatusChanged { pipeline_id, .. }
            | Self::FulfillmentShipped { pipeline_id, .. } => Some(pipeline_id),
            _ => None,
        }
    }
}

/// A persisted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub brand_id: Option<String>,
    pub pipeline_id: Option<String>,
    pub data: DomainEvent,
}
