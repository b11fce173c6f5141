use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::events::{DomainEvent, EventEnvelope, EventHandler};
use crate::fulfillment::FulfillmentService;

/// Applies normalized carrier updates to the fulfillment holding the
/// tracking number.
pub struct TrackingUpdateHandler {
    fulfillments: Arc<FulfillmentService>,
}

impl TrackingUpdateHandler {
    pub fn new(fulfillments: Arc<FulfillmentService>) -> Self {
        Self { fulfillments }
    }
}

#[async_trait]
impl EventHandler for TrackingUpdateHandler {
    fn name(&self) -> &str {
        "tracking_update_handler"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let DomainEvent::TrackingUpdated {
            tracking_number,
            status: Some(status),
            ..
        } = &envelope.event
        else {
            return Ok(());
        };

        match self
            .fulfillments
            .apply_tracking_update(tracking_number, *status)
            .await?
        {
            Some(f) => debug!(fulfillment_id = %f.id, status = %f.status, "Applied tracking update"),
            None => debug!(tracking_number = %tracking_number, "Tracking update matches no fulfillment"),
        }
        Ok(())
    }
}
