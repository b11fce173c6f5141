use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{map_carrier_status, SweepReport, TrackingStatus, TrackingUpdate};
use crate::events::{DomainEvent, EventHandle};
use crate::fulfillment::{tracking_key, FulfillmentStore};
use crate::metrics;
use crate::storage::StoreError;

const TRACKING_KEYS: [&str; 5] = [
    "tracking_number",
    "trackingNumber",
    "tracking_code",
    "trackingCode",
    "number",
];
const CARRIER_KEYS: [&str; 5] = ["carrier", "carrier_code", "carrierCode", "slug", "courier"];
const STATUS_KEYS: [&str; 4] = ["status", "tag", "status_code", "statusCode"];
const TIME_KEYS: [&str; 4] = ["occurred_at", "occurredAt", "updated_at", "timestamp"];

/// Subscribes tracking numbers and turns carrier webhooks into events.
///
/// The watch-set lives in memory and is rebuilt by [`TrackingService::check_active_shipments`].
pub struct TrackingService {
    fulfillments: Arc<dyn FulfillmentStore>,
    watched: RwLock<HashSet<String>>,
    events: Option<EventHandle>,
}

impl TrackingService {
    pub fn new(fulfillments: Arc<dyn FulfillmentStore>) -> Self {
        Self {
            fulfillments,
            watched: RwLock::new(HashSet::new()),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventHandle) -> Self {
        self.events = Some(events);
        self
    }

    /// Add to the watch-set. Returns true if it was not already watched.
    pub async fn subscribe(&self, tracking_number: &str, carrier: &str) -> bool {
        let key = tracking_key(carrier, tracking_number);
        let added = self.watched.write().await.insert(key.clone());
        if added {
            debug!(key = %key, "Subscribed to tracking updates");
        }
        added
    }

    /// Remove from the watch-set. Returns true if it was watched.
    pub async fn unsubscribe(&self, tracking_number: &str, carrier: &str) -> bool {
        let key = tracking_key(carrier, tracking_number);
        let removed = self.watched.write().await.remove(&key);
        if removed {
            debug!(key = %key, "Unsubscribed from tracking updates");
        }
        removed
    }

    pub async fn is_subscribed(&self, tracking_number: &str, carrier: &str) -> bool {
        self.watched
            .read()
            .await
            .contains(&tracking_key(carrier, tracking_number))
    }

    pub async fn watched_count(&self) -> usize {
        self.watched.read().await.len()
    }

    /// Current status from the fulfillment record; never calls the carrier.
    pub fn get_status(&self, tracking_number: &str) -> Result<Option<TrackingStatus>, StoreError> {
        Ok(self
            .fulfillments
            .find_by_tracking_number(tracking_number)?
            .as_ref()
            .and_then(TrackingStatus::from_fulfillment))
    }

    /// Normalize a carrier webhook and emit `TRACKING_UPDATED`.
    ///
    /// The event is emitted whether or not a fulfillment matches, but only a
    /// number belonging to an undelivered fulfillment joins the watch-set.
    /// Returns `None` for payloads without a tracking number.
    pub async fn handle_webhook(&self, payload: &Value) -> Option<TrackingUpdate> {
        let Some(update) = Self::normalize(payload) else {
            debug!("Tracking webhook without a tracking number ignored");
            metrics::WEBHOOKS_RECEIVED
                .with_label_values(&["tracking", "ignored"])
                .inc();
            return None;
        };

        match self.fulfillments.find_by_tracking_number(&update.tracking_number) {
            Ok(Some(fulfillment)) if !fulfillment.status.is_terminal() => {
                if let Some(carrier) = fulfillment.carrier.as_ref().or(update.carrier.as_ref()) {
                    self.subscribe(&update.tracking_number, carrier).await;
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    tracking_number = %update.tracking_number,
                    error = %e,
                    "Could not look up fulfillment for tracking webhook"
                );
            }
        }

        if let Some(ref events) = self.events {
            events
                .emit(DomainEvent::TrackingUpdated {
                    tracking_number: update.tracking_number.clone(),
                    carrier: update.carrier.clone(),
                    status: update.status,
                    raw_status: update.raw_status.clone(),
                    occurred_at: update.occurred_at,
                })
                .await;
        }
        metrics::WEBHOOKS_RECEIVED
            .with_label_values(&["tracking", "accepted"])
            .inc();
        Some(update)
    }

    /// Rebuild the watch-set from the fulfillments still in transit.
    ///
    /// Keys for shipments that were delivered, cancelled, or never existed
    /// are dropped.
    pub async fn check_active_shipments(&self) -> Result<SweepReport, StoreError> {
        let in_transit = match self.fulfillments.list_in_transit() {
            Ok(list) => list,
            Err(e) => {
                metrics::TRACKING_SWEEPS.with_label_values(&["error"]).inc();
                return Err(e);
            }
        };

        let active: HashSet<String> = in_transit
            .iter()
            .filter_map(|f| f.tracking_key())
            .collect();

        let mut watched = self.watched.write().await;
        let report = SweepReport {
            checked: in_transit.len(),
            resubscribed: active.difference(&watched).count(),
            dropped: watched.difference(&active).count(),
        };
        *watched = active;
        drop(watched);

        metrics::TRACKING_SWEEPS.with_label_values(&["success"]).inc();
        metrics::TRACKING_RESUBSCRIBED.inc_by(report.resubscribed as u64);
        info!(
            checked = report.checked,
            resubscribed = report.resubscribed,
            dropped = report.dropped,
            "Tracking sweep complete"
        );
        Ok(report)
    }

    /// Pull tracking fields out of the common webhook shapes: flat, or nested
    /// under `data`, `result`, `msg`, or `object`.
    fn normalize(payload: &Value) -> Option<TrackingUpdate> {
        let containers = std::iter::once(payload).chain(
            ["data", "result", "msg", "object"]
                .iter()
                .filter_map(|key| payload.get(key)),
        );

        for container in containers {
            let Some(tracking_number) = first_string(container, &TRACKING_KEYS) else {
                continue;
            };
            let raw_status = first_string(container, &STATUS_KEYS);
            let occurred_at = first_string(container, &TIME_KEYS)
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            return Some(TrackingUpdate {
                tracking_number,
                carrier: first_string(container, &CARRIER_KEYS),
                status: raw_status.as_deref().and_then(map_carrier_status),
                raw_status,
                occurred_at,
            });
        }
        None
    }
}

fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| value.get(key))
        .find_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
