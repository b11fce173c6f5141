use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fulfillment::{Fulfillment, FulfillmentStatus};

/// What we know about a tracking number, read from its fulfillment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingStatus {
    pub tracking_number: String,
    pub carrier: Option<String>,
    pub status: FulfillmentStatus,
    pub tracking_url: Option<String>,
    pub fulfillment_id: String,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

impl TrackingStatus {
    pub fn from_fulfillment(f: &Fulfillment) -> Option<Self> {
        Some(Self {
            tracking_number: f.tracking_number.clone()?,
            carrier: f.carrier.clone(),
            status: f.status,
            tracking_url: f.tracking_url.clone(),
            fulfillment_id: f.id.clone(),
            shipped_at: f.shipped_at,
            delivered_at: f.delivered_at,
            estimated_delivery: f.estimated_delivery,
        })
    }
}

/// A carrier webhook normalized into our vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingUpdate {
    pub tracking_number: String,
    pub carrier: Option<String>,
    /// `None` when the carrier status has no lifecycle meaning (exceptions, notices).
    pub status: Option<FulfillmentStatus>,
    pub raw_status: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub checked: usize,
    pub resubscribed: usize,
    #[serde(default)]
    pub dropped: usize,
}

/// Map a carrier status string onto the fulfillment lifecycle.
pub fn map_carrier_status(raw: &str) -> Option<FulfillmentStatus> {
    let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
    match normalized.as_str() {
        "pre_transit" | "label_created" | "inforeceived" | "info_received" | "shipped"
        | "accepted" => Some(FulfillmentStatus::Shipped),
        "in_transit" | "intransit" | "transit" | "available_for_pickup" | "availableforpickup" => {
            Some(FulfillmentStatus::InTransit)
        }
        "out_for_delivery" | "outfordelivery" => Some(FulfillmentStatus::OutForDelivery),
        "delivered" => Some(FulfillmentStatus::Delivered),
        _ => None,
    }
}
