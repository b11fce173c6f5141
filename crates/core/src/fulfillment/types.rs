use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::{ProviderError, ProviderSlug};
use crate::storage::StoreError;

/// Lifecycle of a physical shipment, mirroring provider lifecycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentStatus {
    Draft,
    Submitted,
    InProduction,
    Shipped,
    InTransit,
    OutForDelivery,
    Delivered,
    Cancelled,
    Failed,
}

impl FulfillmentStatus {
    pub const ALL: [FulfillmentStatus; 9] = [
        FulfillmentStatus::Draft,
        FulfillmentStatus::Submitted,
        FulfillmentStatus::InProduction,
        FulfillmentStatus::Shipped,
        FulfillmentStatus::InTransit,
        FulfillmentStatus::OutForDelivery,
        FulfillmentStatus::Delivered,
        FulfillmentStatus::Cancelled,
        FulfillmentStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Draft => "DRAFT",
            FulfillmentStatus::Submitted => "SUBMITTED",
            FulfillmentStatus::InProduction => "IN_PRODUCTION",
            FulfillmentStatus::Shipped => "SHIPPED",
            FulfillmentStatus::InTransit => "IN_TRANSIT",
            FulfillmentStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            FulfillmentStatus::Delivered => "DELIVERED",
            FulfillmentStatus::Cancelled => "CANCELLED",
            FulfillmentStatus::Failed => "FAILED",
        }
    }

    /// Position in the forward lifecycle. `None` for the off-path states.
    pub fn rank(&self) -> Option<u8> {
        match self {
            FulfillmentStatus::Draft => Some(0),
            FulfillmentStatus::Submitted => Some(1),
            FulfillmentStatus::InProduction => Some(2),
            FulfillmentStatus::Shipped => Some(3),
            FulfillmentStatus::InTransit => Some(4),
            FulfillmentStatus::OutForDelivery => Some(5),
            FulfillmentStatus::Delivered => Some(6),
            FulfillmentStatus::Cancelled | FulfillmentStatus::Failed => None,
        }
    }

    /// DELIVERED and CANCELLED absorb every later write.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FulfillmentStatus::Delivered | FulfillmentStatus::Cancelled)
    }

    /// Handed to a carrier but not yet delivered.
    pub fn is_in_transit(&self) -> bool {
        matches!(
            self,
            FulfillmentStatus::Shipped
                | FulfillmentStatus::InTransit
                | FulfillmentStatus::OutForDelivery
        )
    }

    /// At or past the carrier handoff.
    pub fn has_shipped(&self) -> bool {
        self.is_in_transit() || *self == FulfillmentStatus::Delivered
    }

    /// Whether moving to `next` is progress.
    ///
    /// Writes never regress the lifecycle, so concurrent webhook and sweep
    /// writers converge regardless of arrival order.
    pub fn can_advance_to(&self, next: FulfillmentStatus) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        match (self, next) {
            (_, FulfillmentStatus::Cancelled) => true,
            (current, FulfillmentStatus::Failed) => !current.has_shipped(),
            // A failed order may be resubmitted or recovered by the provider.
            (FulfillmentStatus::Failed, _) => true,
            (current, next) => match (current.rank(), next.rank()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }
}

impl fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FulfillmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        FulfillmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| format!("unknown fulfillment status: {}", s))
    }
}

/// One append-only entry in a fulfillment's status log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: FulfillmentStatus,
    pub at: DateTime<Utc>,
    /// What caused the change ("provider", "webhook", "sweep", "admin", ...).
    pub source: String,
}

/// The physical-shipment record for a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fulfillment {
    pub id: String,
    pub pipeline_id: String,
    pub order_id: String,
    pub brand_id: String,
    pub provider: ProviderSlug,
    /// Sent to the provider as its external reference. Regenerated on resubmission.
    pub reference: String,
    pub external_order_id: Option<String>,
    pub status: FulfillmentStatus,
    /// Last native status reported by the provider.
    pub provider_status: Option<String>,
    pub carrier: Option<String>,
    /// Set at most once.
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    /// A create call timed out; the provider may hold an order for this record.
    pub submission_uncertain: bool,
    pub status_history: Vec<StatusHistoryEntry>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fulfillment {
    /// A DRAFT record, persisted before the provider is called.
    pub fn draft(
        pipeline_id: impl Into<String>,
        order_id: impl Into<String>,
        brand_id: impl Into<String>,
        provider: ProviderSlug,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pipeline_id: pipeline_id.into(),
            order_id: order_id.into(),
            brand_id: brand_id.into(),
            provider,
            reference: new_reference(),
            external_order_id: None,
            status: FulfillmentStatus::Draft,
            provider_status: None,
            carrier: None,
            tracking_number: None,
            tracking_url: None,
            shipped_at: None,
            delivered_at: None,
            estimated_delivery: None,
            cancelled_at: None,
            failure_reason: None,
            submission_uncertain: false,
            status_history: vec![StatusHistoryEntry {
                status: FulfillmentStatus::Draft,
                at: now,
                source: "created".to_string(),
            }],
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Put a FAILED fulfillment back to DRAFT for another submission.
    pub fn reset_for_resubmission(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != FulfillmentStatus::Failed {
            return false;
        }
        self.transition(FulfillmentStatus::Draft, "resubmit", now);
        self.reference = new_reference();
        self.external_order_id = None;
        self.provider_status = None;
        self.failure_reason = None;
        self.submission_uncertain = false;
        true
    }

    /// Apply a status if it is progress. Returns whether anything changed.
    pub fn transition(
        &mut self,
        status: FulfillmentStatus,
        source: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.status.can_advance_to(status) {
            return false;
        }
        self.status = status;
        self.status_history.push(StatusHistoryEntry {
            status,
            at: now,
            source: source.to_string(),
        });
        match status {
            FulfillmentStatus::Shipped
            | FulfillmentStatus::InTransit
            | FulfillmentStatus::OutForDelivery => {
                self.shipped_at.get_or_insert(now);
            }
            FulfillmentStatus::Delivered => {
                self.shipped_at.get_or_insert(now);
                self.delivered_at.get_or_insert(now);
            }
            FulfillmentStatus::Cancelled => self.cancelled_at = Some(now),
            _ => {}
        }
        true
    }

    /// Record shipment details. The tracking number is only ever filled in,
    /// never replaced; a different number is an error.
    pub fn apply_shipment(&mut self, shipment: &ShipmentDetails) -> Result<(), FulfillmentError> {
        match &self.tracking_number {
            Some(existing) if existing != &shipment.tracking_number => {
                return Err(FulfillmentError::TrackingNumberImmutable {
                    id: self.id.clone(),
                    existing: existing.clone(),
                });
            }
            Some(_) => {}
            None => self.tracking_number = Some(shipment.tracking_number.clone()),
        }
        self.carrier = Some(shipment.carrier.clone());
        if shipment.tracking_url.is_some() {
            self.tracking_url = shipment.tracking_url.clone();
        }
        if let Some(shipped_at) = shipment.shipped_at {
            self.shipped_at.get_or_insert(shipped_at);
        }
        if shipment.estimated_delivery.is_some() {
            self.estimated_delivery = shipment.estimated_delivery;
        }
        Ok(())
    }

    /// Key used by the tracking watch-set.
    pub fn tracking_key(&self) -> Option<String> {
        match (&self.carrier, &self.tracking_number) {
            (Some(carrier), Some(number)) => Some(tracking_key(carrier, number)),
            _ => None,
        }
    }
}

/// 32 characters, the longest external id some providers accept.
fn new_reference() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// `carrier:trackingNumber`, lowercase carrier.
pub fn tracking_key(carrier: &str, tracking_number: &str) -> String {
    format!("{}:{}", carrier.trim().to_ascii_lowercase(), tracking_number.trim())
}

/// Carrier handoff details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentDetails {
    pub carrier: String,
    pub tracking_number: String,
    #[serde(default)]
    pub tracking_url: Option<String>,
    #[serde(default)]
    pub shipped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_delivery: Option<DateTime<Utc>>,
}

/// Filter for listing fulfillments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentFilter {
    pub brand_id: Option<String>,
    pub status: Option<FulfillmentStatus>,
    pub pipeline_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for FulfillmentFilter {
    fn default() -> Self {
        Self {
            brand_id: None,
            status: None,
            pipeline_id: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl FulfillmentFilter {
    pub fn with_brand(mut self, brand_id: impl Into<String>) -> Self {
        self.brand_id = Some(brand_id.into());
        self
    }

    pub fn with_status(mut self, status: FulfillmentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_pipeline(mut self, pipeline_id: impl Into<String>) -> Self {
        self.pipeline_id = Some(pipeline_id.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Errors from the fulfillment service.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// The owning pipeline was cancelled; only cancellation is still allowed.
    #[error("Pipeline {0} is cancelled")]
    PipelineCancelled(String),

    #[error("Fulfillment {id} already has tracking number {existing}")]
    TrackingNumberImmutable { id: String, existing: String },

    #[error("Cannot move fulfillment from {from} to {to}")]
    InvalidStatus {
        from: FulfillmentStatus,
        to: FulfillmentStatus,
    },

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fulfillment() -> Fulfillment {
        Fulfillment::draft("p1", "o1", "b1", ProviderSlug::Printful)
    }

    #[test]
    fn test_status_round_trip_through_strings() {
        for status in FulfillmentStatus::ALL {
            assert_eq!(status.as_str().parse::<FulfillmentStatus>(), Ok(status));
        }
        assert_eq!(
            "in_production".parse::<FulfillmentStatus>(),
            Ok(FulfillmentStatus::InProduction)
        );
        assert!("teleported".parse::<FulfillmentStatus>().is_err());
    }

    #[test]
    fn test_monotonic_advance() {
        use FulfillmentStatus::*;
        assert!(Draft.can_advance_to(Submitted));
        assert!(Submitted.can_advance_to(Shipped));
        assert!(!Shipped.can_advance_to(InProduction));
        assert!(!InTransit.can_advance_to(InTransit));
        assert!(InTransit.can_advance_to(Delivered));
    }

    #[test]
    fn test_absorbing_states() {
        use FulfillmentStatus::*;
        for next in FulfillmentStatus::ALL {
            assert!(!Delivered.can_advance_to(next));
            assert!(!Cancelled.can_advance_to(next));
        }
    }

    #[test]
    fn test_failed_transitions() {
        use FulfillmentStatus::*;
        assert!(InProduction.can_advance_to(Failed));
        assert!(!Shipped.can_advance_to(Failed));
        assert!(Failed.can_advance_to(Draft));
        assert!(Failed.can_advance_to(Cancelled));
        assert!(Shipped.can_advance_to(Cancelled));
    }

    #[test]
    fn test_transition_records_history_and_timestamps() {
        let mut f = fulfillment();
        let now = Utc::now();
        assert!(f.transition(FulfillmentStatus::Submitted, "provider", now));
        assert!(f.transition(FulfillmentStatus::Delivered, "webhook", now));
        assert!(!f.transition(FulfillmentStatus::InTransit, "sweep", now));

        assert_eq!(f.status, FulfillmentStatus::Delivered);
        assert_eq!(f.status_history.len(), 3);
        assert_eq!(f.status_history[2].source, "webhook");
        assert_eq!(f.delivered_at, Some(now));
        assert_eq!(f.shipped_at, Some(now));
    }

    #[test]
    fn test_reset_for_resubmission() {
        let mut f = fulfillment();
        let first_reference = f.reference.clone();
        assert_eq!(first_reference.len(), 32);
        assert!(!f.reset_for_resubmission(Utc::now()));

        f.external_order_id = Some("ext-1".to_string());
        f.transition(FulfillmentStatus::Failed, "provider", Utc::now());
        assert!(f.reset_for_resubmission(Utc::now()));
        assert_eq!(f.status, FulfillmentStatus::Draft);
        assert_eq!(f.external_order_id, None);
        assert_ne!(f.reference, first_reference);
        assert_eq!(f.status_history.last().unwrap().source, "resubmit");
    }

    #[test]
    fn test_tracking_number_set_once() {
        let mut f = fulfillment();
        let shipment = ShipmentDetails {
            carrier: "UPS".to_string(),
            tracking_number: "1Z999".to_string(),
            tracking_url: None,
            shipped_at: None,
            estimated_delivery: None,
        };
        f.apply_shipment(&shipment).unwrap();
        // Same number again is fine.
        f.apply_shipment(&shipment).unwrap();

        let other = ShipmentDetails {
            tracking_number: "1Z000".to_string(),
            ..shipment
        };
        let err = f.apply_shipment(&other).unwrap_err();
        assert!(matches!(err, FulfillmentError::TrackingNumberImmutable { .. }));
        assert_eq!(f.tracking_number.as_deref(), Some("1Z999"));
        assert_eq!(f.tracking_key().as_deref(), Some("ups:1Z999"));
    }
}
