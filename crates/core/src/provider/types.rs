use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::fulfillment::FulfillmentStatus;

/// Errors from provider operations.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Credentials were refused. Retrying will not help.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The request may or may not have been processed by the provider.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The request never reached the provider.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The connection broke after the request may have been sent.
    #[error("Request interrupted: {0}")]
    Interrupted(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Provider server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Business-level refusal (4xx). Not retryable.
    #[error("Provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::Connection(_)
                | ProviderError::Interrupted(_)
                | ProviderError::RateLimited(_)
                | ProviderError::Server { .. }
                | ProviderError::InvalidResponse(_)
        )
    }

    /// For side-effecting calls: the provider may have acted on the request.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::Interrupted(_)
                | ProviderError::Server { .. }
                | ProviderError::InvalidResponse(_)
        )
    }
}

// ============================================================================
// Slugs
// ============================================================================

/// Known manufacturing providers. Unknown slugs fail at config load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSlug {
    Printful,
    Gelato,
}

impl ProviderSlug {
    pub const ALL: [ProviderSlug; 2] = [ProviderSlug::Printful, ProviderSlug::Gelato];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderSlug::Printful => "printful",
            ProviderSlug::Gelato => "gelato",
        }
    }
}

impl fmt::Display for ProviderSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderSlug {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "printful" => Ok(ProviderSlug::Printful),
            "gelato" => Ok(ProviderSlug::Gelato),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

// ============================================================================
// Request / response shapes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub name: String,
    pub address1: String,
    #[serde(default)]
    pub address2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub state_code: Option<String>,
    /// ISO 3166-1 alpha-2
    pub country_code: String,
    pub zip: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl ShippingAddress {
    /// Split `name` into first and last name for APIs that want them separately.
    pub fn split_name(&self) -> (String, String) {
        let trimmed = self.name.trim();
        match trimmed.split_once(char::is_whitespace) {
            Some((first, last)) => (first.to_string(), last.trim().to_string()),
            None => (trimmed.to_string(), String::new()),
        }
    }
}

/// One line of a manufacturing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub line_item_id: String,
    /// Provider-side product identifier (variant id, product uid).
    pub product_ref: String,
    pub quantity: u32,
    /// Print-ready file.
    #[serde(default)]
    pub file_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderMetadata {
    /// Our idempotency reference, sent as the provider's external id.
    pub reference: String,
    pub order_id: String,
    pub brand_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingRate {
    pub provider: ProviderSlug,
    pub id: String,
    pub name: String,
    pub amount_cents: i64,
    pub currency: String,
    pub min_delivery_days: Option<u32>,
    pub max_delivery_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProduct {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedOrder {
    pub external_order_id: String,
    pub status: FulfillmentStatus,
    pub raw_status: String,
    pub estimated_completion: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderShipment {
    pub carrier: String,
    pub tracking_number: String,
    pub tracking_url: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOrderStatus {
    pub external_order_id: String,
    /// Normalized; never the raw provider string.
    pub status: FulfillmentStatus,
    pub raw_status: String,
    pub shipment: Option<ProviderShipment>,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

/// Result of a cancellation request. A refusal is a normal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub cancelled: bool,
    pub message: Option<String>,
}

impl CancelOutcome {
    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            message: None,
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            cancelled: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventKind {
    OrderShipped,
    OrderUpdated,
    OrderFailed,
    OrderCancelled,
    OrderOnHold,
    OrderDelivered,
}

/// A provider webhook normalized into our vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderWebhookEvent {
    pub kind: WebhookEventKind,
    /// The provider's native event type
    pub event_type: String,
    pub external_order_id: Option<String>,
    /// Our reference echoed back by the provider
    pub reference: Option<String>,
    pub status: Option<FulfillmentStatus>,
    pub shipment: Option<ProviderShipment>,
}

// ============================================================================
// Provider trait
// ============================================================================

/// Uniform contract implemented once per manufacturing partner.
#[async_trait]
pub trait PodProvider: Send + Sync {
    fn slug(&self) -> ProviderSlug;

    /// Validate credentials. Auth failures are reported as
    /// [`ProviderError::Authentication`], distinct from network errors.
    async fn connect(&self) -> Result<(), ProviderError>;

    async fn get_products(&self) -> Result<Vec<ProviderProduct>, ProviderError>;

    /// Read-only and safe to retry.
    async fn get_shipping_rates(
        &self,
        address: &ShippingAddress,
        items: &[OrderItem],
    ) -> Result<Vec<ShippingRate>, ProviderError>;

    /// Side-effecting. An ambiguous error means the order may exist; callers
    /// reconcile through [`PodProvider::find_order_by_reference`] before retrying.
    async fn create_order(
        &self,
        items: &[OrderItem],
        address: &ShippingAddress,
        metadata: &OrderMetadata,
    ) -> Result<CreatedOrder, ProviderError>;

    async fn get_order_status(
        &self,
        external_order_id: &str,
    ) -> Result<ProviderOrderStatus, ProviderError>;

    /// Look up an order by the reference sent in [`OrderMetadata`].
    async fn find_order_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<ProviderOrderStatus>, ProviderError>;

    /// Never errors for a refusal; that is reported in [`CancelOutcome`].
    async fn cancel_order(&self, external_order_id: &str) -> Result<CancelOutcome, ProviderError>;

    /// False when the signature is absent, malformed, or wrong, or when no
    /// webhook secret is configured.
    fn verify_webhook(&self, payload: &[u8], signature: Option<&str>) -> bool;

    /// Header carrying this provider's webhook signature.
    fn signature_header(&self) -> &'static str;

    /// Normalize a webhook payload. `None` if it is not an order event.
    fn parse_webhook(&self, payload: &serde_json::Value) -> Option<ProviderWebhookEvent>;
}
