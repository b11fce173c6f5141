//! Mock manufacturing provider for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde_json::Value;

use crate::fulfillment::FulfillmentStatus;
use crate::provider::{
    sign_payload, verify_signature, CancelOutcome, CreatedOrder, OrderItem, OrderMetadata,
    PodProvider, ProviderError, ProviderOrderStatus, ProviderProduct, ProviderShipment,
    ProviderSlug, ProviderWebhookEvent, ShippingAddress, ShippingRate, WebhookEventKind,
};

/// Secret the mock signs and verifies webhooks with.
pub const MOCK_WEBHOOK_SECRET: &str = "mock-webhook-secret";

/// A recorded `create_order` call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedOrder {
    pub external_order_id: String,
    pub reference: String,
    pub order_id: String,
    pub items: Vec<OrderItem>,
    pub address: ShippingAddress,
}

#[derive(Debug, Clone)]
struct MockOrder {
    reference: String,
    status: FulfillmentStatus,
    raw_status: String,
    shipment: Option<ProviderShipment>,
}

/// How the next `create_order` call misbehaves.
#[derive(Debug, Clone)]
enum CreateFailure {
    /// Fail without creating anything.
    Fail(ProviderError),
    /// Create the order, then report the error as if the response was lost.
    FailAfterCreate(ProviderError),
}

#[derive(Debug, Default)]
struct MockState {
    orders: HashMap<String, MockOrder>,
    created: Vec<RecordedOrder>,
    cancelled: Vec<String>,
    create_failures: VecDeque<CreateFailure>,
    connect_error: Option<ProviderError>,
    status_error: Option<ProviderError>,
    lookup_error: Option<ProviderError>,
    rates_error: Option<ProviderError>,
    cancel_error: Option<ProviderError>,
    cancel_refusal: Option<String>,
    rates: Vec<ShippingRate>,
    next_id: u64,
}

/// Mock implementation of the [`PodProvider`] trait.
///
/// Keeps its orders in memory so reconciliation, status sync and
/// cancellation behave like a real factory:
/// - `create_order` records the call and stores the order
/// - `find_order_by_reference` searches stored orders
/// - errors can be queued per operation
///
/// # Example
///
/// ```rust,ignore
/// use pce_core::testing::MockProvider;
///
/// let provider = MockProvider::new(ProviderSlug::Printful);
/// provider.fail_next_create_after_placing(ProviderError::Timeout("lost".into()));
/// // The first create times out but the factory has the order.
/// ```
#[derive(Debug)]
pub struct MockProvider {
    slug: ProviderSlug,
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new(slug: ProviderSlug) -> Self {
        let rate = ShippingRate {
            provider: slug,
            id: "STANDARD".to_string(),
            name: format!("{} standard", slug),
            amount_cents: 499,
            currency: "USD".to_string(),
            min_delivery_days: Some(3),
            max_delivery_days: Some(7),
        };
        Self {
            slug,
            state: Mutex::new(MockState {
                rates: vec![rate],
                ..MockState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `connect` fail with this error.
    pub fn fail_connect(&self, error: ProviderError) {
        self.state().connect_error = Some(error);
    }

    /// The next `create_order` fails without placing an order.
    pub fn fail_next_create(&self, error: ProviderError) {
        self.state()
            .create_failures
            .push_back(CreateFailure::Fail(error));
    }

    /// The next `create_order` places the order and then fails, like a
    /// response lost to a timeout.
    pub fn fail_next_create_after_placing(&self, error: ProviderError) {
        self.state()
            .create_failures
            .push_back(CreateFailure::FailAfterCreate(error));
    }

    /// Make `get_order_status` fail until cleared.
    pub fn fail_status(&self, error: Option<ProviderError>) {
        self.state().status_error = error;
    }

    /// Make `find_order_by_reference` fail until cleared.
    pub fn fail_lookup(&self, error: Option<ProviderError>) {
        self.state().lookup_error = error;
    }

    pub fn fail_rates(&self, error: ProviderError) {
        self.state().rates_error = Some(error);
    }

    pub fn set_rates(&self, rates: Vec<ShippingRate>) {
        self.state().rates = rates;
    }

    /// Make `cancel_order` error.
    pub fn fail_cancel(&self, error: ProviderError) {
        self.state().cancel_error = Some(error);
    }

    /// Make `cancel_order` answer with a refusal.
    pub fn refuse_cancel(&self, message: &str) {
        self.state().cancel_refusal = Some(message.to_string());
    }

    /// Move a stored order to a new status, optionally with a shipment.
    pub fn set_order_status(
        &self,
        external_order_id: &str,
        status: FulfillmentStatus,
        shipment: Option<ProviderShipment>,
    ) {
        if let Some(order) = self.state().orders.get_mut(external_order_id) {
            order.status = status;
            order.raw_status = status.as_str().to_lowercase();
            if shipment.is_some() {
                order.shipment = shipment;
            }
        }
    }

    pub fn created_orders(&self) -> Vec<RecordedOrder> {
        self.state().created.clone()
    }

    pub fn create_count(&self) -> usize {
        self.state().created.len()
    }

    pub fn cancelled_orders(&self) -> Vec<String> {
        self.state().cancelled.clone()
    }

    /// Sign a webhook body the way this provider would.
    pub fn sign(payload: &[u8]) -> String {
        sign_payload(MOCK_WEBHOOK_SECRET, payload)
    }

    fn status_of(external_order_id: &str, order: &MockOrder) -> ProviderOrderStatus {
        ProviderOrderStatus {
            external_order_id: external_order_id.to_string(),
            status: order.status,
            raw_status: order.raw_status.clone(),
            shipment: order.shipment.clone(),
            estimated_delivery: None,
        }
    }
}

#[async_trait]
impl PodProvider for MockProvider {
    fn slug(&self) -> ProviderSlug {
        self.slug
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        match self.state().connect_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn get_products(&self) -> Result<Vec<ProviderProduct>, ProviderError> {
        Ok(vec![ProviderProduct {
            id: "mock-product".to_string(),
            name: "Mock T-Shirt".to_string(),
        }])
    }

    async fn get_shipping_rates(
        &self,
        _address: &ShippingAddress,
        _items: &[OrderItem],
    ) -> Result<Vec<ShippingRate>, ProviderError> {
        let state = self.state();
        match state.rates_error.clone() {
            Some(e) => Err(e),
            None => Ok(state.rates.clone()),
        }
    }

    async fn create_order(
        &self,
        items: &[OrderItem],
        address: &ShippingAddress,
        metadata: &OrderMetadata,
    ) -> Result<CreatedOrder, ProviderError> {
        let mut state = self.state();
        let failure = state.create_failures.pop_front();
        if let Some(CreateFailure::Fail(e)) = failure {
            return Err(e);
        }

        state.next_id += 1;
        let external_order_id = format!("{}-{}", self.slug, state.next_id);
        state.orders.insert(
            external_order_id.clone(),
            MockOrder {
                reference: metadata.reference.clone(),
                status: FulfillmentStatus::Submitted,
                raw_status: "pending".to_string(),
                shipment: None,
            },
        );
        state.created.push(RecordedOrder {
            external_order_id: external_order_id.clone(),
            reference: metadata.reference.clone(),
            order_id: metadata.order_id.clone(),
            items: items.to_vec(),
            address: address.clone(),
        });

        if let Some(CreateFailure::FailAfterCreate(e)) = failure {
            return Err(e);
        }
        Ok(CreatedOrder {
            external_order_id,
            status: FulfillmentStatus::Submitted,
            raw_status: "pending".to_string(),
            estimated_completion: Some(Utc::now() + chrono::Duration::days(3)),
        })
    }

    async fn get_order_status(
        &self,
        external_order_id: &str,
    ) -> Result<ProviderOrderStatus, ProviderError> {
        let state = self.state();
        if let Some(e) = state.status_error.clone() {
            return Err(e);
        }
        state
            .orders
            .get(external_order_id)
            .map(|order| Self::status_of(external_order_id, order))
            .ok_or_else(|| ProviderError::NotFound(external_order_id.to_string()))
    }

    async fn find_order_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<ProviderOrderStatus>, ProviderError> {
        let state = self.state();
        if let Some(e) = state.lookup_error.clone() {
            return Err(e);
        }
        Ok(state
            .orders
            .iter()
            .find(|(_, order)| order.reference == reference)
            .map(|(id, order)| Self::status_of(id, order)))
    }

    async fn cancel_order(&self, external_order_id: &str) -> Result<CancelOutcome, ProviderError> {
        let mut state = self.state();
        if let Some(e) = state.cancel_error.clone() {
            return Err(e);
        }
        if let Some(message) = state.cancel_refusal.clone() {
            return Ok(CancelOutcome::refused(message));
        }
        let Some(order) = state.orders.get_mut(external_order_id) else {
            return Err(ProviderError::NotFound(external_order_id.to_string()));
        };
        order.status = FulfillmentStatus::Cancelled;
        order.raw_status = "canceled".to_string();
        state.cancelled.push(external_order_id.to_string());
        Ok(CancelOutcome::cancelled())
    }

    fn verify_webhook(&self, payload: &[u8], signature: Option<&str>) -> bool {
        verify_signature(Some(MOCK_WEBHOOK_SECRET), payload, signature)
    }

    fn signature_header(&self) -> &'static str {
        "x-mock-signature"
    }

    /// Expects `{"type", "order_id", "reference", "status", "carrier", "tracking_number"}`.
    fn parse_webhook(&self, payload: &Value) -> Option<ProviderWebhookEvent> {
        let event_type = payload.get("type")?.as_str()?.to_string();
        let text = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_string);
        let status = text("status").and_then(|s| s.parse::<FulfillmentStatus>().ok());
        let shipment = match (text("carrier"), text("tracking_number")) {
            (Some(carrier), Some(tracking_number)) => Some(ProviderShipment {
                carrier,
                tracking_number,
                tracking_url: None,
                shipped_at: None,
            }),
            _ => None,
        };
        let kind = match status {
            Some(FulfillmentStatus::Shipped) => WebhookEventKind::OrderShipped,
            Some(FulfillmentStatus::Delivered) => WebhookEventKind::OrderDelivered,
            Some(FulfillmentStatus::Cancelled) => WebhookEventKind::OrderCancelled,
            Some(FulfillmentStatus::Failed) => WebhookEventKind::OrderFailed,
            _ => WebhookEventKind::OrderUpdated,
        };
        Some(ProviderWebhookEvent {
            kind,
            event_type,
            external_order_id: text("order_id"),
            reference: text("reference"),
            status,
            shipment,
        })
    }
}
