//! Gelato API client.
//!
//! Orders and quotes live on the order API; the catalog lives on a separate
//! product API host. Our reference travels as `orderReferenceId`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::config::GelatoConfig;
use super::http::{self, float_to_cents, id_string, timed};
use super::signature::verify_signature;
use super::types::*;
use crate::fulfillment::FulfillmentStatus;

const SLUG: ProviderSlug = ProviderSlug::Gelato;

/// Map a native Gelato fulfillment status. Unknown values degrade to SUBMITTED.
pub fn map_gelato_status(raw: &str) -> FulfillmentStatus {
    match raw.to_ascii_lowercase().as_str() {
        "draft" => FulfillmentStatus::Draft,
        "created" | "passed" | "pending_approval" | "pending" | "on_hold" => {
            FulfillmentStatus::Submitted
        }
        "printed" | "in_production" | "digitizing" => FulfillmentStatus::InProduction,
        "shipped" => FulfillmentStatus::Shipped,
        "in_transit" => FulfillmentStatus::InTransit,
        "delivered" => FulfillmentStatus::Delivered,
        "canceled" | "cancelled" => FulfillmentStatus::Cancelled,
        "failed" => FulfillmentStatus::Failed,
        _ => FulfillmentStatus::Submitted,
    }
}

/// Gelato provider.
pub struct GelatoProvider {
    client: Client,
    base_url: String,
    product_base_url: String,
    currency: String,
    webhook_secret: Option<String>,
}

impl GelatoProvider {
    pub fn new(config: &GelatoConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::Config("gelato api_key is empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|e| ProviderError::Config(format!("invalid gelato api key: {}", e)))?;
        headers.insert("X-API-KEY", key);

        Ok(Self {
            client: http::build_client(config.timeout_secs, headers)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            product_base_url: config.product_base_url.trim_end_matches('/').to_string(),
            currency: config.currency.clone(),
            webhook_secret: config.webhook_secret.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, ProviderError> {
        let response = self.client.get(url).send().await.map_err(http::send_error)?;
        http::read_json(response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, url: String, body: &Value) -> Result<T, ProviderError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(http::send_error)?;
        http::read_json(response).await
    }

    fn address_json(address: &ShippingAddress) -> Value {
        let (first_name, last_name) = address.split_name();
        json!({
            "firstName": first_name,
            "lastName": last_name,
            "addressLine1": address.address1,
            "addressLine2": address.address2,
            "city": address.city,
            "state": address.state_code,
            "postCode": address.zip,
            "country": address.country_code,
            "email": address.email,
            "phone": address.phone,
        })
    }

    fn item_json(item: &OrderItem) -> Value {
        let mut value = json!({
            "itemReferenceId": item.line_item_id,
            "productUid": item.product_ref,
            "quantity": item.quantity,
        });
        if let Some(url) = &item.file_url {
            value["files"] = json!([{ "type": "default", "url": url }]);
        }
        value
    }

    fn to_order_status(order: GlOrder) -> ProviderOrderStatus {
        let shipment = order
            .items
            .into_iter()
            .flat_map(|item| item.fulfillments)
            .filter_map(GlFulfillment::into_shipment)
            .next();
        ProviderOrderStatus {
            external_order_id: order.id,
            status: map_gelato_status(&order.fulfillment_status),
            raw_status: order.fulfillment_status,
            shipment,
            estimated_delivery: None,
        }
    }
}

#[async_trait]
impl PodProvider for GelatoProvider {
    fn slug(&self) -> ProviderSlug {
        SLUG
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        timed(SLUG, "connect", async {
            let _: Value = self
                .get_json(format!("{}/v3/catalogs", self.product_base_url))
                .await?;
            info!("Connected to Gelato");
            Ok(())
        })
        .await
    }

    async fn get_products(&self) -> Result<Vec<ProviderProduct>, ProviderError> {
        timed(SLUG, "get_products", async {
            let body: Value = self
                .get_json(format!("{}/v3/catalogs", self.product_base_url))
                .await?;
            let catalogs = body
                .as_array()
                .or_else(|| body.get("data").and_then(Value::as_array))
                .cloned()
                .unwrap_or_default();
            Ok(catalogs
                .iter()
                .filter_map(|c| {
                    Some(ProviderProduct {
                        id: c.get("catalogUid").and_then(id_string)?,
                        name: c
                            .get("title")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect())
        })
        .await
    }

    async fn get_shipping_rates(
        &self,
        address: &ShippingAddress,
        items: &[OrderItem],
    ) -> Result<Vec<ShippingRate>, ProviderError> {
        timed(SLUG, "get_shipping_rates", async {
            let body = json!({
                "orderReferenceId": format!("quote-{}", uuid::Uuid::new_v4()),
                "customerReferenceId": "quote",
                "currency": self.currency,
                "allowMultipleQuotes": true,
                "recipient": Self::address_json(address),
                "products": items.iter().map(Self::item_json).collect::<Vec<_>>(),
            });
            let quote: GlQuoteResponse = self
                .post_json(format!("{}/v4/orders:quote", self.base_url), &body)
                .await?;
            Ok(quote
                .quotes
                .into_iter()
                .flat_map(|q| q.shipment_methods)
                .map(|m| ShippingRate {
                    provider: SLUG,
                    id: m.shipment_method_uid,
                    name: m.name,
                    amount_cents: float_to_cents(m.price),
                    currency: m.currency.unwrap_or_else(|| self.currency.clone()),
                    min_delivery_days: m.min_delivery_days,
                    max_delivery_days: m.max_delivery_days,
                })
                .collect())
        })
        .await
    }

    async fn create_order(
        &self,
        items: &[OrderItem],
        address: &ShippingAddress,
        metadata: &OrderMetadata,
    ) -> Result<CreatedOrder, ProviderError> {
        timed(SLUG, "create_order", async {
            let body = json!({
                "orderType": "order",
                "orderReferenceId": metadata.reference,
                "customerReferenceId": metadata.brand_id,
                "currency": self.currency,
                "items": items.iter().map(Self::item_json).collect::<Vec<_>>(),
                "shippingAddress": Self::address_json(address),
            });
            debug!(reference = %metadata.reference, items = items.len(), "Creating Gelato order");
            let order: GlOrder = self
                .post_json(format!("{}/v4/orders", self.base_url), &body)
                .await?;
            Ok(CreatedOrder {
                status: map_gelato_status(&order.fulfillment_status),
                external_order_id: order.id,
                raw_status: order.fulfillment_status,
                estimated_completion: None,
            })
        })
        .await
    }

    async fn get_order_status(
        &self,
        external_order_id: &str,
    ) -> Result<ProviderOrderStatus, ProviderError> {
        timed(SLUG, "get_order_status", async {
            let order: GlOrder = self
                .get_json(format!(
                    "{}/v4/orders/{}",
                    self.base_url,
                    urlencoding::encode(external_order_id)
                ))
                .await?;
            Ok(Self::to_order_status(order))
        })
        .await
    }

    async fn find_order_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<ProviderOrderStatus>, ProviderError> {
        let found = timed(SLUG, "find_order_by_reference", async {
            let body = json!({ "orderReferenceIds": [reference], "limit": 1 });
            let result: GlSearchResponse = self
                .post_json(format!("{}/v4/orders:search", self.base_url), &body)
                .await?;
            Ok(result
                .orders
                .into_iter()
                .find(|o| o.order_reference_id.as_deref() == Some(reference)))
        })
        .await?;

        match found {
            // Search results are summaries; fetch the full order for shipments.
            Some(order) => self.get_order_status(&order.id).await.map(Some),
            None => Ok(None),
        }
    }

    async fn cancel_order(&self, external_order_id: &str) -> Result<CancelOutcome, ProviderError> {
        timed(SLUG, "cancel_order", async {
            let url = format!(
                "{}/v4/orders/{}:cancel",
                self.base_url,
                urlencoding::encode(external_order_id)
            );
            let response = self.client.post(url).send().await.map_err(http::send_error)?;
            match http::check_status(response).await {
                Ok(_) => Ok(CancelOutcome::cancelled()),
                Err(ProviderError::Rejected { message, .. }) => Ok(CancelOutcome::refused(message)),
                Err(e) => Err(e),
            }
        })
        .await
    }

    fn verify_webhook(&self, payload: &[u8], signature: Option<&str>) -> bool {
        verify_signature(self.webhook_secret.as_deref(), payload, signature)
    }

    fn signature_header(&self) -> &'static str {
        "x-gelato-signature"
    }

    fn parse_webhook(&self, payload: &Value) -> Option<ProviderWebhookEvent> {
        let event_type = payload.get("event")?.as_str()?.to_string();
        let external_order_id = payload.get("orderId").and_then(id_string);
        let reference = payload.get("orderReferenceId").and_then(id_string);
        if external_order_id.is_none() && reference.is_none() {
            return None;
        }

        let status = payload
            .get("fulfillmentStatus")
            .and_then(Value::as_str)
            .map(map_gelato_status);

        let shipment = payload
            .get("items")
            .cloned()
            .and_then(|items| serde_json::from_value::<Vec<GlItem>>(items).ok())
            .and_then(|items| {
                items
                    .into_iter()
                    .flat_map(|item| item.fulfillments)
                    .filter_map(GlFulfillment::into_shipment)
                    .next()
            });

        let kind = match status {
            Some(FulfillmentStatus::Shipped) | Some(FulfillmentStatus::InTransit) => {
                WebhookEventKind::OrderShipped
            }
            Some(FulfillmentStatus::Delivered) => WebhookEventKind::OrderDelivered,
            Some(FulfillmentStatus::Cancelled) => WebhookEventKind::OrderCancelled,
            Some(FulfillmentStatus::Failed) => WebhookEventKind::OrderFailed,
            _ => WebhookEventKind::OrderUpdated,
        };

        Some(ProviderWebhookEvent {
            kind,
            event_type,
            external_order_id,
            reference,
            status,
            shipment,
        })
    }
}

// ============================================================================
// Gelato API Response Types (private)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GlOrder {
    id: String,
    #[serde(default)]
    order_reference_id: Option<String>,
    #[serde(default)]
    fulfillment_status: String,
    #[serde(default)]
    items: Vec<GlItem>,
}

#[derive(Debug, Deserialize)]
struct GlItem {
    #[serde(default)]
    fulfillments: Vec<GlFulfillment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GlFulfillment {
    #[serde(default)]
    tracking_code: Option<String>,
    #[serde(default)]
    tracking_url: Option<String>,
    #[serde(default)]
    shipment_method_name: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl GlFulfillment {
    fn into_shipment(self) -> Option<ProviderShipment> {
        let tracking_number = self.tracking_code.filter(|c| !c.is_empty())?;
        Some(ProviderShipment {
            carrier: self
                .shipment_method_name
                .unwrap_or_else(|| "unknown".to_string()),
            tracking_number,
            tracking_url: self.tracking_url.filter(|u| !u.is_empty()),
            shipped_at: self.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GlSearchResponse {
    #[serde(default)]
    orders: Vec<GlOrder>,
}

#[derive(Debug, Deserialize)]
struct GlQuoteResponse {
    #[serde(default)]
    quotes: Vec<GlQuote>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GlQuote {
    #[serde(default)]
    shipment_methods: Vec<GlShipmentMethod>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GlShipmentMethod {
    shipment_method_uid: String,
    name: String,
    price: f64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    min_delivery_days: Option<u32>,
    #[serde(default)]
    max_delivery_days: Option<u32>,
}
