//! Printful API client.
//!
//! Every response is wrapped in `{ "code": ..., "result": ... }`. Orders carry
//! our reference as `external_id` and can be fetched back with `@{external_id}`.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::config::PrintfulConfig;
use super::http::{self, id_string, parse_cents, timed};
use super::signature::verify_signature;
use super::types::*;
use crate::fulfillment::FulfillmentStatus;

const SLUG: ProviderSlug = ProviderSlug::Printful;

/// Map a native Printful order status. Unknown values degrade to SUBMITTED.
pub fn map_printful_status(raw: &str) -> FulfillmentStatus {
    match raw.to_ascii_lowercase().as_str() {
        "draft" => FulfillmentStatus::Draft,
        "pending" | "onhold" => FulfillmentStatus::Submitted,
        "inprocess" | "partial" => FulfillmentStatus::InProduction,
        "fulfilled" => FulfillmentStatus::Shipped,
        "canceled" | "cancelled" => FulfillmentStatus::Cancelled,
        "failed" => FulfillmentStatus::Failed,
        _ => FulfillmentStatus::Submitted,
    }
}

/// Printful provider.
pub struct PrintfulProvider {
    client: Client,
    base_url: String,
    webhook_secret: Option<String>,
}

impl PrintfulProvider {
    pub fn new(config: &PrintfulConfig) -> Result<Self, ProviderError> {
        if config.api_token.trim().is_empty() {
            return Err(ProviderError::Config("printful api_token is empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_token))
            .map_err(|e| ProviderError::Config(format!("invalid printful token: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        if let Some(store_id) = &config.store_id {
            let value = HeaderValue::from_str(store_id)
                .map_err(|e| ProviderError::Config(format!("invalid printful store id: {}", e)))?;
            headers.insert("X-PF-Store-Id", value);
        }

        Ok(Self {
            client: http::build_client(config.timeout_secs, headers)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            webhook_secret: config.webhook_secret.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_result<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(http::send_error)?;
        let envelope: Envelope<T> = http::read_json(response).await?;
        Ok(envelope.result)
    }

    async fn post_result<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(http::send_error)?;
        let envelope: Envelope<T> = http::read_json(response).await?;
        Ok(envelope.result)
    }

    fn recipient(address: &ShippingAddress) -> Value {
        json!({
            "name": address.name,
            "address1": address.address1,
            "address2": address.address2,
            "city": address.city,
            "state_code": address.state_code,
            "country_code": address.country_code,
            "zip": address.zip,
            "email": address.email,
            "phone": address.phone,
        })
    }

    /// Catalog variants are numeric ids; anything else is a sync variant reference.
    fn item_json(item: &OrderItem) -> Value {
        let mut value = match item.product_ref.parse::<u64>() {
            Ok(variant_id) => json!({ "variant_id": variant_id }),
            Err(_) => json!({ "external_variant_id": item.product_ref }),
        };
        value["external_id"] = json!(item.line_item_id);
        value["quantity"] = json!(item.quantity);
        if let Some(url) = &item.file_url {
            value["files"] = json!([{ "url": url }]);
        }
        value
    }

    fn to_order_status(order: PfOrder) -> Result<ProviderOrderStatus, ProviderError> {
        let external_order_id = id_string(&order.id)
            .ok_or_else(|| ProviderError::InvalidResponse("order without id".to_string()))?;
        let shipment = order
            .shipments
            .into_iter()
            .filter_map(PfShipment::into_shipment)
            .last();
        Ok(ProviderOrderStatus {
            external_order_id,
            status: map_printful_status(&order.status),
            raw_status: order.status,
            shipment,
            estimated_delivery: None,
        })
    }
}

#[async_trait]
impl PodProvider for PrintfulProvider {
    fn slug(&self) -> ProviderSlug {
        SLUG
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        timed(SLUG, "connect", async {
            let stores: Vec<Value> = self.get_result("/stores").await?;
            info!(stores = stores.len(), "Connected to Printful");
            Ok(())
        })
        .await
    }

    async fn get_products(&self) -> Result<Vec<ProviderProduct>, ProviderError> {
        timed(SLUG, "get_products", async {
            let products: Vec<PfProduct> = self.get_result("/store/products").await?;
            Ok(products
                .into_iter()
                .filter_map(|p| {
                    Some(ProviderProduct {
                        id: id_string(&p.id)?,
                        name: p.name,
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
                "recipient": {
                    "address1": address.address1,
                    "city": address.city,
                    "country_code": address.country_code,
                    "state_code": address.state_code,
                    "zip": address.zip,
                },
                "items": items.iter().map(Self::item_json).collect::<Vec<_>>(),
            });
            let rates: Vec<PfRate> = self.post_result("/shipping/rates", &body).await?;
            Ok(rates
                .into_iter()
                .filter_map(|rate| {
                    let Some(amount_cents) = parse_cents(&rate.rate) else {
                        warn!(rate = %rate.rate, "Skipping Printful rate with unparseable amount");
                        return None;
                    };
                    Some(ShippingRate {
                        provider: SLUG,
                        id: rate.id,
                        name: rate.name,
                        amount_cents,
                        currency: rate.currency,
                        min_delivery_days: rate.min_delivery_days,
                        max_delivery_days: rate.max_delivery_days,
                    })
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
                "external_id": metadata.reference,
                "recipient": Self::recipient(address),
                "items": items.iter().map(Self::item_json).collect::<Vec<_>>(),
            });
            debug!(reference = %metadata.reference, items = items.len(), "Creating Printful order");
            let order: PfOrder = self.post_result("/orders?confirm=true", &body).await?;
            let status = Self::to_order_status(order)?;
            Ok(CreatedOrder {
                external_order_id: status.external_order_id,
                status: status.status,
                raw_status: status.raw_status,
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
            let path = format!("/orders/{}", urlencoding::encode(external_order_id));
            let order: PfOrder = self.get_result(&path).await?;
            Self::to_order_status(order)
        })
        .await
    }

    async fn find_order_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<ProviderOrderStatus>, ProviderError> {
        timed(SLUG, "find_order_by_reference", async {
            let path = format!("/orders/@{}", urlencoding::encode(reference));
            match self.get_result::<PfOrder>(&path).await {
                Ok(order) => Self::to_order_status(order).map(Some),
                Err(ProviderError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn cancel_order(&self, external_order_id: &str) -> Result<CancelOutcome, ProviderError> {
        timed(SLUG, "cancel_order", async {
            let response = self
                .client
                .delete(self.url(&format!("/orders/{}", urlencoding::encode(external_order_id))))
                .send()
                .await
                .map_err(http::send_error)?;
            match http::check_status(response).await {
                Ok(_) => Ok(CancelOutcome::cancelled()),
                // Printful refuses cancellation once production has started.
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
        "x-pf-signature"
    }

    fn parse_webhook(&self, payload: &Value) -> Option<ProviderWebhookEvent> {
        let event_type = payload.get("type")?.as_str()?.to_string();
        let data = payload.get("data")?;
        let order = data.get("order");

        let kind = match event_type.as_str() {
            "package_shipped" => WebhookEventKind::OrderShipped,
            "order_failed" => WebhookEventKind::OrderFailed,
            "order_canceled" => WebhookEventKind::OrderCancelled,
            "order_put_hold" => WebhookEventKind::OrderOnHold,
            _ => WebhookEventKind::OrderUpdated,
        };

        let external_order_id = order.and_then(|o| o.get("id")).and_then(id_string);
        let reference = order.and_then(|o| o.get("external_id")).and_then(id_string);
        if external_order_id.is_none() && reference.is_none() {
            return None;
        }

        let status = match kind {
            WebhookEventKind::OrderShipped => Some(FulfillmentStatus::Shipped),
            WebhookEventKind::OrderFailed => Some(FulfillmentStatus::Failed),
            WebhookEventKind::OrderCancelled => Some(FulfillmentStatus::Cancelled),
            _ => order
                .and_then(|o| o.get("status"))
                .and_then(Value::as_str)
                .map(map_printful_status),
        };

        let shipment = data
            .get("shipment")
            .cloned()
            .and_then(|s| serde_json::from_value::<PfShipment>(s).ok())
            .and_then(PfShipment::into_shipment);

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
// Printful API Response Types (private)
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct PfProduct {
    id: Value,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PfRate {
    id: String,
    name: String,
    rate: String,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default, rename = "minDeliveryDays")]
    min_delivery_days: Option<u32>,
    #[serde(default, rename = "maxDeliveryDays")]
    max_delivery_days: Option<u32>,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Deserialize)]
struct PfOrder {
    id: Value,
    #[serde(default)]
    status: String,
    #[serde(default)]
    shipments: Vec<PfShipment>,
}

#[derive(Debug, Deserialize)]
struct PfShipment {
    #[serde(default)]
    carrier: Option<String>,
    #[serde(default)]
    tracking_number: Option<Value>,
    #[serde(default)]
    tracking_url: Option<String>,
    /// Unix seconds
    #[serde(default)]
    shipped_at: Option<i64>,
}

impl PfShipment {
    fn into_shipment(self) -> Option<ProviderShipment> {
        let tracking_number = self.tracking_number.as_ref().and_then(id_string)?;
        let shipped_at: Option<DateTime<Utc>> = self
            .shipped_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        Some(ProviderShipment {
            carrier: self.carrier.unwrap_or_else(|| "unknown".to_string()),
            tracking_number,
            tracking_url: self.tracking_url.filter(|u| !u.is_empty()),
            shipped_at,
        })
    }
}
