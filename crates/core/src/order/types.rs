use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::{OrderItem, ShippingAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PAID" => Ok(PaymentStatus::Paid),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: String,
    /// Provider product reference (variant id or product uid).
    pub product_ref: String,
    pub quantity: u32,
    /// Print-ready design, used directly when rendering is skipped.
    #[serde(default)]
    pub design_file_url: Option<String>,
    /// Design to render, when the render service is used.
    #[serde(default)]
    pub design_id: Option<String>,
}

/// An order as it looked when payment was confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub brand_id: String,
    pub payment_status: PaymentStatus,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub total_cents: i64,
    pub line_items: Vec<LineItem>,
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl OrderSnapshot {
    /// Items ready for a manufacturing order, using rendered files where known.
    pub fn order_items(&self, rendered: &[(String, String)]) -> Vec<OrderItem> {
        self.line_items
            .iter()
            .map(|item| {
                let file_url = rendered
                    .iter()
                    .find(|(line_item_id, _)| line_item_id == &item.id)
                    .map(|(_, url)| url.clone())
                    .or_else(|| item.design_file_url.clone());
                OrderItem {
                    line_item_id: item.id.clone(),
                    product_ref: item.product_ref.clone(),
                    quantity: item.quantity,
                    file_url,
                }
            })
            .collect()
    }

    /// Problems that make this order unmanufacturable. Empty when valid.
    pub fn validation_errors(&self, require_design_files: bool) -> Vec<String> {
        let mut errors = Vec::new();

        if self.payment_status != PaymentStatus::Paid {
            errors.push(format!("order is not paid ({})", self.payment_status));
        }
        if self.line_items.is_empty() {
            errors.push("order has no line items".to_string());
        }
        for item in &self.line_items {
            if item.quantity == 0 {
                errors.push(format!("line item {} has zero quantity", item.id));
            }
            if item.product_ref.trim().is_empty() {
                errors.push(format!("line item {} has no product reference", item.id));
            }
            if require_design_files && item.design_file_url.is_none() {
                errors.push(format!("line item {} has no design file", item.id));
            }
        }

        let address = &self.shipping_address;
        let required = [
            ("name", &address.name),
            ("address1", &address.address1),
            ("city", &address.city),
            ("country_code", &address.country_code),
            ("zip", &address.zip),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                errors.push(format!("shipping address is missing {}", field));
            }
        }
        if address.country_code.trim().len() != 2 {
            errors.push("shipping country must be a two-letter code".to_string());
        }

        errors
    }
}

/// Errors reading or writing orders.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Store(#[from] crate::storage::StoreError),
}
