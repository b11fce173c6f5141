//! Testing utilities and mock implementations.
//!
//! Mocks stand in for the manufacturing providers and the render service so
//! the whole pipeline can run against in-memory SQLite.
//!
//! # Example
//!
//! ```rust,ignore
//! use pce_core::testing::{fixtures, MockProvider};
//!
//! let provider = MockProvider::new(ProviderSlug::Printful);
//! provider.fail_next_create(ProviderError::Timeout("slow".into()));
//! let order = fixtures::order("order-1", "brand-a");
//! ```

mod engine;
mod mock_provider;
mod mock_renderer;

pub use engine::TestEngine;
pub use mock_provider::{MockProvider, RecordedOrder, MOCK_WEBHOOK_SECRET};
pub use mock_renderer::MockRenderer;

use crate::provider::sign_payload;

/// Secret the test stack verifies tracking webhooks with.
pub const MOCK_TRACKING_SECRET: &str = "mock-tracking-secret";

/// Sign a tracking payload the way the tracking aggregator does.
pub fn sign_tracking(payload: &[u8]) -> String {
    sign_payload(MOCK_TRACKING_SECRET, payload)
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;

    use crate::order::{LineItem, OrderSnapshot, PaymentStatus};
    use crate::provider::{ProviderShipment, ShippingAddress};

    /// A valid US shipping address.
    pub fn address() -> ShippingAddress {
        ShippingAddress {
            name: "Ada Lovelace".to_string(),
            address1: "19 Union Square W".to_string(),
            address2: None,
            city: "New York".to_string(),
            state_code: Some("NY".to_string()),
            country_code: "US".to_string(),
            zip: "10003".to_string(),
            email: Some("ada@example.com".to_string()),
            phone: None,
        }
    }

    /// A paid order with one print-ready line item.
    pub fn order(order_id: &str, brand_id: &str) -> OrderSnapshot {
        OrderSnapshot {
            order_id: order_id.to_string(),
            brand_id: brand_id.to_string(),
            payment_status: PaymentStatus::Paid,
            currency: "USD".to_string(),
            total_cents: 2500,
            line_items: vec![LineItem {
                id: format!("{}-li-1", order_id),
                product_ref: "4012".to_string(),
                quantity: 1,
                design_file_url: Some(format!("https://cdn.test/designs/{}.png", order_id)),
                design_id: Some("design-1".to_string()),
            }],
            shipping_address: address(),
            customer_email: Some("ada@example.com".to_string()),
            created_at: Utc::now(),
        }
    }

    pub fn shipment(carrier: &str, tracking_number: &str) -> ProviderShipment {
        ProviderShipment {
            carrier: carrier.to_string(),
            tracking_number: tracking_number.to_string(),
            tracking_url: Some(format!("https://track.test/{}", tracking_number)),
            shipped_at: Some(Utc::now()),
        }
    }
}
