use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::traits::{RenderError, RenderedFile, Renderer};
use crate::config::RenderConfig;
use crate::order::{LineItem, OrderSnapshot};

/// Client for the external render service.
pub struct HttpRenderer {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenderResponse {
    file_url: String,
}

impl HttpRenderer {
    pub fn new(base_url: impl Into<String>, config: &RenderConfig) -> Result<Self, RenderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RenderError::Rejected(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    fn name(&self) -> &str {
        "http"
    }

    async fn render(
        &self,
        order: &OrderSnapshot,
        item: &LineItem,
    ) -> Result<RenderedFile, RenderError> {
        let body = json!({
            "orderId": order.order_id,
            "brandId": order.brand_id,
            "lineItemId": item.id,
            "productRef": item.product_ref,
            "designId": item.design_id,
            "designFileUrl": item.design_file_url,
            "quantity": item.quantity,
        });
        debug!(order_id = %order.order_id, line_item_id = %item.id, "Requesting render");

        let response = self
            .client
            .post(format!("{}/render", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| RenderError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(RenderError::Transient(format!("render service returned {}", status)));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RenderError::Rejected(format!("{}: {}", status, message)));
        }

        let rendered: RenderResponse = response
            .json()
            .await
            .map_err(|e| RenderError::Transient(format!("invalid render response: {}", e)))?;
        Ok(RenderedFile {
            line_item_id: item.id.clone(),
            file_url: rendered.file_url,
        })
    }
}
