use async_trait::async_trait;

use super::traits::{RenderError, RenderedFile, Renderer};
use crate::order::{LineItem, OrderSnapshot};

/// Uses the line item's design file without rendering.
#[derive(Debug, Default, Clone)]
pub struct PassthroughRenderer;

impl PassthroughRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Renderer for PassthroughRenderer {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn render(
        &self,
        _order: &OrderSnapshot,
        item: &LineItem,
    ) -> Result<RenderedFile, RenderError> {
        let file_url = item.design_file_url.clone().ok_or_else(|| {
            RenderError::Rejected(format!("line item {} has no design file", item.id))
        })?;
        Ok(RenderedFile {
            line_item_id: item.id.clone(),
            file_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_passthrough_uses_design_file() {
        let order = fixtures::order("o1", "b1");
        let item = &order.line_items[0];
        let rendered = PassthroughRenderer::new().render(&order, item).await.unwrap();
        assert_eq!(Some(rendered.file_url), item.design_file_url);
    }

    #[tokio::test]
    async fn test_passthrough_without_design_is_rejected() {
        let mut order = fixtures::order("o1", "b1");
        order.line_items[0].design_file_url = None;
        let item = order.line_items[0].clone();
        let err = PassthroughRenderer::new().render(&order, &item).await.unwrap_err();
        assert!(matches!(err, RenderError::Rejected(_)));
    }
}
