use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::{LineItem, OrderSnapshot};

/// Output of rendering one line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedFile {
    pub line_item_id: String,
    pub file_url: String,
}

#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// Worth retrying.
    #[error("Render temporarily failed: {0}")]
    Transient(String),

    /// The design cannot be rendered as submitted.
    #[error("Render rejected: {0}")]
    Rejected(String),
}

/// Produces print-ready files.
#[async_trait]
pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    async fn render(
        &self,
        order: &OrderSnapshot,
        item: &LineItem,
    ) -> Result<RenderedFile, RenderError>;
}
