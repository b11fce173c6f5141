//! Mock renderer for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::order::{LineItem, OrderSnapshot};
use crate::render::{RenderError, RenderedFile, Renderer};

/// Renders every line item to `https://render.test/{order}/{line_item}.png`
/// unless a failure is queued.
#[derive(Debug, Default)]
pub struct MockRenderer {
    failures: Mutex<VecDeque<RenderError>>,
    rendered: Mutex<Vec<String>>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next render call fails with this error.
    pub fn fail_next(&self, error: RenderError) {
        lock(&self.failures).push_back(error);
    }

    /// Line item ids rendered so far.
    pub fn rendered(&self) -> Vec<String> {
        lock(&self.rendered).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Renderer for MockRenderer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn render(
        &self,
        order: &OrderSnapshot,
        item: &LineItem,
    ) -> Result<RenderedFile, RenderError> {
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }
        lock(&self.rendered).push(item.id.clone());
        Ok(RenderedFile {
            line_item_id: item.id.clone(),
            file_url: format!("https://render.test/{}/{}.png", order.order_id, item.id),
        })
    }
}
