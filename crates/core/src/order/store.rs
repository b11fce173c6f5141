use super::types::{OrderError, OrderSnapshot};
use crate::storage::StoreError;

/// Source of order snapshots.
pub trait OrderStore: Send + Sync {
    /// Insert or replace the snapshot for `order.order_id`.
    fn record(&self, order: &OrderSnapshot) -> Result<(), StoreError>;

    fn get(&self, order_id: &str) -> Result<Option<OrderSnapshot>, StoreError>;

    /// Like [`OrderStore::get`], but a missing order is an error.
    fn require(&self, order_id: &str) -> Result<OrderSnapshot, OrderError> {
        self.get(order_id)?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))
    }
}
