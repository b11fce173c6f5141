use super::types::{Fulfillment, FulfillmentFilter};
use crate::provider::ProviderSlug;
use crate::storage::StoreError;

/// Persistence for fulfillments. Rows are never deleted.
pub trait FulfillmentStore: Send + Sync {
    /// Fails with [`StoreError::Constraint`] if the pipeline already has an
    /// active (non-cancelled) fulfillment.
    fn insert(&self, fulfillment: &Fulfillment) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<Fulfillment>, StoreError>;

    /// The non-cancelled fulfillment for a pipeline, if any.
    fn find_active_by_pipeline(&self, pipeline_id: &str)
        -> Result<Option<Fulfillment>, StoreError>;

    fn find_by_external_order(
        &self,
        provider: ProviderSlug,
        external_order_id: &str,
    ) -> Result<Option<Fulfillment>, StoreError>;

    fn find_by_tracking_number(&self, tracking_number: &str)
        -> Result<Option<Fulfillment>, StoreError>;

    fn find_by_reference(&self, reference: &str) -> Result<Option<Fulfillment>, StoreError>;

    /// Compare-and-swap update guarded by `fulfillment.version`.
    ///
    /// An existing tracking number is never overwritten.
    fn update(&self, fulfillment: &Fulfillment) -> Result<Fulfillment, StoreError>;

    fn list(&self, filter: &FulfillmentFilter) -> Result<Vec<Fulfillment>, StoreError>;

    fn count(&self, filter: &FulfillmentFilter) -> Result<i64, StoreError>;

    /// Fulfillments handed to a carrier and not yet delivered.
    fn list_in_transit(&self) -> Result<Vec<Fulfillment>, StoreError>;
}
