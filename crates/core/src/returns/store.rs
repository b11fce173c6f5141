use super::types::{ReturnFilter, ReturnRequest};
use crate::storage::StoreError;

/// Persistence for returns.
pub trait ReturnStore: Send + Sync {
    fn insert(&self, r: &ReturnRequest) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<ReturnRequest>, StoreError>;

    /// Compare-and-swap on `version`; returns the stored row with the bumped version.
    fn update(&self, r: &ReturnRequest) -> Result<ReturnRequest, StoreError>;

    fn list(&self, filter: &ReturnFilter) -> Result<Vec<ReturnRequest>, StoreError>;

    fn count(&self, filter: &ReturnFilter) -> Result<i64, StoreError>;
}
