use std::collections::BTreeMap;

use serde::Serialize;

use super::types::{Pipeline, PipelineFilter, RenderedArtifact};
use crate::storage::StoreError;

/// Result of [`PipelineStore::insert_if_absent`].
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Created(Pipeline),
    /// A non-terminal pipeline already existed for the order.
    Existing(Pipeline),
}

impl InsertOutcome {
    pub fn pipeline(&self) -> &Pipeline {
        match self {
            InsertOutcome::Created(p) | InsertOutcome::Existing(p) => p,
        }
    }

    pub fn into_pipeline(self) -> Pipeline {
        match self {
            InsertOutcome::Created(p) | InsertOutcome::Existing(p) => p,
        }
    }
}

/// Pipeline counts for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    /// Non-terminal pipelines per current stage.
    pub active_by_stage: BTreeMap<String, i64>,
}

/// Persistence for pipelines.
pub trait PipelineStore: Send + Sync {
    /// Insert `pipeline` unless a non-terminal pipeline already exists for its order.
    fn insert_if_absent(&self, pipeline: &Pipeline) -> Result<InsertOutcome, StoreError>;

    fn get(&self, id: &str) -> Result<Option<Pipeline>, StoreError>;

    /// The non-terminal pipeline for an order, if any.
    fn find_active_by_order(&self, order_id: &str) -> Result<Option<Pipeline>, StoreError>;

    /// Compare-and-swap update guarded by `pipeline.version`.
    ///
    /// Returns the stored pipeline with its new version, or
    /// [`StoreError::Conflict`] if another writer got there first.
    /// Rendered artifacts are not written here; see [`PipelineStore::record_artifacts`].
    fn update(&self, pipeline: &Pipeline) -> Result<Pipeline, StoreError>;

    /// Replace the rendered artifacts. This is an administrative field and
    /// does not take part in version checks.
    fn record_artifacts(&self, id: &str, artifacts: &[RenderedArtifact])
        -> Result<(), StoreError>;

    fn list(&self, filter: &PipelineFilter) -> Result<Vec<Pipeline>, StoreError>;

    fn count(&self, filter: &PipelineFilter) -> Result<i64, StoreError>;

    fn stats(&self, brand_id: Option<&str>) -> Result<PipelineStats, StoreError>;
}
