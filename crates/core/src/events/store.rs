use chrono::{DateTime, Utc};
use super::EventRecord;
use crate::storage::StoreError;

/// Filter for querying the event log
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub brand_id: Option<String>,
    pub pipeline_id: Option<String>,
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl EventFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            offset: 0,
            ..Default::default()
        }
    }

    pub fn with_brand(mut self, brand_id: impl Into<String>) -> Self {
        self.brand_id = Some(brand_id.into());
        self
    }

    pub fn with_pipeline(mut self, pipeline_id: impl Into<String>) -> Self {
        self.pipeline_id = Some(pipeline_id.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_time_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Append-only storage for domain events
pub trait EventLog: Send + Sync {
    /// Append a record, returns the assigned ID
    fn append(&self, record: &EventRecord) -> Result<i64, StoreError>;

    /// Newest first
    fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, StoreError>;

    fn count(&self, filter: &EventFilter) -> Result<i64, StoreError>;
}
