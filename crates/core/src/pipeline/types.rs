use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Stage
// ============================================================================

/// Fixed, totally ordered stages every order moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    Validation,
    Render,
    Manufacturing,
    Fulfillment,
    Shipped,
    Delivered,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 6] = [
        PipelineStage::Validation,
        PipelineStage::Render,
        PipelineStage::Manufacturing,
        PipelineStage::Fulfillment,
        PipelineStage::Shipped,
        PipelineStage::Delivered,
    ];

    pub fn first() -> Self {
        PipelineStage::Validation
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Validation => "VALIDATION",
            PipelineStage::Render => "RENDER",
            PipelineStage::Manufacturing => "MANUFACTURING",
            PipelineStage::Fulfillment => "FULFILLMENT",
            PipelineStage::Shipped => "SHIPPED",
            PipelineStage::Delivered => "DELIVERED",
        }
    }

    /// Zero-based position in the stage order.
    pub fn position(&self) -> usize {
        match self {
            PipelineStage::Validation => 0,
            PipelineStage::Render => 1,
            PipelineStage::Manufacturing => 2,
            PipelineStage::Fulfillment => 3,
            PipelineStage::Shipped => 4,
            PipelineStage::Delivered => 5,
        }
    }

    pub fn next(&self) -> Option<PipelineStage> {
        Self::ALL.get(self.position() + 1).copied()
    }

    /// Reaching this stage completes the pipeline; no work is queued for it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Delivered)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown pipeline stage: {}", s))
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    pub const ALL: [PipelineStatus; 5] = [
        PipelineStatus::Pending,
        PipelineStatus::InProgress,
        PipelineStatus::Completed,
        PipelineStatus::Failed,
        PipelineStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Pending => "PENDING",
            PipelineStatus::InProgress => "IN_PROGRESS",
            PipelineStatus::Completed => "COMPLETED",
            PipelineStatus::Failed => "FAILED",
            PipelineStatus::Cancelled => "CANCELLED",
        }
    }

    /// Completed and cancelled pipelines are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Completed | PipelineStatus::Cancelled)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown pipeline status: {}", s))
    }
}

// ============================================================================
// History and errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageOutcome {
    Completed,
    Failed,
    Retried,
    Cancelled,
}

/// One visit of a pipeline to a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub stage: PipelineStage,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    pub outcome: Option<StageOutcome>,
    /// What caused the stage to be entered ("created", "worker", "manual", "retry").
    pub trigger: String,
}

impl StageHistoryEntry {
    pub fn is_open(&self) -> bool {
        self.exited_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineErrorEntry {
    pub stage: PipelineStage,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Options supplied by the caller of `process_order`, embedded in every stage job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Line items already carry print-ready files.
    #[serde(default)]
    pub skip_render: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Print-ready file produced by the render stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedArtifact {
    pub line_item_id: String,
    pub file_url: String,
    pub rendered_at: DateTime<Utc>,
}

/// One pipeline per order being fulfilled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub order_id: String,
    pub brand_id: String,
    pub current_stage: PipelineStage,
    pub status: PipelineStatus,
    pub options: PipelineOptions,
    /// Append-only.
    pub stage_history: Vec<StageHistoryEntry>,
    /// Append-only.
    pub errors: Vec<PipelineErrorEntry>,
    pub artifacts: Vec<RenderedArtifact>,
    pub cancel_reason: Option<String>,
    /// Incremented by the store on every successful update.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Pipeline {
    /// A fresh PENDING pipeline sitting at the first stage.
    pub fn new(order_id: &str, brand_id: &str, options: PipelineOptions) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            brand_id: brand_id.to_string(),
            current_stage: PipelineStage::first(),
            status: PipelineStatus::Pending,
            options,
            stage_history: vec![StageHistoryEntry {
                stage: PipelineStage::first(),
                entered_at: now,
                exited_at: None,
                outcome: None,
                trigger: "created".to_string(),
            }],
            errors: Vec::new(),
            artifacts: Vec::new(),
            cancel_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Completion percentage derived from the stage position.
    pub fn progress(&self) -> u8 {
        if self.status == PipelineStatus::Completed {
            return 100;
        }
        let last = PipelineStage::Delivered.position();
        ((self.current_stage.position() * 100) / last) as u8
    }

    pub fn last_error(&self) -> Option<&PipelineErrorEntry> {
        self.errors.last()
    }

    pub fn open_history_entry(&self) -> Option<&StageHistoryEntry> {
        self.stage_history.last().filter(|entry| entry.is_open())
    }
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineFilter {
    pub brand_id: Option<String>,
    pub status: Option<PipelineStatus>,
    pub stage: Option<PipelineStage>,
    pub order_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for PipelineFilter {
    fn default() -> Self {
        Self {
            brand_id: None,
            status: None,
            stage: None,
            order_id: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl PipelineFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_brand(mut self, brand_id: impl Into<String>) -> Self {
        self.brand_id = Some(brand_id.into());
        self
    }

    pub fn with_status(mut self, status: PipelineStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_stage(mut self, stage: PipelineStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_is_strict() {
        let positions: Vec<usize> = PipelineStage::ALL.iter().map(|s| s.position()).collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4, 5]);
        assert!(PipelineStage::Validation < PipelineStage::Delivered);
        assert_eq!(PipelineStage::Fulfillment.next(), Some(PipelineStage::Shipped));
        assert_eq!(PipelineStage::Delivered.next(), None);
    }

    #[test]
    fn test_stage_parse() {
        assert_eq!(
            "MANUFACTURING".parse::<PipelineStage>().unwrap(),
            PipelineStage::Manufacturing
        );
        assert_eq!(
            "shipped".parse::<PipelineStage>().unwrap(),
            PipelineStage::Shipped
        );
        assert!("PACKING".parse::<PipelineStage>().is_err());
    }

    #[test]
    fn test_stage_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&PipelineStage::Manufacturing).unwrap();
        assert_eq!(json, "\"MANUFACTURING\"");
        let json = serde_json::to_string(&PipelineStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
    }

    #[test]
    fn test_status_terminal() {
        assert!(PipelineStatus::Completed.is_terminal());
        assert!(PipelineStatus::Cancelled.is_terminal());
        assert!(!PipelineStatus::Failed.is_terminal());
        assert!(!PipelineStatus::Pending.is_terminal());
    }

    #[test]
    fn test_new_pipeline() {
        let pipeline = Pipeline::new("o1", "b1", PipelineOptions::default());
        assert_eq!(pipeline.status, PipelineStatus::Pending);
        assert_eq!(pipeline.current_stage, PipelineStage::Validation);
        assert_eq!(pipeline.stage_history.len(), 1);
        assert!(pipeline.open_history_entry().is_some());
        assert_eq!(pipeline.progress(), 0);
    }

    #[test]
    fn test_progress() {
        let mut pipeline = Pipeline::new("o1", "b1", PipelineOptions::default());
        pipeline.current_stage = PipelineStage::Fulfillment;
        assert_eq!(pipeline.progress(), 60);
        pipeline.current_stage = PipelineStage::Delivered;
        pipeline.status = PipelineStatus::Completed;
        assert_eq!(pipeline.progress(), 100);
    }
}
