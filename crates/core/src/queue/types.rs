use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The job's reservation expired and it was claimed again.
    #[error("Reservation lost for job {0}")]
    LeaseLost(String),

    #[error("Invalid job payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::Store(e.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "delayed" => Ok(JobState::Delayed),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

/// A job as stored in a queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueJob {
    pub id: String,
    pub queue: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    /// Number of times the job has been reserved (1 on first execution).
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Token of the current reservation. Settling requires a match.
    #[serde(skip)]
    pub reservation: Option<String>,
}

impl QueueJob {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| QueueError::Payload(e.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Hold the job in the delayed state for this long.
    pub delay: Option<Duration>,
    /// Overrides the queue's retry policy.
    pub max_attempts: Option<u32>,
}

impl EnqueueOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }
}

/// What happened to a job reported as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled for another attempt.
    Retrying { attempt: u32, retry_in: Duration },
    /// Attempts exhausted; the job is now in the failed state.
    Exhausted { attempts: u32 },
}

/// Job counts for a single queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub delayed: i64,
    /// Runnable jobs held back because the queue is paused.
    pub paused: i64,
    pub is_paused: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub name: String,
    #[serde(flatten)]
    pub counts: QueueCounts,
}
