use std::time::Duration;

use super::types::{EnqueueOptions, FailOutcome, QueueCounts, QueueError, QueueJob};

/// A durable set of named queues.
///
/// Jobs are reserved with a visibility timeout: a reserved job that is
/// neither completed nor failed before the timeout becomes runnable again.
/// Settling operations take the job as returned by [`JobQueue::reserve`] and
/// fail with [`QueueError::LeaseLost`] once that reservation has been replaced.
pub trait JobQueue: Send + Sync {
    /// Add a job and return its id.
    fn enqueue(
        &self,
        queue: &str,
        payload: &serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<String, QueueError>;

    /// Claim the oldest runnable job. Returns `None` when the queue is empty or paused.
    fn reserve(&self, queue: &str, visibility: Duration) -> Result<Option<QueueJob>, QueueError>;

    fn complete(&self, job: &QueueJob) -> Result<(), QueueError>;

    /// Record a failed attempt, scheduling a retry with backoff or moving
    /// the job to the failed state once attempts are exhausted.
    fn fail(&self, job: &QueueJob, error: &str) -> Result<FailOutcome, QueueError>;

    /// Move a job straight to the failed state regardless of remaining attempts.
    fn dead_letter(&self, job: &QueueJob, error: &str) -> Result<(), QueueError>;

    /// Put an active job back in the delayed state without consuming an attempt.
    fn reschedule(&self, job: &QueueJob, delay: Duration) -> Result<(), QueueError>;

    fn get(&self, job_id: &str) -> Result<Option<QueueJob>, QueueError>;

    fn pause(&self, queue: &str) -> Result<(), QueueError>;

    fn resume(&self, queue: &str) -> Result<(), QueueError>;

    fn is_paused(&self, queue: &str) -> Result<bool, QueueError>;

    fn counts(&self, queue: &str) -> Result<QueueCounts, QueueError>;

    /// Move up to `limit` failed jobs back to waiting with a fresh attempt budget.
    /// Returns the number of jobs moved.
    fn retry_failed(&self, queue: &str, limit: usize) -> Result<usize, QueueError>;

    fn failed_jobs(&self, queue: &str, limit: usize) -> Result<Vec<QueueJob>, QueueError>;
}
