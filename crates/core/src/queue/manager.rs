use std::sync::Arc;

use tracing::info;

use super::traits::JobQueue;
use super::types::{QueueCounts, QueueError, QueueJob, QueueStatus};

/// Operational facade over a fixed set of named queues.
///
/// Pausing a queue stops it for every tenant that shares it.
pub struct QueueManager {
    queue: Arc<dyn JobQueue>,
    names: Vec<String>,
}

impl QueueManager {
    pub fn new<I, S>(queue: Arc<dyn JobQueue>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue,
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn ensure_known(&self, name: &str) -> Result<(), QueueError> {
        if self.names.iter().any(|n| n == name) {
            Ok(())
        } else {
            Err(QueueError::UnknownQueue(name.to_string()))
        }
    }

    pub fn get_all_queues_status(&self) -> Result<Vec<QueueStatus>, QueueError> {
        self.names
            .iter()
            .map(|name| {
                Ok(QueueStatus {
                    name: name.clone(),
                    counts: self.queue.counts(name)?,
                })
            })
            .collect()
    }

    pub fn get_queue_counts(&self, name: &str) -> Result<QueueCounts, QueueError> {
        self.ensure_known(name)?;
        self.queue.counts(name)
    }

    pub fn pause_queue(&self, name: &str) -> Result<(), QueueError> {
        self.ensure_known(name)?;
        self.queue.pause(name)?;
        info!(queue = %name, "Queue paused");
        Ok(())
    }

    pub fn resume_queue(&self, name: &str) -> Result<(), QueueError> {
        self.ensure_known(name)?;
        self.queue.resume(name)?;
        info!(queue = %name, "Queue resumed");
        Ok(())
    }

    /// Move up to `limit` failed jobs back to waiting. Returns the number moved.
    pub fn retry_failed_jobs(&self, name: &str, limit: usize) -> Result<usize, QueueError> {
        self.ensure_known(name)?;
        let moved = self.queue.retry_failed(name, limit)?;
        info!(queue = %name, limit, moved, "Retried failed jobs");
        Ok(moved)
    }

    pub fn failed_jobs(&self, name: &str, limit: usize) -> Result<Vec<QueueJob>, QueueError> {
        self.ensure_known(name)?;
        self.queue.failed_jobs(name, limit)
    }
}
