use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, warn};

use super::config::RetryPolicy;
use super::traits::JobQueue;
use super::types::{EnqueueOptions, FailOutcome, JobState, QueueCounts, QueueError, QueueJob};
use crate::storage::{self, lock, parse_enum, parse_json};

const COLUMNS: &str = "id, queue, payload, state, attempts, max_attempts, last_error, \
     run_at_ms, created_at_ms, updated_at_ms, finished_at_ms, reservation";

/// SQLite-backed [`JobQueue`].
///
/// All named queues share one table. Scheduling times are stored as epoch
/// milliseconds so that due-job selection is a plain integer comparison.
pub struct SqliteJobQueue {
    conn: Mutex<Connection>,
    policy: RetryPolicy,
}

impl SqliteJobQueue {
    pub fn new(path: impl AsRef<Path>, policy: RetryPolicy) -> Result<Self, QueueError> {
        let conn = storage::open(path.as_ref())?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            policy,
        })
    }

    pub fn in_memory(policy: RetryPolicy) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            policy,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn initialize_schema(conn: &Connection) -> Result<(), QueueError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_jobs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                queue TEXT NOT NULL,
                payload TEXT NOT NULL,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                last_error TEXT,
                run_at_ms INTEGER NOT NULL,
                reserved_until_ms INTEGER,
                reservation TEXT,
                created_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL,
                finished_at_ms INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_queue_jobs_ready
                ON queue_jobs(queue, state, run_at_ms);

            CREATE TABLE IF NOT EXISTS queue_state (
                queue TEXT PRIMARY KEY,
                paused INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )?;

        // Databases created before reservations were tracked
        let has_reservation: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('queue_jobs') WHERE name = 'reservation'",
            [],
            |row| row.get(0),
        )?;
        if has_reservation == 0 {
            conn.execute("ALTER TABLE queue_jobs ADD COLUMN reservation TEXT", [])?;
        }
        Ok(())
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
    }

    fn row_to_job(row: &Row<'_>) -> Result<QueueJob, rusqlite::Error> {
        let payload: String = row.get(2)?;
        let state: String = row.get(3)?;
        let finished_at: Option<i64> = row.get(10)?;

        Ok(QueueJob {
            id: row.get(0)?,
            queue: row.get(1)?,
            payload: parse_json(&payload)?,
            state: parse_enum::<JobState>(&state)?,
            attempts: row.get(4)?,
            max_attempts: row.get(5)?,
            last_error: row.get(6)?,
            run_at: Self::ms_to_datetime(row.get(7)?),
            created_at: Self::ms_to_datetime(row.get(8)?),
            updated_at: Self::ms_to_datetime(row.get(9)?),
            finished_at: finished_at.map(Self::ms_to_datetime),
            reservation: row.get(11)?,
        })
    }

    fn get_with(conn: &Connection, job_id: &str) -> Result<Option<QueueJob>, QueueError> {
        let sql = format!("SELECT {} FROM queue_jobs WHERE id = ?1", COLUMNS);
        Ok(conn
            .query_row(&sql, params![job_id], Self::row_to_job)
            .optional()?)
    }

    fn paused_with(conn: &Connection, queue: &str) -> Result<bool, QueueError> {
        let paused: Option<bool> = conn
            .query_row(
                "SELECT paused FROM queue_state WHERE queue = ?1",
                params![queue],
                |row| row.get(0),
            )
            .optional()?;
        Ok(paused.unwrap_or(false))
    }

    fn set_paused(&self, queue: &str, paused: bool) -> Result<(), QueueError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO queue_state (queue, paused) VALUES (?1, ?2)
             ON CONFLICT(queue) DO UPDATE SET paused = excluded.paused",
            params![queue, paused],
        )?;
        Ok(())
    }

    /// Return expired reservations to the queue and promote due delayed jobs.
    fn housekeep(conn: &Connection, queue: &str, now: i64) -> Result<(), QueueError> {
        let reclaimed = conn.execute(
            "UPDATE queue_jobs SET state = 'waiting', reserved_until_ms = NULL,
                 reservation = NULL, run_at_ms = ?2, updated_at_ms = ?2
             WHERE queue = ?1 AND state = 'active' AND reserved_until_ms < ?2
                 AND attempts < max_attempts",
            params![queue, now],
        )?;
        let expired = conn.execute(
            "UPDATE queue_jobs SET state = 'failed', reserved_until_ms = NULL,
                 reservation = NULL, last_error = 'visibility timeout expired', updated_at_ms = ?2,
                 finished_at_ms = ?2
             WHERE queue = ?1 AND state = 'active' AND reserved_until_ms < ?2
                 AND attempts >= max_attempts",
            params![queue, now],
        )?;
        if reclaimed + expired > 0 {
            warn!(
                queue = %queue,
                reclaimed,
                expired,
                "Recovered jobs whose visibility timeout expired"
            );
        }

        conn.execute(
            "UPDATE queue_jobs SET state = 'waiting', updated_at_ms = ?2
             WHERE queue = ?1 AND state = 'delayed' AND run_at_ms <= ?2",
            params![queue, now],
        )?;
        Ok(())
    }

    /// Load a job that a worker is about to settle and check the worker
    /// still holds its reservation.
    fn load_for_settle(conn: &Connection, held: &QueueJob) -> Result<QueueJob, QueueError> {
        let job = Self::get_with(conn, &held.id)?
            .ok_or_else(|| QueueError::JobNotFound(held.id.clone()))?;
        if job.state != JobState::Active
            || job.reservation.is_none()
            || job.reservation != held.reservation
        {
            warn!(
                job_id = %held.id,
                state = %job.state,
                "Reservation lost; job belongs to another worker"
            );
            return Err(QueueError::LeaseLost(held.id.clone()));
        }
        Ok(job)
    }

    /// Run a settling update guarded by the reservation token.
    fn settle(
        conn: &Connection,
        held: &QueueJob,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<(), QueueError> {
        let sql = format!("{} WHERE id = ? AND state = 'active' AND reservation = ?", sql);
        let mut bound: Vec<&dyn rusqlite::ToSql> = params.to_vec();
        bound.push(&held.id);
        bound.push(&held.reservation);
        if conn.execute(&sql, bound.as_slice())? == 0 {
            return Err(QueueError::LeaseLost(held.id.clone()));
        }
        Ok(())
    }
}

impl JobQueue for SqliteJobQueue {
    fn enqueue(
        &self,
        queue: &str,
        payload: &serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<String, QueueError> {
        let conn = lock(&self.conn)?;
        let now = Self::now_ms();
        let id = uuid::Uuid::new_v4().to_string();
        let delay_ms = options.delay.map(|d| d.as_millis() as i64).unwrap_or(0);
        let state = if delay_ms > 0 {
            JobState::Delayed
        } else {
            JobState::Waiting
        };
        let max_attempts = options.max_attempts.unwrap_or(self.policy.max_attempts);

        conn.execute(
            "INSERT INTO queue_jobs
                 (id, queue, payload, state, attempts, max_attempts, run_at_ms,
                  created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?7)",
            params![
                id,
                queue,
                serde_json::to_string(payload).map_err(|e| QueueError::Payload(e.to_string()))?,
                state.as_str(),
                max_attempts,
                now + delay_ms,
                now,
            ],
        )?;

        debug!(queue = %queue, job_id = %id, state = %state, "Job enqueued");
        Ok(id)
    }

    fn reserve(&self, queue: &str, visibility: Duration) -> Result<Option<QueueJob>, QueueError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Self::now_ms();

        if Self::paused_with(&tx, queue)? {
            return Ok(None);
        }
        Self::housekeep(&tx, queue, now)?;

        let next: Option<String> = tx
            .query_row(
                "SELECT id FROM queue_jobs
                 WHERE queue = ?1 AND state = 'waiting' AND run_at_ms <= ?2
                 ORDER BY run_at_ms, seq LIMIT 1",
                params![queue, now],
                |row| row.get(0),
            )
            .optional()?;

        let Some(job_id) = next else {
            tx.commit()?;
            return Ok(None);
        };

        let reservation = uuid::Uuid::new_v4().to_string();
        tx.execute(
            "UPDATE queue_jobs SET state = 'active', attempts = attempts + 1,
                 reserved_until_ms = ?2, reservation = ?3, updated_at_ms = ?4
             WHERE id = ?1",
            params![job_id, now + visibility.as_millis() as i64, reservation, now],
        )?;
        let job = Self::get_with(&tx, &job_id)?;
        tx.commit()?;
        Ok(job)
    }

    fn complete(&self, held: &QueueJob) -> Result<(), QueueError> {
        let conn = lock(&self.conn)?;
        Self::load_for_settle(&conn, held)?;
        let now = Self::now_ms();
        Self::settle(
            &conn,
            held,
            "UPDATE queue_jobs SET state = 'completed', reserved_until_ms = NULL,
                 reservation = NULL, updated_at_ms = ?, finished_at_ms = ?",
            &[&now, &now],
        )
    }

    fn fail(&self, held: &QueueJob, error: &str) -> Result<FailOutcome, QueueError> {
        let conn = lock(&self.conn)?;
        let job = Self::load_for_settle(&conn, held)?;
        let now = Self::now_ms();

        if job.attempts >= job.max_attempts {
            Self::settle(
                &conn,
                held,
                "UPDATE queue_jobs SET state = 'failed', last_error = ?,
                     reserved_until_ms = NULL, reservation = NULL,
                     updated_at_ms = ?, finished_at_ms = ?",
                &[&error, &now, &now],
            )?;
            warn!(
                queue = %job.queue,
                job_id = %job.id,
                attempts = job.attempts,
                error = %error,
                "Job exhausted its attempts"
            );
            return Ok(FailOutcome::Exhausted {
                attempts: job.attempts,
            });
        }

        let retry_in = self.policy.backoff_for(job.attempts);
        let run_at = now + retry_in.as_millis() as i64;
        Self::settle(
            &conn,
            held,
            "UPDATE queue_jobs SET state = 'delayed', last_error = ?,
                 reserved_until_ms = NULL, reservation = NULL, run_at_ms = ?, updated_at_ms = ?",
            &[&error, &run_at, &now],
        )?;
        debug!(
            queue = %job.queue,
            job_id = %job.id,
            attempt = job.attempts,
            retry_in_ms = retry_in.as_millis() as u64,
            "Job scheduled for retry"
        );
        Ok(FailOutcome::Retrying {
            attempt: job.attempts,
            retry_in,
        })
    }

    fn dead_letter(&self, held: &QueueJob, error: &str) -> Result<(), QueueError> {
        let conn = lock(&self.conn)?;
        let job = Self::load_for_settle(&conn, held)?;
        let now = Self::now_ms();
        Self::settle(
            &conn,
            held,
            "UPDATE queue_jobs SET state = 'failed', last_error = ?,
                 reserved_until_ms = NULL, reservation = NULL,
                 updated_at_ms = ?, finished_at_ms = ?",
            &[&error, &now, &now],
        )?;
        warn!(queue = %job.queue, job_id = %job.id, error = %error, "Job dead-lettered");
        Ok(())
    }

    fn reschedule(&self, held: &QueueJob, delay: Duration) -> Result<(), QueueError> {
        let conn = lock(&self.conn)?;
        Self::load_for_settle(&conn, held)?;
        let now = Self::now_ms();
        let run_at = now + delay.as_millis() as i64;
        Self::settle(
            &conn,
            held,
            "UPDATE queue_jobs SET state = 'delayed', attempts = MAX(attempts - 1, 0),
                 reserved_until_ms = NULL, reservation = NULL, run_at_ms = ?, updated_at_ms = ?",
            &[&run_at, &now],
        )
    }

    fn get(&self, job_id: &str) -> Result<Option<QueueJob>, QueueError> {
        let conn = lock(&self.conn)?;
        Self::get_with(&conn, job_id)
    }

    fn pause(&self, queue: &str) -> Result<(), QueueError> {
        self.set_paused(queue, true)
    }

    fn resume(&self, queue: &str) -> Result<(), QueueError> {
        self.set_paused(queue, false)
    }

    fn is_paused(&self, queue: &str) -> Result<bool, QueueError> {
        let conn = lock(&self.conn)?;
        Self::paused_with(&conn, queue)
    }

    fn counts(&self, queue: &str) -> Result<QueueCounts, QueueError> {
        let conn = lock(&self.conn)?;
        let mut counts = QueueCounts {
            is_paused: Self::paused_with(&conn, queue)?,
            ..Default::default()
        };

        let mut stmt =
            conn.prepare("SELECT state, COUNT(*) FROM queue_jobs WHERE queue = ?1 GROUP BY state")?;
        let rows = stmt.query_map(params![queue], |row| {
            let state: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((parse_enum::<JobState>(&state)?, count))
        })?;

        for row in rows {
            let (state, count) = row?;
            match state {
                JobState::Waiting => counts.waiting = count,
                JobState::Active => counts.active = count,
                JobState::Completed => counts.completed = count,
                JobState::Failed => counts.failed = count,
                JobState::Delayed => counts.delayed = count,
            }
        }

        if counts.is_paused {
            counts.paused = counts.waiting;
            counts.waiting = 0;
        }
        Ok(counts)
    }

    fn retry_failed(&self, queue: &str, limit: usize) -> Result<usize, QueueError> {
        if limit == 0 {
            return Ok(0);
        }
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Self::now_ms();

        let moved = tx.execute(
            "UPDATE queue_jobs SET state = 'waiting', attempts = 0, run_at_ms = ?3,
                 updated_at_ms = ?3, finished_at_ms = NULL
             WHERE seq IN (
                 SELECT seq FROM queue_jobs WHERE queue = ?1 AND state = 'failed'
                 ORDER BY finished_at_ms, seq LIMIT ?2
             )",
            params![queue, limit as i64, now],
        )?;
        tx.commit()?;

        debug!(queue = %queue, moved, "Failed jobs moved back to waiting");
        Ok(moved)
    }

    fn failed_jobs(&self, queue: &str, limit: usize) -> Result<Vec<QueueJob>, QueueError> {
        let conn = lock(&self.conn)?;
        let sql = format!(
            "SELECT {} FROM queue_jobs WHERE queue = ?1 AND state = 'failed'
             ORDER BY finished_at_ms DESC, seq DESC LIMIT ?2",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![queue, limit as i64], Self::row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const QUEUE: &str = "pce:test";

    fn create_queue() -> SqliteJobQueue {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 0,
            ..Default::default()
        };
        SqliteJobQueue::in_memory(policy).unwrap()
    }

    fn visibility() -> Duration {
        Duration::from_secs(30)
    }

    #[test]
    fn test_enqueue_and_reserve_fifo() {
        let queue = create_queue();
        let first = queue.enqueue(QUEUE, &json!({"n": 1}), EnqueueOptions::default()).unwrap();
        let second = queue.enqueue(QUEUE, &json!({"n": 2}), EnqueueOptions::default()).unwrap();

        let job = queue.reserve(QUEUE, visibility()).unwrap().unwrap();
        assert_eq!(job.id, first);
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.payload["n"], 1);

        let job = queue.reserve(QUEUE, visibility()).unwrap().unwrap();
        assert_eq!(job.id, second);

        assert!(queue.reserve(QUEUE, visibility()).unwrap().is_none());
    }

    #[test]
    fn test_queues_are_isolated() {
        let queue = create_queue();
        queue.enqueue("pce:a", &json!({}), EnqueueOptions::default()).unwrap();
        assert!(queue.reserve("pce:b", visibility()).unwrap().is_none());
        assert!(queue.reserve("pce:a", visibility()).unwrap().is_some());
    }

    #[test]
    fn test_complete() {
        let queue = create_queue();
        queue.enqueue(QUEUE, &json!({}), EnqueueOptions::default()).unwrap();
        let job = queue.reserve(QUEUE, visibility()).unwrap().unwrap();
        queue.complete(&job).unwrap();

        let counts = queue.counts(QUEUE).unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.active, 0);
    }

    #[test]
    fn test_fail_retries_then_exhausts() {
        let queue = create_queue();
        queue.enqueue(QUEUE, &json!({}), EnqueueOptions::default()).unwrap();

        for attempt in 1..=2 {
            let job = queue.reserve(QUEUE, visibility()).unwrap().unwrap();
            assert_eq!(job.attempts, attempt);
            let outcome = queue.fail(&job, "boom").unwrap();
            assert!(matches!(outcome, FailOutcome::Retrying { .. }));
        }

        let job = queue.reserve(QUEUE, visibility()).unwrap().unwrap();
        assert_eq!(job.attempts, 3);
        let outcome = queue.fail(&job, "boom").unwrap();
        assert_eq!(outcome, FailOutcome::Exhausted { attempts: 3 });

        let counts = queue.counts(QUEUE).unwrap();
        assert_eq!(counts.failed, 1);
        assert!(queue.reserve(QUEUE, visibility()).unwrap().is_none());

        let failed = queue.failed_jobs(QUEUE, 10).unwrap();
        assert_eq!(failed[0].last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_retry_backoff_delays_job() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 60_000,
            ..Default::default()
        };
        let queue = SqliteJobQueue::in_memory(policy).unwrap();
        queue.enqueue(QUEUE, &json!({}), EnqueueOptions::default()).unwrap();
        let job = queue.reserve(QUEUE, visibility()).unwrap().unwrap();
        queue.fail(&job, "transient").unwrap();

        assert_eq!(queue.counts(QUEUE).unwrap().delayed, 1);
        assert!(queue.reserve(QUEUE, visibility()).unwrap().is_none());
    }

    #[test]
    fn test_dead_letter_skips_retries() {
        let queue = create_queue();
        queue.enqueue(QUEUE, &json!({}), EnqueueOptions::default()).unwrap();
        let job = queue.reserve(QUEUE, visibility()).unwrap().unwrap();
        queue.dead_letter(&job, "rejected").unwrap();

        let stored = queue.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.attempts, 1);
    }

    #[test]
    fn test_reschedule_does_not_consume_attempt() {
        let queue = create_queue();
        queue.enqueue(QUEUE, &json!({}), EnqueueOptions::default()).unwrap();
        let job = queue.reserve(QUEUE, visibility()).unwrap().unwrap();
        queue.reschedule(&job, Duration::ZERO).unwrap();

        let job = queue.reserve(QUEUE, visibility()).unwrap().unwrap();
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn test_delayed_enqueue() {
        let queue = create_queue();
        queue
            .enqueue(QUEUE, &json!({}), EnqueueOptions::delayed(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(queue.counts(QUEUE).unwrap().delayed, 1);
        assert!(queue.reserve(QUEUE, visibility()).unwrap().is_none());
    }

    #[test]
    fn test_expired_reservation_is_reclaimed() {
        let queue = create_queue();
        let id = queue.enqueue(QUEUE, &json!({}), EnqueueOptions::default()).unwrap();
        let job = queue.reserve(QUEUE, Duration::ZERO).unwrap().unwrap();
        assert_eq!(job.id, id);

        std::thread::sleep(Duration::from_millis(5));
        let again = queue.reserve(QUEUE, visibility()).unwrap().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.attempts, 2);
    }

    #[test]
    fn test_pause_and_resume() {
        let queue = create_queue();
        queue.enqueue(QUEUE, &json!({}), EnqueueOptions::default()).unwrap();
        queue.pause(QUEUE).unwrap();

        assert!(queue.is_paused(QUEUE).unwrap());
        assert!(queue.reserve(QUEUE, visibility()).unwrap().is_none());
        let counts = queue.counts(QUEUE).unwrap();
        assert!(counts.is_paused);
        assert_eq!(counts.paused, 1);
        assert_eq!(counts.waiting, 0);

        queue.resume(QUEUE).unwrap();
        assert!(queue.reserve(QUEUE, visibility()).unwrap().is_some());
    }

    #[test]
    fn test_retry_failed_respects_limit() {
        let queue = create_queue();
        for _ in 0..5 {
            let id = queue.enqueue(QUEUE, &json!({}), EnqueueOptions::default()).unwrap();
            let job = queue.reserve(QUEUE, visibility()).unwrap().unwrap();
            assert_eq!(job.id, id);
            queue.dead_letter(&job, "dead").unwrap();
        }

        assert_eq!(queue.retry_failed(QUEUE, 3).unwrap(), 3);
        let counts = queue.counts(QUEUE).unwrap();
        assert_eq!(counts.failed, 2);
        assert_eq!(counts.waiting, 3);

        assert_eq!(queue.retry_failed(QUEUE, 100).unwrap(), 2);
        assert_eq!(queue.retry_failed(QUEUE, 100).unwrap(), 0);
        assert_eq!(queue.retry_failed(QUEUE, 0).unwrap(), 0);

        let job = queue.reserve(QUEUE, visibility()).unwrap().unwrap();
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn test_complete_unknown_job() {
        let queue = create_queue();
        queue.enqueue(QUEUE, &json!({}), EnqueueOptions::default()).unwrap();
        let mut job = queue.reserve(QUEUE, visibility()).unwrap().unwrap();
        job.id = "missing".to_string();
        assert!(matches!(
            queue.complete(&job),
            Err(QueueError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_reclaimed_job_cannot_be_settled_by_previous_holder() {
        let queue = create_queue();
        queue.enqueue(QUEUE, &json!({}), EnqueueOptions::default()).unwrap();
        let first = queue.reserve(QUEUE, Duration::from_millis(1)).unwrap().unwrap();

        std::thread::sleep(Duration::from_millis(5));
        let second = queue.reserve(QUEUE, visibility()).unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_ne!(second.reservation, first.reservation);

        assert!(matches!(
            queue.fail(&first, "late"),
            Err(QueueError::LeaseLost(_))
        ));
        assert!(matches!(queue.complete(&first), Err(QueueError::LeaseLost(_))));
        assert!(matches!(
            queue.dead_letter(&first, "late"),
            Err(QueueError::LeaseLost(_))
        ));
        assert!(matches!(
            queue.reschedule(&first, Duration::ZERO),
            Err(QueueError::LeaseLost(_))
        ));

        let stored = queue.get(&first.id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Active);
        assert_eq!(stored.last_error, None);

        queue.complete(&second).unwrap();
        assert_eq!(queue.counts(QUEUE).unwrap().completed, 1);
        // Settled jobs stay settled.
        assert!(matches!(queue.complete(&second), Err(QueueError::LeaseLost(_))));
    }

    #[test]
    fn test_file_queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        {
            let queue = SqliteJobQueue::new(&path, RetryPolicy::default()).unwrap();
            queue.enqueue(QUEUE, &json!({"k": "v"}), EnqueueOptions::default()).unwrap();
            queue.pause(QUEUE).unwrap();
        }
        let queue = SqliteJobQueue::new(&path, RetryPolicy::default()).unwrap();
        assert!(queue.is_paused(QUEUE).unwrap());
        assert_eq!(queue.counts(QUEUE).unwrap().paused, 1);
    }
}
