// src/broker/mod.rs

//! Durable job queue between the run controller and the worker pool.
//!
//! Jobs live in the `run_jobs` table. A claim atomically flips the oldest
//! visible job to `claimed` and pushes its visibility horizon past the
//! per-run budget; a worker that dies mid-run simply lets the horizon lapse
//! and the job is redelivered. Completion acknowledges by deleting the row.

pub mod worker;

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::debug;

use crate::config::{BrokerConfig, WorkerConfig};

/// The serialisable envelope a worker needs to rehydrate a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub run_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub chat_session_id: Option<String>,
    pub question: String,
    pub enqueued_at: i64,
}

#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: i64,
    pub attempts: i64,
    pub envelope: JobEnvelope,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue is saturated")]
    Saturated,
    #[error("malformed job payload: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct JobQueue {
    db: SqlitePool,
    max_depth: i64,
    visibility_secs: i64,
}

impl JobQueue {
    pub fn new(db: SqlitePool, broker: &BrokerConfig, worker: &WorkerConfig) -> Self {
        Self {
            db,
            max_depth: broker.max_depth,
            visibility_secs: (worker.run_timeout_secs + worker.visibility_grace_secs) as i64,
        }
    }

    /// Enqueue a run. Fails with `Saturated` when the pending depth hits the
    /// configured bound; the caller surfaces that as a transient error.
    pub async fn publish(&self, envelope: &JobEnvelope) -> Result<i64, QueueError> {
        if self.pending_depth().await? >= self.max_depth {
            return Err(QueueError::Saturated);
        }

        let payload =
            serde_json::to_string(envelope).map_err(|e| QueueError::Corrupt(e.to_string()))?;
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "INSERT INTO run_jobs (run_id, payload, status, attempts, visible_at, enqueued_at) \
             VALUES (?, ?, 'queued', 0, 0, ?)",
        )
        .bind(&envelope.run_id)
        .bind(&payload)
        .bind(now)
        .execute(&self.db)
        .await?;

        let job_id = result.last_insert_rowid();
        debug!("Published job {} for run {}", job_id, envelope.run_id);
        Ok(job_id)
    }

    /// Claim the oldest visible job, if any. Extends the visibility horizon
    /// and counts the attempt in the same statement.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<ClaimedJob>, QueueError> {
        let now = chrono::Utc::now().timestamp();
        let horizon = now + self.visibility_secs;

        let row = sqlx::query(
            r#"
            UPDATE run_jobs
            SET status = 'claimed', attempts = attempts + 1, claimed_by = ?, visible_at = ?
            WHERE id = (
                SELECT id FROM run_jobs
                WHERE status = 'queued' OR (status = 'claimed' AND visible_at <= ?)
                ORDER BY id
                LIMIT 1
            )
            RETURNING id, attempts, payload
            "#,
        )
        .bind(worker_id)
        .bind(horizon)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row.get("payload");
        let envelope: JobEnvelope =
            serde_json::from_str(&payload).map_err(|e| QueueError::Corrupt(e.to_string()))?;

        Ok(Some(ClaimedJob {
            id: row.get("id"),
            attempts: row.get("attempts"),
            envelope,
        }))
    }

    /// Acknowledge a completed job.
    pub async fn ack(&self, job_id: i64) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM run_jobs WHERE id = ?")
            .bind(job_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Jobs waiting or in flight.
    pub async fn pending_depth(&self) -> Result<i64, QueueError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM run_jobs")
            .fetch_one(&self.db)
            .await?;
        Ok(count.0)
    }

    /// Force a claimed job back onto the queue immediately. Test support for
    /// crash/redelivery scenarios; production redelivery rides the visibility
    /// horizon instead.
    pub async fn expire_visibility(&self, job_id: i64) -> Result<(), QueueError> {
        sqlx::query("UPDATE run_jobs SET visible_at = 0 WHERE id = ?")
            .bind(job_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
