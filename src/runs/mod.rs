// src/runs/mod.rs

//! Run records and their state machine.
//!
//! ```text
//! queued ──(worker pick)──► running ──(ok)──► success
//!    │                         │
//!    │                         └─(error)──► failure
//!    └─(cancel before pick)──► cancelled
//! ```
//!
//! Terminal writes are guarded upserts on the run id: once a run leaves
//! `queued`/`running`, a redelivered completion is a no-op.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::Agent;
use crate::broker::{JobEnvelope, JobQueue, QueueError};
use crate::error::{CoreError, ErrorKind};
use crate::sessions::SessionService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failure | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(CoreError::InvalidInput(format!("unknown run status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Run {
    pub id: String,
    pub agent_id: String,
    pub user_id: String,
    pub chat_session_id: Option<String>,
    pub question: String,
    pub task_id: Option<String>,
    pub status: String,
    pub sql_used: Option<String>,
    pub result_data: Option<String>,
    pub execution_ms: Option<i64>,
    pub result_rows_count: Option<i64>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub finished_at: Option<i64>,
}

/// A successful pipeline's terminal payload.
#[derive(Debug, Clone)]
pub struct RunSuccess {
    pub sql_used: Option<String>,
    pub result_data: Option<String>,
    pub execution_ms: Option<i64>,
    pub result_rows_count: Option<i64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RunFilters {
    pub agent_id: Option<String>,
    pub chat_session_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Clone)]
pub struct RunController {
    db: SqlitePool,
    queue: JobQueue,
    sessions: SessionService,
}

impl RunController {
    pub fn new(db: SqlitePool, queue: JobQueue, sessions: SessionService) -> Self {
        Self { db, queue, sessions }
    }

    /// Insert a `queued` run and publish its job.
    ///
    /// The caller resolves the agent through an owner-checked lookup; an empty
    /// question is rejected here before anything is written, and a missing
    /// chat session is synthesised so every run belongs to a conversation.
    pub async fn create_run(
        &self,
        user_id: &str,
        agent: &Agent,
        question: &str,
        chat_session_id: Option<String>,
    ) -> Result<Run, CoreError> {
        if agent.owner_user_id != user_id {
            return Err(CoreError::InvalidInput(format!(
                "unknown agent {}",
                agent.id
            )));
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(CoreError::InvalidInput("question must not be empty".into()));
        }

        let session_id = match chat_session_id {
            Some(session_id) => {
                let session = self.sessions.get_owned(&session_id, user_id).await?;
                if session.agent_id != agent.id {
                    return Err(CoreError::InvalidInput(
                        "chat session belongs to a different agent".into(),
                    ));
                }
                session.id
            }
            None => self.sessions.create(user_id, &agent.id, None).await?.id,
        };

        let run_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO runs (id, agent_id, user_id, chat_session_id, question, status, created_at)
            VALUES (?, ?, ?, ?, ?, 'queued', ?)
            "#,
        )
        .bind(&run_id)
        .bind(&agent.id)
        .bind(user_id)
        .bind(&session_id)
        .bind(question)
        .bind(now)
        .execute(&self.db)
        .await?;

        let envelope = JobEnvelope {
            run_id: run_id.clone(),
            user_id: user_id.to_string(),
            agent_id: agent.id.clone(),
            chat_session_id: Some(session_id),
            question: question.to_string(),
            enqueued_at: now,
        };

        match self.queue.publish(&envelope).await {
            Ok(job_id) => {
                sqlx::query("UPDATE runs SET task_id = ? WHERE id = ?")
                    .bind(job_id.to_string())
                    .bind(&run_id)
                    .execute(&self.db)
                    .await?;
            }
            Err(e) => {
                // Leave no orphaned queued run behind; the client retries.
                sqlx::query("DELETE FROM runs WHERE id = ?")
                    .bind(&run_id)
                    .execute(&self.db)
                    .await?;
                return Err(match e {
                    QueueError::Saturated => {
                        CoreError::Internal("job queue is saturated, retry shortly".into())
                    }
                    other => CoreError::Internal(other.to_string()),
                });
            }
        }

        info!("Created run {} for agent {}", run_id, agent.id);
        self.get_run(&run_id)
            .await?
            .ok_or_else(|| CoreError::Internal("run vanished after insert".into()))
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<Run>, CoreError> {
        Ok(sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.db)
            .await?)
    }

    pub async fn get_run_owned(&self, run_id: &str, user_id: &str) -> Result<Run, CoreError> {
        sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = ? AND user_id = ?")
            .bind(run_id)
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown run {run_id}")))
    }

    /// Paginated run listing, newest first.
    pub async fn list_runs(
        &self,
        user_id: &str,
        filters: &RunFilters,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<Run>, i64), CoreError> {
        if let Some(status) = filters.status.as_deref() {
            RunStatus::from_str(status)?;
        }

        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM runs WHERE user_id = ? \
             AND (? IS NULL OR agent_id = ?) \
             AND (? IS NULL OR chat_session_id = ?) \
             AND (? IS NULL OR status = ?)",
        )
        .bind(user_id)
        .bind(&filters.agent_id)
        .bind(&filters.agent_id)
        .bind(&filters.chat_session_id)
        .bind(&filters.chat_session_id)
        .bind(&filters.status)
        .bind(&filters.status)
        .fetch_one(&self.db)
        .await?;

        let items = sqlx::query_as::<_, Run>(
            "SELECT * FROM runs WHERE user_id = ? \
             AND (? IS NULL OR agent_id = ?) \
             AND (? IS NULL OR chat_session_id = ?) \
             AND (? IS NULL OR status = ?) \
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        )
        .bind(user_id)
        .bind(&filters.agent_id)
        .bind(&filters.agent_id)
        .bind(&filters.chat_session_id)
        .bind(&filters.chat_session_id)
        .bind(&filters.status)
        .bind(&filters.status)
        .bind(per_page)
        .bind((page - 1) * per_page)
        .fetch_all(&self.db)
        .await?;

        Ok((items, total.0))
    }

    /// Cancellation applies only to runs still waiting in the queue; in-flight
    /// runs finish naturally.
    pub async fn cancel_run(&self, run_id: &str, user_id: &str) -> Result<Run, CoreError> {
        self.get_run_owned(run_id, user_id).await?;

        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE runs SET status = 'cancelled', finished_at = ? \
             WHERE id = ? AND status = 'queued'",
        )
        .bind(now)
        .bind(run_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::InvalidInput(
                "run is no longer queued and cannot be cancelled".into(),
            ));
        }

        info!("Cancelled run {}", run_id);
        self.get_run_owned(run_id, user_id).await
    }

    /// Worker pick: `queued → running`. False means the run was cancelled or
    /// already handled and the job should be dropped.
    pub async fn mark_running(&self, run_id: &str) -> Result<bool, CoreError> {
        let result =
            sqlx::query("UPDATE runs SET status = 'running' WHERE id = ? AND status = 'queued'")
                .bind(run_id)
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Recovery path: a redelivered job finds the run already `running`.
    pub async fn is_running(&self, run_id: &str) -> Result<bool, CoreError> {
        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM runs WHERE id = ?")
                .bind(run_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(matches!(status, Some((s,)) if s == "running"))
    }

    /// Idempotent terminal write for a successful run. Returns whether this
    /// call performed the write.
    pub async fn finalize_success(
        &self,
        run_id: &str,
        outcome: &RunSuccess,
    ) -> Result<bool, CoreError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE runs SET
                status = 'success', sql_used = ?, result_data = ?,
                execution_ms = ?, result_rows_count = ?, finished_at = ?
            WHERE id = ? AND status IN ('queued', 'running')
            "#,
        )
        .bind(&outcome.sql_used)
        .bind(&outcome.result_data)
        .bind(outcome.execution_ms)
        .bind(outcome.result_rows_count)
        .bind(now)
        .bind(run_id)
        .execute(&self.db)
        .await?;

        let wrote = result.rows_affected() > 0;
        if !wrote {
            warn!("Run {} already terminal; success write skipped", run_id);
        }
        Ok(wrote)
    }

    /// Idempotent terminal write for a failed run.
    pub async fn finalize_failure(
        &self,
        run_id: &str,
        kind: ErrorKind,
        message: &str,
    ) -> Result<bool, CoreError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE runs SET status = 'failure', error_kind = ?, error_message = ?, finished_at = ?
            WHERE id = ? AND status IN ('queued', 'running')
            "#,
        )
        .bind(kind.as_str())
        .bind(message)
        .bind(now)
        .bind(run_id)
        .execute(&self.db)
        .await?;

        let wrote = result.rows_affected() > 0;
        if !wrote {
            warn!("Run {} already terminal; failure write skipped", run_id);
        }
        Ok(wrote)
    }
}
