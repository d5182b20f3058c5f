// src/history/mod.rs

//! Conversation history: transactional capture and total retrieval.
//!
//! Retrieval is layered the way search degrades: vector similarity when the
//! index is reachable, token-overlap over recent messages otherwise, and an
//! empty list as the floor. `relevant` never propagates an error.

pub mod lexical;
pub mod render;

use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::HistoryConfig;
use crate::embedding::EmbeddingClient;
use crate::error::CoreError;
use crate::sessions::Message;
use crate::vector::VectorStore;

pub use render::render_history;

pub struct HistoryService {
    db: SqlitePool,
    vectors: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    config: HistoryConfig,
}

impl HistoryService {
    pub fn new(
        db: SqlitePool,
        vectors: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        config: HistoryConfig,
    ) -> Self {
        Self {
            db,
            vectors,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Write the user/assistant exchange as two consecutive messages.
    ///
    /// One transaction reads the session's current max sequence and inserts at
    /// max+1 and max+2 while bumping the session counters, so concurrent
    /// captures on the same session serialise here and the sequence stays
    /// dense. Embedding happens later, off this path.
    pub async fn capture(
        &self,
        chat_session_id: &str,
        run_id: Option<&str>,
        user_text: &str,
        assistant_text: &str,
        sql_query: Option<&str>,
    ) -> Result<(String, String), CoreError> {
        let mut conn = self.db.acquire().await?;

        // IMMEDIATE takes the write lock before the max-sequence read, so two
        // captures on the same session cannot both observe the same max. A
        // pooled connection abandoned mid-transaction by a cancelled run is
        // rolled back here before reuse.
        if let Err(e) = sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await {
            if e.to_string().contains("within a transaction") {
                sqlx::query("ROLLBACK").execute(&mut *conn).await.ok();
                sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
            } else {
                return Err(e.into());
            }
        }

        let result = self
            .capture_locked(&mut conn, chat_session_id, run_id, user_text, assistant_text, sql_query)
            .await;

        match result {
            Ok(ids) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(ids)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn capture_locked(
        &self,
        conn: &mut sqlx::SqliteConnection,
        chat_session_id: &str,
        run_id: Option<&str>,
        user_text: &str,
        assistant_text: &str,
        sql_query: Option<&str>,
    ) -> Result<(String, String), CoreError> {
        let now = chrono::Utc::now().timestamp();
        let user_msg_id = Uuid::new_v4().to_string();
        let assistant_msg_id = Uuid::new_v4().to_string();

        let exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM chat_sessions WHERE id = ?")
                .bind(chat_session_id)
                .fetch_optional(&mut *conn)
                .await?;
        if exists.is_none() {
            return Err(CoreError::InvalidInput(format!(
                "unknown chat session {chat_session_id}"
            )));
        }

        // Idempotent per run: a redelivered job must not record the exchange
        // twice. The first delivery's pair wins.
        if let Some(run_id) = run_id {
            let existing: Vec<(String, String)> = sqlx::query_as(
                "SELECT id, role FROM messages \
                 WHERE chat_session_id = ? AND run_id = ? ORDER BY sequence_order",
            )
            .bind(chat_session_id)
            .bind(run_id)
            .fetch_all(&mut *conn)
            .await?;

            let prior_user = existing.iter().find(|(_, role)| role == "user");
            let prior_assistant = existing.iter().find(|(_, role)| role == "assistant");
            if let (Some((user_id, _)), Some((assistant_id, _))) = (prior_user, prior_assistant) {
                debug!(
                    "Exchange for run {} already captured in session {}, skipping",
                    run_id, chat_session_id
                );
                return Ok((user_id.clone(), assistant_id.clone()));
            }
        }

        let (max_seq,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(sequence_order), 0) FROM messages WHERE chat_session_id = ?",
        )
        .bind(chat_session_id)
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, chat_session_id, run_id, role, content, sql_query,
                sequence_order, embed_attempts, created_at
            )
            VALUES (?, ?, ?, 'user', ?, NULL, ?, 0, ?)
            "#,
        )
        .bind(&user_msg_id)
        .bind(chat_session_id)
        .bind(run_id)
        .bind(user_text)
        .bind(max_seq + 1)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, chat_session_id, run_id, role, content, sql_query,
                sequence_order, embed_attempts, created_at
            )
            VALUES (?, ?, ?, 'assistant', ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&assistant_msg_id)
        .bind(chat_session_id)
        .bind(run_id)
        .bind(assistant_text)
        .bind(sql_query)
        .bind(max_seq + 2)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "UPDATE chat_sessions SET total_messages = total_messages + 2, last_activity = ? \
             WHERE id = ?",
        )
        .bind(now)
        .bind(chat_session_id)
        .execute(&mut *conn)
        .await?;

        debug!(
            "Captured exchange in session {} at sequence {}/{}",
            chat_session_id,
            max_seq + 1,
            max_seq + 2
        );
        Ok((user_msg_id, assistant_msg_id))
    }

    /// Last N messages of a session in conversation order.
    pub async fn recent(&self, chat_session_id: &str, n: usize) -> Result<Vec<Message>, CoreError> {
        let mut messages = sqlx::query_as::<_, Message>(
            "SELECT id, chat_session_id, run_id, role, content, sql_query, \
                    sequence_order, metadata, created_at \
             FROM messages WHERE chat_session_id = ? \
             ORDER BY sequence_order DESC LIMIT ?",
        )
        .bind(chat_session_id)
        .bind(n as i64)
        .fetch_all(&self.db)
        .await?;
        messages.reverse();
        Ok(messages)
    }

    /// Top-K past messages for a (user, agent) pair, scored by similarity to
    /// the query. Total: vector search degrades to lexical, lexical degrades
    /// to an empty list.
    pub async fn relevant(
        &self,
        user_id: &str,
        agent_id: &str,
        query: &str,
        k: usize,
    ) -> Vec<(Message, f32)> {
        if self.vectors.is_available() {
            match self.semantic_search(user_id, agent_id, query, k).await {
                Ok(hits) => return hits,
                Err(e) => {
                    warn!("Semantic search failed, falling back to lexical: {}", e);
                }
            }
        }

        match self.lexical_search(user_id, agent_id, query, k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Lexical history search failed, returning nothing: {}", e);
                Vec::new()
            }
        }
    }

    async fn semantic_search(
        &self,
        user_id: &str,
        agent_id: &str,
        query: &str,
        k: usize,
    ) -> anyhow::Result<Vec<(Message, f32)>> {
        let query_vector = self.embedder.embed(query).await?;
        let hits = self
            .vectors
            .search(user_id, agent_id, &query_vector, k)
            .await?;

        let mut results = Vec::with_capacity(hits.len());
        for (message_id, score) in hits {
            if score < self.config.similarity_threshold {
                continue;
            }
            let message = sqlx::query_as::<_, Message>(
                "SELECT id, chat_session_id, run_id, role, content, sql_query, \
                        sequence_order, metadata, created_at \
                 FROM messages WHERE id = ?",
            )
            .bind(&message_id)
            .fetch_optional(&self.db)
            .await?;
            // The index may trail deletions; skip orphaned points.
            if let Some(message) = message {
                results.push((message, score));
            }
        }
        Ok(results)
    }

    async fn lexical_search(
        &self,
        user_id: &str,
        agent_id: &str,
        query: &str,
        k: usize,
    ) -> anyhow::Result<Vec<(Message, f32)>> {
        let window = sqlx::query_as::<_, Message>(
            "SELECT m.id, m.chat_session_id, m.run_id, m.role, m.content, m.sql_query, \
                    m.sequence_order, m.metadata, m.created_at \
             FROM messages m \
             JOIN chat_sessions s ON s.id = m.chat_session_id \
             WHERE s.user_id = ? AND s.agent_id = ? \
             ORDER BY m.created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(agent_id)
        .bind(self.config.lexical_window as i64)
        .fetch_all(&self.db)
        .await?;

        let threshold = self.config.similarity_threshold;
        Ok(lexical::rank_by_overlap(query, window, k)
            .into_iter()
            .filter(|(_, score)| *score >= threshold)
            .collect())
    }
}
