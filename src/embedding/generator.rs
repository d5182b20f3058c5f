// src/embedding/generator.rs

//! Background embedding generation.
//!
//! Messages are written without vectors; this poller picks up the backlog,
//! asks the external embedder for a 1536-dim vector, stores it on the
//! relational row and indexes it. Bounded retries per message: past the
//! attempt cap, the message stays lexically searchable only.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{vector_to_blob, EmbeddingClient};
use crate::config::EmbeddingConfig;
use crate::vector::VectorStore;

/// One pending message joined with its session's retrieval scope.
#[derive(Debug, sqlx::FromRow)]
struct PendingMessage {
    id: String,
    content: String,
    role: String,
    created_at: i64,
    user_id: String,
    agent_id: String,
}

pub struct EmbeddingGenerator {
    db: SqlitePool,
    embedder: Arc<dyn EmbeddingClient>,
    vectors: Arc<VectorStore>,
    max_attempts: i64,
    batch_size: i64,
}

impl EmbeddingGenerator {
    pub fn new(
        db: SqlitePool,
        embedder: Arc<dyn EmbeddingClient>,
        vectors: Arc<VectorStore>,
        config: &EmbeddingConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            vectors,
            max_attempts: config.max_attempts,
            batch_size: 32,
        }
    }

    /// Process one batch of messages lacking embeddings. Returns how many
    /// vectors were stored.
    pub async fn run_once(&self) -> Result<usize> {
        let pending = sqlx::query_as::<_, PendingMessage>(
            r#"
            SELECT m.id, m.content, m.role, m.created_at, s.user_id, s.agent_id
            FROM messages m
            JOIN chat_sessions s ON s.id = m.chat_session_id
            LEFT JOIN message_embeddings e ON e.message_id = m.id
            WHERE e.id IS NULL AND m.embed_attempts < ?
            ORDER BY m.created_at
            LIMIT ?
            "#,
        )
        .bind(self.max_attempts)
        .bind(self.batch_size)
        .fetch_all(&self.db)
        .await?;

        let mut stored = 0;
        for message in pending {
            match self.generate(&message).await {
                Ok(()) => stored += 1,
                Err(e) => {
                    warn!("Embedding failed for message {}: {}", message.id, e);
                    sqlx::query(
                        "UPDATE messages SET embed_attempts = embed_attempts + 1 WHERE id = ?",
                    )
                    .bind(&message.id)
                    .execute(&self.db)
                    .await?;
                }
            }
        }

        if stored > 0 {
            debug!("Stored {} message embeddings", stored);
        }
        Ok(stored)
    }

    async fn generate(&self, message: &PendingMessage) -> Result<()> {
        let vector = self.embedder.embed(&message.content).await?;

        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO message_embeddings (id, message_id, vector, model_version, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(message_id) DO UPDATE SET
                vector = excluded.vector,
                model_version = excluded.model_version
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&message.id)
        .bind(vector_to_blob(&vector))
        .bind(self.embedder.model_version())
        .bind(now)
        .execute(&self.db)
        .await?;

        // Index failure is tolerable: the row above is the source of truth
        // and search degrades to the lexical path.
        if let Err(e) = self
            .vectors
            .upsert_message(
                &message.id,
                &message.user_id,
                &message.agent_id,
                &message.role,
                &message.content,
                message.created_at,
                vector,
            )
            .await
        {
            warn!("Vector index update failed for message {}: {}", message.id, e);
        }

        Ok(())
    }
}
