// src/sessions/mod.rs

//! Chat sessions and their ordered messages.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
    pub agent_id: String,
    pub title: String,
    pub status: String,
    pub context_summary: Option<String>,
    pub total_messages: i64,
    pub created_at: i64,
    pub last_activity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: String,
    pub chat_session_id: String,
    pub run_id: Option<String>,
    pub role: String,
    pub content: String,
    pub sql_query: Option<String>,
    pub sequence_order: i64,
    pub metadata: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub agent_id: String,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub title: Option<String>,
    pub status: Option<String>,
}

#[derive(Clone)]
pub struct SessionService {
    db: SqlitePool,
}

impl SessionService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        user_id: &str,
        agent_id: &str,
        title: Option<String>,
    ) -> Result<ChatSession, CoreError> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(Self::timestamped_title);

        sqlx::query(
            r#"
            INSERT INTO chat_sessions (
                id, user_id, agent_id, title, status, total_messages, created_at, last_activity
            )
            VALUES (?, ?, ?, ?, 'active', 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(agent_id)
        .bind(&title)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;

        self.get(&id).await
    }

    /// Title for sessions synthesised by the run controller.
    fn timestamped_title() -> String {
        format!(
            "Conversation {}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M")
        )
    }

    pub async fn get(&self, session_id: &str) -> Result<ChatSession, CoreError> {
        sqlx::query_as::<_, ChatSession>("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown chat session {session_id}")))
    }

    pub async fn get_owned(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<ChatSession, CoreError> {
        sqlx::query_as::<_, ChatSession>(
            "SELECT * FROM chat_sessions WHERE id = ? AND user_id = ?",
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| CoreError::InvalidInput(format!("unknown chat session {session_id}")))
    }

    pub async fn list_for_agent(
        &self,
        agent_id: &str,
        user_id: &str,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<ChatSession>, i64), CoreError> {
        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM chat_sessions WHERE agent_id = ? AND user_id = ?",
        )
        .bind(agent_id)
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        let items = sqlx::query_as::<_, ChatSession>(
            "SELECT * FROM chat_sessions WHERE agent_id = ? AND user_id = ? \
             ORDER BY last_activity DESC LIMIT ? OFFSET ?",
        )
        .bind(agent_id)
        .bind(user_id)
        .bind(per_page)
        .bind((page - 1) * per_page)
        .fetch_all(&self.db)
        .await?;

        Ok((items, total.0))
    }

    pub async fn update(
        &self,
        session_id: &str,
        user_id: &str,
        req: UpdateSessionRequest,
    ) -> Result<ChatSession, CoreError> {
        let current = self.get_owned(session_id, user_id).await?;

        if let Some(status) = req.status.as_deref() {
            if status != "active" && status != "archived" {
                return Err(CoreError::InvalidInput(format!(
                    "invalid session status: {status}"
                )));
            }
        }

        let title = req.title.unwrap_or(current.title);
        let status = req.status.unwrap_or(current.status);

        sqlx::query("UPDATE chat_sessions SET title = ?, status = ? WHERE id = ?")
            .bind(&title)
            .bind(&status)
            .bind(session_id)
            .execute(&self.db)
            .await?;

        self.get(session_id).await
    }

    /// Delete a session and everything it owns. Message embeddings cascade
    /// through the messages foreign key.
    pub async fn delete(&self, session_id: &str, user_id: &str) -> Result<(), CoreError> {
        self.get_owned(session_id, user_id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "DELETE FROM message_embeddings WHERE message_id IN \
             (SELECT id FROM messages WHERE chat_session_id = ?)",
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM messages WHERE chat_session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Paginated messages, newest page first; rows within a page are in
    /// conversation order.
    pub async fn messages(
        &self,
        session_id: &str,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<Message>, i64), CoreError> {
        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE chat_session_id = ?")
                .bind(session_id)
                .fetch_one(&self.db)
                .await?;

        let mut items = sqlx::query_as::<_, Message>(
            "SELECT id, chat_session_id, run_id, role, content, sql_query, \
                    sequence_order, metadata, created_at \
             FROM messages WHERE chat_session_id = ? \
             ORDER BY sequence_order DESC LIMIT ? OFFSET ?",
        )
        .bind(session_id)
        .bind(per_page)
        .bind((page - 1) * per_page)
        .fetch_all(&self.db)
        .await?;
        items.reverse();

        Ok((items, total.0))
    }
}
