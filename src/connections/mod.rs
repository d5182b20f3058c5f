// src/connections/mod.rs

//! User-owned database connections: CRUD, probing, and the payload contract
//! consumed by the engine layer.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::engine::{self, ConnectionPayload, EngineKind};
use crate::error::CoreError;

#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub id: String,
    pub owner_user_id: String,
    pub kind: EngineKind,
    pub payload: Value,
    pub version: i64,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateConnectionRequest {
    pub kind: String,
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConnectionRequest {
    pub payload: Value,
}

/// Outcome of `POST /connections/test`. The `tipo` field name is part of the
/// wire contract consumed by existing clients.
#[derive(Debug, Serialize)]
pub struct ProbeOutcome {
    pub valid: bool,
    pub message: String,
    #[serde(rename = "tipo")]
    pub kind: String,
}

pub struct ConnectionService {
    db: SqlitePool,
    datasets_dir: std::path::PathBuf,
}

impl ConnectionService {
    pub fn new(db: SqlitePool, datasets_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            db,
            datasets_dir: datasets_dir.into(),
        }
    }

    pub async fn create(
        &self,
        owner_user_id: &str,
        req: CreateConnectionRequest,
    ) -> Result<Connection, CoreError> {
        let kind = EngineKind::from_str(&req.kind)?;
        // Validate the payload shape up front; the engine parses it again on open.
        ConnectionPayload::parse(kind, &req.payload)?;

        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO connections (id, owner_user_id, kind, payload, version, created_at)
            VALUES (?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(&id)
        .bind(owner_user_id)
        .bind(kind.as_str())
        .bind(req.payload.to_string())
        .bind(now)
        .execute(&self.db)
        .await?;

        info!("Created {} connection {} for user {}", kind, id, owner_user_id);
        self.get_owned(&id, owner_user_id).await
    }

    pub async fn get_owned(
        &self,
        connection_id: &str,
        user_id: &str,
    ) -> Result<Connection, CoreError> {
        let row = sqlx::query(
            "SELECT id, owner_user_id, kind, payload, version, created_at \
             FROM connections WHERE id = ? AND owner_user_id = ?",
        )
        .bind(connection_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| CoreError::InvalidInput(format!("unknown connection {connection_id}")))?;

        Self::from_row(&row)
    }

    pub async fn list_owned(&self, user_id: &str) -> Result<Vec<Connection>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, owner_user_id, kind, payload, version, created_at \
             FROM connections WHERE owner_user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::from_row).collect()
    }

    /// Replace the payload and bump the version so pooled engines and agent
    /// bundles built on the old payload are discarded.
    pub async fn update(
        &self,
        connection_id: &str,
        user_id: &str,
        req: UpdateConnectionRequest,
    ) -> Result<Connection, CoreError> {
        let existing = self.get_owned(connection_id, user_id).await?;
        ConnectionPayload::parse(existing.kind, &req.payload)?;

        sqlx::query("UPDATE connections SET payload = ?, version = version + 1 WHERE id = ?")
            .bind(req.payload.to_string())
            .bind(connection_id)
            .execute(&self.db)
            .await?;

        self.get_owned(connection_id, user_id).await
    }

    pub async fn delete(&self, connection_id: &str, user_id: &str) -> Result<(), CoreError> {
        self.get_owned(connection_id, user_id).await?;

        let agents: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM agents WHERE connection_id = ?")
                .bind(connection_id)
                .fetch_one(&self.db)
                .await?;
        if agents.0 > 0 {
            return Err(CoreError::InvalidInput(
                "connection is still referenced by agents".into(),
            ));
        }

        sqlx::query("DELETE FROM connections WHERE id = ?")
            .bind(connection_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Agent ids bound to this connection; used by the cache-invalidation hook.
    pub async fn dependent_agents(&self, connection_id: &str) -> Result<Vec<String>, CoreError> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT id FROM agents WHERE connection_id = ?",
        )
        .bind(connection_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Probe a candidate connection without persisting it.
    pub async fn probe(&self, req: &CreateConnectionRequest) -> ProbeOutcome {
        let kind = match EngineKind::from_str(&req.kind) {
            Ok(kind) => kind,
            Err(e) => {
                return ProbeOutcome {
                    valid: false,
                    message: e.to_string(),
                    kind: req.kind.clone(),
                }
            }
        };

        let payload = match ConnectionPayload::parse(kind, &req.payload) {
            Ok(payload) => payload,
            Err(e) => {
                return ProbeOutcome {
                    valid: false,
                    message: e.to_string(),
                    kind: kind.as_str().to_string(),
                }
            }
        };

        match engine::open(&payload, &self.datasets_dir).await {
            Ok(_) => ProbeOutcome {
                valid: true,
                message: format!("connected to {}", payload.masked_dsn()),
                kind: kind.as_str().to_string(),
            },
            Err(e) => ProbeOutcome {
                valid: false,
                message: e.to_string(),
                kind: kind.as_str().to_string(),
            },
        }
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Connection, CoreError> {
        let kind_str: String = row
            .try_get("kind")
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        let payload_str: String = row
            .try_get("payload")
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        Ok(Connection {
            id: row
                .try_get("id")
                .map_err(|e| CoreError::Internal(e.to_string()))?,
            owner_user_id: row
                .try_get("owner_user_id")
                .map_err(|e| CoreError::Internal(e.to_string()))?,
            kind: EngineKind::from_str(&kind_str)?,
            payload: serde_json::from_str(&payload_str)
                .map_err(|e| CoreError::Internal(format!("corrupt payload: {e}")))?,
            version: row
                .try_get("version")
                .map_err(|e| CoreError::Internal(e.to_string()))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| CoreError::Internal(e.to_string()))?,
        })
    }
}
