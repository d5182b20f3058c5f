// src/agents/mod.rs

//! Agents: a user-owned binding of a connection, a model id and behaviour
//! flags. Updates that change what the agent can see (connection, table
//! filter) bump `schema_version` and clear the agent's cached answers.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Agent {
    pub id: String,
    pub owner_user_id: String,
    pub name: String,
    pub connection_id: String,
    pub model_id: String,
    pub top_k: i64,
    pub included_tables: String,
    pub advanced: bool,
    pub processing_enabled: bool,
    pub refinement_enabled: bool,
    pub single_table_mode: bool,
    pub selected_table: Option<String>,
    pub schema_version: i64,
    pub version: i64,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub connection_id: String,
    pub model_id: String,
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    #[serde(default = "default_included_tables")]
    pub included_tables: String,
    #[serde(default)]
    pub advanced: bool,
    #[serde(default)]
    pub processing_enabled: bool,
    #[serde(default)]
    pub refinement_enabled: bool,
    #[serde(default)]
    pub single_table_mode: bool,
    pub selected_table: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAgentRequest {
    pub name: Option<String>,
    pub connection_id: Option<String>,
    pub model_id: Option<String>,
    pub top_k: Option<i64>,
    pub included_tables: Option<String>,
    pub advanced: Option<bool>,
    pub processing_enabled: Option<bool>,
    pub refinement_enabled: Option<bool>,
    pub single_table_mode: Option<bool>,
    pub selected_table: Option<String>,
}

fn default_top_k() -> i64 {
    10
}

fn default_included_tables() -> String {
    "*".to_string()
}

pub struct AgentService {
    db: SqlitePool,
    cache: ResponseCache,
}

impl AgentService {
    pub fn new(db: SqlitePool, cache: ResponseCache) -> Self {
        Self { db, cache }
    }

    pub async fn create(
        &self,
        owner_user_id: &str,
        req: CreateAgentRequest,
    ) -> Result<Agent, CoreError> {
        if req.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("agent name is required".into()));
        }
        if req.top_k < 1 {
            return Err(CoreError::InvalidInput("top_k must be at least 1".into()));
        }
        if req.single_table_mode
            && req
                .selected_table
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            return Err(CoreError::InvalidInput(
                "single_table_mode requires selected_table".into(),
            ));
        }

        // The connection must exist and belong to the same user.
        let owned: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM connections WHERE id = ? AND owner_user_id = ?",
        )
        .bind(&req.connection_id)
        .bind(owner_user_id)
        .fetch_optional(&self.db)
        .await?;
        if owned.is_none() {
            return Err(CoreError::InvalidInput(format!(
                "unknown connection {}",
                req.connection_id
            )));
        }

        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO agents (
                id, owner_user_id, name, connection_id, model_id, top_k,
                included_tables, advanced, processing_enabled, refinement_enabled,
                single_table_mode, selected_table, schema_version, version, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 1, ?)
            "#,
        )
        .bind(&id)
        .bind(owner_user_id)
        .bind(req.name.trim())
        .bind(&req.connection_id)
        .bind(&req.model_id)
        .bind(req.top_k)
        .bind(&req.included_tables)
        .bind(req.advanced)
        .bind(req.processing_enabled)
        .bind(req.refinement_enabled)
        .bind(req.single_table_mode)
        .bind(&req.selected_table)
        .bind(now)
        .execute(&self.db)
        .await?;

        info!("Created agent {} for user {}", id, owner_user_id);
        self.get_owned(&id, owner_user_id).await
    }

    pub async fn get_owned(&self, agent_id: &str, user_id: &str) -> Result<Agent, CoreError> {
        sqlx::query_as::<_, Agent>(
            "SELECT * FROM agents WHERE id = ? AND owner_user_id = ?",
        )
        .bind(agent_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| CoreError::InvalidInput(format!("unknown agent {agent_id}")))
    }

    /// Worker-side lookup where ownership is re-checked against the job payload.
    pub async fn get(&self, agent_id: &str) -> Result<Agent, CoreError> {
        sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = ?")
            .bind(agent_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown agent {agent_id}")))
    }

    pub async fn list_owned(&self, user_id: &str) -> Result<Vec<Agent>, CoreError> {
        Ok(sqlx::query_as::<_, Agent>(
            "SELECT * FROM agents WHERE owner_user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?)
    }

    pub async fn update(
        &self,
        agent_id: &str,
        user_id: &str,
        req: UpdateAgentRequest,
    ) -> Result<Agent, CoreError> {
        let current = self.get_owned(agent_id, user_id).await?;

        let name = req.name.unwrap_or(current.name);
        let connection_id = req.connection_id.unwrap_or(current.connection_id.clone());
        let model_id = req.model_id.unwrap_or(current.model_id);
        let top_k = req.top_k.unwrap_or(current.top_k);
        let included_tables = req.included_tables.unwrap_or(current.included_tables.clone());
        let advanced = req.advanced.unwrap_or(current.advanced);
        let processing_enabled = req.processing_enabled.unwrap_or(current.processing_enabled);
        let refinement_enabled = req.refinement_enabled.unwrap_or(current.refinement_enabled);
        let single_table_mode = req.single_table_mode.unwrap_or(current.single_table_mode);
        let selected_table = req.selected_table.or(current.selected_table);

        if top_k < 1 {
            return Err(CoreError::InvalidInput("top_k must be at least 1".into()));
        }
        if single_table_mode
            && selected_table.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(CoreError::InvalidInput(
                "single_table_mode requires selected_table".into(),
            ));
        }

        if connection_id != current.connection_id {
            let owned: Option<(String,)> = sqlx::query_as(
                "SELECT id FROM connections WHERE id = ? AND owner_user_id = ?",
            )
            .bind(&connection_id)
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
            if owned.is_none() {
                return Err(CoreError::InvalidInput(format!(
                    "unknown connection {connection_id}"
                )));
            }
        }

        // Anything that changes what the agent can see invalidates its cached
        // answers and moves it to a new schema version.
        let schema_changed = connection_id != current.connection_id
            || included_tables != current.included_tables;

        sqlx::query(
            r#"
            UPDATE agents SET
                name = ?, connection_id = ?, model_id = ?, top_k = ?,
                included_tables = ?, advanced = ?, processing_enabled = ?,
                refinement_enabled = ?, single_table_mode = ?, selected_table = ?,
                schema_version = schema_version + ?, version = version + 1
            WHERE id = ?
            "#,
        )
        .bind(&name)
        .bind(&connection_id)
        .bind(&model_id)
        .bind(top_k)
        .bind(&included_tables)
        .bind(advanced)
        .bind(processing_enabled)
        .bind(refinement_enabled)
        .bind(single_table_mode)
        .bind(&selected_table)
        .bind(if schema_changed { 1 } else { 0 })
        .bind(agent_id)
        .execute(&self.db)
        .await?;

        if schema_changed {
            self.invalidate_schema(agent_id).await?;
        }

        self.get_owned(agent_id, user_id).await
    }

    pub async fn delete(&self, agent_id: &str, user_id: &str) -> Result<(), CoreError> {
        self.get_owned(agent_id, user_id).await?;
        self.cache.invalidate_agent(agent_id).await?;
        sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(agent_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Wholesale cache invalidation for one agent, with a schema version bump.
    /// Also driven by connection mutation for every dependent agent.
    pub async fn invalidate_schema(&self, agent_id: &str) -> Result<(), CoreError> {
        let cleared = self.cache.invalidate_agent(agent_id).await?;
        info!(
            "Invalidated {} cached answers for agent {}",
            cleared, agent_id
        );
        Ok(())
    }

    /// Bump the schema version after a connection change (the agent rows were
    /// not themselves updated).
    pub async fn bump_schema_version(&self, agent_id: &str) -> Result<(), CoreError> {
        sqlx::query("UPDATE agents SET schema_version = schema_version + 1 WHERE id = ?")
            .bind(agent_id)
            .execute(&self.db)
            .await?;
        self.invalidate_schema(agent_id).await
    }
}
