// src/cache/mod.rs

//! Per-agent cache of previously answered questions.
//!
//! Key = SHA-256 over (normalised question, agent id, schema version), so an
//! answer computed against an older schema snapshot can never be served after
//! the agent's view of the database changes. Eviction is LRU to a configured
//! capacity, with optional TTL expiry checked on read.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::config::CacheConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub answer: String,
    pub sql_used: String,
    pub created_at: i64,
    pub access_count: i64,
}

#[derive(Clone)]
pub struct ResponseCache {
    db: SqlitePool,
    enabled: bool,
    ttl_seconds: i64,
    max_entries: i64,
}

impl ResponseCache {
    pub fn new(db: SqlitePool, config: &CacheConfig) -> Self {
        Self {
            db,
            enabled: config.enabled,
            ttl_seconds: config.ttl_seconds,
            max_entries: config.max_entries,
        }
    }

    /// Lowercase, trim, collapse runs of whitespace.
    pub fn normalize(question: &str) -> String {
        question
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Stable key over the normalised question, the agent and its schema version.
    pub fn fingerprint(question: &str, agent_id: &str, schema_version: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(Self::normalize(question).as_bytes());
        hasher.update(b"\x00");
        hasher.update(agent_id.as_bytes());
        hasher.update(b"\x00");
        hasher.update(schema_version.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn get(&self, agent_id: &str, fingerprint: &str) -> Result<Option<CachedAnswer>> {
        if !self.enabled {
            return Ok(None);
        }

        let now = Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            SELECT answer, sql_used, created_at, access_count, expires_at
            FROM response_cache
            WHERE agent_id = ? AND fingerprint = ?
            "#,
        )
        .bind(agent_id)
        .bind(fingerprint)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            debug!("Cache miss: agent={} key={}", agent_id, &fingerprint[..8]);
            return Ok(None);
        };

        let expires_at: Option<i64> = row.get("expires_at");
        if let Some(exp) = expires_at {
            if now >= exp {
                debug!("Cache entry expired: key={}", &fingerprint[..8]);
                sqlx::query("DELETE FROM response_cache WHERE agent_id = ? AND fingerprint = ?")
                    .bind(agent_id)
                    .bind(fingerprint)
                    .execute(&self.db)
                    .await?;
                return Ok(None);
            }
        }

        sqlx::query(
            "UPDATE response_cache SET access_count = access_count + 1, last_accessed = ? \
             WHERE agent_id = ? AND fingerprint = ?",
        )
        .bind(now)
        .bind(agent_id)
        .bind(fingerprint)
        .execute(&self.db)
        .await?;

        let access_count: i64 = row.get("access_count");
        debug!(
            "Cache hit: agent={} key={} access_count={}",
            agent_id,
            &fingerprint[..8],
            access_count + 1
        );

        Ok(Some(CachedAnswer {
            answer: row.get("answer"),
            sql_used: row.get("sql_used"),
            created_at: row.get("created_at"),
            access_count: access_count + 1,
        }))
    }

    pub async fn put(
        &self,
        agent_id: &str,
        fingerprint: &str,
        answer: &str,
        sql_used: &str,
        schema_version: i64,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let now = Utc::now().timestamp();
        let expires_at = if self.ttl_seconds > 0 {
            Some(now + self.ttl_seconds)
        } else {
            None
        };

        sqlx::query(
            r#"
            INSERT INTO response_cache (
                agent_id, fingerprint, answer, sql_used, schema_version,
                created_at, last_accessed, access_count, expires_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(agent_id, fingerprint) DO UPDATE SET
                answer = excluded.answer,
                sql_used = excluded.sql_used,
                last_accessed = excluded.last_accessed
            "#,
        )
        .bind(agent_id)
        .bind(fingerprint)
        .bind(answer)
        .bind(sql_used)
        .bind(schema_version)
        .bind(now)
        .bind(now)
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        debug!("Cached answer: agent={} key={}", agent_id, &fingerprint[..8]);
        Ok(())
    }

    /// Drop every cached answer for an agent. Called when the agent's
    /// connection or table filter changes.
    pub async fn invalidate_agent(&self, agent_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM response_cache WHERE agent_id = ?")
            .bind(agent_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Evict least recently used entries beyond the configured capacity.
    pub async fn cleanup_lru(&self) -> Result<i64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM response_cache")
            .fetch_one(&self.db)
            .await?
            .get("count");

        if count <= self.max_entries {
            return Ok(0);
        }

        let to_delete = count - self.max_entries;
        let result = sqlx::query(
            r#"
            DELETE FROM response_cache
            WHERE (agent_id, fingerprint) IN (
                SELECT agent_id, fingerprint
                FROM response_cache
                ORDER BY last_accessed ASC
                LIMIT ?
            )
            "#,
        )
        .bind(to_delete)
        .execute(&self.db)
        .await?;

        let deleted = result.rows_affected() as i64;
        if deleted > 0 {
            info!(
                "Evicted {} LRU cache entries (capacity: {})",
                deleted, self.max_entries
            );
        }
        Ok(deleted)
    }

    /// Remove expired entries wholesale.
    pub async fn cleanup_expired(&self) -> Result<i64> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "DELETE FROM response_cache WHERE expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(now)
        .execute(&self.db)
        .await?;

        let deleted = result.rows_affected() as i64;
        if deleted > 0 {
            info!("Cleaned up {} expired cache entries", deleted);
        }
        Ok(deleted)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_folds_case_and_whitespace() {
        assert_eq!(
            ResponseCache::normalize("  How many   ROWS\n in orders? "),
            "how many rows in orders?"
        );
    }

    #[test]
    fn fingerprint_is_stable_and_schema_sensitive() {
        let a = ResponseCache::fingerprint("How many rows?", "agent-1", 1);
        let b = ResponseCache::fingerprint("  how many ROWS?  ", "agent-1", 1);
        assert_eq!(a, b, "normalised questions share a fingerprint");
        assert_eq!(a.len(), 64);

        let c = ResponseCache::fingerprint("How many rows?", "agent-1", 2);
        assert_ne!(a, c, "schema version changes the fingerprint");

        let d = ResponseCache::fingerprint("How many rows?", "agent-2", 1);
        assert_ne!(a, d, "agents do not share fingerprints");
    }
}
