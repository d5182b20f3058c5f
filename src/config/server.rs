// src/config/server.rs
// Server, database and broker configuration.

use serde::{Deserialize, Serialize};

use super::helpers::{env_or, env_parse_or};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8900),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Queue database. Defaults to the metadata database.
    pub broker_url: String,
    /// Result store. Defaults to the metadata database.
    pub result_backend_url: String,
    /// Directory holding embedded dataset files referenced by sqlite connections.
    pub datasets_dir: String,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        let url = env_or("DATABASE_URL", "sqlite://data/querydeck.db");
        Self {
            broker_url: env_or("BROKER_URL", &url),
            result_backend_url: env_or("RESULT_BACKEND_URL", &url),
            url,
            max_connections: env_parse_or("SQLITE_MAX_CONNECTIONS", 16),
            datasets_dir: env_or("DATASETS_DIR", "data/datasets"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub concurrency: usize,
    /// Per-run budget in seconds. Clamped to the ceiling at load.
    pub run_timeout_secs: u64,
    /// Extra visibility window granted past the run budget before redelivery.
    pub visibility_grace_secs: u64,
    pub poll_interval_ms: u64,
}

/// Hard ceiling for the per-run budget.
pub const RUN_TIMEOUT_CEILING_SECS: u64 = 7200;

impl WorkerConfig {
    pub fn from_env() -> Self {
        let run_timeout_secs: u64 = env_parse_or("RUN_TIMEOUT_SECS", 120);
        Self {
            worker_count: env_parse_or("WORKER_COUNT", 2),
            concurrency: env_parse_or("WORKER_CONCURRENCY", 4),
            run_timeout_secs: run_timeout_secs.min(RUN_TIMEOUT_CEILING_SECS),
            visibility_grace_secs: env_parse_or("BROKER_VISIBILITY_GRACE_SECS", 30),
            poll_interval_ms: env_parse_or("BROKER_POLL_INTERVAL_MS", 500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Redelivery bound for broker-side failures.
    pub max_retries: i64,
    /// Pending-job depth past which publishing fails with a transient error.
    pub max_depth: i64,
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        Self {
            max_retries: env_parse_or("BROKER_MAX_RETRIES", 3),
            max_depth: env_parse_or("BROKER_MAX_DEPTH", 1000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: i64,
    pub max_entries: i64,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_parse_or("CACHE_ENABLED", true),
            ttl_seconds: env_parse_or("CACHE_TTL_SECONDS", 86400),
            max_entries: env_parse_or("CACHE_MAX_ENTRIES", 10000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_timeout_is_clamped_to_ceiling() {
        std::env::set_var("RUN_TIMEOUT_SECS", "999999");
        let cfg = WorkerConfig::from_env();
        assert_eq!(cfg.run_timeout_secs, RUN_TIMEOUT_CEILING_SECS);
        std::env::remove_var("RUN_TIMEOUT_SECS");
    }
}
