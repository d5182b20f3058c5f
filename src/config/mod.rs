// src/config/mod.rs
// Central configuration, composed from per-domain env structs.

pub mod helpers;
pub mod history;
pub mod llm;
pub mod server;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

pub use history::HistoryConfig;
pub use llm::{EmbeddingConfig, LlmConfig, QdrantConfig};
pub use server::{
    BrokerConfig, CacheConfig, DatabaseConfig, ServerConfig, WorkerConfig,
    RUN_TIMEOUT_CEILING_SECS,
};

lazy_static! {
    pub static ref CONFIG: Config = Config::from_env();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub broker: BrokerConfig,
    pub cache: CacheConfig,
    pub history: HistoryConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub qdrant: QdrantConfig,
}

impl Config {
    pub fn from_env() -> Self {
        // Don't panic if .env doesn't exist (for production)
        dotenv::dotenv().ok();

        Self {
            server: ServerConfig::from_env(),
            database: DatabaseConfig::from_env(),
            worker: WorkerConfig::from_env(),
            broker: BrokerConfig::from_env(),
            cache: CacheConfig::from_env(),
            history: HistoryConfig::from_env(),
            llm: LlmConfig::from_env(),
            embedding: EmbeddingConfig::from_env(),
            qdrant: QdrantConfig::from_env(),
        }
    }
}
