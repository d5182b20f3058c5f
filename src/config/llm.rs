// src/config/llm.rs
// Model client and embedder configuration.

use serde::{Deserialize, Serialize};

use super::helpers::{env_opt, env_or, env_parse_or};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    /// Secondary model used by the validation harness.
    pub judge_model: String,
    /// Request timeout in seconds for a single chat completion.
    pub request_timeout_secs: u64,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env_or("OPENAI_API_KEY", ""),
            base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            judge_model: env_or("JUDGE_MODEL", "gpt-4o-mini"),
            request_timeout_secs: env_parse_or("LLM_REQUEST_TIMEOUT_SECS", 110),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedder version tag recorded on every stored vector.
    pub model: String,
    /// Fixed vector dimension for the index.
    pub dimensions: usize,
    /// Poll interval for the background generator, seconds.
    pub poll_interval_secs: u64,
    /// Per-message retry bound; past it the message stays lexical-only.
    pub max_attempts: i64,
}

impl EmbeddingConfig {
    pub fn from_env() -> Self {
        Self {
            model: env_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            dimensions: 1536,
            poll_interval_secs: env_parse_or("EMBEDDING_POLL_INTERVAL_SECS", 5),
            max_attempts: env_parse_or("EMBEDDING_MAX_ATTEMPTS", 3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    /// Absent means the vector index is disabled and retrieval is lexical-only.
    pub url: Option<String>,
    pub collection: String,
}

impl QdrantConfig {
    pub fn from_env() -> Self {
        Self {
            url: env_opt("QDRANT_URL"),
            collection: env_or("QDRANT_COLLECTION", "querydeck_messages"),
        }
    }
}
