// src/config/history.rs
// Conversation history retrieval configuration.

use serde::{Deserialize, Serialize};

use super::helpers::env_parse_or;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Gates both history retrieval and history capture.
    pub enabled: bool,
    /// Upper bound on messages in the rendered history block.
    pub max_messages: usize,
    /// Minimum similarity score for a retrieved message to be included.
    pub similarity_threshold: f32,
    /// Last-N messages of the active session pulled alongside semantic matches.
    pub recent_count: usize,
    /// Top-K semantically similar messages across the user/agent pair.
    pub semantic_k: usize,
    /// TTL for cached query embeddings, seconds.
    pub embedding_cache_ttl: i64,
    /// Window of most recent messages scanned by the lexical fallback.
    pub lexical_window: usize,
}

impl HistoryConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_parse_or("HISTORY_ENABLED", true),
            max_messages: env_parse_or("HISTORY_MAX_MESSAGES", 15),
            similarity_threshold: env_parse_or("HISTORY_SIMILARITY_THRESHOLD", 0.25),
            recent_count: env_parse_or("HISTORY_RECENT_COUNT", 5),
            semantic_k: env_parse_or("HISTORY_SEMANTIC_K", 10),
            embedding_cache_ttl: env_parse_or("HISTORY_CACHE_TTL", 3600),
            lexical_window: env_parse_or("HISTORY_LEXICAL_WINDOW", 500),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_messages: 15,
            similarity_threshold: 0.25,
            recent_count: 5,
            semantic_k: 10,
            embedding_cache_ttl: 3600,
            lexical_window: 500,
        }
    }
}
