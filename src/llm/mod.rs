// src/llm/mod.rs

//! Model client contract and the OpenAI-compatible chat implementation.
//!
//! The platform orchestrates models, it does not run them: everything behind
//! `ModelClient` is an external inference endpoint.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion contract used by the pipeline and the validation harness.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;
}

pub struct OpenAiChatClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
        })
    }
}

#[async_trait]
impl ModelClient for OpenAiChatClient {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        debug!("Chat completion via {} ({} messages)", model, messages.len());

        let request = ChatCompletionRequest {
            model,
            messages,
            temperature: 0.0,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Chat API error {}: {}", status, error_text));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("Empty completion from model"))
    }
}

/// Pull candidate SQL statements out of a model reply, in order of
/// appearance: fenced ```sql blocks first, then any bare statement starting
/// with SELECT/WITH. The caller keeps the first candidate that executes.
pub fn candidate_queries(reply: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    let mut rest = reply;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let lang = after[..body_start].trim().to_lowercase();
        let body = &after[body_start..];
        let Some(end) = body.find("```") else {
            break;
        };
        let block = body[..end].trim();
        if !block.is_empty() && (lang.is_empty() || lang == "sql") {
            candidates.push(block.to_string());
        }
        rest = &body[end + 3..];
    }

    if candidates.is_empty() {
        // No fences: take the first line group that reads like a query.
        for chunk in reply.split("\n\n") {
            let trimmed = chunk.trim();
            let upper = trimmed.to_uppercase();
            if upper.starts_with("SELECT") || upper.starts_with("WITH") {
                candidates.push(trimmed.trim_end_matches(';').to_string());
            }
        }
    }

    candidates
}

/// Whether a query carries its own row bound.
pub fn has_explicit_limit(sql: &str) -> bool {
    sql.to_uppercase().contains(" LIMIT ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_sql() {
        let reply = "Here is the query:\n```sql\nSELECT COUNT(*) FROM orders\n```\nDone.";
        let candidates = candidate_queries(reply);
        assert_eq!(candidates, vec!["SELECT COUNT(*) FROM orders"]);
    }

    #[test]
    fn extracts_multiple_candidates_in_order() {
        let reply = "```sql\nSELECT 1\n```\nor\n```sql\nSELECT 2\n```";
        let candidates = candidate_queries(reply);
        assert_eq!(candidates, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn falls_back_to_bare_select() {
        let reply = "The answer needs:\n\nSELECT name FROM users;";
        let candidates = candidate_queries(reply);
        assert_eq!(candidates, vec!["SELECT name FROM users"]);
    }

    #[test]
    fn ignores_non_sql_fences() {
        let reply = "```python\nprint('hi')\n```\n```sql\nSELECT 3\n```";
        let candidates = candidate_queries(reply);
        assert_eq!(candidates, vec!["SELECT 3"]);
    }

    #[test]
    fn detects_explicit_limit() {
        assert!(has_explicit_limit("SELECT * FROM t LIMIT 50"));
        assert!(!has_explicit_limit("SELECT * FROM t"));
    }
}
