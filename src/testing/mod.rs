// src/testing/mod.rs

//! Scripted model and embedder implementations for tests.
//!
//! Tests never call live inference endpoints; they queue replies here and
//! assert on what the pipeline did with them.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::embedding::EmbeddingClient;
use crate::llm::{ChatMessage, ModelClient};

/// Model client that replays queued replies in order. Requests beyond the
/// script fail, which surfaces unexpected extra model calls in tests.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(reply.into());
    }

    /// Every request the model received, in order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, _model: &str, messages: &[ChatMessage]) -> Result<String> {
        self.requests.lock().push(messages.to_vec());
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model has no reply queued"))
    }
}

/// Deterministic embedder: token hashes smeared over a fixed-dimension
/// vector, so related texts land near each other. Set `fail` to exercise
/// fallback paths.
pub struct FixedEmbedder {
    pub dimensions: usize,
    pub fail: bool,
}

impl Default for FixedEmbedder {
    fn default() -> Self {
        Self {
            dimensions: 1536,
            fail: false,
        }
    }
}

impl FixedEmbedder {
    pub fn failing() -> Self {
        Self {
            dimensions: 1536,
            fail: true,
        }
    }
}

#[async_trait]
impl EmbeddingClient for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            return Err(anyhow!("embedder unreachable"));
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.to_lowercase().split_whitespace() {
            let mut hash: u64 = 1469598103934665603;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            vector[(hash as usize) % self.dimensions] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn model_version(&self) -> &str {
        "fixed-test-embedder"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
