// src/embedding/mod.rs

//! Embedding client contract and the OpenAI-compatible implementation.

pub mod generator;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;

/// External embedder contract: text in, fixed-dimension vector out.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Version tag recorded with every stored vector.
    fn model_version(&self) -> &str;

    fn dimensions(&self) -> usize {
        1536
    }
}

/// Serialize a vector for the relational embedding row.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of `vector_to_blob`.
pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub struct OpenAiEmbeddings {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    input: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    pub fn new(config: &LlmConfig, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: model.to_string(),
        }
    }

    fn api_url(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text ({} chars)", text.len());

        let request = EmbeddingRequest {
            input: text.to_string(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(self.api_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Embeddings API error {}: {}", status, error_text));
        }

        let result: EmbeddingResponse = response.json().await?;
        let embedding = result
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding in response"))?
            .embedding;

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }

    fn model_version(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let vector = vec![0.5f32, -1.25, 3.0];
        let blob = vector_to_blob(&vector);
        assert_eq!(blob.len(), 12);
        assert_eq!(blob_to_vector(&blob), vector);
    }
}
