// src/vector/mod.rs

//! Qdrant-backed vector index over message embeddings.
//!
//! The index is an accelerator, not a source of truth: vectors also live on
//! `message_embeddings` rows. When no Qdrant URL is configured, or the server
//! is unreachable at startup, the store reports unavailable and history
//! retrieval falls back to lexical search.

use anyhow::{Context, Result};
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Vector dimension for the configured embedding model family.
pub const EMBEDDING_DIM: u64 = 1536;

pub struct VectorStore {
    client: Option<Qdrant>,
    collection: String,
}

impl VectorStore {
    /// Connect if a URL is configured; never fails, only degrades.
    pub async fn connect(url: Option<&str>, collection: &str) -> Self {
        let client = match url {
            Some(url) => match Self::try_connect(url, collection).await {
                Ok(client) => {
                    info!("Vector index enabled (collection: {})", collection);
                    Some(client)
                }
                Err(e) => {
                    warn!("Vector index unavailable, lexical fallback only: {}", e);
                    None
                }
            },
            None => {
                info!("No vector index configured, lexical fallback only");
                None
            }
        };

        Self {
            client,
            collection: collection.to_string(),
        }
    }

    async fn try_connect(url: &str, collection: &str) -> Result<Qdrant> {
        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .context("Failed to connect to Qdrant")?;

        let exists = client.collection_exists(collection).await?;
        if !exists {
            info!("Creating Qdrant collection: {}", collection);
            match client
                .create_collection(
                    CreateCollectionBuilder::new(collection).vectors_config(
                        VectorParamsBuilder::new(EMBEDDING_DIM, Distance::Cosine),
                    ),
                )
                .await
            {
                Ok(_) => {}
                Err(e) => {
                    // Tolerate a concurrent create from another process.
                    if e.to_string().contains("already exists") {
                        debug!("Collection {} already exists", collection);
                    } else {
                        return Err(e)
                            .context(format!("Failed to create collection: {collection}"));
                    }
                }
            }
        }

        Ok(client)
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }

    /// Index one message vector with enough payload to filter and re-render.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_message(
        &self,
        message_id: &str,
        user_id: &str,
        agent_id: &str,
        role: &str,
        content: &str,
        created_at: i64,
        vector: Vec<f32>,
    ) -> Result<()> {
        let Some(client) = &self.client else {
            return Ok(());
        };

        let mut payload: HashMap<String, QdrantValue> = HashMap::new();
        payload.insert("message_id".to_string(), message_id.to_string().into());
        payload.insert("user_id".to_string(), user_id.to_string().into());
        payload.insert("agent_id".to_string(), agent_id.to_string().into());
        payload.insert("role".to_string(), role.to_string().into());
        payload.insert("content".to_string(), content.to_string().into());
        payload.insert("created_at".to_string(), created_at.into());

        let point = PointStruct::new(message_id.to_string(), vector, payload);

        client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await
            .context("Failed to upsert point to Qdrant")?;

        debug!("Indexed message {} in {}", message_id, self.collection);
        Ok(())
    }

    /// Top-K message ids with scores for a (user, agent) pair.
    pub async fn search(
        &self,
        user_id: &str,
        agent_id: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(String, f32)>> {
        let Some(client) = &self.client else {
            return Ok(Vec::new());
        };

        let filter = Filter::must([
            Condition::matches("user_id", user_id.to_string()),
            Condition::matches("agent_id", agent_id.to_string()),
        ]);

        let results = client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector.to_vec(), k as u64)
                    .filter(filter)
                    .with_payload(true),
            )
            .await
            .context("Failed to search Qdrant")?;

        let hits = results
            .result
            .into_iter()
            .filter_map(|point| {
                let message_id = match point.payload.get("message_id").and_then(|v| v.kind.clone())
                {
                    Some(qdrant_client::qdrant::value::Kind::StringValue(s)) => s,
                    _ => return None,
                };
                Some((message_id, point.score))
            })
            .collect();

        Ok(hits)
    }
}
