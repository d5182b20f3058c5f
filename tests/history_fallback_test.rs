// tests/history_fallback_test.rs
// Retrieval totality: no vector index, failing embedder, empty stores.

mod common;

use common::*;
use querydeck_backend::embedding::generator::EmbeddingGenerator;
use querydeck_backend::embedding::{blob_to_vector, EmbeddingClient};
use querydeck_backend::history::HistoryService;
use querydeck_backend::testing::FixedEmbedder;
use std::sync::Arc;

fn history_service(env: &TestEnv) -> HistoryService {
    HistoryService::new(
        env.state.db.clone(),
        env.state.vectors.clone(),
        env.state.embedder.clone(),
        env.state.config.history.clone(),
    )
}

/// With no vector index configured, retrieval rides the lexical path and
/// finds related past messages.
#[tokio::test]
async fn lexical_fallback_finds_related_messages() {
    let env = env().await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;
    let session = env
        .state
        .sessions
        .create(&user.id, &agent.id, None)
        .await
        .unwrap();

    let history = history_service(&env);
    history
        .capture(
            &session.id,
            None,
            "top 5 customers by revenue",
            "Here are the top 5 customers ranked by revenue.",
            Some("SELECT customer, SUM(amount) FROM orders GROUP BY customer"),
        )
        .await
        .unwrap();
    history
        .capture(&session.id, None, "what time is it", "It is noon.", None)
        .await
        .unwrap();

    let hits = history
        .relevant(&user.id, &agent.id, "customers by revenue and volume", 5)
        .await;
    assert!(!hits.is_empty(), "lexical fallback must surface related text");
    assert!(hits
        .iter()
        .any(|(m, _)| m.content.contains("revenue")));
}

/// An unreachable embedder cannot break retrieval: the function stays total.
#[tokio::test]
async fn failing_embedder_degrades_to_lexical() {
    let env = build_env(|_| {}, Arc::new(FixedEmbedder::failing())).await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;
    let session = env
        .state
        .sessions
        .create(&user.id, &agent.id, None)
        .await
        .unwrap();

    let history = history_service(&env);
    history
        .capture(&session.id, None, "orders shipped by volume", "42 crates.", None)
        .await
        .unwrap();

    let hits = history
        .relevant(&user.id, &agent.id, "shipped volume", 5)
        .await;
    assert!(!hits.is_empty());
}

/// Nothing stored at all: an empty list, not an error.
#[tokio::test]
async fn empty_store_returns_empty() {
    let env = env().await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;

    let hits = history_service(&env)
        .relevant(&user.id, &agent.id, "anything at all", 5)
        .await;
    assert!(hits.is_empty());
}

/// The generator stores 1536-dim vectors for captured messages and leaves
/// nothing pending on a second pass.
#[tokio::test]
async fn generator_embeds_pending_messages() {
    let env = env().await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;
    let session = env
        .state
        .sessions
        .create(&user.id, &agent.id, None)
        .await
        .unwrap();

    let history = history_service(&env);
    history
        .capture(&session.id, None, "q", "a", None)
        .await
        .unwrap();

    let generator = EmbeddingGenerator::new(
        env.state.db.clone(),
        env.state.embedder.clone(),
        env.state.vectors.clone(),
        &env.state.config.embedding,
    );

    assert_eq!(generator.run_once().await.unwrap(), 2);
    assert_eq!(generator.run_once().await.unwrap(), 0);

    let blobs: Vec<(Vec<u8>, String)> =
        sqlx::query_as("SELECT vector, model_version FROM message_embeddings")
            .fetch_all(&env.state.db)
            .await
            .unwrap();
    assert_eq!(blobs.len(), 2);
    for (blob, model_version) in blobs {
        assert_eq!(blob_to_vector(&blob).len(), env.state.embedder.dimensions());
        assert_eq!(model_version, "fixed-test-embedder");
    }
}

/// Persistent embedder failure: bounded attempts, message stays lexical-only.
#[tokio::test]
async fn generator_gives_up_after_bounded_attempts() {
    let env = build_env(|_| {}, Arc::new(FixedEmbedder::failing())).await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;
    let session = env
        .state
        .sessions
        .create(&user.id, &agent.id, None)
        .await
        .unwrap();

    history_service(&env)
        .capture(&session.id, None, "q", "a", None)
        .await
        .unwrap();

    let generator = EmbeddingGenerator::new(
        env.state.db.clone(),
        env.state.embedder.clone(),
        env.state.vectors.clone(),
        &env.state.config.embedding,
    );

    // Attempts are counted per pass until the cap; then the backlog drains.
    for _ in 0..3 {
        assert_eq!(generator.run_once().await.unwrap(), 0);
    }

    let pending: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM messages WHERE embed_attempts < 3",
    )
    .fetch_one(&env.state.db)
    .await
    .unwrap();
    assert_eq!(pending.0, 0, "all messages exhausted their attempts");

    let embeddings: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM message_embeddings")
        .fetch_one(&env.state.db)
        .await
        .unwrap();
    assert_eq!(embeddings.0, 0);
}
