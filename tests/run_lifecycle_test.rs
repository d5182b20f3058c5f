// tests/run_lifecycle_test.rs
// Run state machine: transitions, cancellation, redelivery, backpressure.

mod common;

use common::*;
use querydeck_backend::broker::worker::process_job;
use querydeck_backend::error::ErrorKind;
use querydeck_backend::history::HistoryService;
use querydeck_backend::runs::{RunFilters, RunSuccess};
use querydeck_backend::testing::FixedEmbedder;
use std::sync::Arc;

/// cancelled is reachable from queued only; the worker drops the stale job.
#[tokio::test]
async fn cancel_applies_only_to_queued_runs() {
    let env = env().await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;

    let run = env
        .state
        .runs
        .create_run(&user.id, &agent, "How many orders?", None)
        .await
        .unwrap();

    let cancelled = env.state.runs.cancel_run(&run.id, &user.id).await.unwrap();
    assert_eq!(cancelled.status, "cancelled");
    let finished_at = cancelled.finished_at.expect("terminal sets finished_at");

    // A second cancel is rejected.
    assert!(env.state.runs.cancel_run(&run.id, &user.id).await.is_err());

    // The worker picks up the stale job and drops it without touching the run.
    let job = env.state.queue.claim("w").await.unwrap().unwrap();
    process_job(&env.state.worker, &job).await.unwrap();

    let after = env.state.runs.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(after.status, "cancelled");
    assert_eq!(after.finished_at, Some(finished_at));
    assert_eq!(env.state.queue.pending_depth().await.unwrap(), 0);
}

/// Worker crash after the running transition: the job is redelivered, the
/// second worker completes, and exactly one terminal write lands.
#[tokio::test]
async fn redelivered_job_completes_with_one_terminal_write() {
    let env = env().await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;
    queue_count_exchange(&env);

    let run = env
        .state
        .runs
        .create_run(&user.id, &agent, "How many orders?", None)
        .await
        .unwrap();
    let session_id = run.chat_session_id.clone().unwrap();

    // Worker 1 claims, transitions to running, then dies.
    let job = env.state.queue.claim("w1").await.unwrap().unwrap();
    assert!(env.state.runs.mark_running(&run.id).await.unwrap());
    env.state.queue.expire_visibility(job.id).await.unwrap();

    // Worker 2 receives the redelivery and completes the run.
    let redelivered = env.state.queue.claim("w2").await.unwrap().unwrap();
    assert_eq!(redelivered.id, job.id);
    assert_eq!(redelivered.attempts, 2);
    process_job(&env.state.worker, &redelivered).await.unwrap();

    let done = env.state.runs.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(done.status, "success");
    let finished_at = done.finished_at.unwrap();

    // A late completion of the same run is a no-op.
    let wrote = env
        .state
        .runs
        .finalize_success(
            &run.id,
            &RunSuccess {
                sql_used: Some("SELECT 'overwrite'".to_string()),
                result_data: None,
                execution_ms: Some(9999),
                result_rows_count: Some(0),
            },
        )
        .await
        .unwrap();
    assert!(!wrote);
    let after = env.state.runs.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(after.finished_at, Some(finished_at));
    assert!(after.sql_used.as_deref().unwrap().contains("COUNT(*)"));

    // The session gained exactly one exchange.
    let session = env.state.sessions.get(&session_id).await.unwrap();
    assert_eq!(session.total_messages, 2);
}

/// Worker crash in the narrow window after history capture commits but
/// before the terminal write: the redelivered job re-runs the whole pipeline,
/// yet the session still gains exactly one exchange.
#[tokio::test]
async fn redelivery_after_capture_does_not_duplicate_the_exchange() {
    let env = env().await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;
    // Replies for the redelivered execution; the first delivery "dies" before
    // its pipeline would have been finalised.
    queue_count_exchange(&env);

    let run = env
        .state
        .runs
        .create_run(&user.id, &agent, "How many rows in orders?", None)
        .await
        .unwrap();
    let session_id = run.chat_session_id.clone().unwrap();

    // Worker 1: claim, transition to running, capture the exchange, die.
    let job = env.state.queue.claim("w1").await.unwrap().unwrap();
    assert!(env.state.runs.mark_running(&run.id).await.unwrap());
    let history = HistoryService::new(
        env.state.db.clone(),
        env.state.vectors.clone(),
        env.state.embedder.clone(),
        env.state.config.history.clone(),
    );
    history
        .capture(
            &session_id,
            Some(&run.id),
            "How many rows in orders?",
            "There are 3 orders in total.",
            Some("SELECT COUNT(*) AS order_count FROM orders"),
        )
        .await
        .unwrap();
    env.state.queue.expire_visibility(job.id).await.unwrap();

    // Worker 2 re-executes the pipeline end to end.
    let redelivered = env.state.queue.claim("w2").await.unwrap().unwrap();
    process_job(&env.state.worker, &redelivered).await.unwrap();

    let done = env.state.runs.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(done.status, "success");

    // Exactly one captured exchange despite two capture attempts.
    let session = env.state.sessions.get(&session_id).await.unwrap();
    assert_eq!(session.total_messages, 2);
    let (messages, total) = env.state.sessions.messages(&session_id, 1, 50).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[1].role, "assistant");
    assert_eq!(env.state.queue.pending_depth().await.unwrap(), 0);
}

/// Failure terminals are idempotent too.
#[tokio::test]
async fn failure_write_is_guarded() {
    let env = env().await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;

    let run = env
        .state
        .runs
        .create_run(&user.id, &agent, "How many orders?", None)
        .await
        .unwrap();

    assert!(env.state.runs.mark_running(&run.id).await.unwrap());
    assert!(env
        .state
        .runs
        .finalize_failure(&run.id, ErrorKind::QueryError, "bad sql")
        .await
        .unwrap());
    assert!(!env
        .state
        .runs
        .finalize_failure(&run.id, ErrorKind::InternalError, "late duplicate")
        .await
        .unwrap());

    let done = env.state.runs.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(done.status, "failure");
    assert_eq!(done.error_kind.as_deref(), Some("query_error"));
}

/// A job redelivered past the retry bound is dropped and the run failed.
#[tokio::test]
async fn delivery_attempts_are_bounded() {
    let env = env().await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;

    let run = env
        .state
        .runs
        .create_run(&user.id, &agent, "How many orders?", None)
        .await
        .unwrap();

    // Three deliveries that never complete.
    for _ in 0..3 {
        let job = env.state.queue.claim("w").await.unwrap().unwrap();
        env.state.queue.expire_visibility(job.id).await.unwrap();
    }

    // The fourth exceeds the bound.
    let job = env.state.queue.claim("w").await.unwrap().unwrap();
    assert_eq!(job.attempts, 4);
    process_job(&env.state.worker, &job).await.unwrap();

    let done = env.state.runs.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(done.status, "failure");
    assert_eq!(done.error_kind.as_deref(), Some("internal_error"));
    assert_eq!(env.state.queue.pending_depth().await.unwrap(), 0);
}

/// Queue saturation fails create-run transiently and leaves no orphan row.
#[tokio::test]
async fn saturated_queue_rejects_new_runs() {
    let env = build_env(
        |config| config.broker.max_depth = 1,
        Arc::new(FixedEmbedder::default()),
    )
    .await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;

    env.state
        .runs
        .create_run(&user.id, &agent, "first", None)
        .await
        .unwrap();

    let err = env
        .state
        .runs
        .create_run(&user.id, &agent, "second", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("saturated"));

    let (_, total) = env
        .state
        .runs
        .list_runs(&user.id, &Default::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 1, "the rejected run left no row behind");
}

/// Listing: newest first, filterable, page size capped upstream by the API.
#[tokio::test]
async fn run_listing_filters_and_orders() {
    let env = env().await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;

    let first = env
        .state
        .runs
        .create_run(&user.id, &agent, "question one", None)
        .await
        .unwrap();
    let second = env
        .state
        .runs
        .create_run(&user.id, &agent, "question two", None)
        .await
        .unwrap();

    assert!(env.state.runs.mark_running(&first.id).await.unwrap());
    assert!(env
        .state
        .runs
        .finalize_failure(&first.id, ErrorKind::QueryError, "boom")
        .await
        .unwrap());

    let (all, total) = env
        .state
        .runs
        .list_runs(&user.id, &Default::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(all[0].id, second.id, "newest first");

    let (failures, failure_total) = env
        .state
        .runs
        .list_runs(
            &user.id,
            &RunFilters {
                status: Some("failure".to_string()),
                ..Default::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(failure_total, 1);
    assert_eq!(failures[0].id, first.id);

    // Unknown status filters are rejected.
    assert!(env
        .state
        .runs
        .list_runs(
            &user.id,
            &RunFilters {
                status: Some("exploded".to_string()),
                ..Default::default()
            },
            1,
            10,
        )
        .await
        .is_err());
}
