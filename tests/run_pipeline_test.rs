// tests/run_pipeline_test.rs
// End-to-end pipeline runs over an embedded dataset with a scripted model.

mod common;

use common::*;
use querydeck_backend::broker::worker::process_job;
use querydeck_backend::testing::FixedEmbedder;
use std::sync::Arc;

/// Cold run: question in, success out, exchange captured in a synthesised
/// session with dense sequence numbers.
#[tokio::test]
async fn cold_run_completes_and_captures_history() {
    let env = env().await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;
    queue_count_exchange(&env);

    let run = env
        .state
        .runs
        .create_run(&user.id, &agent, "How many rows in orders?", None)
        .await
        .expect("create run");
    assert_eq!(run.status, "queued");
    let session_id = run.chat_session_id.clone().expect("synthesised session");

    let job = env
        .state
        .queue
        .claim("test-worker")
        .await
        .expect("claim")
        .expect("job available");
    process_job(&env.state.worker, &job).await.expect("process");

    let done = env
        .state
        .runs
        .get_run(&run.id)
        .await
        .unwrap()
        .expect("run exists");
    assert_eq!(done.status, "success");
    assert!(done.sql_used.as_deref().unwrap().contains("COUNT(*)"));
    assert_eq!(done.result_rows_count, Some(1));
    assert!(done.execution_ms.is_some());
    assert!(done.finished_at.is_some());

    // The run record carries the stable response template.
    let result = done.result_data.as_deref().unwrap();
    assert!(result.starts_with("There are 3 orders in total."));
    assert!(result.contains("```sql\nSELECT COUNT(*) AS order_count FROM orders\n```"));
    assert!(result.contains("Rows returned: 1"));

    // Two messages at sequence 1 and 2, counters bumped.
    let session = env.state.sessions.get(&session_id).await.unwrap();
    assert_eq!(session.total_messages, 2);
    let (messages, total) = env.state.sessions.messages(&session_id, 1, 50).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[0].sequence_order, 1);
    assert_eq!(messages[1].role, "assistant");
    assert_eq!(messages[1].sequence_order, 2);
    assert!(messages[1].sql_query.as_deref().unwrap().contains("COUNT(*)"));
    assert_eq!(
        messages[1].content, result,
        "the captured answer and the run record agree"
    );

    // Generation + narration, nothing else.
    assert_eq!(env.model.request_count(), 2);

    // The queue is drained.
    assert_eq!(env.state.queue.pending_depth().await.unwrap(), 0);
}

/// Resubmitting the identical question hits the cache: no model calls, same
/// SQL, a fresh successful run, and a newly captured exchange.
#[tokio::test]
async fn identical_question_hits_cache_and_still_records_exchange() {
    let env = env().await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;
    queue_count_exchange(&env);

    let first = env
        .state
        .runs
        .create_run(&user.id, &agent, "How many rows in orders?", None)
        .await
        .unwrap();
    let job = env.state.queue.claim("w").await.unwrap().unwrap();
    process_job(&env.state.worker, &job).await.unwrap();
    let first = env.state.runs.get_run(&first.id).await.unwrap().unwrap();
    assert_eq!(first.status, "success");
    let calls_after_cold = env.model.request_count();

    // Same question, same agent, same schema version. No replies queued: a
    // model call would fail the run.
    let second = env
        .state
        .runs
        .create_run(
            &user.id,
            &agent,
            "  how many ROWS in orders?  ",
            first.chat_session_id.clone(),
        )
        .await
        .unwrap();
    let job = env.state.queue.claim("w").await.unwrap().unwrap();
    process_job(&env.state.worker, &job).await.unwrap();

    let second = env.state.runs.get_run(&second.id).await.unwrap().unwrap();
    assert_eq!(second.status, "success");
    assert_eq!(second.sql_used, first.sql_used);
    assert_eq!(
        second.result_data, first.result_data,
        "a cache hit returns the identical response payload"
    );
    assert_eq!(env.model.request_count(), calls_after_cold);

    // The cache hit still records the exchange.
    let session = env
        .state
        .sessions
        .get(first.chat_session_id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(session.total_messages, 4);
}

/// Single-table mode never enumerates tables: the prompt describes only the
/// selected table even though the dataset holds others.
#[tokio::test]
async fn single_table_mode_exposes_only_the_selected_table() {
    let env = env().await;
    let user = register_user(&env, "u@x.com").await;
    seed_orders_dataset(&env, "sales").await;
    let connection = sqlite_connection(&env, &user, "sales").await;

    let mut req = agent_request(&connection.id);
    req.single_table_mode = true;
    req.selected_table = Some("orders".to_string());
    let agent = env.state.agents.create(&user.id, req).await.unwrap();

    env.model
        .push_reply("```sql\nSELECT * FROM orders LIMIT 5\n```");
    env.model.push_reply("Here are the first 5 orders.");

    let run = env
        .state
        .runs
        .create_run(&user.id, &agent, "Show the 5 first orders", None)
        .await
        .unwrap();
    let job = env.state.queue.claim("w").await.unwrap().unwrap();
    process_job(&env.state.worker, &job).await.unwrap();

    let done = env.state.runs.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(done.status, "success");
    assert!(done.sql_used.as_deref().unwrap().contains("orders"));

    let generation_prompt = &env.model.requests()[0][0].content;
    assert!(generation_prompt.contains("orders("));
    assert!(
        !generation_prompt.contains("secrets"),
        "prompt must not mention tables outside the selected one"
    );
}

/// Empty question: rejected before anything is written, no job emitted.
#[tokio::test]
async fn empty_question_is_rejected_without_a_job() {
    let env = env().await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;

    let err = env
        .state
        .runs
        .create_run(&user.id, &agent, "   ", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid input"));

    assert_eq!(env.state.queue.pending_depth().await.unwrap(), 0);
    let (_, total) = env
        .state
        .runs
        .list_runs(&user.id, &Default::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 0);
}

/// A zero-second budget elapses immediately and lands in the timeout terminal.
#[tokio::test]
async fn exhausted_budget_finalises_as_timeout() {
    let env = build_env(
        |config| config.worker.run_timeout_secs = 0,
        Arc::new(FixedEmbedder::default()),
    )
    .await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;
    queue_count_exchange(&env);

    let run = env
        .state
        .runs
        .create_run(&user.id, &agent, "How many rows in orders?", None)
        .await
        .unwrap();
    let job = env.state.queue.claim("w").await.unwrap().unwrap();
    process_job(&env.state.worker, &job).await.unwrap();

    let done = env.state.runs.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(done.status, "failure");
    assert_eq!(done.error_kind.as_deref(), Some("timeout_error"));
    assert!(done.finished_at.is_some());
}

/// A model that emits a broken query first still succeeds via the next
/// candidate.
#[tokio::test]
async fn first_executable_candidate_wins() {
    let env = env().await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;

    env.model.push_reply(
        "Either of these:\n\
         ```sql\nSELECT nope FROM missing_table\n```\n\
         ```sql\nSELECT COUNT(*) AS order_count FROM orders\n```",
    );
    env.model.push_reply("There are 3 orders.");

    let run = env
        .state
        .runs
        .create_run(&user.id, &agent, "How many orders?", None)
        .await
        .unwrap();
    let job = env.state.queue.claim("w").await.unwrap().unwrap();
    process_job(&env.state.worker, &job).await.unwrap();

    let done = env.state.runs.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(done.status, "success");
    assert!(done.sql_used.as_deref().unwrap().contains("COUNT(*)"));
}

/// A model reply with no SQL at all is a model error, not a crash.
#[tokio::test]
async fn sql_free_reply_fails_as_model_error() {
    let env = env().await;
    let (user, _connection, agent) = seed_stack(&env, "u@x.com").await;

    env.model
        .push_reply("I am sorry, I cannot help with that request.");

    let run = env
        .state
        .runs
        .create_run(&user.id, &agent, "How many orders?", None)
        .await
        .unwrap();
    let job = env.state.queue.claim("w").await.unwrap().unwrap();
    process_job(&env.state.worker, &job).await.unwrap();

    let done = env.state.runs.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(done.status, "failure");
    assert_eq!(done.error_kind.as_deref(), Some("model_error"));
}
