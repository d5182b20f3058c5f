// src/pipeline/nodes/query.rs

use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::llm::{candidate_queries, has_explicit_limit, ChatMessage};
use crate::pipeline::{ids, NodeOutcome, PipelineContext, PipelineNode, PipelineState};

/// Rows of the result set shown to the narrating model call.
const NARRATION_ROW_CAP: usize = 20;

/// Core SQL generation and execution.
///
/// The model may emit several candidate queries; the first one that executes
/// without error is kept. The row cap is the agent's top_k unless the query
/// carries its own LIMIT.
pub struct ProcessQuery;

impl ProcessQuery {
    fn generation_prompt(state: &PipelineState, dialect: &str, top_k: i64) -> Vec<ChatMessage> {
        let mut system = format!(
            "You translate questions into {dialect} SQL.\n\
             Schema:\n{}\n",
            state.schema_snippet.as_deref().unwrap_or("(unknown)")
        );
        if let Some(samples) = state.sample_rows.as_deref() {
            if !samples.is_empty() {
                system.push_str(&format!("\nSample rows:\n{samples}\n"));
            }
        }
        if state.has_history {
            if let Some(history) = state.relevant_history.as_deref() {
                system.push_str(&format!("\nConversation context:\n{history}\n"));
            }
        }
        system.push_str(&format!(
            "\nReturn exactly one SQL query in a ```sql fence. \
             Unless the question demands otherwise, return at most {top_k} rows."
        ));

        vec![ChatMessage::system(system), ChatMessage::user(state.user_input.clone())]
    }

    fn narration_prompt(state: &PipelineState, rows_json: &serde_json::Value) -> Vec<ChatMessage> {
        let rendered = serde_json::to_string(rows_json).unwrap_or_default();
        vec![
            ChatMessage::system(
                "You summarise SQL results for end users. Answer the question \
                 directly and concisely from the rows given. Do not invent data.",
            ),
            ChatMessage::user(format!(
                "Question: {}\n\nResult rows (JSON): {}",
                state.user_input, rendered
            )),
        ]
    }
}

#[async_trait]
impl PipelineNode for ProcessQuery {
    fn id(&self) -> &'static str {
        ids::PROCESS_QUERY
    }

    fn fatal(&self) -> bool {
        true
    }

    async fn run(&self, state: &mut PipelineState, ctx: &PipelineContext) -> NodeOutcome {
        let bundle = match ctx.bundle(state) {
            Ok(bundle) => bundle,
            Err(outcome) => return outcome,
        };
        let engine = match ctx.engine(state) {
            Ok(engine) => engine,
            Err(outcome) => return outcome,
        };

        let messages = Self::generation_prompt(
            state,
            engine.dialect().as_str(),
            bundle.agent.top_k,
        );
        let reply = match ctx.model.complete(&bundle.agent.model_id, &messages).await {
            Ok(reply) => reply,
            Err(e) => return NodeOutcome::fail(ErrorKind::ModelError, e.to_string()),
        };

        let candidates = candidate_queries(&reply);
        if candidates.is_empty() {
            return NodeOutcome::fail(ErrorKind::ModelError, "model produced no SQL");
        }

        let mut last_error = String::new();
        for candidate in &candidates {
            let limit = if has_explicit_limit(candidate) {
                None
            } else {
                Some(bundle.agent.top_k as usize)
            };

            let started = Instant::now();
            match engine.execute(candidate, limit).await {
                Ok(rows) => {
                    let elapsed_ms = started.elapsed().as_millis() as i64;
                    debug!(
                        "Run {}: query returned {} rows in {} ms",
                        state.run_id,
                        rows.len(),
                        elapsed_ms
                    );

                    let rows_json = rows.to_json();
                    state.sql_query = Some(candidate.clone());
                    state.result_row_count = Some(rows.len() as i64);
                    state.execution_ms = Some(elapsed_ms);

                    // Narration is best-effort; a model hiccup here must not
                    // throw away an executed result.
                    let mut capped = rows_json.clone();
                    if let serde_json::Value::Array(items) = &mut capped {
                        items.truncate(NARRATION_ROW_CAP);
                    }
                    let narration = Self::narration_prompt(state, &capped);
                    state.draft_answer = match ctx
                        .model
                        .complete(&bundle.agent.model_id, &narration)
                        .await
                    {
                        Ok(answer) => Some(answer.trim().to_string()),
                        Err(e) => {
                            warn!("Narration failed for run {}: {}", state.run_id, e);
                            Some(format!("The query returned {} rows.", rows.len()))
                        }
                    };
                    state.result_rows = Some(rows_json);

                    return NodeOutcome::Continue;
                }
                Err(e) => {
                    last_error = e.to_string();
                    debug!("Run {}: candidate rejected: {}", state.run_id, last_error);
                }
            }
        }

        NodeOutcome::fail(ErrorKind::QueryError, last_error)
    }
}
