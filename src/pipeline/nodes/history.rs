// src/pipeline/nodes/history.rs

use async_trait::async_trait;
use tracing::warn;

use crate::error::ErrorKind;
use crate::history::render_history;
use crate::pipeline::{ids, NodeOutcome, PipelineContext, PipelineNode, PipelineState};

/// Pull semantically similar past messages plus the session tail and render
/// them into a bounded prompt block. Total: any failure leaves the state with
/// empty history and the run proceeds.
pub struct HistoryRetrieve;

#[async_trait]
impl PipelineNode for HistoryRetrieve {
    fn id(&self) -> &'static str {
        ids::HISTORY_RETRIEVE
    }

    async fn run(&self, state: &mut PipelineState, ctx: &PipelineContext) -> NodeOutcome {
        state.relevant_history = Some(String::new());
        state.has_history = false;

        if !ctx.history_cfg.enabled {
            return NodeOutcome::Skip;
        }
        let Some(session_id) = state.chat_session_id.clone() else {
            return NodeOutcome::Skip;
        };

        let history = match ctx.history(state) {
            Ok(history) => history,
            Err(_) => {
                warn!("History service unavailable for run {}", state.run_id);
                return NodeOutcome::Skip;
            }
        };

        let similar = history
            .relevant(
                &state.user_id,
                &state.agent_id,
                &state.user_input,
                ctx.history_cfg.semantic_k,
            )
            .await;

        let recent = match history.recent(&session_id, ctx.history_cfg.recent_count).await {
            Ok(recent) => recent,
            Err(e) => {
                warn!("Recent-message load failed for run {}: {}", state.run_id, e);
                Vec::new()
            }
        };

        let rendered = render_history(&recent, &similar, ctx.history_cfg.max_messages);
        state.has_history = !rendered.is_empty();
        state.relevant_history = Some(rendered);
        NodeOutcome::Continue
    }
}

/// Record the exchange: two messages, bumped session counters, embedding
/// backlog. Side-effect-only; failure logs a warning and never fails the run.
pub struct HistoryCapture;

#[async_trait]
impl PipelineNode for HistoryCapture {
    fn id(&self) -> &'static str {
        ids::HISTORY_CAPTURE
    }

    async fn run(&self, state: &mut PipelineState, ctx: &PipelineContext) -> NodeOutcome {
        if !ctx.history_cfg.enabled {
            return NodeOutcome::Skip;
        }
        let Some(session_id) = state.chat_session_id.clone() else {
            return NodeOutcome::Skip;
        };
        let Some(response) = state.formatted_response.clone() else {
            return NodeOutcome::Skip;
        };

        let history = match ctx.history(state) {
            Ok(history) => history,
            Err(outcome) => return outcome,
        };

        match history
            .capture(
                &session_id,
                Some(&state.run_id),
                &state.user_input,
                &response,
                state.sql_query.as_deref(),
            )
            .await
        {
            Ok(_) => NodeOutcome::Continue,
            Err(e) => NodeOutcome::fail(ErrorKind::InternalError, e.to_string()),
        }
    }
}
