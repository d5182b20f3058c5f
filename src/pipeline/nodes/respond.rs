// src/pipeline/nodes/respond.rs

use async_trait::async_trait;

use crate::error::ErrorKind;
use crate::llm::ChatMessage;
use crate::pipeline::{ids, NodeOutcome, PipelineContext, PipelineNode, PipelineState};

/// Optional second model pass that rewrites the draft answer for clarity.
pub struct RefineResponse;

#[async_trait]
impl PipelineNode for RefineResponse {
    fn id(&self) -> &'static str {
        ids::REFINE_RESPONSE
    }

    async fn run(&self, state: &mut PipelineState, ctx: &PipelineContext) -> NodeOutcome {
        let bundle = match ctx.bundle(state) {
            Ok(bundle) => bundle,
            Err(outcome) => return outcome,
        };
        if !bundle.agent.refinement_enabled {
            return NodeOutcome::Skip;
        }
        let Some(draft) = state.draft_answer.clone() else {
            return NodeOutcome::Skip;
        };

        let messages = [
            ChatMessage::system(
                "Rewrite the answer below for clarity and brevity. Keep every \
                 number and fact exactly as given. Reply with the rewritten \
                 answer only.",
            ),
            ChatMessage::user(format!(
                "Question: {}\n\nAnswer: {}",
                state.user_input, draft
            )),
        ];

        match ctx.model.complete(&bundle.agent.model_id, &messages).await {
            Ok(refined) => {
                state.draft_answer = Some(refined.trim().to_string());
                NodeOutcome::Continue
            }
            Err(e) => NodeOutcome::fail(ErrorKind::ModelError, e.to_string()),
        }
    }
}

/// Deterministic response template. The shape is stable because clients parse
/// it back to separate the narrative from the SQL block.
pub struct FormatResponse;

pub fn render_response(
    answer: &str,
    sql: Option<&str>,
    execution_ms: Option<i64>,
    row_count: Option<i64>,
) -> String {
    let mut out = String::from(answer);

    if let Some(sql) = sql {
        out.push_str(&format!("\n\n```sql\n{sql}\n```"));
    }

    out.push_str(&format!(
        "\n\n---\nExecution time: {} ms | Rows returned: {}",
        execution_ms.unwrap_or(0),
        row_count.unwrap_or(0)
    ));

    out
}

#[async_trait]
impl PipelineNode for FormatResponse {
    fn id(&self) -> &'static str {
        ids::FORMAT_RESPONSE
    }

    async fn run(&self, state: &mut PipelineState, _ctx: &PipelineContext) -> NodeOutcome {
        let answer = state
            .draft_answer
            .clone()
            .unwrap_or_else(|| "The query completed.".to_string());

        state.formatted_response = Some(render_response(
            &answer,
            state.sql_query.as_deref(),
            state.execution_ms,
            state.result_row_count,
        ));
        NodeOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_is_stable() {
        let rendered = render_response(
            "There are 42 orders.",
            Some("SELECT COUNT(*) FROM orders"),
            Some(12),
            Some(1),
        );
        assert!(rendered.starts_with("There are 42 orders."));
        assert!(rendered.contains("```sql\nSELECT COUNT(*) FROM orders\n```"));
        assert!(rendered.ends_with("---\nExecution time: 12 ms | Rows returned: 1"));
    }

    #[test]
    fn template_without_sql_keeps_markers() {
        let rendered = render_response("No data.", None, None, None);
        assert!(!rendered.contains("```sql"));
        assert!(rendered.contains("Execution time: 0 ms | Rows returned: 0"));
    }
}
