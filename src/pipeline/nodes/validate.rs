// src/pipeline/nodes/validate.rs

use async_trait::async_trait;

use crate::error::ErrorKind;
use crate::pipeline::{ids, NodeOutcome, PipelineContext, PipelineNode, PipelineState};

/// Entry gate: a non-empty question, a known agent, and an owner match.
pub struct ValidateInput;

#[async_trait]
impl PipelineNode for ValidateInput {
    fn id(&self) -> &'static str {
        ids::VALIDATE_INPUT
    }

    fn fatal(&self) -> bool {
        true
    }

    async fn run(&self, state: &mut PipelineState, ctx: &PipelineContext) -> NodeOutcome {
        if state.user_input.trim().is_empty() {
            return NodeOutcome::fail(ErrorKind::InvalidInput, "question must not be empty");
        }

        let bundle = match ctx.bundle(state) {
            Ok(bundle) => bundle,
            Err(_) => {
                return NodeOutcome::fail(
                    ErrorKind::InvalidInput,
                    format!("unknown agent {}", state.agent_id),
                )
            }
        };

        if bundle.agent.owner_user_id != state.user_id {
            return NodeOutcome::fail(
                ErrorKind::InvalidInput,
                format!("agent {} is not owned by the requesting user", state.agent_id),
            );
        }

        state.connection_id = Some(bundle.agent.connection_id.clone());
        NodeOutcome::Continue
    }
}
