// src/pipeline/mod.rs

//! The question-to-answer node graph.
//!
//! Nodes operate on a shared serialisable state bag and return a tagged
//! outcome; the dispatcher follows linear order on Continue/Skip, a named
//! target on Jump, and routes Fail to the error terminal for fatal nodes
//! while soft-node failures are logged and absorbed. Parallelism exists only
//! across pipeline instances, never between nodes of one instance.

pub mod context;
pub mod nodes;
pub mod state;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub use context::{AgentBundle, PipelineContext};
pub use state::{NodeOutcome, PipelineState};

/// Node ids, used for conditional routing.
pub mod ids {
    pub const VALIDATE_INPUT: &str = "validate_input";
    pub const CHECK_CACHE: &str = "check_cache";
    pub const HISTORY_RETRIEVE: &str = "history_retrieve";
    pub const PREPARE_CONTEXT: &str = "prepare_context";
    pub const PROCESS_INITIAL_CONTEXT: &str = "process_initial_context";
    pub const PROCESS_QUERY: &str = "process_query";
    pub const REFINE_RESPONSE: &str = "refine_response";
    pub const FORMAT_RESPONSE: &str = "format_response";
    pub const HISTORY_CAPTURE: &str = "history_capture";
    pub const CACHE_STORE: &str = "cache_store";
}

/// One step in the graph.
#[async_trait]
pub trait PipelineNode: Send + Sync {
    /// Node id, unique within the graph.
    fn id(&self) -> &'static str;

    /// Whether a failure of this node aborts the run.
    fn fatal(&self) -> bool {
        false
    }

    async fn run(&self, state: &mut PipelineState, ctx: &PipelineContext) -> NodeOutcome;
}

pub struct Pipeline {
    nodes: Vec<Arc<dyn PipelineNode>>,
}

impl Pipeline {
    /// The standard question-answering graph, in linear edge order.
    pub fn standard() -> Self {
        Self {
            nodes: vec![
                Arc::new(nodes::validate::ValidateInput),
                Arc::new(nodes::cache::CheckCache),
                Arc::new(nodes::history::HistoryRetrieve),
                Arc::new(nodes::schema::PrepareContext),
                Arc::new(nodes::schema::ProcessInitialContext),
                Arc::new(nodes::query::ProcessQuery),
                Arc::new(nodes::respond::RefineResponse),
                Arc::new(nodes::respond::FormatResponse),
                Arc::new(nodes::history::HistoryCapture),
                Arc::new(nodes::cache::CacheStore),
            ],
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id() == id)
    }

    /// Drive the state through the graph to a terminal. Never panics and
    /// never returns early: a fatal failure lands in the state's error
    /// markers, soft failures are absorbed.
    pub async fn execute(&self, mut state: PipelineState, ctx: &PipelineContext) -> PipelineState {
        let mut idx = 0;

        while idx < self.nodes.len() {
            let node = &self.nodes[idx];
            debug!("Pipeline node {} (run {})", node.id(), state.run_id);

            match node.run(&mut state, ctx).await {
                NodeOutcome::Continue | NodeOutcome::Skip => idx += 1,
                NodeOutcome::Jump(target) => match self.position(target) {
                    Some(next) => idx = next,
                    None => {
                        state.error_kind = Some("internal_error".to_string());
                        state.error_message =
                            Some(format!("node {} routed to unknown node {target}", node.id()));
                        break;
                    }
                },
                NodeOutcome::Fail { kind, message } => {
                    if node.fatal() {
                        warn!(
                            "Run {} aborted at {}: {} ({})",
                            state.run_id,
                            node.id(),
                            message,
                            kind
                        );
                        state.error_kind = Some(kind.as_str().to_string());
                        state.error_message = Some(message);
                        break;
                    }
                    warn!(
                        "Soft node {} failed on run {}, continuing: {}",
                        node.id(),
                        state.run_id,
                        message
                    );
                    idx += 1;
                }
            }
        }

        state
    }
}
