// src/pipeline/state.rs

//! The serialisable state bag threaded through the node graph.
//!
//! Live resources never ride in the state; they are parked in the object
//! registry and referenced here by opaque ids, resolved inside the worker
//! that executes the run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineState {
    // Required at construction.
    pub user_input: String,
    pub user_id: String,
    pub agent_id: String,
    pub run_id: String,

    pub chat_session_id: Option<String>,

    // Resource references, resolved through the registry.
    pub connection_kind: Option<String>,
    pub connection_id: Option<String>,
    pub engine_ref: Option<String>,
    pub agent_bundle_ref: Option<String>,
    pub cache_ref: Option<String>,
    pub history_ref: Option<String>,

    // Retrieved context.
    pub relevant_history: Option<String>,
    pub has_history: bool,
    pub schema_snippet: Option<String>,
    pub sample_rows: Option<String>,

    // Query execution products.
    pub draft_answer: Option<String>,
    pub sql_query: Option<String>,
    pub result_rows: Option<Value>,
    pub result_row_count: Option<i64>,
    pub execution_ms: Option<i64>,

    pub formatted_response: Option<String>,

    // Terminal error markers.
    pub error_kind: Option<String>,
    pub error_message: Option<String>,

    pub cache_hit: bool,
}

impl PipelineState {
    pub fn new(
        run_id: &str,
        user_id: &str,
        agent_id: &str,
        user_input: &str,
        chat_session_id: Option<String>,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            user_input: user_input.to_string(),
            chat_session_id,
            ..Default::default()
        }
    }

    pub fn failed(&self) -> bool {
        self.error_kind.is_some()
    }
}

/// What a node tells the dispatcher to do next.
#[derive(Debug)]
pub enum NodeOutcome {
    /// Follow the linear edge to the next node.
    Continue,
    /// Route to a named node.
    Jump(&'static str),
    /// The node did not apply; follow the linear edge.
    Skip,
    /// The node failed. Fatal nodes abort to the error terminal; soft nodes
    /// are logged and absorbed.
    Fail { kind: ErrorKind, message: String },
}

impl NodeOutcome {
    pub fn fail(kind: ErrorKind, message: impl Into<String>) -> Self {
        NodeOutcome::Fail {
            kind,
            message: message.into(),
        }
    }
}
