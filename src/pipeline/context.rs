// src/pipeline/context.rs

//! Services shared by every node of a pipeline instance, plus typed accessors
//! for the registry references carried in the state.

use std::sync::Arc;

use crate::agents::Agent;
use crate::cache::ResponseCache;
use crate::config::HistoryConfig;
use crate::engine::EngineHandle;
use crate::error::ErrorKind;
use crate::history::HistoryService;
use crate::llm::ModelClient;
use crate::pipeline::state::{NodeOutcome, PipelineState};
use crate::registry::{Category, ObjectRegistry};

/// A constructed agent: its persisted configuration plus the registry ref of
/// the engine serving its connection. Cached per agent version by the worker.
pub struct AgentBundle {
    pub agent: Agent,
    pub engine_ref: String,
    pub connection_version: i64,
}

pub struct PipelineContext {
    pub registry: Arc<ObjectRegistry>,
    pub model: Arc<dyn ModelClient>,
    pub history_cfg: HistoryConfig,
}

impl PipelineContext {
    pub fn cache(&self, state: &PipelineState) -> Result<Arc<ResponseCache>, NodeOutcome> {
        let cache_ref = state.cache_ref.as_deref().ok_or_else(|| {
            NodeOutcome::fail(ErrorKind::InternalError, "missing cache reference")
        })?;
        self.registry
            .get::<ResponseCache>(Category::Cache, cache_ref)
            .map_err(|e| NodeOutcome::fail(ErrorKind::InternalError, e.to_string()))
    }

    pub fn bundle(&self, state: &PipelineState) -> Result<Arc<AgentBundle>, NodeOutcome> {
        let bundle_ref = state.agent_bundle_ref.as_deref().ok_or_else(|| {
            NodeOutcome::fail(ErrorKind::InternalError, "missing agent bundle reference")
        })?;
        self.registry
            .get::<AgentBundle>(Category::AgentBundle, bundle_ref)
            .map_err(|e| NodeOutcome::fail(ErrorKind::InternalError, e.to_string()))
    }

    pub fn engine(&self, state: &PipelineState) -> Result<Arc<EngineHandle>, NodeOutcome> {
        let engine_ref = state.engine_ref.as_deref().ok_or_else(|| {
            NodeOutcome::fail(ErrorKind::ConnectError, "missing engine reference")
        })?;
        self.registry
            .get::<EngineHandle>(Category::Engine, engine_ref)
            .map_err(|e| NodeOutcome::fail(ErrorKind::ConnectError, e.to_string()))
    }

    pub fn history(&self, state: &PipelineState) -> Result<Arc<HistoryService>, NodeOutcome> {
        let history_ref = state.history_ref.as_deref().ok_or_else(|| {
            NodeOutcome::fail(ErrorKind::InternalError, "missing history reference")
        })?;
        self.registry
            .get::<HistoryService>(Category::HistoryService, history_ref)
            .map_err(|e| NodeOutcome::fail(ErrorKind::InternalError, e.to_string()))
    }
}
