// src/pipeline/nodes/cache.rs

use async_trait::async_trait;
use std::time::Instant;
use tracing::debug;

use crate::cache::ResponseCache;
use crate::error::ErrorKind;
use crate::pipeline::{ids, NodeOutcome, PipelineContext, PipelineNode, PipelineState};

/// Fingerprint lookup. A hit short-circuits straight to history capture so
/// the exchange is still recorded; the expensive middle of the graph is
/// skipped entirely.
pub struct CheckCache;

#[async_trait]
impl PipelineNode for CheckCache {
    fn id(&self) -> &'static str {
        ids::CHECK_CACHE
    }

    async fn run(&self, state: &mut PipelineState, ctx: &PipelineContext) -> NodeOutcome {
        let bundle = match ctx.bundle(state) {
            Ok(bundle) => bundle,
            Err(outcome) => return outcome,
        };
        let cache = match ctx.cache(state) {
            Ok(cache) => cache,
            Err(outcome) => return outcome,
        };

        let fingerprint = ResponseCache::fingerprint(
            &state.user_input,
            &state.agent_id,
            bundle.agent.schema_version,
        );

        let started = Instant::now();
        match cache.get(&state.agent_id, &fingerprint).await {
            Ok(Some(hit)) => {
                debug!("Cache hit for run {}", state.run_id);
                state.cache_hit = true;
                state.formatted_response = Some(hit.answer);
                state.sql_query = Some(hit.sql_used);
                state.execution_ms = Some(started.elapsed().as_millis() as i64);
                NodeOutcome::Jump(ids::HISTORY_CAPTURE)
            }
            Ok(None) => NodeOutcome::Continue,
            Err(e) => NodeOutcome::fail(ErrorKind::InternalError, e.to_string()),
        }
    }
}

/// Persist the fresh answer for future fingerprint hits. Best-effort.
pub struct CacheStore;

#[async_trait]
impl PipelineNode for CacheStore {
    fn id(&self) -> &'static str {
        ids::CACHE_STORE
    }

    async fn run(&self, state: &mut PipelineState, ctx: &PipelineContext) -> NodeOutcome {
        if state.cache_hit {
            return NodeOutcome::Skip;
        }

        let (Some(answer), Some(sql)) =
            (state.formatted_response.as_deref(), state.sql_query.as_deref())
        else {
            return NodeOutcome::Skip;
        };

        let bundle = match ctx.bundle(state) {
            Ok(bundle) => bundle,
            Err(outcome) => return outcome,
        };
        let cache = match ctx.cache(state) {
            Ok(cache) => cache,
            Err(outcome) => return outcome,
        };

        let fingerprint = ResponseCache::fingerprint(
            &state.user_input,
            &state.agent_id,
            bundle.agent.schema_version,
        );

        match cache
            .put(
                &state.agent_id,
                &fingerprint,
                answer,
                sql,
                bundle.agent.schema_version,
            )
            .await
        {
            Ok(()) => NodeOutcome::Continue,
            Err(e) => NodeOutcome::fail(ErrorKind::InternalError, e.to_string()),
        }
    }
}
