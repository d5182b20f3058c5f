// src/broker/worker.rs

//! The worker pool: claims jobs, rehydrates run context from the database,
//! drives the pipeline, and writes the terminal run record.
//!
//! Workers are stateless with respect to run metadata; everything needed to
//! execute is reloaded by id from the envelope. Run-scoped registry objects
//! are released on every exit path, and the terminal write is idempotent so
//! redelivered jobs cannot double-finalise a run.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ClaimedJob, JobQueue};
use crate::agents::AgentService;
use crate::cache::ResponseCache;
use crate::config::{BrokerConfig, HistoryConfig, WorkerConfig};
use crate::connections::ConnectionService;
use crate::embedding::EmbeddingClient;
use crate::engine::manager::EngineManager;
use crate::error::{CoreError, ErrorKind};
use crate::history::HistoryService;
use crate::llm::ModelClient;
use crate::pipeline::{AgentBundle, Pipeline, PipelineContext, PipelineState};
use crate::registry::{Category, ObjectRegistry};
use crate::runs::{RunController, RunSuccess};
use crate::vector::VectorStore;

pub struct WorkerContext {
    pub db: sqlx::SqlitePool,
    pub queue: JobQueue,
    pub runs: RunController,
    pub agents: AgentService,
    pub connections: ConnectionService,
    pub engines: Arc<EngineManager>,
    pub registry: Arc<ObjectRegistry>,
    pub vectors: Arc<VectorStore>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub model: Arc<dyn ModelClient>,
    pub cache: ResponseCache,
    pub history_cfg: HistoryConfig,
    pub worker_cfg: WorkerConfig,
    pub broker_cfg: BrokerConfig,
    pub pipeline: Pipeline,
    /// Registry ref of the process-wide response cache.
    cache_ref: String,
    /// Agent bundles cached per (agent version, connection version).
    bundles: RwLock<HashMap<String, (i64, i64, String)>>,
}

impl WorkerContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: sqlx::SqlitePool,
        queue: JobQueue,
        runs: RunController,
        agents: AgentService,
        connections: ConnectionService,
        engines: Arc<EngineManager>,
        registry: Arc<ObjectRegistry>,
        vectors: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        model: Arc<dyn ModelClient>,
        cache: ResponseCache,
        history_cfg: HistoryConfig,
        worker_cfg: WorkerConfig,
        broker_cfg: BrokerConfig,
    ) -> Self {
        let cache_ref = registry.put(Category::Cache, cache.clone());
        Self {
            db,
            queue,
            runs,
            agents,
            connections,
            engines,
            registry,
            vectors,
            embedder,
            model,
            cache,
            history_cfg,
            worker_cfg,
            broker_cfg,
            pipeline: Pipeline::standard(),
            cache_ref,
            bundles: RwLock::new(HashMap::new()),
        }
    }

    fn pipeline_context(&self) -> PipelineContext {
        PipelineContext {
            registry: self.registry.clone(),
            model: self.model.clone(),
            history_cfg: self.history_cfg.clone(),
        }
    }

    /// Reuse or rebuild the agent bundle for the current agent/connection
    /// versions.
    async fn resolve_bundle(&self, agent_id: &str, user_id: &str) -> Result<(String, String), CoreError> {
        let agent = self.agents.get(agent_id).await?;
        if agent.owner_user_id != user_id {
            return Err(CoreError::InvalidInput(format!("unknown agent {agent_id}")));
        }

        let connection = self
            .connections
            .get_owned(&agent.connection_id, &agent.owner_user_id)
            .await?;
        let engine_ref = self.engines.resolve(&connection).await?;

        if let Some((agent_ver, conn_ver, bundle_ref)) = self.bundles.read().get(&agent.id) {
            if *agent_ver == agent.version && *conn_ver == connection.version {
                return Ok((bundle_ref.clone(), engine_ref));
            }
        }

        let bundle = AgentBundle {
            agent: agent.clone(),
            engine_ref: engine_ref.clone(),
            connection_version: connection.version,
        };
        let bundle_ref = self.registry.put(Category::AgentBundle, bundle);

        let stale = self.bundles.write().insert(
            agent.id.clone(),
            (agent.version, connection.version, bundle_ref.clone()),
        );
        if let Some((_, _, old_ref)) = stale {
            self.registry.remove(Category::AgentBundle, &old_ref);
        }

        Ok((bundle_ref, engine_ref))
    }
}

/// Spawn `worker_count × concurrency` polling loops.
pub fn spawn_workers(ctx: Arc<WorkerContext>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for worker in 0..ctx.worker_cfg.worker_count {
        for slot in 0..ctx.worker_cfg.concurrency {
            let ctx = ctx.clone();
            let worker_id = format!("worker-{worker}-{slot}");
            handles.push(tokio::spawn(async move {
                worker_loop(ctx, worker_id).await;
            }));
        }
    }
    info!("Started {} worker slots", handles.len());
    handles
}

async fn worker_loop(ctx: Arc<WorkerContext>, worker_id: String) {
    let poll = Duration::from_millis(ctx.worker_cfg.poll_interval_ms);

    loop {
        match ctx.queue.claim(&worker_id).await {
            Ok(Some(job)) => {
                if let Err(e) = process_job(&ctx, &job).await {
                    error!("{}: job {} failed unexpectedly: {}", worker_id, job.id, e);
                }
            }
            Ok(None) => {
                tokio::time::sleep(poll).await;
            }
            Err(e) => {
                error!("{}: claim failed: {}", worker_id, e);
                tokio::time::sleep(poll).await;
            }
        }
    }
}

/// Execute one claimed job end to end. Every exit path acknowledges the job
/// exactly when the run record can no longer regress.
pub async fn process_job(ctx: &WorkerContext, job: &ClaimedJob) -> Result<(), CoreError> {
    let envelope = &job.envelope;
    debug!(
        "Processing job {} (run {}, attempt {})",
        job.id, envelope.run_id, job.attempts
    );

    // Broker-side retry bound: a job that keeps coming back is dropped and
    // the run is failed rather than redelivered forever.
    if job.attempts > ctx.broker_cfg.max_retries {
        warn!(
            "Job {} exceeded {} delivery attempts, dropping",
            job.id, ctx.broker_cfg.max_retries
        );
        ctx.runs
            .finalize_failure(
                &envelope.run_id,
                ErrorKind::InternalError,
                "job exceeded its delivery attempts",
            )
            .await?;
        ctx.queue
            .ack(job.id)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        return Ok(());
    }

    // queued → running, or recover a run a dead worker left in `running`.
    let picked = ctx.runs.mark_running(&envelope.run_id).await?;
    if !picked && !ctx.runs.is_running(&envelope.run_id).await? {
        debug!(
            "Run {} is cancelled or already terminal, dropping job {}",
            envelope.run_id, job.id
        );
        ctx.queue
            .ack(job.id)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        return Ok(());
    }

    // Run-scoped history service, released on every exit path below.
    let history = HistoryService::new(
        ctx.db.clone(),
        ctx.vectors.clone(),
        ctx.embedder.clone(),
        ctx.history_cfg.clone(),
    );
    let history_ref = ctx.registry.put(Category::HistoryService, history);

    let outcome = execute_run(ctx, job, &history_ref).await;

    ctx.registry.remove(Category::HistoryService, &history_ref);

    match outcome {
        Ok(state) => finalize_from_state(ctx, &envelope.run_id, &state).await?,
        Err(e) => {
            ctx.runs
                .finalize_failure(&envelope.run_id, e.kind(), &e.to_string())
                .await?;
        }
    }

    ctx.queue
        .ack(job.id)
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?;
    Ok(())
}

async fn execute_run(
    ctx: &WorkerContext,
    job: &ClaimedJob,
    history_ref: &str,
) -> Result<PipelineState, CoreError> {
    let envelope = &job.envelope;
    let (bundle_ref, engine_ref) = ctx
        .resolve_bundle(&envelope.agent_id, &envelope.user_id)
        .await?;

    let mut state = PipelineState::new(
        &envelope.run_id,
        &envelope.user_id,
        &envelope.agent_id,
        &envelope.question,
        envelope.chat_session_id.clone(),
    );
    state.agent_bundle_ref = Some(bundle_ref);
    state.engine_ref = Some(engine_ref);
    state.cache_ref = Some(ctx.cache_ref.clone());
    state.history_ref = Some(history_ref.to_string());

    let pipeline_ctx = ctx.pipeline_context();
    let budget = Duration::from_secs(ctx.worker_cfg.run_timeout_secs);

    match tokio::time::timeout(budget, ctx.pipeline.execute(state, &pipeline_ctx)).await {
        Ok(state) => Ok(state),
        Err(_) => Err(CoreError::Timeout),
    }
}

async fn finalize_from_state(
    ctx: &WorkerContext,
    run_id: &str,
    state: &PipelineState,
) -> Result<(), CoreError> {
    if let Some(kind) = state.error_kind.as_deref() {
        let kind = match kind {
            "invalid_input" => ErrorKind::InvalidInput,
            "auth_error" => ErrorKind::AuthError,
            "connect_error" => ErrorKind::ConnectError,
            "schema_error" => ErrorKind::SchemaError,
            "query_error" => ErrorKind::QueryError,
            "model_error" => ErrorKind::ModelError,
            "timeout_error" => ErrorKind::TimeoutError,
            _ => ErrorKind::InternalError,
        };
        ctx.runs
            .finalize_failure(run_id, kind, state.error_message.as_deref().unwrap_or(""))
            .await?;
        return Ok(());
    }

    // The formatted response is the canonical result payload: clients parse
    // it back into narrative and SQL, and it is the one representation both
    // the cold path and the cache-hit path produce.
    let outcome = RunSuccess {
        sql_used: state.sql_query.clone(),
        result_data: state
            .formatted_response
            .clone()
            .or_else(|| state.result_rows.as_ref().map(|rows| rows.to_string())),
        execution_ms: state.execution_ms,
        result_rows_count: state.result_row_count,
    };
    ctx.runs.finalize_success(run_id, &outcome).await?;
    Ok(())
}
