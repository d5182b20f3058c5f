// src/state.rs
// Application state shared across handlers and workers.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use crate::agents::AgentService;
use crate::auth::AuthService;
use crate::broker::worker::WorkerContext;
use crate::broker::JobQueue;
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::connections::ConnectionService;
use crate::embedding::{EmbeddingClient, OpenAiEmbeddings};
use crate::engine::manager::EngineManager;
use crate::llm::{ModelClient, OpenAiChatClient};
use crate::registry::ObjectRegistry;
use crate::runs::RunController;
use crate::sessions::SessionService;
use crate::validation::ValidationHarness;
use crate::vector::VectorStore;

pub struct AppState {
    pub db: SqlitePool,
    pub auth: Arc<AuthService>,
    pub connections: Arc<ConnectionService>,
    pub agents: Arc<AgentService>,
    pub sessions: SessionService,
    pub runs: RunController,
    pub cache: ResponseCache,
    pub registry: Arc<ObjectRegistry>,
    pub engines: Arc<EngineManager>,
    pub vectors: Arc<VectorStore>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub model: Arc<dyn ModelClient>,
    pub queue: JobQueue,
    pub validation: Arc<ValidationHarness>,
    pub worker: Arc<WorkerContext>,
    pub config: Config,
}

impl AppState {
    pub async fn new(pool: SqlitePool, config: Config) -> Result<Self> {
        info!("Initializing model client ({})", config.llm.base_url);
        let model: Arc<dyn ModelClient> = Arc::new(OpenAiChatClient::new(&config.llm)?);

        info!("Initializing embedder ({})", config.embedding.model);
        let embedder: Arc<dyn EmbeddingClient> =
            Arc::new(OpenAiEmbeddings::new(&config.llm, &config.embedding.model));

        Self::with_clients(pool, config, model, embedder).await
    }

    /// Wiring with injectable model/embedder clients (tests script these).
    pub async fn with_clients(
        pool: SqlitePool,
        config: Config,
        model: Arc<dyn ModelClient>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self> {
        let registry = Arc::new(ObjectRegistry::new());

        let vectors = Arc::new(
            VectorStore::connect(config.qdrant.url.as_deref(), &config.qdrant.collection).await,
        );

        let cache = ResponseCache::new(pool.clone(), &config.cache);

        let engines = Arc::new(EngineManager::new(
            config.database.datasets_dir.clone(),
            registry.clone(),
        ));

        let auth = Arc::new(AuthService::new(pool.clone()));
        let connections = Arc::new(ConnectionService::new(
            pool.clone(),
            config.database.datasets_dir.clone(),
        ));
        let agents = Arc::new(AgentService::new(pool.clone(), cache.clone()));
        let sessions = SessionService::new(pool.clone());

        let queue = JobQueue::new(pool.clone(), &config.broker, &config.worker);
        let runs = RunController::new(pool.clone(), queue.clone(), sessions.clone());

        let validation = Arc::new(ValidationHarness::new(
            pool.clone(),
            model.clone(),
            &config.llm.judge_model,
        ));

        let worker = Arc::new(WorkerContext::new(
            pool.clone(),
            queue.clone(),
            runs.clone(),
            AgentService::new(pool.clone(), cache.clone()),
            ConnectionService::new(pool.clone(), config.database.datasets_dir.clone()),
            engines.clone(),
            registry.clone(),
            vectors.clone(),
            embedder.clone(),
            model.clone(),
            cache.clone(),
            config.history.clone(),
            config.worker.clone(),
            config.broker.clone(),
        ));

        info!("Application state initialized");

        Ok(Self {
            db: pool,
            auth,
            connections,
            agents,
            sessions,
            runs,
            cache,
            registry,
            engines,
            vectors,
            embedder,
            model,
            queue,
            validation,
            worker,
            config,
        })
    }
}
