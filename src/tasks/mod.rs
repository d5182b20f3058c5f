// src/tasks/mod.rs

//! Background task management: the worker pool, the embedding generator, and
//! periodic cache maintenance.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info};

use crate::broker::worker::spawn_workers;
use crate::embedding::generator::EmbeddingGenerator;
use crate::state::AppState;

/// Cache maintenance cadence.
const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct TaskManager {
    app_state: Arc<AppState>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskManager {
    pub fn new(app_state: Arc<AppState>) -> Self {
        Self {
            app_state,
            handles: Vec::new(),
        }
    }

    /// Starts all background tasks.
    pub fn start(&mut self) {
        info!("Starting background task manager");

        self.handles.extend(spawn_workers(self.app_state.worker.clone()));
        self.handles.push(self.spawn_embedding_generator());
        self.handles.push(self.spawn_cache_cleanup());

        info!("Started {} background tasks", self.handles.len());
    }

    fn spawn_embedding_generator(&self) -> JoinHandle<()> {
        let state = self.app_state.clone();
        let interval = Duration::from_secs(state.config.embedding.poll_interval_secs);

        tokio::spawn(async move {
            info!("Embedding generator started (interval: {:?})", interval);

            let generator = EmbeddingGenerator::new(
                state.db.clone(),
                state.embedder.clone(),
                state.vectors.clone(),
                &state.config.embedding,
            );

            let mut interval_timer = time::interval(interval);
            interval_timer.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                interval_timer.tick().await;

                if let Err(e) = generator.run_once().await {
                    error!("Embedding generation pass failed: {}", e);
                }
            }
        })
    }

    fn spawn_cache_cleanup(&self) -> JoinHandle<()> {
        let cache = self.app_state.cache.clone();

        tokio::spawn(async move {
            info!(
                "Cache maintenance started (interval: {:?})",
                CACHE_CLEANUP_INTERVAL
            );

            let mut interval_timer = time::interval(CACHE_CLEANUP_INTERVAL);
            interval_timer.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                interval_timer.tick().await;

                if let Err(e) = cache.cleanup_expired().await {
                    error!("Cache expiry cleanup failed: {}", e);
                }
                if let Err(e) = cache.cleanup_lru().await {
                    error!("Cache LRU cleanup failed: {}", e);
                }
            }
        })
    }

    /// Gracefully shutdown all background tasks.
    pub async fn shutdown(self) {
        info!("Shutting down background tasks");

        for handle in self.handles {
            handle.abort();
        }

        info!("All background tasks stopped");
    }
}
