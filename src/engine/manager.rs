// src/engine/manager.rs
// Engine handle lifecycle: open once per (connection id, version), park in
// the object registry, discard on connection mutation.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::{open, ConnectionPayload};
use crate::connections::Connection;
use crate::error::CoreError;
use crate::registry::{Category, ObjectRegistry};

pub struct EngineManager {
    datasets_dir: PathBuf,
    registry: Arc<ObjectRegistry>,
    live: RwLock<HashMap<String, (i64, String)>>,
}

impl EngineManager {
    pub fn new(datasets_dir: impl Into<PathBuf>, registry: Arc<ObjectRegistry>) -> Self {
        Self {
            datasets_dir: datasets_dir.into(),
            registry,
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a connection to a registry ref, opening the engine on first use
    /// in this process. A version bump on the connection discards the old
    /// handle and dials a fresh one.
    pub async fn resolve(&self, connection: &Connection) -> Result<String, CoreError> {
        if let Some((version, engine_ref)) = self.live.read().get(&connection.id) {
            if *version == connection.version {
                return Ok(engine_ref.clone());
            }
        }

        let payload = ConnectionPayload::parse(connection.kind, &connection.payload)?;
        let handle = open(&payload, &self.datasets_dir).await?;
        info!(
            "Opened {} engine for connection {}",
            handle.dialect(),
            connection.id
        );

        let engine_ref = self.registry.put(Category::Engine, handle);
        let previous = self
            .live
            .write()
            .insert(connection.id.clone(), (connection.version, engine_ref.clone()));
        if let Some((_, old_ref)) = previous {
            self.registry.remove(Category::Engine, &old_ref);
        }

        Ok(engine_ref)
    }

    /// Drop any pooled handle for a connection (called on mutation/delete).
    pub fn invalidate(&self, connection_id: &str) {
        if let Some((_, old_ref)) = self.live.write().remove(connection_id) {
            self.registry.remove(Category::Engine, &old_ref);
            info!("Invalidated engine for connection {}", connection_id);
        }
    }
}
