// src/registry/mod.rs

//! Process-local registry of non-serialisable values.
//!
//! Pipeline state crosses the job queue as JSON, so live resources (engine
//! handles, agent bundles, run-scoped history services) are parked here and
//! referenced by opaque string ids carried inside the state. Ids resolve only
//! within the worker process that stored them.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Object category, each with its own lifetime policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Long-lived, invalidated on connection mutation.
    Engine,
    /// Long-lived per agent version, rebuilt on agent config change.
    AgentBundle,
    /// Scoped to one run; removed in a guaranteed-release step.
    HistoryService,
    /// Long-lived cache managers.
    Cache,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Engine => "engine",
            Category::AgentBundle => "agent_bundle",
            Category::HistoryService => "history_service",
            Category::Cache => "cache",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("object not found: {category}/{id}")]
    NotFound { category: Category, id: String },
    #[error("object {category}/{id} has a different type than requested")]
    TypeMismatch { category: Category, id: String },
}

type Slot = Arc<dyn Any + Send + Sync>;

/// Keyed store of live objects, shared across a worker process.
#[derive(Default)]
pub struct ObjectRegistry {
    inner: RwLock<HashMap<(Category, String), Slot>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value and return its generated id.
    pub fn put<T: Any + Send + Sync>(&self, category: Category, value: T) -> String {
        let id = Uuid::new_v4().to_string();
        self.inner
            .write()
            .insert((category, id.clone()), Arc::new(value));
        id
    }

    /// Resolve an id to a typed handle.
    pub fn get<T: Any + Send + Sync>(
        &self,
        category: Category,
        id: &str,
    ) -> Result<Arc<T>, RegistryError> {
        let slot = self
            .inner
            .read()
            .get(&(category, id.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                category,
                id: id.to_string(),
            })?;

        slot.downcast::<T>().map_err(|_| RegistryError::TypeMismatch {
            category,
            id: id.to_string(),
        })
    }

    /// Remove an object. Returns whether it existed.
    pub fn remove(&self, category: Category, id: &str) -> bool {
        self.inner
            .write()
            .remove(&(category, id.to_string()))
            .is_some()
    }

    /// Number of live objects in a category.
    pub fn count(&self, category: Category) -> usize {
        self.inner
            .read()
            .keys()
            .filter(|(c, _)| *c == category)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let reg = ObjectRegistry::new();
        let id = reg.put(Category::Engine, String::from("handle"));

        let value = reg.get::<String>(Category::Engine, &id).unwrap();
        assert_eq!(*value, "handle");
    }

    #[test]
    fn removed_object_is_not_found() {
        let reg = ObjectRegistry::new();
        let id = reg.put(Category::HistoryService, 42u64);

        assert!(reg.remove(Category::HistoryService, &id));
        let err = reg.get::<u64>(Category::HistoryService, &id).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[test]
    fn categories_are_isolated() {
        let reg = ObjectRegistry::new();
        let id = reg.put(Category::Engine, 1u8);

        assert!(reg.get::<u8>(Category::AgentBundle, &id).is_err());
        assert_eq!(reg.count(Category::Engine), 1);
        assert_eq!(reg.count(Category::AgentBundle), 0);
    }

    #[test]
    fn wrong_type_is_reported() {
        let reg = ObjectRegistry::new();
        let id = reg.put(Category::Cache, 7i64);

        let err = reg.get::<String>(Category::Cache, &id).unwrap_err();
        assert!(matches!(err, RegistryError::TypeMismatch { .. }));
    }
}
