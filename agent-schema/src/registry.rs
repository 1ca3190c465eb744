//! Schema registry keyed by schema identity.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::{Schema, SchemaError, SchemaResult};

/// Thread-safe store of loaded schemas.
#[derive(Default)]
pub struct SchemaRegistry {
    inner: RwLock<HashMap<String, Arc<dyn Schema>>>,
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("registered", &self.list_ids())
            .finish()
    }
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema, replacing any schema with the same identity.
    ///
    /// Returns the identity the schema was stored under.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn register(&self, schema: Arc<dyn Schema>) -> String {
        let id = schema.id().to_owned();
        let mut guard = self.inner.write().expect("schema registry poisoned");
        if guard.insert(id.clone(), schema).is_some() {
            debug!(schema_id = %id, "replaced registered schema");
        } else {
            debug!(schema_id = %id, "registered schema");
        }
        id
    }

    /// Returns the schema registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::SchemaNotFound`] when the identity is unknown.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn get(&self, id: &str) -> SchemaResult<Arc<dyn Schema>> {
        let guard = self.inner.read().expect("schema registry poisoned");
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| SchemaError::SchemaNotFound { id: id.into() })
    }

    /// Returns every registered identity in lexicographic order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn list_ids(&self) -> Vec<String> {
        let guard = self.inner.read().expect("schema registry poisoned");
        let mut ids: Vec<_> = guard.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the registered schemas announcing `mime_type`, ordered by identity.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn by_mime_type(&self, mime_type: &str) -> Vec<Arc<dyn Schema>> {
        let guard = self.inner.read().expect("schema registry poisoned");
        let mut schemas: Vec<_> = guard
            .values()
            .filter(|schema| schema.mime_type() == mime_type)
            .cloned()
            .collect();
        schemas.sort_by(|a, b| a.id().cmp(b.id()));
        schemas
    }

    /// Removes the schema registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::SchemaNotFound`] when the identity is unknown.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn unregister(&self, id: &str) -> SchemaResult<()> {
        let mut guard = self.inner.write().expect("schema registry poisoned");
        guard
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SchemaError::SchemaNotFound { id: id.into() })
    }

    /// Returns `true` when a schema is registered under `id`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.inner
            .read()
            .expect("schema registry poisoned")
            .contains_key(id)
    }

    /// Returns the number of registered schemas.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("schema registry poisoned").len()
    }

    /// Returns `true` when no schema is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
