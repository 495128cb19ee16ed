//! The explicit context every storage-facing operation runs in.

use std::{fmt, sync::Arc};

use crate::{
    backend::StoreBackend,
    config::MapperConfig,
    error::MapperResult,
    finder::DocumentQuery,
    schema::{Schema, SchemaRegistry},
};

/// A storage backend, the registered schemas and the configuration.
///
/// Cloning is cheap; every clone shares the same backend.
///
/// # Example
///
/// ```ignore
/// use docmapper::prelude::*;
/// use docmapper::memory::InMemoryStore;
///
/// let ctx = Context::new(InMemoryStore::new(), SchemaRegistry::new().with(user_schema));
/// let adults = ctx.query("User")?.filter(doc! { "age.gte": 18 }).all().await?;
/// ```
#[derive(Clone)]
pub struct Context {
    backend: Arc<dyn StoreBackend>,
    registry: Arc<SchemaRegistry>,
    config: Arc<MapperConfig>,
}

impl Context {
    pub fn new(backend: impl StoreBackend + 'static, registry: SchemaRegistry) -> Self {
        Self {
            backend: Arc::new(backend),
            registry: Arc::new(registry),
            config: Arc::new(MapperConfig::default()),
        }
    }

    pub fn with_config(mut self, config: MapperConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn backend(&self) -> &dyn StoreBackend {
        self.backend.as_ref()
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Looks up a registered schema.
    pub fn schema(&self, name: &str) -> MapperResult<Arc<Schema>> {
        self.registry.schema(name)
    }

    /// Starts a query over a registered schema.
    pub fn query(&self, name: &str) -> MapperResult<DocumentQuery> {
        Ok(self.query_schema(&self.schema(name)?))
    }

    /// Starts a query over any schema, registered or not.
    pub fn query_schema(&self, schema: &Arc<Schema>) -> DocumentQuery {
        DocumentQuery::new(self.clone(), schema.clone())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("backend", &self.backend)
            .field("schemas", &self.registry.names())
            .field("config", &self.config)
            .finish()
    }
}
