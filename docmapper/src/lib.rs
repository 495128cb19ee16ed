//! Main docmapper crate: a document-mapping layer over schemaless document stores.
//!
//! This crate is the primary entry point for users of docmapper. It re-exports the
//! core types from `docmapper-core` and provides access to the bundled storage
//! backend.
//!
//! # Features
//!
//! - **Typed keys** - Declared keys coerce every write; undeclared keys stay dynamic
//! - **Dirty tracking** - Per-key originals, previous changes and in-place change marks
//! - **Immutable queries** - Composable criteria, named scopes and a default scope
//! - **Associations** - `belongs_to`, `many`, `many_in` and embedded documents
//! - **Callbacks and validation** - Before, after and around hooks with halting
//! - **Atomic modifiers** - `increment`, `push`, `add_to_set` and find-and-modify
//!
//! # Quick Start
//!
//! ```ignore
//! use docmapper::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> MapperResult<()> {
//!     let post = Schema::builder("Post")
//!         .key_with("title", KeyType::String, KeyOptions::new().required())
//!         .key_with("tags", KeyType::Array, KeyOptions::new().default_value(Bson::Array(vec![])))
//!         .key_with("votes", KeyType::Integer, KeyOptions::new().default_value(0))
//!         .scope("popular", Criteria::new().filter(doc! { "votes.gte": 10 }))
//!         .timestamps()
//!         .build();
//!
//!     let ctx = Context::new(InMemoryStore::new(), SchemaRegistry::new().with(post));
//!     let posts = ctx.query("Post")?;
//!
//!     let mut hello = posts.create(doc! { "title": "Hello" }).await?;
//!     hello.write("title", "Hello, world");
//!     assert_eq!(hello.changed(), vec!["title".to_string()]);
//!     hello.save(&ctx).await?;
//!
//!     hello.increment(&ctx, "votes", 10).await?;
//!     assert_eq!(posts.scope("popular", &[])?.count().await?, 1);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//!
//! Other engines plug in by implementing [`backend::StoreBackend`].

pub mod prelude;

pub use docmapper_core::{
    association, backend, callbacks, changes, config, context, document, error, finder, keys,
    modifier, page, query, schema, types, validation,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmapper_memory::{InMemoryStore, InMemoryStoreBuilder};
}
