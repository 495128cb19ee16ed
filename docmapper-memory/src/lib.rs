//! In-memory storage backend for docmapper.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses an async-aware read-write lock for concurrent access and is ideal for
//! development and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Type-erased storage** - Stores records as BSON for flexibility
//! - **Full query support** - Filtering, multi-key sorting, pagination and projection
//! - **Atomic modifiers** - Updates and find-and-modify run under a single write lock
//!
//! # Quick Start
//!
//! ```ignore
//! use docmapper::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let user = Schema::builder("User").key("name", KeyType::String).build();
//!     let ctx = Context::new(InMemoryStore::new(), SchemaRegistry::new().with(user));
//!
//!     ctx.query("User")?.create(doc! { "name": "Alice" }).await?;
//!     assert_eq!(ctx.query("User")?.count().await?, 1);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_memory;

pub mod store;
pub mod evaluator;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
