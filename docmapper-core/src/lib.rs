//! A document-mapping layer over schemaless document stores.
//!
//! This crate is the core of the docmapper project and provides:
//!
//! - **Schemas** ([`schema`]) - Typed keys, associations, scopes, callbacks and validators
//! - **Keys and types** ([`keys`], [`types`]) - Key declarations and write-time coercion
//! - **Documents** ([`document`]) - Attribute storage with dirty tracking ([`changes`])
//! - **Persistence** ([`persistence`]) - Save, destroy, reload and atomic modifiers
//! - **Querying** ([`query`], [`finder`]) - Immutable criteria and class-level finders
//! - **Associations** ([`association`]) - Referenced, in-array and embedded relations
//! - **Callbacks and validation** ([`callbacks`], [`validation`])
//! - **Store backend abstraction** ([`backend`]) - The trait storage engines implement
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docmapper::prelude::*;
//! use docmapper::memory::InMemoryStore;
//!
//! let user = Schema::builder("User")
//!     .key_with("name", KeyType::String, KeyOptions::new().required())
//!     .key_with("age", KeyType::Integer, KeyOptions::new().default_value(0))
//!     .timestamps()
//!     .build();
//!
//! let ctx = Context::new(InMemoryStore::new(), SchemaRegistry::new().with(user));
//! let ada = ctx.query("User")?.create(doc! { "name": "Ada", "age": "36" }).await?;
//! assert_eq!(ada.read("age"), Bson::Int64(36));
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_core;

pub mod association;
pub mod backend;
pub mod callbacks;
pub mod changes;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod finder;
pub mod keys;
pub mod modifier;
pub mod page;
pub mod persistence;
pub mod query;
pub mod schema;
pub mod types;
pub mod validation;
