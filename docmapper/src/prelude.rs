//! Convenient re-exports of commonly used types from docmapper.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmapper::prelude::*;
//! ```
//!
//! This provides access to:
//! - Schemas, keys and key types
//! - Documents, queries and the context they run in
//! - Callbacks, validators and associations
//! - Modifiers, store backends and error types
//! - The `doc!` macro and the core BSON types

pub use docmapper_core::{
    association::{AssociationKind, AssociationOptions, Dependent},
    backend::{StoreBackend, StoreBackendBuilder},
    callbacks::{AroundCallback, AroundPhase, Callback, Continuation, Flow, Phase, continuation},
    config::MapperConfig,
    context::Context,
    document::{Document, State},
    error::{MapperError, MapperResult},
    finder::DocumentQuery,
    keys::{ID_KEY, KeyOptions},
    modifier::{ModifyOptions, Update},
    page::Page,
    query::{Criteria, Expr, FieldOp, Filter, Query, QueryVisitor, Sort, SortDirection},
    schema::{Schema, SchemaBuilder, SchemaRegistry},
    types::{CustomType, KeyType},
    validation::{ValidationContext, ValidationErrors, Validator},
};

pub use bson::{Bson, Uuid, doc};
