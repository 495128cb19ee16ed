//! Storage backend abstraction.
//!
//! The mapping layer never talks to a database directly. Everything it needs from
//! storage goes through the [`StoreBackend`] trait: full-record writes, id lookups,
//! structured queries, counts and atomic modifier execution. Records travel as
//! [`Bson`] documents keyed by their identity.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docmapper::backend::StoreBackend;
//! use bson::{Uuid, Bson, doc};
//!
//! let backend = MyBackendImpl::new();
//!
//! let uuid = Uuid::new();
//! let doc = Bson::Document(doc! { "name": "Alice", "age": 30 });
//! backend.insert_documents(vec![(uuid, doc)], "users").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Uuid};
use std::fmt::Debug;

use crate::{
    error::MapperResult,
    modifier::{FindAndModify, Update},
    query::{Expr, Query},
};

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. The mapping layer adds no locking of its own: atomic modifiers and
/// [`find_and_modify`](StoreBackend::find_and_modify) rely on the backend applying each
/// call to a single record indivisibly.
///
/// # Error Handling
///
/// Operations return [`MapperResult<T>`](crate::error::MapperResult). Implementers should
/// document which error variants may be returned by each operation.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts new records into a collection.
    ///
    /// # Arguments
    ///
    /// * `documents` - A vector of (UUID, BSON document) pairs to insert
    /// * `collection` - The name of the collection to insert into. Created automatically if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::DocumentAlreadyExists`](crate::error::MapperError::DocumentAlreadyExists)
    /// if a record with the same id is already stored.
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> MapperResult<()>;

    /// Replaces existing records entirely.
    ///
    /// # Arguments
    ///
    /// * `documents` - A vector of (UUID, BSON document) pairs with updated content
    /// * `collection` - The name of the collection containing the records
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::NotFound`](crate::error::MapperError::NotFound) if a record
    /// does not exist.
    async fn update_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> MapperResult<()>;

    /// Deletes records by id.
    ///
    /// Missing ids are silently skipped (idempotent operation).
    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> MapperResult<()>;

    /// Retrieves records by id.
    ///
    /// Missing ids are simply omitted from the results. Order is not guaranteed to match
    /// the request order.
    async fn get_documents(
        &self,
        ids: Vec<Uuid>,
        collection: &str,
    ) -> MapperResult<Vec<Bson>>;

    /// Queries records using a structured query.
    ///
    /// The backend applies the filter, then the sort chain (left to right, as a stable
    /// tie-break chain), then skip and limit, then the projection.
    ///
    /// # Arguments
    ///
    /// * `query` - The [`Query`] object specifying filters, sorts, limits, offsets and projection
    /// * `collection` - The name of the collection to query
    async fn query_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> MapperResult<Vec<Bson>>;

    /// Counts the records matching a filter (all records when `filter` is `None`).
    async fn count_documents(
        &self,
        filter: Option<Expr>,
        collection: &str,
    ) -> MapperResult<usize>;

    /// Applies an [`Update`] to every record matching a filter without replacing them.
    ///
    /// Each record is updated atomically; the call as a whole is not a transaction.
    ///
    /// # Returns
    ///
    /// The number of modified records.
    async fn update_matching(
        &self,
        filter: Option<Expr>,
        update: Update,
        collection: &str,
    ) -> MapperResult<usize>;

    /// Finds the first record matching the request's query, applies its update and
    /// returns the record as it was before or after the update, as one indivisible
    /// operation.
    ///
    /// When nothing matches and `upsert` is set, a record is created from the query's
    /// equality predicates, updated, and given a fresh identity.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when nothing matched and no record was created, or when an upsert
    /// created a record and the pre-update state was requested.
    async fn find_and_modify(
        &self,
        request: FindAndModify,
        collection: &str,
    ) -> MapperResult<Option<Bson>>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with persistent storage or
    /// external connections should override this.
    async fn shutdown(self) -> MapperResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> MapperResult<()> {
        (*self)
            .insert_documents(documents, collection)
            .await
    }

    async fn update_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> MapperResult<()> {
        (*self)
            .update_documents(documents, collection)
            .await
    }

    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> MapperResult<()> {
        (*self)
            .delete_documents(ids, collection)
            .await
    }

    async fn get_documents(
        &self,
        ids: Vec<Uuid>,
        collection: &str,
    ) -> MapperResult<Vec<Bson>> {
        (*self)
            .get_documents(ids, collection)
            .await
    }

    async fn query_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> MapperResult<Vec<Bson>> {
        (*self)
            .query_documents(query, collection)
            .await
    }

    async fn count_documents(
        &self,
        filter: Option<Expr>,
        collection: &str,
    ) -> MapperResult<usize> {
        (*self)
            .count_documents(filter, collection)
            .await
    }

    async fn update_matching(
        &self,
        filter: Option<Expr>,
        update: Update,
        collection: &str,
    ) -> MapperResult<usize> {
        (*self)
            .update_matching(filter, update, collection)
            .await
    }

    async fn find_and_modify(
        &self,
        request: FindAndModify,
        collection: &str,
    ) -> MapperResult<Option<Bson>> {
        (*self)
            .find_and_modify(request, collection)
            .await
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> MapperResult<Self::Backend>;
}
