//! In-memory storage implementation for document stores.
//!
//! This module provides a simple in-memory backend that stores records as BSON
//! values in HashMaps guarded by an async-aware read-write lock.

use std::{collections::HashMap, sync::Arc};
use async_trait::async_trait;
use mea::rwlock::RwLock;
use bson::{Uuid, Bson};

use docmapper_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    error::{MapperError, MapperResult},
    keys::ID_KEY,
    modifier::FindAndModify,
    modifier::Update,
    query::{Expr, Query, Sort},
    types::{id_from_bson, id_to_bson, new_id},
};

use crate::evaluator::{DocumentEvaluator, compare_records};

type CollectionMap = HashMap<String, Bson>;
type StoreMap = HashMap<String, CollectionMap>;


/// Thread-safe in-memory document storage backend.
///
/// All records are stored as BSON documents indexed by their UUID. Every call takes
/// the lock once, so each write (including [`find_and_modify`](StoreBackend::find_and_modify))
/// is atomic with respect to every other call.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries scan all records in a collection (no indexing).
///
/// # Example
///
/// ```ignore
/// use docmapper_memory::InMemoryStore;
/// use docmapper::backend::StoreBackend;
/// use bson::{Uuid, Bson, doc};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///
///     let id = Uuid::new();
///     let doc = Bson::Document(doc! { "_id": id, "name": "Alice", "age": 30 });
///     store.insert_documents(vec![(id, doc)], "users").await?;
///
///     let docs = store.get_documents(vec![id], "users").await?;
///     assert_eq!(docs.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// The main storage map: collection_name -> (document_id -> document)
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    ///
    /// ```ignore
    /// use docmapper_memory::InMemoryStore;
    ///
    /// let store = InMemoryStore::builder().build().await.unwrap();
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }
}

/// Keys of the records matching `filter`, ordered by `sort` (identity order when
/// `sort` is empty).
fn select<'a>(
    collection_map: &'a CollectionMap,
    filter: Option<&Expr>,
    sort: &[Sort],
) -> MapperResult<Vec<(&'a String, &'a bson::Document)>> {
    let mut matched = Vec::new();

    for (key, doc) in collection_map {
        let Some(record) = doc.as_document() else {
            return Err(MapperError::InvalidDocument(format!("record {key} is not a document")));
        };

        let keep = match filter {
            Some(filter) => DocumentEvaluator::new(doc).evaluate(filter)?,
            None => true,
        };
        if keep {
            matched.push((key, record));
        }
    }

    let identity_order = [Sort::asc(ID_KEY)];
    let sort = match sort.is_empty() {
        true => &identity_order[..],
        false => sort,
    };
    matched.sort_by(|(_, left), (_, right)| compare_records(left, right, sort));

    Ok(matched)
}

fn apply_update(record: &bson::Document, update: &Update) -> MapperResult<bson::Document> {
    let mut updated = record.clone();
    update.apply(&mut updated)?;
    Ok(updated)
}


#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_documents(&self, documents: Vec<(Uuid, Bson)>, collection: &str) -> MapperResult<()> {
        let mut store = self.store.write().await;
        let collection_map = store
            .entry(collection.to_string())
            .or_default();

        for (id, doc) in documents {
            let key = id.to_string();

            if collection_map.contains_key(&key) {
                return Err(MapperError::DocumentAlreadyExists(key, collection.to_string()));
            }

            collection_map.insert(key, doc);
        }

        Ok(())
    }

    async fn update_documents(&self, documents: Vec<(Uuid, Bson)>, collection: &str) -> MapperResult<()> {
        let mut store = self.store.write().await;
        let collection_map = store
            .entry(collection.to_string())
            .or_default();

        for (id, doc) in documents {
            let key = id.to_string();

            if !collection_map.contains_key(&key) {
                return Err(MapperError::NotFound(key, collection.to_string()));
            }

            collection_map.insert(key, doc);
        }

        Ok(())
    }

    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> MapperResult<()> {
        let mut store = self.store.write().await;

        if let Some(collection_map) = store.get_mut(collection) {
            for id in ids {
                collection_map.remove(&id.to_string());
            }
        }

        Ok(())
    }

    async fn get_documents(&self, ids: Vec<Uuid>, collection: &str) -> MapperResult<Vec<Bson>> {
        let store = self.store.read().await;
        let collection_map = match store.get(collection) {
            Some(col) => col,
            None => return Ok(vec![]),
        };

        Ok(
            ids.into_iter()
                .filter_map(|id| collection_map.get(&id.to_string()).cloned())
                .collect()
        )
    }

    async fn query_documents(&self, query: Query, collection: &str) -> MapperResult<Vec<Bson>> {
        let store = self.store.read().await;
        let collection_map = match store.get(collection) {
            Some(col) => col,
            None => return Ok(vec![]),
        };

        let matched = select(collection_map, query.filter.as_ref(), &query.sort)?;

        Ok(
            matched
                .into_iter()
                .skip(query.offset.unwrap_or(0))
                .take(query.limit.unwrap_or(usize::MAX))
                .map(|(_, record)| match &query.projection {
                    Some(projection) => Bson::Document(projection.apply(record.clone())),
                    None => Bson::Document(record.clone()),
                })
                .collect()
        )
    }

    async fn count_documents(&self, filter: Option<Expr>, collection: &str) -> MapperResult<usize> {
        let store = self.store.read().await;
        let collection_map = match store.get(collection) {
            Some(col) => col,
            None => return Ok(0),
        };

        let mut count = 0;
        for doc in collection_map.values() {
            let matched = match &filter {
                Some(filter) => DocumentEvaluator::new(doc).evaluate(filter)?,
                None => true,
            };
            if matched {
                count += 1;
            }
        }

        Ok(count)
    }

    async fn update_matching(&self, filter: Option<Expr>, update: Update, collection: &str) -> MapperResult<usize> {
        let mut store = self.store.write().await;
        let Some(collection_map) = store.get_mut(collection) else {
            return Ok(0);
        };

        let updated = select(collection_map, filter.as_ref(), &[])?
            .into_iter()
            .map(|(key, record)| Ok((key.clone(), apply_update(record, &update)?)))
            .collect::<MapperResult<Vec<_>>>()?;

        let count = updated.len();
        for (key, record) in updated {
            collection_map.insert(key, Bson::Document(record));
        }
        tracing::trace!(collection, count, "in-memory update applied");

        Ok(count)
    }

    async fn find_and_modify(&self, request: FindAndModify, collection: &str) -> MapperResult<Option<Bson>> {
        let FindAndModify { query, update, options } = request;

        let mut store = self.store.write().await;
        let collection_map = store
            .entry(collection.to_string())
            .or_default();

        let found = select(collection_map, query.filter.as_ref(), &query.sort)?
            .into_iter()
            .nth(query.offset.unwrap_or(0))
            .map(|(key, record)| (key.clone(), record.clone()));

        let project = |record: bson::Document| match &query.projection {
            Some(projection) => Bson::Document(projection.apply(record)),
            None => Bson::Document(record),
        };

        match found {
            Some((key, original)) => {
                let updated = apply_update(&original, &update)?;
                collection_map.insert(key, Bson::Document(updated.clone()));

                Ok(Some(project(if options.return_new { updated } else { original })))
            }
            None if options.upsert => {
                let mut seed = bson::Document::new();
                for (field, value) in query.filter.iter().flat_map(Expr::equalities) {
                    seed.insert(field, value.clone());
                }

                let mut record = apply_update(&seed, &update)?;
                let id = match record.get(ID_KEY).and_then(id_from_bson) {
                    Some(id) => id,
                    None => {
                        let id = new_id();
                        record.insert(ID_KEY, id_to_bson(id));
                        id
                    }
                };

                let key = id.to_string();
                if collection_map.contains_key(&key) {
                    return Err(MapperError::DocumentAlreadyExists(key, collection.to_string()));
                }
                collection_map.insert(key, Bson::Document(record.clone()));
                tracing::trace!(collection, %id, "in-memory upsert created record");

                Ok(options.return_new.then(|| project(record)))
            }
            None => Ok(None),
        }
    }
}


/// Builder for constructing [`InMemoryStore`] instances.
///
/// Currently a no-op builder, but can be extended in future versions
/// to support configuration options like capacity hints.
///
/// # Example
///
/// ```ignore
/// use docmapper_memory::InMemoryStore;
/// use docmapper::backend::StoreBackendBuilder;
///
/// #[tokio::main]
/// async fn main() {
///     let store = InMemoryStore::builder().build().await.unwrap();
/// }
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    ///
    /// This always succeeds and returns a freshly initialized store.
    async fn build(self) -> MapperResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}
