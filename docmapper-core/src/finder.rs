//! Class-level querying, creation and bulk operations.
//!
//! A [`DocumentQuery`] pairs a schema with a [`Criteria`] and the [`Context`] to run it
//! in. Builder methods mirror `Criteria` and never mutate the receiver; execution
//! methods compile the query (default scope, inheritance restriction, key
//! normalization) and hand it to the storage backend.
//!
//! # Example
//!
//! ```ignore
//! use docmapper::prelude::*;
//!
//! let users = ctx.query("User")?;
//! let adults = users.filter(doc! { "age.gte": 18 }).sort(["name"]);
//!
//! let first_page = adults.paginate(1, 20).await?;
//! let total = adults.count().await?;
//! users.filter(doc! { "name": "Ada" }).increment("visits", 1).await?;
//! ```

use bson::{Bson, Uuid};
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    association::Extension,
    context::Context,
    document::Document,
    error::{MapperError, MapperResult},
    keys::ID_KEY,
    modifier::{FindAndModify, ModifyOptions, Update, items_of, negate},
    page::{Page, PaginationParams},
    query::{Criteria, Expr, Filter, Projection, Query, Sort},
    schema::{Schema, TYPE_KEY},
    types::{id_from_bson, id_to_bson},
};

/// An immutable query over the documents of one schema.
#[derive(Clone)]
pub struct DocumentQuery {
    ctx: Context,
    schema: Arc<Schema>,
    criteria: Criteria,
    scoped: bool,
    creation: bson::Document,
    extensions: HashMap<String, Extension>,
}

impl DocumentQuery {
    pub fn new(ctx: Context, schema: Arc<Schema>) -> Self {
        Self {
            ctx,
            schema,
            criteria: Criteria::new(),
            scoped: true,
            creation: bson::Document::new(),
            extensions: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The caller's criteria, without the default scope.
    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    fn refine(&self, criteria: Criteria) -> Self {
        Self { criteria, ..self.clone() }
    }

    pub fn filter(&self, conditions: bson::Document) -> Self {
        self.refine(self.criteria.filter(conditions))
    }

    pub fn where_(&self, conditions: bson::Document) -> Self {
        self.filter(conditions)
    }

    pub fn filter_expr(&self, expr: Expr) -> Self {
        self.refine(self.criteria.filter_expr(expr))
    }

    pub fn sort<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Sort>,
    {
        self.refine(self.criteria.sort(fields))
    }

    pub fn order<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Sort>,
    {
        self.sort(fields)
    }

    pub fn reverse(&self) -> Self {
        self.refine(self.criteria.reverse())
    }

    pub fn limit(&self, limit: usize) -> Self {
        self.refine(self.criteria.limit(limit))
    }

    pub fn skip(&self, skip: usize) -> Self {
        self.refine(self.criteria.skip(skip))
    }

    pub fn offset(&self, offset: usize) -> Self {
        self.skip(offset)
    }

    pub fn fields<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.refine(self.criteria.fields(names))
    }

    pub fn only<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields(names)
    }

    pub fn ignore<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.refine(self.criteria.ignore(names))
    }

    pub fn merge(&self, criteria: &Criteria) -> Self {
        self.refine(self.criteria.merge(criteria))
    }

    /// Drops the schema's default scope from this query.
    pub fn unscoped(&self) -> Self {
        Self { scoped: false, ..self.clone() }
    }

    /// Applies a named scope.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::InvalidArgument`] if the schema declares no such scope.
    pub fn scope(&self, name: &str, args: &[Bson]) -> MapperResult<Self> {
        let scope = self.schema.scope(name).ok_or_else(|| {
            MapperError::InvalidArgument(format!("{} has no scope {name}", self.schema.name()))
        })?;
        Ok(self.merge(&scope.resolve(args)))
    }

    /// Applies a named extension of the association this query was built from.
    pub fn extension(&self, name: &str) -> MapperResult<Self> {
        let extend = self.extensions.get(name).cloned().ok_or_else(|| {
            MapperError::InvalidArgument(format!("no extension {name} on {} query", self.schema.name()))
        })?;
        Ok(extend(self.clone()))
    }

    pub(crate) fn with_creation(self, creation: bson::Document) -> Self {
        Self { creation, ..self }
    }

    pub(crate) fn with_extensions(self, extensions: HashMap<String, Extension>) -> Self {
        Self { extensions, ..self }
    }

    fn type_restriction(&self) -> Option<Expr> {
        if self.schema.lineage().is_empty() {
            return None;
        }

        let mut names = vec![Bson::String(self.schema.name().to_string())];
        names.extend(
            self.ctx
                .registry()
                .names()
                .into_iter()
                .filter(|name| {
                    self.ctx
                        .registry()
                        .get(name)
                        .is_some_and(|schema| schema.inherits_from(self.schema.name()))
                })
                .map(|name| Bson::String(name.to_string())),
        );

        Some(match names.len() {
            1 => Filter::eq(TYPE_KEY, names.remove(0)),
            _ => Filter::any_of(TYPE_KEY, names),
        })
    }

    /// Compiles the storage-level query: default scope, inheritance restriction and
    /// the caller's criteria, with aliases resolved and values in their stored form.
    pub fn to_query(&self) -> Query {
        let mut criteria = Criteria::new();
        if self.scoped {
            if let Some(default_scope) = self.schema.default_scope() {
                criteria = criteria.merge(default_scope);
            }
        }
        if let Some(restriction) = self.type_restriction() {
            criteria = criteria.filter_expr(restriction);
        }

        let schema = &self.schema;
        let mut query = criteria
            .merge(&self.criteria)
            .map_fields(|field, op, value| schema.coerce_condition(field, op, value))
            .to_query();

        for sort in &mut query.sort {
            sort.field = schema.canonical_field(&sort.field).to_string();
        }
        query.projection = query.projection.map(|projection| {
            let canonical = |fields: Vec<String>| -> Vec<String> {
                fields
                    .iter()
                    .map(|field| schema.canonical_field(field).to_string())
                    .collect()
            };
            match projection {
                Projection::Include(fields) => Projection::Include(canonical(fields)),
                Projection::Exclude(fields) => Projection::Exclude(canonical(fields)),
            }
        });

        query
    }

    fn collection(&self) -> MapperResult<&str> {
        self.schema.collection_name()
    }

    fn hydrate(&self, record: Bson) -> MapperResult<Document> {
        let Bson::Document(record) = record else {
            return Err(MapperError::InvalidDocument(format!(
                "{} query returned a non-document record",
                self.schema.name()
            )));
        };

        let schema = match record.get(TYPE_KEY) {
            Some(Bson::String(type_name)) if type_name != self.schema.name() => self
                .ctx
                .registry()
                .get(type_name)
                .filter(|schema| schema.inherits_from(self.schema.name()))
                .cloned()
                .unwrap_or_else(|| self.schema.clone()),
            _ => self.schema.clone(),
        };

        Document::from_record(&schema, record)
    }

    async fn fetch(&self, query: Query) -> MapperResult<Vec<Document>> {
        let collection = self.collection()?;
        let records = self
            .ctx
            .backend()
            .query_documents(query, collection)
            .await?;
        tracing::debug!(collection, returned = records.len(), "query executed");

        records
            .into_iter()
            .map(|record| self.hydrate(record))
            .collect()
    }

    pub async fn all(&self) -> MapperResult<Vec<Document>> {
        self.fetch(self.to_query()).await
    }

    /// The first match, by the query's sort or else by identity (creation order).
    pub async fn first(&self) -> MapperResult<Option<Document>> {
        let mut query = self.to_query();
        if query.sort.is_empty() {
            query.sort.push(Sort::asc(ID_KEY));
        }
        query.limit = Some(1);

        Ok(self.fetch(query).await?.into_iter().next())
    }

    /// The last match: the query's sort reversed, or else the newest by identity.
    pub async fn last(&self) -> MapperResult<Option<Document>> {
        let mut query = self.to_query();
        query.sort = match query.sort.is_empty() {
            true => vec![Sort::desc(ID_KEY)],
            false => query.sort.iter().map(Sort::reversed).collect(),
        };
        query.limit = Some(1);

        Ok(self.fetch(query).await?.into_iter().next())
    }

    /// Number of matching records. Limit and skip are ignored.
    pub async fn count(&self) -> MapperResult<usize> {
        let collection = self.collection()?;
        let count = self
            .ctx
            .backend()
            .count_documents(self.to_query().filter, collection)
            .await?;
        tracing::debug!(collection, count, "count executed");
        Ok(count)
    }

    pub async fn size(&self) -> MapperResult<usize> {
        self.count().await
    }

    pub async fn exists(&self) -> MapperResult<bool> {
        Ok(self.count().await? > 0)
    }

    pub async fn is_empty(&self) -> MapperResult<bool> {
        Ok(!self.exists().await?)
    }

    /// Streams the matching documents. The query runs when the stream is first polled.
    pub fn to_sequence(&self) -> BoxStream<'static, MapperResult<Document>> {
        let query = self.clone();
        stream::once(async move { query.all().await })
            .map_ok(|documents| stream::iter(documents.into_iter().map(Ok::<Document, MapperError>)))
            .try_flatten()
            .boxed()
    }

    /// Streams the matching documents, fetching `batch_size` records per round-trip.
    ///
    /// A limit on the query caps the total number of documents streamed.
    pub fn find_each(&self) -> BoxStream<'static, MapperResult<Document>> {
        let batch_size = self.ctx.config().batch_size.max(1);
        let start = self.criteria.skip_value().unwrap_or(0);
        let remaining = self.criteria.limit_value();
        let query = match self.criteria.sorts().is_empty() {
            true => self.sort([Sort::asc(ID_KEY)]),
            false => self.clone(),
        };

        stream::try_unfold((query, start, remaining), move |(query, offset, remaining)| async move {
            let wanted = remaining.map_or(batch_size, |remaining| remaining.min(batch_size));
            if wanted == 0 {
                return Ok(None);
            }

            let batch = query.skip(offset).limit(wanted).all().await?;
            let remaining = match batch.len() < wanted {
                true => Some(0),
                false => remaining.map(|remaining| remaining - batch.len()),
            };
            let next = offset + batch.len();
            let items = stream::iter(batch.into_iter().map(Ok::<Document, MapperError>));

            Ok::<_, MapperError>(Some((items, (query, next, remaining))))
        })
        .try_flatten()
        .boxed()
    }

    /// Fetches one page. A `per_page` of zero uses the configured default.
    pub async fn paginate(&self, page: usize, per_page: usize) -> MapperResult<Page<Document>> {
        let per_page = match per_page {
            0 => self.ctx.config().default_per_page,
            per_page => per_page,
        };
        let params = PaginationParams::new(page, per_page);

        let total_entries = self.count().await?;
        let items = self
            .skip(params.offset())
            .limit(per_page)
            .all()
            .await?;

        Ok(Page::builder(items)
            .with_total_entries(total_entries)
            .with_current_page(params.page)
            .with_per_page(per_page)
            .build())
    }

    /// Finds a document by id. Returns `None` when missing.
    pub async fn find(&self, id: Uuid) -> MapperResult<Option<Document>> {
        self.filter_expr(Filter::eq(ID_KEY, id_to_bson(id)))
            .first()
            .await
    }

    /// Finds a document that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::NotFound`] when no document matches.
    pub async fn find_strict(&self, id: Uuid) -> MapperResult<Document> {
        self.find(id).await?.ok_or_else(|| {
            MapperError::NotFound(
                id.to_string(),
                self.schema
                    .collection()
                    .unwrap_or_default()
                    .to_string(),
            )
        })
    }

    pub async fn find_many(&self, ids: &[Uuid]) -> MapperResult<Vec<Document>> {
        self.filter_expr(Filter::any_of(ID_KEY, ids.iter().copied().map(id_to_bson)))
            .all()
            .await
    }

    pub async fn find_by(&self, field: &str, value: impl Into<Bson>) -> MapperResult<Option<Document>> {
        self.filter_expr(Filter::eq(field, value))
            .first()
            .await
    }

    /// The first document matching `attributes`, or a new unsaved one holding them.
    pub async fn first_or_new(&self, attributes: bson::Document) -> MapperResult<Document> {
        match self.filter(attributes.clone()).first().await? {
            Some(document) => Ok(document),
            None => Ok(self.build(attributes)),
        }
    }

    /// The first document matching `attributes`, or a newly created one holding them.
    pub async fn first_or_create(&self, attributes: bson::Document) -> MapperResult<Document> {
        match self.filter(attributes.clone()).first().await? {
            Some(document) => Ok(document),
            None => self.create(attributes).await,
        }
    }

    /// Constructs an unsaved document. Association queries preset their foreign keys.
    pub fn build(&self, attributes: bson::Document) -> Document {
        let mut merged = self.creation.clone();
        for (key, value) in attributes {
            merged.insert(key, value);
        }
        Document::with_attributes(&self.schema, merged)
    }

    /// Builds and saves a document.
    ///
    /// A document that failed validation is returned unsaved with its errors attached.
    pub async fn create(&self, attributes: bson::Document) -> MapperResult<Document> {
        let mut document = self.build(attributes);
        document.save(&self.ctx).await?;
        Ok(document)
    }

    /// Builds and saves a document, failing with
    /// [`MapperError::PersistenceRejected`] when it is not saved.
    pub async fn create_strict(&self, attributes: bson::Document) -> MapperResult<Document> {
        let mut document = self.build(attributes);
        document.save_strict(&self.ctx).await?;
        Ok(document)
    }

    pub async fn create_many(&self, attributes: Vec<bson::Document>) -> MapperResult<Vec<Document>> {
        let mut documents = Vec::with_capacity(attributes.len());
        for attributes in attributes {
            documents.push(self.create(attributes).await?);
        }
        Ok(documents)
    }

    /// Loads a document, assigns `attributes` and saves it.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::InvalidArgument`] when `attributes` is empty and
    /// [`MapperError::NotFound`] when the document does not exist.
    pub async fn update(&self, id: Uuid, attributes: bson::Document) -> MapperResult<Document> {
        if attributes.is_empty() {
            return Err(MapperError::InvalidArgument(format!(
                "update of {} {id} needs attributes",
                self.schema.name()
            )));
        }

        let mut document = self.find_strict(id).await?;
        document
            .update_attributes(&self.ctx, attributes)
            .await?;
        Ok(document)
    }

    /// Runs [`DocumentQuery::update`] for every `(id, attributes)` pair.
    pub async fn update_many(&self, updates: Vec<(Uuid, bson::Document)>) -> MapperResult<Vec<Document>> {
        if updates.is_empty() {
            return Err(MapperError::InvalidArgument("update_many needs at least one id".to_string()));
        }

        let mut documents = Vec::with_capacity(updates.len());
        for (id, attributes) in updates {
            documents.push(self.update(id, attributes).await?);
        }
        Ok(documents)
    }

    async fn matching_ids(&self) -> MapperResult<Vec<Uuid>> {
        let mut query = self.to_query();
        query.projection = Some(Projection::Include(Vec::new()));

        let records = self
            .ctx
            .backend()
            .query_documents(query, self.collection()?)
            .await?;

        Ok(records
            .iter()
            .filter_map(|record| match record {
                Bson::Document(record) => record.get(ID_KEY).and_then(id_from_bson),
                _ => None,
            })
            .collect())
    }

    /// Removes the matching documents with these ids, without callbacks.
    pub async fn delete(&self, ids: &[Uuid]) -> MapperResult<usize> {
        self.filter_expr(Filter::any_of(ID_KEY, ids.iter().copied().map(id_to_bson)))
            .delete_all()
            .await
    }

    /// Destroys the matching documents with these ids, running callbacks and cascades.
    pub async fn destroy(&self, ids: &[Uuid]) -> MapperResult<usize> {
        self.filter_expr(Filter::any_of(ID_KEY, ids.iter().copied().map(id_to_bson)))
            .destroy_all()
            .await
    }

    /// Removes every matching document without loading it. Returns the count.
    pub async fn delete_all(&self) -> MapperResult<usize> {
        let collection = self.collection()?;
        let ids = self.matching_ids().await?;
        let count = ids.len();

        self.ctx
            .backend()
            .delete_documents(ids, collection)
            .await?;
        tracing::debug!(collection, count, "documents deleted");
        Ok(count)
    }

    /// Loads and destroys every matching document. Returns how many were destroyed.
    pub async fn destroy_all(&self) -> MapperResult<usize> {
        let mut destroyed = 0;
        for mut document in self.all().await? {
            if document.destroy(&self.ctx).await? {
                destroyed += 1;
            }
        }
        Ok(destroyed)
    }

    /// Applies an update to every matching record in storage. Returns the count.
    ///
    /// Documents are not loaded; callbacks and change tracking are bypassed.
    pub async fn modify(&self, update: Update) -> MapperResult<usize> {
        let collection = self.collection()?;
        let update = update.map(|modifier| self.schema.coerce_modifier(modifier));

        let modified = self
            .ctx
            .backend()
            .update_matching(self.to_query().filter, update, collection)
            .await?;
        tracing::debug!(collection, modified, "modifiers applied");
        Ok(modified)
    }

    pub async fn set(&self, fields: bson::Document) -> MapperResult<usize> {
        self.modify(Update::new().set_all(fields)).await
    }

    pub async fn unset(&self, fields: &[&str]) -> MapperResult<usize> {
        let update = fields
            .iter()
            .fold(Update::new(), |update, field| update.unset(*field));
        self.modify(update).await
    }

    pub async fn increment(&self, field: &str, delta: impl Into<Bson>) -> MapperResult<usize> {
        self.modify(Update::new().inc(field, delta)).await
    }

    pub async fn decrement(&self, field: &str, delta: impl Into<Bson>) -> MapperResult<usize> {
        let delta = negate(field, delta.into())?;
        self.modify(Update::new().inc(field, delta)).await
    }

    pub async fn push(&self, field: &str, value: impl Into<Bson>) -> MapperResult<usize> {
        self.modify(Update::new().push(field, value)).await
    }

    pub async fn push_all(&self, field: &str, values: Vec<Bson>) -> MapperResult<usize> {
        self.modify(Update::new().push_all(field, values)).await
    }

    pub async fn pull(&self, field: &str, value: impl Into<Bson>) -> MapperResult<usize> {
        self.modify(Update::new().pull(field, value)).await
    }

    pub async fn pull_all(&self, field: &str, values: Vec<Bson>) -> MapperResult<usize> {
        self.modify(Update::new().pull_all(field, values)).await
    }

    /// Appends the value, or each item of an array value, unless already present.
    pub async fn add_to_set(&self, field: &str, value: impl Into<Bson>) -> MapperResult<usize> {
        self.modify(Update::new().add_to_set(field, items_of(value.into())))
            .await
    }

    pub async fn pop(&self, field: &str, count: i64) -> MapperResult<usize> {
        self.modify(Update::new().pop(field, count)).await
    }

    /// Updates the first match and returns it, as one storage operation.
    ///
    /// With `upsert`, a record seeded from the query's equality conditions is created
    /// when nothing matches. With `return_new`, the updated record is returned instead
    /// of the original.
    #[tracing::instrument(skip_all, fields(schema = %self.schema.name()))]
    pub async fn find_and_modify(&self, update: Update, options: ModifyOptions) -> MapperResult<Option<Document>> {
        let collection = self.collection()?;
        let update = update.map(|modifier| self.schema.coerce_modifier(modifier));
        let request = FindAndModify::new(self.to_query(), update, options);

        let record = self
            .ctx
            .backend()
            .find_and_modify(request, collection)
            .await?;
        tracing::debug!(collection, found = record.is_some(), "find and modify executed");

        record
            .map(|record| self.hydrate(record))
            .transpose()
    }
}

impl fmt::Debug for DocumentQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentQuery")
            .field("schema", &self.schema.name())
            .field("criteria", &self.criteria)
            .field("scoped", &self.scoped)
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .finish()
    }
}
