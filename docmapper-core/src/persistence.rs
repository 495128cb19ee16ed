//! Instance-level persistence: save, destroy, reload and atomic modifiers.

use bson::Bson;
use futures::{FutureExt, future::BoxFuture};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::Instrument;

use crate::{
    association::{AssociationKind, Dependent},
    callbacks::{AroundPhase, Flow, Phase, continuation},
    context::Context,
    document::{Document, State},
    error::{MapperError, MapperResult},
    keys::ID_KEY,
    modifier::{Update, items_of, negate},
    query::Filter,
    schema::{CREATED_AT, UPDATED_AT},
    types::id_to_bson,
};

impl Document {
    /// Validates and writes the document.
    ///
    /// Returns `Ok(false)` when validation fails or a before-callback halts; the
    /// validation messages are then available through [`Document::errors`]. A new
    /// document is inserted, a persisted one replaced.
    #[tracing::instrument(skip_all, fields(schema = %self.schema.name(), id = %self.id))]
    pub async fn save(&mut self, ctx: &Context) -> MapperResult<bool> {
        self.save_with(ctx, true).await
    }

    /// Saves with validation turned on or off.
    pub async fn save_with(&mut self, ctx: &Context, validate: bool) -> MapperResult<bool> {
        if self.is_destroyed() {
            tracing::warn!("refusing to save a destroyed document");
            return Ok(false);
        }
        self.schema.collection_name()?;

        if validate && !self.is_valid() {
            tracing::debug!(errors = %self.errors, "validation failed");
            return Ok(false);
        }

        let schema = self.schema.clone();
        if schema
            .callbacks()
            .run(Phase::BeforeSave, self)
            .is_halt()
        {
            return Ok(false);
        }

        let (before, after, around) = match self.is_new() {
            true => (Phase::BeforeCreate, Phase::AfterCreate, AroundPhase::Create),
            false => (Phase::BeforeUpdate, Phase::AfterUpdate, AroundPhase::Update),
        };
        let written = Arc::new(AtomicBool::new(false));

        let write = {
            let ctx = ctx.clone();
            let written = written.clone();
            continuation(move |document| {
                async move {
                    document.write_record(&ctx).await?;
                    written.store(true, Ordering::SeqCst);
                    Ok::<_, MapperError>(Flow::Continue)
                }
                .boxed()
            })
        };

        let phase = {
            let schema = schema.clone();
            continuation(move |document| {
                async move {
                    if schema
                        .callbacks()
                        .run(before, document)
                        .is_halt()
                    {
                        return Ok(Flow::Halt);
                    }

                    let flow = schema.callbacks().wrap(around, write)(&mut *document).await?;
                    if flow.is_halt() {
                        return Ok(Flow::Halt);
                    }

                    schema.callbacks().run(after, document);
                    Ok::<_, MapperError>(Flow::Continue)
                }
                .boxed()
            })
        };

        let flow = schema
            .callbacks()
            .wrap(AroundPhase::Save, phase)(&mut *self)
            .await?;
        if flow.is_halt() {
            return Ok(false);
        }
        if !written.load(Ordering::SeqCst) {
            tracing::warn!("around callback did not proceed, nothing was written");
        }

        schema.callbacks().run(Phase::AfterSave, self);
        Ok(true)
    }

    async fn write_record(&mut self, ctx: &Context) -> MapperResult<()> {
        let schema = self.schema.clone();
        let collection = schema.collection_name()?;

        if schema.has_timestamps() {
            let now = Bson::DateTime(bson::DateTime::now());
            if self.is_new() && self.read(CREATED_AT) == Bson::Null {
                self.write(CREATED_AT, now.clone());
            }
            self.write(UPDATED_AT, now);
        }

        let record = Bson::Document(self.to_record());
        let snapshot = self.changes();

        match self.state {
            State::New => {
                ctx.backend()
                    .insert_documents(vec![(self.id, record)], collection)
                    .await?
            }
            _ => {
                ctx.backend()
                    .update_documents(vec![(self.id, record)], collection)
                    .await?
            }
        }
        tracing::debug!(collection, changed = snapshot.len(), "record written");

        self.changes.commit(snapshot);
        self.mark_persisted();
        Ok(())
    }

    /// Saves, failing with [`MapperError::PersistenceRejected`] when the document
    /// is not saved.
    pub async fn save_strict(&mut self, ctx: &Context) -> MapperResult<()> {
        match self.save(ctx).await? {
            true => Ok(()),
            false => Err(MapperError::PersistenceRejected(
                self.schema.name().to_string(),
                self.errors.clone(),
            )),
        }
    }

    /// Assigns `attributes` and saves.
    pub async fn update_attributes(&mut self, ctx: &Context, attributes: bson::Document) -> MapperResult<bool> {
        self.assign(attributes);
        self.save(ctx).await
    }

    pub async fn update_attributes_strict(&mut self, ctx: &Context, attributes: bson::Document) -> MapperResult<()> {
        self.assign(attributes);
        self.save_strict(ctx).await
    }

    /// Writes one attribute and saves without validation.
    pub async fn update_attribute(&mut self, ctx: &Context, key: &str, value: impl Into<Bson>) -> MapperResult<bool> {
        self.write(key, value);
        self.save_with(ctx, false).await
    }

    /// Replaces the attributes with the stored record and clears the change set.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::NotFound`] when the record no longer exists.
    pub async fn reload(&mut self, ctx: &Context) -> MapperResult<()> {
        let schema = self.schema.clone();
        let collection = schema.collection_name()?;

        let record = ctx
            .backend()
            .get_documents(vec![self.id], collection)
            .await?
            .into_iter()
            .next();
        let Some(Bson::Document(record)) = record else {
            return Err(MapperError::NotFound(self.id.to_string(), collection.to_string()));
        };

        self.attributes.clear();
        self.embedded.clear();
        self.initializing = true;
        let loaded = self.load(record);
        self.apply_defaults();
        self.initializing = false;
        loaded?;

        self.changes.clear();
        self.errors.clear();
        self.state = State::Persisted;
        Ok(())
    }

    /// Runs the destroy callbacks, destroys dependents and removes the record.
    ///
    /// Returns `Ok(false)` when a before-callback halts. A dependent that cannot be
    /// destroyed fails the call with [`MapperError::CascadeFailure`] and the owner is
    /// kept.
    pub fn destroy<'a>(&'a mut self, ctx: &'a Context) -> BoxFuture<'a, MapperResult<bool>> {
        let span = tracing::debug_span!("destroy", schema = %self.schema.name(), id = %self.id);

        async move {
            if self.is_destroyed() {
                tracing::warn!("document already destroyed");
                return Ok(false);
            }

            let schema = self.schema.clone();
            schema.collection_name()?;

            if schema
                .callbacks()
                .run(Phase::BeforeDestroy, self)
                .is_halt()
            {
                return Ok(false);
            }

            let inner = {
                let ctx = ctx.clone();
                continuation(move |document| {
                    async move {
                        document.destroy_dependents(&ctx).await?;
                        document.remove_record(&ctx).await?;
                        Ok::<_, MapperError>(Flow::Continue)
                    }
                    .boxed()
                })
            };

            let flow = schema
                .callbacks()
                .wrap(AroundPhase::Destroy, inner)(&mut *self)
                .await?;
            if flow.is_halt() {
                return Ok(false);
            }
            if !self.is_destroyed() {
                tracing::warn!("around callback did not proceed, nothing was destroyed");
            }

            schema
                .callbacks()
                .run(Phase::AfterDestroy, self);
            Ok::<_, MapperError>(true)
        }
        .instrument(span)
        .boxed()
    }

    async fn destroy_dependents(&self, ctx: &Context) -> MapperResult<()> {
        let dependents = self.schema.associations().iter().filter(|association| {
            association.dependent() == Dependent::Destroy
                && matches!(association.kind(), AssociationKind::Many | AssociationKind::InArray)
        });

        for association in dependents {
            let children = self.owned_by(ctx, association)?.unscoped().all().await?;

            for mut child in children {
                let cascade_failure = |reason: String| {
                    MapperError::CascadeFailure(format!("{} {}", self.schema.name(), self.id), reason)
                };

                match child.destroy(ctx).await {
                    Ok(true) => {}
                    Ok(false) => {
                        return Err(cascade_failure(format!(
                            "{} {} refused to be destroyed",
                            child.schema().name(),
                            child.id()
                        )));
                    }
                    Err(err) => return Err(cascade_failure(err.to_string())),
                }
            }
        }

        Ok(())
    }

    async fn remove_record(&mut self, ctx: &Context) -> MapperResult<()> {
        if self.is_persisted() {
            let collection = self.schema.collection_name()?;
            ctx.backend()
                .delete_documents(vec![self.id], collection)
                .await?;
            tracing::debug!(collection, "record removed");
        }

        self.state = State::Destroyed;
        Ok(())
    }

    /// Removes the record without callbacks or dependent handling.
    pub async fn delete(&mut self, ctx: &Context) -> MapperResult<()> {
        if self.is_destroyed() {
            tracing::warn!(schema = self.schema.name(), id = %self.id, "document already destroyed");
            return Ok(());
        }

        self.remove_record(ctx).await
    }

    /// Sets `updated_at` to now in storage and in memory, without a full save.
    ///
    /// Returns `false` for documents that were never persisted or whose
    /// `before_touch` callbacks halt.
    pub async fn touch(&mut self, ctx: &Context) -> MapperResult<bool> {
        if !self.is_persisted() {
            return Ok(false);
        }

        let schema = self.schema.clone();
        let collection = schema.collection_name()?;
        if schema
            .callbacks()
            .run(Phase::BeforeTouch, self)
            .is_halt()
        {
            return Ok(false);
        }

        let now = Bson::DateTime(bson::DateTime::now());
        ctx.backend()
            .update_matching(
                Some(Filter::eq(ID_KEY, id_to_bson(self.id))),
                Update::new().set(UPDATED_AT, now.clone()),
                collection,
            )
            .await?;
        self.write_untracked(UPDATED_AT, now);

        schema.callbacks().run(Phase::AfterTouch, self);
        Ok(true)
    }

    /// Applies an update to this document's record in storage and mirrors the
    /// result in memory.
    ///
    /// No callbacks run and the mirrored values are not recorded as changes.
    pub async fn modify(&mut self, ctx: &Context, update: Update) -> MapperResult<()> {
        if self.is_destroyed() {
            tracing::warn!(schema = self.schema.name(), id = %self.id, "ignoring modifier on a destroyed document");
            return Ok(());
        }

        let schema = self.schema.clone();
        let collection = schema.collection_name()?;
        let update = update.map(|modifier| schema.coerce_modifier(modifier));

        ctx.backend()
            .update_matching(
                Some(Filter::eq(ID_KEY, id_to_bson(self.id))),
                update.clone(),
                collection,
            )
            .await?;

        let mut record = self.to_record();
        update.apply(&mut record)?;
        for modifier in update.modifiers() {
            let field = modifier.field();
            match record.get(field) {
                Some(value) => self.write_untracked(field, value.clone()),
                None => {
                    self.attributes.remove(field);
                }
            }
        }

        Ok(())
    }

    pub async fn set(&mut self, ctx: &Context, fields: bson::Document) -> MapperResult<()> {
        self.modify(ctx, Update::new().set_all(fields)).await
    }

    pub async fn unset(&mut self, ctx: &Context, fields: &[&str]) -> MapperResult<()> {
        let update = fields
            .iter()
            .fold(Update::new(), |update, field| update.unset(*field));
        self.modify(ctx, update).await
    }

    pub async fn increment(&mut self, ctx: &Context, field: &str, delta: impl Into<Bson>) -> MapperResult<()> {
        self.modify(ctx, Update::new().inc(field, delta)).await
    }

    pub async fn decrement(&mut self, ctx: &Context, field: &str, delta: impl Into<Bson>) -> MapperResult<()> {
        let delta = negate(field, delta.into())?;
        self.modify(ctx, Update::new().inc(field, delta)).await
    }

    pub async fn push(&mut self, ctx: &Context, field: &str, value: impl Into<Bson>) -> MapperResult<()> {
        self.modify(ctx, Update::new().push(field, value)).await
    }

    pub async fn push_all(&mut self, ctx: &Context, field: &str, values: Vec<Bson>) -> MapperResult<()> {
        self.modify(ctx, Update::new().push_all(field, values)).await
    }

    pub async fn pull(&mut self, ctx: &Context, field: &str, value: impl Into<Bson>) -> MapperResult<()> {
        self.modify(ctx, Update::new().pull(field, value)).await
    }

    pub async fn pull_all(&mut self, ctx: &Context, field: &str, values: Vec<Bson>) -> MapperResult<()> {
        self.modify(ctx, Update::new().pull_all(field, values)).await
    }

    pub async fn add_to_set(&mut self, ctx: &Context, field: &str, value: impl Into<Bson>) -> MapperResult<()> {
        self.modify(ctx, Update::new().add_to_set(field, items_of(value.into())))
            .await
    }

    pub async fn pop(&mut self, ctx: &Context, field: &str, count: i64) -> MapperResult<()> {
        self.modify(ctx, Update::new().pop(field, count)).await
    }
}
