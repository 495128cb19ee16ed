//! The in-memory document: attribute storage, coercion on write and change tracking.
//!
//! A [`Document`] is an instance of a [`Schema`]. Every write to a declared key is
//! coerced through the key's type and recorded by the document's change tracker;
//! writes to undeclared keys are kept as dynamic attributes and never tracked.
//!
//! Persistence lives in [`persistence`](crate::persistence), associations in
//! [`association`](crate::association).
//!
//! # Example
//!
//! ```ignore
//! use docmapper::prelude::*;
//!
//! let schema = Schema::builder("User").key("name", KeyType::String).build();
//! let mut user = Document::new(&schema);
//!
//! user.write("name", "Original");
//! user.clear_changes(|_| true);
//!
//! user.write("name", "Changed");
//! assert!(user.attribute_changed("name"));
//! assert_eq!(user.was("name"), Bson::String("Original".into()));
//! ```

use bson::{Bson, Uuid, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use crate::{
    association::AssociationKind,
    callbacks::Phase,
    changes::{Change, ChangeSnapshot, ChangeTracker},
    error::{MapperError, MapperResult},
    keys::{ID_ALIAS, ID_KEY},
    schema::Schema,
    types::{id_from_bson, id_to_bson, new_id},
    validation::{BLANK_MESSAGE, ValidationContext, ValidationErrors},
};

/// Lifecycle state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Constructed in memory, never written.
    New,
    /// Written to, or loaded from, storage.
    Persisted,
    /// Destroyed or deleted. Terminal: later writes never reach storage.
    Destroyed,
}

#[derive(Debug, Clone)]
pub(crate) enum Embedded {
    One(Option<Box<Document>>),
    Many(Vec<Document>),
}

impl Embedded {
    fn to_bson(&self) -> Bson {
        match self {
            Embedded::One(Some(document)) => Bson::Document(document.to_record()),
            Embedded::One(None) => Bson::Null,
            Embedded::Many(documents) => Bson::Array(
                documents
                    .iter()
                    .map(|document| Bson::Document(document.to_record()))
                    .collect(),
            ),
        }
    }

    fn mark_persisted(&mut self) {
        match self {
            Embedded::One(Some(document)) => document.mark_persisted(),
            Embedded::One(None) => {}
            Embedded::Many(documents) => documents
                .iter_mut()
                .for_each(Document::mark_persisted),
        }
    }
}

/// One record instance of a [`Schema`].
#[derive(Clone)]
pub struct Document {
    pub(crate) schema: Arc<Schema>,
    pub(crate) id: Uuid,
    pub(crate) attributes: bson::Document,
    pub(crate) embedded: BTreeMap<String, Embedded>,
    pub(crate) changes: ChangeTracker,
    pub(crate) state: State,
    pub(crate) initializing: bool,
    pub(crate) errors: ValidationErrors,
}

impl Document {
    /// Constructs a new document holding the schema's defaults.
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self::with_attributes(schema, bson::Document::new())
    }

    /// Constructs a new document and assigns `attributes` over the defaults.
    ///
    /// Defaults are not tracked; the assigned attributes are. `after_initialize`
    /// callbacks run last.
    pub fn with_attributes(schema: &Arc<Schema>, attributes: bson::Document) -> Self {
        let id = schema
            .keys()
            .get(ID_KEY)
            .and_then(|key| key.default_value())
            .and_then(|value| id_from_bson(&value))
            .unwrap_or_else(new_id);

        let mut document = Self::blank(schema, id, State::New);
        document.initializing = true;
        document.apply_defaults();
        document.initializing = false;

        document.assign(attributes);

        document.initializing = true;
        schema
            .callbacks()
            .run(Phase::AfterInitialize, &mut document);
        document.initializing = false;
        document
    }

    /// Hydrates a persisted document from a stored record.
    ///
    /// The result has a clean change set. `after_find` then `after_initialize`
    /// callbacks run once each; nothing they write is tracked.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::InvalidDocument`] when the record has no valid `_id` or
    /// an embedded association holds something other than documents.
    pub fn from_record(schema: &Arc<Schema>, record: bson::Document) -> MapperResult<Self> {
        let id = record
            .get(ID_KEY)
            .and_then(id_from_bson)
            .ok_or_else(|| {
                MapperError::InvalidDocument(format!("{} record without a valid _id", schema.name()))
            })?;

        let mut document = Self::blank(schema, id, State::Persisted);
        document.initializing = true;
        document.load(record)?;
        document.apply_defaults();

        schema
            .callbacks()
            .run(Phase::AfterFind, &mut document);
        schema
            .callbacks()
            .run(Phase::AfterInitialize, &mut document);
        document.initializing = false;

        Ok(document)
    }

    fn blank(schema: &Arc<Schema>, id: Uuid, state: State) -> Self {
        Self {
            schema: schema.clone(),
            id,
            attributes: bson::Document::new(),
            embedded: BTreeMap::new(),
            changes: ChangeTracker::new(),
            state,
            initializing: false,
            errors: ValidationErrors::new(),
        }
    }

    pub(crate) fn apply_defaults(&mut self) {
        let schema = self.schema.clone();
        for key in schema.keys().iter() {
            if key.name() == ID_KEY || self.attributes.contains_key(key.name()) {
                continue;
            }
            if let Some(value) = key.default_value() {
                self.write(key.name(), value);
            }
        }
    }

    /// Replaces the attributes with a stored record, bypassing tracking.
    pub(crate) fn load(&mut self, record: bson::Document) -> MapperResult<()> {
        let schema = self.schema.clone();

        for (key, value) in record {
            if key == ID_KEY {
                continue;
            }

            match schema.association(&key) {
                Some(association) if association.kind().is_embedded() => {
                    let embedded = hydrate_embedded(&schema, &key, association.kind(), value)?;
                    self.embedded.insert(key, embedded);
                }
                _ => match schema.keys().get(&key) {
                    Some(definition) => {
                        let value = definition.key_type().from_storage(value);
                        self.attributes
                            .insert(definition.name().to_string(), value);
                    }
                    None => {
                        self.attributes.insert(key, value);
                    }
                },
            }
        }

        Ok(())
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_new(&self) -> bool {
        self.state == State::New
    }

    pub fn is_persisted(&self) -> bool {
        self.state == State::Persisted
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == State::Destroyed
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Writes a value through the key registry.
    ///
    /// Declared keys are coerced and tracked, embedded association names replace the
    /// embedded documents, and undeclared keys are stored as dynamic attributes
    /// (unless the schema is strict). Writes to `_id` are only accepted on new
    /// documents.
    pub fn write(&mut self, key: &str, value: impl Into<Bson>) {
        let value = value.into();

        if key == ID_KEY || key == ID_ALIAS {
            self.write_id(value);
            return;
        }

        let schema = self.schema.clone();
        if let Some(association) = schema
            .association(key)
            .filter(|association| association.kind().is_embedded())
        {
            self.write_embedded(key, association.kind(), value);
            return;
        }

        match schema.keys().get(key) {
            Some(definition) => {
                let name = definition.name();
                let value = definition.cast(value);
                let old = self
                    .attributes
                    .insert(name.to_string(), value.clone())
                    .unwrap_or(Bson::Null);

                if !self.initializing {
                    self.changes.record(name, old, &value);
                }
            }
            None if schema.dynamic_attributes() => {
                self.attributes.insert(key.to_string(), value);
            }
            None => {
                tracing::warn!(schema = schema.name(), key, "ignoring write to undeclared key");
            }
        }
    }

    /// Writes without recording a change.
    pub(crate) fn write_untracked(&mut self, key: &str, value: impl Into<Bson>) {
        let initializing = std::mem::replace(&mut self.initializing, true);
        self.write(key, value);
        self.initializing = initializing;
    }

    fn write_id(&mut self, value: Bson) {
        if !self.is_new() {
            tracing::warn!(schema = self.schema.name(), id = %self.id, "identity is fixed once persisted");
            return;
        }

        match id_from_bson(&value) {
            Some(id) => self.id = id,
            None => tracing::warn!(schema = self.schema.name(), %value, "ignoring unparsable identity"),
        }
    }

    fn write_embedded(&mut self, name: &str, kind: AssociationKind, value: Bson) {
        let Some(schema) = self
            .schema
            .association(name)
            .and_then(|association| association.embedded_schema())
            .cloned()
        else {
            return;
        };

        let build = |value: Bson| match value {
            Bson::Document(attributes) => Some(Document::with_attributes(&schema, attributes)),
            _ => None,
        };

        let embedded = match (kind, value) {
            (AssociationKind::EmbeddedOne, Bson::Null) => Embedded::One(None),
            (AssociationKind::EmbeddedOne, value) => match build(value) {
                Some(document) => Embedded::One(Some(Box::new(document))),
                None => {
                    tracing::warn!(association = name, "expected an embedded document");
                    return;
                }
            },
            (_, Bson::Array(items)) => Embedded::Many(items.into_iter().filter_map(build).collect()),
            (_, Bson::Null) => Embedded::Many(Vec::new()),
            _ => {
                tracing::warn!(association = name, "expected an array of embedded documents");
                return;
            }
        };

        if !self.initializing {
            let current = self.read(name);
            self.changes.will_change(name, current);
        }
        self.embedded.insert(name.to_string(), embedded);
    }

    /// Reads a value by key or alias.
    ///
    /// Unset declared keys yield their default, anything else unset yields `Null`.
    /// Embedded association names yield the embedded records.
    pub fn read(&self, key: &str) -> Bson {
        if key == ID_KEY || key == ID_ALIAS {
            return id_to_bson(self.id);
        }

        if let Some(embedded) = self.embedded.get(key) {
            return embedded.to_bson();
        }
        if let Some(association) = self.schema.association(key) {
            return match association.kind() {
                AssociationKind::EmbeddedMany => Bson::Array(Vec::new()),
                AssociationKind::EmbeddedOne => Bson::Null,
                _ => self.read_attribute(key),
            };
        }

        self.read_attribute(key)
    }

    fn read_attribute(&self, key: &str) -> Bson {
        let name = self.schema.canonical_field(key);
        match self.attributes.get(name) {
            Some(value) => value.clone(),
            None => self
                .schema
                .keys()
                .get(name)
                .and_then(|definition| definition.default_value())
                .unwrap_or(Bson::Null),
        }
    }

    /// Reads a value and deserializes it.
    pub fn read_as<T: DeserializeOwned>(&self, key: &str) -> MapperResult<T> {
        Ok(deserialize_from_bson(self.read(key))?)
    }

    /// Writes every entry of `attributes`.
    pub fn assign(&mut self, attributes: bson::Document) {
        for (key, value) in attributes {
            self.write(&key, value);
        }
    }

    /// Declared key names, in declaration order.
    pub fn keys(&self) -> Vec<&str> {
        self.schema.keys().names()
    }

    /// Names of attributes set on this instance that the schema does not declare.
    pub fn dynamic_keys(&self) -> Vec<&str> {
        self.attributes
            .keys()
            .filter(|key| !self.schema.keys().contains(key))
            .map(String::as_str)
            .collect()
    }

    /// Every value of the document in its in-memory form, `_id` first.
    pub fn attributes(&self) -> bson::Document {
        let mut attributes = bson::Document::new();
        attributes.insert(ID_KEY, id_to_bson(self.id));
        for (key, value) in &self.attributes {
            attributes.insert(key.clone(), value.clone());
        }
        for (name, embedded) in &self.embedded {
            attributes.insert(name.clone(), embedded.to_bson());
        }
        attributes
    }

    /// The record written to storage: `_id`, declared keys, dynamic keys, embedded
    /// documents.
    pub fn to_record(&self) -> bson::Document {
        let mut record = bson::Document::new();
        record.insert(ID_KEY, id_to_bson(self.id));

        for definition in self.schema.keys().iter() {
            if let Some(value) = self.attributes.get(definition.name()) {
                record.insert(definition.name(), definition.to_storage(value));
            }
        }
        for (key, value) in &self.attributes {
            if !self.schema.keys().contains(key) {
                record.insert(key.clone(), value.clone());
            }
        }
        for (name, embedded) in &self.embedded {
            record.insert(name.clone(), embedded.to_bson());
        }

        record
    }

    fn canonical(&self, key: &str) -> String {
        if key == ID_ALIAS {
            return ID_KEY.to_string();
        }
        self.schema.canonical_field(key).to_string()
    }

    /// Whether any key changed since the last committed baseline.
    pub fn is_changed(&self) -> bool {
        self.changes.has_changes()
    }

    pub fn attribute_changed(&self, key: &str) -> bool {
        self.changes.is_changed(&self.canonical(key))
    }

    /// The original value of a changed key, or its current value when clean.
    pub fn was(&self, key: &str) -> Bson {
        match self.changes.original(&self.canonical(key)) {
            Some(original) => original.clone(),
            None => self.read(key),
        }
    }

    /// `(old, new)` for a changed key.
    pub fn change(&self, key: &str) -> Option<Change> {
        self.changes
            .original(&self.canonical(key))
            .map(|original| (original.clone(), self.read(key)))
    }

    /// Every pending change as `(old, new)`.
    pub fn changes(&self) -> ChangeSnapshot {
        self.changes.snapshot(|key| self.read(key))
    }

    pub fn changed(&self) -> Vec<String> {
        self.changes.changed()
    }

    /// Changed keys with their original values.
    pub fn changed_attributes(&self) -> BTreeMap<String, Bson> {
        self.changes.originals().clone()
    }

    /// Marks a key changed, with its current value as the original.
    ///
    /// Use this before mutating an array or document value in place.
    pub fn will_change(&mut self, key: &str) {
        let name = self.canonical(key);
        let current = self.read(&name);
        self.changes.will_change(&name, current);
    }

    /// Changes committed by the last successful save.
    pub fn previous_changes(&self) -> &BTreeMap<String, Change> {
        self.changes.previous_changes()
    }

    pub fn previously_changed(&self, key: &str) -> bool {
        self.changes
            .previous_change(&self.canonical(key))
            .is_some()
    }

    pub fn previous_change(&self, key: &str) -> Option<&Change> {
        self.changes.previous_change(&self.canonical(key))
    }

    /// Restores a changed key to its original value and forgets the change.
    pub fn reset_attribute(&mut self, key: &str) {
        let name = self.canonical(key);
        let Some(original) = self.changes.forget(&name) else {
            return;
        };

        if self.embedded.contains_key(&name) || self.schema.association(&name).is_some() {
            self.write_untracked(&name, original);
        } else if original == Bson::Null {
            self.attributes.remove(&name);
        } else {
            self.attributes.insert(name, original);
        }
    }

    /// Same as [`Document::reset_attribute`].
    pub fn restore_attribute(&mut self, key: &str) {
        self.reset_attribute(key);
    }

    /// Runs `operation` and commits the pending changes only if it returns `true`.
    ///
    /// The changes are captured before `operation` runs and become the
    /// [previous changes](Document::previous_changes) on success. On failure the
    /// change set is left as it was.
    pub fn clear_changes<F>(&mut self, operation: F) -> bool
    where
        F: FnOnce(&mut Document) -> bool,
    {
        let snapshot = self.changes();
        let succeeded = operation(self);
        if succeeded {
            self.changes.commit(snapshot);
        }
        succeeded
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.state = State::Persisted;
        self.changes.clear();
        for embedded in self.embedded.values_mut() {
            embedded.mark_persisted();
        }
    }

    /// Runs validation and stores the resulting errors on the document.
    ///
    /// Order: `before_validation`, presence checks for required keys, the schema's
    /// validators, `after_validation`. A halt in `before_validation` fails validation.
    pub fn is_valid(&mut self) -> bool {
        let schema = self.schema.clone();
        self.errors.clear();

        if schema
            .callbacks()
            .run(Phase::BeforeValidation, self)
            .is_halt()
        {
            return false;
        }

        let context = if self.is_new() {
            ValidationContext::Create
        } else {
            ValidationContext::Update
        };

        let mut errors = ValidationErrors::new();
        for definition in schema.keys().iter() {
            if definition.is_required() && is_blank(&self.read(definition.name())) {
                errors.add(definition.name(), BLANK_MESSAGE);
            }
        }
        for validator in schema.validators() {
            errors.merge(validator.validate(self, context));
        }
        self.errors = errors;

        schema
            .callbacks()
            .run(Phase::AfterValidation, self);
        self.errors.is_empty()
    }

    /// Errors of the last validation.
    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    /// Deserializes the document's attributes into a typed value.
    pub fn deserialize<T: DeserializeOwned>(&self) -> MapperResult<T> {
        Ok(deserialize_from_bson(Bson::Document(self.attributes()))?)
    }

    /// Serializes a typed value and assigns its fields.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::InvalidArgument`] when `value` does not serialize to a
    /// document.
    pub fn assign_serialized<T: Serialize>(&mut self, value: &T) -> MapperResult<()> {
        match serialize_to_bson(value)? {
            Bson::Document(attributes) => {
                self.assign(attributes);
                Ok(())
            }
            other => Err(MapperError::InvalidArgument(format!(
                "expected a document, got {:?}",
                other.element_type()
            ))),
        }
    }
}

fn hydrate_embedded(schema: &Schema, name: &str, kind: AssociationKind, value: Bson) -> MapperResult<Embedded> {
    let Some(target) = schema
        .association(name)
        .and_then(|association| association.embedded_schema())
    else {
        return Err(MapperError::UnknownAssociation(schema.name().to_string(), name.to_string()));
    };

    let hydrate = |value: Bson| match value {
        Bson::Document(mut record) => {
            if !record.contains_key(ID_KEY) {
                record.insert(ID_KEY, id_to_bson(new_id()));
            }
            Document::from_record(target, record)
        }
        other => Err(MapperError::InvalidDocument(format!(
            "{name} holds {:?} instead of an embedded document",
            other.element_type()
        ))),
    };

    match (kind, value) {
        (AssociationKind::EmbeddedOne, Bson::Null) => Ok(Embedded::One(None)),
        (AssociationKind::EmbeddedOne, value) => Ok(Embedded::One(Some(Box::new(hydrate(value)?)))),
        (_, Bson::Array(items)) => Ok(Embedded::Many(
            items
                .into_iter()
                .map(hydrate)
                .collect::<MapperResult<_>>()?,
        )),
        (_, Bson::Null) => Ok(Embedded::Many(Vec::new())),
        (_, other) => Err(MapperError::InvalidDocument(format!(
            "{name} holds {:?} instead of an array",
            other.element_type()
        ))),
    }
}

fn is_blank(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => true,
        Bson::String(s) => s.trim().is_empty(),
        Bson::Array(items) => items.is_empty(),
        Bson::Document(document) => document.is_empty(),
        _ => false,
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.schema.name() == other.schema.name()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let changed: BTreeSet<_> = self.changes.originals().keys().collect();
        f.debug_struct("Document")
            .field("schema", &self.schema.name())
            .field("id", &self.id)
            .field("state", &self.state)
            .field("attributes", &self.attributes)
            .field("embedded", &self.embedded.keys().collect::<Vec<_>>())
            .field("changed", &changed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        callbacks::Flow,
        keys::KeyOptions,
        types::KeyType,
    };
    use bson::doc;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn person() -> Arc<Schema> {
        Schema::builder("Person")
            .key_with("name", KeyType::String, KeyOptions::new().alias("n"))
            .key_with("age", KeyType::Integer, KeyOptions::new().default_value(0))
            .key("tags", KeyType::Array)
            .build()
    }

    fn persisted(schema: &Arc<Schema>, attributes: bson::Document) -> Document {
        let mut record = doc! { "_id": id_to_bson(new_id()) };
        for (key, value) in attributes {
            record.insert(key, value);
        }
        Document::from_record(schema, record).unwrap()
    }

    #[test]
    fn defaults_are_not_changes() {
        let document = Document::new(&person());
        assert_eq!(document.read("age"), Bson::Int64(0));
        assert!(!document.is_changed());
    }

    #[test]
    fn hydrated_documents_start_clean() {
        let found = Arc::new(AtomicUsize::new(0));
        let initialized = Arc::new(AtomicUsize::new(0));
        let schema = {
            let found = found.clone();
            let initialized = initialized.clone();
            Schema::builder("Person")
                .key("name", KeyType::String)
                .on(Phase::AfterFind, move |_: &mut Document| {
                    found.fetch_add(1, Ordering::SeqCst);
                })
                .on(Phase::AfterInitialize, move |document: &mut Document| {
                    initialized.fetch_add(1, Ordering::SeqCst);
                    document.write("name", "touched");
                })
                .build()
        };

        let document = persisted(&schema, doc! { "name": "stored", "extra": 1 });

        assert!(!document.is_changed());
        assert!(document.is_persisted());
        assert_eq!(found.load(Ordering::SeqCst), 1);
        assert_eq!(initialized.load(Ordering::SeqCst), 1);
        assert_eq!(document.read("extra"), Bson::Int32(1));
    }

    #[test]
    fn writes_are_coerced_and_tracked() {
        let mut document = persisted(&person(), doc! { "name": "Original", "age": 30 });

        document.write("age", "31");
        assert_eq!(document.read("age"), Bson::Int64(31));
        assert_eq!(document.change("age"), Some((Bson::Int64(30), Bson::Int64(31))));

        document.write("age", 30);
        assert!(!document.attribute_changed("age"));
    }

    #[test]
    fn aliases_share_one_change_entry() {
        let mut document = persisted(&person(), doc! { "name": "Original" });

        document.write("n", "Changed");
        assert!(document.attribute_changed("name"));
        assert_eq!(document.changed(), vec!["name".to_string()]);
        assert_eq!(document.was("n"), Bson::String("Original".into()));
    }

    #[test]
    fn dynamic_attributes_are_untracked() {
        let mut document = persisted(&person(), doc! {});
        document.write("nickname", "Bob");

        assert_eq!(document.read("nickname"), Bson::String("Bob".into()));
        assert!(!document.is_changed());
        assert_eq!(document.dynamic_keys(), vec!["nickname"]);
    }

    #[test]
    fn strict_schemas_drop_undeclared_writes() {
        let schema = Schema::builder("Strict").strict().build();
        let mut document = Document::new(&schema);
        document.write("anything", 1);
        assert_eq!(document.read("anything"), Bson::Null);
    }

    #[test]
    fn reset_restores_the_original() {
        let mut document = persisted(&person(), doc! { "name": "Original" });
        document.write("name", "Changed");
        document.reset_attribute("name");

        assert_eq!(document.read("name"), Bson::String("Original".into()));
        assert!(!document.is_changed());
    }

    #[test]
    fn failed_operations_keep_the_change_set() {
        let mut document = persisted(&person(), doc! { "name": "Original" });
        document.write("name", "Changed");

        assert!(!document.clear_changes(|_| false));
        assert!(document.attribute_changed("name"));
        assert!(document.previous_changes().is_empty());

        assert!(document.clear_changes(|_| true));
        assert!(!document.is_changed());
        assert_eq!(
            document.previous_change("name"),
            Some(&(Bson::String("Original".into()), Bson::String("Changed".into())))
        );
    }

    #[test]
    fn will_change_marks_in_place_mutation() {
        let mut document = persisted(&person(), doc! { "tags": ["a"] });
        document.will_change("tags");
        assert!(document.attribute_changed("tags"));
    }

    #[test]
    fn identity_is_fixed_once_persisted() {
        let mut document = persisted(&person(), doc! {});
        let id = document.id();
        document.write("id", id_to_bson(new_id()));
        assert_eq!(document.id(), id);

        let mut fresh = Document::new(&person());
        let chosen = new_id();
        fresh.write("_id", chosen.to_string());
        assert_eq!(fresh.id(), chosen);
    }

    #[test]
    fn required_keys_must_not_be_blank() {
        let schema = Schema::builder("Account")
            .key_with("email", KeyType::String, KeyOptions::new().required())
            .build();
        let mut document = Document::new(&schema);

        assert!(!document.is_valid());
        assert_eq!(document.errors().on("email"), [BLANK_MESSAGE]);

        document.write("email", "a@example.com");
        assert!(document.is_valid());
    }

    #[test]
    fn halting_before_validation_fails_it() {
        let schema = Schema::builder("Gate")
            .on(Phase::BeforeValidation, |_: &mut Document| Flow::Halt)
            .build();
        assert!(!Document::new(&schema).is_valid());
    }

    #[test]
    fn serde_bridge() {
        #[derive(Deserialize)]
        struct Person {
            name: String,
            age: i64,
        }

        let mut document = Document::new(&person());
        document.assign(doc! { "name": "Ada", "age": "36" });

        let typed: Person = document.deserialize().unwrap();
        assert_eq!(typed.name, "Ada");
        assert_eq!(typed.age, 36);
    }

    #[test]
    fn records_store_declared_keys_first() {
        let mut document = Document::new(&person());
        document.write("zeta", true);
        document.write("name", "Ada");

        let keys: Vec<_> = document.to_record().keys().cloned().collect();
        assert_eq!(keys, vec!["_id", "name", "age", "zeta"]);
    }
}
