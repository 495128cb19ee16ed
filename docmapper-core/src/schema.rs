//! Document schemas and the schema registry.
//!
//! A [`Schema`] is the runtime description of one document type: its keys, callbacks,
//! associations, scopes and validators. Schemas are assembled once with a
//! [`SchemaBuilder`] and are immutable afterwards; [`Schema::migrate`] is the only way
//! to derive a changed schema, and it yields a new value.
//!
//! # Example
//!
//! ```ignore
//! use docmapper::prelude::*;
//!
//! let user = Schema::builder("User")
//!     .key("name", KeyType::String)
//!     .key_with("age", KeyType::Integer, KeyOptions::new().default_value(0))
//!     .timestamps()
//!     .many("posts", "Post", AssociationOptions::new().dependent_destroy())
//!     .build();
//!
//! let registry = SchemaRegistry::new().with(user);
//! ```

use bson::Bson;
use convert_case::{Case, Casing};
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    association::{Association, AssociationKind, AssociationOptions},
    callbacks::{AroundCallback, AroundPhase, Callback, CallbackChain, Continuation, Flow, Phase},
    document::Document,
    error::{MapperError, MapperResult},
    keys::{ID_KEY, KeyOptions, KeyRegistry},
    modifier::Modifier,
    query::{Criteria, FieldOp},
    types::KeyType,
    validation::{ValidationContext, ValidationErrors, Validator},
};

/// Key holding the concrete schema name of records stored by an inheriting schema.
pub const TYPE_KEY: &str = "_type";

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// A named, reusable query fragment.
#[derive(Clone)]
pub enum Scope {
    /// Built once, when the scope is declared.
    Static(Criteria),
    /// Built on every invocation from the call arguments.
    Deferred(Arc<dyn Fn(&[Bson]) -> Criteria + Send + Sync>),
}

impl Scope {
    pub fn resolve(&self, args: &[Bson]) -> Criteria {
        match self {
            Scope::Static(criteria) => criteria.clone(),
            Scope::Deferred(build) => build(args),
        }
    }
}

/// The runtime description of a document type.
#[derive(Clone)]
pub struct Schema {
    name: String,
    collection: Option<String>,
    keys: KeyRegistry,
    callbacks: CallbackChain,
    associations: Vec<Association>,
    scopes: HashMap<String, Scope>,
    default_scope: Option<Criteria>,
    validators: Vec<Arc<dyn Validator>>,
    timestamps: bool,
    dynamic_attributes: bool,
    lineage: Vec<String>,
}

impl Schema {
    /// Starts building a schema stored in the collection derived from `name`.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// Starts building a schema whose documents live inside another document.
    pub fn embedded(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name).embeddable()
    }

    /// Starts a migration step: a builder holding everything this schema declares.
    ///
    /// The original schema is left untouched; building yields a new schema value.
    pub fn migrate(&self) -> SchemaBuilder {
        SchemaBuilder { schema: self.clone() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The collection records are stored in; `None` for embedded schemas.
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// The collection records are stored in.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::InvalidArgument`] for embedded schemas, whose documents are
    /// only persisted through their owner.
    pub fn collection_name(&self) -> MapperResult<&str> {
        self.collection
            .as_deref()
            .ok_or_else(|| {
                MapperError::InvalidArgument(format!(
                    "{} is embedded and is saved through its owner",
                    self.name
                ))
            })
    }

    pub fn is_embedded(&self) -> bool {
        self.collection.is_none()
    }

    pub fn keys(&self) -> &KeyRegistry {
        &self.keys
    }

    pub fn callbacks(&self) -> &CallbackChain {
        &self.callbacks
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations
            .iter()
            .find(|association| association.name() == name)
    }

    pub fn scope(&self, name: &str) -> Option<&Scope> {
        self.scopes.get(name)
    }

    pub fn default_scope(&self) -> Option<&Criteria> {
        self.default_scope.as_ref()
    }

    pub fn validators(&self) -> &[Arc<dyn Validator>] {
        &self.validators
    }

    pub fn has_timestamps(&self) -> bool {
        self.timestamps
    }

    /// Whether writes to undeclared keys are kept.
    pub fn dynamic_attributes(&self) -> bool {
        self.dynamic_attributes
    }

    /// Names of the schemas this one inherits from, nearest first.
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    pub fn inherits_from(&self, name: &str) -> bool {
        self.lineage.iter().any(|ancestor| ancestor == name)
    }

    /// Resolves a field name through the key registry's aliases.
    pub fn canonical_field<'a>(&'a self, field: &'a str) -> &'a str {
        self.keys.resolve(field).unwrap_or(field)
    }

    /// Resolves the field of a query predicate and coerces its operand to the stored form.
    pub fn coerce_condition(&self, field: &str, op: FieldOp, value: Bson) -> (String, Bson) {
        let Some(definition) = self.keys.get(field) else {
            return (field.to_string(), value);
        };

        let coerce = |value: Bson| match definition.key_type() {
            KeyType::Array => definition.cast_element(value),
            _ => definition.to_storage(&definition.cast(value)),
        };

        let value = match (op.takes_list(), value) {
            (true, Bson::Array(items)) => Bson::Array(items.into_iter().map(coerce).collect()),
            (_, value) => coerce(value),
        };

        (definition.name().to_string(), value)
    }

    /// Resolves the field of a modifier and coerces its operand to the stored form.
    pub fn coerce_modifier(&self, modifier: Modifier) -> Modifier {
        let resolve = |field: String| self.canonical_field(&field).to_string();
        let definition = |field: &str| self.keys.get(field);

        match modifier {
            Modifier::Set(field, value) => {
                let value = match definition(&field) {
                    Some(definition) => definition.to_storage(&definition.cast(value)),
                    None => value,
                };
                Modifier::Set(resolve(field), value)
            }
            Modifier::Push(field, value) => {
                let value = match definition(&field) {
                    Some(definition) => definition.cast_element(value),
                    None => value,
                };
                Modifier::Push(resolve(field), value)
            }
            Modifier::PushAll(field, values) => {
                let values = cast_elements(definition(&field), values);
                Modifier::PushAll(resolve(field), values)
            }
            Modifier::Pull(field, value) => {
                let value = match definition(&field) {
                    Some(definition) => definition.cast_element(value),
                    None => value,
                };
                Modifier::Pull(resolve(field), value)
            }
            Modifier::PullAll(field, values) => {
                let values = cast_elements(definition(&field), values);
                Modifier::PullAll(resolve(field), values)
            }
            Modifier::AddToSet(field, values) => {
                let values = cast_elements(definition(&field), values);
                Modifier::AddToSet(resolve(field), values)
            }
            Modifier::Unset(field) => Modifier::Unset(resolve(field)),
            Modifier::Inc(field, delta) => {
                let delta = match definition(&field).map(|definition| definition.key_type()) {
                    Some(KeyType::Integer) => match KeyType::Integer.coerce(delta.clone()) {
                        Bson::Null => delta,
                        truncated => truncated,
                    },
                    _ => delta,
                };
                Modifier::Inc(resolve(field), delta)
            }
            Modifier::Pop(field, count) => Modifier::Pop(resolve(field), count),
        }
    }
}

fn cast_elements(definition: Option<&crate::keys::KeyDefinition>, values: Vec<Bson>) -> Vec<Bson> {
    match definition {
        Some(definition) => values
            .into_iter()
            .map(|value| definition.cast_element(value))
            .collect(),
        None => values,
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("keys", &self.keys.names())
            .field(
                "associations",
                &self
                    .associations
                    .iter()
                    .map(Association::name)
                    .collect::<Vec<_>>(),
            )
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

/// Assembles a [`Schema`]. All declarations happen here, before the schema is used.
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            schema: Schema {
                collection: Some(collection_name(&name)),
                name,
                keys: KeyRegistry::with_identity(),
                callbacks: CallbackChain::new(),
                associations: Vec::new(),
                scopes: HashMap::new(),
                default_scope: None,
                validators: Vec::new(),
                timestamps: false,
                dynamic_attributes: true,
                lineage: Vec::new(),
            },
        }
    }

    /// Overrides the collection name.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.schema.collection = Some(collection.into());
        self
    }

    /// Marks the schema as embedded: its documents have no collection of their own.
    pub fn embeddable(mut self) -> Self {
        self.schema.collection = None;
        self
    }

    /// Ignores writes to undeclared keys instead of storing them.
    pub fn strict(mut self) -> Self {
        self.schema.dynamic_attributes = false;
        self
    }

    /// Takes over every declaration of `parent`.
    ///
    /// Call this first: the child shares the parent's collection, and its records carry
    /// a `_type` key naming the child so queries through the child only see its own
    /// records. Declarations made afterwards are invisible to the parent.
    pub fn inherit(mut self, parent: &Schema) -> Self {
        let name = std::mem::take(&mut self.schema.name);
        let mut lineage = vec![parent.name.clone()];
        lineage.extend(parent.lineage.iter().cloned());

        self.schema = Schema {
            name: name.clone(),
            lineage,
            ..parent.clone()
        };
        self.schema.keys.register(
            TYPE_KEY,
            KeyType::String,
            KeyOptions::new().default_value(name),
        );
        self
    }

    pub fn key(self, name: impl Into<String>, key_type: KeyType) -> Self {
        self.key_with(name, key_type, KeyOptions::new())
    }

    pub fn key_with(mut self, name: impl Into<String>, key_type: KeyType, options: KeyOptions) -> Self {
        self.schema.keys.register(name, key_type, options);
        self
    }

    pub fn remove_key(mut self, name: &str) -> Self {
        if name != ID_KEY {
            self.schema.keys.remove(name);
        }
        self
    }

    /// Declares `created_at` and `updated_at`, maintained by save and touch.
    pub fn timestamps(mut self) -> Self {
        self.schema.timestamps = true;
        self.schema.keys.register(CREATED_AT, KeyType::Time, KeyOptions::new());
        self.schema.keys.register(UPDATED_AT, KeyType::Time, KeyOptions::new());
        self
    }

    /// Registers a callback for a phase.
    pub fn on<F, R>(self, phase: Phase, handler: F) -> Self
    where
        F: Fn(&mut Document) -> R + Send + Sync + 'static,
        R: Into<Flow>,
    {
        self.callback(phase, Callback::new(handler))
    }

    /// Registers a callback carrying guards.
    pub fn callback(mut self, phase: Phase, callback: Callback) -> Self {
        self.schema.callbacks.register(phase, callback);
        self
    }

    /// Registers an around callback.
    pub fn around<F>(self, phase: AroundPhase, handler: F) -> Self
    where
        F: for<'d> Fn(&'d mut Document, Continuation) -> futures::future::BoxFuture<'d, MapperResult<Flow>>
            + Send
            + Sync
            + 'static,
    {
        self.around_callback(phase, AroundCallback::new(handler))
    }

    pub fn around_callback(mut self, phase: AroundPhase, callback: AroundCallback) -> Self {
        self.schema.callbacks.register_around(phase, callback);
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.schema.validators.push(Arc::new(validator));
        self
    }

    /// Registers a validation closure.
    pub fn validate_with<F>(self, validate: F) -> Self
    where
        F: Fn(&Document, ValidationContext) -> ValidationErrors + Send + Sync + 'static,
    {
        self.validator(validate)
    }

    /// Declares a scope built once, now.
    pub fn scope(mut self, name: impl Into<String>, criteria: Criteria) -> Self {
        self.schema.scopes.insert(name.into(), Scope::Static(criteria));
        self
    }

    /// Declares a scope built on every invocation.
    pub fn scope_with<F>(mut self, name: impl Into<String>, build: F) -> Self
    where
        F: Fn(&[Bson]) -> Criteria + Send + Sync + 'static,
    {
        self.schema.scopes.insert(name.into(), Scope::Deferred(Arc::new(build)));
        self
    }

    /// Declares criteria applied to every query that is not explicitly unscoped.
    pub fn default_scope(mut self, criteria: Criteria) -> Self {
        self.schema.default_scope = Some(criteria);
        self
    }

    /// Declares an owning reference: this document holds `{name}_id`.
    pub fn belongs_to(self, name: impl Into<String>) -> Self {
        self.belongs_to_with(name, AssociationOptions::new())
    }

    pub fn belongs_to_with(mut self, name: impl Into<String>, options: AssociationOptions) -> Self {
        let association = Association::belongs_to(name.into(), options);

        self.schema.keys.register(
            association.foreign_key(),
            KeyType::ObjectId,
            KeyOptions::new(),
        );
        if let Some(type_key) = association.type_key() {
            self.schema.keys.register(type_key, KeyType::String, KeyOptions::new());
        }

        self.push_association(association)
    }

    /// Declares a referenced collection of `target` documents pointing back at this one.
    pub fn many(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        options: AssociationOptions,
    ) -> Self {
        let association = Association::many(name.into(), target.into(), &self.schema.name, options);
        self.push_association(association)
    }

    /// Declares a collection of `target` documents referenced by an array of ids held in `ids_key`.
    pub fn many_in(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        ids_key: impl Into<String>,
        options: AssociationOptions,
    ) -> Self {
        let association = Association::in_array(name.into(), target.into(), ids_key.into(), options);

        if !self.schema.keys.contains(association.foreign_key()) {
            self.schema.keys.register(
                association.foreign_key(),
                KeyType::Array,
                KeyOptions::new()
                    .default_value(Bson::Array(Vec::new()))
                    .typecast(KeyType::ObjectId),
            );
        }

        self.push_association(association)
    }

    /// Declares a single embedded document.
    pub fn one_embedded(self, name: impl Into<String>, schema: Arc<Schema>) -> Self {
        let association = Association::embedded(name.into(), AssociationKind::EmbeddedOne, schema);
        self.push_association(association)
    }

    /// Declares a list of embedded documents.
    pub fn many_embedded(self, name: impl Into<String>, schema: Arc<Schema>) -> Self {
        let association = Association::embedded(name.into(), AssociationKind::EmbeddedMany, schema);
        self.push_association(association)
    }

    fn push_association(mut self, association: Association) -> Self {
        self.schema
            .associations
            .retain(|existing| existing.name() != association.name());
        self.schema.associations.push(association);
        self
    }

    pub fn build(self) -> Arc<Schema> {
        Arc::new(self.schema)
    }
}

/// Schemas by name, used to resolve association targets and inherited types.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a schema, replacing one registered under the same name.
    pub fn with(mut self, schema: Arc<Schema>) -> Self {
        self.register(schema);
        self
    }

    pub fn register(&mut self, schema: Arc<Schema>) {
        self.schemas
            .insert(schema.name().to_string(), schema);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(name)
    }

    /// Looks up a schema that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::UnknownSchema`] if nothing is registered under `name`.
    pub fn schema(&self, name: &str) -> MapperResult<Arc<Schema>> {
        self.schemas
            .get(name)
            .cloned()
            .ok_or_else(|| MapperError::UnknownSchema(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.schemas.keys().map(String::as_str).collect()
    }
}

/// `"BlogPost"` becomes `"blog_posts"`.
pub fn collection_name(type_name: &str) -> String {
    pluralize(&type_name.to_case(Case::Snake))
}

/// `"BlogPost"` becomes `"blog_post_id"`.
pub fn foreign_key(type_name: &str) -> String {
    format!("{}_id", type_name.to_case(Case::Snake))
}

/// `"blog_post"` becomes `"BlogPost"`.
pub fn class_name(association: &str) -> String {
    association.to_case(Case::Pascal)
}

fn pluralize(word: &str) -> String {
    const SIBILANTS: [&str; 5] = ["s", "x", "z", "ch", "sh"];

    if SIBILANTS.iter().any(|suffix| word.ends_with(suffix)) {
        return format!("{word}es");
    }

    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{stem}ies");
        }
    }

    format!("{word}s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn names_are_inflected() {
        assert_eq!(collection_name("User"), "users");
        assert_eq!(collection_name("BlogPost"), "blog_posts");
        assert_eq!(collection_name("Address"), "addresses");
        assert_eq!(collection_name("Category"), "categories");
        assert_eq!(foreign_key("BlogPost"), "blog_post_id");
        assert_eq!(class_name("author"), "Author");
        assert_eq!(class_name("blog_post"), "BlogPost");
    }

    #[test]
    fn inherited_keys_stay_out_of_the_parent() {
        let parent = Schema::builder("User")
            .key("name", KeyType::String)
            .build();
        let child = Schema::builder("Admin")
            .inherit(&parent)
            .key("level", KeyType::Integer)
            .build();

        assert!(child.keys().contains("name"));
        assert!(child.keys().contains("level"));
        assert!(child.keys().contains(TYPE_KEY));
        assert!(!parent.keys().contains("level"));
        assert_eq!(child.collection(), Some("users"));
        assert!(child.inherits_from("User"));
    }

    #[test]
    fn migration_yields_a_new_schema() {
        let v1 = Schema::builder("Item")
            .key("legacy", KeyType::String)
            .build();
        let v2 = v1
            .migrate()
            .remove_key("legacy")
            .key("current", KeyType::String)
            .build();

        assert!(v1.keys().contains("legacy"));
        assert!(!v2.keys().contains("legacy"));
        assert!(v2.keys().contains("current"));
    }

    #[test]
    fn conditions_are_coerced_through_aliases() {
        let schema = Schema::builder("Person")
            .key_with("age", KeyType::Integer, KeyOptions::new().alias("a"))
            .build();

        let (field, value) = schema.coerce_condition("a", FieldOp::Gt, Bson::String("21".into()));
        assert_eq!(field, "age");
        assert_eq!(value, Bson::Int64(21));

        let (_, value) = schema.coerce_condition("age", FieldOp::In, bson::bson!(["1", 2.0]));
        assert_eq!(value, Bson::Array(vec![Bson::Int64(1), Bson::Int64(2)]));
    }

    #[test]
    fn static_scopes_are_fixed_and_deferred_scopes_are_not() {
        let schema = Schema::builder("Task")
            .scope("open", Criteria::new().filter(doc! { "done": false }))
            .scope_with("owned_by", |args| {
                Criteria::new().filter(doc! { "owner": args.first().cloned().unwrap_or(Bson::Null) })
            })
            .build();

        let open = schema.scope("open").unwrap();
        assert_eq!(open.resolve(&[]), open.resolve(&[Bson::Int32(1)]));

        let owned = schema.scope("owned_by").unwrap();
        assert_ne!(owned.resolve(&["a".into()]), owned.resolve(&["b".into()]));
    }
}
