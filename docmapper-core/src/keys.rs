//! Key definitions and the per-schema key registry.
//!
//! A [`KeyRegistry`] is filled while a schema is being built and is frozen
//! afterwards. Each registered key gets a [`KeyAccessor`] bundle, reachable
//! through both the key name and its alias.

use bson::Bson;
use std::{collections::HashMap, fmt, sync::Arc};

use crate::types::{KeyType, id_to_bson, new_id};

/// Name of the identity key every schema carries.
pub const ID_KEY: &str = "_id";

/// Alias of [`ID_KEY`].
pub const ID_ALIAS: &str = "id";

/// Default value of a key, applied when the key is unset.
#[derive(Clone)]
pub enum DefaultValue {
    Static(Bson),
    Generator(Arc<dyn Fn() -> Bson + Send + Sync>),
}

impl DefaultValue {
    /// Produces the default value. Generators are evaluated on every call.
    pub fn value(&self) -> Bson {
        match self {
            DefaultValue::Static(value) => value.clone(),
            DefaultValue::Generator(generate) => generate(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(value) => write!(f, "Static({value})"),
            DefaultValue::Generator(_) => write!(f, "Generator"),
        }
    }
}

/// Options accepted when registering a key.
#[derive(Clone, Debug, Default)]
pub struct KeyOptions {
    pub default: Option<DefaultValue>,
    pub required: bool,
    pub alias: Option<String>,
    /// Element type for `Array` keys. Ignored for every other key type.
    pub typecast: Option<KeyType>,
}

impl KeyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a static default value.
    pub fn default_value(mut self, value: impl Into<Bson>) -> Self {
        self.default = Some(DefaultValue::Static(value.into()));
        self
    }

    /// Sets a default generator, evaluated each time a default is needed.
    pub fn default_with<F, V>(mut self, generate: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<Bson>,
    {
        self.default = Some(DefaultValue::Generator(Arc::new(move || generate().into())));
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Registers a second accessor name for the key.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn typecast(mut self, element: KeyType) -> Self {
        self.typecast = Some(element);
        self
    }
}

/// An immutable key declaration.
#[derive(Clone, Debug)]
pub struct KeyDefinition {
    name: String,
    key_type: KeyType,
    options: KeyOptions,
}

impl KeyDefinition {
    pub fn new(name: impl Into<String>, key_type: KeyType, options: KeyOptions) -> Self {
        Self {
            name: name.into(),
            key_type,
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_type(&self) -> &KeyType {
        &self.key_type
    }

    pub fn alias(&self) -> Option<&str> {
        self.options.alias.as_deref()
    }

    pub fn is_required(&self) -> bool {
        self.options.required
    }

    pub fn default_value(&self) -> Option<Bson> {
        self.options
            .default
            .as_ref()
            .map(DefaultValue::value)
    }

    /// Coerces a raw value for this key.
    ///
    /// The typecast hint only applies to `Array` keys, where it coerces every
    /// element; on scalar keys the declared type is the only coercion.
    pub fn cast(&self, raw: Bson) -> Bson {
        match (&self.key_type, &self.options.typecast, raw) {
            (KeyType::Array, Some(element), Bson::Array(items)) => Bson::Array(
                items
                    .into_iter()
                    .map(|item| element.coerce(item))
                    .collect(),
            ),
            (key_type, _, raw) => key_type.coerce(raw),
        }
    }

    /// Coerces a single element of an `Array` key into its stored form.
    ///
    /// Returns the value unchanged when the key has no element type.
    pub fn cast_element(&self, value: Bson) -> Bson {
        match (&self.key_type, &self.options.typecast) {
            (KeyType::Array, Some(element)) => element.to_storage(&element.coerce(value)),
            _ => value,
        }
    }

    /// Converts the in-memory value into its stored form.
    pub fn to_storage(&self, value: &Bson) -> Bson {
        match (&self.key_type, &self.options.typecast, value) {
            (KeyType::Array, Some(element), Bson::Array(items)) => Bson::Array(
                items
                    .iter()
                    .map(|item| element.to_storage(item))
                    .collect(),
            ),
            (key_type, _, value) => key_type.to_storage(value),
        }
    }
}

/// The bound accessor bundle of one declared key.
///
/// Accessors are created when the key is registered; looking one up by a
/// name or alias replaces runtime method-name dispatch.
#[derive(Clone, Debug)]
pub struct KeyAccessor {
    key: Arc<KeyDefinition>,
}

impl KeyAccessor {
    pub fn definition(&self) -> &KeyDefinition {
        &self.key
    }

    /// Canonical key name used in the attribute map and the change set.
    pub fn name(&self) -> &str {
        self.key.name()
    }
}

/// Ordered registry of key definitions.
#[derive(Clone, Debug, Default)]
pub struct KeyRegistry {
    keys: Vec<Arc<KeyDefinition>>,
    accessors: HashMap<String, KeyAccessor>,
}

impl KeyRegistry {
    /// Creates a registry holding only the identity key.
    pub fn with_identity() -> Self {
        let mut registry = Self::default();
        registry.register(
            ID_KEY,
            KeyType::ObjectId,
            KeyOptions::new()
                .alias(ID_ALIAS)
                .default_with(|| id_to_bson(new_id())),
        );
        registry
    }

    /// Registers (or redeclares) a key and returns its definition.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        key_type: KeyType,
        options: KeyOptions,
    ) -> Arc<KeyDefinition> {
        let definition = Arc::new(KeyDefinition::new(name, key_type, options));
        self.remove(definition.name());

        let accessor = KeyAccessor { key: definition.clone() };
        self.accessors
            .insert(definition.name().to_string(), accessor.clone());
        if let Some(alias) = definition.alias() {
            self.accessors
                .insert(alias.to_string(), accessor);
        }

        self.keys.push(definition.clone());
        definition
    }

    /// Removes a key and its alias. Returns the removed definition, if any.
    pub fn remove(&mut self, name: &str) -> Option<Arc<KeyDefinition>> {
        let canonical = self.resolve(name)?.to_string();
        let position = self
            .keys
            .iter()
            .position(|key| key.name() == canonical)?;
        let removed = self.keys.remove(position);

        self.accessors.remove(removed.name());
        if let Some(alias) = removed.alias() {
            self.accessors.remove(alias);
        }

        Some(removed)
    }

    /// Looks up the accessor bundle registered under a name or alias.
    pub fn accessor(&self, name: &str) -> Option<&KeyAccessor> {
        self.accessors.get(name)
    }

    pub fn get(&self, name: &str) -> Option<&KeyDefinition> {
        self.accessor(name)
            .map(KeyAccessor::definition)
    }

    /// Resolves an alias to the canonical key name.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.accessor(name)
            .map(KeyAccessor::name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.accessors.contains_key(name)
    }

    /// Declared keys in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &KeyDefinition> {
        self.keys.iter().map(|key| key.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.iter()
            .map(KeyDefinition::name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
