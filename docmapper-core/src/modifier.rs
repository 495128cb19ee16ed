//! Atomic field-level update operations.
//!
//! An [`Update`] is an ordered list of [`Modifier`]s. Backends apply it to stored
//! records with [`Update::apply`]; documents use the same function to mirror the
//! result into their in-memory attributes, so both sides always agree.

use bson::Bson;

use crate::{
    error::{MapperError, MapperResult},
    query::Query,
};

/// One field-level operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Modifier {
    Set(String, Bson),
    Unset(String),
    /// Numeric add. A missing or null field counts as zero.
    Inc(String, Bson),
    Push(String, Bson),
    PushAll(String, Vec<Bson>),
    /// Removes every occurrence of the value.
    Pull(String, Bson),
    PullAll(String, Vec<Bson>),
    /// Appends each value not already present.
    AddToSet(String, Vec<Bson>),
    /// Removes the last element for a positive count, the first for a negative one.
    Pop(String, i64),
}

impl Modifier {
    pub fn field(&self) -> &str {
        match self {
            Modifier::Set(field, _)
            | Modifier::Unset(field)
            | Modifier::Inc(field, _)
            | Modifier::Push(field, _)
            | Modifier::PushAll(field, _)
            | Modifier::Pull(field, _)
            | Modifier::PullAll(field, _)
            | Modifier::AddToSet(field, _)
            | Modifier::Pop(field, _) => field,
        }
    }

    fn apply(&self, record: &mut bson::Document) -> MapperResult<()> {
        match self {
            Modifier::Set(field, value) => {
                record.insert(field.clone(), value.clone());
            }
            Modifier::Unset(field) => {
                record.remove(field);
            }
            Modifier::Inc(field, delta) => {
                let current = record.get(field).cloned().unwrap_or(Bson::Null);
                record.insert(field.clone(), add(field, &current, delta)?);
            }
            Modifier::Push(field, value) => {
                array_mut(record, field)?.push(value.clone());
            }
            Modifier::PushAll(field, values) => {
                array_mut(record, field)?.extend(values.iter().cloned());
            }
            Modifier::Pull(field, value) => {
                if record.contains_key(field) {
                    array_mut(record, field)?.retain(|item| !same_value(item, value));
                }
            }
            Modifier::PullAll(field, values) => {
                if record.contains_key(field) {
                    array_mut(record, field)?
                        .retain(|item| !values.iter().any(|value| same_value(item, value)));
                }
            }
            Modifier::AddToSet(field, values) => {
                let items = array_mut(record, field)?;
                for value in values {
                    if !items.iter().any(|item| same_value(item, value)) {
                        items.push(value.clone());
                    }
                }
            }
            Modifier::Pop(field, count) => {
                if record.contains_key(field) {
                    let items = array_mut(record, field)?;
                    if *count > 0 {
                        items.pop();
                    } else if *count < 0 && !items.is_empty() {
                        items.remove(0);
                    }
                }
            }
        }

        Ok(())
    }
}

/// An ordered set of modifiers applied as one operation.
///
/// # Example
///
/// ```ignore
/// use docmapper::modifier::Update;
///
/// let update = Update::new()
///     .inc("visits", 1)
///     .push("tags", "featured")
///     .unset("draft");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<Modifier>,
}

impl Update {
    pub fn new() -> Self {
        Update::default()
    }

    pub fn with(mut self, modifier: Modifier) -> Self {
        self.ops.push(modifier);
        self
    }

    pub fn set(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.with(Modifier::Set(field.into(), value.into()))
    }

    /// Adds a `Set` for every entry of a document.
    pub fn set_all(self, fields: bson::Document) -> Self {
        fields
            .into_iter()
            .fold(self, |update, (field, value)| update.set(field, value))
    }

    pub fn unset(self, field: impl Into<String>) -> Self {
        self.with(Modifier::Unset(field.into()))
    }

    pub fn inc(self, field: impl Into<String>, delta: impl Into<Bson>) -> Self {
        self.with(Modifier::Inc(field.into(), delta.into()))
    }

    pub fn push(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.with(Modifier::Push(field.into(), value.into()))
    }

    pub fn push_all(self, field: impl Into<String>, values: Vec<Bson>) -> Self {
        self.with(Modifier::PushAll(field.into(), values))
    }

    pub fn pull(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.with(Modifier::Pull(field.into(), value.into()))
    }

    pub fn pull_all(self, field: impl Into<String>, values: Vec<Bson>) -> Self {
        self.with(Modifier::PullAll(field.into(), values))
    }

    pub fn add_to_set(self, field: impl Into<String>, values: Vec<Bson>) -> Self {
        self.with(Modifier::AddToSet(field.into(), values))
    }

    pub fn pop(self, field: impl Into<String>, count: i64) -> Self {
        self.with(Modifier::Pop(field.into(), count))
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Rewrites every modifier, e.g. to resolve aliases and coerce operands.
    pub fn map<F>(self, map: F) -> Self
    where
        F: Fn(Modifier) -> Modifier,
    {
        Update { ops: self.ops.into_iter().map(map).collect() }
    }

    /// Applies every modifier in order.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::InvalidArgument`] when an array operation targets a
    /// non-array field or an increment targets a non-numeric one. The record may be
    /// partially modified in that case; callers apply updates to a copy.
    pub fn apply(&self, record: &mut bson::Document) -> MapperResult<()> {
        for op in &self.ops {
            op.apply(record)?;
        }

        Ok(())
    }
}

/// Options of a find-and-modify request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifyOptions {
    /// Create a record from the query's equality predicates when nothing matches.
    pub upsert: bool,
    /// Return the record after the update instead of before it.
    pub return_new: bool,
}

impl ModifyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    pub fn return_new(mut self) -> Self {
        self.return_new = true;
        self
    }
}

/// A query-plus-update request executed as one indivisible storage operation.
#[derive(Debug, Clone)]
pub struct FindAndModify {
    /// Selects the record; the first match under the query's sort is modified.
    pub query: Query,
    pub update: Update,
    pub options: ModifyOptions,
}

impl FindAndModify {
    pub fn new(query: Query, update: Update, options: ModifyOptions) -> Self {
        Self { query, update, options }
    }
}

fn array_mut<'a>(record: &'a mut bson::Document, field: &str) -> MapperResult<&'a mut Vec<Bson>> {
    if matches!(record.get(field), None | Some(Bson::Null)) {
        record.insert(field.to_string(), Bson::Array(Vec::new()));
    }

    match record.get_mut(field) {
        Some(Bson::Array(items)) => Ok(items),
        _ => Err(MapperError::InvalidArgument(format!("field {field} is not an array"))),
    }
}

fn add(field: &str, current: &Bson, delta: &Bson) -> MapperResult<Bson> {
    let zero = Bson::Int64(0);
    let current = match current {
        Bson::Null => &zero,
        other => other,
    };

    match (as_integer(current), as_integer(delta)) {
        (Some(left), Some(right)) => Ok(Bson::Int64(left.wrapping_add(right))),
        _ => match (as_float(current), as_float(delta)) {
            (Some(left), Some(right)) => Ok(Bson::Double(left + right)),
            _ => Err(MapperError::InvalidArgument(format!("cannot increment non-numeric field {field}"))),
        },
    }
}

fn as_integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(*v as i64),
        Bson::Int64(v) => Some(*v),
        _ => None,
    }
}

fn as_float(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Negates an increment so `decrement(n)` is `inc(-n)`.
pub(crate) fn negate(field: &str, delta: Bson) -> MapperResult<Bson> {
    match delta {
        Bson::Int32(v) => Ok(Bson::Int64(-(v as i64))),
        Bson::Int64(v) => Ok(Bson::Int64(v.wrapping_neg())),
        Bson::Double(v) => Ok(Bson::Double(-v)),
        other => Err(MapperError::InvalidArgument(format!(
            "cannot decrement {field} by non-numeric {other}"
        ))),
    }
}

/// Splits an array operand into its items; any other value is a single item.
pub(crate) fn items_of(value: Bson) -> Vec<Bson> {
    match value {
        Bson::Array(items) => items,
        value => vec![value],
    }
}

/// Equality that treats numbers of different widths as equal.
pub(crate) fn same_value(left: &Bson, right: &Bson) -> bool {
    match (as_float(left), as_float(right)) {
        (Some(left), Some(right)) => left == right,
        _ => left == right,
    }
}
