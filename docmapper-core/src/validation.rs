//! The validation collaborator seam.
//!
//! The mapping layer does not ship a rule language. A schema carries any number of
//! [`Validator`]s; saving asks each of them for errors and refuses to write when any
//! are returned. Keys declared `required` add a presence check ahead of them.

use std::{collections::BTreeMap, fmt};

use crate::document::Document;

/// Message attached to a required key with a blank value.
pub const BLANK_MESSAGE: &str = "can't be blank";

/// The persistence operation a validation runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationContext {
    Create,
    Update,
}

/// Error messages grouped by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Messages attached to a field.
    pub fn on(&self, field: &str) -> &[String] {
        self.errors
            .get(field)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, messages) in other.errors {
            self.errors
                .entry(field)
                .or_default()
                .extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of messages across all fields.
    pub fn len(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    /// `"field message"` strings, ordered by field.
    pub fn full_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .flat_map(|(field, messages)| {
                messages
                    .iter()
                    .map(move |message| format!("{field} {message}"))
            })
            .collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_messages().join(", "))
    }
}

/// Decides whether a document may be persisted.
pub trait Validator: Send + Sync {
    fn validate(&self, document: &Document, context: ValidationContext) -> ValidationErrors;
}

impl<F> Validator for F
where
    F: Fn(&Document, ValidationContext) -> ValidationErrors + Send + Sync,
{
    fn validate(&self, document: &Document, context: ValidationContext) -> ValidationErrors {
        self(document, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_group_by_field() {
        let mut errors = ValidationErrors::new();
        errors.add("status", "is not included in the list");
        errors.add("name", BLANK_MESSAGE);

        assert_eq!(errors.on("status"), ["is not included in the list"]);
        assert!(errors.on("age").is_empty());
        assert_eq!(errors.to_string(), "name can't be blank, status is not included in the list");
    }

    #[test]
    fn merge_appends() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "is too short");

        let mut other = ValidationErrors::new();
        other.add("name", BLANK_MESSAGE);
        errors.merge(other);

        assert_eq!(errors.len(), 2);
    }
}
