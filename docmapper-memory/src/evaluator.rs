//! Query expression evaluation for in-memory document filtering.
//!
//! This module provides the evaluation engine for query expressions,
//! enabling filtering and comparison operations on BSON documents.

use std::{collections::HashMap, cmp::Ordering};
use bson::{Bson, datetime::DateTime};

use docmapper_core::{
    query::{QueryVisitor, Expr, FieldOp, Sort, SortDirection},
    error::{MapperError, MapperResult},
};


/// Type-erased, comparable representation of BSON values.
///
/// This enum wraps BSON values and provides comparison operations for
/// filtering queries. It normalizes numeric types to f64 for easy comparison.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// String value
    String(&'a str),
    /// Binary payload, compared bytewise (identities are stored this way)
    Binary(&'a [u8]),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Binary(binary) => Comparable::Binary(&binary.bytes),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            _ => Comparable::Null, // Other types are not comparable
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Binary(a), Comparable::Binary(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::Binary(a), Comparable::Binary(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl<'a> Comparable<'a> {
    /// Total order used for sorting: null and missing values first, then natural
    /// order within a type. Values of unrelated types compare equal.
    fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Ordering::Equal,
            (Comparable::Null, _) => Ordering::Less,
            (_, Comparable::Null) => Ordering::Greater,
            _ => self.partial_cmp(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Whether this value equals `other`, or is an array containing it.
    fn matches(&self, other: &Self) -> bool {
        match self {
            Comparable::Array(items) if !matches!(other, Comparable::Array(_)) => {
                items.iter().any(|item| item == other)
            }
            _ => self == other,
        }
    }
}

/// Resolves a possibly dotted field path inside a record.
pub(crate) fn lookup<'a>(record: &'a bson::Document, path: &str) -> Option<&'a Bson> {
    if let Some(value) = record.get(path) {
        return Some(value);
    }

    let (head, rest) = path.split_once('.')?;
    match record.get(head)? {
        Bson::Document(inner) => lookup(inner, rest),
        _ => None,
    }
}

/// Orders two records by a sort chain, left to right.
pub(crate) fn compare_records(left: &bson::Document, right: &bson::Document, sort: &[Sort]) -> Ordering {
    for key in sort {
        let a = lookup(left, &key.field).map(Comparable::from).unwrap_or(Comparable::Null);
        let b = lookup(right, &key.field).map(Comparable::from).unwrap_or(Comparable::Null);

        let ordering = match key.direction {
            SortDirection::Asc => a.sort_cmp(&b),
            SortDirection::Desc => b.sort_cmp(&a),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}


pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Bson,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Bson) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> MapperResult<bool> {
        self.visit_expr(expr)
    }

    fn record(&self) -> MapperResult<&'a bson::Document> {
        self.document
            .as_document()
            .ok_or_else(|| MapperError::InvalidDocument("stored value is not a document".to_string()))
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = MapperError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(lookup(self.record()?, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let expected = Comparable::from(value);
        let list = match &expected {
            Comparable::Array(items) => items.as_slice(),
            single => std::slice::from_ref(single),
        };

        match lookup(self.record()?, field) {
            Some(field_value) => {
                let actual = Comparable::from(field_value);

                Ok(match op {
                    FieldOp::Eq => actual.matches(&expected),
                    FieldOp::Ne => !actual.matches(&expected),
                    FieldOp::In => list.iter().any(|candidate| actual.matches(candidate)),
                    FieldOp::NotIn => !list.iter().any(|candidate| actual.matches(candidate)),
                    FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                        match actual.partial_cmp(&expected) {
                            Some(ordering) => match op {
                                FieldOp::Gt => ordering == Ordering::Greater,
                                FieldOp::Gte => ordering != Ordering::Less,
                                FieldOp::Lt => ordering == Ordering::Less,
                                _ => ordering != Ordering::Greater,
                            },
                            None => false,
                        }
                    }
                })
            }
            // A missing field behaves like null.
            None => Ok(match op {
                FieldOp::Eq => expected == Comparable::Null,
                FieldOp::Ne => expected != Comparable::Null,
                FieldOp::In => list.contains(&Comparable::Null),
                FieldOp::NotIn => !list.contains(&Comparable::Null),
                _ => false,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docmapper_core::query::Filter;

    fn eval(record: bson::Document, expr: Expr) -> bool {
        DocumentEvaluator::new(&Bson::Document(record))
            .evaluate(&expr)
            .unwrap()
    }

    #[test]
    fn equality_on_arrays_is_membership() {
        let record = doc! { "tags": ["red", "blue"] };
        assert!(eval(record.clone(), Filter::eq("tags", "red")));
        assert!(!eval(record.clone(), Filter::eq("tags", "green")));
        assert!(eval(record, Filter::any_of("tags", ["green", "blue"])));
    }

    #[test]
    fn numbers_compare_across_widths() {
        let record = doc! { "age": 30_i64 };
        assert!(eval(record.clone(), Filter::gte("age", 30)));
        assert!(eval(record.clone(), Filter::lt("age", 30.5)));
        assert!(!eval(record, Filter::gt("age", 30)));
    }

    #[test]
    fn dotted_paths_reach_nested_fields() {
        let record = doc! { "address": { "city": "Oslo" } };
        assert!(eval(record.clone(), Filter::eq("address.city", "Oslo")));
        assert!(eval(record, Filter::exists("address.city")));
    }

    #[test]
    fn missing_fields_behave_like_null() {
        let record = doc! { "name": "a" };
        assert!(eval(record.clone(), Filter::eq("deleted_at", Bson::Null)));
        assert!(eval(record.clone(), Filter::ne("status", "archived")));
        assert!(eval(record.clone(), Filter::none_of("status", ["archived"])));
        assert!(!eval(record, Filter::gt("age", 1)));
    }

    #[test]
    fn sort_chain_puts_nulls_first() {
        let a = doc! { "rank": 2, "name": "b" };
        let b = doc! { "rank": 2, "name": "a" };
        let c = doc! { "name": "c" };
        let sort = [Sort::asc("rank"), Sort::desc("name")];

        assert_eq!(compare_records(&a, &b, &sort), Ordering::Less);
        assert_eq!(compare_records(&c, &a, &sort), Ordering::Less);
    }
}
