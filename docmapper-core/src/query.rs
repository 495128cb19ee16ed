//! Query construction and filtering API.
//!
//! This module holds two layers:
//!
//! - the storage-level request ([`Query`]), a filter [`Expr`] plus sort, limit, skip and
//!   projection, which is what a [`StoreBackend`](crate::backend::StoreBackend) receives;
//! - the [`Criteria`] value, an immutable builder that document queries and scopes are
//!   made of. Every builder method takes `&self` and returns a new value.
//!
//! # Conditions
//!
//! Conditions are written as BSON documents. A key may carry an operator suffix:
//!
//! ```ignore
//! use bson::doc;
//! use docmapper::query::Criteria;
//!
//! let adults = Criteria::new()
//!     .filter(doc! { "age.gte": 18, "status": ["active", "pending"] })
//!     .sort(["name", "age.desc"])
//!     .limit(10);
//! ```
//!
//! Recognised suffixes are `eq`, `ne`, `gt`, `gte`, `lt`, `lte`, `in` and `nin`. An array
//! value without a suffix means set membership. Any other dotted key is treated as a
//! nested field path.
//!
//! # Filter Expression API
//!
//! The [`Filter`] struct builds raw expressions for conditions a condition document
//! cannot express:
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - Membership: `any_of`, `none_of`
//! - Existence: `exists`, `not_exists`
//! - Logical: `and`, `or`

use bson::Bson;

use crate::error::MapperError;

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    pub fn reversed(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// Sort specification for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Sort { field: field.into(), direction: SortDirection::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Sort { field: field.into(), direction: SortDirection::Desc }
    }

    pub fn reversed(&self) -> Self {
        Sort { field: self.field.clone(), direction: self.direction.reversed() }
    }
}

/// Parses `"field"`, `"field.asc"` or `"field.desc"`.
impl From<&str> for Sort {
    fn from(spec: &str) -> Self {
        let spec = spec.trim();
        match spec.rsplit_once('.') {
            Some((field, direction)) if direction.eq_ignore_ascii_case("desc") => Sort::desc(field),
            Some((field, direction)) if direction.eq_ignore_ascii_case("asc") => Sort::asc(field),
            _ => Sort::asc(spec),
        }
    }
}

impl From<String> for Sort {
    fn from(spec: String) -> Self {
        Sort::from(spec.as_str())
    }
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to. An array field matches when it contains the value.
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// The field equals one of the values.
    In,
    /// The field equals none of the values.
    NotIn,
}

impl FieldOp {
    /// Parses an operator suffix used in condition keys.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "eq" => Some(FieldOp::Eq),
            "ne" => Some(FieldOp::Ne),
            "gt" => Some(FieldOp::Gt),
            "gte" => Some(FieldOp::Gte),
            "lt" => Some(FieldOp::Lt),
            "lte" => Some(FieldOp::Lte),
            "in" => Some(FieldOp::In),
            "nin" => Some(FieldOp::NotIn),
            _ => None,
        }
    }

    /// Whether the operand is a list of values rather than a single value.
    pub fn takes_list(self) -> bool {
        matches!(self, FieldOp::In | FieldOp::NotIn)
    }
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex filter predicates.
///
/// # Example
///
/// ```ignore
/// use docmapper::query::{Expr, Filter};
///
/// let expr = Filter::and(vec![
///     Filter::eq("status", "active"),
///     Filter::gt("age", 18),
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field name (or dotted path) to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Collects the equality predicates reachable through top-level ANDs.
    ///
    /// Used to seed a new record when an upsert matches nothing.
    pub fn equalities(&self) -> Vec<(&str, &Bson)> {
        match self {
            Expr::Field { field, op: FieldOp::Eq, value } => vec![(field.as_str(), value)],
            Expr::And(exprs) => exprs
                .iter()
                .flat_map(Expr::equalities)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Folds a list of expressions into a single AND, if there is anything to fold.
    pub fn all(mut exprs: Vec<Expr>) -> Option<Expr> {
        match exprs.len() {
            0 => None,
            1 => exprs.pop(),
            _ => Some(Expr::And(exprs)),
        }
    }
}

/// Parses one condition entry into a field expression.
///
/// `"age.gt" => 21` becomes `age > 21`; an array value without an operator becomes
/// set membership; a list operator given a scalar wraps it into a one-element list.
pub fn parse_condition(key: &str, value: Bson) -> Expr {
    let (field, op) = match key.rsplit_once('.') {
        Some((field, suffix)) => match FieldOp::from_suffix(suffix) {
            Some(op) => (field, Some(op)),
            None => (key, None),
        },
        None => (key, None),
    };

    let op = op.unwrap_or(match value {
        Bson::Array(_) => FieldOp::In,
        _ => FieldOp::Eq,
    });

    let value = match (op.takes_list(), value) {
        (true, Bson::Array(items)) => Bson::Array(items),
        (true, single) => Bson::Array(vec![single]),
        (false, value) => value,
    };

    Expr::field(field.to_string(), op, value)
}

/// Field projection applied to returned records.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Only these fields (the identity key is always kept).
    Include(Vec<String>),
    /// Every field except these.
    Exclude(Vec<String>),
}

impl Projection {
    /// Applies the projection to a stored record.
    pub fn apply(&self, record: bson::Document) -> bson::Document {
        match self {
            Projection::Include(fields) => record
                .into_iter()
                .filter(|(key, _)| key == crate::keys::ID_KEY || fields.contains(key))
                .collect(),
            Projection::Exclude(fields) => record
                .into_iter()
                .filter(|(key, _)| !fields.contains(key))
                .collect(),
        }
    }
}

/// A structured query as handed to a storage backend.
///
/// Use [`QueryBuilder`] for ergonomic construction, or compile one from [`Criteria`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Optional filter expression to match documents.
    pub filter: Option<Expr>,
    /// Sort chain, evaluated left to right.
    pub sort: Vec<Sort>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Number of documents to skip (for pagination).
    pub offset: Option<usize>,
    /// Optional field projection.
    pub projection: Option<Projection>,
}

impl Query {
    /// Creates a new empty query with no filters or limits.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }
}

/// Helper struct for constructing filter expressions.
///
/// # Example
///
/// ```ignore
/// use docmapper::query::Filter;
///
/// let expr = Filter::eq("name", "Alice")
///     .and(Filter::gt("age", 18));
/// ```
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the field equals any of the values.
    pub fn any_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Bson>>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::In,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Matches documents where the field equals none of the values.
    pub fn none_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Bson>>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::NotIn,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Matches documents where the field is present.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field is missing.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Sets the filter expression for this query.
    ///
    /// # Arguments
    ///
    /// * `filter` - The filter expression to apply
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Sets the number of documents to skip.
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Appends a sort key to the sort chain.
    ///
    /// # Arguments
    ///
    /// * `field` - The field name to sort by
    /// * `direction` - The sort direction (ascending or descending)
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort { field: field.into(), direction });
        self
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.query.projection = Some(projection);
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

/// An immutable, composable query value.
///
/// Filters AND-combine across calls. A scope or an association contributes a
/// `Criteria` that is merged into the caller's.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    filters: Vec<Expr>,
    sort: Vec<Sort>,
    limit: Option<usize>,
    skip: Option<usize>,
    projection: Option<Projection>,
}

impl Criteria {
    pub fn new() -> Self {
        Criteria::default()
    }

    /// Adds conditions written as a BSON document.
    pub fn filter(&self, conditions: bson::Document) -> Self {
        let mut next = self.clone();
        next.filters.extend(
            conditions
                .into_iter()
                .map(|(key, value)| parse_condition(&key, value)),
        );
        next
    }

    /// Alias of [`Criteria::filter`].
    pub fn where_(&self, conditions: bson::Document) -> Self {
        self.filter(conditions)
    }

    /// Adds a raw filter expression.
    pub fn filter_expr(&self, expr: Expr) -> Self {
        let mut next = self.clone();
        next.filters.push(expr);
        next
    }

    /// Appends sort keys. Each key is `"field"`, `"field.asc"`, `"field.desc"` or a [`Sort`].
    pub fn sort<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Sort>,
    {
        let mut next = self.clone();
        next.sort.extend(fields.into_iter().map(Into::into));
        next
    }

    /// Alias of [`Criteria::sort`].
    pub fn order<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Sort>,
    {
        self.sort(fields)
    }

    /// Inverts every sort direction.
    pub fn reverse(&self) -> Self {
        let mut next = self.clone();
        next.sort = self.sort.iter().map(Sort::reversed).collect();
        next
    }

    pub fn limit(&self, limit: usize) -> Self {
        let mut next = self.clone();
        next.limit = Some(limit);
        next
    }

    pub fn skip(&self, skip: usize) -> Self {
        let mut next = self.clone();
        next.skip = Some(skip);
        next
    }

    /// Alias of [`Criteria::skip`].
    pub fn offset(&self, offset: usize) -> Self {
        self.skip(offset)
    }

    /// Restricts returned records to these fields.
    pub fn fields<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.projection = Some(Projection::Include(names.into_iter().map(Into::into).collect()));
        next
    }

    /// Alias of [`Criteria::fields`].
    pub fn only<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields(names)
    }

    /// Drops these fields from returned records.
    pub fn ignore<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.projection = Some(Projection::Exclude(names.into_iter().map(Into::into).collect()));
        next
    }

    /// Merges another criteria into this one.
    ///
    /// Filters and sort keys are appended; `other`'s limit, skip and projection win
    /// when set.
    pub fn merge(&self, other: &Criteria) -> Self {
        let mut next = self.clone();
        next.filters.extend(other.filters.iter().cloned());
        next.sort.extend(other.sort.iter().cloned());
        next.limit = other.limit.or(self.limit);
        next.skip = other.skip.or(self.skip);
        next.projection = other.projection.clone().or_else(|| self.projection.clone());
        next
    }

    pub fn filters(&self) -> &[Expr] {
        &self.filters
    }

    pub fn sorts(&self) -> &[Sort] {
        &self.sort
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn skip_value(&self) -> Option<usize> {
        self.skip
    }

    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    /// Rewrites every field predicate, e.g. to resolve aliases and coerce values.
    pub fn map_fields<F>(&self, map: F) -> Self
    where
        F: Fn(&str, FieldOp, Bson) -> (String, Bson),
    {
        fn rewrite<F>(expr: &Expr, map: &F) -> Expr
        where
            F: Fn(&str, FieldOp, Bson) -> (String, Bson),
        {
            match expr {
                Expr::And(exprs) => Expr::And(exprs.iter().map(|e| rewrite(e, map)).collect()),
                Expr::Or(exprs) => Expr::Or(exprs.iter().map(|e| rewrite(e, map)).collect()),
                Expr::Not(inner) => Expr::Not(Box::new(rewrite(inner, map))),
                Expr::Exists(field, should_exist) => Expr::Exists(field.clone(), *should_exist),
                Expr::Field { field, op, value } => {
                    let (field, value) = map(field, *op, value.clone());
                    Expr::Field { field, op: *op, value }
                }
            }
        }

        let mut next = self.clone();
        next.filters = self.filters.iter().map(|expr| rewrite(expr, &map)).collect();
        next
    }

    /// Compiles this criteria into a storage-level query.
    pub fn to_query(&self) -> Query {
        Query {
            filter: Expr::all(self.filters.clone()),
            sort: self.sort.clone(),
            limit: self.limit,
            offset: self.skip,
            projection: self.projection.clone(),
        }
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<MapperError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}
