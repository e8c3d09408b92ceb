//! Filter expressions.
//!
//! A [`Query`] is a recursive boolean tree over per-field conditions.
//! Queries are built with combinators and compiled to SQL fragments by
//! the [`Builder`](crate::builder::Builder); unknown operator shapes are
//! rejected at compile time, before any I/O.

use crate::eval::Eval;
use crate::value::Value;

/// A filter expression over one table.
///
/// # Example
///
/// ```
/// use strata_core::query::Query;
///
/// let filter = Query::is_in("id", [1i64, 2]).or(Query::eq("flag", true));
/// let filter = filter.and(Query::exists("ts", true)).not();
/// ```
#[derive(Debug, Clone)]
pub enum Query {
    /// Conjunction; empty matches everything.
    And(Vec<Query>),
    /// Disjunction; empty matches nothing.
    Or(Vec<Query>),
    /// Negation.
    Not(Box<Query>),
    /// An eval expression used as a boolean.
    Expr(Eval),
    /// A condition on one field (possibly a dotted JSON path).
    Cond {
        /// Field name or dotted path.
        field: String,
        /// The condition.
        cond: FieldQuery,
    },
}

/// A condition applied to a single field.
#[derive(Debug, Clone)]
pub enum FieldQuery {
    /// Equality; `Eq(Null)` compiles to `IS NULL`.
    Eq(Value),
    /// Inequality; `Ne(Null)` compiles to `IS NOT NULL`.
    Ne(Value),
    /// Strictly greater.
    Gt(Value),
    /// Greater or equal.
    Gte(Value),
    /// Strictly less.
    Lt(Value),
    /// Less or equal.
    Lte(Value),
    /// Membership; the empty list matches nothing.
    In(Vec<Value>),
    /// Non-membership; the empty list matches everything.
    Nin(Vec<Value>),
    /// The field value matches the pattern.
    Regex(String),
    /// Reversed: the given text matches the pattern stored in the field.
    RegexFor(String),
    /// `IS NOT NULL` / `IS NULL`.
    Exists(bool),
    /// `field & v = v`.
    BitsAllSet(i64),
    /// `field & v = 0`.
    BitsAllClear(i64),
    /// `field & v != 0`.
    BitsAnySet(i64),
    /// `field & v != v`.
    BitsAnyClear(i64),
    /// Element containment in a list or JSON array field.
    El(Value),
    /// Element count of a list or JSON array field.
    Size(u64),
    /// Conjunction of conditions on the same field.
    All(Vec<FieldQuery>),
    /// Disjunction of conditions on the same field.
    Any(Vec<FieldQuery>),
    /// Negated condition on the same field.
    Not(Box<FieldQuery>),
}

impl Query {
    /// The empty conjunction: matches every row.
    #[must_use]
    pub fn all() -> Self {
        Self::And(Vec::new())
    }

    /// The empty disjunction: matches no row.
    #[must_use]
    pub fn none() -> Self {
        Self::Or(Vec::new())
    }

    fn cond(field: &str, cond: FieldQuery) -> Self {
        Self::Cond {
            field: field.to_string(),
            cond,
        }
    }

    /// field = value (IS NULL for a null value).
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::cond(field, FieldQuery::Eq(value.into()))
    }

    /// field != value (IS NOT NULL for a null value).
    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self::cond(field, FieldQuery::Ne(value.into()))
    }

    /// field > value.
    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Self::cond(field, FieldQuery::Gt(value.into()))
    }

    /// field >= value.
    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Self::cond(field, FieldQuery::Gte(value.into()))
    }

    /// field < value.
    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::cond(field, FieldQuery::Lt(value.into()))
    }

    /// field <= value.
    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        Self::cond(field, FieldQuery::Lte(value.into()))
    }

    /// field IN (values…). The empty list short-circuits to no match.
    pub fn is_in<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::cond(
            field,
            FieldQuery::In(values.into_iter().map(Into::into).collect()),
        )
    }

    /// field NOT IN (values…).
    pub fn not_in<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::cond(
            field,
            FieldQuery::Nin(values.into_iter().map(Into::into).collect()),
        )
    }

    /// field REGEXP pattern.
    pub fn regex(field: &str, pattern: &str) -> Self {
        Self::cond(field, FieldQuery::Regex(pattern.to_string()))
    }

    /// text REGEXP field; the field holds the pattern.
    pub fn regex_for(field: &str, text: &str) -> Self {
        Self::cond(field, FieldQuery::RegexFor(text.to_string()))
    }

    /// field IS NOT NULL (`true`) or IS NULL (`false`).
    pub fn exists(field: &str, exists: bool) -> Self {
        Self::cond(field, FieldQuery::Exists(exists))
    }

    /// List/JSON element containment.
    pub fn el(field: &str, value: impl Into<Value>) -> Self {
        Self::cond(field, FieldQuery::El(value.into()))
    }

    /// List/JSON element count.
    pub fn size(field: &str, size: u64) -> Self {
        Self::cond(field, FieldQuery::Size(size))
    }

    /// field & mask = mask.
    pub fn bits_all_set(field: &str, mask: i64) -> Self {
        Self::cond(field, FieldQuery::BitsAllSet(mask))
    }

    /// field & mask = 0.
    pub fn bits_all_clear(field: &str, mask: i64) -> Self {
        Self::cond(field, FieldQuery::BitsAllClear(mask))
    }

    /// field & mask != 0.
    pub fn bits_any_set(field: &str, mask: i64) -> Self {
        Self::cond(field, FieldQuery::BitsAnySet(mask))
    }

    /// field & mask != mask.
    pub fn bits_any_clear(field: &str, mask: i64) -> Self {
        Self::cond(field, FieldQuery::BitsAnyClear(mask))
    }

    /// An eval expression used as a boolean filter.
    #[must_use]
    pub fn expr(expr: Eval) -> Self {
        Self::Expr(expr)
    }

    /// Combines with another query using AND.
    #[must_use]
    pub fn and(self, other: Query) -> Query {
        match self {
            Self::And(mut children) => {
                children.push(other);
                Self::And(children)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Combines with another query using OR.
    #[must_use]
    pub fn or(self, other: Query) -> Query {
        match self {
            Self::Or(mut children) => {
                children.push(other);
                Self::Or(children)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// Negates this query.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Query {
        Self::Not(Box::new(self))
    }
}
