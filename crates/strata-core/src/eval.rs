//! Evaluation expressions.
//!
//! An [`Eval`] is a typed expression tree over row fields: arithmetic,
//! comparison, string and branching operators, plus aggregations. The
//! [`Builder`](crate::builder::Builder) compiles it to a SQL fragment;
//! [`Eval::evaluate`] interprets it in memory against one row, which is
//! how the embedded driver computes per-row update values.

use crate::error::{Result, StrataError};
use crate::value::{Object, Value};

/// A reference to a field, optionally qualified with a table alias.
/// Dotted paths target sub-documents of JSON columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    /// Table alias from the selection's table map, if any.
    pub table: Option<String>,
    /// Field name or dotted path.
    pub path: String,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal (=)
    Eq,
    /// Not equal (!=)
    Ne,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Gte,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Lte,
}

impl CompareOp {
    /// Returns the SQL representation of the operator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// Arithmetic operators over a variadic operand list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// Sum of operands.
    Add,
    /// Product of operands.
    Multiply,
    /// Left-fold subtraction.
    Subtract,
    /// Left-fold division.
    Divide,
}

impl ArithOp {
    /// Returns the SQL representation of the operator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Multiply => "*",
            Self::Subtract => "-",
            Self::Divide => "/",
        }
    }
}

/// Aggregation operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggrOp {
    /// Sum; null on no rows is coalesced to 0.
    Sum,
    /// Mean.
    Avg,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Distinct non-null count.
    Count,
}

/// An evaluation expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Eval {
    /// A literal value.
    Literal(Value),
    /// A field path accessor.
    Field(FieldRef),
    /// Variadic arithmetic.
    Arith {
        /// Operator.
        op: ArithOp,
        /// Operands, at least one.
        args: Vec<Eval>,
    },
    /// Binary comparison.
    Binary {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        lhs: Box<Eval>,
        /// Right operand.
        rhs: Box<Eval>,
    },
    /// Logical conjunction.
    And(Vec<Eval>),
    /// Logical disjunction.
    Or(Vec<Eval>),
    /// Logical negation.
    Not(Box<Eval>),
    /// String concatenation.
    Concat(Vec<Eval>),
    /// Conditional branch.
    If {
        /// Condition.
        cond: Box<Eval>,
        /// Result when the condition is truthy.
        then: Box<Eval>,
        /// Result otherwise.
        otherwise: Box<Eval>,
    },
    /// First non-null operand.
    IfNull(Vec<Eval>),
    /// Aggregation over rows (in a group) or over the elements of a
    /// list/JSON array value (outside a group).
    Aggr {
        /// Operator.
        op: AggrOp,
        /// Aggregated expression.
        expr: Box<Eval>,
    },
    /// Element count of a list/JSON value, or character length of text.
    Length(Box<Eval>),
}

/// References the named field of the selection's own table.
#[must_use]
pub fn field(path: &str) -> Eval {
    Eval::Field(FieldRef {
        table: None,
        path: path.to_string(),
    })
}

/// References a field through a table alias declared in the selection.
#[must_use]
pub fn field_of(table: &str, path: &str) -> Eval {
    Eval::Field(FieldRef {
        table: Some(table.to_string()),
        path: path.to_string(),
    })
}

/// A literal operand.
pub fn lit(value: impl Into<Value>) -> Eval {
    Eval::Literal(value.into())
}

/// Sum of the operands.
#[must_use]
pub fn add(args: Vec<Eval>) -> Eval {
    Eval::Arith {
        op: ArithOp::Add,
        args,
    }
}

/// Product of the operands.
#[must_use]
pub fn multiply(args: Vec<Eval>) -> Eval {
    Eval::Arith {
        op: ArithOp::Multiply,
        args,
    }
}

/// Left-fold subtraction.
#[must_use]
pub fn subtract(args: Vec<Eval>) -> Eval {
    Eval::Arith {
        op: ArithOp::Subtract,
        args,
    }
}

/// Left-fold division.
#[must_use]
pub fn divide(args: Vec<Eval>) -> Eval {
    Eval::Arith {
        op: ArithOp::Divide,
        args,
    }
}

/// Binary comparison.
#[must_use]
pub fn compare(op: CompareOp, lhs: Eval, rhs: Eval) -> Eval {
    Eval::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

/// String concatenation.
#[must_use]
pub fn concat(args: Vec<Eval>) -> Eval {
    Eval::Concat(args)
}

/// Conditional branch.
#[must_use]
pub fn if_else(cond: Eval, then: Eval, otherwise: Eval) -> Eval {
    Eval::If {
        cond: Box::new(cond),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    }
}

/// First non-null operand.
#[must_use]
pub fn if_null(args: Vec<Eval>) -> Eval {
    Eval::IfNull(args)
}

/// Aggregating sum over the named field.
#[must_use]
pub fn sum(expr: Eval) -> Eval {
    aggr(AggrOp::Sum, expr)
}

/// Aggregating mean.
#[must_use]
pub fn avg(expr: Eval) -> Eval {
    aggr(AggrOp::Avg, expr)
}

/// Aggregating minimum.
#[must_use]
pub fn min(expr: Eval) -> Eval {
    aggr(AggrOp::Min, expr)
}

/// Aggregating maximum.
#[must_use]
pub fn max(expr: Eval) -> Eval {
    aggr(AggrOp::Max, expr)
}

/// Distinct non-null count.
#[must_use]
pub fn count(expr: Eval) -> Eval {
    aggr(AggrOp::Count, expr)
}

/// Element count / character length.
#[must_use]
pub fn length(expr: Eval) -> Eval {
    Eval::Length(Box::new(expr))
}

fn aggr(op: AggrOp, expr: Eval) -> Eval {
    Eval::Aggr {
        op,
        expr: Box::new(expr),
    }
}

impl Eval {
    /// Interprets the expression against one row of semantic values.
    ///
    /// Field references resolve against `row`; aggregations apply to the
    /// elements of a list or JSON array value. This mirrors the SQL
    /// emission closely enough that the embedded driver can compute
    /// per-row update values without a round-trip.
    pub fn evaluate(&self, row: &Object) -> Result<Value> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Field(field_ref) => Ok(lookup(row, &field_ref.path)),
            Self::Arith { op, args } => arith(*op, args, row),
            Self::Binary { op, lhs, rhs } => {
                let lhs = lhs.evaluate(row)?;
                let rhs = rhs.evaluate(row)?;
                Ok(Value::Bool(compare_values(*op, &lhs, &rhs)))
            }
            Self::And(args) => {
                for arg in args {
                    if !arg.evaluate(row)?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Self::Or(args) => {
                for arg in args {
                    if arg.evaluate(row)?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Self::Not(arg) => Ok(Value::Bool(!arg.evaluate(row)?.is_truthy())),
            Self::Concat(args) => {
                let mut out = String::new();
                for arg in args {
                    match arg.evaluate(row)? {
                        Value::Null => return Ok(Value::Null),
                        value => out.push_str(&stringify(&value)),
                    }
                }
                Ok(Value::Text(out))
            }
            Self::If {
                cond,
                then,
                otherwise,
            } => {
                if cond.evaluate(row)?.is_truthy() {
                    then.evaluate(row)
                } else {
                    otherwise.evaluate(row)
                }
            }
            Self::IfNull(args) => {
                for arg in args {
                    let value = arg.evaluate(row)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
            Self::Aggr { op, expr } => aggregate(*op, &expr.evaluate(row)?),
            Self::Length(expr) => Ok(match expr.evaluate(row)? {
                Value::List(items) => Value::UInt(items.len() as u64),
                Value::Json(serde_json::Value::Array(items)) => Value::UInt(items.len() as u64),
                Value::Text(s) => Value::UInt(s.chars().count() as u64),
                Value::Null => Value::Null,
                other => {
                    return Err(StrataError::QueryMalformed(format!(
                        "length over a non-sequence value: {other:?}"
                    )))
                }
            }),
        }
    }
}

fn lookup(row: &Object, path: &str) -> Value {
    if let Some(value) = row.get(path) {
        return value.clone();
    }
    // Dotted path into a JSON field.
    let mut end = path.len();
    while let Some(dot) = path[..end].rfind('.') {
        if let Some(Value::Json(tree)) = row.get(&path[..dot]) {
            let mut node = tree;
            for part in path[dot + 1..].split('.') {
                match node.get(part) {
                    Some(next) => node = next,
                    None => return Value::Null,
                }
            }
            return Value::Json(node.clone());
        }
        end = dot;
    }
    Value::Null
}

fn arith(op: ArithOp, args: &[Eval], row: &Object) -> Result<Value> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        let value = arg.evaluate(row)?;
        match value.as_f64() {
            Some(n) => values.push(n),
            None if value.is_null() => values.push(0.0),
            None => {
                return Err(StrataError::QueryMalformed(format!(
                    "arithmetic over a non-numeric value: {value:?}"
                )))
            }
        }
    }
    let Some((&first, rest)) = values.split_first() else {
        return Ok(Value::Int(0));
    };
    let result = match op {
        ArithOp::Add => values.iter().sum(),
        ArithOp::Multiply => values.iter().product(),
        ArithOp::Subtract => rest.iter().fold(first, |acc, v| acc - v),
        ArithOp::Divide => rest.iter().fold(first, |acc, v| acc / v),
    };
    if result.fract() == 0.0 && result.abs() < i64::MAX as f64 && op != ArithOp::Divide {
        Ok(Value::Int(result as i64))
    } else {
        Ok(Value::Float(result))
    }
}

fn compare_values(op: CompareOp, lhs: &Value, rhs: &Value) -> bool {
    use std::cmp::Ordering;
    let ordering = match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (lhs, rhs) {
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };
    match (op, ordering) {
        (CompareOp::Eq, Some(Ordering::Equal)) => true,
        (CompareOp::Ne, Some(o)) => o != Ordering::Equal,
        (CompareOp::Ne, None) => lhs != rhs,
        (CompareOp::Eq, None) => lhs == rhs,
        (CompareOp::Gt, Some(Ordering::Greater)) => true,
        (CompareOp::Gte, Some(Ordering::Greater | Ordering::Equal)) => true,
        (CompareOp::Lt, Some(Ordering::Less)) => true,
        (CompareOp::Lte, Some(Ordering::Less | Ordering::Equal)) => true,
        _ => false,
    }
}

fn aggregate(op: AggrOp, value: &Value) -> Result<Value> {
    let items: Vec<Value> = match value {
        Value::List(items) => items.iter().map(|s| Value::Text(s.clone())).collect(),
        Value::Json(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                serde_json::Value::Null => Value::Null,
                serde_json::Value::Bool(b) => Value::Bool(*b),
                serde_json::Value::Number(n) => n
                    .as_i64()
                    .map(Value::Int)
                    .or_else(|| n.as_f64().map(Value::Float))
                    .unwrap_or(Value::Null),
                serde_json::Value::String(s) => Value::Text(s.clone()),
                other => Value::Json(other.clone()),
            })
            .collect(),
        Value::Null => Vec::new(),
        scalar => vec![scalar.clone()],
    };
    let numbers: Vec<f64> = items
        .iter()
        .filter_map(|v| {
            v.as_f64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
        .collect();
    Ok(match op {
        AggrOp::Sum => Value::Float(numbers.iter().sum()),
        AggrOp::Avg => {
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        AggrOp::Min => numbers
            .iter()
            .copied()
            .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.min(v))))
            .map_or(Value::Null, Value::Float),
        AggrOp::Max => numbers
            .iter()
            .copied()
            .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))))
            .map_or(Value::Null, Value::Float),
        AggrOp::Count => {
            let mut seen = Vec::new();
            for item in items.iter().filter(|v| !v.is_null()) {
                if !seen.iter().any(|s: &Value| s.loose_eq(item)) {
                    seen.push(item.clone());
                }
            }
            Value::UInt(seen.len() as u64)
        }
    })
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        Value::Bool(b) => String::from(if *b { "1" } else { "0" }),
        Value::Int(n) => n.to_string(),
        Value::UInt(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::List(items) => items.join(","),
        Value::Json(v) => v.to_string(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Time(t) => t.format("%H:%M:%S").to_string(),
        Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        Value::Null => String::new(),
    }
}
