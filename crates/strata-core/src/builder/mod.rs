//! The query compiler.
//!
//! [`Builder`] turns [`Query`] and [`Eval`] trees into SQL fragments and
//! whole statements for one [`Selection`]. It is dialect-neutral; the
//! per-backend differences live behind the [`Dialect`] trait.
//!
//! Compilation is pure: a `"0"` filter short-circuits to `None` from the
//! statement constructors and the drivers never reach the database.

mod dialect;

pub use dialect::{aggregate_sql, json_path, unmappable, Dialect, GenericDialect};

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::{Result, StrataError};
use crate::eval::{Eval, FieldRef};
use crate::field::FieldType;
use crate::model::{to_json, Model};
use crate::query::{FieldQuery, Query};
use crate::selection::Selection;
use crate::value::{Row, Value};

/// How a compiled fragment's result is represented in storage, which
/// decides how drivers post-process loaded values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlKind {
    /// Plain scalar.
    #[default]
    Raw,
    /// Serialized JSON text.
    Json,
    /// Comma-joined list text.
    List,
}

/// Transient compilation state, threaded explicitly through the
/// recursive compile calls. Private to one compilation.
#[derive(Debug, Default)]
pub struct BuildState {
    /// Whether the expression compiles inside a grouping context, where
    /// aggregations emit plain SQL aggregates.
    pub group: bool,
    /// Kind of the most recently compiled sub-expression.
    pub sql_type: SqlKind,
    /// Kind per projected output column.
    pub sql_types: HashMap<String, SqlKind>,
    alias_seq: u32,
}

impl BuildState {
    /// Fresh state for one compilation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh state that compiles in a grouping context.
    #[must_use]
    pub fn grouped() -> Self {
        Self {
            group: true,
            ..Self::default()
        }
    }

    fn next_alias(&mut self) -> String {
        self.alias_seq += 1;
        format!("_j{}", self.alias_seq)
    }
}

/// Joins filter fragments conjunctively with constant folding:
/// the empty list is `"1"`, any `"0"` member collapses the whole term.
#[must_use]
pub fn logical_and(terms: Vec<String>) -> String {
    if terms.is_empty() {
        return String::from("1");
    }
    if terms.iter().any(|t| t == "0") {
        return String::from("0");
    }
    terms.join(" AND ")
}

/// Joins filter fragments disjunctively with constant folding:
/// the empty list is `"0"`, any `"1"` member collapses the whole term.
#[must_use]
pub fn logical_or(terms: Vec<String>) -> String {
    if terms.is_empty() {
        return String::from("0");
    }
    if terms.iter().any(|t| t == "1") {
        return String::from("1");
    }
    format!("({})", terms.join(" OR "))
}

/// Negates a filter fragment.
#[must_use]
pub fn logical_not(term: &str) -> String {
    match term {
        "0" => String::from("1"),
        "1" => String::from("0"),
        _ => format!("NOT({term})"),
    }
}

/// A resolved field key: the raw column or JSON-extract expression plus
/// what it holds.
struct Key {
    sql: String,
    ty: FieldType,
    extracted: bool,
}

impl Key {
    /// The key as a comparable scalar (extracted JSON gets unquoted).
    fn scalar(&self, dialect: &dyn Dialect) -> String {
        if self.extracted {
            dialect.json_unquote(&self.sql)
        } else {
            self.sql.clone()
        }
    }
}

/// Compiles queries, expressions, and statements for one selection.
pub struct Builder<'a> {
    dialect: &'a dyn Dialect,
    selection: &'a Selection,
}

impl<'a> Builder<'a> {
    /// Creates a builder over a selection.
    #[must_use]
    pub fn new(dialect: &'a dyn Dialect, selection: &'a Selection) -> Self {
        Self { dialect, selection }
    }

    fn model(&self) -> &Model {
        &self.selection.model
    }

    /// Resolves a possibly dotted, possibly alias-qualified field path to
    /// its SQL key.
    fn resolve_key(&self, alias: Option<&str>, path: &str) -> Result<Key> {
        let (model, qualifier): (&Model, Option<&str>) = match alias {
            Some(alias) if alias != self.selection.table => {
                let model = self
                    .selection
                    .tables
                    .get(alias)
                    .ok_or_else(|| StrataError::UnknownTable(alias.to_string()))?;
                (model.as_ref(), Some(alias))
            }
            _ => (self.model(), None),
        };
        let (root, sub) = model
            .resolve_field(path)
            .ok_or_else(|| StrataError::UnknownField(format!("{}.{path}", model.name)))?;
        let column = match qualifier {
            Some(alias) => self.dialect.escape_id(&format!("{alias}.{root}")),
            None => self.dialect.escape_id(root),
        };
        if sub.is_empty() {
            Ok(Key {
                sql: column,
                ty: model.fields[root].ty,
                extracted: false,
            })
        } else {
            Ok(Key {
                sql: self.dialect.json_extract(&column, &json_path(sub)),
                ty: FieldType::Json,
                extracted: true,
            })
        }
    }

    fn kind_of(ty: FieldType) -> SqlKind {
        match ty {
            FieldType::Json => SqlKind::Json,
            FieldType::List => SqlKind::List,
            _ => SqlKind::Raw,
        }
    }

    /// Compiles a filter to a SQL fragment.
    pub fn parse_query(&self, query: &Query, state: &mut BuildState) -> Result<String> {
        match query {
            Query::And(children) => {
                let terms = children
                    .iter()
                    .map(|child| self.parse_query(child, state))
                    .collect::<Result<Vec<_>>>()?;
                Ok(logical_and(terms))
            }
            Query::Or(children) => {
                let terms = children
                    .iter()
                    .map(|child| self.parse_query(child, state))
                    .collect::<Result<Vec<_>>>()?;
                Ok(logical_or(terms))
            }
            Query::Not(child) => Ok(logical_not(&self.parse_query(child, state)?)),
            Query::Expr(expr) => self.parse_eval(expr, state),
            Query::Cond { field, cond } => {
                let key = self.resolve_key(None, field)?;
                self.parse_field_query(&key, cond, state)
            }
        }
    }

    fn parse_field_query(
        &self,
        key: &Key,
        cond: &FieldQuery,
        state: &mut BuildState,
    ) -> Result<String> {
        let d = self.dialect;
        let k = key.scalar(d);
        let meta = None;
        Ok(match cond {
            FieldQuery::Eq(Value::Null) => format!("{k} IS NULL"),
            FieldQuery::Eq(value) => format!("{k} = {}", d.escape_value(value, meta)),
            FieldQuery::Ne(Value::Null) => format!("{k} IS NOT NULL"),
            FieldQuery::Ne(value) => format!("{k} != {}", d.escape_value(value, meta)),
            FieldQuery::Gt(value) => format!("{k} > {}", d.escape_value(value, meta)),
            FieldQuery::Gte(value) => format!("{k} >= {}", d.escape_value(value, meta)),
            FieldQuery::Lt(value) => format!("{k} < {}", d.escape_value(value, meta)),
            FieldQuery::Lte(value) => format!("{k} <= {}", d.escape_value(value, meta)),
            FieldQuery::In(values) if values.is_empty() => String::from("0"),
            FieldQuery::In(values) => {
                let list = values
                    .iter()
                    .map(|v| d.escape_value(v, meta))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{k} IN ({list})")
            }
            FieldQuery::Nin(values) if values.is_empty() => String::from("1"),
            FieldQuery::Nin(values) => {
                let list = values
                    .iter()
                    .map(|v| d.escape_value(v, meta))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{k} NOT IN ({list})")
            }
            FieldQuery::Regex(pattern) => {
                format!("{k} REGEXP '{}'", d.escape_string(pattern))
            }
            FieldQuery::RegexFor(text) => {
                format!("'{}' REGEXP {k}", d.escape_string(text))
            }
            FieldQuery::Exists(true) => format!("{k} IS NOT NULL"),
            FieldQuery::Exists(false) => format!("{k} IS NULL"),
            FieldQuery::BitsAllSet(mask) => format!("{k} & {mask} = {mask}"),
            FieldQuery::BitsAllClear(mask) => format!("{k} & {mask} = 0"),
            FieldQuery::BitsAnySet(mask) => format!("{k} & {mask} != 0"),
            FieldQuery::BitsAnyClear(mask) => format!("{k} & {mask} != {mask}"),
            FieldQuery::El(value) => self.element_query(key, value)?,
            FieldQuery::Size(0) => logical_not(&k),
            FieldQuery::Size(size) => match Self::kind_of(key.ty) {
                SqlKind::Json => format!("{} = {size}", d.json_length(&key.sql)),
                SqlKind::List => {
                    let comma = d.escape_value(&Value::Text(",".into()), None);
                    let empty = d.escape_value(&Value::Text(String::new()), None);
                    format!(
                        "{k} AND length({k}) - length(replace({k}, {comma}, {empty})) = {}",
                        size - 1
                    )
                }
                SqlKind::Raw => {
                    return Err(StrataError::QueryMalformed(format!(
                        "$size on a non-sequence field of type {:?}",
                        key.ty
                    )))
                }
            },
            FieldQuery::All(children) => {
                let terms = children
                    .iter()
                    .map(|child| self.parse_field_query(key, child, state))
                    .collect::<Result<Vec<_>>>()?;
                logical_and(terms)
            }
            FieldQuery::Any(children) => {
                let terms = children
                    .iter()
                    .map(|child| self.parse_field_query(key, child, state))
                    .collect::<Result<Vec<_>>>()?;
                logical_or(terms)
            }
            FieldQuery::Not(child) => logical_not(&self.parse_field_query(key, child, state)?),
        })
    }

    /// `$el`: JSON containment for json fields, comma-boundary LIKE for
    /// list fields.
    fn element_query(&self, key: &Key, value: &Value) -> Result<String> {
        let d = self.dialect;
        match Self::kind_of(key.ty) {
            SqlKind::Json => {
                let serialized = to_json(value)?.to_string();
                let candidate = format!("'{}'", d.escape_string(&serialized));
                Ok(d.json_contains(&key.sql, &candidate))
            }
            SqlKind::List => {
                let element = match value {
                    Value::Text(s) => s.clone(),
                    Value::Int(n) => n.to_string(),
                    Value::UInt(n) => n.to_string(),
                    _ => {
                        return Err(StrataError::QueryMalformed(
                            "$el on a list field requires a scalar element".into(),
                        ))
                    }
                };
                let wrapped = d.concat(&[
                    d.escape_value(&Value::Text(",".into()), None),
                    key.sql.clone(),
                    d.escape_value(&Value::Text(",".into()), None),
                ]);
                let pattern = d.escape_value(&Value::Text(format!("%,{element},%")), None);
                Ok(format!("{wrapped} LIKE {pattern}"))
            }
            SqlKind::Raw => Err(StrataError::QueryMalformed(format!(
                "$el on a non-sequence field of type {:?}",
                key.ty
            ))),
        }
    }

    /// Compiles an eval expression to a SQL fragment, recording its
    /// [`SqlKind`] in `state.sql_type`.
    pub fn parse_eval(&self, expr: &Eval, state: &mut BuildState) -> Result<String> {
        let d = self.dialect;
        match expr {
            Eval::Literal(value) => {
                state.sql_type = match value {
                    Value::Json(_) => SqlKind::Json,
                    Value::List(_) => SqlKind::List,
                    _ => SqlKind::Raw,
                };
                Ok(d.escape_value(value, None))
            }
            Eval::Field(FieldRef { table, path }) => {
                let key = self.resolve_key(table.as_deref(), path)?;
                state.sql_type = if key.extracted {
                    SqlKind::Json
                } else {
                    Self::kind_of(key.ty)
                };
                Ok(key.scalar(d))
            }
            Eval::Arith { op, args } => {
                let parts = self.parse_all(args, state)?;
                state.sql_type = SqlKind::Raw;
                Ok(format!("({})", parts.join(&format!(" {} ", op.as_str()))))
            }
            Eval::Binary { op, lhs, rhs } => {
                let lhs = self.parse_eval(lhs, state)?;
                let rhs = self.parse_eval(rhs, state)?;
                state.sql_type = SqlKind::Raw;
                Ok(format!("({lhs} {} {rhs})", op.as_str()))
            }
            Eval::And(args) => {
                let parts = self.parse_all(args, state)?;
                state.sql_type = SqlKind::Raw;
                Ok(format!("({})", parts.join(" AND ")))
            }
            Eval::Or(args) => {
                let parts = self.parse_all(args, state)?;
                state.sql_type = SqlKind::Raw;
                Ok(format!("({})", parts.join(" OR ")))
            }
            Eval::Not(arg) => {
                let inner = self.parse_eval(arg, state)?;
                state.sql_type = SqlKind::Raw;
                Ok(format!("NOT({inner})"))
            }
            Eval::Concat(args) => {
                let parts = self.parse_all(args, state)?;
                state.sql_type = SqlKind::Raw;
                Ok(d.concat(&parts))
            }
            Eval::If {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.parse_eval(cond, state)?;
                let then = self.parse_eval(then, state)?;
                let otherwise = self.parse_eval(otherwise, state)?;
                state.sql_type = SqlKind::Raw;
                Ok(d.if_expr(&cond, &then, &otherwise))
            }
            Eval::IfNull(args) => {
                let parts = self.parse_all(args, state)?;
                let mut iter = parts.into_iter().rev();
                let mut acc = iter.next().ok_or_else(|| {
                    StrataError::QueryMalformed("$ifNull requires at least one operand".into())
                })?;
                for part in iter {
                    acc = format!("ifnull({part}, {acc})");
                }
                Ok(acc)
            }
            Eval::Aggr { op, expr } => {
                if state.group {
                    let was_group = state.group;
                    state.group = false;
                    let inner = self.parse_eval(expr, state)?;
                    state.group = was_group;
                    state.sql_type = SqlKind::Raw;
                    Ok(aggregate_sql(*op, &inner))
                } else {
                    let inner = self.parse_eval(expr, state)?;
                    let alias = state.next_alias();
                    state.sql_type = SqlKind::Raw;
                    Ok(d.aggregate_over_json(*op, &inner, &alias))
                }
            }
            Eval::Length(arg) => {
                let inner = self.parse_eval(arg, state)?;
                let kind = state.sql_type;
                state.sql_type = SqlKind::Raw;
                Ok(match kind {
                    SqlKind::Json => d.json_length(&inner),
                    SqlKind::List => {
                        let comma = d.escape_value(&Value::Text(",".into()), None);
                        let empty = d.escape_value(&Value::Text(String::new()), None);
                        d.if_expr(
                            &inner,
                            &format!(
                                "length({inner}) - length(replace({inner}, {comma}, {empty})) + 1"
                            ),
                            "0",
                        )
                    }
                    SqlKind::Raw => format!("length({inner})"),
                })
            }
        }
    }

    fn parse_all(&self, args: &[Eval], state: &mut BuildState) -> Result<Vec<String>> {
        args.iter()
            .map(|arg| self.parse_eval(arg, state))
            .collect()
    }

    /// Builds the SELECT statement for the selection, or `None` when the
    /// filter reduces to constant falsehood.
    pub fn select(&self, state: &mut BuildState) -> Result<Option<String>> {
        let sel = self.selection;
        let filter = self.parse_query(&sel.query, state)?;
        if filter == "0" {
            return Ok(None);
        }
        let projection = match &sel.fields {
            Some(fields) if !fields.is_empty() => {
                let mut parts = Vec::with_capacity(fields.len());
                for (name, expr) in fields {
                    state.sql_type = SqlKind::Raw;
                    let sql = self.parse_eval(expr, state)?;
                    state.sql_types.insert(name.clone(), state.sql_type);
                    parts.push(format!("{sql} AS {}", self.dialect.escape_id(name)));
                }
                parts.join(", ")
            }
            _ => String::from("*"),
        };
        let mut sql = format!(
            "SELECT {projection} FROM {}",
            self.dialect.escape_id(&sel.table)
        );
        if filter != "1" {
            sql.push_str(" WHERE ");
            sql.push_str(&filter);
        }
        if !sel.sort.is_empty() {
            let clauses = sel
                .sort
                .iter()
                .map(|(expr, direction)| {
                    Ok(format!(
                        "{} {}",
                        self.parse_eval(expr, state)?,
                        direction.as_str()
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&clauses.join(", "));
        }
        sql.push_str(&self.dialect.limit_clause(sel.limit, sel.offset));
        Ok(Some(sql))
    }

    /// Builds the scalar-evaluation statement: the selection wrapped as a
    /// subquery, with the expression compiled in a grouping context.
    pub fn eval_statement(&self, expr: &Eval, state: &mut BuildState) -> Result<String> {
        let inner = match self.select(&mut BuildState::new())? {
            Some(sql) => sql,
            // Aggregates over the empty set still need a well-formed
            // subquery: sum() = 0, count() = 0.
            None => format!(
                "SELECT * FROM {} WHERE 0",
                self.dialect.escape_id(&self.selection.table)
            ),
        };
        state.group = true;
        let value = self.parse_eval(expr, state)?;
        let alias = state.next_alias();
        Ok(format!(
            "SELECT {value} AS {} FROM ({inner}) {alias}",
            self.dialect.escape_id("value")
        ))
    }

    /// Builds an INSERT for one already-dumped row.
    pub fn insert(&self, row: &Row) -> Result<String> {
        let model = self.model();
        if row.is_empty() {
            return Ok(self
                .dialect
                .empty_insert(&self.dialect.escape_id(&self.selection.table)));
        }
        let mut columns = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());
        for (key, value) in row {
            let field = model
                .field(key)
                .ok_or_else(|| StrataError::UnknownField(format!("{}.{key}", model.name)))?;
            columns.push(self.dialect.escape_id(key));
            values.push(self.dialect.escape_value(value, Some(field)));
        }
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.dialect.escape_id(&self.selection.table),
            columns.join(", "),
            values.join(", ")
        ))
    }

    /// Builds the UPDATE for the given assignment expressions, or `None`
    /// when the filter reduces to constant falsehood. Dotted paths update
    /// their root JSON column through chained `json_set`.
    pub fn update(
        &self,
        update: &IndexMap<String, Eval>,
        state: &mut BuildState,
    ) -> Result<Option<String>> {
        let filter = self.parse_query(&self.selection.query, state)?;
        if filter == "0" {
            return Ok(None);
        }
        let assignments = self.assignments(update, state)?;
        if assignments.is_empty() {
            return Ok(None);
        }
        let mut sql = format!(
            "UPDATE {} SET {}",
            self.dialect.escape_id(&self.selection.table),
            assignments.join(", ")
        );
        if filter != "1" {
            sql.push_str(" WHERE ");
            sql.push_str(&filter);
        }
        Ok(Some(sql))
    }

    /// Compiles assignment expressions to `col = expr` fragments, merging
    /// dotted paths per root column.
    pub fn assignments(
        &self,
        update: &IndexMap<String, Eval>,
        state: &mut BuildState,
    ) -> Result<Vec<String>> {
        Ok(self
            .assignment_exprs(update, state)?
            .into_iter()
            .map(|(root, value)| format!("{} = {value}", self.dialect.escape_id(&root)))
            .collect())
    }

    /// Compiles assignment expressions per root column: the value each
    /// root field receives, with dotted paths folded through `json_set`.
    pub fn assignment_exprs(
        &self,
        update: &IndexMap<String, Eval>,
        state: &mut BuildState,
    ) -> Result<IndexMap<String, String>> {
        let model = self.model();
        let mut roots: IndexMap<String, Vec<(String, &Eval)>> = IndexMap::new();
        for (path, expr) in update {
            let (root, sub) = model
                .resolve_field(path)
                .ok_or_else(|| StrataError::UnknownField(format!("{}.{path}", model.name)))?;
            roots
                .entry(root.to_string())
                .or_default()
                .push((sub.to_string(), expr));
        }
        let mut exprs = IndexMap::with_capacity(roots.len());
        for (root, entries) in roots {
            let column = self.dialect.escape_id(&root);
            let mut acc: Option<String> = None;
            for (sub, expr) in entries {
                state.sql_type = SqlKind::Raw;
                let mut compiled = self.parse_eval(expr, state)?;
                if sub.is_empty() {
                    acc = Some(compiled);
                } else {
                    // A serialized-JSON operand must land as a JSON value,
                    // not as a string scalar.
                    if state.sql_type == SqlKind::Json {
                        compiled = self.dialect.as_json(&compiled);
                    }
                    let target = acc.take().unwrap_or_else(|| format!("ifnull({column}, '{{}}')"));
                    acc = Some(
                        self.dialect
                            .json_set(&target, &json_path(&sub), &compiled),
                    );
                }
            }
            let value = acc.expect("each root has at least one entry");
            exprs.insert(root, value);
        }
        Ok(exprs)
    }

    /// Builds the DELETE, or `None` when the filter reduces to constant
    /// falsehood.
    pub fn delete(&self, state: &mut BuildState) -> Result<Option<String>> {
        let filter = self.parse_query(&self.selection.query, state)?;
        if filter == "0" {
            return Ok(None);
        }
        let mut sql = format!("DELETE FROM {}", self.dialect.escape_id(&self.selection.table));
        if filter != "1" {
            sql.push_str(" WHERE ");
            sql.push_str(&filter);
        }
        Ok(Some(sql))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{self, CompareOp};
    use crate::field::{Field, FieldType};
    use crate::model::{Model, ModelOptions};
    use crate::selection::{Direction, Selection};
    use std::sync::Arc;

    fn bar() -> Arc<Model> {
        let mut fields = indexmap::IndexMap::new();
        fields.insert("id".to_string(), Field::new(FieldType::Primary));
        fields.insert("text".to_string(), Field::new(FieldType::String));
        fields.insert("num".to_string(), Field::new(FieldType::Integer));
        fields.insert("bool".to_string(), Field::new(FieldType::Boolean));
        fields.insert("list".to_string(), Field::new(FieldType::List));
        fields.insert("meta".to_string(), Field::new(FieldType::Json));
        Arc::new(Model::new("bar", fields, ModelOptions::auto_inc("id")).unwrap())
    }

    fn compile(query: Query) -> String {
        let selection = Selection::new(bar()).filter(query);
        let dialect = GenericDialect::new();
        let builder = Builder::new(&dialect, &selection);
        builder
            .parse_query(&selection.query, &mut BuildState::new())
            .unwrap()
    }

    #[test]
    fn empty_query_is_constant_true() {
        assert_eq!(compile(Query::all()), "1");
    }

    #[test]
    fn empty_in_is_constant_false() {
        assert_eq!(compile(Query::is_in("id", Vec::<i64>::new())), "0");
    }

    #[test]
    fn and_short_circuits_on_false() {
        let q = Query::eq("num", 1i64).and(Query::is_in("id", Vec::<i64>::new()));
        assert_eq!(compile(q), "0");
    }

    #[test]
    fn or_short_circuits_on_true() {
        let q = Query::all().or(Query::eq("num", 1i64));
        assert_eq!(compile(q), "1");
    }

    #[test]
    fn null_equality_is_is_null() {
        assert_eq!(compile(Query::eq("text", Value::Null)), "`text` IS NULL");
        assert_eq!(
            compile(Query::ne("text", Value::Null)),
            "`text` IS NOT NULL"
        );
    }

    #[test]
    fn in_list() {
        assert_eq!(
            compile(Query::is_in("id", [1i64, 2, 5])),
            "`id` IN (1, 2, 5)"
        );
    }

    #[test]
    fn bit_operators() {
        assert_eq!(compile(Query::bits_all_set("num", 5)), "`num` & 5 = 5");
        assert_eq!(compile(Query::bits_all_clear("num", 5)), "`num` & 5 = 0");
        assert_eq!(compile(Query::bits_any_set("num", 5)), "`num` & 5 != 0");
        assert_eq!(compile(Query::bits_any_clear("num", 5)), "`num` & 5 != 5");
    }

    #[test]
    fn regex_for_reverses_operands() {
        assert_eq!(
            compile(Query::regex_for("text", "input")),
            "'input' REGEXP `text`"
        );
    }

    #[test]
    fn element_in_list_field() {
        assert_eq!(
            compile(Query::el("list", "4")),
            "concat(',', `list`, ',') LIKE '%,4,%'"
        );
    }

    #[test]
    fn element_in_json_field() {
        assert_eq!(
            compile(Query::el("meta", 5i64)),
            "json_contains(`meta`, '5')"
        );
    }

    #[test]
    fn size_zero_negates_key() {
        assert_eq!(compile(Query::size("list", 0)), "NOT(`list`)");
    }

    #[test]
    fn size_counts_commas() {
        assert_eq!(
            compile(Query::size("list", 3)),
            "`list` AND length(`list`) - length(replace(`list`, ',', '')) = 2"
        );
    }

    #[test]
    fn dotted_path_queries_json() {
        assert_eq!(
            compile(Query::eq("meta.a.b", 7i64)),
            "json_unquote(json_extract(`meta`, '$.\"a\".\"b\"')) = 7"
        );
    }

    #[test]
    fn select_none_on_false_filter() {
        let selection = Selection::new(bar()).filter(Query::is_in("id", Vec::<i64>::new()));
        let dialect = GenericDialect::new();
        let builder = Builder::new(&dialect, &selection);
        assert_eq!(builder.select(&mut BuildState::new()).unwrap(), None);
    }

    #[test]
    fn select_whole_table() {
        let selection = Selection::new(bar());
        let dialect = GenericDialect::new();
        let builder = Builder::new(&dialect, &selection);
        assert_eq!(
            builder.select(&mut BuildState::new()).unwrap().unwrap(),
            "SELECT * FROM `bar`"
        );
    }

    #[test]
    fn select_with_sort_and_limit() {
        let selection = Selection::new(bar())
            .filter(Query::gt("num", 10i64))
            .order_by(eval::field("num"), Direction::Desc)
            .limit(5)
            .offset(2);
        let dialect = GenericDialect::new();
        let builder = Builder::new(&dialect, &selection);
        assert_eq!(
            builder.select(&mut BuildState::new()).unwrap().unwrap(),
            "SELECT * FROM `bar` WHERE `num` > 10 ORDER BY `num` DESC LIMIT 5 OFFSET 2"
        );
    }

    #[test]
    fn projection_records_sql_types() {
        let mut fields = indexmap::IndexMap::new();
        fields.insert("m".to_string(), eval::field("meta"));
        fields.insert("n".to_string(), eval::add(vec![eval::field("num"), eval::lit(1i64)]));
        let selection = Selection::new(bar()).project(fields);
        let dialect = GenericDialect::new();
        let builder = Builder::new(&dialect, &selection);
        let mut state = BuildState::new();
        assert_eq!(
            builder.select(&mut state).unwrap().unwrap(),
            "SELECT `meta` AS `m`, (`num` + 1) AS `n` FROM `bar`"
        );
        assert_eq!(state.sql_types.get("m"), Some(&SqlKind::Json));
        assert_eq!(state.sql_types.get("n"), Some(&SqlKind::Raw));
    }

    #[test]
    fn eval_statement_groups_aggregations() {
        let selection = Selection::new(bar());
        let dialect = GenericDialect::new();
        let builder = Builder::new(&dialect, &selection);
        let sql = builder
            .eval_statement(&eval::sum(eval::field("num")), &mut BuildState::new())
            .unwrap();
        assert_eq!(
            sql,
            "SELECT ifnull(sum(`num`), 0) AS `value` FROM (SELECT * FROM `bar`) _j1"
        );
    }

    #[test]
    fn aggregation_outside_group_wraps_json_each() {
        let selection = Selection::new(bar());
        let dialect = GenericDialect::new();
        let builder = Builder::new(&dialect, &selection);
        let sql = builder
            .parse_eval(&eval::sum(eval::field("meta")), &mut BuildState::new())
            .unwrap();
        assert_eq!(
            sql,
            "(SELECT ifnull(sum(value), 0) FROM json_each(`meta`) _j1)"
        );
    }

    #[test]
    fn update_with_dotted_path_chains_json_set() {
        let selection = Selection::new(bar()).filter(Query::eq("id", 1i64));
        let dialect = GenericDialect::new();
        let builder = Builder::new(&dialect, &selection);
        let mut update = IndexMap::new();
        update.insert("meta.a.b".to_string(), eval::lit(1i64));
        update.insert("meta.c".to_string(), eval::lit("x"));
        let sql = builder.update(&update, &mut BuildState::new()).unwrap().unwrap();
        assert_eq!(
            sql,
            "UPDATE `bar` SET `meta` = json_set(json_set(ifnull(`meta`, '{}'), \
             '$.\"a\".\"b\"', 1), '$.\"c\"', 'x') WHERE `id` = 1"
        );
    }

    #[test]
    fn update_none_on_false_filter() {
        let selection = Selection::new(bar()).filter(Query::is_in("id", Vec::<i64>::new()));
        let dialect = GenericDialect::new();
        let builder = Builder::new(&dialect, &selection);
        let mut update = IndexMap::new();
        update.insert("num".to_string(), eval::lit(1i64));
        assert_eq!(builder.update(&update, &mut BuildState::new()).unwrap(), None);
    }

    #[test]
    fn delete_statement() {
        let selection = Selection::new(bar()).filter(Query::gt("id", 5i64));
        let dialect = GenericDialect::new();
        let builder = Builder::new(&dialect, &selection);
        assert_eq!(
            builder.delete(&mut BuildState::new()).unwrap().unwrap(),
            "DELETE FROM `bar` WHERE `id` > 5"
        );
    }

    #[test]
    fn expr_filter_compiles_comparison() {
        let q = Query::expr(eval::compare(
            CompareOp::Gte,
            eval::field("num"),
            eval::lit(10i64),
        ));
        assert_eq!(compile(q), "(`num` >= 10)");
    }
}
