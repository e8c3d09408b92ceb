//! Per-operation selection descriptors.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::eval::Eval;
use crate::model::Model;
use crate::query::Query;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl Direction {
    /// Returns the SQL keyword.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A per-call request value binding a table, a filter, and optional
/// projection/sort/pagination. Immutable once handed to a driver.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Target table name.
    pub table: String,
    /// The table's declared model.
    pub model: Arc<Model>,
    /// Row filter.
    pub query: Query,
    /// Optional projection: output name → expression. `None` selects
    /// every declared column.
    pub fields: Option<IndexMap<String, Eval>>,
    /// Sort clauses, applied in order.
    pub sort: Vec<(Eval, Direction)>,
    /// Row limit.
    pub limit: Option<u64>,
    /// Row offset.
    pub offset: u64,
    /// Alias → model map for expression paths that name other tables.
    pub tables: HashMap<String, Arc<Model>>,
}

impl Selection {
    /// A selection over the whole table.
    #[must_use]
    pub fn new(model: Arc<Model>) -> Self {
        let mut tables = HashMap::new();
        tables.insert(model.name.clone(), Arc::clone(&model));
        Self {
            table: model.name.clone(),
            model,
            query: Query::all(),
            fields: None,
            sort: Vec::new(),
            limit: None,
            offset: 0,
            tables,
        }
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    /// Sets the projection.
    #[must_use]
    pub fn project(mut self, fields: IndexMap<String, Eval>) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Appends a sort clause.
    #[must_use]
    pub fn order_by(mut self, expr: Eval, direction: Direction) -> Self {
        self.sort.push((expr, direction));
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the row offset.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}
