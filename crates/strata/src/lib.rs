//! # strata
//!
//! A polyglot relational data-access layer: declare tables once, then
//! query, mutate, and aggregate them through one structured algebra
//! over heterogeneous SQL backends.
//!
//! ```no_run
//! use strata::{Database, Field, FieldType, ModelOptions, Query};
//! use strata::sqlite::{SqliteConfig, SqliteDriver};
//! use indexmap::IndexMap;
//!
//! # async fn demo() -> strata::Result<()> {
//! let db = Database::connect(|registry| {
//!     SqliteDriver::new(registry, SqliteConfig::default())
//! });
//!
//! let mut fields = IndexMap::new();
//! fields.insert("id".to_string(), Field::new(FieldType::Primary));
//! fields.insert("name".to_string(), Field::new(FieldType::String));
//! db.extend("user", fields, ModelOptions::auto_inc("id"))?;
//!
//! db.start().await?;
//! db.prepare_all().await?;
//!
//! let mut row = strata::Object::new();
//! row.insert("name".to_string(), "alice".into());
//! let created = db.create("user", &row).await?;
//! let users = db.get("user", Query::eq("name", "alice"), None).await?;
//! # let _ = (created, users);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use indexmap::IndexMap;

pub use strata_core::{
    eval, BuildState, Builder, CastPlugin, Caster, Dialect, Direction, Driver, Eval, Field,
    FieldQuery, FieldType, MigrationHooks, Model, ModelOptions, Object, Query, Registry, Result,
    Row, Selection, SqlKind, Stats, StrataError, TableStats, Value,
};

/// The embedded SQLite backend.
pub mod sqlite {
    pub use strata_sqlite::{SqliteConfig, SqliteDialect, SqliteDriver, MEMORY_PATH};
}

/// The pooled MySQL backend.
pub mod mysql {
    pub use strata_mysql::{MySqlConfig, MySqlDialect, MySqlDriver};
}

/// Per-call projection, sort, and pagination options for [`Database::get`].
#[derive(Debug, Clone, Default)]
pub struct Modifier {
    /// Projection: output name → expression.
    pub fields: Option<IndexMap<String, Eval>>,
    /// Sort clauses.
    pub sort: Vec<(Eval, Direction)>,
    /// Row limit.
    pub limit: Option<u64>,
    /// Row offset.
    pub offset: u64,
}

impl Modifier {
    /// An empty modifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the projection.
    #[must_use]
    pub fn fields(mut self, fields: IndexMap<String, Eval>) -> Self {
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

/// The caller-facing coordinator: owns the model registry and exactly
/// one driver.
///
/// Models are declared with [`Database::extend`] during bootstrap and
/// frozen once operations run. Every operation builds an immutable
/// [`Selection`] from the registry snapshot and hands it to the driver;
/// constant-false filters short-circuit before any I/O.
pub struct Database<D: Driver> {
    registry: Arc<Registry>,
    driver: D,
}

impl<D: Driver> Database<D> {
    /// Creates the registry and binds the driver built over it.
    pub fn connect<F>(make: F) -> Self
    where
        F: FnOnce(Arc<Registry>) -> D,
    {
        let registry = Arc::new(Registry::new());
        let driver = make(Arc::clone(&registry));
        Self { registry, driver }
    }

    /// The shared model registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The underlying driver.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Declares a table.
    pub fn extend(
        &self,
        name: impl Into<String>,
        fields: IndexMap<String, Field>,
        options: ModelOptions,
    ) -> Result<()> {
        self.registry.extend(name, fields, options)?;
        Ok(())
    }

    /// Registers a migration hook record for a table.
    pub fn migration(&self, table: impl Into<String>, hooks: MigrationHooks) {
        self.registry.migration(table, hooks);
    }

    /// Starts the driver.
    pub async fn start(&self) -> Result<()> {
        self.driver.start().await
    }

    /// Stops the driver, flushing pending persistence work.
    pub async fn stop(&self) -> Result<()> {
        self.driver.stop().await
    }

    /// Synchronizes one table, running its migration hooks. Hooks may
    /// contribute live columns that are safe to drop; when they do, the
    /// synchronizer re-enters with the accumulated list.
    pub async fn prepare(&self, table: &str) -> Result<()> {
        let model = self.registry.model(table)?;
        let hooks = self.registry.hooks_for(table);
        for hook in &hooks {
            if let Some(before) = &hook.before {
                before(&model)?;
            }
        }
        if let Err(e) = self.driver.prepare(table, &[]).await {
            for hook in &hooks {
                if let Some(error) = &hook.error {
                    error(&model, &e);
                }
            }
            return Err(e);
        }
        let mut drop_keys = Vec::new();
        for hook in &hooks {
            if let Some(after) = &hook.after {
                drop_keys.extend(after(&model)?);
            }
        }
        for hook in &hooks {
            if let Some(finalize) = &hook.finalize {
                drop_keys.extend(finalize(&model)?);
            }
        }
        if !drop_keys.is_empty() {
            self.driver.prepare(table, &drop_keys).await?;
        }
        Ok(())
    }

    /// Synchronizes every declared table.
    pub async fn prepare_all(&self) -> Result<()> {
        for table in self.registry.tables() {
            self.prepare(&table).await?;
        }
        Ok(())
    }

    fn selection(&self, table: &str, query: Query) -> Result<Selection> {
        Ok(Selection::new(self.registry.model(table)?).filter(query))
    }

    /// Returns the rows matching `query`.
    pub async fn get(
        &self,
        table: &str,
        query: Query,
        modifier: Option<Modifier>,
    ) -> Result<Vec<Object>> {
        let mut sel = self.selection(table, query)?;
        if let Some(modifier) = modifier {
            sel.fields = modifier.fields;
            sel.sort = modifier.sort;
            sel.limit = modifier.limit;
            sel.offset = modifier.offset;
        }
        self.driver.get(&sel).await
    }

    /// Inserts one row, returning it as stored.
    pub async fn create(&self, table: &str, data: &Object) -> Result<Object> {
        let sel = self.selection(table, Query::all())?;
        self.driver.create(&sel, data).await
    }

    /// Updates the rows matching `query`; returns the affected count.
    pub async fn set(
        &self,
        table: &str,
        query: Query,
        update: &IndexMap<String, Eval>,
    ) -> Result<u64> {
        let sel = self.selection(table, query)?;
        self.driver.set(&sel, update).await
    }

    /// Updates-or-inserts each item, matching on `keys` (the primary key
    /// when omitted).
    pub async fn upsert(
        &self,
        table: &str,
        rows: &[Object],
        keys: Option<&[String]>,
    ) -> Result<()> {
        let sel = self.selection(table, Query::all())?;
        self.driver.upsert(&sel, rows, keys.unwrap_or(&[])).await
    }

    /// Deletes the rows matching `query`; returns the removed count.
    pub async fn remove(&self, table: &str, query: Query) -> Result<u64> {
        let sel = self.selection(table, query)?;
        self.driver.remove(&sel).await
    }

    /// Evaluates a scalar expression over the whole table.
    pub async fn eval(&self, table: &str, expr: &Eval) -> Result<Value> {
        let sel = self.selection(table, Query::all())?;
        self.driver.eval(&sel, expr).await
    }

    /// Drops one table, or every declared table.
    pub async fn drop(&self, table: Option<&str>) -> Result<()> {
        self.driver.drop_table(table).await
    }

    /// Storage statistics.
    pub async fn stats(&self) -> Result<Stats> {
        self.driver.stats().await
    }
}
