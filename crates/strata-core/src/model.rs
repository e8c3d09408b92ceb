//! Declared table models and the in-memory registry.
//!
//! A [`Model`] is immutable after registration: drivers and builders hold
//! `Arc<Model>` snapshots and never observe mutation. The [`Registry`] is
//! populated during application bootstrap via `extend` and shared
//! read-only afterwards.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use crate::error::{Result, StrataError};
use crate::field::{Field, FieldType};
use crate::value::{Object, Value};

/// Options accepted by [`Registry::extend`].
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    /// Primary key: one field name or an ordered composite.
    pub primary: Vec<String>,
    /// Whether the single primary field auto-increments on insert.
    pub auto_inc: bool,
    /// Unique groups; each group is an ordered list of field names.
    pub unique: Vec<Vec<String>>,
    /// Foreign keys: field name → (referenced table, referenced field).
    pub foreign: HashMap<String, (String, String)>,
}

impl ModelOptions {
    /// Options for a table with a scalar auto-increment primary key.
    #[must_use]
    pub fn auto_inc(primary: impl Into<String>) -> Self {
        Self {
            primary: vec![primary.into()],
            auto_inc: true,
            ..Self::default()
        }
    }

    /// Options with the given primary field(s), no auto-increment.
    #[must_use]
    pub fn primary<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            primary: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Adds a unique group.
    #[must_use]
    pub fn unique<I, S>(mut self, group: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique
            .push(group.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign(
        mut self,
        field: impl Into<String>,
        table: impl Into<String>,
        referenced: impl Into<String>,
    ) -> Self {
        self.foreign
            .insert(field.into(), (table.into(), referenced.into()));
        self
    }
}

/// A declared table.
#[derive(Debug, Clone)]
pub struct Model {
    /// Table identifier.
    pub name: String,
    /// Declared fields, in declaration order.
    pub fields: IndexMap<String, Field>,
    /// Primary key field names.
    pub primary: Vec<String>,
    /// Whether the single primary field auto-increments.
    pub auto_inc: bool,
    /// Unique groups.
    pub unique: Vec<Vec<String>>,
    /// Foreign keys.
    pub foreign: HashMap<String, (String, String)>,
}

impl Model {
    /// Builds a model, checking the registration invariants.
    pub fn new(
        name: impl Into<String>,
        fields: IndexMap<String, Field>,
        options: ModelOptions,
    ) -> Result<Self> {
        let name = name.into();
        if options.auto_inc && options.primary.len() != 1 {
            return Err(StrataError::SchemaMismatch(format!(
                "{name}: auto-increment requires a scalar primary key"
            )));
        }
        for key in &options.primary {
            if !fields.contains_key(key) {
                return Err(StrataError::UnknownField(format!("{name}.{key}")));
            }
        }
        for group in &options.unique {
            for key in group {
                if !fields.contains_key(key) {
                    return Err(StrataError::UnknownField(format!("{name}.{key}")));
                }
            }
        }
        for key in options.foreign.keys() {
            if !fields.contains_key(key) {
                return Err(StrataError::UnknownField(format!("{name}.{key}")));
            }
        }
        Ok(Self {
            name,
            fields,
            primary: options.primary,
            auto_inc: options.auto_inc,
            unique: options.unique,
            foreign: options.foreign,
        })
    }

    /// Looks up a declared field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Splits a possibly dotted path at its longest declared-field prefix.
    ///
    /// Returns `(field, sub_path)`; `sub_path` is empty when the path names
    /// a declared field directly.
    #[must_use]
    pub fn resolve_field<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        if self.fields.contains_key(path) {
            return Some((path, ""));
        }
        let mut end = path.len();
        while let Some(dot) = path[..end].rfind('.') {
            if self.fields.contains_key(&path[..dot]) {
                return Some((&path[..dot], &path[dot + 1..]));
            }
            end = dot;
        }
        None
    }

    /// Validates an object against the declared fields, resolving dotted
    /// keys to their root field. Rejects keys with no declared root.
    pub fn format(&self, object: &Object) -> Result<Object> {
        for key in object.keys() {
            if self.resolve_field(key).is_none() {
                return Err(StrataError::UnknownField(format!("{}.{key}", self.name)));
            }
        }
        Ok(object.clone())
    }

    /// Validates a row read back from storage. Unknown columns are
    /// rejected; they indicate a drifted schema.
    pub fn parse(&self, row: &Object) -> Result<Object> {
        for key in row.keys() {
            if !self.fields.contains_key(key) {
                return Err(StrataError::UnknownField(format!("{}.{key}", self.name)));
            }
        }
        Ok(row.clone())
    }

    /// Produces a full object from per-field initial values merged with
    /// the given overrides. Dotted override keys are folded into the JSON
    /// value of their root field.
    pub fn create(&self, overrides: &Object) -> Result<Object> {
        let mut object = Object::new();
        for (name, field) in &self.fields {
            if field.deprecated {
                continue;
            }
            let initial = match (&field.initial, field.ty) {
                (Some(value), _) => value.clone(),
                (None, FieldType::List) => Value::List(Vec::new()),
                (None, FieldType::Json) => Value::Null,
                _ => Value::Null,
            };
            object.insert(name.clone(), initial);
        }
        for (key, value) in overrides {
            let (root, sub) = self
                .resolve_field(key)
                .ok_or_else(|| StrataError::UnknownField(format!("{}.{key}", self.name)))?;
            if sub.is_empty() {
                object.insert(root.to_string(), value.clone());
            } else {
                let slot = object.entry(root.to_string()).or_insert(Value::Null);
                let mut tree = match slot {
                    Value::Json(v) => v.clone(),
                    _ => serde_json::Value::Object(serde_json::Map::new()),
                };
                set_json_path(&mut tree, sub, value)?;
                *slot = Value::Json(tree);
            }
        }
        Ok(object)
    }
}

/// Writes `value` at the dotted `path` inside a JSON tree, creating
/// intermediate objects as needed.
fn set_json_path(tree: &mut serde_json::Value, path: &str, value: &Value) -> Result<()> {
    let mut node = tree;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if !node.is_object() {
            *node = serde_json::Value::Object(serde_json::Map::new());
        }
        let map = node.as_object_mut().expect("object was just ensured");
        if parts.peek().is_none() {
            map.insert(part.to_string(), to_json(value)?);
            return Ok(());
        }
        node = map
            .entry(part.to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }
    Ok(())
}

/// Converts a semantic value into its JSON representation.
pub fn to_json(value: &Value) -> Result<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::from(*n),
        Value::UInt(n) => serde_json::Value::from(*n),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Json(v) => v.clone(),
        Value::List(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|s| serde_json::Value::String(s.clone()))
                .collect(),
        ),
        Value::Date(_) | Value::Time(_) | Value::DateTime(_) => {
            return Err(StrataError::QueryMalformed(
                "temporal values cannot be embedded in JSON columns".into(),
            ))
        }
    })
}

/// A per-table migration callback record. Hooks run in declaration order
/// after the schema is in shape; `after` and `finalize` may contribute
/// column names that are safe to drop on the next `prepare` pass.
#[derive(Clone, Default)]
pub struct MigrationHooks {
    /// Runs before the schema diff is applied.
    pub before: Option<Arc<dyn Fn(&Model) -> Result<()> + Send + Sync>>,
    /// Runs after the schema is synchronized; returns droppable columns.
    pub after: Option<Arc<dyn Fn(&Model) -> Result<Vec<String>> + Send + Sync>>,
    /// Observes a synchronization failure.
    pub error: Option<Arc<dyn Fn(&Model, &StrataError) + Send + Sync>>,
    /// Runs last; returns droppable columns.
    pub finalize: Option<Arc<dyn Fn(&Model) -> Result<Vec<String>> + Send + Sync>>,
}

impl std::fmt::Debug for MigrationHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationHooks")
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("error", &self.error.is_some())
            .field("finalize", &self.finalize.is_some())
            .finish()
    }
}

/// In-memory catalog of declared tables, keyed by name.
#[derive(Debug, Default)]
pub struct Registry {
    models: RwLock<HashMap<String, Arc<Model>>>,
    hooks: RwLock<HashMap<String, Vec<MigrationHooks>>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a table, replacing any previous declaration of the same
    /// name. Bootstrap-time only; models are frozen once operations run.
    pub fn extend(
        &self,
        name: impl Into<String>,
        fields: IndexMap<String, Field>,
        options: ModelOptions,
    ) -> Result<Arc<Model>> {
        let model = Arc::new(Model::new(name, fields, options)?);
        self.models
            .write()
            .expect("registry lock poisoned")
            .insert(model.name.clone(), Arc::clone(&model));
        Ok(model)
    }

    /// Looks up a declared model.
    pub fn model(&self, name: &str) -> Result<Arc<Model>> {
        self.models
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| StrataError::UnknownTable(name.to_string()))
    }

    /// All declared table names.
    #[must_use]
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .models
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Removes a declaration (teardown only).
    pub fn remove(&self, name: &str) {
        self.models
            .write()
            .expect("registry lock poisoned")
            .remove(name);
        self.hooks
            .write()
            .expect("registry lock poisoned")
            .remove(name);
    }

    /// Registers a migration hook record for a table.
    pub fn migration(&self, table: impl Into<String>, hooks: MigrationHooks) {
        self.hooks
            .write()
            .expect("registry lock poisoned")
            .entry(table.into())
            .or_default()
            .push(hooks);
    }

    /// Migration hook records for a table, in declaration order.
    #[must_use]
    pub fn hooks_for(&self, table: &str) -> Vec<MigrationHooks> {
        self.hooks
            .read()
            .expect("registry lock poisoned")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}
