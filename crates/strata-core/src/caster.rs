//! Type marshalling between semantic values and storage values.
//!
//! Each driver owns a [`Caster`]: a map from [`FieldType`] to a cast
//! plugin. `dump` turns a caller object into the row a driver writes;
//! `load` turns a row read from storage back into caller values. Drivers
//! register additional plugins for representations their engine lacks
//! (the embedded driver stores all temporal types as epoch milliseconds).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::field::FieldType;
use crate::model::Model;
use crate::value::{Object, Row, Value};

/// Bidirectional conversion for one storage representation.
pub trait CastPlugin: Send + Sync {
    /// Semantic value → storage value.
    fn dump(&self, value: Value) -> Value;

    /// Storage value → semantic value. `initial` is the field's declared
    /// initial value, used as the fallback for empty payloads.
    fn load(&self, value: Value, initial: Option<&Value>) -> Result<Value>;
}

/// Per-driver registry of cast plugins.
#[derive(Clone, Default)]
pub struct Caster {
    plugins: HashMap<FieldType, Arc<dyn CastPlugin>>,
}

impl std::fmt::Debug for Caster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caster")
            .field("types", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Caster {
    /// A caster with the dialect-independent default plugins: boolean,
    /// json, and list.
    #[must_use]
    pub fn new() -> Self {
        let mut caster = Self::default();
        caster.register(&[FieldType::Boolean], BooleanCast);
        caster.register(&[FieldType::Json], JsonCast);
        caster.register(&[FieldType::List], ListCast);
        caster
    }

    /// Registers a plugin for the given field types, replacing any
    /// previous registration.
    pub fn register(&mut self, types: &[FieldType], plugin: impl CastPlugin + 'static) {
        let plugin: Arc<dyn CastPlugin> = Arc::new(plugin);
        for ty in types {
            self.plugins.insert(*ty, Arc::clone(&plugin));
        }
    }

    /// Dumps one value according to the field type's plugin, if any.
    #[must_use]
    pub fn dump_value(&self, ty: FieldType, value: Value) -> Value {
        match self.plugins.get(&ty) {
            Some(plugin) => plugin.dump(value),
            None => value,
        }
    }

    /// Loads one value according to the field type's plugin, if any.
    pub fn load_value(&self, ty: FieldType, value: Value, initial: Option<&Value>) -> Result<Value> {
        match self.plugins.get(&ty) {
            Some(plugin) => plugin.load(value, initial),
            None => Ok(value),
        }
    }

    /// Formats an object through the model and dumps every field value
    /// that has a registered plugin.
    pub fn dump(&self, model: &Model, object: &Object) -> Result<Row> {
        let object = model.format(object)?;
        let mut row = Row::new();
        for (key, value) in object {
            let ty = match model.resolve_field(&key) {
                Some((root, _)) => model.fields[root].ty,
                None => return Err(StrataError::UnknownField(format!("{}.{key}", model.name))),
            };
            row.insert(key, self.dump_value(ty, value));
        }
        Ok(row)
    }

    /// Loads a storage row back into semantic values, rejecting unknown
    /// columns and finishing with the model's parse step.
    pub fn load(&self, model: &Model, row: &Row) -> Result<Object> {
        let mut object = Object::new();
        for (key, value) in row {
            let field = model
                .field(key)
                .ok_or_else(|| StrataError::UnknownField(format!("{}.{key}", model.name)))?;
            object.insert(
                key.clone(),
                self.load_value(field.ty, value.clone(), field.initial.as_ref())?,
            );
        }
        model.parse(&object)
    }
}

/// `bool ↔ 0/1`.
struct BooleanCast;

impl CastPlugin for BooleanCast {
    fn dump(&self, value: Value) -> Value {
        match value {
            Value::Bool(b) => Value::Int(i64::from(b)),
            other => other,
        }
    }

    fn load(&self, value: Value, _initial: Option<&Value>) -> Result<Value> {
        Ok(match value {
            Value::Null => Value::Null,
            Value::Bool(b) => Value::Bool(b),
            other => Value::Bool(other.as_f64().is_some_and(|n| n != 0.0)),
        })
    }
}

/// `json ↔ serialized text`; the empty payload loads as the declared
/// initial value.
struct JsonCast;

impl CastPlugin for JsonCast {
    fn dump(&self, value: Value) -> Value {
        match value {
            Value::Json(v) => Value::Text(v.to_string()),
            Value::Null => Value::Null,
            other => other,
        }
    }

    fn load(&self, value: Value, initial: Option<&Value>) -> Result<Value> {
        let text = match value {
            Value::Null => return Ok(initial.cloned().unwrap_or(Value::Null)),
            Value::Text(s) => s,
            Value::Json(v) => return Ok(Value::Json(v)),
            other => {
                return Err(StrataError::Storage(format!(
                    "json column holds a non-text value: {other:?}"
                )))
            }
        };
        if text.is_empty() {
            return Ok(initial.cloned().unwrap_or(Value::Null));
        }
        let parsed = serde_json::from_str(&text)
            .map_err(|e| StrataError::Storage(format!("corrupt json payload: {e}")))?;
        Ok(Value::Json(parsed))
    }
}

/// `list ↔ comma-joined text`; the empty payload loads as the empty list.
struct ListCast;

impl CastPlugin for ListCast {
    fn dump(&self, value: Value) -> Value {
        match value {
            Value::List(items) => Value::Text(items.join(",")),
            other => other,
        }
    }

    fn load(&self, value: Value, _initial: Option<&Value>) -> Result<Value> {
        let text = match value {
            Value::Null => return Ok(Value::List(Vec::new())),
            Value::Text(s) => s,
            Value::List(items) => return Ok(Value::List(items)),
            other => {
                return Err(StrataError::Storage(format!(
                    "list column holds a non-text value: {other:?}"
                )))
            }
        };
        if text.is_empty() {
            return Ok(Value::List(Vec::new()));
        }
        Ok(Value::List(text.split(',').map(String::from).collect()))
    }
}
