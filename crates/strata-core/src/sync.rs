//! Schema synchronization planning.
//!
//! Drivers introspect the live table and hand the columns to [`plan`],
//! which diffs them against the declared model and decides between
//! create, additive alter, and full rebuild. Executing the plan is the
//! driver's job, because the DDL strategies differ per engine (SQLite
//! rebuilds through a temp table; MySQL alters in place).

use crate::builder::Dialect;
use crate::error::Result;
use crate::model::Model;

/// One column of the live table, as reported by the engine's catalog.
#[derive(Debug, Clone)]
pub struct LiveColumn {
    /// Column name.
    pub name: String,
    /// Declared type, as the engine reports it.
    pub type_name: String,
    /// Whether NULL is permitted.
    pub nullable: bool,
    /// Default expression, if any.
    pub default: Option<String>,
    /// Whether the column is part of the primary key.
    pub primary: bool,
}

/// A source → destination column pair for the rebuild data copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    /// Live column the data comes from.
    pub from: String,
    /// Declared column the data lands in.
    pub to: String,
}

/// The synchronization decision for one table.
#[derive(Debug, Clone)]
pub enum SyncAction {
    /// Live schema already matches the declaration.
    None,
    /// No live columns: create the table.
    Create {
        /// Column definitions in declaration order.
        columns: Vec<String>,
        /// Table-level constraint clauses.
        constraints: Vec<String>,
    },
    /// Only new columns: add them in place.
    Add {
        /// Definitions of the missing columns.
        columns: Vec<String>,
    },
    /// Renames or type changes: rebuild through a temp table.
    Rebuild {
        /// Temp-table column definitions: every declared column plus the
        /// preserved unmapped live columns.
        columns: Vec<String>,
        /// Table-level constraint clauses.
        constraints: Vec<String>,
        /// Data-copy mapping from the old table into the temp table.
        mapping: Vec<ColumnMapping>,
    },
}

/// Builds the full column definition for one declared field.
pub fn column_def(name: &str, model: &Model, dialect: &dyn Dialect) -> Result<String> {
    let field = &model.fields[name];
    let auto_inc = model.auto_inc && model.primary.len() == 1 && model.primary[0] == name;
    let mut def = format!(
        "{} {}",
        dialect.escape_id(name),
        dialect.column_type(field, auto_inc)?
    );
    let in_primary = model.primary.iter().any(|p| p == name);
    if auto_inc {
        def.push_str(" NOT NULL PRIMARY KEY ");
        def.push_str(dialect.auto_increment_clause());
    } else {
        if !field.nullable || in_primary {
            def.push_str(" NOT NULL");
        }
        if let Some(initial) = &field.initial {
            if !initial.is_null() {
                def.push_str(" DEFAULT ");
                def.push_str(&dialect.escape_value(initial, Some(field)));
            }
        }
    }
    Ok(def)
}

/// Column definitions for every non-deprecated declared field.
pub fn column_defs(model: &Model, dialect: &dyn Dialect) -> Result<Vec<String>> {
    model
        .fields
        .iter()
        .filter(|(_, field)| !field.deprecated)
        .map(|(name, _)| column_def(name, model, dialect))
        .collect()
}

/// Table-level constraints: composite primary key, unique groups,
/// foreign keys.
#[must_use]
pub fn constraint_defs(model: &Model, dialect: &dyn Dialect) -> Vec<String> {
    let mut constraints = Vec::new();
    if !model.auto_inc && !model.primary.is_empty() {
        constraints.push(format!(
            "PRIMARY KEY ({})",
            quote_list(&model.primary, dialect)
        ));
    }
    for group in &model.unique {
        constraints.push(format!("UNIQUE ({})", quote_list(group, dialect)));
    }
    for (field, (table, referenced)) in &model.foreign {
        constraints.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            dialect.escape_id(field),
            dialect.escape_id(table),
            dialect.escape_id(referenced)
        ));
    }
    constraints
}

fn quote_list(names: &[String], dialect: &dyn Dialect) -> String {
    names
        .iter()
        .map(|n| dialect.escape_id(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Definitions of declared fields with no live counterpart, for backends
/// that only synchronize additively.
pub fn missing_columns(
    model: &Model,
    live: &[LiveColumn],
    dialect: &dyn Dialect,
) -> Result<Vec<String>> {
    model
        .fields
        .iter()
        .filter(|(name, field)| {
            !field.deprecated
                && !live.iter().any(|col| {
                    col.name == **name || field.legacy.iter().any(|legacy| *legacy == col.name)
                })
        })
        .map(|(name, _)| column_def(name, model, dialect))
        .collect()
}

/// Uppercases and strips whitespace so catalog type names compare
/// against generated ones ("decimal(10,0)" matches "DECIMAL(10, 0)").
fn normalize_type(type_name: &str) -> String {
    type_name
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Diffs the live columns against the declared model.
///
/// `drop_keys` lists live columns the caller allows to disappear during
/// a rebuild; every other unmapped live column is carried over.
pub fn plan(
    model: &Model,
    live: &[LiveColumn],
    drop_keys: &[String],
    dialect: &dyn Dialect,
) -> Result<SyncAction> {
    if live.is_empty() {
        return Ok(SyncAction::Create {
            columns: column_defs(model, dialect)?,
            constraints: constraint_defs(model, dialect),
        });
    }

    let mut mapping = Vec::new();
    let mut adds = Vec::new();
    let mut dirty = false;

    for (name, field) in &model.fields {
        if field.deprecated {
            continue;
        }
        let matched = live.iter().find(|col| {
            col.name == *name || field.legacy.iter().any(|legacy| *legacy == col.name)
        });
        match matched {
            None => adds.push(name.clone()),
            Some(col) => {
                let auto_inc =
                    model.auto_inc && model.primary.len() == 1 && model.primary[0] == *name;
                let declared_type = normalize_type(&dialect.column_type(field, auto_inc)?);
                if col.name != *name || normalize_type(&col.type_name) != declared_type {
                    dirty = true;
                }
                mapping.push(ColumnMapping {
                    from: col.name.clone(),
                    to: name.clone(),
                });
            }
        }
    }

    let mapped_live: Vec<&str> = mapping.iter().map(|m| m.from.as_str()).collect();
    let kept: Vec<&LiveColumn> = live
        .iter()
        .filter(|col| {
            !mapped_live.contains(&col.name.as_str())
                && !drop_keys.iter().any(|key| *key == col.name)
        })
        .collect();
    let dropped = live
        .iter()
        .any(|col| drop_keys.iter().any(|key| *key == col.name));

    if !dirty && !dropped {
        if adds.is_empty() {
            return Ok(SyncAction::None);
        }
        let columns = adds
            .iter()
            .map(|name| column_def(name, model, dialect))
            .collect::<Result<Vec<_>>>()?;
        return Ok(SyncAction::Add { columns });
    }

    let mut columns = column_defs(model, dialect)?;
    let mut full_mapping = mapping;
    for col in kept {
        let mut def = format!("{} {}", dialect.escape_id(&col.name), col.type_name);
        if !col.nullable {
            def.push_str(" NOT NULL");
        }
        columns.push(def);
        full_mapping.push(ColumnMapping {
            from: col.name.clone(),
            to: col.name.clone(),
        });
    }
    Ok(SyncAction::Rebuild {
        columns,
        constraints: constraint_defs(model, dialect),
        mapping: full_mapping,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GenericDialect;
    use crate::field::{Field, FieldType};
    use crate::model::ModelOptions;
    use indexmap::IndexMap;

    fn model() -> Model {
        let mut fields = IndexMap::new();
        fields.insert("id".to_string(), Field::new(FieldType::Primary));
        fields.insert(
            "text".to_string(),
            Field::new(FieldType::String).legacy(["caption"]),
        );
        Model::new("bar", fields, ModelOptions::auto_inc("id")).unwrap()
    }

    fn live(columns: &[(&str, &str)]) -> Vec<LiveColumn> {
        columns
            .iter()
            .map(|(name, ty)| LiveColumn {
                name: (*name).to_string(),
                type_name: (*ty).to_string(),
                nullable: true,
                default: None,
                primary: *name == "id",
            })
            .collect()
    }

    #[test]
    fn creates_when_no_live_columns() {
        let action = plan(&model(), &[], &[], &GenericDialect::new()).unwrap();
        match action {
            SyncAction::Create { columns, .. } => {
                assert_eq!(
                    columns[0],
                    "`id` INTEGER NOT NULL PRIMARY KEY AUTO_INCREMENT"
                );
                assert_eq!(columns[1], "`text` VARCHAR(255)");
            }
            other => panic!("expected Create, got {other:?}"),
        }
    }

    #[test]
    fn noop_when_synchronized() {
        let action = plan(
            &model(),
            &live(&[("id", "INTEGER"), ("text", "VARCHAR(255)")]),
            &[],
            &GenericDialect::new(),
        )
        .unwrap();
        assert!(matches!(action, SyncAction::None));
    }

    #[test]
    fn adds_missing_columns() {
        let action = plan(
            &model(),
            &live(&[("id", "INTEGER")]),
            &[],
            &GenericDialect::new(),
        )
        .unwrap();
        match action {
            SyncAction::Add { columns } => assert_eq!(columns, vec!["`text` VARCHAR(255)"]),
            other => panic!("expected Add, got {other:?}"),
        }
    }

    #[test]
    fn legacy_alias_triggers_rebuild_with_mapping() {
        let action = plan(
            &model(),
            &live(&[("id", "INTEGER"), ("caption", "VARCHAR(255)")]),
            &[],
            &GenericDialect::new(),
        )
        .unwrap();
        match action {
            SyncAction::Rebuild { mapping, .. } => {
                assert!(mapping.contains(&ColumnMapping {
                    from: "caption".into(),
                    to: "text".into()
                }));
            }
            other => panic!("expected Rebuild, got {other:?}"),
        }
    }

    #[test]
    fn unmapped_live_columns_survive_rebuild_unless_dropped() {
        let live = live(&[
            ("id", "INTEGER"),
            ("caption", "VARCHAR(255)"),
            ("extra", "TEXT"),
        ]);
        let action = plan(&model(), &live, &[], &GenericDialect::new()).unwrap();
        match action {
            SyncAction::Rebuild {
                columns, mapping, ..
            } => {
                assert!(columns.iter().any(|c| c.starts_with("`extra`")));
                assert!(mapping.contains(&ColumnMapping {
                    from: "extra".into(),
                    to: "extra".into()
                }));
            }
            other => panic!("expected Rebuild, got {other:?}"),
        }

        let action = plan(
            &model(),
            &[
                LiveColumn {
                    name: "id".into(),
                    type_name: "INTEGER".into(),
                    nullable: false,
                    default: None,
                    primary: true,
                },
                LiveColumn {
                    name: "text".into(),
                    type_name: "VARCHAR(255)".into(),
                    nullable: true,
                    default: None,
                    primary: false,
                },
                LiveColumn {
                    name: "extra".into(),
                    type_name: "TEXT".into(),
                    nullable: true,
                    default: None,
                    primary: false,
                },
            ],
            &[String::from("extra")],
            &GenericDialect::new(),
        )
        .unwrap();
        match action {
            SyncAction::Rebuild { columns, .. } => {
                assert!(!columns.iter().any(|c| c.starts_with("`extra`")));
            }
            other => panic!("expected Rebuild, got {other:?}"),
        }
    }

    #[test]
    fn composite_primary_emits_constraint() {
        let mut fields = IndexMap::new();
        fields.insert("a".to_string(), Field::new(FieldType::Integer));
        fields.insert("b".to_string(), Field::new(FieldType::Integer));
        let model = Model::new("t", fields, ModelOptions::primary(["a", "b"])).unwrap();
        let constraints = constraint_defs(&model, &GenericDialect::new());
        assert_eq!(constraints, vec!["PRIMARY KEY (`a`, `b`)"]);
    }
}
