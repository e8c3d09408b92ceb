//! Schema synchronization and persistence behavior.

use std::sync::Arc;

use indexmap::IndexMap;
use strata_core::driver::Driver;
use strata_core::eval;
use strata_core::field::{Field, FieldType};
use strata_core::model::{ModelOptions, Registry};
use strata_core::query::Query;
use strata_core::selection::Selection;
use strata_core::value::{Object, Value};
use strata_sqlite::{SqliteConfig, SqliteDriver};

fn object(pairs: Vec<(&str, Value)>) -> Object {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

async fn started(registry: &Arc<Registry>, config: SqliteConfig) -> SqliteDriver {
    let driver = SqliteDriver::new(Arc::clone(registry), config);
    driver.start().await.unwrap();
    driver
}

#[tokio::test]
async fn prepare_is_idempotent() {
    let registry = Arc::new(Registry::new());
    let mut fields = IndexMap::new();
    fields.insert("id".to_string(), Field::new(FieldType::Primary));
    fields.insert("name".to_string(), Field::new(FieldType::String));
    registry
        .extend("item", fields, ModelOptions::auto_inc("id"))
        .unwrap();

    let driver = started(&registry, SqliteConfig::default()).await;
    driver.prepare("item", &[]).await.unwrap();

    let sel = Selection::new(registry.model("item").unwrap());
    driver
        .create(&sel, &object(vec![("name", Value::from("kept"))]))
        .await
        .unwrap();

    // A second pass issues no DDL and loses nothing.
    driver.prepare("item", &[]).await.unwrap();
    let rows = driver.get(&sel).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::from("kept")));
}

#[tokio::test]
async fn legacy_alias_renames_and_preserves_data() {
    let registry = Arc::new(Registry::new());

    // Old shape: the column is still called `caption`.
    let mut fields = IndexMap::new();
    fields.insert("id".to_string(), Field::new(FieldType::Primary));
    fields.insert("caption".to_string(), Field::new(FieldType::String));
    registry
        .extend("post", fields, ModelOptions::auto_inc("id"))
        .unwrap();

    let driver = started(&registry, SqliteConfig::default()).await;
    driver.prepare("post", &[]).await.unwrap();
    let old_sel = Selection::new(registry.model("post").unwrap());
    driver
        .create(&old_sel, &object(vec![("caption", Value::from("hello"))]))
        .await
        .unwrap();

    // New shape: `text`, declaring `caption` as its legacy name.
    let mut fields = IndexMap::new();
    fields.insert("id".to_string(), Field::new(FieldType::Primary));
    fields.insert(
        "text".to_string(),
        Field::new(FieldType::String).legacy(["caption"]),
    );
    registry
        .extend("post", fields, ModelOptions::auto_inc("id"))
        .unwrap();
    driver.prepare("post", &[]).await.unwrap();

    let sel = Selection::new(registry.model("post").unwrap());
    let rows = driver.get(&sel).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("text"), Some(&Value::from("hello")));
    assert!(rows[0].get("caption").is_none());
}

#[tokio::test]
async fn new_columns_are_added_in_place() {
    let registry = Arc::new(Registry::new());
    let mut fields = IndexMap::new();
    fields.insert("id".to_string(), Field::new(FieldType::Primary));
    registry
        .extend("grow", fields.clone(), ModelOptions::auto_inc("id"))
        .unwrap();

    let driver = started(&registry, SqliteConfig::default()).await;
    driver.prepare("grow", &[]).await.unwrap();
    let sel = Selection::new(registry.model("grow").unwrap());
    driver.create(&sel, &Object::new()).await.unwrap();

    fields.insert(
        "level".to_string(),
        Field::new(FieldType::Integer).initial(0i64),
    );
    registry
        .extend("grow", fields, ModelOptions::auto_inc("id"))
        .unwrap();
    driver.prepare("grow", &[]).await.unwrap();

    let sel = Selection::new(registry.model("grow").unwrap());
    let rows = driver.get(&sel).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("level"), Some(&Value::Int(0)));
}

#[tokio::test]
async fn json_fields_round_trip_and_support_dotted_updates() {
    let registry = Arc::new(Registry::new());
    let mut fields = IndexMap::new();
    fields.insert("id".to_string(), Field::new(FieldType::Primary));
    fields.insert(
        "meta".to_string(),
        Field::new(FieldType::Json).initial(serde_json::json!({})),
    );
    registry
        .extend("doc", fields, ModelOptions::auto_inc("id"))
        .unwrap();

    let driver = started(&registry, SqliteConfig::default()).await;
    driver.prepare("doc", &[]).await.unwrap();
    let sel = Selection::new(registry.model("doc").unwrap());

    let nested = serde_json::json!({"a": {"b": [1, 2, 3]}, "s": "x"});
    let created = driver
        .create(&sel, &object(vec![("meta", Value::Json(nested.clone()))]))
        .await
        .unwrap();
    let id = created.get("id").and_then(Value::as_i64).unwrap();

    let rows = driver
        .get(&sel.clone().filter(Query::eq("id", id)))
        .await
        .unwrap();
    assert_eq!(rows[0].get("meta"), Some(&Value::Json(nested)));

    // Dotted update rewrites one leaf of the document.
    let mut update = IndexMap::new();
    update.insert("meta.s".to_string(), eval::lit("y"));
    driver
        .set(&sel.clone().filter(Query::eq("id", id)), &update)
        .await
        .unwrap();

    let rows = driver
        .get(&sel.clone().filter(Query::eq("id", id)))
        .await
        .unwrap();
    let meta = match rows[0].get("meta") {
        Some(Value::Json(v)) => v.clone(),
        other => panic!("expected json, got {other:?}"),
    };
    assert_eq!(meta["s"], serde_json::json!("y"));
    assert_eq!(meta["a"]["b"], serde_json::json!([1, 2, 3]));

    // Dotted query through json_extract.
    let rows = driver
        .get(&sel.clone().filter(Query::eq("meta.s", "y")))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    // Element containment via the registered UDF.
    let rows = driver
        .get(&sel.clone().filter(Query::el("meta.a.b", 2i64)))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.db");
    let path = path.to_str().unwrap().to_string();

    let registry = Arc::new(Registry::new());
    let mut fields = IndexMap::new();
    fields.insert("id".to_string(), Field::new(FieldType::Primary));
    fields.insert("name".to_string(), Field::new(FieldType::String));
    registry
        .extend("item", fields, ModelOptions::auto_inc("id"))
        .unwrap();

    let driver = started(&registry, SqliteConfig::file(&path)).await;
    driver.prepare("item", &[]).await.unwrap();
    let sel = Selection::new(registry.model("item").unwrap());
    driver
        .create(&sel, &object(vec![("name", Value::from("durable"))]))
        .await
        .unwrap();
    driver.stop().await.unwrap();

    let revived = started(&registry, SqliteConfig::file(&path)).await;
    revived.prepare("item", &[]).await.unwrap();
    let rows = revived.get(&sel).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::from("durable")));
    revived.stop().await.unwrap();
}
