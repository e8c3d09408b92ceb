//! Façade behavior over the embedded backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;
use strata::sqlite::{SqliteConfig, SqliteDriver};
use strata::{
    eval, Database, Field, FieldType, MigrationHooks, ModelOptions, Object, Query, Value,
};

fn object(pairs: Vec<(&str, Value)>) -> Object {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn user_fields() -> IndexMap<String, Field> {
    let mut fields = IndexMap::new();
    fields.insert("id".to_string(), Field::new(FieldType::Primary));
    fields.insert("name".to_string(), Field::new(FieldType::String));
    fields.insert("age".to_string(), Field::new(FieldType::Integer));
    fields.insert("flags".to_string(), Field::new(FieldType::Integer).initial(0i64));
    fields
}

async fn database() -> Database<SqliteDriver> {
    let db = Database::connect(|registry| SqliteDriver::new(registry, SqliteConfig::default()));
    db.extend("user", user_fields(), ModelOptions::auto_inc("id"))
        .unwrap();
    db.start().await.unwrap();
    db.prepare_all().await.unwrap();
    db
}

#[tokio::test]
async fn create_get_set_remove_cycle() {
    let db = database().await;

    let alice = db
        .create(
            "user",
            &object(vec![("name", Value::from("alice")), ("age", Value::Int(30))]),
        )
        .await
        .unwrap();
    db.create(
        "user",
        &object(vec![("name", Value::from("bob")), ("age", Value::Int(17))]),
    )
    .await
    .unwrap();

    let adults = db
        .get("user", Query::gte("age", 18i64), None)
        .await
        .unwrap();
    assert_eq!(adults.len(), 1);
    assert_eq!(adults[0].get("name"), Some(&Value::from("alice")));
    assert_eq!(adults[0].get("id"), alice.get("id"));

    let mut update = IndexMap::new();
    update.insert("age".to_string(), eval::lit(31i64));
    let affected = db
        .set("user", Query::eq("name", "alice"), &update)
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let removed = db.remove("user", Query::lt("age", 18i64)).await.unwrap();
    assert_eq!(removed, 1);
    let rest = db.get("user", Query::all(), None).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].get("age"), Some(&Value::Int(31)));
}

#[tokio::test]
async fn upsert_defaults_to_the_primary_key() {
    let db = database().await;

    let stored = db
        .create("user", &object(vec![("name", Value::from("carol"))]))
        .await
        .unwrap();
    let id = stored.get("id").cloned().unwrap();

    db.upsert(
        "user",
        &[
            object(vec![("id", id.clone()), ("age", Value::Int(44))]),
            object(vec![("id", Value::Int(500)), ("name", Value::from("dan"))]),
        ],
        None,
    )
    .await
    .unwrap();

    let carol = db.get("user", Query::eq("id", id), None).await.unwrap();
    assert_eq!(carol[0].get("name"), Some(&Value::from("carol")));
    assert_eq!(carol[0].get("age"), Some(&Value::Int(44)));

    let dan = db.get("user", Query::eq("id", 500i64), None).await.unwrap();
    assert_eq!(dan.len(), 1);
}

#[tokio::test]
async fn eval_aggregates_over_the_table() {
    let db = database().await;
    for age in [20i64, 30, 40] {
        db.create("user", &object(vec![("age", Value::Int(age))]))
            .await
            .unwrap();
    }
    let total = db
        .eval("user", &eval::sum(eval::field("age")))
        .await
        .unwrap();
    assert_eq!(total.as_f64(), Some(90.0));

    let count = db
        .eval("user", &eval::count(eval::field("age")))
        .await
        .unwrap();
    assert_eq!(count.as_i64(), Some(3));
}

#[tokio::test]
async fn migration_hooks_contribute_drop_keys() {
    let db = Database::connect(|registry| SqliteDriver::new(registry, SqliteConfig::default()));

    // Old shape still carries a `legacy_score` column.
    let mut fields = user_fields();
    fields.insert("legacy_score".to_string(), Field::new(FieldType::Integer));
    db.extend("user", fields, ModelOptions::auto_inc("id"))
        .unwrap();
    db.start().await.unwrap();
    db.prepare("user").await.unwrap();
    db.create("user", &object(vec![("name", Value::from("eve"))]))
        .await
        .unwrap();

    // New shape drops it; the hook declares the column disposable.
    db.extend("user", user_fields(), ModelOptions::auto_inc("id"))
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    db.migration(
        "user",
        MigrationHooks {
            after: Some(Arc::new(move |_model| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(vec![String::from("legacy_score")])
            })),
            ..MigrationHooks::default()
        },
    );
    db.prepare("user").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A load of every column succeeds only if the stray column is gone.
    let rows = db.get("user", Query::all(), None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].get("legacy_score").is_none());
}

#[tokio::test]
async fn drop_and_stats() {
    let db = database().await;
    db.create("user", &object(vec![("name", Value::from("gone"))]))
        .await
        .unwrap();
    let stats = db.stats().await.unwrap();
    assert_eq!(stats.tables.get("user").map(|t| t.count), Some(1));

    db.drop(None).await.unwrap();
    // The table is gone; preparing recreates it empty.
    db.prepare("user").await.unwrap();
    assert!(db.get("user", Query::all(), None).await.unwrap().is_empty());
    db.stop().await.unwrap();
}
