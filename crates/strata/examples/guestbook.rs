//! A minimal end-to-end tour: declare a table, synchronize it, and run
//! the main operations against the embedded backend.
//!
//! Run with: `cargo run --example guestbook`

use indexmap::IndexMap;
use strata::sqlite::{SqliteConfig, SqliteDriver};
use strata::{eval, Database, Field, FieldType, ModelOptions, Object, Query, Value};

#[tokio::main]
async fn main() -> strata::Result<()> {
    let db = Database::connect(|registry| SqliteDriver::new(registry, SqliteConfig::default()));

    let mut fields = IndexMap::new();
    fields.insert("id".to_string(), Field::new(FieldType::Primary));
    fields.insert("author".to_string(), Field::new(FieldType::String).length(64));
    fields.insert("message".to_string(), Field::new(FieldType::Text));
    fields.insert("stars".to_string(), Field::new(FieldType::Integer).initial(0i64));
    fields.insert("tags".to_string(), Field::new(FieldType::List));
    db.extend("entry", fields, ModelOptions::auto_inc("id"))?;

    db.start().await?;
    db.prepare_all().await?;

    let mut entry = Object::new();
    entry.insert("author".to_string(), Value::from("ada"));
    entry.insert("message".to_string(), Value::from("hello from 1843"));
    entry.insert(
        "tags".to_string(),
        Value::List(vec!["history".into(), "math".into()]),
    );
    let created = db.create("entry", &entry).await?;
    println!("created: {created:?}");

    let mut bump = IndexMap::new();
    bump.insert(
        "stars".to_string(),
        eval::add(vec![eval::field("stars"), eval::lit(1i64)]),
    );
    db.set("entry", Query::eq("author", "ada"), &bump).await?;

    let tagged = db
        .get("entry", Query::el("tags", "math"), None)
        .await?;
    println!("tagged with math: {}", tagged.len());

    let total = db.eval("entry", &eval::sum(eval::field("stars"))).await?;
    println!("total stars: {total:?}");

    db.stop().await
}
