//! End-to-end driver behavior against in-memory SQLite.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use indexmap::IndexMap;
use strata_core::driver::Driver;
use strata_core::eval;
use strata_core::field::{Field, FieldType};
use strata_core::model::{ModelOptions, Registry};
use strata_core::query::Query;
use strata_core::selection::Selection;
use strata_core::value::{Object, Value};
use strata_sqlite::{SqliteConfig, SqliteDriver};

fn bar_fields() -> IndexMap<String, Field> {
    let mut fields = IndexMap::new();
    fields.insert("id".to_string(), Field::new(FieldType::Unsigned));
    fields.insert("text".to_string(), Field::new(FieldType::String));
    fields.insert("num".to_string(), Field::new(FieldType::Integer));
    fields.insert("bool".to_string(), Field::new(FieldType::Boolean));
    fields.insert("list".to_string(), Field::new(FieldType::List));
    fields.insert("timestamp".to_string(), Field::new(FieldType::Timestamp));
    fields.insert("date".to_string(), Field::new(FieldType::Date));
    fields.insert("time".to_string(), Field::new(FieldType::Time));
    fields
}

fn object(pairs: Vec<(&str, Value)>) -> Object {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn seed_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 8, 17).unwrap()
}

fn seed_time() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap()
}

fn seed_rows() -> Vec<Object> {
    let d = seed_date();
    let t = seed_time();
    vec![
        object(vec![("id", Value::Int(1)), ("bool", Value::Bool(true))]),
        object(vec![("id", Value::Int(2)), ("text", Value::from("pku"))]),
        object(vec![("id", Value::Int(3)), ("num", Value::Int(1989))]),
        object(vec![
            ("id", Value::Int(4)),
            ("list", Value::List(vec!["1".into(), "1".into(), "4".into()])),
        ]),
        object(vec![
            ("id", Value::Int(5)),
            ("timestamp", Value::DateTime(d.and_time(NaiveTime::MIN))),
        ]),
        object(vec![("id", Value::Int(6)), ("date", Value::Date(d))]),
        object(vec![("id", Value::Int(7)), ("time", Value::Time(t))]),
    ]
}

async fn seeded() -> (SqliteDriver, Arc<Registry>) {
    let registry = Arc::new(Registry::new());
    registry
        .extend("bar", bar_fields(), ModelOptions::auto_inc("id"))
        .unwrap();
    let driver = SqliteDriver::new(Arc::clone(&registry), SqliteConfig::default());
    driver.start().await.unwrap();
    driver.prepare("bar", &[]).await.unwrap();
    let sel = Selection::new(registry.model("bar").unwrap());
    for row in seed_rows() {
        driver.create(&sel, &row).await.unwrap();
    }
    (driver, registry)
}

fn bar(registry: &Registry) -> Selection {
    Selection::new(registry.model("bar").unwrap())
}

fn set_text(value: Value) -> IndexMap<String, strata_core::eval::Eval> {
    let mut update = IndexMap::new();
    update.insert("text".to_string(), eval::lit(value));
    update
}

#[tokio::test]
async fn set_with_or_filter_touches_matching_rows() {
    let (driver, registry) = seeded().await;
    let d = seed_date();

    let filter = Query::is_in("id", [1i64, 2]).or(Query::eq(
        "timestamp",
        Value::DateTime(d.and_time(NaiveTime::MIN)),
    ));
    let sel = bar(&registry).filter(filter);
    let affected = driver.set(&sel, &set_text(Value::from("thu"))).await.unwrap();
    assert_eq!(affected, 3);

    let rows = driver
        .get(&bar(&registry).filter(Query::is_in("id", [1i64, 2, 5])))
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    for row in &rows {
        assert_eq!(row.get("text"), Some(&Value::from("thu")));
    }

    let untouched = driver
        .get(&bar(&registry).filter(Query::eq("id", 3i64)))
        .await
        .unwrap();
    assert_eq!(untouched[0].get("text"), Some(&Value::Null));
}

#[tokio::test]
async fn set_to_null_only_where_field_exists() {
    let (driver, registry) = seeded().await;

    let sel = bar(&registry).filter(Query::exists("timestamp", true));
    let affected = driver.set(&sel, &set_text(Value::Null)).await.unwrap();
    assert_eq!(affected, 1);

    let row5 = driver
        .get(&bar(&registry).filter(Query::eq("id", 5i64)))
        .await
        .unwrap();
    assert_eq!(row5[0].get("text"), Some(&Value::Null));

    let row2 = driver
        .get(&bar(&registry).filter(Query::eq("id", 2i64)))
        .await
        .unwrap();
    assert_eq!(row2[0].get("text"), Some(&Value::from("pku")));
}

#[tokio::test]
async fn eval_sum_over_seed() {
    let (driver, registry) = seeded().await;
    let value = driver
        .eval(&bar(&registry), &eval::sum(eval::field("num")))
        .await
        .unwrap();
    assert_eq!(value.as_f64(), Some(1989.0));
}

#[tokio::test]
async fn eval_count_is_distinct_non_null() {
    let (driver, registry) = seeded().await;
    let value = driver
        .eval(&bar(&registry), &eval::count(eval::field("bool")))
        .await
        .unwrap();
    assert_eq!(value.as_i64(), Some(1));
}

#[tokio::test]
async fn upsert_updates_matches_and_inserts_the_rest() {
    let (driver, registry) = seeded().await;

    let items = vec![
        object(vec![("id", Value::Int(2)), ("num", Value::Int(1911))]),
        object(vec![("id", Value::Int(99)), ("text", Value::from("new"))]),
    ];
    driver
        .upsert(&bar(&registry), &items, &[String::from("id")])
        .await
        .unwrap();

    let row2 = driver
        .get(&bar(&registry).filter(Query::eq("id", 2i64)))
        .await
        .unwrap();
    assert_eq!(row2[0].get("num"), Some(&Value::Int(1911)));
    // Fields outside the item are preserved.
    assert_eq!(row2[0].get("text"), Some(&Value::from("pku")));

    let row99 = driver
        .get(&bar(&registry).filter(Query::eq("id", 99i64)))
        .await
        .unwrap();
    assert_eq!(row99[0].get("text"), Some(&Value::from("new")));

    let all = driver.get(&bar(&registry)).await.unwrap();
    assert_eq!(all.len(), 8);
    let row1 = driver
        .get(&bar(&registry).filter(Query::eq("id", 1i64)))
        .await
        .unwrap();
    assert_eq!(row1[0].get("bool"), Some(&Value::Bool(true)));
}

#[tokio::test]
async fn remove_with_range_filter() {
    let (driver, registry) = seeded().await;

    let removed = driver
        .remove(&bar(&registry).filter(Query::gt("id", 5i64)))
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let rest = driver.get(&bar(&registry)).await.unwrap();
    let ids: Vec<i64> = rest
        .iter()
        .map(|row| row.get("id").and_then(Value::as_i64).unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn empty_in_filter_is_a_no_op() {
    let (driver, registry) = seeded().await;

    let removed = driver
        .remove(&bar(&registry).filter(Query::is_in("id", Vec::<i64>::new())))
        .await
        .unwrap();
    assert_eq!(removed, 0);
    assert_eq!(driver.get(&bar(&registry)).await.unwrap().len(), 7);

    let got = driver
        .get(&bar(&registry).filter(Query::is_in("id", Vec::<i64>::new())))
        .await
        .unwrap();
    assert!(got.is_empty());
}

#[tokio::test]
async fn remove_all_then_get_is_empty() {
    let (driver, registry) = seeded().await;
    driver.remove(&bar(&registry)).await.unwrap();
    assert!(driver.get(&bar(&registry)).await.unwrap().is_empty());
}

#[tokio::test]
async fn create_assigns_distinct_auto_increment_ids() {
    let (driver, registry) = seeded().await;

    let a = driver
        .create(&bar(&registry), &object(vec![("text", Value::from("a"))]))
        .await
        .unwrap();
    let b = driver
        .create(&bar(&registry), &object(vec![("text", Value::from("b"))]))
        .await
        .unwrap();

    let id_a = a.get("id").and_then(Value::as_i64).unwrap();
    let id_b = b.get("id").and_then(Value::as_i64).unwrap();
    assert_ne!(id_a, id_b);

    let fetched = driver
        .get(&bar(&registry).filter(Query::eq("id", id_a)))
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0], a);
}

#[tokio::test]
async fn list_and_temporal_round_trips() {
    let (driver, registry) = seeded().await;

    let row4 = driver
        .get(&bar(&registry).filter(Query::eq("id", 4i64)))
        .await
        .unwrap();
    assert_eq!(
        row4[0].get("list"),
        Some(&Value::List(vec!["1".into(), "1".into(), "4".into()]))
    );

    let row5 = driver
        .get(&bar(&registry).filter(Query::eq("id", 5i64)))
        .await
        .unwrap();
    assert_eq!(
        row5[0].get("timestamp"),
        Some(&Value::DateTime(seed_date().and_time(NaiveTime::MIN)))
    );

    let row6 = driver
        .get(&bar(&registry).filter(Query::eq("id", 6i64)))
        .await
        .unwrap();
    assert_eq!(row6[0].get("date"), Some(&Value::Date(seed_date())));

    let row7 = driver
        .get(&bar(&registry).filter(Query::eq("id", 7i64)))
        .await
        .unwrap();
    assert_eq!(row7[0].get("time"), Some(&Value::Time(seed_time())));
}

#[tokio::test]
async fn list_element_and_size_filters() {
    let (driver, registry) = seeded().await;

    let rows = driver
        .get(&bar(&registry).filter(Query::el("list", "4")))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&Value::Int(4)));

    let rows = driver
        .get(&bar(&registry).filter(Query::size("list", 3)))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&Value::Int(4)));
}

#[tokio::test]
async fn regexp_filter_uses_registered_udf() {
    let (driver, registry) = seeded().await;

    let rows = driver
        .get(&bar(&registry).filter(Query::regex("text", "^pk")))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&Value::Int(2)));
}

#[tokio::test]
async fn projection_and_sort() {
    let (driver, registry) = seeded().await;

    let mut fields = IndexMap::new();
    fields.insert("id".to_string(), eval::field("id"));
    fields.insert(
        "doubled".to_string(),
        eval::multiply(vec![eval::field("id"), eval::lit(2i64)]),
    );
    let sel = bar(&registry)
        .filter(Query::lte("id", 3i64))
        .project(fields)
        .order_by(eval::field("id"), strata_core::selection::Direction::Desc);

    let rows = driver.get(&sel).await.unwrap();
    let pairs: Vec<(i64, i64)> = rows
        .iter()
        .map(|row| {
            (
                row.get("id").and_then(Value::as_i64).unwrap(),
                row.get("doubled").and_then(Value::as_i64).unwrap(),
            )
        })
        .collect();
    assert_eq!(pairs, vec![(3, 6), (2, 4), (1, 2)]);
}

#[tokio::test]
async fn set_with_row_expression() {
    let (driver, registry) = seeded().await;

    // num = num + 11 on row 3.
    let mut update = IndexMap::new();
    update.insert(
        "num".to_string(),
        eval::add(vec![eval::field("num"), eval::lit(11i64)]),
    );
    driver
        .set(&bar(&registry).filter(Query::eq("id", 3i64)), &update)
        .await
        .unwrap();

    let row3 = driver
        .get(&bar(&registry).filter(Query::eq("id", 3i64)))
        .await
        .unwrap();
    assert_eq!(row3[0].get("num").and_then(Value::as_i64), Some(2000));
}

#[tokio::test]
async fn duplicate_primary_key_is_reported() {
    let (driver, registry) = seeded().await;
    let err = driver
        .create(&bar(&registry), &object(vec![("id", Value::Int(1))]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        strata_core::error::StrataError::DuplicateEntry { .. }
    ));
}

#[tokio::test]
async fn stats_counts_rows() {
    let (driver, registry) = seeded().await;
    let _ = &registry;
    let stats = driver.stats().await.unwrap();
    assert_eq!(stats.tables.get("bar").map(|t| t.count), Some(7));
    assert!(stats.size > 0);
}
