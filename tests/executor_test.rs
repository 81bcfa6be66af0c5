//! Integration tests for the query executor over a SQLite fixture.
//!
//! Tests verify that:
//! - Reads return order-preserving row maps
//! - Writes with named parameters are committed and report affected rows
//! - Every fault becomes exactly one error notice and no result
//! - A failing write leaves no partial changes behind

use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use windmanager_db::config::ConnectionSettings;
use windmanager_db::db::{
    AddressResolver, ConnectionFactory, ConnectionHandle, CredentialResolver, DbPool,
    QueryExecutor,
};
use windmanager_db::models::{NamedParams, QueryParam, QueryResult};
use windmanager_db::notice::{NoticeLevel, NoticeLog};

/// Executor over a file-backed SQLite database with three companies.
async fn setup() -> (QueryExecutor, Arc<NoticeLog>, TempDir) {
    let dir = TempDir::new().unwrap();
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("fixture.db"))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .unwrap();

    sqlx::query("CREATE TABLE companies (id INTEGER PRIMARY KEY, name TEXT NOT NULL, country TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO companies (id, name, country) VALUES (1, 'Nordex', 'DE'), (2, 'Vestas', 'DK'), (3, 'Enercon', 'DE')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let factory = Arc::new(ConnectionFactory::new(
        ConnectionSettings::default(),
        CredentialResolver::new(),
        AddressResolver::new(Duration::from_secs(1)),
    ));
    factory
        .seed(ConnectionHandle::from_pool(DbPool::SQLite(pool)))
        .await;

    let notices = NoticeLog::new();
    let executor = QueryExecutor::new(factory, notices.clone());
    (executor, notices, dir)
}

fn params(pairs: &[(&str, QueryParam)]) -> NamedParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

async fn company_name(executor: &QueryExecutor, id: i64) -> serde_json::Value {
    let rows = executor
        .execute(
            "SELECT name FROM companies WHERE id = :id",
            &params(&[("id", QueryParam::Int(id))]),
        )
        .await
        .into_rows()
        .unwrap();
    rows[0]["name"].clone()
}

#[tokio::test]
async fn test_select_returns_row_maps() {
    let (executor, notices, _dir) = setup().await;

    let result = executor
        .execute("SELECT id, name FROM companies LIMIT 5", &NamedParams::new())
        .await;
    let rows = result.rows().expect("expected rows");

    assert_eq!(rows.len(), 3);
    for row in rows {
        let keys: Vec<&str> = row.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["id", "name"]);
    }
    assert_eq!(rows[0]["id"], json!(1));
    assert_eq!(rows[1]["name"], json!("Vestas"));
    assert!(notices.notices().is_empty());
}

#[tokio::test]
async fn test_select_column_order_follows_select_list() {
    let (executor, _notices, _dir) = setup().await;

    let rows = executor
        .execute("SELECT name, country, id FROM companies WHERE id = 1", &NamedParams::new())
        .await
        .into_rows()
        .unwrap();
    let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["name", "country", "id"]);
}

#[tokio::test]
async fn test_classification_ignores_case_whitespace_and_comments() {
    let (executor, _notices, _dir) = setup().await;

    let result = executor
        .execute("\n  -- all companies\n  select count(*) AS n from companies", &NamedParams::new())
        .await;
    assert_eq!(result.rows().unwrap()[0]["n"], json!(3));

    let result = executor
        .execute(
            "WITH de AS (SELECT * FROM companies WHERE country = 'DE') SELECT id FROM de",
            &NamedParams::new(),
        )
        .await;
    assert_eq!(result.rows().map(|r| r.len()), Some(2));
}

#[tokio::test]
async fn test_update_with_named_params() {
    let (executor, notices, _dir) = setup().await;

    let result = executor
        .execute(
            "UPDATE companies SET name = :n WHERE id = :i",
            &params(&[("n", QueryParam::from("Acme")), ("i", QueryParam::Int(1))]),
        )
        .await;

    assert_eq!(result, QueryResult::Affected(1));
    assert_eq!(company_name(&executor, 1).await, json!("Acme"));
    assert!(notices.notices().is_empty());
}

#[tokio::test]
async fn test_write_matching_nothing_reports_zero() {
    let (executor, _notices, _dir) = setup().await;

    let result = executor
        .execute(
            "DELETE FROM companies WHERE country = :c",
            &params(&[("c", QueryParam::from("FR"))]),
        )
        .await;
    assert_eq!(result, QueryResult::Affected(0));
}

#[tokio::test]
async fn test_unused_params_are_ignored() {
    let (executor, notices, _dir) = setup().await;

    let result = executor
        .execute(
            "SELECT id FROM companies WHERE country = :c",
            &params(&[("c", QueryParam::from("DE")), ("extra", QueryParam::Int(7))]),
        )
        .await;
    assert_eq!(result.rows().map(|r| r.len()), Some(2));
    assert!(notices.notices().is_empty());
}

#[tokio::test]
async fn test_invalid_sql_yields_one_error_notice() {
    let (executor, notices, _dir) = setup().await;

    let result = executor
        .execute("SELECT * FROM no_such_table", &NamedParams::new())
        .await;

    assert_eq!(result, QueryResult::NoResult);
    let all = notices.notices();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].level, NoticeLevel::Error);
    assert!(all[0].message.contains("no_such_table"));
}

#[tokio::test]
async fn test_missing_param_yields_one_error_notice() {
    let (executor, notices, _dir) = setup().await;

    let result = executor
        .execute(
            "UPDATE companies SET name = :n WHERE id = :i",
            &params(&[("n", QueryParam::from("Acme"))]),
        )
        .await;

    assert!(result.is_no_result());
    assert_eq!(notices.count(NoticeLevel::Error), 1);
    assert!(notices.notices()[0].message.contains(":i"));
    assert_eq!(company_name(&executor, 1).await, json!("Nordex"));
}

#[tokio::test]
async fn test_failed_write_is_not_partially_applied() {
    let (executor, notices, _dir) = setup().await;

    let result = executor
        .execute(
            "UPDATE companies SET name = 'Gone' WHERE id = 2; INSERT INTO no_such_table VALUES (1)",
            &NamedParams::new(),
        )
        .await;

    assert!(result.is_no_result());
    assert_eq!(notices.count(NoticeLevel::Error), 1);
    assert_eq!(company_name(&executor, 2).await, json!("Vestas"));
}

#[tokio::test]
async fn test_string_literals_are_not_parameters() {
    let (executor, notices, _dir) = setup().await;

    let result = executor
        .execute(
            "SELECT 'ratio 1:2' AS label, name FROM companies WHERE id = :id",
            &params(&[("id", QueryParam::Int(3))]),
        )
        .await;
    let rows = result.into_rows().unwrap();
    assert_eq!(rows[0]["label"], json!("ratio 1:2"));
    assert_eq!(rows[0]["name"], json!("Enercon"));
    assert!(notices.notices().is_empty());
}

#[tokio::test]
async fn test_insert_null_and_read_back() {
    let (executor, _notices, _dir) = setup().await;

    let result = executor
        .execute(
            "INSERT INTO companies (id, name, country) VALUES (:id, :name, :country)",
            &params(&[
                ("id", QueryParam::Int(4)),
                ("name", QueryParam::from("Siemens Gamesa")),
                ("country", QueryParam::Null),
            ]),
        )
        .await;
    assert_eq!(result, QueryResult::Affected(1));

    let rows = executor
        .execute("SELECT country FROM companies WHERE id = 4", &NamedParams::new())
        .await
        .into_rows()
        .unwrap();
    assert_eq!(rows[0]["country"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_duplicate_column_names_raise_warning() {
    let (executor, notices, _dir) = setup().await;

    let rows = executor
        .execute(
            "SELECT a.id, b.id FROM companies a JOIN companies b ON b.id = a.id + 1 WHERE a.id = 1",
            &NamedParams::new(),
        )
        .await
        .into_rows()
        .unwrap();

    assert_eq!(rows[0].len(), 1);
    assert_eq!(rows[0]["id"], json!(2));
    let all = notices.notices();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].level, NoticeLevel::Warning);
    assert!(all[0].message.contains("id"));
}
