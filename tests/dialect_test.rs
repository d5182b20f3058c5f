// tests/dialect_test.rs
// Dialect isolation and the engine surface over an embedded dataset.

mod common;

use common::*;
use querydeck_backend::connections::CreateConnectionRequest;
use querydeck_backend::engine::clickhouse::ClickhouseClient;
use querydeck_backend::engine::{
    catalog, open, ClickhousePayload, ConnectionPayload, EngineHandle, EngineKind, SqlitePayload,
};
use serde_json::json;

/// ClickHouse metadata statements must never touch information_schema: the
/// server has no COLUMNS/TABLES/VIEWS/SCHEMATA/KEY_COLUMN_USAGE aliases and
/// such statements fail outright.
#[test]
fn clickhouse_catalog_uses_system_tables_only() {
    for sql in [catalog::CLICKHOUSE_TABLES, catalog::CLICKHOUSE_COLUMNS] {
        let lowered = sql.to_lowercase();
        assert!(lowered.contains("system."), "must read the system catalog");
        assert!(!lowered.contains("information_schema"));
        for forbidden in [
            "columns from information",
            "key_column_usage",
            "referential_constraints",
            "schemata",
        ] {
            assert!(!lowered.contains(forbidden));
        }
    }
}

#[test]
fn postgres_catalog_reads_information_schema() {
    assert!(catalog::POSTGRES_TABLES.contains("information_schema.tables"));
    assert!(catalog::POSTGRES_COLUMNS.contains("information_schema.columns"));
}

#[test]
fn sqlite_catalog_reads_sqlite_master() {
    assert!(catalog::SQLITE_TABLES.contains("sqlite_master"));
}

#[test]
fn identifier_quoting_is_dialect_specific() {
    let payload = ClickhousePayload {
        host: "ch".to_string(),
        port: 8123,
        database: "d".to_string(),
        username: "u".to_string(),
        password: "p".to_string(),
        secure: false,
    };
    let clickhouse = EngineHandle::Clickhouse(ClickhouseClient::new(&payload));
    assert_eq!(clickhouse.quote_ident("sales"), "`sales`");
    assert_eq!(clickhouse.quote_ident("we`ird"), "`we``ird`");
    assert_eq!(clickhouse.dialect(), EngineKind::Clickhouse);
}

#[tokio::test]
async fn sqlite_engine_lists_samples_and_executes() {
    let env = env().await;
    seed_orders_dataset(&env, "sales").await;

    let payload = ConnectionPayload::Sqlite(SqlitePayload {
        dataset_id: "sales".to_string(),
    });
    let engine = open(&payload, &env.dir.path().join("datasets")).await.unwrap();
    assert_eq!(engine.dialect(), EngineKind::Sqlite);
    assert_eq!(engine.quote_ident("orders"), "\"orders\"");

    let tables = engine.list_tables().await.unwrap();
    assert_eq!(tables, vec!["orders".to_string(), "secrets".to_string()]);

    let columns = engine.list_columns("orders").await.unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "customer", "amount"]);

    let sample = engine.sample("orders", 10).await.unwrap();
    assert_eq!(sample.len(), 3);
    assert_eq!(sample.columns, vec!["id", "customer", "amount"]);

    let capped = engine
        .execute("SELECT * FROM orders ORDER BY id", Some(2))
        .await
        .unwrap();
    assert_eq!(capped.len(), 2);
    assert_eq!(capped.rows[0][1], json!("acme"));
    assert_eq!(capped.rows[1][2], json!(20.5));

    let bad = engine.execute("SELECT nope FROM missing", None).await;
    assert!(bad.is_err());
}

#[tokio::test]
async fn missing_dataset_is_a_connect_error_with_masked_dsn() {
    let env = env().await;

    let payload = ConnectionPayload::Sqlite(SqlitePayload {
        dataset_id: "absent".to_string(),
    });
    let err = open(&payload, &env.dir.path().join("datasets"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("connection failed"));
}

/// Probing an unreachable ClickHouse never leaks the password into the
/// outcome message.
#[tokio::test]
async fn probe_failure_masks_credentials() {
    let env = env().await;

    let outcome = env
        .state
        .connections
        .probe(&CreateConnectionRequest {
            kind: "clickhouse".to_string(),
            payload: json!({
                "host": "127.0.0.1",
                "port": 1,
                "database": "d",
                "username": "reader",
                "password": "supersecretpw"
            }),
        })
        .await;

    assert!(!outcome.valid);
    assert!(!outcome.message.contains("supersecretpw"));
    assert_eq!(outcome.kind, "clickhouse");
}

/// Payload shapes are validated at connection creation.
#[tokio::test]
async fn malformed_payloads_are_rejected() {
    let env = env().await;
    let user = register_user(&env, "u@x.com").await;

    let err = env
        .state
        .connections
        .create(
            &user.id,
            CreateConnectionRequest {
                kind: "postgres".to_string(),
                payload: json!({ "host": "pg" }),
            },
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid input"));

    let err = env
        .state
        .connections
        .create(
            &user.id,
            CreateConnectionRequest {
                kind: "oracle".to_string(),
                payload: json!({}),
            },
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown connection kind"));
}
