// src/engine/mod.rs

//! Per-connection database abstraction.
//!
//! One `EngineHandle` per target database, with dialect-specific metadata
//! queries. Metadata is fetched lazily through the typed methods below; the
//! abstraction never calls a driver-level "reflect everything" primitive,
//! because ClickHouse has no `information_schema` and such calls fail with
//! `Unknown table expression identifier` errors. Each dialect reads its own
//! catalog: `sqlite_master`, `information_schema`, or `system.*`.

pub mod clickhouse;
pub mod manager;
pub mod rows;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{PgPool, SqlitePool};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::CoreError;
use clickhouse::ClickhouseClient;

/// Catalog statements, one set per dialect. ClickHouse statements must only
/// ever touch `system.*`: the server has no usable `information_schema`, and
/// queries against it fail with `Unknown table expression identifier`.
pub mod catalog {
    pub const SQLITE_TABLES: &str = "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

    pub const POSTGRES_TABLES: &str = "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
         ORDER BY table_name";

    pub const POSTGRES_COLUMNS: &str =
        "SELECT column_name, data_type FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1 \
         ORDER BY ordinal_position";

    pub const CLICKHOUSE_TABLES: &str = "SELECT name FROM system.tables \
         WHERE database = currentDatabase() AND database != 'system' ORDER BY name";

    pub const CLICKHOUSE_COLUMNS: &str = "SELECT name, type FROM system.columns \
         WHERE database = currentDatabase() AND table = '{table}' ORDER BY position";
}

/// Connection open deadline.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Pool acquire deadline.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
/// Idle connections are recycled after this.
const IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

/// SQL dialect of a target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Sqlite,
    Postgres,
    Clickhouse,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Sqlite => "sqlite",
            EngineKind::Postgres => "postgres",
            EngineKind::Clickhouse => "clickhouse",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(EngineKind::Sqlite),
            "postgres" | "postgresql" => Ok(EngineKind::Postgres),
            "clickhouse" => Ok(EngineKind::Clickhouse),
            other => Err(CoreError::InvalidInput(format!(
                "unknown connection kind: {other}"
            ))),
        }
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_ch_port() -> u16 {
    8123
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlitePayload {
    pub dataset_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresPayload {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickhousePayload {
    pub host: String,
    #[serde(default = "default_ch_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub secure: bool,
}

/// Typed connection payload, one shape per kind.
#[derive(Debug, Clone)]
pub enum ConnectionPayload {
    Sqlite(SqlitePayload),
    Postgres(PostgresPayload),
    Clickhouse(ClickhousePayload),
}

impl ConnectionPayload {
    pub fn parse(kind: EngineKind, value: &Value) -> Result<Self, CoreError> {
        let invalid = |e: serde_json::Error| {
            CoreError::InvalidInput(format!("invalid {kind} connection payload: {e}"))
        };
        match kind {
            EngineKind::Sqlite => {
                let p: SqlitePayload =
                    serde_json::from_value(value.clone()).map_err(invalid)?;
                if p.dataset_id.trim().is_empty()
                    || p.dataset_id.contains('/')
                    || p.dataset_id.contains('\\')
                {
                    return Err(CoreError::InvalidInput(
                        "dataset_id must be a bare identifier".into(),
                    ));
                }
                Ok(ConnectionPayload::Sqlite(p))
            }
            EngineKind::Postgres => Ok(ConnectionPayload::Postgres(
                serde_json::from_value(value.clone()).map_err(invalid)?,
            )),
            EngineKind::Clickhouse => Ok(ConnectionPayload::Clickhouse(
                serde_json::from_value(value.clone()).map_err(invalid)?,
            )),
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            ConnectionPayload::Sqlite(_) => EngineKind::Sqlite,
            ConnectionPayload::Postgres(_) => EngineKind::Postgres,
            ConnectionPayload::Clickhouse(_) => EngineKind::Clickhouse,
        }
    }

    /// DSN safe for logs and error messages: credentials are masked.
    pub fn masked_dsn(&self) -> String {
        match self {
            ConnectionPayload::Sqlite(p) => format!("sqlite://datasets/{}", p.dataset_id),
            ConnectionPayload::Postgres(p) => format!(
                "postgres://{}:***@{}:{}/{}",
                p.username, p.host, p.port, p.database
            ),
            ConnectionPayload::Clickhouse(p) => {
                let scheme = if p.secure { "https" } else { "http" };
                format!(
                    "clickhouse+{}://{}:***@{}:{}/{}",
                    scheme, p.username, p.host, p.port, p.database
                )
            }
        }
    }
}

/// A small, ordered result set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Rows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn truncate(&mut self, limit: usize) {
        self.rows.truncate(limit);
    }

    /// Render as an array of column-keyed objects.
    pub fn to_json(&self) -> Value {
        let items: Vec<Value> = self
            .rows
            .iter()
            .map(|row| {
                let mut obj = serde_json::Map::new();
                for (col, val) in self.columns.iter().zip(row.iter()) {
                    obj.insert(col.clone(), val.clone());
                }
                Value::Object(obj)
            })
            .collect();
        Value::Array(items)
    }
}

/// Column name and declared type, as reported by the dialect's catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// One open target database.
pub enum EngineHandle {
    Sqlite(SqlitePool),
    Postgres(PgPool),
    Clickhouse(ClickhouseClient),
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineHandle({})", self.dialect())
    }
}

/// Open an engine for a parsed payload. Idempotency per connection is the
/// engine manager's job; this always dials.
pub async fn open(
    payload: &ConnectionPayload,
    datasets_dir: &Path,
) -> Result<EngineHandle, CoreError> {
    let masked = payload.masked_dsn();
    debug!("Opening engine for {}", masked);

    match payload {
        ConnectionPayload::Sqlite(p) => {
            let mut path = datasets_dir.join(&p.dataset_id);
            if path.extension().is_none() {
                path.set_extension("db");
            }
            if !path.exists() {
                return Err(CoreError::Connect(format!(
                    "dataset not found for {masked}"
                )));
            }
            let options = SqliteConnectOptions::new()
                .filename(&path)
                .busy_timeout(ACQUIRE_TIMEOUT);
            let pool = tokio::time::timeout(
                CONNECT_TIMEOUT,
                SqlitePoolOptions::new()
                    .max_connections(4)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .idle_timeout(IDLE_TIMEOUT)
                    .connect_with(options),
            )
            .await
            .map_err(|_| CoreError::Connect(format!("timed out opening {masked}")))?
            .map_err(|e| CoreError::Connect(format!("{masked}: {e}")))?;
            Ok(EngineHandle::Sqlite(pool))
        }
        ConnectionPayload::Postgres(p) => {
            let options = PgConnectOptions::new()
                .host(&p.host)
                .port(p.port)
                .database(&p.database)
                .username(&p.username)
                .password(&p.password);
            let pool = tokio::time::timeout(
                CONNECT_TIMEOUT,
                PgPoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .idle_timeout(IDLE_TIMEOUT)
                    .connect_with(options),
            )
            .await
            .map_err(|_| CoreError::Connect(format!("timed out opening {masked}")))?
            .map_err(|e| CoreError::Connect(format!("{masked}: {e}")))?;
            Ok(EngineHandle::Postgres(pool))
        }
        ConnectionPayload::Clickhouse(p) => {
            let client = ClickhouseClient::new(p);
            tokio::time::timeout(CONNECT_TIMEOUT, client.probe())
                .await
                .map_err(|_| CoreError::Connect(format!("timed out opening {masked}")))??;
            Ok(EngineHandle::Clickhouse(client))
        }
    }
}

impl EngineHandle {
    pub fn dialect(&self) -> EngineKind {
        match self {
            EngineHandle::Sqlite(_) => EngineKind::Sqlite,
            EngineHandle::Postgres(_) => EngineKind::Postgres,
            EngineHandle::Clickhouse(_) => EngineKind::Clickhouse,
        }
    }

    /// Quote an identifier for interpolation, dialect-appropriately.
    pub fn quote_ident(&self, ident: &str) -> String {
        match self.dialect() {
            EngineKind::Clickhouse => format!("`{}`", ident.replace('`', "``")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// List user tables from the dialect's own catalog.
    pub async fn list_tables(&self) -> Result<Vec<String>, CoreError> {
        match self {
            EngineHandle::Sqlite(pool) => {
                let rows = sqlx::query_as::<_, (String,)>(catalog::SQLITE_TABLES)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| CoreError::Schema(e.to_string()))?;
                Ok(rows.into_iter().map(|(name,)| name).collect())
            }
            EngineHandle::Postgres(pool) => {
                let rows = sqlx::query_as::<_, (String,)>(catalog::POSTGRES_TABLES)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| CoreError::Schema(e.to_string()))?;
                Ok(rows.into_iter().map(|(name,)| name).collect())
            }
            EngineHandle::Clickhouse(client) => {
                let rows = client.query(catalog::CLICKHOUSE_TABLES).await?;
                Ok(rows
                    .rows
                    .into_iter()
                    .filter_map(|mut r| r.pop())
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect())
            }
        }
    }

    /// List columns of one table from the dialect's own catalog.
    pub async fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, CoreError> {
        match self {
            EngineHandle::Sqlite(pool) => {
                let sql = format!("PRAGMA table_info({})", self.quote_ident(table));
                let rows = sqlx::query(&sql)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| CoreError::Schema(e.to_string()))?;
                rows.iter()
                    .map(|row| {
                        use sqlx::Row;
                        Ok(ColumnInfo {
                            name: row.try_get::<String, _>("name")?,
                            data_type: row.try_get::<String, _>("type")?,
                        })
                    })
                    .collect::<Result<Vec<_>, sqlx::Error>>()
                    .map_err(|e| CoreError::Schema(e.to_string()))
            }
            EngineHandle::Postgres(pool) => {
                let rows = sqlx::query_as::<_, (String, String)>(catalog::POSTGRES_COLUMNS)
                    .bind(table)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| CoreError::Schema(e.to_string()))?;
                Ok(rows
                    .into_iter()
                    .map(|(name, data_type)| ColumnInfo { name, data_type })
                    .collect())
            }
            EngineHandle::Clickhouse(client) => {
                let sql =
                    catalog::CLICKHOUSE_COLUMNS.replace("{table}", &table.replace('\'', "''"));
                let rows = client.query(&sql).await?;
                Ok(rows
                    .rows
                    .into_iter()
                    .filter_map(|r| {
                        let name = r.first()?.as_str()?.to_string();
                        let data_type = r.get(1)?.as_str()?.to_string();
                        Some(ColumnInfo { name, data_type })
                    })
                    .collect())
            }
        }
    }

    /// First `n` rows of a table.
    pub async fn sample(&self, table: &str, n: usize) -> Result<Rows, CoreError> {
        let sql = format!("SELECT * FROM {} LIMIT {}", self.quote_ident(table), n);
        self.execute(&sql, Some(n)).await
    }

    /// Execute SQL and return the first `limit` rows. No streaming.
    pub async fn execute(&self, sql: &str, limit: Option<usize>) -> Result<Rows, CoreError> {
        let mut result = match self {
            EngineHandle::Sqlite(pool) => {
                let fetched = sqlx::query(sql)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| CoreError::Query(e.to_string()))?;
                rows::from_sqlite(&fetched)
            }
            EngineHandle::Postgres(pool) => {
                let fetched = sqlx::query(sql)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| CoreError::Query(e.to_string()))?;
                rows::from_postgres(&fetched)
            }
            EngineHandle::Clickhouse(client) => client.query(sql).await?,
        };

        if let Some(limit) = limit {
            result.truncate(limit);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_shapes_are_per_kind() {
        let ok = ConnectionPayload::parse(
            EngineKind::Postgres,
            &json!({"host": "pg", "database": "d", "username": "u", "password": "p"}),
        )
        .unwrap();
        match ok {
            ConnectionPayload::Postgres(p) => assert_eq!(p.port, 5432),
            _ => panic!("wrong payload variant"),
        }

        let err = ConnectionPayload::parse(EngineKind::Clickhouse, &json!({"host": "ch"}));
        assert!(err.is_err());
    }

    #[test]
    fn clickhouse_defaults() {
        let p = ConnectionPayload::parse(
            EngineKind::Clickhouse,
            &json!({"host": "ch", "database": "d", "username": "u", "password": "p"}),
        )
        .unwrap();
        match p {
            ConnectionPayload::Clickhouse(p) => {
                assert_eq!(p.port, 8123);
                assert!(!p.secure);
            }
            _ => panic!("wrong payload variant"),
        }
    }

    #[test]
    fn masked_dsn_hides_credentials() {
        let p = ConnectionPayload::Postgres(PostgresPayload {
            host: "db.internal".into(),
            port: 5432,
            database: "sales".into(),
            username: "reader".into(),
            password: "hunter2".into(),
        });
        let masked = p.masked_dsn();
        assert!(masked.contains("reader:***@db.internal"));
        assert!(!masked.contains("hunter2"));
    }

    #[test]
    fn dataset_id_rejects_paths() {
        let err = ConnectionPayload::parse(
            EngineKind::Sqlite,
            &json!({"dataset_id": "../etc/passwd"}),
        );
        assert!(err.is_err());
    }

    #[test]
    fn rows_to_json_keys_by_column() {
        let rows = Rows {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![json!(1), json!("x")]],
        };
        assert_eq!(rows.to_json(), json!([{"a": 1, "b": "x"}]));
    }
}
