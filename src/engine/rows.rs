// src/engine/rows.rs
// Driver rows to JSON cells, per dialect.

use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo};

use super::Rows;

/// SQLite stores dynamically typed cells; decode by probing storage classes.
pub fn from_sqlite(fetched: &[SqliteRow]) -> Rows {
    let columns = fetched
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let rows = fetched
        .iter()
        .map(|row| (0..row.columns().len()).map(|i| sqlite_cell(row, i)).collect())
        .collect();

    Rows { columns, rows }
}

fn sqlite_cell(row: &SqliteRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v
            .map(|b| Value::String(String::from_utf8_lossy(&b).into_owned()))
            .unwrap_or(Value::Null);
    }
    Value::Null
}

/// Postgres is strictly typed; dispatch on the reported type name and fall
/// back to Null for types the platform does not surface.
pub fn from_postgres(fetched: &[PgRow]) -> Rows {
    let columns = fetched
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let rows = fetched
        .iter()
        .map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(i, col)| pg_cell(row, i, col.type_info().name()))
                .collect()
        })
        .collect();

    Rows { columns, rows }
}

fn pg_cell(row: &PgRow, idx: usize, type_name: &str) -> Value {
    match type_name {
        "INT8" => opt(row.try_get::<Option<i64>, _>(idx)),
        "INT4" => opt(row.try_get::<Option<i32>, _>(idx)),
        "INT2" => opt(row.try_get::<Option<i16>, _>(idx)),
        "FLOAT8" => opt(row.try_get::<Option<f64>, _>(idx)),
        "FLOAT4" => opt(row.try_get::<Option<f32>, _>(idx)),
        "BOOL" => opt(row.try_get::<Option<bool>, _>(idx)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" => {
            opt(row.try_get::<Option<String>, _>(idx))
        }
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_rfc3339()))
            .unwrap_or(Value::Null),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .ok()
            .flatten()
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        _ => {
            // Unknown driver type (NUMERIC, UUID, arrays, pgvector...): probe
            // common decodings, then give up rather than fail the whole query.
            if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
                return Value::from(v);
            }
            if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
                return Value::from(v);
            }
            if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
                return Value::from(v);
            }
            Value::Null
        }
    }
}

fn opt<T: Into<Value>>(res: Result<Option<T>, sqlx::Error>) -> Value {
    res.ok().flatten().map(Into::into).unwrap_or(Value::Null)
}
