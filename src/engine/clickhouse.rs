// src/engine/clickhouse.rs
// ClickHouse over its HTTP interface.

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use super::{ClickhousePayload, Rows};
use crate::error::CoreError;

/// ClickHouse client speaking the HTTP interface (8123, or 8443 with TLS).
/// Result sets are requested as `FORMAT JSON` and parsed from the envelope.
/// No implicit protocol switch: `secure` alone selects http vs https.
pub struct ClickhouseClient {
    http: Client,
    base_url: String,
    database: String,
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct ChColumn {
    name: String,
    #[allow(dead_code)]
    #[serde(rename = "type")]
    data_type: String,
}

#[derive(Deserialize)]
struct ChResponse {
    meta: Vec<ChColumn>,
    data: Vec<serde_json::Map<String, Value>>,
}

impl ClickhouseClient {
    pub fn new(payload: &ClickhousePayload) -> Self {
        let scheme = if payload.secure { "https" } else { "http" };
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: format!("{}://{}:{}/", scheme, payload.host, payload.port),
            database: payload.database.clone(),
            username: payload.username.clone(),
            password: payload.password.clone(),
        }
    }

    /// Cheap connectivity and auth check.
    pub async fn probe(&self) -> Result<(), CoreError> {
        self.query("SELECT 1").await.map(|_| ())
    }

    pub async fn query(&self, sql: &str) -> Result<Rows, CoreError> {
        let statement = sql.trim().trim_end_matches(';');
        let body = format!("{statement} FORMAT JSON");
        debug!("ClickHouse query ({} chars)", body.len());

        let response = self
            .http
            .post(&self.base_url)
            .query(&[("database", self.database.as_str())])
            .header("X-ClickHouse-User", &self.username)
            .header("X-ClickHouse-Key", &self.password)
            .body(body)
            .send()
            .await
            .map_err(|e| CoreError::Connect(format!("clickhouse unreachable: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CoreError::Connect(format!("clickhouse read failed: {e}")))?;

        if !status.is_success() {
            return Err(CoreError::Query(format!(
                "clickhouse error {status}: {}",
                text.trim()
            )));
        }

        let parsed: ChResponse = serde_json::from_str(&text)
            .map_err(|e| CoreError::Query(format!("unexpected clickhouse response: {e}")))?;

        let columns: Vec<String> = parsed.meta.into_iter().map(|c| c.name).collect();
        let rows = parsed
            .data
            .into_iter()
            .map(|mut obj| {
                columns
                    .iter()
                    .map(|c| obj.remove(c).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(Rows { columns, rows })
    }
}

impl fmt::Debug for ClickhouseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClickhouseClient")
            .field("base_url", &self.base_url)
            .field("database", &self.database)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ClickhousePayload;

    fn payload(secure: bool, port: u16) -> ClickhousePayload {
        ClickhousePayload {
            host: "ch.internal".into(),
            port,
            database: "analytics".into(),
            username: "reader".into(),
            password: "secret".into(),
            secure,
        }
    }

    #[test]
    fn scheme_follows_secure_flag_only() {
        let plain = ClickhouseClient::new(&payload(false, 8123));
        assert!(plain.base_url.starts_with("http://"));

        let tls = ClickhouseClient::new(&payload(true, 8443));
        assert!(tls.base_url.starts_with("https://"));

        // secure=false on the TLS port stays http; the server decides.
        let mismatched = ClickhouseClient::new(&payload(false, 8443));
        assert!(mismatched.base_url.starts_with("http://"));
        assert!(mismatched.base_url.contains(":8443"));
    }

    #[test]
    fn debug_omits_password() {
        let client = ClickhouseClient::new(&payload(false, 8123));
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("secret"));
    }
}
