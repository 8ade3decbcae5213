//! Log Analytics query tool
//!
//! Runs KQL against a workspace through the Log Analytics REST API and hands
//! rows back as JSON objects keyed by column name.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

use super::credentials::{TokenProvider, LOG_ANALYTICS_SCOPE};
use crate::error::AuditError;

const DEFAULT_BASE_URL: &str = "https://api.loganalytics.io/v1";

/// One result row, keyed by column name
pub type LogRow = serde_json::Map<String, Value>;

/// Executes queries against the log store
#[async_trait]
pub trait LogQueryService: Send + Sync {
    /// Run `query`, optionally bounded to the trailing `timespan`.
    async fn execute(
        &self,
        query: &str,
        timespan: Option<Duration>,
    ) -> Result<Vec<LogRow>, AuditError>;
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timespan: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    tables: Vec<ResultTable>,
    #[serde(default)]
    error: Option<QueryErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct ResultTable {
    #[serde(default)]
    pub name: String,
    pub columns: Vec<ResultColumn>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
pub struct ResultColumn {
    pub name: String,
    #[serde(default, rename = "type")]
    pub column_type: String,
}

#[derive(Debug, Deserialize)]
struct QueryErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Log Analytics workspace client
pub struct LogAnalyticsClient {
    workspace_id: String,
    base_url: String,
    http_client: Client,
    tokens: Arc<dyn TokenProvider>,
}

impl LogAnalyticsClient {
    pub fn new(
        workspace_id: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        timeout: std::time::Duration,
    ) -> Result<Self, AuditError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuditError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            workspace_id: workspace_id.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http_client,
            tokens,
        })
    }

    /// Point at a different API host (sovereign clouds).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn query_url(&self) -> String {
        format!("{}/workspaces/{}/query", self.base_url, self.workspace_id)
    }
}

#[async_trait]
impl LogQueryService for LogAnalyticsClient {
    async fn execute(
        &self,
        query: &str,
        timespan: Option<Duration>,
    ) -> Result<Vec<LogRow>, AuditError> {
        let token = self.tokens.token(LOG_ANALYTICS_SCOPE).await?;
        let request = QueryRequest {
            query,
            timespan: timespan.map(iso8601_duration),
        };

        debug!(workspace = %self.workspace_id, timespan = ?request.timespan, "Executing Log Analytics query");

        let response = self
            .http_client
            .post(self.query_url())
            .bearer_auth(&token.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| AuditError::Query(format!("Log Analytics unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, "Log Analytics query error");
            return Err(AuditError::Query(format!(
                "Log Analytics returned {}: {}",
                status, body
            )));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| AuditError::Query(format!("Failed to parse Log Analytics response: {}", e)))?;

        if let Some(err) = body.error {
            error!(code = %err.code, message = %err.message, "Query did not complete successfully");
            return Ok(Vec::new());
        }

        Ok(flatten_tables(body.tables))
    }
}

/// Zip every row with its table's column names.
pub fn flatten_tables(tables: Vec<ResultTable>) -> Vec<LogRow> {
    let mut rows = Vec::new();
    for table in tables {
        let names: Vec<String> = table.columns.into_iter().map(|c| c.name).collect();
        for values in table.rows {
            let row: LogRow = names.iter().cloned().zip(values).collect();
            rows.push(row);
        }
    }
    rows
}

/// ISO-8601 duration for the `timespan` request field.
pub fn iso8601_duration(duration: Duration) -> String {
    let seconds = duration.num_seconds().max(0);
    if seconds % 3600 == 0 {
        format!("PT{}H", seconds / 3600)
    } else {
        format!("PT{}S", seconds)
    }
}

/// String value of a column; `None` when the column is absent, null, or empty.
pub fn text(row: &LogRow, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Timestamp value of a column in RFC 3339 form.
pub fn timestamp(row: &LogRow, column: &str) -> Option<DateTime<Utc>> {
    let raw = text(row, column)?;
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_tables_zips_columns() {
        let response: QueryResponse = serde_json::from_value(json!({
            "tables": [{
                "name": "PrimaryResult",
                "columns": [
                    {"name": "TimeGenerated", "type": "datetime"},
                    {"name": "UserEmail", "type": "string"}
                ],
                "rows": [
                    ["2024-01-15T10:00:00Z", "a@x.com"],
                    ["2024-01-15T09:00:00Z", "b@x.com"]
                ]
            }]
        }))
        .unwrap();

        let rows = flatten_tables(response.tables);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["UserEmail"], json!("a@x.com"));
        assert_eq!(rows[1]["TimeGenerated"], json!("2024-01-15T09:00:00Z"));
    }

    #[test]
    fn test_error_body_is_detected() {
        let response: QueryResponse = serde_json::from_value(json!({
            "tables": [],
            "error": {"code": "PartialError", "message": "query exceeded limits"}
        }))
        .unwrap();
        assert!(response.error.is_some());
    }

    #[test]
    fn test_iso8601_duration() {
        assert_eq!(iso8601_duration(Duration::hours(24)), "PT24H");
        assert_eq!(iso8601_duration(Duration::minutes(90)), "PT5400S");
    }

    #[test]
    fn test_text_treats_empty_as_absent() {
        let row: LogRow = serde_json::from_value(json!({
            "Resource": "",
            "ResourceType": null,
            "Count": 3,
            "Status": "Success"
        }))
        .unwrap();

        assert_eq!(text(&row, "Resource"), None);
        assert_eq!(text(&row, "ResourceType"), None);
        assert_eq!(text(&row, "Missing"), None);
        assert_eq!(text(&row, "Count").as_deref(), Some("3"));
        assert_eq!(text(&row, "Status").as_deref(), Some("Success"));
    }

    #[test]
    fn test_timestamp_parses_fractional_seconds() {
        let row: LogRow = serde_json::from_value(json!({
            "TimeGenerated": "2024-01-15T10:00:00.1234567Z"
        }))
        .unwrap();

        let ts = timestamp(&row, "TimeGenerated").unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-15 10:00:00");
    }

    #[test]
    fn test_query_url() {
        let client = LogAnalyticsClient::new(
            "ws-1",
            Arc::new(super::super::credentials::StaticTokenProvider::new("t")),
            std::time::Duration::from_secs(5),
        )
        .unwrap()
        .with_base_url("https://api.loganalytics.azure.cn/v1/");

        assert_eq!(
            client.query_url(),
            "https://api.loganalytics.azure.cn/v1/workspaces/ws-1/query"
        );
    }
}
