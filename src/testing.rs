//! In-memory collaborators for tests
//!
//! Stand-ins for the log store, the chat model and the report sink so the
//! pipeline can be driven without Azure.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::agents::pim_audit::queries::columns;
use crate::agents::pim_audit::sink::ReportSink;
use crate::error::AuditError;
use crate::tools::azure_openai::{ChatMessage, ChatModel, ModelOptions};
use crate::tools::log_analytics::{LogQueryService, LogRow};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn rfc3339(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Row shaped like the activation query's projection
pub fn activation_row(user: &str, role: &str, reason: &str, at: DateTime<Utc>) -> LogRow {
    let mut row = LogRow::new();
    row.insert(columns::TIME_GENERATED.into(), rfc3339(at));
    row.insert(columns::USER_EMAIL.into(), json!(user));
    row.insert(columns::ROLE_NAME.into(), json!(role));
    row.insert(columns::REASON.into(), json!(reason));
    row
}

/// Row shaped like the activity query's projection, every column populated
pub fn activity_row(operation: &str, at: DateTime<Utc>) -> LogRow {
    let mut row = LogRow::new();
    row.insert(columns::TIME_GENERATED.into(), rfc3339(at));
    row.insert(columns::OPERATION_NAME.into(), json!(operation));
    row.insert(
        columns::RESOURCE_TYPE.into(),
        json!("Microsoft.Storage/storageAccounts"),
    );
    row.insert(columns::RESOURCE.into(), json!("stacct01"));
    row.insert(columns::RESOURCE_GROUP.into(), json!("rg-data"));
    row.insert(columns::SUBSCRIPTION_ID.into(), json!("sub-001"));
    row.insert(columns::STATUS.into(), json!("Succeeded"));
    row
}

/// Log store answering by query shape.
///
/// Activation queries get the activation rows, activity queries get the rows
/// registered for the quoted caller, anything else gets the ad-hoc rows.
#[derive(Default)]
pub struct StaticLogService {
    activations: Vec<LogRow>,
    activities: HashMap<String, Vec<LogRow>>,
    ad_hoc: Vec<LogRow>,
    failing_on: Option<String>,
    queries: Mutex<Vec<String>>,
}

impl StaticLogService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_activations(mut self, rows: Vec<LogRow>) -> Self {
        self.activations = rows;
        self
    }

    pub fn with_activities(mut self, user: &str, rows: Vec<LogRow>) -> Self {
        self.activities.insert(user.to_string(), rows);
        self
    }

    pub fn with_rows(mut self, rows: Vec<LogRow>) -> Self {
        self.ad_hoc = rows;
        self
    }

    /// Fail every query containing `needle`
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.failing_on = Some(needle.to_string());
        self
    }

    /// Queries received so far, in order
    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl LogQueryService for StaticLogService {
    async fn execute(
        &self,
        query: &str,
        _timespan: Option<Duration>,
    ) -> Result<Vec<LogRow>, AuditError> {
        lock(&self.queries).push(query.to_string());

        if let Some(needle) = &self.failing_on {
            if query.contains(needle.as_str()) {
                return Err(AuditError::Query(format!("injected failure for {}", needle)));
            }
        }

        if query.starts_with("AuditLogs") {
            return Ok(self.activations.clone());
        }

        if query.starts_with("AzureActivity") {
            let rows = self
                .activities
                .iter()
                .find(|(user, _)| query.contains(&format!("\"{}\"", user)))
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default();
            return Ok(rows);
        }

        Ok(self.ad_hoc.clone())
    }
}

type Responder = Box<dyn Fn(&[ChatMessage]) -> Result<String, AuditError> + Send + Sync>;

enum Script {
    Queue(Mutex<VecDeque<Result<String, AuditError>>>),
    Responder(Responder),
}

/// Chat model with canned answers that records every request
pub struct ScriptedModel {
    script: Script,
    calls: Mutex<Vec<(Vec<ChatMessage>, ModelOptions)>>,
}

impl ScriptedModel {
    /// Answers in order; errors once the queue is empty.
    pub fn new(responses: Vec<Result<String, AuditError>>) -> Self {
        Self {
            script: Script::Queue(Mutex::new(responses.into())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replying<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(responses.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// Answer computed from the request, for order-independent tests
    pub fn from_fn<F>(respond: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Result<String, AuditError> + Send + Sync + 'static,
    {
        Self {
            script: Script::Responder(Box::new(respond)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Vec<ChatMessage>, ModelOptions)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: ModelOptions,
    ) -> Result<String, AuditError> {
        lock(&self.calls).push((messages.to_vec(), options));

        match &self.script {
            Script::Queue(queue) => lock(queue)
                .pop_front()
                .unwrap_or_else(|| Err(AuditError::Model("no scripted response left".into()))),
            Script::Responder(respond) => respond(messages),
        }
    }
}

/// Keeps delivered reports in memory
#[derive(Default)]
pub struct MemorySink {
    reports: Mutex<Vec<String>>,
    fail: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose every delivery fails with an I/O error
    pub fn failing() -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn reports(&self) -> Vec<String> {
        lock(&self.reports).clone()
    }

    pub fn last(&self) -> Option<String> {
        lock(&self.reports).last().cloned()
    }
}

#[async_trait]
impl ReportSink for MemorySink {
    async fn deliver(&self, report: &str) -> Result<(), AuditError> {
        if self.fail {
            return Err(AuditError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "report destination is read-only",
            )));
        }
        lock(&self.reports).push(report.to_string());
        Ok(())
    }
}
