//! Natural language to KQL
//!
//! Validation is a keyword membership check, not a parser. A response that
//! fails it is fed back to the model with a correction request.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::AuditError;
use crate::monitoring::telemetry::{NoopTelemetry, Telemetry};
use crate::tools::azure_openai::{ChatMessage, ChatModel, ModelOptions};

const SYSTEM_PROMPT: &str = "You are an expert in Kusto Query Language (KQL) for Azure Log Analytics.
Generate valid KQL queries based on user requests.
Focus on AuditLogs and AzureActivity tables.
Return only the KQL query, no explanations.";

const CORRECTION_PROMPT: &str = "That doesn't look like valid KQL. Please try again.";

/// A response containing any of these is accepted as a query
const KQL_MARKERS: [&str; 4] = ["AuditLogs", "AzureActivity", "where", "|"];

/// Low temperature favors syntactically valid output
pub const GENERATOR_OPTIONS: ModelOptions = ModelOptions::new(0.3, 2000);

/// Extra attempts after the first when the caller has no preference
pub const DEFAULT_MAX_RETRIES: u32 = 2;

pub struct QueryGenerator {
    model: Arc<dyn ChatModel>,
    options: ModelOptions,
    telemetry: Arc<dyn Telemetry>,
}

impl QueryGenerator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self::with_options(model, GENERATOR_OPTIONS)
    }

    pub fn with_options(model: Arc<dyn ChatModel>, options: ModelOptions) -> Self {
        Self {
            model,
            options,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Translate `request` into a query, trying at most `max_retries + 1` times.
    ///
    /// Transport errors consume an attempt while retries remain and are
    /// returned on the last one.
    pub async fn generate(&self, request: &str, max_retries: u32) -> Result<String, AuditError> {
        let mut messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!("Generate KQL query for: {}", request)),
        ];
        for attempt in 0..=max_retries {
            let retries_left = attempt < max_retries;

            self.telemetry.record_model_call();
            let response = match self.model.complete(&messages, self.options).await {
                Ok(response) => response,
                Err(e) if retries_left => {
                    warn!(attempt, error = %e, "Query generation failed, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if looks_like_kql(&response) {
                info!(attempt, "Generated query");
                return Ok(response.trim().to_string());
            }

            if retries_left {
                warn!(attempt, "Generated query looks invalid, retrying");
                messages.push(ChatMessage::assistant(response));
                messages.push(ChatMessage::user(CORRECTION_PROMPT));
            }
        }

        Err(AuditError::QueryGeneration(format!(
            "Failed to generate valid query after {} attempts",
            u64::from(max_retries) + 1
        )))
    }
}

fn looks_like_kql(response: &str) -> bool {
    KQL_MARKERS.iter().any(|marker| response.contains(marker))
}
