//! Runtime configuration
//!
//! Every setting can come from a flag or its environment variable.

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AuditError;
use crate::monitoring::health::is_guid_shaped;

pub const DEFAULT_DEPLOYMENT: &str = "gpt-4o";
pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";
pub const DEFAULT_SCAN_HOURS: u32 = 24;

#[derive(Args, Debug, Clone)]
pub struct AuditConfig {
    /// Log Analytics workspace ID (GUID)
    #[arg(long, env = "LOG_ANALYTICS_WORKSPACE_ID", default_value = "", global = true)]
    pub workspace_id: String,

    /// Azure OpenAI endpoint (https://<resource>.openai.azure.com/)
    #[arg(long, env = "AZURE_OPENAI_ENDPOINT", default_value = "", global = true)]
    pub openai_endpoint: String,

    /// Azure OpenAI deployment name
    #[arg(long, env = "AZURE_OPENAI_DEPLOYMENT", default_value = DEFAULT_DEPLOYMENT, global = true)]
    pub openai_deployment: String,

    #[arg(long, env = "AZURE_OPENAI_API_VERSION", default_value = DEFAULT_API_VERSION, global = true)]
    pub openai_api_version: String,

    /// API key; Entra ID tokens are used when absent
    #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub openai_api_key: Option<String>,

    /// Default scan window in hours
    #[arg(long, env = "DEFAULT_SCAN_HOURS", default_value_t = DEFAULT_SCAN_HOURS, global = true)]
    pub scan_hours: u32,

    /// Report file for batch mode; stdout when unset
    #[arg(long, env = "BATCH_OUTPUT_PATH", global = true)]
    pub output_path: Option<PathBuf>,

    /// Activations processed at once in batch mode
    #[arg(long, env = "AUDIT_CONCURRENCY", default_value_t = 1, global = true)]
    pub concurrency: usize,

    /// Emit metric events on the pim_audit::metrics target
    #[arg(long, env = "TELEMETRY_ENABLED", global = true)]
    pub telemetry_enabled: bool,

    /// Timeout for every outbound HTTP request
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 60, global = true)]
    pub http_timeout_secs: u64,
}

impl AuditConfig {
    /// Defaults for everything but the two required settings
    pub fn for_workspace(workspace_id: impl Into<String>, openai_endpoint: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            openai_endpoint: openai_endpoint.into(),
            openai_deployment: DEFAULT_DEPLOYMENT.to_string(),
            openai_api_version: DEFAULT_API_VERSION.to_string(),
            openai_api_key: None,
            scan_hours: DEFAULT_SCAN_HOURS,
            output_path: None,
            concurrency: 1,
            telemetry_enabled: false,
            http_timeout_secs: 60,
        }
    }

    /// Settings needed to query the workspace.
    pub fn validate_workspace(&self) -> Result<(), AuditError> {
        if self.workspace_id.is_empty() {
            return Err(AuditError::Config(
                "LOG_ANALYTICS_WORKSPACE_ID is required".to_string(),
            ));
        }
        if !is_guid_shaped(&self.workspace_id) {
            return Err(AuditError::Config(format!(
                "LOG_ANALYTICS_WORKSPACE_ID must be a GUID, got {:?}",
                self.workspace_id
            )));
        }
        if self.scan_hours == 0 {
            return Err(AuditError::Config(
                "DEFAULT_SCAN_HOURS must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings needed for a full audit.
    pub fn validate(&self) -> Result<(), AuditError> {
        self.validate_workspace()?;

        if self.openai_endpoint.is_empty() {
            return Err(AuditError::Config(
                "AZURE_OPENAI_ENDPOINT is required".to_string(),
            ));
        }
        if !self.openai_endpoint.starts_with("https://") {
            return Err(AuditError::Config(
                "AZURE_OPENAI_ENDPOINT must use https://".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(AuditError::Config(
                "AUDIT_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
