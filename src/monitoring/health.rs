//! Health checks for orchestration probes
//!
//! Liveness is unconditional. Readiness requires a token for Log Analytics
//! and well-formed workspace / endpoint settings.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::tools::credentials::{TokenProvider, LOG_ANALYTICS_SCOPE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<BTreeMap<String, ComponentHealth>>,
}

impl HealthReport {
    /// Ready when no component is unhealthy.
    pub fn is_ready(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

pub struct HealthCheck {
    workspace_id: String,
    openai_endpoint: String,
    tokens: Arc<dyn TokenProvider>,
    started_at: DateTime<Utc>,
}

impl HealthCheck {
    pub fn new(
        workspace_id: impl Into<String>,
        openai_endpoint: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            openai_endpoint: openai_endpoint.into(),
            tokens,
            started_at: Utc::now(),
        }
    }

    /// Every component is always evaluated; `detailed` only controls whether
    /// they appear in the report.
    pub async fn check(&self, detailed: bool) -> HealthReport {
        let now = Utc::now();
        let uptime_seconds = (now - self.started_at).num_milliseconds() as f64 / 1000.0;

        let mut components = BTreeMap::new();
        components.insert("authentication".to_string(), self.check_authentication().await);
        components.insert("log_analytics".to_string(), self.check_log_analytics());
        components.insert("openai".to_string(), self.check_openai());

        HealthReport {
            status: overall_status(components.values()),
            timestamp: now,
            uptime_seconds,
            components: detailed.then_some(components),
        }
    }

    pub async fn is_ready(&self) -> bool {
        self.check(false).await.is_ready()
    }

    pub fn is_alive(&self) -> bool {
        true
    }

    async fn check_authentication(&self) -> ComponentHealth {
        match self.tokens.token(LOG_ANALYTICS_SCOPE).await {
            Ok(token) if !token.token.is_empty() => {
                ComponentHealth::new(HealthStatus::Healthy, "Azure authentication configured")
            }
            Ok(_) => ComponentHealth::new(
                HealthStatus::Degraded,
                "Token obtained but appears invalid",
            ),
            Err(e) => {
                warn!(error = %e, "Authentication check failed");
                ComponentHealth::new(HealthStatus::Unhealthy, format!("Authentication failed: {}", e))
            }
        }
    }

    fn check_log_analytics(&self) -> ComponentHealth {
        if self.workspace_id.is_empty() {
            return ComponentHealth::new(HealthStatus::Unhealthy, "Workspace ID not configured");
        }
        if !is_guid_shaped(&self.workspace_id) {
            return ComponentHealth::new(HealthStatus::Unhealthy, "Invalid workspace ID format");
        }

        ComponentHealth::new(HealthStatus::Healthy, "Log Analytics configured")
            .with_detail(format!(
                "{}...",
                self.workspace_id.chars().take(8).collect::<String>()
            ))
    }

    fn check_openai(&self) -> ComponentHealth {
        if self.openai_endpoint.is_empty() {
            return ComponentHealth::new(HealthStatus::Unhealthy, "OpenAI endpoint not configured");
        }
        if !self.openai_endpoint.starts_with("https://") {
            return ComponentHealth::new(HealthStatus::Unhealthy, "Invalid OpenAI endpoint format");
        }

        let host_prefix = self.openai_endpoint.split('.').next().unwrap_or_default();
        ComponentHealth::new(HealthStatus::Healthy, "Azure OpenAI configured")
            .with_detail(format!("{}...", host_prefix))
    }
}

/// 36 characters with four dashes, like a workspace GUID.
pub fn is_guid_shaped(value: &str) -> bool {
    value.len() == 36 && value.matches('-').count() == 4
}

fn overall_status<'a>(components: impl Iterator<Item = &'a ComponentHealth>) -> HealthStatus {
    components
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthStatus::Healthy)
}
