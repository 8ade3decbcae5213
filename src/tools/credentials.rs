//! Azure credential providers
//!
//! Bearer tokens for Log Analytics and Azure OpenAI are obtained at runtime;
//! nothing is read from disk or hardcoded.
//!
//! ## Resolution order ([`DefaultTokenChain`])
//!
//! 1. `AZURE_ACCESS_TOKEN` environment variable (CI, short-lived pipelines)
//! 2. Managed identity via the Instance Metadata Service (Azure VMs, AKS, Container Apps)
//! 3. Azure CLI (`az login` for local development)

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::AuditError;

/// Scope for the Log Analytics query API
pub const LOG_ANALYTICS_SCOPE: &str = "https://api.loganalytics.io/.default";

/// Scope for Azure OpenAI with Entra ID auth
pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// A bearer token with its expiry
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Whether the token is expired or about to expire.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::minutes(REFRESH_MARGIN_MINUTES) >= self.expires_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of bearer tokens for a given scope
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self, scope: &str) -> Result<AccessToken, AuditError>;
}

/// Strip the `/.default` suffix to get the v1 resource identifier.
pub fn resource_for_scope(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

/// Fixed token, valid for every scope
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Read `AZURE_ACCESS_TOKEN`, if set and non-empty.
    pub fn from_env() -> Option<Self> {
        env::var("AZURE_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(Self::new)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self, _scope: &str) -> Result<AccessToken, AuditError> {
        Ok(AccessToken::new(
            self.token.clone(),
            Utc::now() + Duration::hours(1),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ImdsTokenResponse {
    access_token: String,
    /// Unix seconds, serialised as a string by IMDS
    expires_on: String,
}

/// Managed identity through the Azure Instance Metadata Service
pub struct ManagedIdentityProvider {
    http_client: Client,
    client_id: Option<String>,
}

impl ManagedIdentityProvider {
    /// `client_id` selects a user-assigned identity; `None` uses the system identity.
    pub fn new(client_id: Option<String>) -> Result<Self, AuditError> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| AuditError::Authentication(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            client_id,
        })
    }

    fn token_url(&self, scope: &str) -> String {
        let mut url = format!(
            "{}?api-version=2018-02-01&resource={}",
            IMDS_TOKEN_URL,
            urlencoding::encode(resource_for_scope(scope))
        );
        if let Some(client_id) = &self.client_id {
            url.push_str("&client_id=");
            url.push_str(&urlencoding::encode(client_id));
        }
        url
    }
}

#[async_trait]
impl TokenProvider for ManagedIdentityProvider {
    async fn token(&self, scope: &str) -> Result<AccessToken, AuditError> {
        let response = self
            .http_client
            .get(self.token_url(scope))
            .header("Metadata", "true")
            .send()
            .await
            .map_err(|e| AuditError::Authentication(format!("IMDS unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(AuditError::Authentication(format!(
                "IMDS returned {}",
                response.status()
            )));
        }

        let body: ImdsTokenResponse = response
            .json()
            .await
            .map_err(|e| AuditError::Authentication(format!("Invalid IMDS response: {}", e)))?;

        Ok(AccessToken::new(
            body.access_token,
            parse_unix_expiry(&body.expires_on),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: String,
    #[serde(default, rename = "expires_on")]
    expires_on: Option<i64>,
}

/// Token from a logged-in Azure CLI
#[derive(Default)]
pub struct AzureCliProvider;

#[async_trait]
impl TokenProvider for AzureCliProvider {
    async fn token(&self, scope: &str) -> Result<AccessToken, AuditError> {
        let output = tokio::process::Command::new("az")
            .args([
                "account",
                "get-access-token",
                "--resource",
                resource_for_scope(scope),
                "--output",
                "json",
            ])
            .output()
            .await
            .map_err(|e| AuditError::Authentication(format!("Azure CLI not available: {}", e)))?;

        if !output.status.success() {
            return Err(AuditError::Authentication(format!(
                "az account get-access-token failed - run 'az login': {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let body: CliTokenResponse = serde_json::from_slice(&output.stdout).map_err(|e| {
            AuditError::Authentication(format!("Invalid Azure CLI token output: {}", e))
        })?;

        let expires_at = body
            .expires_on
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(|| Utc::now() + Duration::minutes(REFRESH_MARGIN_MINUTES * 2));

        Ok(AccessToken::new(body.access_token, expires_at))
    }
}

/// Environment token, then managed identity, then Azure CLI; cached per scope
pub struct DefaultTokenChain {
    providers: Vec<(&'static str, Box<dyn TokenProvider>)>,
    cache: Mutex<HashMap<String, AccessToken>>,
}

impl DefaultTokenChain {
    pub fn new() -> Result<Self, AuditError> {
        let mut providers: Vec<(&'static str, Box<dyn TokenProvider>)> = Vec::new();

        if let Some(static_provider) = StaticTokenProvider::from_env() {
            providers.push(("environment", Box::new(static_provider)));
        }
        providers.push((
            "managed_identity",
            Box::new(ManagedIdentityProvider::new(env::var("AZURE_CLIENT_ID").ok())?),
        ));
        providers.push(("azure_cli", Box::new(AzureCliProvider)));

        Ok(Self::with_providers(providers))
    }

    pub fn with_providers(providers: Vec<(&'static str, Box<dyn TokenProvider>)>) -> Self {
        Self {
            providers,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TokenProvider for DefaultTokenChain {
    async fn token(&self, scope: &str) -> Result<AccessToken, AuditError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(scope) {
            if !cached.needs_refresh(Utc::now()) {
                return Ok(cached.clone());
            }
        }

        let mut failures = Vec::new();
        for (name, provider) in &self.providers {
            match provider.token(scope).await {
                Ok(token) => {
                    info!(source = %name, scope = %scope, "Acquired access token");
                    cache.insert(scope.to_string(), token.clone());
                    return Ok(token);
                }
                Err(e) => {
                    debug!(source = %name, error = %e, "Credential source unavailable");
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        Err(AuditError::Authentication(format!(
            "no credential source succeeded ({})",
            failures.join("; ")
        )))
    }
}

fn parse_unix_expiry(raw: &str) -> DateTime<Utc> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(|| Utc::now() + Duration::minutes(REFRESH_MARGIN_MINUTES * 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingProvider {
        calls: Arc<AtomicUsize>,
        lifetime: Duration,
    }

    #[async_trait]
    impl TokenProvider for CountingProvider {
        async fn token(&self, _scope: &str) -> Result<AccessToken, AuditError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken::new("tok", Utc::now() + self.lifetime))
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl TokenProvider for FailingProvider {
        async fn token(&self, _scope: &str) -> Result<AccessToken, AuditError> {
            Err(AuditError::Authentication("unavailable".into()))
        }
    }

    #[test]
    fn test_resource_for_scope() {
        assert_eq!(
            resource_for_scope(LOG_ANALYTICS_SCOPE),
            "https://api.loganalytics.io"
        );
        assert_eq!(resource_for_scope("custom"), "custom");
    }

    #[test]
    fn test_imds_url_includes_client_id() {
        let provider = ManagedIdentityProvider::new(Some("abc-123".into())).unwrap();
        let url = provider.token_url(COGNITIVE_SERVICES_SCOPE);
        assert!(url.contains("resource=https%3A%2F%2Fcognitiveservices.azure.com"));
        assert!(url.ends_with("&client_id=abc-123"));
    }

    #[test]
    fn test_needs_refresh_margin() {
        let now = Utc::now();
        assert!(AccessToken::new("t", now + Duration::minutes(2)).needs_refresh(now));
        assert!(!AccessToken::new("t", now + Duration::minutes(30)).needs_refresh(now));
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = AccessToken::new("super-secret", Utc::now());
        assert!(!format!("{:?}", token).contains("super-secret"));
    }

    #[test]
    fn test_parse_unix_expiry() {
        let parsed = parse_unix_expiry("1700000000");
        assert_eq!(parsed.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_chain_falls_through_and_caches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = DefaultTokenChain::with_providers(vec![
            ("failing", Box::new(FailingProvider)),
            (
                "counting",
                Box::new(CountingProvider {
                    calls: calls.clone(),
                    lifetime: Duration::hours(1),
                }),
            ),
        ]);

        chain.token(LOG_ANALYTICS_SCOPE).await.unwrap();
        chain.token(LOG_ANALYTICS_SCOPE).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        chain.token(COGNITIVE_SERVICES_SCOPE).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_chain_reports_all_failures() {
        let chain = DefaultTokenChain::with_providers(vec![
            ("first", Box::new(FailingProvider)),
            ("second", Box::new(FailingProvider)),
        ]);

        let err = chain.token(LOG_ANALYTICS_SCOPE).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("first"));
        assert!(message.contains("second"));
    }
}
