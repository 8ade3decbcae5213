//! Audit Tools
//!
//! Clients for the external services the audit pipeline depends on.
//! All of them authenticate with runtime-acquired Entra ID tokens (or an
//! explicit API key for Azure OpenAI) - no secrets in code.

pub mod azure_openai;
pub mod credentials;
pub mod log_analytics;

pub use azure_openai::{AzureOpenAiClient, ChatMessage, ChatModel, ChatRole, ModelOptions, OpenAiAuth};
pub use credentials::{DefaultTokenChain, StaticTokenProvider, TokenProvider};
pub use log_analytics::{LogAnalyticsClient, LogQueryService, LogRow};
