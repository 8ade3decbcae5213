//! PIM Activity Audit
//!
//! Audits Azure PIM role activations: detects them in Log Analytics,
//! correlates what each elevated user did, and has Azure OpenAI judge whether
//! that activity matches the stated justification.
//! Uses Entra ID tokens at runtime (managed identity or Azure CLI) - no secrets in code.

pub mod agents;
pub mod config;
pub mod error;
pub mod interactive;
pub mod logging;
pub mod monitoring;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod tools;

pub use config::AuditConfig;
pub use error::AuditError;
