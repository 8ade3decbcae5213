//! Error types shared by the audit pipeline and its collaborators.

use thiserror::Error;

/// Errors that can occur while auditing PIM activations
#[derive(Debug, Error)]
pub enum AuditError {
    /// The log query service was unreachable or rejected the query
    #[error("Log query failed: {0}")]
    Query(String),

    /// The generative model service was unreachable or returned an error
    #[error("Model request failed: {0}")]
    Model(String),

    /// No usable credential could be obtained
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The query generator could not produce a plausible query
    #[error("Query generation failed: {0}")]
    QueryGeneration(String),

    /// Invalid or missing configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Report output failed
    #[error("Report output failed: {0}")]
    Io(#[from] std::io::Error),
}

impl AuditError {
    /// Whether the failure came from an external service rather than local validation.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AuditError::Query(_) | AuditError::Model(_) | AuditError::Authentication(_)
        )
    }
}
