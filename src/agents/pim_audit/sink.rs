//! Report delivery

use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

use crate::error::AuditError;

const SEPARATOR_WIDTH: usize = 80;

/// Where a rendered report ends up
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, report: &str) -> Result<(), AuditError>;
}

/// Writes the report as UTF-8 text, creating parent directories
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReportSink for FileSink {
    async fn deliver(&self, report: &str) -> Result<(), AuditError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tokio::fs::write(&self.path, report).await?;
        info!(path = %self.path.display(), bytes = report.len(), "Report written");
        Ok(())
    }
}

/// Prints the report to stdout between separator lines
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ConsoleSink {
    fn framed(report: &str) -> String {
        let separator = "=".repeat(SEPARATOR_WIDTH);
        format!("\n{separator}\n{report}\n{separator}\n")
    }
}

#[async_trait]
impl ReportSink for ConsoleSink {
    async fn deliver(&self, report: &str) -> Result<(), AuditError> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(Self::framed(report).as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}
