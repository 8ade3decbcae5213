//! Tracing subscriber setup
//!
//! Logs go to stderr so stdout only carries reports and session output.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[value(rename_all = "UPPER")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Filter used when `RUST_LOG` is unset. The HTTP stack stays at WARN below DEBUG.
pub fn default_directives(level: LogLevel) -> String {
    match level {
        LogLevel::Debug => "debug".to_string(),
        LogLevel::Info => "info,reqwest=warn,hyper=warn,hyper_util=warn".to_string(),
        LogLevel::Warn => "warn".to_string(),
        LogLevel::Error => "error".to_string(),
    }
}

pub fn init(level: LogLevel, format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(level)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match format {
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
        LogFormat::Pretty => builder.with_target(false).try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
