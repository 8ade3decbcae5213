//! PIM Activity Audit Agent
//!
//! Audits Azure PIM role activations against the activity that followed.
//!
//! # Usage
//! ```bash
//! # Audit the last 24 hours and write a Markdown report
//! pim-audit batch --hours 24 --output reports/pim-audit.md
//!
//! # Explore activations interactively
//! pim-audit interactive
//!
//! # Readiness probe
//! pim-audit health --detailed
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use pim_audit::agents::pim_audit::report::format_activations_summary;
use pim_audit::agents::pim_audit::{
    ActivationDetector, ActivityCorrelator, AlignmentClassifier, BatchOrchestrator, ConsoleSink,
    FileSink, ReportSink,
};
use pim_audit::interactive::InteractiveSession;
use pim_audit::logging::{self, LogFormat, LogLevel};
use pim_audit::monitoring::{HealthCheck, NoopTelemetry, Telemetry, TracingTelemetry};
use pim_audit::tools::{
    AzureOpenAiClient, ChatModel, DefaultTokenChain, LogAnalyticsClient, LogQueryService,
    OpenAiAuth, TokenProvider,
};
use pim_audit::AuditConfig;

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "pim-audit")]
#[command(about = "Azure PIM activation audit agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", value_enum, default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,

    #[command(flatten)]
    config: AuditConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit every activation in the window and emit a report
    Batch {
        /// Hours to scan (default: DEFAULT_SCAN_HOURS)
        #[arg(long)]
        hours: Option<u32>,

        /// Report file (default: BATCH_OUTPUT_PATH, else stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Start an interactive session
    Interactive,

    /// List activations without assessing them
    Scan {
        /// Hours to scan (default: DEFAULT_SCAN_HOURS)
        #[arg(long)]
        hours: Option<u32>,
    },

    /// Print health as JSON; exits 1 when not ready
    Health {
        /// Check each component
        #[arg(long)]
        detailed: bool,
    },
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_level, cli.log_format) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "pim-audit failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.config;

    match cli.command {
        Commands::Batch { hours, output } => run_batch(&config, hours, output).await,
        Commands::Interactive => run_interactive(&config).await,
        Commands::Scan { hours } => run_scan(&config, hours).await,
        Commands::Health { detailed } => run_health(&config, detailed).await,
    }
}

// ============================================================
// Commands
// ============================================================

async fn run_batch(
    config: &AuditConfig,
    hours: Option<u32>,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    config.validate().context("Invalid configuration")?;

    let hours = hours.unwrap_or(config.scan_hours);
    let telemetry = telemetry(config);
    let tokens = token_provider()?;
    let logs = log_service(config, tokens.clone())?;
    let model = chat_model(config, tokens)?;

    let orchestrator = BatchOrchestrator::new(
        ActivationDetector::new(logs.clone()).with_telemetry(telemetry.clone()),
        ActivityCorrelator::new(logs).with_telemetry(telemetry.clone()),
        AlignmentClassifier::new(model).with_telemetry(telemetry.clone()),
    )
    .with_concurrency(config.concurrency)
    .with_telemetry(telemetry);

    let sink: Box<dyn ReportSink> = match output.or_else(|| config.output_path.clone()) {
        Some(path) => {
            info!(path = %path.display(), "Report will be written to file");
            Box::new(FileSink::new(path))
        }
        None => Box::new(ConsoleSink),
    };

    let outcome = orchestrator.run(hours, sink.as_ref()).await;
    Ok(ExitCode::from(outcome.exit_code()))
}

async fn run_interactive(config: &AuditConfig) -> Result<ExitCode> {
    config.validate().context("Invalid configuration")?;

    let telemetry = telemetry(config);
    let tokens = token_provider()?;
    let logs = log_service(config, tokens.clone())?;
    let model = chat_model(config, tokens)?;

    let mut session = InteractiveSession::new(
        logs,
        model,
        telemetry,
        config.scan_hours,
        std::io::stdout(),
    );
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    session.run(stdin).await.context("Interactive session failed")?;

    Ok(ExitCode::SUCCESS)
}

async fn run_scan(config: &AuditConfig, hours: Option<u32>) -> Result<ExitCode> {
    config.validate_workspace().context("Invalid configuration")?;

    let hours = hours.unwrap_or(config.scan_hours);
    let logs = log_service(config, token_provider()?)?;
    let detector = ActivationDetector::new(logs).with_telemetry(telemetry(config));

    let activations = detector
        .detect(hours)
        .await
        .context("Failed to detect activations")?;
    println!(
        "{}",
        format_activations_summary(&activations, chrono::Utc::now())
    );

    Ok(ExitCode::SUCCESS)
}

async fn run_health(config: &AuditConfig, detailed: bool) -> Result<ExitCode> {
    let check = HealthCheck::new(
        config.workspace_id.clone(),
        config.openai_endpoint.clone(),
        token_provider()?,
    );

    let report = check.check(detailed).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize health report")?
    );

    if report.is_ready() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

// ============================================================
// Wiring
// ============================================================

fn telemetry(config: &AuditConfig) -> Arc<dyn Telemetry> {
    if config.telemetry_enabled {
        Arc::new(TracingTelemetry::new())
    } else {
        Arc::new(NoopTelemetry)
    }
}

fn token_provider() -> Result<Arc<dyn TokenProvider>> {
    let chain = DefaultTokenChain::new().context("Failed to set up Azure credentials")?;
    Ok(Arc::new(chain))
}

fn log_service(
    config: &AuditConfig,
    tokens: Arc<dyn TokenProvider>,
) -> Result<Arc<dyn LogQueryService>> {
    let client = LogAnalyticsClient::new(config.workspace_id.clone(), tokens, config.http_timeout())
        .context("Failed to create Log Analytics client")?;
    Ok(Arc::new(client))
}

fn chat_model(config: &AuditConfig, tokens: Arc<dyn TokenProvider>) -> Result<Arc<dyn ChatModel>> {
    let auth = match config.openai_api_key.as_deref() {
        Some(key) if !key.is_empty() => OpenAiAuth::ApiKey(key.to_string()),
        _ => OpenAiAuth::EntraId(tokens),
    };

    let client = AzureOpenAiClient::new(
        config.openai_endpoint.clone(),
        config.openai_deployment.clone(),
        config.openai_api_version.clone(),
        auth,
        config.http_timeout(),
    )
    .context("Failed to create Azure OpenAI client")?;

    Ok(Arc::new(client))
}
