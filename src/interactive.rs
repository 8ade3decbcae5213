//! Interactive audit session
//!
//! Line-oriented loop over any async reader and writer. Each command's
//! failure is printed and the session carries on.

use chrono::{Duration, Utc};
use regex::Regex;
use std::io::Write;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{error, info};

use crate::agents::pim_audit::query_generator::DEFAULT_MAX_RETRIES;
use crate::agents::pim_audit::report::{format_activations_summary, format_activities, format_assessment};
use crate::agents::pim_audit::{
    ActivationDetector, ActivationRecord, ActivityCorrelator, AlignmentClassifier, Assessment,
    QueryGenerator,
};
use crate::error::AuditError;
use crate::monitoring::telemetry::{QueryKind, Telemetry};
use crate::tools::azure_openai::ChatModel;
use crate::tools::log_analytics::LogQueryService;

/// Rows shown for an ad-hoc query
const MAX_DISPLAY_ROWS: usize = 20;

const EMAIL_PATTERN: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";

const WELCOME: &str = "🤖 PIM Activity Audit Agent

Type 'scan' to detect PIM activations, ask questions, or 'exit' to quit.

Example commands:
  • scan - Scan for recent PIM activations
  • What did user@example.com do? - View user activities
  • assess user@example.com - Assess alignment
  • assess - Assess every scanned user
  • exit - Exit the application";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Exit,
    Scan,
    AssessAll,
    /// Assess one user; `None` means the user in context
    Assess(Option<String>),
    Activities(Option<String>),
    /// Anything else is handed to the query generator
    Query(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let lower = line.to_lowercase();

    if line.is_empty() {
        return Command::Empty;
    }

    if matches!(lower.as_str(), "exit" | "quit" | "q") {
        return Command::Exit;
    }

    if lower == "scan" {
        return Command::Scan;
    }

    if lower.split_whitespace().next() == Some("assess") {
        let rest = line["assess".len()..].trim();
        if rest.is_empty() {
            return Command::AssessAll;
        }
        return Command::Assess(extract_email(rest));
    }

    if lower.contains("what did") || lower.contains("activities") {
        return Command::Activities(extract_email(line));
    }

    if lower.contains("align") || lower.contains("assessment") {
        return Command::Assess(extract_email(line));
    }

    Command::Query(line.to_string())
}

/// First email address in `text`
pub fn extract_email(text: &str) -> Option<String> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();

    EMAIL
        .get_or_init(|| Regex::new(EMAIL_PATTERN).ok())
        .as_ref()?
        .find(text)
        .map(|m| m.as_str().to_string())
}

pub struct InteractiveSession<W: Write> {
    detector: ActivationDetector,
    correlator: ActivityCorrelator,
    classifier: AlignmentClassifier,
    generator: QueryGenerator,
    logs: Arc<dyn LogQueryService>,
    telemetry: Arc<dyn Telemetry>,
    scan_hours: u32,
    out: W,
    activations: Vec<ActivationRecord>,
    current_user: Option<String>,
}

impl<W: Write> InteractiveSession<W> {
    pub fn new(
        logs: Arc<dyn LogQueryService>,
        model: Arc<dyn ChatModel>,
        telemetry: Arc<dyn Telemetry>,
        scan_hours: u32,
        out: W,
    ) -> Self {
        Self {
            detector: ActivationDetector::new(logs.clone()).with_telemetry(telemetry.clone()),
            correlator: ActivityCorrelator::new(logs.clone()).with_telemetry(telemetry.clone()),
            classifier: AlignmentClassifier::new(model.clone()).with_telemetry(telemetry.clone()),
            generator: QueryGenerator::new(model).with_telemetry(telemetry.clone()),
            logs,
            telemetry,
            scan_hours,
            out,
            activations: Vec::new(),
            current_user: None,
        }
    }

    /// Read commands until `exit` or end of input.
    ///
    /// Only failures writing output end the session early.
    pub async fn run<R>(&mut self, input: R) -> Result<(), AuditError>
    where
        R: AsyncBufRead + Unpin,
    {
        writeln!(self.out, "{}", WELCOME)?;
        let mut lines = input.lines();

        loop {
            write!(self.out, "\n> ")?;
            self.out.flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };

            match parse_command(&line) {
                Command::Exit => break,
                command => {
                    if let Err(e) = self.handle(command).await {
                        if matches!(e, AuditError::Io(_)) {
                            return Err(e);
                        }
                        error!(error = %e, "Command failed");
                        writeln!(self.out, "Error: {}", e)?;
                    }
                }
            }
        }

        writeln!(self.out, "\n👋 Goodbye!")?;
        Ok(())
    }

    pub async fn handle(&mut self, command: Command) -> Result<(), AuditError> {
        match command {
            Command::Empty | Command::Exit => Ok(()),
            Command::Scan => self.scan().await,
            Command::AssessAll => self.assess_all().await,
            Command::Assess(user) => self.assess_user(user).await,
            Command::Activities(user) => self.show_activities(user).await,
            Command::Query(request) => self.ad_hoc_query(&request).await,
        }
    }

    async fn scan(&mut self) -> Result<(), AuditError> {
        writeln!(
            self.out,
            "📊 Scanning for PIM activations in last {} hours...\n",
            self.scan_hours
        )?;

        self.activations = self.detector.detect(self.scan_hours).await?;
        writeln!(
            self.out,
            "{}",
            format_activations_summary(&self.activations, Utc::now())
        )?;
        Ok(())
    }

    async fn show_activities(&mut self, user: Option<String>) -> Result<(), AuditError> {
        let Some(user) = user else {
            writeln!(
                self.out,
                "Please specify a user email. Example: 'What did user@example.com do?'"
            )?;
            return Ok(());
        };

        let Some(activation) = self.find_activation(&user) else {
            writeln!(self.out, "No PIM activation found for {}. Run 'scan' first.", user)?;
            return Ok(());
        };

        self.current_user = Some(activation.user_identity.clone());
        writeln!(
            self.out,
            "\n📋 Activities for {} during elevation:\n",
            activation.user_identity
        )?;

        let activities = self
            .correlator
            .activities_for(&activation.user_identity, activation.activated_at, Utc::now())
            .await?;
        writeln!(self.out, "{}", format_activities(&activities))?;
        Ok(())
    }

    async fn assess_user(&mut self, user: Option<String>) -> Result<(), AuditError> {
        let Some(user) = user.or_else(|| self.current_user.clone()) else {
            writeln!(self.out, "Please specify a user or query activities first.")?;
            return Ok(());
        };

        let Some(activation) = self.find_activation(&user) else {
            writeln!(self.out, "No PIM activation found for {}. Run 'scan' first.", user)?;
            return Ok(());
        };

        writeln!(
            self.out,
            "\n🔍 Assessing alignment for {}...\n",
            activation.user_identity
        )?;

        let assessment = self.assess(&activation).await?;
        writeln!(self.out, "{}", format_assessment(&assessment))?;
        Ok(())
    }

    async fn assess_all(&mut self) -> Result<(), AuditError> {
        if self.activations.is_empty() {
            writeln!(self.out, "No activations to assess. Run 'scan' first.")?;
            return Ok(());
        }

        for activation in self.activations.clone() {
            writeln!(self.out, "\n🔍 Assessing {}...", activation.user_identity)?;

            match self.assess(&activation).await {
                Ok(assessment) => writeln!(self.out, "{}", format_assessment(&assessment))?,
                Err(e) => {
                    error!(user = %activation.user_identity, error = %e, "Assessment failed");
                    writeln!(self.out, "Assessment failed: {}", e)?;
                }
            }
        }
        Ok(())
    }

    async fn assess(&self, activation: &ActivationRecord) -> Result<Assessment, AuditError> {
        let activities = self
            .correlator
            .activities_for(&activation.user_identity, activation.activated_at, Utc::now())
            .await?;
        self.classifier.classify(&activation.reason, &activities).await
    }

    async fn ad_hoc_query(&mut self, request: &str) -> Result<(), AuditError> {
        let query = self.generator.generate(request, DEFAULT_MAX_RETRIES).await?;
        writeln!(self.out, "Generated query:\n{}\n", query)?;
        info!(query = %query, "Running generated query");

        let started = Instant::now();
        let rows = self
            .logs
            .execute(&query, Some(Duration::hours(i64::from(self.scan_hours))))
            .await?;
        self.telemetry
            .record_query_duration(QueryKind::AdHoc, started.elapsed());

        for row in rows.iter().take(MAX_DISPLAY_ROWS) {
            let line = serde_json::to_string(row)
                .map_err(|e| AuditError::Query(format!("Unprintable row: {}", e)))?;
            writeln!(self.out, "{}", line)?;
        }
        if rows.len() > MAX_DISPLAY_ROWS {
            writeln!(self.out, "... {} more", rows.len() - MAX_DISPLAY_ROWS)?;
        }
        writeln!(self.out, "({} rows)", rows.len())?;
        Ok(())
    }

    /// Case-insensitive lookup among scanned activations
    fn find_activation(&self, user: &str) -> Option<ActivationRecord> {
        self.activations
            .iter()
            .find(|a| a.user_identity.eq_ignore_ascii_case(user))
            .cloned()
    }

    pub fn into_output(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::telemetry::NoopTelemetry;
    use crate::testing::{activation_row, activity_row, ScriptedModel, StaticLogService};
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_basic_commands() {
        assert_eq!(parse_command("   "), Command::Empty);
        assert_eq!(parse_command("QUIT"), Command::Exit);
        assert_eq!(parse_command("q"), Command::Exit);
        assert_eq!(parse_command("Scan"), Command::Scan);
        assert_eq!(parse_command("assess"), Command::AssessAll);
    }

    #[test]
    fn test_parse_user_commands() {
        assert_eq!(
            parse_command("assess A@X.com"),
            Command::Assess(Some("A@X.com".into()))
        );
        assert_eq!(
            parse_command("What did a@x.com do?"),
            Command::Activities(Some("a@x.com".into()))
        );
        assert_eq!(parse_command("show activities"), Command::Activities(None));
        assert_eq!(parse_command("is that aligned?"), Command::Assess(None));
        assert_eq!(
            parse_command("assessment for b@x.com"),
            Command::Assess(Some("b@x.com".into()))
        );
        assert_eq!(
            parse_command("failed sign-ins today"),
            Command::Query("failed sign-ins today".into())
        );
    }

    #[test]
    fn test_extract_email() {
        assert_eq!(
            extract_email("check admin.ops+pim@contoso.co.uk now").as_deref(),
            Some("admin.ops+pim@contoso.co.uk")
        );
        assert_eq!(extract_email("nobody here"), None);
    }

    fn session(
        logs: StaticLogService,
        model: ScriptedModel,
    ) -> InteractiveSession<Vec<u8>> {
        InteractiveSession::new(
            Arc::new(logs),
            Arc::new(model),
            Arc::new(NoopTelemetry),
            24,
            Vec::new(),
        )
    }

    fn output(session: InteractiveSession<Vec<u8>>) -> String {
        String::from_utf8(session.into_output()).unwrap()
    }

    fn scanned_logs() -> StaticLogService {
        let t0 = Utc::now() - Duration::hours(3);
        StaticLogService::new()
            .with_activations(vec![activation_row("a@x.com", "Owner", "add storage account", t0)])
            .with_activities(
                "a@x.com",
                vec![activity_row(
                    "Create Storage Account",
                    t0 + Duration::minutes(30),
                )],
            )
    }

    #[tokio::test]
    async fn test_scan_then_activities_then_assess() {
        let mut session = session(scanned_logs(), ScriptedModel::replying(["ALIGNED: matches"]));

        let input: &[u8] = b"scan\nwhat did A@X.COM do\nis it aligned?\nexit\nscan\n";
        session.run(input).await.unwrap();

        let out = output(session);
        assert!(out.contains("Found 1 elevated user(s):"));
        assert!(out.contains("(activated 3 hours ago)"));
        assert!(out.contains("Activities for a@x.com during elevation"));
        assert!(out.contains("Create Storage Account - stacct01"));
        assert!(out.contains("aligned ✅"));
        assert!(out.ends_with("👋 Goodbye!\n"));
        assert_eq!(out.matches("Scanning for PIM activations").count(), 1);
    }

    #[tokio::test]
    async fn test_assess_before_scan() {
        let mut session = session(StaticLogService::new(), ScriptedModel::replying(["ALIGNED"]));
        session.run(&b"assess\nassess a@x.com\n"[..]).await.unwrap();

        let out = output(session);
        assert!(out.contains("No activations to assess. Run 'scan' first."));
        assert!(out.contains("No PIM activation found for a@x.com. Run 'scan' first."));
    }

    #[tokio::test]
    async fn test_assess_all_continues_after_failure() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let logs = StaticLogService::new().with_activations(vec![
            activation_row("a@x.com", "Owner", "x", t0),
            activation_row("b@x.com", "Owner", "y", t0),
        ]);
        let model = ScriptedModel::new(vec![
            Err(AuditError::Model("throttled".into())),
            Ok("NOT_ALIGNED".into()),
        ]);
        let mut session = session(logs, model);

        session.run(&b"scan\nassess\n"[..]).await.unwrap();

        let out = output(session);
        assert!(out.contains("Assessment failed: Model request failed: throttled"));
        assert!(out.contains("not_aligned ❌"));
    }

    #[tokio::test]
    async fn test_command_errors_keep_session_alive() {
        let logs = StaticLogService::new().failing_on("AuditLogs");
        let mut session = session(logs, ScriptedModel::replying(Vec::<String>::new()));

        session.run(&b"scan\nassess\n"[..]).await.unwrap();

        let out = output(session);
        assert!(out.contains("Error: Log query failed"));
        assert!(out.contains("No activations to assess"));
    }

    #[tokio::test]
    async fn test_free_text_runs_generated_query() {
        let rows: Vec<_> = (0..25)
            .map(|i| serde_json::from_value(json!({"Count": i})).unwrap())
            .collect();
        let logs = StaticLogService::new().with_rows(rows);
        let model = ScriptedModel::replying(["SigninLogs | where ResultType != 0"]);
        let mut session = session(logs, model);

        session.run(&b"failed sign-ins\n"[..]).await.unwrap();

        let out = output(session);
        assert!(out.contains("Generated query:\nSigninLogs | where ResultType != 0"));
        assert!(out.contains("{\"Count\":19}"));
        assert!(!out.contains("{\"Count\":20}"));
        assert!(out.contains("... 5 more"));
        assert!(out.contains("(25 rows)"));
    }

    #[tokio::test]
    async fn test_assess_without_context() {
        let mut session = session(StaticLogService::new(), ScriptedModel::replying(["x"]));
        session.handle(Command::Assess(None)).await.unwrap();
        assert!(output(session).contains("Please specify a user or query activities first."));
    }
}
