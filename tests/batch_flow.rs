//! End-to-end batch audits against in-memory collaborators

use chrono::{Duration, Utc};
use std::sync::Arc;

use pim_audit::agents::pim_audit::{
    ActivationDetector, ActivityCorrelator, AlignmentClassifier, AlignmentLevel, BatchOrchestrator,
    FileSink, RunOutcome,
};
use pim_audit::monitoring::{CounterTelemetry, Telemetry};
use pim_audit::testing::{activation_row, activity_row, MemorySink, ScriptedModel, StaticLogService};
use pim_audit::AuditError;

fn orchestrator(logs: Arc<StaticLogService>, model: Arc<ScriptedModel>) -> BatchOrchestrator {
    BatchOrchestrator::new(
        ActivationDetector::new(logs.clone()),
        ActivityCorrelator::new(logs),
        AlignmentClassifier::new(model),
    )
}

#[tokio::test]
async fn storage_account_activation_is_aligned() {
    let t0 = Utc::now() - Duration::hours(2);
    let logs = Arc::new(
        StaticLogService::new()
            .with_activations(vec![activation_row(
                "a@x.com",
                "Storage Account Contributor",
                "add storage account",
                t0,
            )])
            .with_activities(
                "a@x.com",
                vec![activity_row("Create Storage Account", t0 + Duration::minutes(30))],
            ),
    );
    let model = Arc::new(ScriptedModel::replying(["ALIGNED: matches"]));
    let sink = MemorySink::new();

    let outcome = orchestrator(logs, model.clone()).run(24, &sink).await;

    assert_eq!(outcome, RunOutcome::Success);
    let report = sink.last().unwrap();
    assert!(report.contains("- Total PIM Activations: 1"));
    assert!(report.contains("- Aligned: 1"));
    assert!(report.contains("- Not Aligned: 0"));
    assert!(report.contains("- Partially Aligned: 0"));
    assert!(report.contains("- Unknown: 0"));
    assert!(report.contains("**Assessment**: aligned"));
    assert!(report.contains("Create Storage Account"));

    let (messages, _) = model.calls().remove(0);
    assert!(messages[1].content.contains("add storage account"));
    assert!(messages[1].content.contains("Create Storage Account"));
}

#[tokio::test]
async fn failed_classification_keeps_other_users() {
    let t0 = Utc::now() - Duration::hours(1);
    let logs = Arc::new(StaticLogService::new().with_activations(vec![
        activation_row("first@x.com", "Owner", "break glass", t0),
        activation_row("second@x.com", "Reader", "review costs", t0 - Duration::hours(1)),
    ]));
    let model = Arc::new(ScriptedModel::new(vec![
        Err(AuditError::Model("503 Service Unavailable".into())),
        Ok("PARTIALLY_ALIGNED: only read access used".into()),
    ]));
    let telemetry = Arc::new(CounterTelemetry::new());
    let sink = MemorySink::new();

    let outcome = orchestrator(logs, model)
        .with_telemetry(telemetry.clone())
        .run(24, &sink)
        .await;

    assert_eq!(outcome, RunOutcome::Success);
    let report = sink.last().unwrap();
    assert!(report.contains("### first@x.com"));
    assert!(report.contains("### second@x.com"));
    assert!(report.contains("**Assessment**: Not available"));
    assert!(report.contains("**Assessment**: partially_aligned"));
    assert!(report.contains("- Partially Aligned: 1"));
    assert!(report.contains("- Unknown: 0"));
    assert_eq!(telemetry.snapshot().failures, 1);
    assert_eq!(telemetry.totals().map(|t| t.model_calls), Some(2));
}

#[tokio::test]
async fn empty_window_reports_no_activations() {
    let logs = Arc::new(StaticLogService::new());
    let model = Arc::new(ScriptedModel::replying(["ALIGNED"]));
    let sink = MemorySink::new();

    let outcome = orchestrator(logs.clone(), model.clone()).run(6, &sink).await;

    assert_eq!(outcome, RunOutcome::Success);
    let report = sink.last().unwrap();
    assert!(report.starts_with("# PIM Activity Audit Report"));
    assert!(report.contains("No PIM activations found in the specified time period."));
    assert!(!report.contains("Executive Summary"));
    assert_eq!(logs.queries().len(), 1);
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn report_written_to_nested_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("pim-audit.md");
    let t0 = Utc::now() - Duration::minutes(20);
    let logs = Arc::new(StaticLogService::new().with_activations(vec![activation_row(
        "ops@x.com",
        "Owner",
        "rotate keys",
        t0,
    )]));
    let model = Arc::new(ScriptedModel::replying(["NOT ALIGNED: no key operations"]));

    let outcome = orchestrator(logs, model)
        .with_concurrency(3)
        .run(24, &FileSink::new(path.clone()))
        .await;

    assert_eq!(outcome, RunOutcome::Success);
    let report = std::fs::read_to_string(&path).unwrap();
    assert!(report.contains("- Not Aligned: 1"));
    assert!(report.contains("No activities found."));
}

#[tokio::test]
async fn collected_state_matches_report() {
    let t0 = Utc::now() - Duration::hours(3);
    let logs = Arc::new(
        StaticLogService::new()
            .with_activations(vec![activation_row("a@x.com", "Owner", "deploy", t0)])
            .with_activities(
                "a@x.com",
                vec![
                    activity_row("Create Deployment", t0 + Duration::minutes(5)),
                    activity_row("Delete Resource Group", t0 + Duration::minutes(50)),
                ],
            ),
    );
    let model = Arc::new(ScriptedModel::replying(["This is ALIGNED"]));

    let run = orchestrator(logs, model).collect(24).await.unwrap();

    assert_eq!(run.count_level(AlignmentLevel::Aligned), 1);
    let activities = &run.activities_by_user["a@x.com"];
    assert!(activities
        .windows(2)
        .all(|pair| pair[0].occurred_at <= pair[1].occurred_at));
}
