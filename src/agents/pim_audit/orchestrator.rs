//! Batch audit orchestrator
//!
//! Drives detection, correlation and classification for every activation in
//! the scan window and hands the rendered report to a sink. A classification
//! failure only costs that user their assessment; anything else fails the run.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::classifier::AlignmentClassifier;
use super::correlator::ActivityCorrelator;
use super::detector::ActivationDetector;
use super::report;
use super::sink::ReportSink;
use super::types::{ActivationRecord, BatchRun, RunOutcome, UserOutcome};
use crate::error::AuditError;
use crate::monitoring::telemetry::{NoopTelemetry, Telemetry};

pub struct BatchOrchestrator {
    detector: ActivationDetector,
    correlator: ActivityCorrelator,
    classifier: AlignmentClassifier,
    /// Activations processed at once; 1 is strictly sequential
    concurrency: usize,
    telemetry: Arc<dyn Telemetry>,
}

impl BatchOrchestrator {
    pub fn new(
        detector: ActivationDetector,
        correlator: ActivityCorrelator,
        classifier: AlignmentClassifier,
    ) -> Self {
        Self {
            detector,
            correlator,
            classifier,
            concurrency: 1,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Run one audit and deliver the report.
    ///
    /// Nothing is delivered when the run fails.
    pub async fn run(&self, window_hours: u32, sink: &dyn ReportSink) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("batch_run", %run_id, window_hours);

        async move {
            info!(concurrency = self.concurrency, "Starting batch audit");

            let outcome = match self.execute(window_hours, sink).await {
                Ok(()) => {
                    info!("Batch audit completed successfully");
                    RunOutcome::Success
                }
                Err(e) => {
                    error!(error = %e, "Batch audit failed");
                    self.telemetry.record_failure("batch");
                    RunOutcome::Failure
                }
            };

            if let Some(totals) = self.telemetry.totals() {
                info!(
                    activations = totals.activations,
                    activities = totals.activities,
                    queries = totals.queries,
                    query_millis = totals.query_millis,
                    model_calls = totals.model_calls,
                    failures = totals.failures,
                    "Run telemetry summary"
                );
            }

            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, window_hours: u32, sink: &dyn ReportSink) -> Result<(), AuditError> {
        let run = self.collect(window_hours).await?;
        let report = report::render_run(&run);
        sink.deliver(&report).await
    }

    /// Detect, correlate and classify without rendering.
    ///
    /// Outcomes are folded into the run in detection order regardless of
    /// concurrency. The first activity lookup failure aborts the collection and
    /// drops any in-flight work.
    pub async fn collect(&self, window_hours: u32) -> Result<BatchRun, AuditError> {
        let activations = self.detector.detect(window_hours).await?;

        if activations.is_empty() {
            info!("No activations found, nothing to correlate");
            return Ok(BatchRun::new(activations));
        }

        let mut run = BatchRun::default();
        let mut failed = 0usize;
        {
            let mut outcomes = std::pin::pin!(stream::iter(&activations)
                .map(|activation| self.process_activation(activation))
                .buffered(self.concurrency));

            while let Some(outcome) = outcomes.next().await {
                let outcome = outcome?;
                let user = outcome.user_identity.clone();

                if let Some(err) = run.absorb(outcome) {
                    warn!(user = %user, error = %err, "Failed to assess alignment, continuing");
                    self.telemetry.record_failure("classification");
                    failed += 1;
                }
            }
        }
        run.activations = activations;

        info!(
            activations = run.activations.len(),
            assessed = run.assessments_by_user.len(),
            failed,
            "Collected audit results"
        );

        Ok(run)
    }

    async fn process_activation(
        &self,
        activation: &ActivationRecord,
    ) -> Result<UserOutcome, AuditError> {
        info!(user = %activation.user_identity, role = %activation.role_name, "Processing activation");

        let activities = self
            .correlator
            .activities_for(&activation.user_identity, activation.activated_at, Utc::now())
            .await?;

        let assessment = self
            .classifier
            .classify(&activation.reason, &activities)
            .await;

        Ok(UserOutcome {
            user_identity: activation.user_identity.clone(),
            activities,
            assessment,
        })
    }
}
