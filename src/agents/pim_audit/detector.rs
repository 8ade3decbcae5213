//! PIM activation detection

use chrono::Duration;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::queries::{activations_query, columns};
use super::types::{ActivationRecord, UNKNOWN_FIELD};
use crate::error::AuditError;
use crate::monitoring::telemetry::{NoopTelemetry, QueryKind, Telemetry};
use crate::tools::log_analytics::{self, LogQueryService, LogRow};

/// Finds role activations in a trailing window of the audit log
pub struct ActivationDetector {
    logs: Arc<dyn LogQueryService>,
    telemetry: Arc<dyn Telemetry>,
}

impl ActivationDetector {
    pub fn new(logs: Arc<dyn LogQueryService>) -> Self {
        Self {
            logs,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Activations from the last `window_hours`, most recent first.
    ///
    /// Query failures propagate unchanged. Every record carries `window_hours`
    /// as its scan window.
    pub async fn detect(&self, window_hours: u32) -> Result<Vec<ActivationRecord>, AuditError> {
        if window_hours == 0 {
            return Err(AuditError::Config(
                "Scan window must be at least one hour".to_string(),
            ));
        }

        info!(window_hours, "Scanning for PIM activations");

        let query = activations_query(window_hours);
        let started = Instant::now();
        let rows = self
            .logs
            .execute(&query, Some(Duration::hours(i64::from(window_hours))))
            .await?;
        self.telemetry
            .record_query_duration(QueryKind::Detection, started.elapsed());

        let activations: Vec<ActivationRecord> = rows
            .iter()
            .filter_map(|row| activation_from_row(row, window_hours))
            .collect();

        self.telemetry.record_activations(activations.len());
        info!(
            count = activations.len(),
            rows = rows.len(),
            "Detected PIM activations"
        );

        Ok(activations)
    }
}

fn activation_from_row(row: &LogRow, window_hours: u32) -> Option<ActivationRecord> {
    let Some(user_identity) = log_analytics::text(row, columns::USER_EMAIL) else {
        warn!("Skipping activation row without a user identity");
        return None;
    };

    let Some(activated_at) = log_analytics::timestamp(row, columns::TIME_GENERATED) else {
        warn!(user = %user_identity, "Skipping activation row without a valid timestamp");
        return None;
    };

    let record = ActivationRecord {
        role_name: log_analytics::text(row, columns::ROLE_NAME)
            .unwrap_or_else(|| UNKNOWN_FIELD.to_string()),
        reason: log_analytics::text(row, columns::REASON).unwrap_or_default(),
        user_identity,
        activated_at,
        window_hours,
    };

    debug!(user = %record.user_identity, role = %record.role_name, "Found activation");
    Some(record)
}
