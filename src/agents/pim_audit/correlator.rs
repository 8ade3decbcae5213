//! Activity correlation for elevated users

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::queries::{activities_query, columns};
use super::types::{ActivityRecord, UNKNOWN_FIELD};
use crate::error::AuditError;
use crate::monitoring::telemetry::{NoopTelemetry, QueryKind, Telemetry};
use crate::tools::log_analytics::{self, LogQueryService, LogRow};

/// Fetches what a user did while elevated
pub struct ActivityCorrelator {
    logs: Arc<dyn LogQueryService>,
    telemetry: Arc<dyn Telemetry>,
}

impl ActivityCorrelator {
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

    /// Successful operations by `user_identity` in `[start, end]`, oldest first.
    ///
    /// Ordering comes from the query; rows are not re-sorted here.
    pub async fn activities_for(
        &self,
        user_identity: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, AuditError> {
        let query = activities_query(user_identity, start, end);

        let started = Instant::now();
        let rows = self.logs.execute(&query, None).await?;
        self.telemetry
            .record_query_duration(QueryKind::Correlation, started.elapsed());

        let activities: Vec<ActivityRecord> = rows.iter().filter_map(activity_from_row).collect();

        if activities
            .windows(2)
            .any(|pair| pair[0].occurred_at > pair[1].occurred_at)
        {
            warn!(user = %user_identity, "Activity rows returned out of time order");
        }

        self.telemetry.record_activities(activities.len());
        info!(user = %user_identity, count = activities.len(), "Fetched user activities");

        Ok(activities)
    }
}

fn activity_from_row(row: &LogRow) -> Option<ActivityRecord> {
    let Some(occurred_at) = log_analytics::timestamp(row, columns::TIME_GENERATED) else {
        warn!("Skipping activity row without a valid timestamp");
        return None;
    };

    let field = |column: &str| {
        log_analytics::text(row, column).unwrap_or_else(|| UNKNOWN_FIELD.to_string())
    };

    let record = ActivityRecord {
        occurred_at,
        operation: field(columns::OPERATION_NAME),
        resource_type: field(columns::RESOURCE_TYPE),
        resource_name: field(columns::RESOURCE),
        resource_group: field(columns::RESOURCE_GROUP),
        subscription_id: field(columns::SUBSCRIPTION_ID),
        status: field(columns::STATUS),
    };

    debug!(operation = %record.operation, resource = %record.resource_name, "Mapped activity");
    Some(record)
}
