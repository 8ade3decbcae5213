//! Audit telemetry
//!
//! Components receive an `Arc<dyn Telemetry>` at construction and report
//! what they did through it. Every method defaults to a no-op, so telemetry
//! can never change pipeline behavior.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

/// Which query a latency sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Detection,
    Correlation,
    AdHoc,
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryKind::Detection => write!(f, "pim_detection"),
            QueryKind::Correlation => write!(f, "activity_correlation"),
            QueryKind::AdHoc => write!(f, "ad_hoc"),
        }
    }
}

pub trait Telemetry: Send + Sync {
    fn record_activations(&self, _count: usize) {}

    fn record_activities(&self, _count: usize) {}

    fn record_query_duration(&self, _kind: QueryKind, _elapsed: Duration) {}

    fn record_model_call(&self) {}

    fn record_failure(&self, _stage: &'static str) {}

    /// Running totals, if this implementation keeps any
    fn totals(&self) -> Option<TelemetrySnapshot> {
        None
    }
}

/// Used when telemetry is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub activations: u64,
    pub activities: u64,
    pub queries: u64,
    pub query_millis: u64,
    pub model_calls: u64,
    pub failures: u64,
}

/// In-memory counters
#[derive(Debug, Default)]
pub struct CounterTelemetry {
    activations: AtomicU64,
    activities: AtomicU64,
    queries: AtomicU64,
    query_millis: AtomicU64,
    model_calls: AtomicU64,
    failures: AtomicU64,
}

impl CounterTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            activations: self.activations.load(Ordering::Relaxed),
            activities: self.activities.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            query_millis: self.query_millis.load(Ordering::Relaxed),
            model_calls: self.model_calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl Telemetry for CounterTelemetry {
    fn record_activations(&self, count: usize) {
        self.activations.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn record_activities(&self, count: usize) {
        self.activities.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn record_query_duration(&self, _kind: QueryKind, elapsed: Duration) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.query_millis
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    fn record_model_call(&self) {
        self.model_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, _stage: &'static str) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn totals(&self) -> Option<TelemetrySnapshot> {
        Some(self.snapshot())
    }
}

/// Emits each measurement as a structured event on the `pim_audit::metrics`
/// target and keeps running totals.
#[derive(Debug, Default)]
pub struct TracingTelemetry {
    counters: CounterTelemetry,
}

impl TracingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.counters.snapshot()
    }
}

impl Telemetry for TracingTelemetry {
    fn record_activations(&self, count: usize) {
        self.counters.record_activations(count);
        info!(target: "pim_audit::metrics", metric = "pim_activations_detected", value = count);
    }

    fn record_activities(&self, count: usize) {
        self.counters.record_activities(count);
        info!(target: "pim_audit::metrics", metric = "user_activities_found", value = count);
    }

    fn record_query_duration(&self, kind: QueryKind, elapsed: Duration) {
        self.counters.record_query_duration(kind, elapsed);
        info!(
            target: "pim_audit::metrics",
            metric = "query_duration_ms",
            query = %kind,
            value = elapsed.as_millis() as u64
        );
    }

    fn record_model_call(&self) {
        self.counters.record_model_call();
        info!(target: "pim_audit::metrics", metric = "openai_api_calls", value = 1u64);
    }

    fn record_failure(&self, stage: &'static str) {
        self.counters.record_failure(stage);
        info!(target: "pim_audit::metrics", metric = "failures", stage = stage, value = 1u64);
    }

    fn totals(&self) -> Option<TelemetrySnapshot> {
        Some(self.snapshot())
    }
}
