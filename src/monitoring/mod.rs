//! Monitoring
//!
//! Pass-through telemetry and health probes. Nothing in the audit pipeline
//! depends on either being enabled.

pub mod health;
pub mod telemetry;

pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use telemetry::{
    CounterTelemetry, NoopTelemetry, QueryKind, Telemetry, TelemetrySnapshot, TracingTelemetry,
};
