//! PIM Activation Audit Agent
//!
//! Finds privileged role activations in a Log Analytics workspace, pulls what
//! each elevated user did afterwards, and asks Azure OpenAI whether that
//! activity matches the justification they gave.
//!
//! ## Pipeline
//!
//! - `ActivationDetector`: activations in a trailing window (most recent first)
//! - `ActivityCorrelator`: successful operations per user (oldest first)
//! - `AlignmentClassifier`: ALIGNED / PARTIALLY_ALIGNED / NOT_ALIGNED / UNKNOWN
//! - `BatchOrchestrator`: runs the above per activation and renders the report
//!
//! ## Example Usage
//!
//! ```ignore
//! use pim_audit::agents::pim_audit::{
//!     ActivationDetector, ActivityCorrelator, AlignmentClassifier, BatchOrchestrator, FileSink,
//! };
//!
//! let orchestrator = BatchOrchestrator::new(
//!     ActivationDetector::new(logs.clone()),
//!     ActivityCorrelator::new(logs),
//!     AlignmentClassifier::new(model),
//! );
//!
//! let outcome = orchestrator.run(24, &FileSink::new("reports/pim.md")).await;
//! std::process::exit(outcome.exit_code().into());
//! ```

pub mod classifier;
pub mod correlator;
pub mod detector;
pub mod orchestrator;
pub mod queries;
pub mod query_generator;
pub mod report;
pub mod sink;
pub mod types;

pub use classifier::AlignmentClassifier;
pub use correlator::ActivityCorrelator;
pub use detector::ActivationDetector;
pub use orchestrator::BatchOrchestrator;
pub use query_generator::QueryGenerator;
pub use sink::{ConsoleSink, FileSink, ReportSink};
pub use types::{
    ActivationRecord, ActivityRecord, AlignmentLevel, Assessment, BatchRun, RunOutcome,
};
