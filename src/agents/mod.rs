//! Agent modules
//!
//! - `pim_audit`: PIM activation detection and alignment assessment

pub mod pim_audit;

pub use pim_audit::BatchOrchestrator;
