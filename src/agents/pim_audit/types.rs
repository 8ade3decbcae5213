//! Types for PIM activation auditing
//!
//! Records produced by the detector and correlator, the alignment taxonomy
//! returned by the classifier, and the per-invocation state the batch
//! orchestrator accumulates before rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::AuditError;

/// Value used for any optional activity column the log store did not return
pub const UNKNOWN_FIELD: &str = "Unknown";

/// A privileged role activation found in the audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRecord {
    /// UPN or email of the elevated user (never empty)
    pub user_identity: String,
    pub role_name: String,
    /// Justification entered at activation time (may be empty)
    pub reason: String,
    pub activated_at: DateTime<Utc>,
    /// Scan window that surfaced the activation, not a measured elevation duration
    pub window_hours: u32,
}

/// A successful control-plane operation performed by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub occurred_at: DateTime<Utc>,
    pub operation: String,
    pub resource_type: String,
    pub resource_name: String,
    pub resource_group: String,
    pub subscription_id: String,
    pub status: String,
}

impl ActivityRecord {
    /// Single-line rendering used in model prompts.
    pub fn prompt_line(&self) -> String {
        format!(
            "- {}: {} on {}/{} (resource group: {}, subscription: {})",
            self.occurred_at.format("%Y-%m-%d %H:%M:%S"),
            self.operation,
            self.resource_type,
            self.resource_name,
            self.resource_group,
            self.subscription_id
        )
    }
}

/// How well observed activity matches the stated activation reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentLevel {
    Aligned,
    PartiallyAligned,
    NotAligned,
    Unknown,
}

impl AlignmentLevel {
    /// All levels in report order
    pub const ALL: [AlignmentLevel; 4] = [
        AlignmentLevel::Aligned,
        AlignmentLevel::PartiallyAligned,
        AlignmentLevel::NotAligned,
        AlignmentLevel::Unknown,
    ];

    /// Parse a raw model response.
    ///
    /// Matching is case-insensitive and substring based. `ALIGNED` is contained
    /// in both other tokens, so the specific forms are checked first.
    pub fn from_response(raw: &str) -> Self {
        let upper = raw.to_uppercase();

        if upper.contains("NOT_ALIGNED") || upper.contains("NOT ALIGNED") {
            AlignmentLevel::NotAligned
        } else if upper.contains("PARTIALLY_ALIGNED") || upper.contains("PARTIALLY ALIGNED") {
            AlignmentLevel::PartiallyAligned
        } else if upper.contains("ALIGNED") {
            AlignmentLevel::Aligned
        } else {
            AlignmentLevel::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlignmentLevel::Aligned => "aligned",
            AlignmentLevel::PartiallyAligned => "partially_aligned",
            AlignmentLevel::NotAligned => "not_aligned",
            AlignmentLevel::Unknown => "unknown",
        }
    }

    /// Human label used in report summaries
    pub fn label(&self) -> &'static str {
        match self {
            AlignmentLevel::Aligned => "Aligned",
            AlignmentLevel::PartiallyAligned => "Partially Aligned",
            AlignmentLevel::NotAligned => "Not Aligned",
            AlignmentLevel::Unknown => "Unknown",
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            AlignmentLevel::Aligned => "✅",
            AlignmentLevel::PartiallyAligned => "⚠️",
            AlignmentLevel::NotAligned => "❌",
            AlignmentLevel::Unknown => "❓",
        }
    }
}

impl std::fmt::Display for AlignmentLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classifier verdict for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub level: AlignmentLevel,
    /// Raw model response, kept verbatim
    pub explanation: String,
}

impl Assessment {
    pub fn from_response(raw: impl Into<String>) -> Self {
        let explanation = raw.into();
        Self {
            level: AlignmentLevel::from_response(&explanation),
            explanation,
        }
    }
}

/// Result of processing a single activation inside a batch.
///
/// Activity lookup failures never reach this type; only the assessment is
/// allowed to fail without aborting the batch.
#[derive(Debug)]
pub struct UserOutcome {
    pub user_identity: String,
    pub activities: Vec<ActivityRecord>,
    pub assessment: Result<Assessment, AuditError>,
}

/// State accumulated by one batch invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchRun {
    pub activations: Vec<ActivationRecord>,
    pub activities_by_user: HashMap<String, Vec<ActivityRecord>>,
    /// Only users whose classification succeeded have an entry
    pub assessments_by_user: HashMap<String, Assessment>,
}

impl BatchRun {
    pub fn new(activations: Vec<ActivationRecord>) -> Self {
        Self {
            activations,
            activities_by_user: HashMap::new(),
            assessments_by_user: HashMap::new(),
        }
    }

    /// Fold one user's outcome into the maps, returning the assessment error if any.
    ///
    /// A failed assessment drops any earlier entry for the same user so the
    /// stored assessment always describes the stored activities.
    pub fn absorb(&mut self, outcome: UserOutcome) -> Option<AuditError> {
        let UserOutcome {
            user_identity,
            activities,
            assessment,
        } = outcome;

        self.activities_by_user
            .insert(user_identity.clone(), activities);

        match assessment {
            Ok(assessment) => {
                self.assessments_by_user.insert(user_identity, assessment);
                None
            }
            Err(err) => {
                self.assessments_by_user.remove(&user_identity);
                Some(err)
            }
        }
    }

    /// Count stored assessments at the given level.
    pub fn count_level(&self, level: AlignmentLevel) -> usize {
        count_level(&self.assessments_by_user, level)
    }
}

pub(crate) fn count_level(
    assessments_by_user: &HashMap<String, Assessment>,
    level: AlignmentLevel,
) -> usize {
    assessments_by_user
        .values()
        .filter(|a| a.level == level)
        .count()
}

/// Overall status of a batch invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunOutcome {
    Success,
    Failure,
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Failure => 1,
        }
    }
}
