//! Alignment classification
//!
//! Asks the chat model whether a user's activity during elevation matches the
//! reason they gave, and maps the free-text answer onto [`AlignmentLevel`].
//!
//! [`AlignmentLevel`]: super::types::AlignmentLevel

use std::sync::Arc;
use tracing::info;

use super::types::{ActivityRecord, Assessment};
use crate::error::AuditError;
use crate::monitoring::telemetry::{NoopTelemetry, Telemetry};
use crate::tools::azure_openai::{ChatMessage, ChatModel, ModelOptions};

/// Judgment task, so sampling is moderate rather than zero
pub const CLASSIFIER_OPTIONS: ModelOptions = ModelOptions::new(0.5, 2000);

const SYSTEM_PROMPT: &str = "You are a security analyst assessing Azure PIM (Privileged Identity Management) activations.
Determine if the user's activities during their elevated access period align with their stated reason for activation.
Respond with one of: ALIGNED, PARTIALLY_ALIGNED, NOT_ALIGNED, UNKNOWN.
Then provide a brief explanation.";

const NO_ACTIVITIES: &str = "No activities recorded";

pub struct AlignmentClassifier {
    model: Arc<dyn ChatModel>,
    options: ModelOptions,
    telemetry: Arc<dyn Telemetry>,
}

impl AlignmentClassifier {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            options: CLASSIFIER_OPTIONS,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// One model request, no retry. Model errors propagate.
    pub async fn classify(
        &self,
        reason: &str,
        activities: &[ActivityRecord],
    ) -> Result<Assessment, AuditError> {
        let messages = build_messages(reason, activities);

        self.telemetry.record_model_call();
        let raw = self.model.complete(&messages, self.options).await?;

        let assessment = Assessment::from_response(raw);
        info!(level = %assessment.level, activities = activities.len(), "Assessment complete");
        Ok(assessment)
    }
}

fn build_messages(reason: &str, activities: &[ActivityRecord]) -> Vec<ChatMessage> {
    let activities_text = if activities.is_empty() {
        NO_ACTIVITIES.to_string()
    } else {
        activities
            .iter()
            .map(ActivityRecord::prompt_line)
            .collect::<Vec<_>>()
            .join("\n")
    };

    let user_prompt = format!(
        "PIM Activation Reason: {reason}\n\n\
         Activities during elevation:\n{activities_text}\n\n\
         Does the activity align with the stated reason?"
    );

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::pim_audit::types::AlignmentLevel;
    use crate::testing::ScriptedModel;
    use crate::tools::azure_openai::ChatRole;
    use chrono::{TimeZone, Utc};

    fn storage_activity() -> ActivityRecord {
        ActivityRecord {
            occurred_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
            operation: "Create Storage Account".into(),
            resource_type: "Microsoft.Storage".into(),
            resource_name: "stacct01".into(),
            resource_group: "rg-data".into(),
            subscription_id: "sub-001".into(),
            status: "Succeeded".into(),
        }
    }

    #[tokio::test]
    async fn test_classify_parses_level_and_keeps_text() {
        let model = Arc::new(ScriptedModel::replying(["NOT ALIGNED: deleted a VM instead"]));
        let classifier = AlignmentClassifier::new(model.clone());

        let assessment = classifier
            .classify("add storage account", &[storage_activity()])
            .await
            .unwrap();

        assert_eq!(assessment.level, AlignmentLevel::NotAligned);
        assert_eq!(assessment.explanation, "NOT ALIGNED: deleted a VM instead");
        assert_eq!(model.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_request_shape() {
        let model = Arc::new(ScriptedModel::replying(["ALIGNED"]));
        AlignmentClassifier::new(model.clone())
            .classify("add storage account", &[storage_activity()])
            .await
            .unwrap();

        let (messages, options) = model.calls().remove(0);
        assert_eq!(options, CLASSIFIER_OPTIONS);
        assert_eq!(messages[0].role, ChatRole::System);
        assert!(messages[0].content.contains("PARTIALLY_ALIGNED"));
        assert!(messages[1].content.contains("PIM Activation Reason: add storage account"));
        assert!(messages[1]
            .content
            .contains("- 2024-01-15 10:30:00: Create Storage Account on Microsoft.Storage/stacct01"));
    }

    #[tokio::test]
    async fn test_empty_activities_marker() {
        let model = Arc::new(ScriptedModel::replying(["UNKNOWN"]));
        let assessment = AlignmentClassifier::new(model.clone())
            .classify("", &[])
            .await
            .unwrap();

        assert_eq!(assessment.level, AlignmentLevel::Unknown);
        let (messages, _) = model.calls().remove(0);
        assert!(messages[1].content.contains(NO_ACTIVITIES));
    }

    #[tokio::test]
    async fn test_model_error_is_not_retried() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(AuditError::Model("throttled".into())),
            Ok("ALIGNED".into()),
        ]));

        let err = AlignmentClassifier::new(model.clone())
            .classify("reason", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, AuditError::Model(_)));
        assert_eq!(model.calls().len(), 1);
    }
}
