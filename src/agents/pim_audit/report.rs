//! Markdown report rendering
//!
//! Output depends only on the inputs and the generation timestamp: sections
//! follow detection order and the per-level counts are always listed.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::types::{count_level, ActivationRecord, ActivityRecord, AlignmentLevel, Assessment, BatchRun};

const TITLE: &str = "# PIM Activity Audit Report";
const NO_ACTIVATIONS: &str = "No PIM activations found in the specified time period.";
const NO_ACTIVITIES: &str = "No activities found.";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render a full report stamped with the current time.
pub fn render(
    activations: &[ActivationRecord],
    activities_by_user: &HashMap<String, Vec<ActivityRecord>>,
    assessments_by_user: &HashMap<String, Assessment>,
) -> String {
    render_at(Utc::now(), activations, activities_by_user, assessments_by_user)
}

pub fn render_run(run: &BatchRun) -> String {
    render(
        &run.activations,
        &run.activities_by_user,
        &run.assessments_by_user,
    )
}

/// Render with an explicit generation timestamp.
pub fn render_at(
    generated_at: DateTime<Utc>,
    activations: &[ActivationRecord],
    activities_by_user: &HashMap<String, Vec<ActivityRecord>>,
    assessments_by_user: &HashMap<String, Assessment>,
) -> String {
    let header = header(generated_at);

    if activations.is_empty() {
        return format!("{}\n\n{}\n", header, NO_ACTIVATIONS);
    }

    let sections = [
        header,
        summary(activations.len(), assessments_by_user),
        activations_table(activations),
        detailed_analysis(activations, activities_by_user, assessments_by_user),
    ];

    let mut report = sections.join("\n\n");
    report.push('\n');
    report
}

fn header(generated_at: DateTime<Utc>) -> String {
    format!(
        "{}\n\n**Generated**: {} UTC",
        TITLE,
        generated_at.format(TIME_FORMAT)
    )
}

/// Counts come from stored assessments only; users without one are not counted.
fn summary(total: usize, assessments_by_user: &HashMap<String, Assessment>) -> String {
    let mut lines = vec![
        "## Executive Summary".to_string(),
        String::new(),
        format!("- Total PIM Activations: {}", total),
    ];

    for level in AlignmentLevel::ALL {
        lines.push(format!(
            "- {}: {} {}",
            level.label(),
            count_level(assessments_by_user, level),
            level.marker()
        ));
    }

    lines.join("\n")
}

fn activations_table(activations: &[ActivationRecord]) -> String {
    let mut lines = vec![
        "## PIM Activations".to_string(),
        String::new(),
        "| User | Role | Activation Time | Reason |".to_string(),
        "|------|------|-----------------|--------|".to_string(),
    ];

    for activation in activations {
        lines.push(format!(
            "| {} | {} | {} | {} |",
            table_cell(&activation.user_identity),
            table_cell(&activation.role_name),
            activation.activated_at.format(TIME_FORMAT),
            table_cell(&activation.reason)
        ));
    }

    lines.join("\n")
}

fn detailed_analysis(
    activations: &[ActivationRecord],
    activities_by_user: &HashMap<String, Vec<ActivityRecord>>,
    assessments_by_user: &HashMap<String, Assessment>,
) -> String {
    let mut sections = vec!["## Detailed Analysis".to_string()];

    for activation in activations {
        let activities = activities_by_user
            .get(&activation.user_identity)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let assessment = assessments_by_user.get(&activation.user_identity);
        sections.push(user_section(activation, activities, assessment));
    }

    sections.join("\n\n")
}

fn user_section(
    activation: &ActivationRecord,
    activities: &[ActivityRecord],
    assessment: Option<&Assessment>,
) -> String {
    let mut lines = vec![
        format!("### {}", activation.user_identity),
        String::new(),
        format!("**Role**: {}", activation.role_name),
        format!(
            "**Activation Time**: {} UTC",
            activation.activated_at.format(TIME_FORMAT)
        ),
        format!("**Reason**: {}", activation.reason),
        format!("**Scan Window**: {} hours", activation.window_hours),
        String::new(),
        "**Activities**:".to_string(),
        String::new(),
    ];

    if activities.is_empty() {
        lines.push(NO_ACTIVITIES.to_string());
    } else {
        for activity in activities {
            lines.push(format!(
                "- `{}` {} - {}",
                activity.occurred_at.format(TIME_FORMAT),
                activity.operation,
                activity.resource_name
            ));
        }
    }

    lines.push(String::new());

    match assessment {
        Some(assessment) => {
            lines.push(format!(
                "**Assessment**: {} {}",
                assessment.level,
                assessment.level.marker()
            ));
            lines.push(String::new());
            lines.push(format!("**Explanation**: {}", assessment.explanation));
        }
        None => lines.push("**Assessment**: Not available".to_string()),
    }

    lines.join("\n")
}

fn table_cell(value: &str) -> String {
    value
        .replace('|', "\\|")
        .replace(['\r', '\n'], " ")
}

/// Console listing of detected activations
pub fn format_activations_summary(activations: &[ActivationRecord], now: DateTime<Utc>) -> String {
    if activations.is_empty() {
        return "No PIM activations found.".to_string();
    }

    let mut lines = vec![format!("Found {} elevated user(s):", activations.len())];
    for (i, activation) in activations.iter().enumerate() {
        lines.push(format!(
            "{}. {} ({}) - Reason: \"{}\" (activated {})",
            i + 1,
            activation.user_identity,
            activation.role_name,
            activation.reason,
            time_ago(activation.activated_at, now)
        ));
    }
    lines.join("\n")
}

/// Console listing of one user's activities
pub fn format_activities(activities: &[ActivityRecord]) -> String {
    if activities.is_empty() {
        return NO_ACTIVITIES.to_string();
    }

    activities
        .iter()
        .map(|activity| {
            format!(
                "[{}] {} - {}",
                activity.occurred_at.format(TIME_FORMAT),
                activity.operation,
                activity.resource_name
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_assessment(assessment: &Assessment) -> String {
    format!(
        "{} {}\n\n{}",
        assessment.level,
        assessment.level.marker(),
        assessment.explanation
    )
}

/// "3 hours ago", or minutes when under an hour.
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now - then;
    let hours = elapsed.num_hours();
    if hours == 0 {
        let minutes = elapsed.num_minutes();
        return format!("{} minute{} ago", minutes, plural(minutes));
    }
    format!("{} hour{} ago", hours, plural(hours))
}

fn plural(n: i64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
