//! KQL templates sent to the Log Analytics workspace.
//!
//! Column names projected here are the contract the detector and correlator
//! read back, so they live next to the query text.

use chrono::{DateTime, SecondsFormat, Utc};

pub mod columns {
    pub const TIME_GENERATED: &str = "TimeGenerated";
    pub const USER_EMAIL: &str = "UserEmail";
    pub const ROLE_NAME: &str = "RoleName";
    pub const REASON: &str = "Reason";
    pub const OPERATION_NAME: &str = "OperationName";
    pub const RESOURCE_TYPE: &str = "ResourceType";
    pub const RESOURCE: &str = "Resource";
    pub const RESOURCE_GROUP: &str = "ResourceGroup";
    pub const SUBSCRIPTION_ID: &str = "SubscriptionId";
    pub const STATUS: &str = "Status";
}

/// Operation name Entra ID writes when a PIM role activation completes
pub const PIM_ACTIVATION_OPERATION: &str = "Add member to role completed (PIM activation)";

/// Activations in the trailing window, most recent first.
pub fn activations_query(window_hours: u32) -> String {
    format!(
        r#"AuditLogs
| where TimeGenerated > ago({window_hours}h)
| where OperationName == "{operation}"
| extend ReasonValue = tostring(parse_json(tostring(AdditionalDetails[3])).value)
| project
    TimeGenerated,
    UserEmail = tostring(InitiatedBy.user.userPrincipalName),
    RoleName = tostring(TargetResources[0].displayName),
    Reason = iff(isempty(ResultDescription), ReasonValue, ResultDescription)
| order by TimeGenerated desc"#,
        operation = PIM_ACTIVATION_OPERATION,
    )
}

/// Successful operations by one caller in `[start, end]`, oldest first.
pub fn activities_query(user_identity: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!(
        r#"AzureActivity
| where TimeGenerated between (datetime("{start}") .. datetime("{end}"))
| where Caller =~ "{caller}"
| where ActivityStatusValue in~ ("Success", "Succeeded")
| project
    TimeGenerated,
    OperationName = OperationNameValue,
    ResourceType = ResourceProviderValue,
    Resource = tostring(split(_ResourceId, "/")[-1]),
    ResourceGroup,
    SubscriptionId,
    Status = ActivityStatusValue
| order by TimeGenerated asc"#,
        start = start.to_rfc3339_opts(SecondsFormat::Secs, true),
        end = end.to_rfc3339_opts(SecondsFormat::Secs, true),
        caller = escape_string_literal(user_identity),
    )
}

/// Escape a value for use inside a double-quoted KQL string literal.
pub fn escape_string_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_activations_query_window() {
        let query = activations_query(48);
        assert!(query.starts_with("AuditLogs"));
        assert!(query.contains("ago(48h)"));
        assert!(query.contains(PIM_ACTIVATION_OPERATION));
        assert!(query.contains("order by TimeGenerated desc"));
    }

    #[test]
    fn test_activities_query_bounds_and_caller() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap();
        let query = activities_query("admin@contoso.com", start, end);

        assert!(query.contains(r#"datetime("2024-01-15T10:00:00Z")"#));
        assert!(query.contains(r#"datetime("2024-01-15T12:30:00Z")"#));
        assert!(query.contains(r#"Caller =~ "admin@contoso.com""#));
        assert!(query.contains("order by TimeGenerated asc"));
    }

    #[test]
    fn test_caller_is_escaped() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let query = activities_query(r#"x" or 1==1 //"#, start, start);
        assert!(query.contains(r#"Caller =~ "x\" or 1==1 //""#));
    }

    #[test]
    fn test_escape_backslash() {
        assert_eq!(escape_string_literal(r"CONTOSO\admin"), r"CONTOSO\\admin");
    }
}
