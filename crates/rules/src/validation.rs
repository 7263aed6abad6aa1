//! Structural validation applied by the writer before any row is touched.

use serde::{Deserialize, Serialize};

use alertstore_core::{
    AlertRule, RuleStoreError, ALERT_RULE_MAX_RULE_GROUP_NAME_LENGTH, ALERT_RULE_MAX_TITLE_LENGTH,
};

/// Overall validation outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

/// A blocking validation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Field name, e.g. `"interval_seconds"`.
    pub path: String,
    pub message: String,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            path: path.to_string(),
            message: message.into(),
        });
    }

    /// Collapse into the store error taxonomy, naming the offending rule.
    pub fn into_result(self, rule: &AlertRule) -> Result<(), RuleStoreError> {
        if self.is_valid() {
            return Ok(());
        }
        let details: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect();
        Err(RuleStoreError::Validation(format!(
            "rule '{}' ({}): {}",
            rule.title,
            rule.uid,
            details.join("; ")
        )))
    }
}

/// Check the invariants every stored rule must satisfy.
pub fn validate_alert_rule(rule: &AlertRule, base_interval_secs: i64) -> ValidationResult {
    let mut result = ValidationResult::default();

    if rule.data.is_empty() {
        result.error("data", "at least one query or expression is required");
    }
    if rule.condition.is_empty() {
        result.error("condition", "condition is required");
    }

    let title_len = rule.title.chars().count();
    if title_len == 0 {
        result.error("title", "title is required");
    } else if title_len > ALERT_RULE_MAX_TITLE_LENGTH {
        result.error(
            "title",
            format!("title is longer than {ALERT_RULE_MAX_TITLE_LENGTH} characters"),
        );
    }

    if rule.rule_group.chars().count() > ALERT_RULE_MAX_RULE_GROUP_NAME_LENGTH {
        result.error(
            "rule_group",
            format!("rule group name is longer than {ALERT_RULE_MAX_RULE_GROUP_NAME_LENGTH} characters"),
        );
    }

    if rule.interval_seconds <= 0 {
        result.error("interval_seconds", "interval must be positive");
    } else if base_interval_secs > 0 && rule.interval_seconds % base_interval_secs != 0 {
        result.error(
            "interval_seconds",
            format!(
                "interval ({}s) must be a multiple of the base interval ({}s)",
                rule.interval_seconds, base_interval_secs
            ),
        );
    }

    if rule.org_id <= 0 {
        result.error("org_id", "organization is required");
    }

    if rule.panel_id.is_some() && rule.dashboard_uid.as_deref().unwrap_or("").is_empty() {
        result.error("dashboard_uid", "a panel reference requires a dashboard reference");
    }

    result
}

// ── Tests ───────────────────────────────────────────────────────────
