use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of an alert rule title.
pub const ALERT_RULE_MAX_TITLE_LENGTH: usize = 190;

/// Maximum length of an alert rule group name.
pub const ALERT_RULE_MAX_RULE_GROUP_NAME_LENGTH: usize = 190;

/// Annotation holding the dashboard a rule is linked to.
pub const DASHBOARD_UID_ANNOTATION: &str = "__dashboardUid__";

/// Annotation holding the panel a rule is linked to.
pub const PANEL_ID_ANNOTATION: &str = "__panelId__";

/// Reserved label marking rules provisioned by a plugin.
pub const PLUGIN_ORIGIN_LABEL: &str = "__grafana_origin";

/// UIDs of the server-side expression engine pseudo-datasource.
pub const EXPR_DATASOURCE_UID: &str = "__expr__";
pub const OLD_EXPR_DATASOURCE_UID: &str = "-100";

/// Ordered string map used for labels and annotations. Ordering keeps the
/// serialized JSON column stable, which the pattern-based SQL predicates rely on.
pub type Labels = BTreeMap<String, String>;

// ── Keys ──────────────────────────────────────────────────────

/// Identifies a rule across the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertRuleKey {
    pub org_id: i64,
    pub uid: String,
}

impl fmt::Display for AlertRuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "org_id={}, uid={}", self.org_id, self.uid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRuleKeyWithVersion {
    pub key: AlertRuleKey,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRuleKeyWithId {
    pub key: AlertRuleKey,
    pub id: i64,
}

/// The addressable unit of reconciliation: one rule group in one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub org_id: i64,
    pub namespace_uid: String,
    pub rule_group: String,
}

impl GroupKey {
    pub fn new(org_id: i64, namespace_uid: impl Into<String>, rule_group: impl Into<String>) -> Self {
        Self {
            org_id,
            namespace_uid: namespace_uid.into(),
            rule_group: rule_group.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "org_id={}, namespace_uid={}, rule_group={}",
            self.org_id, self.namespace_uid, self.rule_group
        )
    }
}

// ── Execution states ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NoDataState {
    Alerting,
    #[default]
    NoData,
    #[serde(rename = "OK")]
    Ok,
    KeepLast,
}

impl NoDataState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alerting => "Alerting",
            Self::NoData => "NoData",
            Self::Ok => "OK",
            Self::KeepLast => "KeepLast",
        }
    }
}

impl FromStr for NoDataState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Alerting" => Ok(Self::Alerting),
            "NoData" => Ok(Self::NoData),
            "OK" => Ok(Self::Ok),
            "KeepLast" => Ok(Self::KeepLast),
            other => Err(format!("unknown no-data state '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExecErrState {
    Alerting,
    #[default]
    Error,
    #[serde(rename = "OK")]
    Ok,
    KeepLast,
}

impl ExecErrState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alerting => "Alerting",
            Self::Error => "Error",
            Self::Ok => "OK",
            Self::KeepLast => "KeepLast",
        }
    }
}

impl FromStr for ExecErrState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Alerting" => Ok(Self::Alerting),
            "Error" => Ok(Self::Error),
            "OK" => Ok(Self::Ok),
            "KeepLast" => Ok(Self::KeepLast),
            other => Err(format!("unknown execution error state '{other}'")),
        }
    }
}

// ── Rule payload ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelativeTimeRange {
    /// Seconds before evaluation time.
    pub from: i64,
    pub to: i64,
}

/// One query (or server-side expression) feeding a rule's condition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlertQuery {
    pub ref_id: String,
    #[serde(default)]
    pub query_type: String,
    #[serde(default)]
    pub relative_time_range: RelativeTimeRange,
    pub datasource_uid: String,
    #[serde(default)]
    pub model: serde_json::Value,
}

impl AlertQuery {
    pub fn is_expression(&self) -> bool {
        self.datasource_uid == EXPR_DATASOURCE_UID || self.datasource_uid == OLD_EXPR_DATASOURCE_UID
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub receiver: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_wait_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_interval_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mute_time_intervals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_time_intervals: Vec<String>,
}

impl NotificationSettings {
    pub fn for_receiver(receiver: impl Into<String>) -> Self {
        Self {
            receiver: receiver.into(),
            ..Default::default()
        }
    }
}

/// Recording-rule definition. A rule carrying one is a recording rule.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Record {
    pub metric: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_datasource_uid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EditorSettings {
    #[serde(default)]
    pub simplified_query_and_expressions_section: bool,
    #[serde(default)]
    pub simplified_notifications_section: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlertRuleMetadata {
    #[serde(default)]
    pub editor_settings: EditorSettings,
    /// Original Prometheus rule definition for imported rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus_rule_definition: Option<String>,
}

// ── AlertRule ─────────────────────────────────────────────────

/// The canonical alert (or recording) rule entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: i64,
    pub org_id: i64,
    pub uid: String,
    /// Identity assigned once on insert; version history is addressed by it.
    pub guid: String,
    pub title: String,
    pub condition: String,
    pub data: Vec<AlertQuery>,
    pub updated: DateTime<Utc>,
    pub interval_seconds: i64,
    pub version: i64,
    pub namespace_uid: String,
    pub dashboard_uid: Option<String>,
    pub panel_id: Option<i64>,
    pub rule_group: String,
    pub rule_group_index: i32,
    pub record: Option<Record>,
    pub no_data_state: NoDataState,
    pub exec_err_state: ExecErrState,
    pub for_seconds: i64,
    pub keep_firing_for_seconds: i64,
    pub annotations: Labels,
    pub labels: Labels,
    pub is_paused: bool,
    pub notification_settings: Vec<NotificationSettings>,
    pub metadata: AlertRuleMetadata,
    pub missing_series_evals_to_resolve: Option<i64>,
}

impl AlertRule {
    pub fn key(&self) -> AlertRuleKey {
        AlertRuleKey {
            org_id: self.org_id,
            uid: self.uid.clone(),
        }
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            org_id: self.org_id,
            namespace_uid: self.namespace_uid.clone(),
            rule_group: self.rule_group.clone(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.record.is_some()
    }

    pub fn has_prometheus_rule_definition(&self) -> bool {
        self.metadata
            .prometheus_rule_definition
            .as_deref()
            .is_some_and(|d| !d.is_empty())
    }

    pub fn is_plugin_rule(&self) -> bool {
        self.labels.contains_key(PLUGIN_ORIGIN_LABEL)
    }

    /// Datasource UIDs queried by this rule, excluding server-side expressions.
    pub fn datasource_uids(&self) -> impl Iterator<Item = &str> {
        self.data
            .iter()
            .filter(|q| !q.is_expression())
            .map(|q| q.datasource_uid.as_str())
    }

    /// Dashboard linked either through the column or the reserved annotation.
    pub fn linked_dashboard_uid(&self) -> Option<&str> {
        self.dashboard_uid
            .as_deref()
            .or_else(|| self.annotations.get(DASHBOARD_UID_ANNOTATION).map(String::as_str))
            .filter(|uid| !uid.is_empty())
    }

    pub fn linked_panel_id(&self) -> Option<i64> {
        self.panel_id.or_else(|| {
            self.annotations
                .get(PANEL_ID_ANNOTATION)
                .and_then(|p| p.parse().ok())
        })
    }
}

/// Sort a group's rules by stored index, ties broken by ID.
pub fn sort_by_group_index(rules: &mut [AlertRule]) {
    rules.sort_by(|a, b| {
        a.rule_group_index
            .cmp(&b.rule_group_index)
            .then(a.id.cmp(&b.id))
    });
}

/// Which rules a read should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleTypeFilter {
    #[default]
    All,
    Alerting,
    Recording,
}

impl RuleTypeFilter {
    pub fn matches(&self, rule: &AlertRule) -> bool {
        match self {
            Self::All => true,
            Self::Alerting => !rule.is_recording(),
            Self::Recording => rule.is_recording(),
        }
    }
}

impl FromStr for RuleTypeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "alerting" => Ok(Self::Alerting),
            "recording" => Ok(Self::Recording),
            other => Err(format!("unknown rule type filter '{other}'")),
        }
    }
}

// ── Versions ──────────────────────────────────────────────────

/// Immutable snapshot of a rule, written on every insert and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleVersion {
    pub id: i64,
    pub parent_version: i64,
    pub restored_from: i64,
    pub created: DateTime<Utc>,
    /// Full rule payload; `rule.version` is this snapshot's version.
    pub rule: AlertRule,
}

impl AlertRuleVersion {
    pub fn snapshot(rule: &AlertRule, parent_version: i64, created: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            parent_version,
            restored_from: 0,
            created,
            rule: rule.clone(),
        }
    }

    pub fn version(&self) -> i64 {
        self.rule.version
    }

    /// True when both snapshots describe the same rule definition.
    pub fn equal_spec(&self, other: &AlertRuleVersion) -> bool {
        self.rule
            .diff(&other.rule, &crate::diff::ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF)
            .is_empty()
    }
}

// ── Submissions ───────────────────────────────────────────────

/// A rule as submitted for reconciliation. Fields left empty (or `None`)
/// are taken from the existing rule when the submission is paired with one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubmittedRule {
    pub uid: Option<String>,
    pub title: String,
    pub condition: String,
    pub data: Vec<AlertQuery>,
    pub interval_seconds: i64,
    pub no_data_state: Option<NoDataState>,
    pub exec_err_state: Option<ExecErrState>,
    pub for_seconds: Option<i64>,
    pub keep_firing_for_seconds: Option<i64>,
    pub annotations: Labels,
    pub labels: Labels,
    pub is_paused: Option<bool>,
    pub notification_settings: Vec<NotificationSettings>,
    pub record: Option<Record>,
    pub dashboard_uid: Option<String>,
    pub panel_id: Option<i64>,
    pub metadata: Option<AlertRuleMetadata>,
    pub missing_series_evals_to_resolve: Option<i64>,
}

impl SubmittedRule {
    /// Submission that restates `rule` in full.
    pub fn from_rule(rule: &AlertRule) -> Self {
        Self {
            uid: Some(rule.uid.clone()).filter(|u| !u.is_empty()),
            title: rule.title.clone(),
            condition: rule.condition.clone(),
            data: rule.data.clone(),
            interval_seconds: rule.interval_seconds,
            no_data_state: Some(rule.no_data_state),
            exec_err_state: Some(rule.exec_err_state),
            for_seconds: Some(rule.for_seconds),
            keep_firing_for_seconds: Some(rule.keep_firing_for_seconds),
            annotations: rule.annotations.clone(),
            labels: rule.labels.clone(),
            is_paused: Some(rule.is_paused),
            notification_settings: rule.notification_settings.clone(),
            record: rule.record.clone(),
            dashboard_uid: rule.dashboard_uid.clone(),
            panel_id: rule.panel_id,
            metadata: Some(rule.metadata.clone()),
            missing_series_evals_to_resolve: rule.missing_series_evals_to_resolve,
        }
    }

    /// Materialize as a new rule placed at `index` in `group`.
    pub fn into_rule(self, group: &GroupKey, index: i32) -> AlertRule {
        AlertRule {
            id: 0,
            org_id: group.org_id,
            uid: self.uid.unwrap_or_default(),
            guid: String::new(),
            title: self.title,
            condition: self.condition,
            data: self.data,
            updated: DateTime::<Utc>::default(),
            interval_seconds: self.interval_seconds,
            version: 0,
            namespace_uid: group.namespace_uid.clone(),
            dashboard_uid: self.dashboard_uid,
            panel_id: self.panel_id,
            rule_group: group.rule_group.clone(),
            rule_group_index: index,
            record: self.record,
            no_data_state: self.no_data_state.unwrap_or_default(),
            exec_err_state: self.exec_err_state.unwrap_or_default(),
            for_seconds: self.for_seconds.unwrap_or_default(),
            keep_firing_for_seconds: self.keep_firing_for_seconds.unwrap_or_default(),
            annotations: self.annotations,
            labels: self.labels,
            is_paused: self.is_paused.unwrap_or_default(),
            notification_settings: self.notification_settings,
            metadata: self.metadata.unwrap_or_default(),
            missing_series_evals_to_resolve: self.missing_series_evals_to_resolve,
        }
    }

    /// Materialize as the replacement for `existing`, merging omitted fields.
    ///
    /// Labels, annotations, notification settings and the dashboard link are
    /// replaced as submitted so they can be cleared.
    pub fn patch(self, existing: &AlertRule, group: &GroupKey, index: i32) -> AlertRule {
        let mut rule = AlertRule {
            id: existing.id,
            guid: existing.guid.clone(),
            version: existing.version,
            updated: existing.updated,
            ..self.clone().into_rule(group, index)
        };
        rule.uid = existing.uid.clone();

        if self.title.is_empty() {
            rule.title = existing.title.clone();
        }
        if self.condition.is_empty() || self.data.is_empty() {
            rule.condition = existing.condition.clone();
            rule.data = existing.data.clone();
        }
        if self.interval_seconds == 0 {
            rule.interval_seconds = existing.interval_seconds;
        }
        rule.no_data_state = self.no_data_state.unwrap_or(existing.no_data_state);
        rule.exec_err_state = self.exec_err_state.unwrap_or(existing.exec_err_state);
        rule.for_seconds = self.for_seconds.unwrap_or(existing.for_seconds);
        rule.keep_firing_for_seconds = self
            .keep_firing_for_seconds
            .unwrap_or(existing.keep_firing_for_seconds);
        rule.is_paused = self.is_paused.unwrap_or(existing.is_paused);
        rule.metadata = self.metadata.unwrap_or_else(|| existing.metadata.clone());
        rule.missing_series_evals_to_resolve = self
            .missing_series_evals_to_resolve
            .or(existing.missing_series_evals_to_resolve);
        rule
    }
}
