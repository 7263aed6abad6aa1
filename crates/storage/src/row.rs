//! Database row shapes for `alert_rule` and `alert_rule_version`.
//!
//! Structured payload (queries, labels, annotations, notification settings,
//! metadata, record) is stored as JSON text. Conversion to and from the
//! domain model happens here and nowhere else.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use alertstore_core::{AlertRule, AlertRuleVersion, Result, RuleStoreError};

use crate::json_cache::JsonDecodeCache;

/// Column list shared by every `alert_rule` read, in [`AlertRuleRow`] order.
pub const RULE_COLUMNS: &[&str] = &[
    "id",
    "guid",
    "org_id",
    "uid",
    "title",
    "condition",
    "data",
    "updated",
    "interval_seconds",
    "version",
    "namespace_uid",
    "rule_group",
    "rule_group_idx",
    "dashboard_uid",
    "panel_id",
    "no_data_state",
    "exec_err_state",
    "for_seconds",
    "keep_firing_for_seconds",
    "annotations",
    "labels",
    "is_paused",
    "record",
    "notification_settings",
    "metadata",
    "missing_series_evals_to_resolve",
];

/// `alert_rule` columns prefixed with a table alias, e.g. `a.id, a.guid, ...`.
pub fn rule_columns(alias: &str) -> String {
    RULE_COLUMNS
        .iter()
        .map(|c| {
            if alias.is_empty() {
                (*c).to_string()
            } else {
                format!("{alias}.{c}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Select list for `alert_rule_version`, aliased onto [`AlertRuleVersionRow`].
pub const VERSION_SELECT: &str = "id AS version_id, parent_version, restored_from, created, \
     rule_id AS id, rule_guid AS guid, rule_org_id AS org_id, rule_uid AS uid, title, condition, data, \
     created AS updated, interval_seconds, version, rule_namespace_uid AS namespace_uid, rule_group, \
     rule_group_idx, dashboard_uid, panel_id, no_data_state, exec_err_state, for_seconds, \
     keep_firing_for_seconds, annotations, labels, is_paused, record, notification_settings, \
     metadata, missing_series_evals_to_resolve";

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AlertRuleRow {
    pub id: i64,
    pub guid: String,
    pub org_id: i64,
    pub uid: String,
    pub title: String,
    pub condition: String,
    pub data: String,
    pub updated: DateTime<Utc>,
    pub interval_seconds: i64,
    pub version: i64,
    pub namespace_uid: String,
    pub rule_group: String,
    pub rule_group_idx: i32,
    pub dashboard_uid: Option<String>,
    pub panel_id: Option<i64>,
    pub no_data_state: String,
    pub exec_err_state: String,
    pub for_seconds: i64,
    pub keep_firing_for_seconds: i64,
    pub annotations: String,
    pub labels: String,
    pub is_paused: bool,
    pub record: Option<String>,
    pub notification_settings: String,
    pub metadata: String,
    pub missing_series_evals_to_resolve: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AlertRuleVersionRow {
    pub version_id: i64,
    pub parent_version: i64,
    pub restored_from: i64,
    pub created: DateTime<Utc>,
    #[sqlx(flatten)]
    pub rule: AlertRuleRow,
}

impl AlertRuleRow {
    pub fn from_rule(rule: &AlertRule) -> Result<Self> {
        Ok(Self {
            id: rule.id,
            guid: rule.guid.clone(),
            org_id: rule.org_id,
            uid: rule.uid.clone(),
            title: rule.title.clone(),
            condition: rule.condition.clone(),
            data: serde_json::to_string(&rule.data)?,
            updated: rule.updated,
            interval_seconds: rule.interval_seconds,
            version: rule.version,
            namespace_uid: rule.namespace_uid.clone(),
            rule_group: rule.rule_group.clone(),
            rule_group_idx: rule.rule_group_index,
            dashboard_uid: rule.dashboard_uid.clone().filter(|d| !d.is_empty()),
            panel_id: rule.panel_id,
            no_data_state: rule.no_data_state.as_str().to_string(),
            exec_err_state: rule.exec_err_state.as_str().to_string(),
            for_seconds: rule.for_seconds,
            keep_firing_for_seconds: rule.keep_firing_for_seconds,
            annotations: encode_map(&rule.annotations)?,
            labels: encode_map(&rule.labels)?,
            is_paused: rule.is_paused,
            record: rule.record.as_ref().map(serde_json::to_string).transpose()?,
            notification_settings: encode_list(&rule.notification_settings)?,
            metadata: serde_json::to_string(&rule.metadata)?,
            missing_series_evals_to_resolve: rule.missing_series_evals_to_resolve,
        })
    }

    pub fn into_rule(self, json: &JsonDecodeCache) -> Result<AlertRule> {
        let no_data_state = parse_state(&self.no_data_state)?;
        let exec_err_state = parse_state(&self.exec_err_state)?;
        Ok(AlertRule {
            id: self.id,
            org_id: self.org_id,
            guid: self.guid,
            title: self.title,
            condition: self.condition,
            data: decode(&self.data)?,
            updated: self.updated,
            interval_seconds: self.interval_seconds,
            version: self.version,
            namespace_uid: self.namespace_uid,
            dashboard_uid: self.dashboard_uid.filter(|d| !d.is_empty()),
            panel_id: self.panel_id,
            rule_group: self.rule_group,
            rule_group_index: self.rule_group_idx,
            record: match self.record.as_deref() {
                None | Some("") => None,
                Some(raw) => Some(serde_json::from_str(raw)?),
            },
            no_data_state,
            exec_err_state,
            for_seconds: self.for_seconds,
            keep_firing_for_seconds: self.keep_firing_for_seconds,
            annotations: json.labels(&self.annotations)?,
            labels: json.labels(&self.labels)?,
            is_paused: self.is_paused,
            notification_settings: decode(&self.notification_settings)?,
            metadata: decode(&self.metadata)?,
            missing_series_evals_to_resolve: self.missing_series_evals_to_resolve,
            uid: self.uid,
        })
    }

    /// Whether the stored record column marks a recording rule.
    pub fn is_recording(&self) -> bool {
        self.record.as_deref().is_some_and(|r| !r.is_empty())
    }
}

impl AlertRuleVersionRow {
    pub fn from_version(version: &AlertRuleVersion) -> Result<Self> {
        Ok(Self {
            version_id: version.id,
            parent_version: version.parent_version,
            restored_from: version.restored_from,
            created: version.created,
            rule: AlertRuleRow::from_rule(&version.rule)?,
        })
    }

    pub fn into_version(self, json: &JsonDecodeCache) -> Result<AlertRuleVersion> {
        Ok(AlertRuleVersion {
            id: self.version_id,
            parent_version: self.parent_version,
            restored_from: self.restored_from,
            created: self.created,
            rule: self.rule.into_rule(json)?,
        })
    }
}

fn encode_map(map: &alertstore_core::Labels) -> Result<String> {
    if map.is_empty() {
        return Ok(String::new());
    }
    Ok(serde_json::to_string(map)?)
}

fn encode_list<T: Serialize>(items: &[T]) -> Result<String> {
    if items.is_empty() {
        return Ok(String::new());
    }
    Ok(serde_json::to_string(items)?)
}

/// Decode a JSON column; empty text yields the type's default.
fn decode<T: DeserializeOwned + Default>(raw: &str) -> Result<T> {
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(raw)?)
}

fn parse_state<T: std::str::FromStr<Err = String> + Default>(raw: &str) -> Result<T> {
    if raw.is_empty() {
        return Ok(T::default());
    }
    raw.parse()
        .map_err(|e: String| RuleStoreError::Database(e.into()))
}
