//! Query shapes accepted by rule readers and the store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{AlertRule, RuleTypeFilter};

/// Basic listing of an organization's rules. Empty vectors mean "no filter".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListAlertRulesQuery {
    pub org_id: i64,
    pub namespace_uids: Vec<String>,
    pub rule_groups: Vec<String>,
    pub rule_uids: Vec<String>,
    pub dashboard_uid: Option<String>,
    pub panel_id: Option<i64>,
    pub receiver_name: Option<String>,
    pub time_interval_name: Option<String>,
}

impl ListAlertRulesQuery {
    pub fn for_group(key: &crate::model::GroupKey) -> Self {
        Self {
            org_id: key.org_id,
            namespace_uids: vec![key.namespace_uid.clone()],
            rule_groups: vec![key.rule_group.clone()],
            ..Default::default()
        }
    }
}

/// Full listing query: everything the SQL layer and the in-memory filter
/// engine understand, plus pagination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListAlertRulesExtendedQuery {
    pub base: ListAlertRulesQuery,
    pub rule_type: RuleTypeFilter,
    /// Case-insensitive substring of the namespace UID.
    pub namespace: Option<String>,
    /// Case-insensitive substring of the rule group name.
    pub group_name: Option<String>,
    /// Case-insensitive substring of the rule title.
    pub rule_name: Option<String>,
    /// Textual label matchers, e.g. `severity=critical`, `env=~prod.*`.
    pub labels: Vec<String>,
    pub contact_point_name: Option<String>,
    pub hide_plugin_rules: bool,
    /// `Some(true)` keeps only rules imported from Prometheus, `Some(false)` drops them.
    pub has_prometheus_rule_definition: Option<bool>,
    pub datasource_uids: Vec<String>,
    pub continue_token: Option<String>,
    /// Page size; `0` disables pagination.
    pub limit: i64,
}

impl From<ListAlertRulesQuery> for ListAlertRulesExtendedQuery {
    fn from(base: ListAlertRulesQuery) -> Self {
        Self {
            base,
            ..Default::default()
        }
    }
}

/// Listing paged by whole rule groups instead of single rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListAlertRulesByGroupQuery {
    pub base: ListAlertRulesQuery,
    pub rule_type: RuleTypeFilter,
    pub has_prometheus_rule_definition: Option<bool>,
    /// Groups per page; `0` returns every group.
    pub group_limit: i64,
    /// Token returned by the previous page. An unreadable token restarts
    /// from the first group.
    pub group_continue_token: Option<String>,
}

impl ListAlertRulesByGroupQuery {
    /// The per-rule criteria, for the in-memory filter engine.
    pub fn rule_criteria(&self) -> ListAlertRulesExtendedQuery {
        ListAlertRulesExtendedQuery {
            base: self.base.clone(),
            rule_type: self.rule_type,
            has_prometheus_rule_definition: self.has_prometheus_rule_definition,
            ..Default::default()
        }
    }
}

/// Fetch every rule sharing a group with the rule `uid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAlertRulesGroupByRuleUidQuery {
    pub org_id: i64,
    pub uid: String,
}

/// Snapshot consumed by the evaluation scheduler.
#[derive(Debug, Clone, Default)]
pub struct GetAlertRulesForSchedulingQuery {
    pub populate_folders: bool,
    pub rule_groups: Vec<String>,

    pub result_rules: Vec<AlertRule>,
    /// `(org_id, namespace_uid)` → full folder path.
    pub result_folder_titles: HashMap<(i64, String), String>,
}

/// One rule group as listed by `get_org_rule_groups`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleGroupSummary {
    pub key: crate::model::GroupKey,
    pub interval_seconds: i64,
    pub rule_count: usize,
}
