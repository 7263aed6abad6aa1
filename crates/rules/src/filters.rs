//! In-memory rule filtering.
//!
//! Applies every criterion of a [`ListAlertRulesExtendedQuery`] to a
//! materialized rule list. The store runs this after the SQL pass to remove
//! false positives from predicates that cannot be expressed exactly in SQL
//! (pattern-matched labels, receivers inside JSON, case-insensitive collation).

use std::collections::HashSet;

use tracing::warn;

use alertstore_core::{AlertRule, ListAlertRulesExtendedQuery, RuleTypeFilter};

use crate::matcher::{parse_matchers, LabelMatcher};

/// A query compiled once for evaluation over many rules.
pub struct RuleFilter<'q> {
    query: &'q ListAlertRulesExtendedQuery,
    matchers: Vec<LabelMatcher>,
    namespace: Option<String>,
    group_name: Option<String>,
    rule_name: Option<String>,
    datasource_uids: HashSet<&'q str>,
}

impl<'q> RuleFilter<'q> {
    pub fn new(query: &'q ListAlertRulesExtendedQuery) -> Self {
        let (matchers, failed) = parse_matchers(&query.labels);
        for err in failed {
            warn!(error = %err, "skipping invalid label matcher");
        }
        Self {
            query,
            matchers,
            namespace: lowered(&query.namespace),
            group_name: lowered(&query.group_name),
            rule_name: lowered(&query.rule_name),
            datasource_uids: query.datasource_uids.iter().map(String::as_str).collect(),
        }
    }

    pub fn matches(&self, rule: &AlertRule) -> bool {
        let q = self.query;
        let base = &q.base;

        if !q.rule_type.matches(rule) {
            return false;
        }
        if !base.namespace_uids.is_empty() && !base.namespace_uids.contains(&rule.namespace_uid) {
            return false;
        }
        // exact and case-sensitive even when the database collation is not
        if !base.rule_groups.is_empty() && !base.rule_groups.contains(&rule.rule_group) {
            return false;
        }
        if !base.rule_uids.is_empty() && !base.rule_uids.contains(&rule.uid) {
            return false;
        }
        if !contains_lowered(&rule.namespace_uid, &self.namespace)
            || !contains_lowered(&rule.rule_group, &self.group_name)
            || !contains_lowered(&rule.title, &self.rule_name)
        {
            return false;
        }
        if !self.matchers.iter().all(|m| m.matches(&rule.labels)) {
            return false;
        }
        if let Some(dashboard_uid) = non_empty(&base.dashboard_uid) {
            if rule.linked_dashboard_uid() != Some(dashboard_uid) {
                return false;
            }
            if let Some(panel_id) = base.panel_id.filter(|p| *p != 0) {
                if rule.linked_panel_id() != Some(panel_id) {
                    return false;
                }
            }
        }
        for receiver in [non_empty(&base.receiver_name), non_empty(&q.contact_point_name)]
            .into_iter()
            .flatten()
        {
            if !rule.notification_settings.iter().any(|ns| ns.receiver == receiver) {
                return false;
            }
        }
        if let Some(interval) = non_empty(&base.time_interval_name) {
            let uses_interval = rule.notification_settings.iter().any(|ns| {
                ns.mute_time_intervals.iter().any(|t| t == interval)
                    || ns.active_time_intervals.iter().any(|t| t == interval)
            });
            if !uses_interval {
                return false;
            }
        }
        if q.hide_plugin_rules && rule.is_plugin_rule() {
            return false;
        }
        if let Some(wanted) = q.has_prometheus_rule_definition {
            if rule.has_prometheus_rule_definition() != wanted {
                return false;
            }
        }
        if !self.datasource_uids.is_empty()
            && !rule.datasource_uids().any(|uid| self.datasource_uids.contains(uid))
        {
            return false;
        }
        true
    }
}

/// Whether any criterion of `query` would exclude a rule.
pub fn has_any_filters(query: &ListAlertRulesExtendedQuery) -> bool {
    let base = &query.base;
    query.rule_type != RuleTypeFilter::All
        || !base.namespace_uids.is_empty()
        || !base.rule_groups.is_empty()
        || !base.rule_uids.is_empty()
        || non_empty(&query.namespace).is_some()
        || non_empty(&query.group_name).is_some()
        || non_empty(&query.rule_name).is_some()
        || !query.labels.is_empty()
        || non_empty(&base.dashboard_uid).is_some()
        || non_empty(&base.receiver_name).is_some()
        || non_empty(&query.contact_point_name).is_some()
        || non_empty(&base.time_interval_name).is_some()
        || query.hide_plugin_rules
        || query.has_prometheus_rule_definition.is_some()
        || !query.datasource_uids.is_empty()
}

/// Keep the rules matching every active criterion of `query`.
///
/// Without active criteria the input is returned untouched.
pub fn apply_in_memory_filters(
    rules: Vec<AlertRule>,
    query: &ListAlertRulesExtendedQuery,
) -> Vec<AlertRule> {
    if !has_any_filters(query) {
        return rules;
    }
    let filter = RuleFilter::new(query);
    rules.into_iter().filter(|r| filter.matches(r)).collect()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn lowered(value: &Option<String>) -> Option<String> {
    non_empty(value).map(str::to_lowercase)
}

fn contains_lowered(haystack: &str, needle: &Option<String>) -> bool {
    match needle {
        Some(n) => haystack.to_lowercase().contains(n.as_str()),
        None => true,
    }
}

// ── Tests ───────────────────────────────────────────────────────────
