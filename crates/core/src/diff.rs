//! Field-level comparison of two [`AlertRule`]s.
//!
//! A [`DiffReport`] lists every changed path with the left (existing) and
//! right (new) values rendered as JSON. Map fields are compared per key
//! (`labels[severity]`), query lists per position (`data[0]`).

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::model::{AlertRule, Labels};

/// Fields excluded when deciding whether a rule changed.
pub const ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF: [&str; 3] = ["id", "version", "updated"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diff {
    pub path: String,
    pub left: Value,
    pub right: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DiffReport(Vec<Diff>);

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diff> {
        self.0.iter()
    }

    /// Top-level field names touched by this report (`labels[x]` → `labels`).
    pub fn changed_fields(&self) -> BTreeSet<&str> {
        self.0
            .iter()
            .map(|d| d.path.split('[').next().unwrap_or(d.path.as_str()))
            .collect()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.0.iter().map(|d| d.path.as_str()).collect()
    }
}

impl fmt::Display for DiffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {} -> {}", d.path, d.left, d.right)?;
        }
        Ok(())
    }
}

struct DiffBuilder<'a> {
    ignore: &'a [&'a str],
    diffs: Vec<Diff>,
}

impl DiffBuilder<'_> {
    fn field<T: Serialize + PartialEq + ?Sized>(&mut self, name: &str, left: &T, right: &T) {
        if self.ignore.contains(&name) || left == right {
            return;
        }
        self.push(name.to_string(), left, right);
    }

    fn map(&mut self, name: &str, left: &Labels, right: &Labels) {
        if self.ignore.contains(&name) || left == right {
            return;
        }
        let keys: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
        for key in keys {
            let (l, r) = (left.get(key), right.get(key));
            if l != r {
                self.push(format!("{name}[{key}]"), &l, &r);
            }
        }
    }

    fn list<T: Serialize + PartialEq>(&mut self, name: &str, left: &[T], right: &[T]) {
        if self.ignore.contains(&name) || left == right {
            return;
        }
        if left.len() != right.len() {
            self.push(name.to_string(), left, right);
            return;
        }
        for (i, (l, r)) in left.iter().zip(right).enumerate() {
            if l != r {
                self.push(format!("{name}[{i}]"), l, r);
            }
        }
    }

    fn push<T: Serialize + ?Sized>(&mut self, path: String, left: &T, right: &T) {
        self.diffs.push(Diff {
            path,
            left: serde_json::to_value(left).unwrap_or(Value::Null),
            right: serde_json::to_value(right).unwrap_or(Value::Null),
        });
    }
}

impl AlertRule {
    /// Compare `self` (existing) against `other` (new), skipping `ignore`d fields.
    pub fn diff(&self, other: &AlertRule, ignore: &[&str]) -> DiffReport {
        let mut b = DiffBuilder {
            ignore,
            diffs: Vec::new(),
        };
        b.field("id", &self.id, &other.id);
        b.field("org_id", &self.org_id, &other.org_id);
        b.field("uid", &self.uid, &other.uid);
        b.field("guid", &self.guid, &other.guid);
        b.field("title", &self.title, &other.title);
        b.field("condition", &self.condition, &other.condition);
        b.list("data", &self.data, &other.data);
        b.field("updated", &self.updated, &other.updated);
        b.field("interval_seconds", &self.interval_seconds, &other.interval_seconds);
        b.field("version", &self.version, &other.version);
        b.field("namespace_uid", &self.namespace_uid, &other.namespace_uid);
        b.field("dashboard_uid", &self.dashboard_uid, &other.dashboard_uid);
        b.field("panel_id", &self.panel_id, &other.panel_id);
        b.field("rule_group", &self.rule_group, &other.rule_group);
        b.field("rule_group_index", &self.rule_group_index, &other.rule_group_index);
        b.field("record", &self.record, &other.record);
        b.field("no_data_state", &self.no_data_state, &other.no_data_state);
        b.field("exec_err_state", &self.exec_err_state, &other.exec_err_state);
        b.field("for_seconds", &self.for_seconds, &other.for_seconds);
        b.field(
            "keep_firing_for_seconds",
            &self.keep_firing_for_seconds,
            &other.keep_firing_for_seconds,
        );
        b.map("annotations", &self.annotations, &other.annotations);
        b.map("labels", &self.labels, &other.labels);
        b.field("is_paused", &self.is_paused, &other.is_paused);
        b.list(
            "notification_settings",
            &self.notification_settings,
            &other.notification_settings,
        );
        b.field("metadata", &self.metadata, &other.metadata);
        b.field(
            "missing_series_evals_to_resolve",
            &self.missing_series_evals_to_resolve,
            &other.missing_series_evals_to_resolve,
        );
        DiffReport(b.diffs)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::AlertQuery;

    fn rule() -> AlertRule {
        AlertRule {
            id: 1,
            org_id: 1,
            uid: "u1".into(),
            title: "disk full".into(),
            condition: "A".into(),
            data: vec![AlertQuery {
                ref_id: "A".into(),
                datasource_uid: "prom".into(),
                ..Default::default()
            }],
            version: 3,
            labels: Labels::from([("severity".into(), "critical".into())]),
            ..Default::default()
        }
    }

    #[test]
    fn volatile_fields_are_ignored() {
        let a = rule();
        let mut b = a.clone();
        b.id = 99;
        b.version = 12;
        b.updated = Utc::now();

        assert!(a.diff(&b, &ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF).is_empty());
        assert_eq!(a.diff(&b, &[]).len(), 3);
    }

    #[test]
    fn labels_are_diffed_per_key() {
        let a = rule();
        let mut b = a.clone();
        b.labels.insert("severity".into(), "warning".into());
        b.labels.insert("team".into(), "db".into());

        let report = a.diff(&b, &ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF);
        assert_eq!(report.paths(), vec!["labels[severity]", "labels[team]"]);
        let team = report.iter().find(|d| d.path == "labels[team]").unwrap();
        assert_eq!(team.left, Value::Null);
        assert_eq!(team.right, Value::String("db".into()));
        assert_eq!(report.changed_fields().into_iter().collect::<Vec<_>>(), vec!["labels"]);
    }

    #[test]
    fn data_is_diffed_per_position() {
        let a = rule();
        let mut b = a.clone();
        b.data[0].datasource_uid = "loki".into();
        assert_eq!(
            a.diff(&b, &ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF).paths(),
            vec!["data[0]"]
        );

        b.data.push(AlertQuery::default());
        assert_eq!(
            a.diff(&b, &ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF).paths(),
            vec!["data"]
        );
    }

    #[test]
    fn single_index_change() {
        let a = rule();
        let mut b = a.clone();
        b.rule_group_index = 4;
        let report = a.diff(&b, &ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF);
        assert_eq!(report.paths(), vec!["rule_group_index"]);
        assert_eq!(report.to_string(), "rule_group_index: 0 -> 4");
    }
}
