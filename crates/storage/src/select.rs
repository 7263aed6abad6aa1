//! Row selection shared by every back-end.
//!
//! [`RuleSelect`] is the SQL-side half of a listing: the cheap, indexable
//! predicates plus label push-down and keyset pagination. SQL back-ends
//! render it with [`RuleSelect::to_sql`]; the in-memory back-end evaluates
//! the same predicates with [`RuleSelect::matches`].

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use alertstore_core::{
    AlertRule, ListAlertRulesByGroupQuery, ListAlertRulesExtendedQuery, Result, RuleStoreError,
    RuleTypeFilter,
};
use alertstore_rules::{parse_matchers, LabelMatcher};

use crate::dialect::{json_string, Dialect, LabelPredicateBuilder, SqlArg, SqlPredicate};
use crate::row::{rule_columns, AlertRuleRow};

/// Keyset cursor: the sort key of the last row of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueCursor {
    #[serde(rename = "n")]
    pub namespace_uid: String,
    #[serde(rename = "g")]
    pub rule_group: String,
    #[serde(rename = "i")]
    pub rule_group_idx: i64,
    #[serde(rename = "d")]
    pub id: i64,
}

impl ContinueCursor {
    pub fn after(rule: &AlertRule) -> Self {
        Self {
            namespace_uid: rule.namespace_uid.clone(),
            rule_group: rule.rule_group.clone(),
            rule_group_idx: rule.rule_group_index as i64,
            id: rule.id,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(hex::encode(serde_json::to_vec(self)?))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = hex::decode(token.trim())
            .map_err(|e| RuleStoreError::InvalidContinueToken(format!("failed to decode token: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RuleStoreError::InvalidContinueToken(format!("failed to unmarshal cursor: {e}")))
    }

    /// Whether `row` sorts strictly after this cursor.
    pub fn precedes(&self, row: &AlertRuleRow) -> bool {
        sort_key_cmp(
            (&self.namespace_uid, &self.rule_group, self.rule_group_idx, self.id),
            row,
        ) == Ordering::Less
    }
}

/// Group-level cursor: the last rule group of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCursor {
    #[serde(rename = "n")]
    pub namespace_uid: String,
    #[serde(rename = "g")]
    pub rule_group: String,
}

impl GroupCursor {
    pub fn encode(&self) -> Result<String> {
        Ok(hex::encode(serde_json::to_vec(self)?))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = hex::decode(token.trim())
            .map_err(|e| RuleStoreError::InvalidContinueToken(format!("failed to decode group token: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RuleStoreError::InvalidContinueToken(format!("failed to unmarshal group cursor: {e}")))
    }

    /// Whether `row` belongs to a group sorting strictly after this one.
    pub fn precedes(&self, row: &AlertRuleRow) -> bool {
        (&self.namespace_uid, &self.rule_group) < (&row.namespace_uid, &row.rule_group)
    }
}

fn sort_key_cmp(key: (&String, &String, i64, i64), row: &AlertRuleRow) -> Ordering {
    key.0
        .cmp(&row.namespace_uid)
        .then_with(|| key.1.cmp(&row.rule_group))
        .then_with(|| key.2.cmp(&(row.rule_group_idx as i64)))
        .then_with(|| key.3.cmp(&row.id))
}

/// Listing order: `(namespace_uid, rule_group, rule_group_idx, id)`.
pub fn sort_rows(rows: &mut [AlertRuleRow]) {
    rows.sort_by(|a, b| {
        sort_key_cmp(
            (&a.namespace_uid, &a.rule_group, a.rule_group_idx as i64, a.id),
            b,
        )
    });
}

/// SQL-side predicates of a rule listing. Empty collections mean "no filter".
#[derive(Debug, Clone, Default)]
pub struct RuleSelect {
    /// `0` selects every organization.
    pub org_id: i64,
    pub exclude_orgs: Vec<i64>,
    pub namespace_uids: Vec<String>,
    pub rule_groups: Vec<String>,
    pub rule_uids: Vec<String>,
    pub dashboard_uid: Option<String>,
    pub panel_id: Option<i64>,
    pub rule_type: RuleTypeFilter,
    pub receiver_name: Option<String>,
    pub time_interval_name: Option<String>,
    /// Only `Some(true)` is pushed down; the other cases need the decoded metadata.
    pub has_prometheus_rule_definition: Option<bool>,
    pub label_matchers: Vec<LabelMatcher>,
    pub after: Option<ContinueCursor>,
    pub after_group: Option<GroupCursor>,
    pub limit: Option<i64>,
}

impl RuleSelect {
    pub fn org(org_id: i64) -> Self {
        Self {
            org_id,
            ..Default::default()
        }
    }

    /// SQL half of an extended listing query. Invalid matchers are dropped
    /// here; the in-memory filter reports them.
    pub fn from_query(query: &ListAlertRulesExtendedQuery) -> Result<Self> {
        let base = &query.base;
        let after = match query.continue_token.as_deref() {
            Some(token) if !token.is_empty() => Some(ContinueCursor::decode(token)?),
            _ => None,
        };
        let (label_matchers, _) = parse_matchers(&query.labels);
        Ok(Self {
            org_id: base.org_id,
            exclude_orgs: Vec::new(),
            namespace_uids: base.namespace_uids.clone(),
            rule_groups: base.rule_groups.clone(),
            rule_uids: base.rule_uids.clone(),
            dashboard_uid: base.dashboard_uid.clone().filter(|d| !d.is_empty()),
            panel_id: base.panel_id,
            rule_type: query.rule_type,
            receiver_name: base.receiver_name.clone().filter(|r| !r.is_empty()),
            time_interval_name: base.time_interval_name.clone().filter(|t| !t.is_empty()),
            has_prometheus_rule_definition: query.has_prometheus_rule_definition,
            label_matchers,
            after,
            after_group: None,
            limit: None,
        })
    }

    /// SQL half of a group-paged listing, resuming after `after_group`.
    pub fn from_group_query(query: &ListAlertRulesByGroupQuery, after_group: Option<GroupCursor>) -> Self {
        let base = &query.base;
        Self {
            org_id: base.org_id,
            namespace_uids: base.namespace_uids.clone(),
            rule_groups: base.rule_groups.clone(),
            rule_uids: base.rule_uids.clone(),
            dashboard_uid: base.dashboard_uid.clone().filter(|d| !d.is_empty()),
            panel_id: base.panel_id,
            rule_type: query.rule_type,
            receiver_name: base.receiver_name.clone().filter(|r| !r.is_empty()),
            time_interval_name: base.time_interval_name.clone().filter(|t| !t.is_empty()),
            has_prometheus_rule_definition: query.has_prometheus_rule_definition,
            after_group,
            ..Default::default()
        }
    }

    /// `SELECT` over `alert_rule` with `?` placeholders, plus its arguments.
    pub fn to_sql(&self, labels: &dyn LabelPredicateBuilder) -> SqlPredicate {
        let mut wh: Vec<String> = Vec::new();
        let mut args: Vec<SqlArg> = Vec::new();

        if self.org_id > 0 {
            wh.push("org_id = ?".into());
            args.push(SqlArg::Int(self.org_id));
        }
        if !self.exclude_orgs.is_empty() {
            wh.push(format!("org_id NOT IN ({})", placeholders(self.exclude_orgs.len())));
            args.extend(self.exclude_orgs.iter().map(|o| SqlArg::Int(*o)));
        }
        for (column, values) in [
            ("namespace_uid", &self.namespace_uids),
            ("rule_group", &self.rule_groups),
            ("uid", &self.rule_uids),
        ] {
            if !values.is_empty() {
                wh.push(format!("{column} IN ({})", placeholders(values.len())));
                args.extend(values.iter().cloned().map(SqlArg::Text));
            }
        }
        if let Some(dashboard) = &self.dashboard_uid {
            wh.push("dashboard_uid = ?".into());
            args.push(SqlArg::Text(dashboard.clone()));
            if let Some(panel) = self.panel_id {
                wh.push("panel_id = ?".into());
                args.push(SqlArg::Int(panel));
            }
        }
        match self.rule_type {
            RuleTypeFilter::All => {}
            RuleTypeFilter::Alerting => wh.push("(record IS NULL OR record = '')".into()),
            RuleTypeFilter::Recording => wh.push("(record IS NOT NULL AND record <> '')".into()),
        }
        if let Some(receiver) = &self.receiver_name {
            wh.push(format!("notification_settings LIKE ? ESCAPE '{LIKE_ESCAPE}'"));
            args.push(SqlArg::Text(like_contains(&receiver_fragment(receiver))));
        }
        if let Some(interval) = &self.time_interval_name {
            wh.push(format!("notification_settings LIKE ? ESCAPE '{LIKE_ESCAPE}'"));
            args.push(SqlArg::Text(like_contains(&json_string(interval))));
        }
        if self.has_prometheus_rule_definition == Some(true) {
            wh.push(format!("metadata LIKE ? ESCAPE '{LIKE_ESCAPE}'"));
            args.push(SqlArg::Text(like_contains(PROMETHEUS_DEFINITION_KEY)));
        }
        for matcher in &self.label_matchers {
            if let Some(p) = labels.build(matcher) {
                wh.push(p.sql);
                args.extend(p.args);
            }
        }
        if let Some(c) = &self.after {
            wh.push(
                "(namespace_uid > ? \
                 OR (namespace_uid = ? AND rule_group > ?) \
                 OR (namespace_uid = ? AND rule_group = ? AND rule_group_idx > ?) \
                 OR (namespace_uid = ? AND rule_group = ? AND rule_group_idx = ? AND id > ?))"
                    .into(),
            );
            let n = || SqlArg::Text(c.namespace_uid.clone());
            let g = || SqlArg::Text(c.rule_group.clone());
            args.extend([
                n(),
                n(),
                g(),
                n(),
                g(),
                SqlArg::Int(c.rule_group_idx),
                n(),
                g(),
                SqlArg::Int(c.rule_group_idx),
                SqlArg::Int(c.id),
            ]);
        }
        if let Some(c) = &self.after_group {
            wh.push("(namespace_uid > ? OR (namespace_uid = ? AND rule_group > ?))".into());
            args.extend([
                SqlArg::Text(c.namespace_uid.clone()),
                SqlArg::Text(c.namespace_uid.clone()),
                SqlArg::Text(c.rule_group.clone()),
            ]);
        }

        let mut sql = format!("SELECT {} FROM alert_rule", rule_columns(""));
        if !wh.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&wh.join(" AND "));
        }
        sql.push_str(" ORDER BY namespace_uid, rule_group, rule_group_idx, id");
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            args.push(SqlArg::Int(limit));
        }
        SqlPredicate::new(sql, args)
    }

    /// Rendered for a concrete dialect.
    pub fn to_dialect_sql(&self, dialect: Dialect) -> SqlPredicate {
        let labels = dialect.label_predicates();
        let p = self.to_sql(labels.as_ref());
        SqlPredicate::new(dialect.rebind(&p.sql), p.args)
    }

    /// Evaluate the scalar predicates against a stored row. Label matchers
    /// are not evaluated; the in-memory filter engine owns them.
    pub fn matches(&self, row: &AlertRuleRow) -> bool {
        if self.org_id > 0 && row.org_id != self.org_id {
            return false;
        }
        if self.exclude_orgs.contains(&row.org_id) {
            return false;
        }
        if !self.namespace_uids.is_empty() && !self.namespace_uids.contains(&row.namespace_uid) {
            return false;
        }
        if !self.rule_groups.is_empty() && !self.rule_groups.contains(&row.rule_group) {
            return false;
        }
        if !self.rule_uids.is_empty() && !self.rule_uids.contains(&row.uid) {
            return false;
        }
        if let Some(dashboard) = &self.dashboard_uid {
            if row.dashboard_uid.as_ref() != Some(dashboard) {
                return false;
            }
            if self.panel_id.is_some() && row.panel_id != self.panel_id {
                return false;
            }
        }
        let type_ok = match self.rule_type {
            RuleTypeFilter::All => true,
            RuleTypeFilter::Alerting => !row.is_recording(),
            RuleTypeFilter::Recording => row.is_recording(),
        };
        if !type_ok {
            return false;
        }
        if let Some(receiver) = &self.receiver_name {
            if !row.notification_settings.contains(&receiver_fragment(receiver)) {
                return false;
            }
        }
        if let Some(interval) = &self.time_interval_name {
            if !row.notification_settings.contains(&json_string(interval)) {
                return false;
            }
        }
        if self.has_prometheus_rule_definition == Some(true)
            && !row.metadata.contains(PROMETHEUS_DEFINITION_KEY)
        {
            return false;
        }
        if self.after_group.as_ref().is_some_and(|c| !c.precedes(row)) {
            return false;
        }
        self.after.as_ref().map_or(true, |c| c.precedes(row))
    }
}

/// Escape character of every `LIKE` this module emits. `!` needs no quoting
/// in any supported dialect, unlike the backslash MySQL string literals eat.
const LIKE_ESCAPE: char = '!';

/// JSON key present in the metadata column of imported Prometheus rules.
const PROMETHEUS_DEFINITION_KEY: &str = "\"prometheus_rule_definition\"";

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// The compact JSON text a receiver leaves in `notification_settings`.
fn receiver_fragment(receiver: &str) -> String {
    format!("\"receiver\":{}", json_string(receiver))
}

/// `LIKE` pattern matching `fragment` literally anywhere in the column.
fn like_contains(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len() + 8);
    out.push('%');
    for ch in fragment.chars() {
        if matches!(ch, '%' | '_') || ch == LIKE_ESCAPE {
            out.push(LIKE_ESCAPE);
        }
        out.push(ch);
    }
    out.push('%');
    out
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use alertstore_core::{ListAlertRulesQuery, NotificationSettings};

    use super::*;

    fn row(ns: &str, group: &str, idx: i32, id: i64) -> AlertRuleRow {
        let rule = AlertRule {
            id,
            org_id: 1,
            uid: format!("r{id}"),
            namespace_uid: ns.into(),
            rule_group: group.into(),
            rule_group_index: idx,
            ..Default::default()
        };
        AlertRuleRow::from_rule(&rule).unwrap()
    }

    #[test]
    fn cursor_token_round_trip_and_rejection() {
        let c = ContinueCursor {
            namespace_uid: "ns".into(),
            rule_group: "g".into(),
            rule_group_idx: 2,
            id: 7,
        };
        let token = c.encode().unwrap();
        assert!(token.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_eq!(ContinueCursor::decode(&token).unwrap(), c);

        let err = ContinueCursor::decode("zz-not-hex").unwrap_err();
        assert_eq!(err.kind(), alertstore_core::ErrorKind::Validation);
        let err = ContinueCursor::decode(&hex::encode(b"[1,2]")).unwrap_err();
        assert!(err.to_string().contains("invalid continue token"));
    }

    #[test]
    fn cursor_orders_by_sort_key() {
        let c = ContinueCursor::after(&row("b", "g", 2, 5).into_rule(&crate::json_cache::JsonDecodeCache::new(1)).unwrap());
        assert!(!c.precedes(&row("a", "z", 9, 99)));
        assert!(!c.precedes(&row("b", "g", 2, 5)));
        assert!(c.precedes(&row("b", "g", 2, 6)));
        assert!(c.precedes(&row("b", "g", 3, 1)));
        assert!(c.precedes(&row("b", "h", 1, 1)));
        assert!(c.precedes(&row("c", "a", 1, 1)));
    }

    #[test]
    fn sql_for_full_query() {
        let query = ListAlertRulesExtendedQuery {
            base: ListAlertRulesQuery {
                org_id: 3,
                namespace_uids: vec!["f1".into(), "f2".into()],
                rule_groups: vec!["g".into()],
                dashboard_uid: Some("dash".into()),
                panel_id: Some(4),
                receiver_name: Some("ops".into()),
                ..Default::default()
            },
            rule_type: RuleTypeFilter::Recording,
            labels: vec!["severity=critical".into(), "env=~prod.*".into()],
            ..Default::default()
        };
        let mut select = RuleSelect::from_query(&query).unwrap();
        select.limit = Some(11);

        let p = select.to_dialect_sql(Dialect::Postgres);
        assert!(p.sql.starts_with("SELECT id, guid, org_id"));
        assert!(p.sql.contains("org_id = $1"));
        assert!(p.sql.contains("namespace_uid IN ($2, $3)"));
        assert!(p.sql.contains("rule_group IN ($4)"));
        assert!(p.sql.contains("dashboard_uid = $5"));
        assert!(p.sql.contains("panel_id = $6"));
        assert!(p.sql.contains("record IS NOT NULL"));
        assert!(p.sql.contains("notification_settings LIKE $7 ESCAPE '!'"));
        assert!(p.sql.contains("->> $8) = $9"));
        assert!(!p.sql.contains(" ~ "));
        assert!(p.sql.ends_with("ORDER BY namespace_uid, rule_group, rule_group_idx, id LIMIT $10"));
        assert_eq!(p.args.len(), 10);
        assert_eq!(p.args[6], SqlArg::Text("%\"receiver\":\"ops\"%".into()));
        assert_eq!(p.args[9], SqlArg::Int(11));
    }

    /// `LIKE` with `!` as the escape character.
    fn like(pattern: &[char], text: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some(('%', rest)) => (0..=text.len()).any(|skip| like(rest, &text[skip..])),
            Some(('_', rest)) => !text.is_empty() && like(rest, &text[1..]),
            Some(('!', rest)) if !rest.is_empty() => {
                text.first() == rest.first() && like(&rest[1..], &text[1..])
            }
            Some((ch, rest)) => text.first() == Some(ch) && like(rest, &text[1..]),
        }
    }

    fn like_str(pattern: &str, text: &str) -> bool {
        let pattern: Vec<char> = pattern.chars().collect();
        let text: Vec<char> = text.chars().collect();
        like(&pattern, &text)
    }

    fn settings_column(receiver: &str) -> String {
        let rule = AlertRule {
            notification_settings: vec![NotificationSettings::for_receiver(receiver)],
            ..Default::default()
        };
        AlertRuleRow::from_rule(&rule).unwrap().notification_settings
    }

    #[test]
    fn receiver_pattern_is_literal() {
        let receiver = "a\"b%_c!\\d";
        let select = RuleSelect {
            receiver_name: Some(receiver.into()),
            ..RuleSelect::org(1)
        };
        let p = select.to_dialect_sql(Dialect::Postgres);
        assert!(p.sql.contains("notification_settings LIKE $2 ESCAPE '!'"));
        let SqlArg::Text(pattern) = &p.args[1] else {
            panic!("expected text pattern");
        };
        assert_eq!(pattern, r#"%"receiver":"a\"b!%!_c!!\\d"%"#);

        assert!(like_str(pattern, &settings_column(receiver)));
        // wildcards in the name must not widen the match
        assert!(!like_str(pattern, &settings_column("a\"bxyzc!\\d")));
        assert!(!like_str(pattern, &settings_column("a\"b%xc!\\d")));

        let stored = AlertRuleRow::from_rule(&AlertRule {
            org_id: 1,
            notification_settings: vec![NotificationSettings::for_receiver(receiver)],
            ..Default::default()
        })
        .unwrap();
        assert!(select.matches(&stored));
    }

    #[test]
    fn time_interval_and_prometheus_definition() {
        let select = RuleSelect {
            time_interval_name: Some("weekends_only".into()),
            has_prometheus_rule_definition: Some(true),
            ..RuleSelect::org(1)
        };
        let p = select.to_dialect_sql(Dialect::Postgres);
        assert!(p.sql.contains("notification_settings LIKE $2 ESCAPE '!'"));
        assert!(p.sql.contains("metadata LIKE $3 ESCAPE '!'"));
        assert_eq!(p.args[1], SqlArg::Text(r#"%"weekends!_only"%"#.into()));
        assert_eq!(p.args[2], SqlArg::Text(r#"%"prometheus!_rule!_definition"%"#.into()));

        let mut rule = AlertRule {
            org_id: 1,
            notification_settings: vec![NotificationSettings {
                receiver: "slack".into(),
                mute_time_intervals: vec!["weekends_only".into()],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(!select.matches(&AlertRuleRow::from_rule(&rule).unwrap()));
        rule.metadata.prometheus_rule_definition = Some("alert: Up".into());
        assert!(select.matches(&AlertRuleRow::from_rule(&rule).unwrap()));

        let negated = RuleSelect {
            has_prometheus_rule_definition: Some(false),
            ..RuleSelect::org(1)
        };
        assert!(!negated.to_dialect_sql(Dialect::Postgres).sql.contains("metadata LIKE"));
    }

    #[test]
    fn group_cursor_skips_whole_groups() {
        let cursor = GroupCursor {
            namespace_uid: "b".into(),
            rule_group: "g".into(),
        };
        assert_eq!(GroupCursor::decode(&cursor.encode().unwrap()).unwrap(), cursor);
        assert!(GroupCursor::decode("zz").is_err());

        let select = RuleSelect::from_group_query(&ListAlertRulesByGroupQuery::default(), Some(cursor));
        let p = select.to_dialect_sql(Dialect::Postgres);
        assert!(p.sql.contains("(namespace_uid > $1 OR (namespace_uid = $2 AND rule_group > $3))"));
        assert_eq!(p.args.len(), 3);

        assert!(!select.matches(&row("b", "g", 9, 9)));
        assert!(!select.matches(&row("a", "z", 1, 1)));
        assert!(select.matches(&row("b", "h", 1, 1)));
        assert!(select.matches(&row("c", "a", 1, 1)));
    }

    #[test]
    fn sqlite_skips_regex_push_down() {
        let query = ListAlertRulesExtendedQuery {
            base: ListAlertRulesQuery {
                org_id: 1,
                ..Default::default()
            },
            labels: vec!["severity=critical".into(), "env=~prod.*".into()],
            ..Default::default()
        };
        let p = RuleSelect::from_query(&query).unwrap().to_dialect_sql(Dialect::Sqlite);
        assert_eq!(p.sql.matches("GLOB").count(), 1);
        assert_eq!(p.sql.matches('?').count(), p.args.len());
    }

    #[test]
    fn cursor_condition_binds_ten_args() {
        let select = RuleSelect {
            org_id: 1,
            after: Some(ContinueCursor {
                namespace_uid: "n".into(),
                rule_group: "g".into(),
                rule_group_idx: 1,
                id: 2,
            }),
            ..Default::default()
        };
        let p = select.to_sql(Dialect::Sqlite.label_predicates().as_ref());
        assert_eq!(p.args.len(), 11);
        assert_eq!(p.sql.matches('?').count(), 11);
    }

    #[test]
    fn invalid_token_fails_query_building() {
        let query = ListAlertRulesExtendedQuery {
            continue_token: Some("nope".into()),
            ..Default::default()
        };
        assert!(RuleSelect::from_query(&query).is_err());
    }

    #[test]
    fn row_matching_mirrors_sql() {
        let mut r = row("f1", "g", 1, 1);
        let select = RuleSelect {
            org_id: 1,
            namespace_uids: vec!["f1".into()],
            receiver_name: Some("ops".into()),
            ..Default::default()
        };
        assert!(!select.matches(&r));

        let rule = AlertRule {
            notification_settings: vec![NotificationSettings::for_receiver("ops")],
            ..r.clone().into_rule(&crate::json_cache::JsonDecodeCache::new(1)).unwrap()
        };
        r = AlertRuleRow::from_rule(&rule).unwrap();
        assert!(select.matches(&r));

        let other_org = RuleSelect {
            exclude_orgs: vec![1],
            ..Default::default()
        };
        assert!(!other_org.matches(&r));
    }

    #[test]
    fn sort_rows_uses_listing_order() {
        let mut rows = vec![row("b", "a", 1, 1), row("a", "b", 2, 3), row("a", "b", 1, 9), row("a", "a", 5, 2)];
        sort_rows(&mut rows);
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 9, 3, 1]);
    }
}
