//! Rule-group reconciliation.
//!
//! [`calculate_changes`] plans the inserts, updates and deletes that move a
//! stored rule group to a submitted target state, resolving UIDs that live in
//! other groups (moves). [`update_calculated_rule_fields`] then repairs the
//! indices of the groups those moves left behind. Planning holds no locks;
//! the writer's optimistic version check is what rejects a stale plan.

mod reindex;


use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use alertstore_core::{
    AlertRule, DiffReport, GetAlertRulesGroupByRuleUidQuery, GroupKey, ListAlertRulesQuery,
    Result, RuleReader, RuleStoreError, SubmittedRule, ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF,
};

pub use reindex::update_calculated_rule_fields;

/// A stored rule paired with its replacement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleDelta {
    pub existing: AlertRule,
    pub new: AlertRule,
    pub diff: DiffReport,
}

/// Planned changes for one target group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupDelta {
    pub group_key: GroupKey,
    /// Authoritative membership of every group touched by the plan, in
    /// discovery order: the target group first, then groups losing a rule.
    pub affected_groups: IndexMap<GroupKey, Vec<AlertRule>>,
    pub new: Vec<AlertRule>,
    pub update: Vec<RuleDelta>,
    pub delete: Vec<AlertRule>,
}

impl GroupDelta {
    pub fn empty(group_key: GroupKey) -> Self {
        Self {
            group_key,
            affected_groups: IndexMap::new(),
            new: Vec::new(),
            update: Vec::new(),
            delete: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    /// Organizations whose stored rules change when this delta is applied.
    pub fn touched_orgs(&self) -> HashSet<i64> {
        self.new
            .iter()
            .map(|r| r.org_id)
            .chain(self.update.iter().map(|d| d.new.org_id))
            .chain(self.delete.iter().map(|r| r.org_id))
            .collect()
    }
}

/// Plan the changes that turn the stored group `group_key` into `submitted`.
///
/// Submitted rules are placed in submission order (`rule_group_index` 1..N).
/// A UID that exists nowhere in the organization fails the whole plan.
pub async fn calculate_changes(
    reader: &dyn RuleReader,
    group_key: &GroupKey,
    submitted: Vec<SubmittedRule>,
) -> Result<GroupDelta> {
    let existing_group = reader
        .list_alert_rules(&ListAlertRulesQuery::for_group(group_key))
        .await?;

    let mut affected_groups = IndexMap::new();
    if !existing_group.is_empty() {
        affected_groups.insert(group_key.clone(), existing_group.clone());
    }

    // UIDs of the target group not yet claimed by a submission, in load order.
    let mut still_present: IndexMap<String, AlertRule> = existing_group
        .into_iter()
        .map(|r| (r.uid.clone(), r))
        .collect();
    // Rules fetched from foreign groups, so a group is only queried once.
    let mut loaded_by_uid: HashMap<String, AlertRule> = HashMap::new();
    let mut seen_uids: HashSet<String> = HashSet::new();

    let mut to_add = Vec::new();
    let mut to_update = Vec::new();

    for (position, rule) in submitted.into_iter().enumerate() {
        let index = position as i32 + 1;

        let uid = match rule.uid.clone().filter(|u| !u.is_empty()) {
            Some(uid) => uid,
            None => {
                to_add.push(rule.into_rule(group_key, index));
                continue;
            }
        };
        if !seen_uids.insert(uid.clone()) {
            return Err(RuleStoreError::Validation(format!(
                "rule with UID {uid} is submitted more than once"
            )));
        }

        let existing = if let Some(existing) = still_present.shift_remove(&uid) {
            existing
        } else if let Some(existing) = loaded_by_uid.get(&uid) {
            existing.clone()
        } else {
            let group = reader
                .get_alert_rules_group_by_rule_uid(&GetAlertRulesGroupByRuleUidQuery {
                    org_id: group_key.org_id,
                    uid: uid.clone(),
                })
                .await?;
            let found = group.iter().find(|r| r.uid == uid).cloned();
            for r in &group {
                loaded_by_uid.insert(r.uid.clone(), r.clone());
            }
            let Some(found) = found else {
                return Err(RuleStoreError::NotFound(format!(
                    "failed to update rule with UID {uid} because it does not exist in organization {}",
                    group_key.org_id
                )));
            };
            debug!(rule_uid = %uid, from = %found.group_key(), to = %group_key, "rule moves between groups");
            affected_groups.insert(found.group_key(), group);
            found
        };

        let new = rule.patch(&existing, group_key, index);
        let diff = existing.diff(&new, &ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF);
        if diff.is_empty() {
            continue;
        }
        to_update.push(RuleDelta { existing, new, diff });
    }

    let to_delete: Vec<AlertRule> = still_present.into_values().collect();

    debug!(
        group = %group_key,
        new = to_add.len(),
        update = to_update.len(),
        delete = to_delete.len(),
        "calculated rule group changes"
    );

    if to_add.is_empty() && to_update.is_empty() && to_delete.is_empty() {
        return Ok(GroupDelta::empty(group_key.clone()));
    }

    Ok(GroupDelta {
        group_key: group_key.clone(),
        affected_groups,
        new: to_add,
        update: to_update,
        delete: to_delete,
    })
}
