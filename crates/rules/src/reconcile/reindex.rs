use std::collections::HashSet;

use alertstore_core::{sort_by_group_index, AlertRuleKey, ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF};

use super::{GroupDelta, RuleDelta};

/// Append index repairs for every non-target affected group.
///
/// Rules already updated or deleted by the plan are skipped; the remaining
/// members are renumbered 1..N in stored order and each one whose index
/// moves gets a `rule_group_index`-only update. The target group is left
/// alone because its indices come from submission order.
pub fn update_calculated_rule_fields(mut delta: GroupDelta) -> GroupDelta {
    let touched: HashSet<AlertRuleKey> = delta
        .update
        .iter()
        .map(|u| u.existing.key())
        .chain(delta.delete.iter().map(|r| r.key()))
        .collect();

    let mut repairs = Vec::new();
    for (group_key, rules) in &delta.affected_groups {
        if *group_key == delta.group_key {
            continue;
        }
        let mut rules = rules.clone();
        sort_by_group_index(&mut rules);

        let mut index = 1;
        for rule in rules {
            if touched.contains(&rule.key()) {
                continue;
            }
            if rule.rule_group_index != index {
                let mut new = rule.clone();
                new.rule_group_index = index;
                let diff = rule.diff(&new, &ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF);
                repairs.push(RuleDelta {
                    existing: rule,
                    new,
                    diff,
                });
            }
            index += 1;
        }
    }

    delta.update.extend(repairs);
    delta
}
