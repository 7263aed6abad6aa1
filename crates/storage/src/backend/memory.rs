use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use alertstore_core::{
    AlertRuleKey, AlertRuleKeyWithId, AlertRuleKeyWithVersion, Result, RuleStoreError,
};

use super::{RuleBackend, RuleTransaction};
use crate::row::{AlertRuleRow, AlertRuleVersionRow};
use crate::select::{sort_rows, RuleSelect};

#[derive(Debug, Clone, Default)]
struct Tables {
    rules: BTreeMap<i64, AlertRuleRow>,
    versions: BTreeMap<i64, AlertRuleVersionRow>,
    last_rule_id: i64,
    last_version_id: i64,
}

impl Tables {
    /// Enforce the unique keys of `alert_rule` for `row` (ignoring itself).
    fn check_unique(&self, row: &AlertRuleRow) -> Result<()> {
        for other in self.rules.values() {
            if other.id == row.id || other.org_id != row.org_id {
                continue;
            }
            let constraint = if other.uid == row.uid {
                "alert_rule_org_id_uid"
            } else if other.title == row.title {
                "alert_rule_org_id_title"
            } else {
                continue;
            };
            return Err(RuleStoreError::UniqueConstraint {
                org_id: row.org_id,
                uid: row.uid.clone(),
                source: format!("duplicate key value violates unique constraint \"{constraint}\"")
                    .into(),
            });
        }
        Ok(())
    }

    fn delete_rules_where(&mut self, doomed: impl Fn(&AlertRuleRow) -> bool) -> u64 {
        let before = self.rules.len();
        self.rules.retain(|_, r| !doomed(r));
        (before - self.rules.len()) as u64
    }

    fn delete_versions_where(&mut self, doomed: impl Fn(&AlertRuleVersionRow) -> bool) -> u64 {
        let before = self.versions.len();
        self.versions.retain(|_, v| !doomed(v));
        (before - self.versions.len()) as u64
    }
}

fn is_trash(v: &AlertRuleVersionRow) -> bool {
    v.rule.uid.is_empty()
}

/// In-process transactional back-end.
///
/// Enforces the same unique keys and version checks as the SQL schema. A
/// transaction holds the table lock for its whole lifetime and works on a
/// staged copy that replaces the tables on commit.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a row verbatim, bypassing every check. Returns its id.
    pub async fn insert_raw(&self, mut row: AlertRuleRow) -> i64 {
        let mut tables = self.tables.lock().await;
        tables.last_rule_id += 1;
        row.id = tables.last_rule_id;
        tables.rules.insert(row.id, row);
        tables.last_rule_id
    }

    pub async fn version_rows(&self) -> usize {
        self.tables.lock().await.versions.len()
    }
}

#[async_trait]
impl RuleBackend for MemoryBackend {
    async fn begin(&self) -> Result<Box<dyn RuleTransaction>> {
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, staged }))
    }

    async fn select_rules(&self, select: &RuleSelect) -> Result<Vec<AlertRuleRow>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<AlertRuleRow> = tables
            .rules
            .values()
            .filter(|r| select.matches(r))
            .cloned()
            .collect();
        sort_rows(&mut rows);
        if let Some(limit) = select.limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }

    async fn select_group_by_rule_uid(&self, org_id: i64, uid: &str) -> Result<Vec<AlertRuleRow>> {
        let tables = self.tables.lock().await;
        let Some(anchor) = tables
            .rules
            .values()
            .find(|r| r.org_id == org_id && r.uid == uid)
        else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<AlertRuleRow> = tables
            .rules
            .values()
            .filter(|r| {
                r.org_id == org_id
                    && r.namespace_uid == anchor.namespace_uid
                    && r.rule_group == anchor.rule_group
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.rule_group_idx, r.id));
        Ok(rows)
    }

    async fn select_versions(&self, org_id: i64, guid: &str) -> Result<Vec<AlertRuleVersionRow>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .versions
            .values()
            .rev()
            .filter(|v| v.rule.org_id == org_id && v.rule.guid == guid)
            .cloned()
            .collect())
    }

    async fn count_rules(&self, org_id: i64) -> Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .rules
            .values()
            .filter(|r| org_id == 0 || r.org_id == org_id)
            .count() as i64)
    }

    async fn select_deleted_versions(&self, org_id: i64) -> Result<Vec<AlertRuleVersionRow>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<AlertRuleVersionRow> = tables
            .versions
            .values()
            .filter(|v| v.rule.org_id == org_id && is_trash(v))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created, b.version_id).cmp(&(a.created, a.version_id)));
        Ok(rows)
    }

    async fn select_rule_keys(&self, exclude_orgs: &[i64]) -> Result<Vec<AlertRuleKeyWithVersion>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .rules
            .values()
            .filter(|r| !exclude_orgs.contains(&r.org_id))
            .map(|r| AlertRuleKeyWithVersion {
                key: AlertRuleKey {
                    org_id: r.org_id,
                    uid: r.uid.clone(),
                },
                version: r.version,
            })
            .collect())
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

#[async_trait]
impl RuleTransaction for MemoryTransaction {
    async fn uid_exists(&mut self, org_id: i64, uid: &str) -> Result<bool> {
        Ok(self
            .staged
            .rules
            .values()
            .any(|r| r.org_id == org_id && r.uid == uid))
    }

    async fn insert_rules(&mut self, rows: &[AlertRuleRow]) -> Result<Vec<AlertRuleKeyWithId>> {
        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            let mut row = row.clone();
            row.id = self.staged.last_rule_id + 1;
            self.staged.check_unique(&row)?;
            self.staged.last_rule_id = row.id;
            keys.push(AlertRuleKeyWithId {
                key: AlertRuleKey {
                    org_id: row.org_id,
                    uid: row.uid.clone(),
                },
                id: row.id,
            });
            self.staged.rules.insert(row.id, row);
        }
        Ok(keys)
    }

    async fn update_rule(&mut self, row: &AlertRuleRow, expected_version: i64) -> Result<u64> {
        match self.staged.rules.get(&row.id) {
            Some(stored) if stored.version == expected_version => {}
            _ => return Ok(0),
        }
        self.staged.check_unique(row)?;
        self.staged.rules.insert(row.id, row.clone());
        Ok(1)
    }

    async fn update_title(
        &mut self,
        key: &AlertRuleKeyWithId,
        title: &str,
        expected_version: i64,
    ) -> Result<u64> {
        let id = key.id;
        let mut row = match self.staged.rules.get(&id) {
            Some(stored) if stored.version == expected_version => stored.clone(),
            _ => return Ok(0),
        };
        row.title = title.to_string();
        row.version += 1;
        self.staged.check_unique(&row)?;
        self.staged.rules.insert(id, row);
        Ok(1)
    }

    async fn latest_versions(&mut self, org_id: i64, uids: &[String]) -> Result<Vec<AlertRuleVersionRow>> {
        let mut latest: BTreeMap<&str, &AlertRuleVersionRow> = BTreeMap::new();
        for v in self.staged.versions.values() {
            if v.rule.org_id != org_id || is_trash(v) || !uids.contains(&v.rule.uid) {
                continue;
            }
            // ids grow monotonically, so the last one seen wins
            latest.insert(v.rule.guid.as_str(), v);
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn delete_rules(&mut self, org_id: i64, uids: &[String]) -> Result<u64> {
        let removed = self
            .staged
            .delete_rules_where(|r| r.org_id == org_id && uids.contains(&r.uid));
        self.staged
            .delete_versions_where(|v| v.rule.org_id == org_id && !is_trash(v) && uids.contains(&v.rule.uid));
        Ok(removed)
    }

    async fn insert_versions(&mut self, rows: &[AlertRuleVersionRow]) -> Result<()> {
        for row in rows {
            let duplicate = self.staged.versions.values().any(|v| {
                v.rule.org_id == row.rule.org_id
                    && v.rule.uid == row.rule.uid
                    && v.rule.guid == row.rule.guid
                    && v.rule.version == row.rule.version
            });
            if duplicate {
                return Err(RuleStoreError::UniqueConstraint {
                    org_id: row.rule.org_id,
                    uid: row.rule.uid.clone(),
                    source: "duplicate key value violates unique constraint \"alert_rule_version_org_uid_guid_version\"".into(),
                });
            }
            let mut row = row.clone();
            self.staged.last_version_id += 1;
            row.version_id = self.staged.last_version_id;
            self.staged.versions.insert(row.version_id, row);
        }
        Ok(())
    }

    async fn delete_versions_up_to(&mut self, guid: &str, up_to: i64) -> Result<u64> {
        let before = self.staged.versions.len();
        self.staged
            .versions
            .retain(|_, v| !(v.rule.guid == guid && v.rule.version <= up_to));
        Ok((before - self.staged.versions.len()) as u64)
    }

    async fn bump_versions(
        &mut self,
        org_id: i64,
        namespace_uids: &[String],
    ) -> Result<Vec<AlertRuleKeyWithVersion>> {
        let mut bumped = Vec::new();
        for row in self.staged.rules.values_mut() {
            if row.org_id == org_id && namespace_uids.contains(&row.namespace_uid) {
                row.version += 1;
                bumped.push(AlertRuleKeyWithVersion {
                    key: AlertRuleKey {
                        org_id: row.org_id,
                        uid: row.uid.clone(),
                    },
                    version: row.version,
                });
            }
        }
        Ok(bumped)
    }

    async fn delete_trash_before(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .staged
            .delete_versions_where(|v| is_trash(v) && v.created <= cutoff))
    }

    async fn delete_trash_by_guid(&mut self, org_id: i64, guid: &str) -> Result<u64> {
        Ok(self
            .staged
            .delete_versions_where(|v| is_trash(v) && v.rule.org_id == org_id && v.rule.guid == guid))
    }

    async fn purge_org(&mut self, org_id: i64) -> Result<u64> {
        let removed = self.staged.delete_rules_where(|r| r.org_id == org_id);
        self.staged.delete_versions_where(|v| v.rule.org_id == org_id);
        Ok(removed)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
