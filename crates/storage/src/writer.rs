//! The single mutation path for alert rules.
//!
//! Every function here runs inside a caller-owned [`RuleTransaction`]; an
//! error leaves the transaction uncommitted so the caller's drop rolls it
//! back.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use alertstore_core::config::AlertingConfig;
use alertstore_core::{
    AlertRule, AlertRuleKey, AlertRuleKeyWithId, AlertRuleVersion, Result, RuleStoreError,
    ALERT_RULE_MAX_TITLE_LENGTH,
};
use alertstore_rules::validate_alert_rule;

use crate::backend::RuleTransaction;
use crate::row::{AlertRuleRow, AlertRuleVersionRow};
use crate::uid::{default_generator, temporary_title, UidGenerator};

/// One rule to write. `existing` is the stored state the caller read;
/// `None` means insert.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertRule {
    pub existing: Option<AlertRule>,
    pub new: AlertRule,
}

#[derive(Clone)]
pub struct WriterSettings {
    pub base_interval_secs: i64,
    pub uid_attempts: u32,
    /// History rows kept per rule; 0 keeps everything.
    pub version_record_limit: i64,
    pub uid_generator: UidGenerator,
}

impl WriterSettings {
    pub fn from_config(alerting: &AlertingConfig) -> Self {
        Self {
            base_interval_secs: alerting.base_interval_secs,
            uid_attempts: alerting.uid_generation_attempts,
            version_record_limit: alerting.rule_version_record_limit,
            uid_generator: default_generator(),
        }
    }
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self::from_config(&AlertingConfig::default())
    }
}

struct PendingUpdate {
    position: usize,
    existing: AlertRule,
    new: AlertRule,
    /// Version the next conditional write must see.
    expected_version: i64,
}

/// Insert and update rules in one transaction, appending history.
///
/// Returns the key and id of every written rule in input order.
pub async fn upsert_rules(
    tx: &mut dyn RuleTransaction,
    settings: &WriterSettings,
    rules: Vec<UpsertRule>,
) -> Result<Vec<AlertRuleKeyWithId>> {
    let now = Utc::now();
    let total = rules.len();
    let mut inserts: Vec<(usize, AlertRule)> = Vec::new();
    let mut updates: Vec<PendingUpdate> = Vec::new();
    let mut claimed: HashSet<AlertRuleKey> = HashSet::new();

    for (position, UpsertRule { existing, mut new }) in rules.into_iter().enumerate() {
        match existing {
            None => {
                if new.uid.is_empty() {
                    new.uid = generate_uid(tx, settings, &new, &claimed).await?;
                }
                new.id = 0;
                new.version = 1;
                prepare(&mut new, settings, now)?;
                new.guid = Uuid::new_v4().to_string();
                claimed.insert(new.key());
                inserts.push((position, new));
            }
            Some(existing) => {
                new.id = existing.id;
                new.guid = existing.guid.clone();
                new.uid = existing.uid.clone();
                new.version = existing.version + 1;
                prepare(&mut new, settings, now)?;
                updates.push(PendingUpdate {
                    position,
                    expected_version: existing.version,
                    existing,
                    new,
                });
            }
        }
    }

    prevent_intermediate_title_conflicts(tx, &mut updates).await?;

    let mut written: Vec<Option<AlertRuleKeyWithId>> = vec![None; total];
    let mut history: Vec<AlertRuleVersion> = Vec::with_capacity(total);

    for update in &mut updates {
        update.new.version = update.expected_version + 1;
        let row = AlertRuleRow::from_rule(&update.new)?;
        let affected = tx.update_rule(&row, update.expected_version).await?;
        if affected == 0 {
            return Err(RuleStoreError::OptimisticLock {
                uid: update.existing.uid.clone(),
                version: update.expected_version,
            });
        }
        debug!(org_id = update.new.org_id, rule_uid = %update.new.uid, version = update.new.version, "updated alert rule");
        history.push(AlertRuleVersion::snapshot(&update.new, update.existing.version, now));
        written[update.position] = Some(AlertRuleKeyWithId {
            key: update.new.key(),
            id: update.new.id,
        });
    }

    if !inserts.is_empty() {
        let rows = inserts
            .iter()
            .map(|(_, r)| AlertRuleRow::from_rule(r))
            .collect::<Result<Vec<_>>>()?;
        let ids: HashMap<AlertRuleKey, i64> = tx
            .insert_rules(&rows)
            .await?
            .into_iter()
            .map(|k| (k.key, k.id))
            .collect();
        for (position, mut rule) in inserts {
            rule.id = ids.get(&rule.key()).copied().ok_or_else(|| {
                RuleStoreError::Database(format!("insert returned no id for alert rule {}", rule.key()).into())
            })?;
            history.push(AlertRuleVersion::snapshot(&rule, 0, now));
            written[position] = Some(AlertRuleKeyWithId {
                key: rule.key(),
                id: rule.id,
            });
        }
    }

    let version_rows = history
        .iter()
        .map(AlertRuleVersionRow::from_version)
        .collect::<Result<Vec<_>>>()?;
    tx.insert_versions(&version_rows).await?;
    trim_history(tx, settings, &history).await?;

    let written: Vec<AlertRuleKeyWithId> = written.into_iter().flatten().collect();
    if !written.is_empty() {
        info!(
            org_id = written[0].key.org_id,
            count = written.len(),
            updated = updates.len(),
            "saved alert rules"
        );
    }
    Ok(written)
}

/// Delete rules and their history. With `keep_deleted` the newest version
/// of each rule stays behind as a trash row (empty `rule_uid`) it can be
/// recovered from.
pub async fn delete_rules(
    tx: &mut dyn RuleTransaction,
    org_id: i64,
    uids: &[String],
    keep_deleted: bool,
) -> Result<u64> {
    if uids.is_empty() {
        return Ok(0);
    }
    let trash = if keep_deleted {
        tx.latest_versions(org_id, uids).await?
    } else {
        Vec::new()
    };
    let deleted = tx.delete_rules(org_id, uids).await?;
    if !trash.is_empty() {
        let now = Utc::now();
        let rows: Vec<AlertRuleVersionRow> = trash
            .into_iter()
            .map(|mut v| {
                v.version_id = 0;
                v.rule.uid = String::new();
                v.created = now;
                v
            })
            .collect();
        tx.insert_versions(&rows).await?;
        debug!(org_id, kept = rows.len(), "moved deleted alert rules to trash");
    }
    info!(org_id, count = deleted, "deleted alert rules");
    Ok(deleted)
}

/// Dashboard stamping, validation and the write timestamp.
fn prepare(rule: &mut AlertRule, settings: &WriterSettings, now: DateTime<Utc>) -> Result<()> {
    if rule.dashboard_uid.is_none() {
        rule.dashboard_uid = rule.linked_dashboard_uid().map(str::to_string);
        if rule.dashboard_uid.is_some() && rule.panel_id.is_none() {
            rule.panel_id = rule.linked_panel_id();
        }
    }
    validate_alert_rule(rule, settings.base_interval_secs).into_result(rule)?;
    rule.updated = now;
    Ok(())
}

async fn generate_uid(
    tx: &mut dyn RuleTransaction,
    settings: &WriterSettings,
    rule: &AlertRule,
    claimed: &HashSet<AlertRuleKey>,
) -> Result<String> {
    for _ in 0..settings.uid_attempts {
        let candidate = (settings.uid_generator)();
        let key = AlertRuleKey {
            org_id: rule.org_id,
            uid: candidate.clone(),
        };
        if claimed.contains(&key) || tx.uid_exists(rule.org_id, &candidate).await? {
            debug!(org_id = rule.org_id, rule_uid = %candidate, "generated UID already taken");
            continue;
        }
        return Ok(candidate);
    }
    Err(RuleStoreError::FailedGenerateUniqueUid {
        org_id: rule.org_id,
        title: rule.title.clone(),
    })
}

/// Titles are unique per organization and checked statement by statement,
/// so a swap (A→B, B→A) or a chain of renames would collide half-way. When
/// any new title matches an existing one among the renamed rules, all of
/// them first move to a temporary title.
async fn prevent_intermediate_title_conflicts(
    tx: &mut dyn RuleTransaction,
    updates: &mut [PendingUpdate],
) -> Result<()> {
    let renamed: Vec<usize> = updates
        .iter()
        .enumerate()
        .filter(|(_, u)| u.existing.title != u.new.title)
        .map(|(i, _)| i)
        .collect();

    let existing_titles: HashSet<String> = renamed
        .iter()
        .map(|&i| updates[i].existing.title.to_lowercase())
        .collect();
    let overlap = renamed
        .iter()
        .any(|&i| existing_titles.contains(&updates[i].new.title.to_lowercase()));
    if !overlap {
        return Ok(());
    }
    debug!(updates = renamed.len(), "possible intermediate title conflict, applying temporary titles");

    for i in renamed {
        let update = &mut updates[i];
        let tmp = temporary_title(&update.existing.title, ALERT_RULE_MAX_TITLE_LENGTH);
        let key = AlertRuleKeyWithId {
            key: update.existing.key(),
            id: update.existing.id,
        };
        let affected = tx.update_title(&key, &tmp, update.expected_version).await?;
        if affected == 0 {
            return Err(RuleStoreError::OptimisticLock {
                uid: update.existing.uid.clone(),
                version: update.expected_version,
            });
        }
        update.expected_version += 1;
    }
    Ok(())
}

/// Keep at most `version_record_limit` history rows per written rule.
async fn trim_history(
    tx: &mut dyn RuleTransaction,
    settings: &WriterSettings,
    written: &[AlertRuleVersion],
) -> Result<()> {
    if settings.version_record_limit < 1 {
        return Ok(());
    }
    for version in written {
        let up_to = version.version() - settings.version_record_limit;
        if up_to < 1 {
            continue;
        }
        let deleted = tx.delete_versions_up_to(&version.rule.guid, up_to).await?;
        if deleted > 0 {
            info!(
                org_id = version.rule.org_id,
                rule_uid = %version.rule.uid,
                deleted,
                limit = settings.version_record_limit,
                "deleted old alert rule versions"
            );
        }
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use alertstore_core::{AlertQuery, ErrorKind, DASHBOARD_UID_ANNOTATION, PANEL_ID_ANNOTATION};

    use super::*;
    use crate::backend::{MemoryBackend, RuleBackend};
    use crate::json_cache::JsonDecodeCache;
    use crate::select::RuleSelect;

    fn rule(title: &str) -> AlertRule {
        AlertRule {
            org_id: 1,
            title: title.into(),
            condition: "A".into(),
            data: vec![AlertQuery {
                ref_id: "A".into(),
                datasource_uid: "prom".into(),
                ..Default::default()
            }],
            interval_seconds: 60,
            namespace_uid: "folder".into(),
            rule_group: "group".into(),
            rule_group_index: 1,
            ..Default::default()
        }
    }

    fn insert(new: AlertRule) -> UpsertRule {
        UpsertRule { existing: None, new }
    }

    fn update(existing: &AlertRule, change: impl FnOnce(&mut AlertRule)) -> UpsertRule {
        let mut new = existing.clone();
        change(&mut new);
        UpsertRule {
            existing: Some(existing.clone()),
            new,
        }
    }

    async fn write(
        backend: &MemoryBackend,
        settings: &WriterSettings,
        rules: Vec<UpsertRule>,
    ) -> Result<Vec<AlertRuleKeyWithId>> {
        let mut tx = backend.begin().await?;
        let keys = upsert_rules(tx.as_mut(), settings, rules).await?;
        tx.commit().await?;
        Ok(keys)
    }

    async fn load(backend: &MemoryBackend, uid: &str) -> AlertRule {
        let select = RuleSelect {
            rule_uids: vec![uid.to_string()],
            ..RuleSelect::org(1)
        };
        let row = backend.select_rules(&select).await.unwrap().remove(0);
        row.into_rule(&JsonDecodeCache::new(16)).unwrap()
    }

    async fn history(backend: &MemoryBackend, guid: &str) -> Vec<(i64, i64)> {
        backend
            .select_versions(1, guid)
            .await
            .unwrap()
            .into_iter()
            .map(|v| (v.rule.version, v.parent_version))
            .collect()
    }

    #[tokio::test]
    async fn insert_assigns_identity_and_first_version() {
        let backend = MemoryBackend::new();
        let keys = write(&backend, &WriterSettings::default(), vec![insert(rule("cpu"))])
            .await
            .unwrap();

        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key.uid.len(), crate::uid::SHORT_UID_LENGTH);
        let stored = load(&backend, &keys[0].key.uid).await;
        assert_eq!(stored.id, keys[0].id);
        assert_eq!(stored.version, 1);
        assert!(!stored.guid.is_empty());
        assert_eq!(history(&backend, &stored.guid).await, vec![(1, 0)]);
    }

    #[tokio::test]
    async fn updates_chain_history_by_parent_version() {
        let backend = MemoryBackend::new();
        let settings = WriterSettings::default();
        let uid = write(&backend, &settings, vec![insert(rule("cpu"))]).await.unwrap()[0]
            .key
            .uid
            .clone();

        for n in 0..2 {
            let current = load(&backend, &uid).await;
            write(&backend, &settings, vec![update(&current, |r| r.for_seconds = 60 * (n + 1))])
                .await
                .unwrap();
        }

        let stored = load(&backend, &uid).await;
        assert_eq!(stored.version, 3);
        assert_eq!(history(&backend, &stored.guid).await, vec![(3, 2), (2, 1), (1, 0)]);
    }

    #[tokio::test]
    async fn stale_update_is_rejected() {
        let backend = MemoryBackend::new();
        let settings = WriterSettings::default();
        let uid = write(&backend, &settings, vec![insert(rule("cpu"))]).await.unwrap()[0]
            .key
            .uid
            .clone();
        let read = load(&backend, &uid).await;

        write(&backend, &settings, vec![update(&read, |r| r.title = "first".into())])
            .await
            .unwrap();
        let err = write(&backend, &settings, vec![update(&read, |r| r.title = "second".into())])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::OptimisticLock);
        let stored = load(&backend, &uid).await;
        assert_eq!((stored.version, stored.title.as_str()), (2, "first"));
    }

    #[tokio::test]
    async fn uid_generation_gives_up_after_configured_attempts() {
        let backend = MemoryBackend::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let settings = WriterSettings {
            uid_attempts: 3,
            uid_generator: Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                "taken".to_string()
            }),
            ..WriterSettings::default()
        };
        let mut first = rule("first");
        first.uid = "taken".into();
        write(&backend, &settings, vec![insert(first)]).await.unwrap();

        let err = write(&backend, &settings, vec![insert(rule("second"))])
            .await
            .unwrap_err();
        assert!(matches!(err, RuleStoreError::FailedGenerateUniqueUid { org_id: 1, .. }));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn uids_claimed_earlier_in_the_batch_are_retried() {
        let backend = MemoryBackend::new();
        let sequence = ["dup", "dup", "fresh"];
        let next = Arc::new(AtomicUsize::new(0));
        let settings = WriterSettings {
            uid_generator: Arc::new(move || sequence[next.fetch_add(1, Ordering::SeqCst)].to_string()),
            ..WriterSettings::default()
        };

        let keys = write(&backend, &settings, vec![insert(rule("a")), insert(rule("b"))])
            .await
            .unwrap();
        let uids: Vec<&str> = keys.iter().map(|k| k.key.uid.as_str()).collect();
        assert_eq!(uids, vec!["dup", "fresh"]);
    }

    #[tokio::test]
    async fn swapped_titles_are_written_in_one_batch() {
        let backend = MemoryBackend::new();
        let settings = WriterSettings::default();
        let keys = write(&backend, &settings, vec![insert(rule("alpha")), insert(rule("beta"))])
            .await
            .unwrap();
        let a = load(&backend, &keys[0].key.uid).await;
        let b = load(&backend, &keys[1].key.uid).await;

        write(
            &backend,
            &settings,
            vec![
                update(&a, |r| r.title = "Beta".into()),
                update(&b, |r| r.title = "alpha".into()),
            ],
        )
        .await
        .unwrap();

        let a = load(&backend, &a.uid).await;
        let b = load(&backend, &b.uid).await;
        assert_eq!((a.title.as_str(), b.title.as_str()), ("Beta", "alpha"));
        // the temporary title consumed one version
        assert_eq!((a.version, b.version), (3, 3));
        assert_eq!(history(&backend, &a.guid).await, vec![(3, 1), (1, 0)]);
    }

    #[tokio::test]
    async fn retention_keeps_the_newest_versions() {
        let backend = MemoryBackend::new();
        let settings = WriterSettings {
            version_record_limit: 2,
            ..WriterSettings::default()
        };
        let uid = write(&backend, &settings, vec![insert(rule("cpu"))]).await.unwrap()[0]
            .key
            .uid
            .clone();
        for n in 1..=3 {
            let current = load(&backend, &uid).await;
            write(&backend, &settings, vec![update(&current, |r| r.for_seconds = n * 60)])
                .await
                .unwrap();
        }

        let stored = load(&backend, &uid).await;
        assert_eq!(stored.version, 4);
        assert_eq!(history(&backend, &stored.guid).await, vec![(4, 3), (3, 2)]);
    }

    #[tokio::test]
    async fn one_invalid_rule_aborts_the_batch() {
        let backend = MemoryBackend::new();
        let mut broken = rule("broken");
        broken.interval_seconds = 15;

        let err = write(&backend, &WriterSettings::default(), vec![insert(rule("ok")), insert(broken)])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(backend.select_rules(&RuleSelect::org(1)).await.unwrap().is_empty());
        assert_eq!(backend.version_rows().await, 0);
    }

    #[tokio::test]
    async fn dashboard_link_is_taken_from_annotations() {
        let backend = MemoryBackend::new();
        let mut linked = rule("panel alert");
        linked.annotations.insert(DASHBOARD_UID_ANNOTATION.into(), "dash".into());
        linked.annotations.insert(PANEL_ID_ANNOTATION.into(), "7".into());

        let keys = write(&backend, &WriterSettings::default(), vec![insert(linked)])
            .await
            .unwrap();
        let stored = load(&backend, &keys[0].key.uid).await;
        assert_eq!(stored.dashboard_uid.as_deref(), Some("dash"));
        assert_eq!(stored.panel_id, Some(7));
    }

    #[tokio::test]
    async fn deleting_nothing_is_a_no_op() {
        let backend = MemoryBackend::new();
        let mut tx = backend.begin().await.unwrap();
        assert_eq!(delete_rules(tx.as_mut(), 1, &[], true).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deleted_rules_leave_their_last_version_in_trash() {
        let backend = MemoryBackend::new();
        let settings = WriterSettings::default();
        let keys = write(&backend, &settings, vec![insert(rule("kept")), insert(rule("gone"))])
            .await
            .unwrap();
        let kept = load(&backend, &keys[0].key.uid).await;
        write(&backend, &settings, vec![update(&kept, |r| r.for_seconds = 120)])
            .await
            .unwrap();
        let gone = load(&backend, &keys[1].key.uid).await;

        let mut tx = backend.begin().await.unwrap();
        let uids = vec![kept.uid.clone()];
        assert_eq!(delete_rules(tx.as_mut(), 1, &uids, true).await.unwrap(), 1);
        assert_eq!(delete_rules(tx.as_mut(), 1, &[gone.uid.clone()], false).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let trash = backend.select_deleted_versions(1).await.unwrap();
        assert_eq!(trash.len(), 1);
        let row = &trash[0];
        assert_eq!((row.rule.guid.as_str(), row.rule.uid.as_str()), (kept.guid.as_str(), ""));
        assert_eq!((row.rule.version, row.parent_version), (2, 1));
        assert_eq!(row.rule.for_seconds, 120);
        assert!(history(&backend, &gone.guid).await.is_empty());
    }

    /// Forwards to the wrapped transaction but loses every assigned id.
    struct LosesInsertIds(Box<dyn RuleTransaction>);

    #[async_trait::async_trait]
    impl RuleTransaction for LosesInsertIds {
        async fn uid_exists(&mut self, org_id: i64, uid: &str) -> Result<bool> {
            self.0.uid_exists(org_id, uid).await
        }

        async fn insert_rules(&mut self, rows: &[AlertRuleRow]) -> Result<Vec<AlertRuleKeyWithId>> {
            self.0.insert_rules(rows).await?;
            Ok(Vec::new())
        }

        async fn update_rule(&mut self, row: &AlertRuleRow, expected_version: i64) -> Result<u64> {
            self.0.update_rule(row, expected_version).await
        }

        async fn update_title(
            &mut self,
            key: &AlertRuleKeyWithId,
            title: &str,
            expected_version: i64,
        ) -> Result<u64> {
            self.0.update_title(key, title, expected_version).await
        }

        async fn latest_versions(&mut self, org_id: i64, uids: &[String]) -> Result<Vec<AlertRuleVersionRow>> {
            self.0.latest_versions(org_id, uids).await
        }

        async fn delete_rules(&mut self, org_id: i64, uids: &[String]) -> Result<u64> {
            self.0.delete_rules(org_id, uids).await
        }

        async fn insert_versions(&mut self, rows: &[AlertRuleVersionRow]) -> Result<()> {
            self.0.insert_versions(rows).await
        }

        async fn delete_versions_up_to(&mut self, guid: &str, up_to: i64) -> Result<u64> {
            self.0.delete_versions_up_to(guid, up_to).await
        }

        async fn bump_versions(
            &mut self,
            org_id: i64,
            namespace_uids: &[String],
        ) -> Result<Vec<alertstore_core::AlertRuleKeyWithVersion>> {
            self.0.bump_versions(org_id, namespace_uids).await
        }

        async fn delete_trash_before(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
            self.0.delete_trash_before(cutoff).await
        }

        async fn delete_trash_by_guid(&mut self, org_id: i64, guid: &str) -> Result<u64> {
            self.0.delete_trash_by_guid(org_id, guid).await
        }

        async fn purge_org(&mut self, org_id: i64) -> Result<u64> {
            self.0.purge_org(org_id).await
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            self.0.commit().await
        }
    }

    #[tokio::test]
    async fn missing_insert_id_fails_the_write() {
        let backend = MemoryBackend::new();
        let mut tx = LosesInsertIds(backend.begin().await.unwrap());
        let err = upsert_rules(&mut tx, &WriterSettings::default(), vec![insert(rule("cpu"))])
            .await
            .unwrap_err();
        assert!(matches!(err, RuleStoreError::Database(_)));
        assert!(err.to_string().contains("insert returned no id"));
        drop(tx);
        assert_eq!(backend.count_rules(1).await.unwrap(), 0);
    }
}
