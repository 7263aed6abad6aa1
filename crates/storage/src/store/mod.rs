//! `AlertRuleStore`: the repository facade over a [`RuleBackend`].
//!
//! Reads go through the SQL pre-filter and then the in-memory filter
//! engine; writes go through [`crate::writer`] in one transaction each and
//! drop the rule cache entry of every organization they touch.


use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use alertstore_core::config::AlertingConfig;
use alertstore_core::{
    AlertRule, AlertRuleKey, AlertRuleKeyWithId, AlertRuleKeyWithVersion, AlertRuleVersion,
    Config, FolderResolver, GetAlertRulesForSchedulingQuery, GetAlertRulesGroupByRuleUidQuery,
    GroupKey, ListAlertRulesByGroupQuery, ListAlertRulesExtendedQuery, ListAlertRulesQuery,
    NoopMetrics, NotificationSettings, Result, RuleGroupSummary, RuleReader, RuleStoreError, RuleTypeFilter, StoreMetrics, WriteOp,
    WriteOutcome,
};
use alertstore_rules::{apply_in_memory_filters, GroupDelta, RuleFilter};

use crate::backend::{PostgresBackend, RuleBackend, RuleTransaction};
use crate::cache::{LruCacheBackend, RuleCache};
use crate::dialect::Dialect;
use crate::json_cache::JsonDecodeCache;
use crate::lock::{HeldLock, NamedLock, NoopLock, PostgresLock};
use crate::metrics::RecorderMetrics;
use crate::row::AlertRuleRow;
use crate::select::{ContinueCursor, GroupCursor, RuleSelect};
use crate::writer::{self, UpsertRule, WriterSettings};

const DEFAULT_JSON_CACHE_CAPACITY: usize = 4096;

pub struct AlertRuleStore {
    backend: Arc<dyn RuleBackend>,
    cache: Option<RuleCache>,
    json: JsonDecodeCache,
    folders: Option<Arc<dyn FolderResolver>>,
    metrics: Arc<dyn StoreMetrics>,
    lock: Arc<dyn NamedLock>,
    alerting: AlertingConfig,
    writer: WriterSettings,
    timeout: Option<Duration>,
}

impl AlertRuleStore {
    /// A store without cache, folder resolver or metrics.
    pub fn new(backend: Arc<dyn RuleBackend>) -> Self {
        let alerting = AlertingConfig::default();
        Self {
            backend,
            cache: None,
            json: JsonDecodeCache::new(DEFAULT_JSON_CACHE_CAPACITY),
            folders: None,
            metrics: Arc::new(NoopMetrics),
            lock: Arc::new(NoopLock),
            writer: WriterSettings::from_config(&alerting),
            alerting,
            timeout: None,
        }
    }

    /// Connect to PostgreSQL and wire every collaborator from `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let dialect: Dialect = config
            .store
            .sql_dialect
            .parse()
            .map_err(RuleStoreError::Validation)?;
        if dialect != Dialect::Postgres {
            warn!(%dialect, "only the PostgreSQL back-end executes queries, using postgres");
        }

        let backend = PostgresBackend::connect(&config.postgres).await?;
        let lock = PostgresLock::new(backend.pool().clone());
        let metrics: Arc<dyn StoreMetrics> = Arc::new(RecorderMetrics);

        let mut store = Self::new(Arc::new(backend))
            .with_metrics(metrics.clone())
            .with_lock(Arc::new(lock))
            .with_alerting(config.alerting.clone())
            .with_json_capacity(config.cache.json_capacity)
            .with_timeout(config.store.query_timeout());
        if config.cache.enabled {
            store = store.with_cache(RuleCache::new(
                Arc::new(LruCacheBackend::new(config.cache.capacity)),
                config.cache.ttl(),
                metrics,
            ));
        }
        Ok(store)
    }

    pub fn with_cache(mut self, cache: RuleCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_folders(mut self, folders: Arc<dyn FolderResolver>) -> Self {
        self.folders = Some(folders);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn StoreMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_lock(mut self, lock: Arc<dyn NamedLock>) -> Self {
        self.lock = lock;
        self
    }

    /// Also resets the writer settings derived from `alerting`.
    pub fn with_alerting(mut self, alerting: AlertingConfig) -> Self {
        self.writer = WriterSettings::from_config(&alerting);
        self.alerting = alerting;
        self
    }

    pub fn with_writer_settings(mut self, writer: WriterSettings) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_json_capacity(mut self, capacity: usize) -> Self {
        self.json = JsonDecodeCache::new(capacity);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache(&self) -> Option<&RuleCache> {
        self.cache.as_ref()
    }

    // ── Writes ────────────────────────────────────────────────

    /// Insert and update rules in one transaction.
    pub async fn upsert_alert_rules(&self, rules: Vec<UpsertRule>) -> Result<Vec<AlertRuleKeyWithId>> {
        if rules.is_empty() {
            return Ok(Vec::new());
        }
        self.check_namespaces(rules.iter().map(|r| &r.new)).await?;

        let orgs: HashSet<i64> = rules.iter().map(|r| r.new.org_id).collect();
        let inserts = rules.iter().filter(|r| r.existing.is_none()).count();
        let updates = rules.len() - inserts;

        let result = self
            .within(async {
                let mut tx = self.backend.begin().await?;
                let keys = writer::upsert_rules(tx.as_mut(), &self.writer, rules).await?;
                tx.commit().await?;
                Ok(keys)
            })
            .await;

        self.report(WriteOp::Insert, inserts, &result);
        self.report(WriteOp::Update, updates, &result);
        self.invalidate(orgs).await;
        result
    }

    /// Apply a planned group change: deletes, then updates, then inserts.
    pub async fn apply_group_delta(&self, delta: GroupDelta) -> Result<()> {
        if delta.is_empty() {
            debug!(group = %delta.group_key, "group delta is empty, nothing to apply");
            return Ok(());
        }
        let orgs = delta.touched_orgs();
        let group = delta.group_key.clone();
        let (deletes, updates, inserts) = (delta.delete.len(), delta.update.len(), delta.new.len());

        let mut by_org: BTreeMap<i64, Vec<String>> = BTreeMap::new();
        for rule in &delta.delete {
            by_org.entry(rule.org_id).or_default().push(rule.uid.clone());
        }
        let upserts: Vec<UpsertRule> = delta
            .update
            .into_iter()
            .map(|d| UpsertRule {
                existing: Some(d.existing),
                new: d.new,
            })
            .chain(delta.new.into_iter().map(|new| UpsertRule { existing: None, new }))
            .collect();
        self.check_namespaces(upserts.iter().map(|r| &r.new)).await?;

        let result = self
            .within(async {
                let mut tx = self.backend.begin().await?;
                for (org_id, uids) in &by_org {
                    writer::delete_rules(tx.as_mut(), *org_id, uids, self.keeps_deleted()).await?;
                }
                if !upserts.is_empty() {
                    writer::upsert_rules(tx.as_mut(), &self.writer, upserts).await?;
                }
                tx.commit().await
            })
            .await;

        self.report(WriteOp::Delete, deletes, &result);
        self.report(WriteOp::Update, updates, &result);
        self.report(WriteOp::Insert, inserts, &result);
        self.invalidate(orgs).await;
        if result.is_ok() {
            info!(%group, deletes, updates, inserts, "applied rule group changes");
        }
        result
    }

    /// Delete rules and their history. An empty list is a no-op.
    ///
    /// Unless `permanently` is set and while a deleted-rule retention is
    /// configured, the last version of each rule is kept in the trash.
    pub async fn delete_alert_rules_by_uid(&self, org_id: i64, uids: &[String], permanently: bool) -> Result<u64> {
        if uids.is_empty() {
            return Ok(0);
        }
        let keep_deleted = !permanently && self.keeps_deleted();
        let result = self
            .within(async {
                let mut tx = self.backend.begin().await?;
                let deleted = writer::delete_rules(tx.as_mut(), org_id, uids, keep_deleted).await?;
                tx.commit().await?;
                Ok(deleted)
            })
            .await;
        self.report(WriteOp::Delete, uids.len(), &result);
        self.invalidate([org_id]).await;
        result
    }

    /// Drop trash rows older than the configured retention, in every
    /// organization. Without a retention the whole trash is emptied.
    pub async fn clean_up_deleted_alert_rules(&self) -> Result<u64> {
        let retention = self.alerting.deleted_rule_retention().unwrap_or_default();
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(retention).map_err(|e| RuleStoreError::Validation(e.to_string()))?;
        let deleted = self
            .within(async {
                let mut tx = self.backend.begin().await?;
                let deleted = tx.delete_trash_before(cutoff).await?;
                tx.commit().await?;
                Ok(deleted)
            })
            .await?;
        if deleted > 0 {
            info!(deleted, %cutoff, "cleaned up deleted alert rules");
        }
        Ok(deleted)
    }

    /// Remove one rule from the trash for good.
    pub async fn delete_rule_from_trash_by_guid(&self, org_id: i64, guid: &str) -> Result<u64> {
        let deleted = self
            .within(async {
                let mut tx = self.backend.begin().await?;
                let deleted = tx.delete_trash_by_guid(org_id, guid).await?;
                tx.commit().await?;
                Ok(deleted)
            })
            .await?;
        debug!(org_id, guid, deleted, "deleted alert rule from trash");
        Ok(deleted)
    }

    /// Bump the version of every rule in `namespace_uids` so schedulers reload them.
    pub async fn increase_version_for_all_rules_in_namespaces(
        &self,
        org_id: i64,
        namespace_uids: &[String],
    ) -> Result<Vec<AlertRuleKeyWithVersion>> {
        if namespace_uids.is_empty() {
            return Ok(Vec::new());
        }
        let result = self
            .within(async {
                let mut tx = self.backend.begin().await?;
                let bumped = tx.bump_versions(org_id, namespace_uids).await?;
                tx.commit().await?;
                Ok(bumped)
            })
            .await;
        self.invalidate([org_id]).await;
        let bumped = result?;
        info!(org_id, count = bumped.len(), namespaces = namespace_uids.len(), "increased alert rule versions");
        Ok(bumped)
    }

    /// Delete every rule and history row of an organization.
    pub async fn purge_org(&self, org_id: i64) -> Result<u64> {
        let lock_name = format!("alert-rule-purge-{org_id}");
        let held = self.lock.try_acquire(&lock_name).await?;

        let result = self
            .within(async {
                let mut tx = self.backend.begin().await?;
                let deleted = tx.purge_org(org_id).await?;
                tx.commit().await?;
                Ok(deleted)
            })
            .await;
        let released = held.release().await;
        self.invalidate([org_id]).await;

        let deleted = result?;
        released?;
        info!(org_id, deleted, "purged organization alert rules");
        Ok(deleted)
    }

    /// Point every notification setting using receiver `old` at `new`.
    ///
    /// Goes through the writer, so each affected rule gets a new version.
    /// With `dry_run` only the affected keys are returned.
    pub async fn rename_receiver_in_notification_settings(
        &self,
        org_id: i64,
        old: &str,
        new: &str,
        dry_run: bool,
    ) -> Result<Vec<AlertRuleKey>> {
        let select = RuleSelect {
            receiver_name: Some(old.to_string()),
            ..RuleSelect::org(org_id)
        };
        let keys = self
            .rewrite_notification_settings(select, dry_run, |settings| {
                if settings.receiver != old {
                    return false;
                }
                settings.receiver = new.to_string();
                true
            })
            .await?;
        info!(org_id, old, new, dry_run, count = keys.len(), "renamed receiver in alert rules");
        Ok(keys)
    }

    /// Replace time interval `old` with `new` in the mute and active
    /// intervals of every notification setting.
    pub async fn rename_time_interval_in_notification_settings(
        &self,
        org_id: i64,
        old: &str,
        new: &str,
        dry_run: bool,
    ) -> Result<Vec<AlertRuleKey>> {
        let select = RuleSelect {
            time_interval_name: Some(old.to_string()),
            ..RuleSelect::org(org_id)
        };
        let keys = self
            .rewrite_notification_settings(select, dry_run, |settings| {
                let mut changed = false;
                for name in settings
                    .mute_time_intervals
                    .iter_mut()
                    .chain(settings.active_time_intervals.iter_mut())
                {
                    if name.as_str() == old {
                        *name = new.to_string();
                        changed = true;
                    }
                }
                changed
            })
            .await?;
        info!(org_id, old, new, dry_run, count = keys.len(), "renamed time interval in alert rules");
        Ok(keys)
    }

    /// Apply `rewrite` to the notification settings of the rules `select`
    /// finds and write back those it changed.
    async fn rewrite_notification_settings(
        &self,
        select: RuleSelect,
        dry_run: bool,
        rewrite: impl Fn(&mut NotificationSettings) -> bool,
    ) -> Result<Vec<AlertRuleKey>> {
        let rows = self.backend.select_rules(&select).await?;
        let upserts: Vec<UpsertRule> = self
            .decode_rows(rows)
            .into_iter()
            .filter_map(|existing| {
                let mut renamed = existing.clone();
                let mut changed = false;
                for settings in &mut renamed.notification_settings {
                    changed |= rewrite(settings);
                }
                changed.then_some(UpsertRule {
                    existing: Some(existing),
                    new: renamed,
                })
            })
            .collect();
        if dry_run || upserts.is_empty() {
            return Ok(upserts.iter().map(|u| u.new.key()).collect());
        }
        let keys = self.upsert_alert_rules(upserts).await?;
        Ok(keys.into_iter().map(|k| k.key).collect())
    }

    // ── Reads ─────────────────────────────────────────────────

    /// Every rule of an organization, served from the cache when possible.
    pub async fn get_org_alert_rules(&self, org_id: i64, rule_type: RuleTypeFilter) -> Result<Vec<AlertRule>> {
        if let Some(cache) = &self.cache {
            if let Some(rules) = cache.get(org_id, rule_type).await {
                return Ok(rules);
            }
        }
        let rows = self.backend.select_rules(&RuleSelect::org(org_id)).await?;
        let rules = self.decode_rows(rows);
        if let Some(cache) = &self.cache {
            cache.set(org_id, rule_type, &rules, None).await;
        }
        Ok(rules.into_iter().filter(|r| rule_type.matches(r)).collect())
    }

    /// Filtered listing; see [`AlertRuleStore::list_alert_rules_paginated`].
    pub async fn get_alert_rules(
        &self,
        query: &ListAlertRulesExtendedQuery,
    ) -> Result<(Vec<AlertRule>, Option<String>)> {
        self.list_alert_rules_paginated(query).await
    }

    /// Rules matching `query` ordered by `(namespace, group, index, id)`.
    ///
    /// With `limit > 0` at most `limit` rules are returned together with a
    /// continue token when more rows follow. Rows the in-memory filter
    /// removes do not count towards the page.
    pub async fn list_alert_rules_paginated(
        &self,
        query: &ListAlertRulesExtendedQuery,
    ) -> Result<(Vec<AlertRule>, Option<String>)> {
        let mut select = RuleSelect::from_query(query)?;
        let limit = query.limit;

        if limit <= 0 {
            let rows = self.backend.select_rules(&select).await?;
            return Ok((apply_in_memory_filters(self.decode_rows(rows), query), None));
        }

        let filter = RuleFilter::new(query);
        let mut page: Vec<AlertRule> = Vec::new();
        loop {
            select.limit = Some(limit + 1);
            let rows = self.backend.select_rules(&select).await?;
            let fetched = rows.len() as i64;
            let last = rows.last().map(cursor_of);
            debug!(org_id = query.base.org_id, fetched, kept = page.len(), "fetched rule page batch");

            for rule in self.decode_rows(rows) {
                if page.len() as i64 == limit {
                    let token = page.last().map(ContinueCursor::after);
                    return Ok((page, token.map(|c| c.encode()).transpose()?));
                }
                if filter.matches(&rule) {
                    page.push(rule);
                }
            }
            match last {
                Some(cursor) if fetched > limit => select.after = Some(cursor),
                _ => return Ok((page, None)),
            }
        }
    }

    /// Rules matching `query`, paged by whole rule groups.
    ///
    /// Groups are counted on the SQL result, before the per-rule filters
    /// run, so a page may hold fewer than `group_limit` non-empty groups.
    pub async fn list_alert_rules_by_group(
        &self,
        query: &ListAlertRulesByGroupQuery,
    ) -> Result<(Vec<AlertRule>, Option<String>)> {
        let after = match query.group_continue_token.as_deref() {
            Some(token) if !token.is_empty() => match GroupCursor::decode(token) {
                Ok(cursor) => Some(cursor),
                Err(e) => {
                    warn!(org_id = query.base.org_id, error = %e, "invalid group continue token, starting from the first group");
                    None
                }
            },
            _ => None,
        };
        let select = RuleSelect::from_group_query(query, after);
        let mut rows = self.backend.select_rules(&select).await?;

        let mut groups = 0;
        let mut next: Option<GroupCursor> = None;
        let mut cut = rows.len();
        let mut current: Option<(String, String)> = None;
        for (i, row) in rows.iter().enumerate() {
            if current
                .as_ref()
                .is_some_and(|(ns, group)| *ns == row.namespace_uid && *group == row.rule_group)
            {
                continue;
            }
            if query.group_limit > 0 && groups == query.group_limit {
                next = current.take().map(|(namespace_uid, rule_group)| GroupCursor {
                    namespace_uid,
                    rule_group,
                });
                cut = i;
                break;
            }
            groups += 1;
            current = Some((row.namespace_uid.clone(), row.rule_group.clone()));
        }
        rows.truncate(cut);
        debug!(org_id = query.base.org_id, groups, more = next.is_some(), "fetched rule groups page");

        let rules = apply_in_memory_filters(self.decode_rows(rows), &query.rule_criteria());
        Ok((rules, next.map(|c| c.encode()).transpose()?))
    }

    /// Key and version of every rule in an enabled organization.
    pub async fn get_alert_rules_keys_for_scheduling(&self) -> Result<Vec<AlertRuleKeyWithVersion>> {
        let exclude: Vec<i64> = self.alerting.disabled_orgs.iter().copied().collect();
        self.backend.select_rule_keys(&exclude).await
    }

    /// Trashed rules of an organization, most recently deleted first. The
    /// rules carry an empty UID; their GUID identifies them.
    pub async fn list_deleted_rules(&self, org_id: i64) -> Result<Vec<AlertRule>> {
        let rows = self.backend.select_deleted_versions(org_id).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let (guid, version_id) = (row.rule.guid.clone(), row.version_id);
                match row.into_version(&self.json) {
                    Ok(version) => Some(version.rule),
                    Err(e) => {
                        error!(org_id, guid, version_id, error = %e, "invalid deleted alert rule, skipping");
                        None
                    }
                }
            })
            .collect())
    }

    /// Rules of every enabled organization for the evaluation scheduler.
    pub async fn get_alert_rules_for_scheduling(&self, query: &mut GetAlertRulesForSchedulingQuery) -> Result<()> {
        let select = RuleSelect {
            exclude_orgs: self.alerting.disabled_orgs.iter().copied().collect(),
            rule_groups: query.rule_groups.clone(),
            ..RuleSelect::org(0)
        };
        let rows = self.backend.select_rules(&select).await?;
        let mut rules = self.decode_rows(rows);
        // the database collation may be case-insensitive
        if !query.rule_groups.is_empty() {
            rules.retain(|r| query.rule_groups.contains(&r.rule_group));
        }

        query.result_folder_titles.clear();
        if query.populate_folders {
            match &self.folders {
                Some(folders) => {
                    let mut namespaces: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
                    for rule in &rules {
                        namespaces
                            .entry(rule.org_id)
                            .or_default()
                            .insert(rule.namespace_uid.clone());
                    }
                    for (org_id, uids) in namespaces {
                        let uids: Vec<String> = uids.into_iter().collect();
                        for (uid, path) in folders.full_paths(org_id, &uids).await? {
                            query.result_folder_titles.insert((org_id, uid), path);
                        }
                    }
                }
                None => warn!("folder titles requested but no folder resolver is configured"),
            }
        }

        debug!(
            count = rules.len(),
            folders = query.result_folder_titles.len(),
            disabled_orgs = self.alerting.disabled_orgs.len(),
            "loaded alert rules for scheduling"
        );
        query.result_rules = rules;
        Ok(())
    }

    /// Distinct rule groups of an organization, ordered by namespace and name.
    pub async fn get_org_rule_groups(&self, org_id: i64, namespace_uids: &[String]) -> Result<Vec<RuleGroupSummary>> {
        let select = RuleSelect {
            namespace_uids: namespace_uids.to_vec(),
            ..RuleSelect::org(org_id)
        };
        let rows = self.backend.select_rules(&select).await?;

        let mut groups: BTreeMap<GroupKey, RuleGroupSummary> = BTreeMap::new();
        for rule in self.decode_rows(rows) {
            let key = rule.group_key();
            groups
                .entry(key.clone())
                .and_modify(|g| g.rule_count += 1)
                .or_insert(RuleGroupSummary {
                    key,
                    interval_seconds: rule.interval_seconds,
                    rule_count: 1,
                });
        }
        Ok(groups.into_values().collect())
    }

    pub async fn get_alert_rule_by_uid(&self, org_id: i64, uid: &str) -> Result<AlertRule> {
        let select = RuleSelect {
            rule_uids: vec![uid.to_string()],
            ..RuleSelect::org(org_id)
        };
        let rows = self.backend.select_rules(&select).await?;
        self.decode_rows(rows).into_iter().next().ok_or_else(|| {
            RuleStoreError::NotFound(format!("alert rule {uid} in organization {org_id}"))
        })
    }

    /// History of a rule, newest first. A snapshot whose rule definition equals
    /// the one before it is left out.
    pub async fn get_alert_rule_versions(&self, org_id: i64, guid: &str) -> Result<Vec<AlertRuleVersion>> {
        let rows = self.backend.select_versions(org_id, guid).await?;

        let mut kept: Vec<AlertRuleVersion> = Vec::with_capacity(rows.len());
        for row in rows.into_iter().rev() {
            let version_id = row.version_id;
            let version = match row.into_version(&self.json) {
                Ok(version) => version,
                Err(e) => {
                    error!(org_id, guid, version_id, error = %e, "invalid alert rule version, skipping");
                    continue;
                }
            };
            if kept.last().is_some_and(|prev| prev.equal_spec(&version)) {
                continue;
            }
            kept.push(version);
        }
        kept.reverse();
        Ok(kept)
    }

    /// Number of rules in `org_id`; `0` counts every organization.
    pub async fn count(&self, org_id: i64) -> Result<i64> {
        self.backend.count_rules(org_id).await
    }

    pub async fn get_rule_group_interval(&self, org_id: i64, namespace_uid: &str, group: &str) -> Result<i64> {
        let select = RuleSelect {
            namespace_uids: vec![namespace_uid.to_string()],
            rule_groups: vec![group.to_string()],
            limit: Some(1),
            ..RuleSelect::org(org_id)
        };
        let rows = self.backend.select_rules(&select).await?;
        rows.first().map(|r| r.interval_seconds).ok_or_else(|| {
            RuleStoreError::NotFound(format!(
                "rule group {group} in namespace {namespace_uid} of organization {org_id}"
            ))
        })
    }

    /// Namespace of each known rule UID.
    pub async fn get_namespaces_by_rule_uid(&self, org_id: i64, uids: &[String]) -> Result<HashMap<String, String>> {
        if uids.is_empty() {
            return Ok(HashMap::new());
        }
        let select = RuleSelect {
            rule_uids: uids.to_vec(),
            ..RuleSelect::org(org_id)
        };
        let rows = self.backend.select_rules(&select).await?;
        Ok(rows.into_iter().map(|r| (r.uid, r.namespace_uid)).collect())
    }

    // ── Helpers ───────────────────────────────────────────────

    fn keeps_deleted(&self) -> bool {
        self.alerting.deleted_rule_retention().is_some()
    }

    /// Decode rows, skipping those whose JSON columns are corrupt.
    fn decode_rows(&self, rows: Vec<AlertRuleRow>) -> Vec<AlertRule> {
        rows.into_iter()
            .filter_map(|row| {
                let (org_id, uid) = (row.org_id, row.uid.clone());
                match row.into_rule(&self.json) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        error!(org_id, rule_uid = %uid, error = %e, "invalid alert rule in database, skipping");
                        None
                    }
                }
            })
            .collect()
    }

    /// Run `fut` under the configured deadline.
    async fn within<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
                warn!(timeout_ms = limit.as_millis() as u64, "alert rule store operation timed out");
                Err(RuleStoreError::Canceled)
            }),
            None => fut.await,
        }
    }

    /// Namespaces of written rules must exist when a folder resolver is set.
    async fn check_namespaces<'a>(&self, rules: impl Iterator<Item = &'a AlertRule>) -> Result<()> {
        let Some(folders) = &self.folders else {
            return Ok(());
        };
        let namespaces: BTreeSet<(i64, &str)> =
            rules.map(|r| (r.org_id, r.namespace_uid.as_str())).collect();
        for (org_id, uid) in namespaces {
            if !folders.folder_exists(org_id, uid).await? {
                return Err(RuleStoreError::NotFound(format!(
                    "folder {uid} in organization {org_id}"
                )));
            }
        }
        Ok(())
    }

    fn report<T>(&self, op: WriteOp, count: usize, result: &Result<T>) {
        if count > 0 {
            self.metrics.write_outcome(op, WriteOutcome::of(result));
        }
    }

    async fn invalidate(&self, orgs: impl IntoIterator<Item = i64>) {
        if let Some(cache) = &self.cache {
            for org_id in orgs {
                cache.invalidate(org_id).await;
            }
        }
    }
}

fn cursor_of(row: &AlertRuleRow) -> ContinueCursor {
    ContinueCursor {
        namespace_uid: row.namespace_uid.clone(),
        rule_group: row.rule_group.clone(),
        rule_group_idx: i64::from(row.rule_group_idx),
        id: row.id,
    }
}

#[async_trait]
impl RuleReader for AlertRuleStore {
    async fn list_alert_rules(&self, query: &ListAlertRulesQuery) -> Result<Vec<AlertRule>> {
        let (rules, _) = self
            .list_alert_rules_paginated(&query.clone().into())
            .await?;
        Ok(rules)
    }

    async fn get_alert_rules_group_by_rule_uid(
        &self,
        query: &GetAlertRulesGroupByRuleUidQuery,
    ) -> Result<Vec<AlertRule>> {
        let rows = self
            .backend
            .select_group_by_rule_uid(query.org_id, &query.uid)
            .await?;
        Ok(self.decode_rows(rows))
    }
}
