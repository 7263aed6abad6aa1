//! Persistence back-ends for alert rules.
//!
//! A [`RuleBackend`] serves reads and opens [`RuleTransaction`]s. The writer
//! performs every mutation through a transaction; dropping one without
//! calling [`RuleTransaction::commit`] discards all of its changes.

mod memory;
mod postgres;

pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;
pub(crate) use postgres::map_db_err as postgres_err;

use async_trait::async_trait;

use chrono::{DateTime, Utc};

use alertstore_core::{AlertRuleKeyWithId, AlertRuleKeyWithVersion, Result};

use crate::row::{AlertRuleRow, AlertRuleVersionRow};
use crate::select::RuleSelect;

#[async_trait]
pub trait RuleBackend: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn RuleTransaction>>;

    /// Rows matching `select`, in listing order.
    async fn select_rules(&self, select: &RuleSelect) -> Result<Vec<AlertRuleRow>>;

    /// Every row sharing namespace and group with rule `uid`, by group index.
    async fn select_group_by_rule_uid(&self, org_id: i64, uid: &str) -> Result<Vec<AlertRuleRow>>;

    /// History rows of one rule, newest first.
    async fn select_versions(&self, org_id: i64, guid: &str) -> Result<Vec<AlertRuleVersionRow>>;

    /// Number of rules in `org_id`, or in every organization when it is `0`.
    async fn count_rules(&self, org_id: i64) -> Result<i64>;

    /// Trash rows of an organization (history rows with an empty `rule_uid`),
    /// most recently deleted first.
    async fn select_deleted_versions(&self, org_id: i64) -> Result<Vec<AlertRuleVersionRow>>;

    /// Key and version of every rule outside `exclude_orgs`.
    async fn select_rule_keys(&self, exclude_orgs: &[i64]) -> Result<Vec<AlertRuleKeyWithVersion>>;
}

#[async_trait]
pub trait RuleTransaction: Send {
    async fn uid_exists(&mut self, org_id: i64, uid: &str) -> Result<bool>;

    /// Insert new rules; ids are assigned by the back-end.
    async fn insert_rules(&mut self, rows: &[AlertRuleRow]) -> Result<Vec<AlertRuleKeyWithId>>;

    /// Overwrite the row with `row.id` if its stored version is `expected_version`.
    /// Returns the number of rows changed (0 on a version mismatch).
    async fn update_rule(&mut self, row: &AlertRuleRow, expected_version: i64) -> Result<u64>;

    /// Set a new title and bump the version, under the same version check.
    async fn update_title(
        &mut self,
        key: &AlertRuleKeyWithId,
        title: &str,
        expected_version: i64,
    ) -> Result<u64>;

    /// Newest history row of every rule guid among `uids`.
    async fn latest_versions(&mut self, org_id: i64, uids: &[String]) -> Result<Vec<AlertRuleVersionRow>>;

    /// Delete rules and their history. Trash rows are kept.
    async fn delete_rules(&mut self, org_id: i64, uids: &[String]) -> Result<u64>;

    async fn insert_versions(&mut self, rows: &[AlertRuleVersionRow]) -> Result<()>;

    /// Drop history rows of rule `guid` with `version <= up_to`.
    async fn delete_versions_up_to(&mut self, guid: &str, up_to: i64) -> Result<u64>;

    /// Increment the version of every rule in the namespaces.
    async fn bump_versions(
        &mut self,
        org_id: i64,
        namespace_uids: &[String],
    ) -> Result<Vec<AlertRuleKeyWithVersion>>;

    /// Remove trash rows of every organization created at or before `cutoff`.
    async fn delete_trash_before(&mut self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn delete_trash_by_guid(&mut self, org_id: i64, guid: &str) -> Result<u64>;

    /// Remove every rule, history row and trash row of an organization.
    async fn purge_org(&mut self, org_id: i64) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
