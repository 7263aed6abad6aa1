use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use tracing::{debug, error, info};

use alertstore_core::config::PostgresConfig;
use alertstore_core::{
    AlertRuleKey, AlertRuleKeyWithId, AlertRuleKeyWithVersion, Result, RuleStoreError,
};

use super::{RuleBackend, RuleTransaction};
use crate::dialect::{Dialect, SqlArg};
use crate::row::{rule_columns, AlertRuleRow, AlertRuleVersionRow, VERSION_SELECT};
use crate::select::RuleSelect;

/// PostgreSQL back-end over a shared [`PgPool`].
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the `PG_*` settings.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.connection_string())
            .await
            .map_err(map_db_err)?;
        info!("PostgreSQL connected: {}", config.host);
        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RuleStoreError::Database(Box::new(e)))?;
        info!("Database migrations applied successfully");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn map_db_err(e: sqlx::Error) -> RuleStoreError {
    RuleStoreError::Database(Box::new(e))
}

/// Classify a write error. Unique violations become `UniqueConstraint`.
fn map_write_err(e: sqlx::Error, org_id: i64, uid: &str) -> RuleStoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            return RuleStoreError::UniqueConstraint {
                org_id,
                uid: uid.to_string(),
                source: Box::new(e),
            };
        }
    }
    error!(org_id, rule_uid = %uid, "alert rule write failed: {}", e);
    map_db_err(e)
}

/// Bind a dynamic argument list onto a `query_as`.
macro_rules! bind_args {
    ($query:expr, $args:expr) => {{
        let mut q = $query;
        for arg in $args {
            q = match arg {
                SqlArg::Int(v) => q.bind(v),
                SqlArg::Text(v) => q.bind(v),
            };
        }
        q
    }};
}

#[async_trait]
impl RuleBackend for PostgresBackend {
    async fn begin(&self) -> Result<Box<dyn RuleTransaction>> {
        let tx = self.pool.begin().await.map_err(map_db_err)?;
        Ok(Box::new(PgRuleTransaction { tx }))
    }

    async fn select_rules(&self, select: &RuleSelect) -> Result<Vec<AlertRuleRow>> {
        let p = select.to_dialect_sql(Dialect::Postgres);
        debug!(sql = %p.sql, args = p.args.len(), "selecting alert rules");

        let query = bind_args!(sqlx::query_as::<_, AlertRuleRow>(&p.sql), p.args);
        let mut stream = query.fetch(&self.pool);
        let mut rows = Vec::new();
        while let Some(row) = stream.try_next().await.map_err(map_db_err)? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn select_group_by_rule_uid(&self, org_id: i64, uid: &str) -> Result<Vec<AlertRuleRow>> {
        let sql = format!(
            "SELECT {} FROM alert_rule a \
             JOIN alert_rule b ON a.org_id = b.org_id \
              AND a.namespace_uid = b.namespace_uid AND a.rule_group = b.rule_group \
             WHERE b.org_id = $1 AND b.uid = $2 \
             ORDER BY a.rule_group_idx, a.id",
            rule_columns("a")
        );
        sqlx::query_as::<_, AlertRuleRow>(&sql)
            .bind(org_id)
            .bind(uid)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn select_versions(&self, org_id: i64, guid: &str) -> Result<Vec<AlertRuleVersionRow>> {
        let sql = format!(
            "SELECT {VERSION_SELECT} FROM alert_rule_version \
             WHERE rule_org_id = $1 AND rule_guid = $2 ORDER BY id DESC"
        );
        sqlx::query_as::<_, AlertRuleVersionRow>(&sql)
            .bind(org_id)
            .bind(guid)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn count_rules(&self, org_id: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM alert_rule WHERE ($1 = 0 OR org_id = $1)",
        )
        .bind(org_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)
    }

    async fn select_deleted_versions(&self, org_id: i64) -> Result<Vec<AlertRuleVersionRow>> {
        let sql = format!(
            "SELECT {VERSION_SELECT} FROM alert_rule_version \
             WHERE rule_org_id = $1 AND rule_uid = '' ORDER BY created DESC, id DESC"
        );
        sqlx::query_as::<_, AlertRuleVersionRow>(&sql)
            .bind(org_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn select_rule_keys(&self, exclude_orgs: &[i64]) -> Result<Vec<AlertRuleKeyWithVersion>> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            "SELECT org_id, uid, version FROM alert_rule WHERE NOT (org_id = ANY($1))",
        )
        .bind(exclude_orgs)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(rows
            .into_iter()
            .map(|(org_id, uid, version)| AlertRuleKeyWithVersion {
                key: AlertRuleKey { org_id, uid },
                version,
            })
            .collect())
    }
}

struct PgRuleTransaction {
    tx: Transaction<'static, Postgres>,
}

/// Columns written by inserts, in [`AlertRuleRow`] order after `id`.
const INSERT_COLUMNS: &str = "guid, org_id, uid, title, condition, data, updated, interval_seconds, \
     version, namespace_uid, rule_group, rule_group_idx, dashboard_uid, panel_id, no_data_state, \
     exec_err_state, for_seconds, keep_firing_for_seconds, annotations, labels, is_paused, record, \
     notification_settings, metadata, missing_series_evals_to_resolve";

#[async_trait]
impl RuleTransaction for PgRuleTransaction {
    async fn uid_exists(&mut self, org_id: i64, uid: &str) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM alert_rule WHERE org_id = $1 AND uid = $2)",
        )
        .bind(org_id)
        .bind(uid)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_err)
    }

    async fn insert_rules(&mut self, rows: &[AlertRuleRow]) -> Result<Vec<AlertRuleKeyWithId>> {
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO alert_rule ({INSERT_COLUMNS}) "));
        qb.push_values(rows, |mut b, r| {
            b.push_bind(&r.guid)
                .push_bind(r.org_id)
                .push_bind(&r.uid)
                .push_bind(&r.title)
                .push_bind(&r.condition)
                .push_bind(&r.data)
                .push_bind(r.updated)
                .push_bind(r.interval_seconds)
                .push_bind(r.version)
                .push_bind(&r.namespace_uid)
                .push_bind(&r.rule_group)
                .push_bind(r.rule_group_idx)
                .push_bind(&r.dashboard_uid)
                .push_bind(r.panel_id)
                .push_bind(&r.no_data_state)
                .push_bind(&r.exec_err_state)
                .push_bind(r.for_seconds)
                .push_bind(r.keep_firing_for_seconds)
                .push_bind(&r.annotations)
                .push_bind(&r.labels)
                .push_bind(r.is_paused)
                .push_bind(&r.record)
                .push_bind(&r.notification_settings)
                .push_bind(&r.metadata)
                .push_bind(r.missing_series_evals_to_resolve);
        });
        qb.push(" RETURNING id, org_id, uid");

        let uids: Vec<&str> = rows.iter().map(|r| r.uid.as_str()).collect();
        let returned: Vec<(i64, i64, String)> = qb
            .build_query_as()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_write_err(e, first.org_id, &uids.join(",")))?;

        Ok(returned
            .into_iter()
            .map(|(id, org_id, uid)| AlertRuleKeyWithId {
                key: AlertRuleKey { org_id, uid },
                id,
            })
            .collect())
    }

    async fn update_rule(&mut self, r: &AlertRuleRow, expected_version: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE alert_rule SET title = $1, condition = $2, data = $3, updated = $4, \
             interval_seconds = $5, version = $6, namespace_uid = $7, rule_group = $8, \
             rule_group_idx = $9, dashboard_uid = $10, panel_id = $11, no_data_state = $12, \
             exec_err_state = $13, for_seconds = $14, keep_firing_for_seconds = $15, \
             annotations = $16, labels = $17, is_paused = $18, record = $19, \
             notification_settings = $20, metadata = $21, missing_series_evals_to_resolve = $22 \
             WHERE id = $23 AND version = $24",
        )
        .bind(&r.title)
        .bind(&r.condition)
        .bind(&r.data)
        .bind(r.updated)
        .bind(r.interval_seconds)
        .bind(r.version)
        .bind(&r.namespace_uid)
        .bind(&r.rule_group)
        .bind(r.rule_group_idx)
        .bind(&r.dashboard_uid)
        .bind(r.panel_id)
        .bind(&r.no_data_state)
        .bind(&r.exec_err_state)
        .bind(r.for_seconds)
        .bind(r.keep_firing_for_seconds)
        .bind(&r.annotations)
        .bind(&r.labels)
        .bind(r.is_paused)
        .bind(&r.record)
        .bind(&r.notification_settings)
        .bind(&r.metadata)
        .bind(r.missing_series_evals_to_resolve)
        .bind(r.id)
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_err(e, r.org_id, &r.uid))?;
        Ok(result.rows_affected())
    }

    async fn update_title(
        &mut self,
        key: &AlertRuleKeyWithId,
        title: &str,
        expected_version: i64,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE alert_rule SET title = $1, version = version + 1 WHERE id = $2 AND version = $3",
        )
        .bind(title)
        .bind(key.id)
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_err(e, key.key.org_id, &key.key.uid))?;
        Ok(result.rows_affected())
    }

    async fn latest_versions(&mut self, org_id: i64, uids: &[String]) -> Result<Vec<AlertRuleVersionRow>> {
        let sql = format!(
            "SELECT {VERSION_SELECT} FROM alert_rule_version WHERE id IN ( \
               SELECT MAX(id) FROM alert_rule_version \
               WHERE rule_org_id = $1 AND rule_uid = ANY($2) GROUP BY rule_guid)"
        );
        sqlx::query_as::<_, AlertRuleVersionRow>(&sql)
            .bind(org_id)
            .bind(uids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_db_err)
    }

    async fn delete_rules(&mut self, org_id: i64, uids: &[String]) -> Result<u64> {
        sqlx::query("DELETE FROM alert_rule_version WHERE rule_org_id = $1 AND rule_uid = ANY($2)")
            .bind(org_id)
            .bind(uids)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_err)?;
        let result = sqlx::query("DELETE FROM alert_rule WHERE org_id = $1 AND uid = ANY($2)")
            .bind(org_id)
            .bind(uids)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected())
    }

    async fn insert_versions(&mut self, rows: &[AlertRuleVersionRow]) -> Result<()> {
        let Some(first) = rows.first() else {
            return Ok(());
        };
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO alert_rule_version (rule_id, rule_guid, rule_org_id, rule_uid, \
             rule_namespace_uid, rule_group, rule_group_idx, parent_version, restored_from, \
             version, created, title, condition, data, interval_seconds, dashboard_uid, panel_id, \
             no_data_state, exec_err_state, for_seconds, keep_firing_for_seconds, annotations, \
             labels, is_paused, record, notification_settings, metadata, \
             missing_series_evals_to_resolve) ",
        );
        qb.push_values(rows, |mut b, v| {
            let r = &v.rule;
            b.push_bind(r.id)
                .push_bind(&r.guid)
                .push_bind(r.org_id)
                .push_bind(&r.uid)
                .push_bind(&r.namespace_uid)
                .push_bind(&r.rule_group)
                .push_bind(r.rule_group_idx)
                .push_bind(v.parent_version)
                .push_bind(v.restored_from)
                .push_bind(r.version)
                .push_bind(v.created)
                .push_bind(&r.title)
                .push_bind(&r.condition)
                .push_bind(&r.data)
                .push_bind(r.interval_seconds)
                .push_bind(&r.dashboard_uid)
                .push_bind(r.panel_id)
                .push_bind(&r.no_data_state)
                .push_bind(&r.exec_err_state)
                .push_bind(r.for_seconds)
                .push_bind(r.keep_firing_for_seconds)
                .push_bind(&r.annotations)
                .push_bind(&r.labels)
                .push_bind(r.is_paused)
                .push_bind(&r.record)
                .push_bind(&r.notification_settings)
                .push_bind(&r.metadata)
                .push_bind(r.missing_series_evals_to_resolve);
        });
        qb.build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_write_err(e, first.rule.org_id, &first.rule.uid))?;
        Ok(())
    }

    async fn delete_versions_up_to(&mut self, guid: &str, up_to: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM alert_rule_version WHERE rule_guid = $1 AND version <= $2")
            .bind(guid)
            .bind(up_to)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected())
    }

    async fn bump_versions(
        &mut self,
        org_id: i64,
        namespace_uids: &[String],
    ) -> Result<Vec<AlertRuleKeyWithVersion>> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            "UPDATE alert_rule SET version = version + 1 \
             WHERE org_id = $1 AND namespace_uid = ANY($2) \
             RETURNING org_id, uid, version",
        )
        .bind(org_id)
        .bind(namespace_uids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_db_err)?;
        Ok(rows
            .into_iter()
            .map(|(org_id, uid, version)| AlertRuleKeyWithVersion {
                key: AlertRuleKey { org_id, uid },
                version,
            })
            .collect())
    }

    async fn delete_trash_before(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM alert_rule_version WHERE rule_uid = '' AND created <= $1")
            .bind(cutoff)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_trash_by_guid(&mut self, org_id: i64, guid: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM alert_rule_version WHERE rule_uid = '' AND rule_org_id = $1 AND rule_guid = $2",
        )
        .bind(org_id)
        .bind(guid)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_err)?;
        Ok(result.rows_affected())
    }

    async fn purge_org(&mut self, org_id: i64) -> Result<u64> {
        sqlx::query("DELETE FROM alert_rule_version WHERE rule_org_id = $1")
            .bind(org_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_err)?;
        let result = sqlx::query("DELETE FROM alert_rule WHERE org_id = $1")
            .bind(org_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_db_err)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    use sqlx::error::{DatabaseError, ErrorKind};

    use super::*;

    #[derive(Debug)]
    struct FakeDbError {
        unique: bool,
    }

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("duplicate key value violates unique constraint \"alert_rule_org_id_title\"")
        }
    }

    impl StdError for FakeDbError {}

    impl DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint \"alert_rule_org_id_title\""
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed("23505"))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            if self.unique {
                ErrorKind::UniqueViolation
            } else {
                ErrorKind::Other
            }
        }
    }

    #[test]
    fn unique_violations_name_the_rule() {
        let err = map_write_err(
            sqlx::Error::Database(Box::new(FakeDbError { unique: true })),
            3,
            "abc",
        );
        assert_eq!(err.kind(), alertstore_core::ErrorKind::Conflict);
        match err {
            RuleStoreError::UniqueConstraint { org_id, uid, .. } => assert_eq!((org_id, uid.as_str()), (3, "abc")),
            other => panic!("unexpected error: {other}"),
        }

        let err = map_write_err(sqlx::Error::Database(Box::new(FakeDbError { unique: false })), 3, "abc");
        assert!(matches!(err, RuleStoreError::Database(_)));
        let err = map_write_err(sqlx::Error::RowNotFound, 3, "abc");
        assert!(matches!(err, RuleStoreError::Database(_)));
    }
}
