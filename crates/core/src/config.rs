use std::collections::BTreeSet;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).as_deref() {
        Some("1" | "true" | "TRUE" | "yes") => true,
        Some("0" | "false" | "FALSE" | "no") => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub alerting: AlertingConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `ALERTSTORE_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("ALERTSTORE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p),
            alerting: AlertingConfig::from_env_profiled(p),
            cache: CacheConfig::from_env_profiled(p),
            store: StoreConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!(
            "  alerting:    base_interval={}s, uid_attempts={}, version_limit={}, deleted_retention={}s, disabled_orgs={:?}",
            self.alerting.base_interval_secs,
            self.alerting.uid_generation_attempts,
            self.alerting.rule_version_record_limit,
            self.alerting.deleted_rule_retention_secs,
            self.alerting.disabled_orgs
        );
        tracing::info!(
            "  cache:       enabled={}, capacity={}, ttl={}s",
            self.cache.enabled, self.cache.capacity, self.cache.ttl_secs
        );
        tracing::info!("  store:       dialect={}", self.store.sql_dialect);
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_parse(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "alerting"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Alerting ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    /// Scheduler tick; rule intervals must be a positive multiple of it.
    pub base_interval_secs: i64,
    pub uid_generation_attempts: u32,
    /// History rows kept per rule; 0 keeps everything.
    pub rule_version_record_limit: i64,
    /// Organizations excluded from scheduling reads.
    pub disabled_orgs: BTreeSet<i64>,
    /// How long deleted rules stay recoverable; 0 deletes permanently.
    pub deleted_rule_retention_secs: u64,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: 10,
            uid_generation_attempts: 3,
            rule_version_record_limit: 0,
            disabled_orgs: BTreeSet::new(),
            deleted_rule_retention_secs: 0,
        }
    }
}

impl AlertingConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            base_interval_secs: profiled_env_parse(p, "ALERTING_BASE_INTERVAL_SECS", d.base_interval_secs),
            uid_generation_attempts: profiled_env_parse(
                p,
                "ALERTING_UID_GENERATION_ATTEMPTS",
                d.uid_generation_attempts,
            ),
            rule_version_record_limit: profiled_env_parse(
                p,
                "ALERTING_RULE_VERSION_RECORD_LIMIT",
                d.rule_version_record_limit,
            ),
            disabled_orgs: profiled_env_opt(p, "ALERTING_DISABLED_ORGS")
                .map(|v| parse_org_list(&v))
                .unwrap_or_default(),
            deleted_rule_retention_secs: profiled_env_parse(
                p,
                "ALERTING_DELETED_RULE_RETENTION_SECS",
                d.deleted_rule_retention_secs,
            ),
        }
    }

    /// `None` when deleted rules are not kept for recovery.
    pub fn deleted_rule_retention(&self) -> Option<Duration> {
        (self.deleted_rule_retention_secs > 0).then(|| Duration::from_secs(self.deleted_rule_retention_secs))
    }
}

fn parse_org_list(raw: &str) -> BTreeSet<i64> {
    raw.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

// ── Cache ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Maximum number of organizations held in the rule cache.
    pub capacity: usize,
    pub ttl_secs: u64,
    /// Entries kept by the label/annotation JSON decode cache.
    pub json_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1024,
            ttl_secs: 60,
            json_capacity: 4096,
        }
    }
}

impl CacheConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            enabled: profiled_env_bool(p, "ALERTSTORE_CACHE_ENABLED", d.enabled),
            capacity: profiled_env_parse(p, "ALERTSTORE_CACHE_CAPACITY", d.capacity),
            ttl_secs: profiled_env_parse(p, "ALERTSTORE_CACHE_TTL_SECS", d.ttl_secs),
            json_capacity: profiled_env_parse(p, "ALERTSTORE_JSON_CACHE_CAPACITY", d.json_capacity),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

// ── Store ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `postgres`, `mysql` or `sqlite`; selects the label predicate strategy.
    pub sql_dialect: String,
    pub query_timeout_secs: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sql_dialect: "postgres".to_string(),
            query_timeout_secs: None,
        }
    }
}

impl StoreConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            sql_dialect: profiled_env_or(p, "ALERTSTORE_SQL_DIALECT", "postgres").to_lowercase(),
            query_timeout_secs: profiled_env_opt(p, "ALERTSTORE_QUERY_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok()),
        }
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_prefixed_keys_win() {
        env::set_var("CFGTEST_ALERTING_BASE_INTERVAL_SECS", "30");
        env::set_var("CFGTEST_ALERTING_DISABLED_ORGS", "3, 5,x");
        env::set_var("CFGTEST_ALERTSTORE_CACHE_ENABLED", "false");
        env::set_var("CFGTEST_ALERTING_DELETED_RULE_RETENTION_SECS", "3600");

        let cfg = Config::for_profile("cfgtest");
        assert_eq!(cfg.profile, "CFGTEST");
        assert_eq!(cfg.alerting.base_interval_secs, 30);
        assert_eq!(cfg.alerting.disabled_orgs, BTreeSet::from([3, 5]));
        assert!(!cfg.cache.enabled);
        assert_eq!(cfg.alerting.deleted_rule_retention(), Some(Duration::from_secs(3600)));
        assert_eq!(cfg.profile_label(), "CFGTEST");
    }

    #[test]
    fn connection_string_uses_defaults() {
        let pg = PostgresConfig {
            host: "db".into(),
            port: 5433,
            database: "alerting".into(),
            username: None,
            password: None,
            ssl_mode: "disable".into(),
            max_connections: 4,
        };
        assert_eq!(
            pg.connection_string(),
            "postgres://postgres:@db:5433/alerting?sslmode=disable"
        );
        assert!(!pg.is_configured());
    }

    #[test]
    fn zero_retention_disables_recovery() {
        assert_eq!(AlertingConfig::default().deleted_rule_retention(), None);
    }
}
