//! alertstore-admin: maintenance commands for the alert rule tables.
//!
//! Usage:
//!   alertstore-admin migrate
//!   alertstore-admin count --org 1
//!   alertstore-admin groups --org 1
//!   alertstore-admin versions --org 1 --guid <guid>
//!   alertstore-admin purge --org 1
//!   alertstore-admin bump-namespace --org 1 --namespace <uid>

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use alertstore_core::config::{load_dotenv, Config};
use alertstore_storage::{AlertRuleStore, PostgresBackend};

// ── CLI ─────────────────────────────────────────────────────────────

/// Alert rule store administration.
#[derive(Parser, Debug)]
#[command(name = "alertstore-admin", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the bundled schema migrations.
    Migrate,

    /// Count stored rules (all organizations when --org is omitted).
    Count {
        #[arg(long, env = "ALERTSTORE_ORG_ID", default_value_t = 0)]
        org: i64,
    },

    /// List rule groups with interval and rule count.
    Groups {
        #[arg(long, env = "ALERTSTORE_ORG_ID")]
        org: i64,
    },

    /// Show the version history of one rule, newest first.
    Versions {
        #[arg(long, env = "ALERTSTORE_ORG_ID")]
        org: i64,
        #[arg(long)]
        guid: String,
    },

    /// Delete every rule and history row of an organization.
    Purge {
        #[arg(long, env = "ALERTSTORE_ORG_ID")]
        org: i64,
    },

    /// List deleted rules kept for recovery, most recent first.
    Trash {
        #[arg(long, env = "ALERTSTORE_ORG_ID")]
        org: i64,
    },

    /// Drop deleted rules older than the configured retention.
    CleanTrash,

    /// Increase the version of all rules in a namespace so schedulers reload them.
    BumpNamespace {
        #[arg(long, env = "ALERTSTORE_ORG_ID")]
        org: i64,
        #[arg(long)]
        namespace: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();
    alertstore_storage::metrics::describe_all();

    if let Command::Migrate = cli.command {
        let backend = PostgresBackend::connect(&config.postgres)
            .await
            .context("failed to connect to PostgreSQL")?;
        backend.migrate().await.context("failed to apply migrations")?;
        return Ok(());
    }

    let store = AlertRuleStore::from_config(&config)
        .await
        .context("failed to open alert rule store")?;

    match cli.command {
        Command::Migrate => {}
        Command::Count { org } => {
            let count = store.count(org).await.context("failed to count rules")?;
            println!("{count}");
        }
        Command::Groups { org } => {
            let groups = store
                .get_org_rule_groups(org, &[])
                .await
                .with_context(|| format!("failed to list rule groups of organization {org}"))?;
            for g in groups {
                println!(
                    "{}\t{}\t{}s\t{} rules",
                    g.key.namespace_uid, g.key.rule_group, g.interval_seconds, g.rule_count
                );
            }
        }
        Command::Versions { org, guid } => {
            let versions = store
                .get_alert_rule_versions(org, &guid)
                .await
                .with_context(|| format!("failed to load versions of rule {guid}"))?;
            for v in versions {
                println!(
                    "v{}\tparent v{}\t{}\t{}",
                    v.version(),
                    v.parent_version,
                    v.created.to_rfc3339(),
                    v.rule.title
                );
            }
        }
        Command::Purge { org } => {
            let deleted = store
                .purge_org(org)
                .await
                .with_context(|| format!("failed to purge organization {org}"))?;
            info!(org_id = org, deleted, "purge complete");
        }
        Command::Trash { org } => {
            let deleted = store
                .list_deleted_rules(org)
                .await
                .with_context(|| format!("failed to list deleted rules of organization {org}"))?;
            for r in deleted {
                println!("{}	v{}	{}	{}", r.guid, r.version, r.updated.to_rfc3339(), r.title);
            }
        }
        Command::CleanTrash => {
            let removed = store
                .clean_up_deleted_alert_rules()
                .await
                .context("failed to clean up deleted rules")?;
            info!(removed, "trash cleanup complete");
        }
        Command::BumpNamespace { org, namespace } => {
            let bumped = store
                .increase_version_for_all_rules_in_namespaces(org, &namespace)
                .await
                .context("failed to bump rule versions")?;
            for k in bumped {
                println!("{}\tv{}", k.key.uid, k.version);
            }
        }
    }
    Ok(())
}
