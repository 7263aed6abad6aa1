use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::AlertRule;
use crate::query::{GetAlertRulesGroupByRuleUidQuery, ListAlertRulesQuery};

/// Read access to stored rules, as needed by reconciliation.
#[async_trait]
pub trait RuleReader: Send + Sync {
    async fn list_alert_rules(&self, query: &ListAlertRulesQuery) -> Result<Vec<AlertRule>>;

    /// All rules of the group containing `query.uid`; empty when the UID is unknown.
    async fn get_alert_rules_group_by_rule_uid(
        &self,
        query: &GetAlertRulesGroupByRuleUidQuery,
    ) -> Result<Vec<AlertRule>>;
}

/// Resolves namespace (folder) UIDs to human-readable paths.
#[async_trait]
pub trait FolderResolver: Send + Sync {
    async fn folder_exists(&self, org_id: i64, uid: &str) -> Result<bool>;

    /// Full paths (`parent/child`) for the folders that exist; unknown UIDs are omitted.
    async fn full_paths(&self, org_id: i64, uids: &[String]) -> Result<HashMap<String, String>>;
}

/// In-memory folder tree: `(org_id, uid)` → `(title, parent_uid)`.
#[derive(Default)]
pub struct StaticFolderResolver {
    folders: RwLock<HashMap<(i64, String), (String, Option<String>)>>,
}

impl StaticFolderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, org_id: i64, uid: &str, title: &str, parent: Option<&str>) {
        self.folders.write().expect("lock poisoned").insert(
            (org_id, uid.to_string()),
            (title.to_string(), parent.map(str::to_string)),
        );
    }

    fn path_of(&self, org_id: i64, uid: &str) -> Option<String> {
        let folders = self.folders.read().expect("lock poisoned");
        let mut parts = Vec::new();
        let mut current = Some(uid.to_string());
        while let Some(uid) = current {
            let (title, parent) = match folders.get(&(org_id, uid)) {
                Some(entry) => entry,
                None if parts.is_empty() => return None,
                None => break,
            };
            parts.push(title.clone());
            // cycles are cut at the tree depth
            if parts.len() > folders.len() {
                break;
            }
            current = parent.clone();
        }
        parts.reverse();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl FolderResolver for StaticFolderResolver {
    async fn folder_exists(&self, org_id: i64, uid: &str) -> Result<bool> {
        Ok(self
            .folders
            .read()
            .expect("lock poisoned")
            .contains_key(&(org_id, uid.to_string())))
    }

    async fn full_paths(&self, org_id: i64, uids: &[String]) -> Result<HashMap<String, String>> {
        Ok(uids
            .iter()
            .filter_map(|uid| self.path_of(org_id, uid).map(|p| (uid.clone(), p)))
            .collect())
    }
}
