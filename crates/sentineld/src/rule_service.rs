//! Rule management: CRUD, the active-rule queries, and the bundled
//! default-rule load.
//!
//! Every mutation path invalidates the active-rule cache unconditionally,
//! including on failure, so a half-applied mutation can never pin a stale
//! snapshot for the rest of its TTL.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use sentinel_common::rule_store::{RuleFilter, RuleStore};
use sentinel_common::rule::DefaultRuleSet;
use sentinel_common::{
    Database, NewRule, Rule, RuleUpdate, SentinelConfig, SentinelError, SourceType,
};

use crate::rule_cache::{ActiveRuleCache, ActiveRuleMap};

#[derive(Clone)]
pub struct RuleService {
    rules: RuleStore,
    cache: Arc<ActiveRuleCache>,
}

impl RuleService {
    pub fn new(db: &Database, config: &SentinelConfig) -> Self {
        Self {
            rules: db.rules(),
            cache: Arc::new(ActiveRuleCache::new(config.rules.cache_ttl())),
        }
    }

    /// Create a rule; duplicate ids are a conflict
    pub async fn create_rule(&self, new_rule: NewRule) -> Result<Rule, SentinelError> {
        if new_rule.rule_id.trim().is_empty() {
            return Err(SentinelError::Validation("rule_id must not be empty".into()));
        }
        if new_rule.conditions.is_empty() {
            return Err(SentinelError::Validation(
                "rule must set at least one condition".into(),
            ));
        }

        let rule = Rule {
            rule_id: new_rule.rule_id,
            source_type: new_rule.source_type,
            name: new_rule.name,
            description: new_rule.description,
            conditions: new_rule.conditions,
            is_active: new_rule.is_active,
            priority: new_rule.priority,
            created_at: Utc::now(),
            updated_at: None,
        };
        let result = self.rules.try_insert(&rule).await;
        self.cache.invalidate();
        match result {
            Ok(true) => {
                info!(rule_id = %rule.rule_id, source = %rule.source_type, "rule created");
                self.get_rule(&rule.rule_id).await
            }
            Ok(false) => Err(SentinelError::DuplicateRule(rule.rule_id)),
            Err(err) => Err(err),
        }
    }

    /// Partial update; untouched fields keep their values
    pub async fn update_rule(
        &self,
        rule_id: &str,
        update: RuleUpdate,
    ) -> Result<Rule, SentinelError> {
        if let Some(conditions) = &update.conditions {
            if conditions.is_empty() {
                return Err(SentinelError::Validation(
                    "rule must set at least one condition".into(),
                ));
            }
        }
        let result = self.rules.update(rule_id, &update, Utc::now()).await;
        self.cache.invalidate();
        match result {
            Ok(true) => {
                info!(rule_id = %rule_id, "rule updated");
                self.get_rule(rule_id).await
            }
            Ok(false) => Err(SentinelError::RuleNotFound(rule_id.to_string())),
            Err(err) => Err(err),
        }
    }

    /// Returns false when no such rule existed
    pub async fn delete_rule(&self, rule_id: &str) -> Result<bool, SentinelError> {
        let result = self.rules.delete(rule_id).await;
        self.cache.invalidate();
        let deleted = result?;
        if deleted {
            info!(rule_id = %rule_id, "rule deleted");
        }
        Ok(deleted)
    }

    pub async fn get_rule(&self, rule_id: &str) -> Result<Rule, SentinelError> {
        self.rules
            .get(rule_id)
            .await?
            .ok_or_else(|| SentinelError::RuleNotFound(rule_id.to_string()))
    }

    /// Filtered listing, highest priority first
    pub async fn list_rules(&self, filter: RuleFilter) -> Result<Vec<Rule>, SentinelError> {
        self.rules.list(filter).await
    }

    /// Active rules for one source type, straight from the store. The
    /// real-time path queries here so a fresh rule applies immediately.
    pub async fn get_active_for_source(
        &self,
        source_type: SourceType,
    ) -> Result<Vec<Rule>, SentinelError> {
        self.rules.active_for_source(source_type).await
    }

    /// All active rules grouped by source type, behind the TTL snapshot
    /// cache.
    pub async fn get_all_active(&self) -> Result<Arc<ActiveRuleMap>, SentinelError> {
        if let Some(snapshot) = self.cache.get() {
            return Ok(snapshot);
        }
        let rules = self.rules.all_active().await?;
        let mut grouped = ActiveRuleMap::new();
        for rule in rules {
            grouped.entry(rule.source_type).or_default().push(rule);
        }
        let snapshot = Arc::new(grouped);
        self.cache.put(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Bulk-load the bundled default-rule document (`{"rules": [...]}`).
    /// Entries whose rule_id already exists are preserved unchanged;
    /// malformed entries are skipped. Returns the number of inserts.
    pub async fn load_default_rules(&self, path: &Path) -> Result<usize, SentinelError> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            SentinelError::Validation(format!("read default rules {}: {e}", path.display()))
        })?;
        let document: DefaultRuleSet = serde_json::from_str(&contents).map_err(|e| {
            SentinelError::Validation(format!("parse default rules {}: {e}", path.display()))
        })?;

        let entries = document.valid_entries();
        let skipped = document.rules.len() - entries.len();
        if skipped > 0 {
            warn!(skipped, "default rule entries were malformed and dropped");
        }

        let mut inserted = 0;
        let mut failure = None;
        let now = Utc::now();
        for entry in entries {
            if entry.conditions.is_empty() {
                continue;
            }
            let rule = Rule {
                rule_id: entry.rule_id,
                source_type: entry.source_type,
                name: entry.name,
                description: entry.description,
                conditions: entry.conditions,
                is_active: entry.is_active,
                priority: entry.priority,
                created_at: now,
                updated_at: None,
            };
            match self.rules.try_insert(&rule).await {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        // Invalidate even when the load stopped partway
        self.cache.invalidate();
        if let Some(err) = failure {
            return Err(err);
        }
        info!(inserted, "default rules loaded");
        Ok(inserted)
    }
}
