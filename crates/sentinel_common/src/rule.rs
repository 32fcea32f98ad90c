//! Rule documents: named predicates bound to one source channel.
//!
//! Escalation rules carry a count-in-window threshold; auto-close rules
//! carry a condition sentinel evaluated by the deferred scanner path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::SourceType;

/// Auto-close sentinel currently recognized by the engine. Unknown
/// sentinels are persisted but evaluate as a no-op.
pub const CONDITION_DOCUMENT_VALID: &str = "document_valid";

/// Predicate parameters; at least one field must be set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConditions {
    /// Escalate when this many alerts land in the window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate_if_count: Option<u32>,
    /// Count window in minutes; engine default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_mins: Option<u32>,
    /// Auto-close sentinel evaluated on the deferred path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_close_if: Option<String>,
    /// Reserved: per-rule expiry override, persisted but not evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_mins: Option<u32>,
}

impl RuleConditions {
    pub fn is_empty(&self) -> bool {
        self.escalate_if_count.is_none()
            && self.window_mins.is_none()
            && self.auto_close_if.is_none()
            && self.expire_after_mins.is_none()
    }
}

/// A named predicate bound to one source type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub source_type: SourceType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub conditions: RuleConditions,
    pub is_active: bool,
    /// Higher sorts first; ties break by insertion order
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial update for an existing rule; unset fields are left alone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: Option<RuleConditions>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub source_type: Option<SourceType>,
}

impl RuleUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.conditions.is_none()
            && self.is_active.is_none()
            && self.priority.is_none()
            && self.source_type.is_none()
    }
}

/// Input for rule creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub rule_id: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: RuleConditions,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default = "default_priority")]
    pub priority: i64,
}

fn default_active() -> bool {
    true
}

fn default_priority() -> i64 {
    1
}

/// Shape of the bundled default-rule document: `{ "rules": [ ... ] }`.
/// Entries are kept loose so one malformed rule never sinks the load.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultRuleSet {
    pub rules: Vec<serde_json::Value>,
}

impl DefaultRuleSet {
    /// Entries that parse as valid rules, in document order. Malformed
    /// entries (missing rule_id, unknown source type, bad conditions) are
    /// dropped.
    pub fn valid_entries(&self) -> Vec<NewRule> {
        self.rules
            .iter()
            .filter_map(|entry| serde_json::from_value::<NewRule>(entry.clone()).ok())
            .filter(|rule| !rule.rule_id.is_empty())
            .collect()
    }
}
