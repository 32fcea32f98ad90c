//! Rule management: CRUD, conflict handling, active-rule ordering,
//! the snapshot cache, and the bundled default-rule load.

mod common;

use std::io::Write;

use common::stack;
use sentinel_common::rule_store::RuleFilter;
use sentinel_common::{
    NewRule, RuleConditions, RuleUpdate, SentinelError, SourceType,
};

fn escalation_rule(rule_id: &str, source: SourceType, priority: i64) -> NewRule {
    NewRule {
        rule_id: rule_id.into(),
        source_type: source,
        name: format!("rule {rule_id}"),
        description: None,
        conditions: RuleConditions {
            escalate_if_count: Some(3),
            window_mins: Some(60),
            ..Default::default()
        },
        is_active: true,
        priority,
    }
}

// ============================================================================
// CRUD
// ============================================================================

#[tokio::test]
async fn test_create_get_and_list() {
    let stack = stack().await;
    let created = stack
        .rules
        .create_rule(escalation_rule("RULE-OSP-001", SourceType::Overspeeding, 10))
        .await
        .unwrap();
    assert_eq!(created.rule_id, "RULE-OSP-001");
    assert!(created.is_active);
    assert!(created.updated_at.is_none());

    let fetched = stack.rules.get_rule("RULE-OSP-001").await.unwrap();
    assert_eq!(fetched.conditions.escalate_if_count, Some(3));

    let all = stack.rules.list_rules(RuleFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);

    let none = stack
        .rules
        .list_rules(RuleFilter {
            source_type: Some(SourceType::Safety),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(none.is_empty());

    let err = stack.rules.get_rule("RULE-MISSING").await.unwrap_err();
    assert!(matches!(err, SentinelError::RuleNotFound(_)));
}

#[tokio::test]
async fn test_duplicate_rule_id_conflicts() {
    let stack = stack().await;
    stack
        .rules
        .create_rule(escalation_rule("RULE-OSP-001", SourceType::Overspeeding, 10))
        .await
        .unwrap();
    let err = stack
        .rules
        .create_rule(escalation_rule("RULE-OSP-001", SourceType::Safety, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, SentinelError::DuplicateRule(_)));
}

#[tokio::test]
async fn test_rule_needs_at_least_one_condition() {
    let stack = stack().await;
    let mut bare = escalation_rule("RULE-EMPTY", SourceType::Compliance, 1);
    bare.conditions = RuleConditions::default();
    let err = stack.rules.create_rule(bare).await.unwrap_err();
    assert!(matches!(err, SentinelError::Validation(_)));
}

#[tokio::test]
async fn test_update_and_delete() {
    let stack = stack().await;
    stack
        .rules
        .create_rule(escalation_rule("RULE-OSP-001", SourceType::Overspeeding, 10))
        .await
        .unwrap();

    let updated = stack
        .rules
        .update_rule(
            "RULE-OSP-001",
            RuleUpdate {
                priority: Some(99),
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.priority, 99);
    assert!(!updated.is_active);
    assert!(updated.updated_at.is_some());
    // Untouched fields survive the partial update
    assert_eq!(updated.conditions.escalate_if_count, Some(3));

    let err = stack
        .rules
        .update_rule("RULE-MISSING", RuleUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SentinelError::RuleNotFound(_)));

    assert!(stack.rules.delete_rule("RULE-OSP-001").await.unwrap());
    assert!(!stack.rules.delete_rule("RULE-OSP-001").await.unwrap());
}

// ============================================================================
// Active-rule queries and the snapshot cache
// ============================================================================

#[tokio::test]
async fn test_active_for_source_orders_by_priority() {
    let stack = stack().await;
    stack
        .rules
        .create_rule(escalation_rule("RULE-A", SourceType::Overspeeding, 5))
        .await
        .unwrap();
    stack
        .rules
        .create_rule(escalation_rule("RULE-B", SourceType::Overspeeding, 20))
        .await
        .unwrap();
    stack
        .rules
        .create_rule(escalation_rule("RULE-C", SourceType::Overspeeding, 5))
        .await
        .unwrap();
    stack
        .rules
        .create_rule(escalation_rule("RULE-D", SourceType::Safety, 90))
        .await
        .unwrap();

    let rules = stack
        .rules
        .get_active_for_source(SourceType::Overspeeding)
        .await
        .unwrap();
    let ids: Vec<&str> = rules.iter().map(|r| r.rule_id.as_str()).collect();
    // Priority descending, insertion order on ties
    assert_eq!(ids, ["RULE-B", "RULE-A", "RULE-C"]);
}

#[tokio::test]
async fn test_every_mutation_invalidates_the_cache() {
    let stack = stack().await;
    stack
        .rules
        .create_rule(escalation_rule("RULE-A", SourceType::Overspeeding, 5))
        .await
        .unwrap();

    let snapshot = stack.rules.get_all_active().await.unwrap();
    assert_eq!(snapshot[&SourceType::Overspeeding].len(), 1);

    // Create
    stack
        .rules
        .create_rule(escalation_rule("RULE-B", SourceType::Overspeeding, 9))
        .await
        .unwrap();
    let snapshot = stack.rules.get_all_active().await.unwrap();
    assert_eq!(snapshot[&SourceType::Overspeeding].len(), 2);

    // Update: deactivating drops the rule from the active map
    stack
        .rules
        .update_rule(
            "RULE-A",
            RuleUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let snapshot = stack.rules.get_all_active().await.unwrap();
    let ids: Vec<&str> = snapshot[&SourceType::Overspeeding]
        .iter()
        .map(|r| r.rule_id.as_str())
        .collect();
    assert_eq!(ids, ["RULE-B"]);

    // Delete
    stack.rules.delete_rule("RULE-B").await.unwrap();
    let snapshot = stack.rules.get_all_active().await.unwrap();
    assert!(snapshot.get(&SourceType::Overspeeding).is_none());
}

// ============================================================================
// Default-rule bulk load
// ============================================================================

#[tokio::test]
async fn test_load_default_rules_inserts_missing_only() {
    let stack = stack().await;
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("default_rules.json");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(
        file,
        r#"{{
            "rules": [
                {{
                    "rule_id": "RULE-OSP-001",
                    "source_type": "OVERSPEEDING",
                    "name": "Repeated overspeeding",
                    "conditions": {{"escalate_if_count": 3, "window_mins": 60}},
                    "priority": 10
                }},
                {{
                    "rule_id": "RULE-DOC-001",
                    "source_type": "DOCUMENT_EXPIRY",
                    "name": "Document renewed",
                    "conditions": {{"auto_close_if": "document_valid"}}
                }},
                {{"source_type": "SAFETY", "name": "malformed, no id"}},
                {{"rule_id": "RULE-BAD", "source_type": "NOT_A_SOURCE"}}
            ]
        }}"#
    )
    .unwrap();

    let inserted = stack.rules.load_default_rules(&path).await.unwrap();
    assert_eq!(inserted, 2);

    // A second load inserts nothing and preserves local edits
    stack
        .rules
        .update_rule(
            "RULE-OSP-001",
            RuleUpdate {
                priority: Some(77),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let inserted = stack.rules.load_default_rules(&path).await.unwrap();
    assert_eq!(inserted, 0);
    assert_eq!(
        stack.rules.get_rule("RULE-OSP-001").await.unwrap().priority,
        77
    );

    // The load is a mutation path: the cache reflects the new rules
    let snapshot = stack.rules.get_all_active().await.unwrap();
    assert!(snapshot.contains_key(&SourceType::DocumentExpiry));
}

#[tokio::test]
async fn test_load_default_rules_missing_file() {
    let stack = stack().await;
    let err = stack
        .rules
        .load_default_rules(std::path::Path::new("/nonexistent/rules.json"))
        .await
        .unwrap_err();
    assert!(matches!(err, SentinelError::Validation(_)));
}
