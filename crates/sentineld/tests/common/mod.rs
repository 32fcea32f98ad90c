//! Shared harness: a full service stack over an in-memory store.
#![allow(dead_code)]

use serde_json::json;
use tokio::sync::watch;

use sentinel_common::{
    Database, NewAlert, NewRule, Rule, RuleConditions, SentinelConfig, SourceType,
};
use sentineld::{AlertService, JobService, RuleEngine, RuleService, Scanner};

pub struct TestStack {
    pub db: Database,
    pub config: SentinelConfig,
    pub alerts: AlertService,
    pub rules: RuleService,
    pub jobs: JobService,
    pub engine: RuleEngine,
    pub scanner: Scanner,
}

pub async fn stack() -> TestStack {
    let config = SentinelConfig::default();
    let db = Database::open_in_memory().await.expect("open in-memory db");
    let alerts = AlertService::new(&db, &config);
    let rules = RuleService::new(&db, &config);
    let jobs = JobService::new(&db);
    let engine = RuleEngine::new(&db, alerts.clone(), rules.clone(), &config);
    let scanner = Scanner::new(engine.clone(), jobs.clone());
    TestStack {
        db,
        config,
        alerts,
        rules,
        jobs,
        engine,
        scanner,
    }
}

/// A cancel channel that never fires. The scanner only reads the current
/// value, which survives the dropped sender.
pub fn no_cancel() -> watch::Receiver<bool> {
    watch::channel(false).1
}

pub fn overspeeding_alert(driver: &str) -> NewAlert {
    NewAlert::new(SourceType::Overspeeding).with_metadata("driver_id", json!(driver))
}

/// The stock escalation rule: 3 OVERSPEEDING incidents within 60 minutes
pub async fn load_overspeeding_rule(stack: &TestStack) -> Rule {
    stack
        .rules
        .create_rule(NewRule {
            rule_id: "RULE-OSP-001".into(),
            source_type: SourceType::Overspeeding,
            name: "Repeated overspeeding".into(),
            description: None,
            conditions: RuleConditions {
                escalate_if_count: Some(3),
                window_mins: Some(60),
                ..Default::default()
            },
            is_active: true,
            priority: 10,
        })
        .await
        .expect("create overspeeding rule")
}

/// The stock auto-close rule: close COMPLIANCE alerts once
/// `document_valid` flips to true
pub async fn load_document_valid_rule(stack: &TestStack) -> Rule {
    stack
        .rules
        .create_rule(NewRule {
            rule_id: "RULE-CMP-001".into(),
            source_type: SourceType::Compliance,
            name: "Compliance document renewed".into(),
            description: None,
            conditions: RuleConditions {
                auto_close_if: Some("document_valid".into()),
                ..Default::default()
            },
            is_active: true,
            priority: 10,
        })
        .await
        .expect("create document_valid rule")
}
