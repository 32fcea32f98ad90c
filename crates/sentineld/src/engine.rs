//! Rule engine: real-time escalation on inbound alerts and deferred
//! auto-close evaluation over the open-alert population.
//!
//! The real-time path is best-effort by contract: a failure after the
//! alert has been created is logged and swallowed, because the deferred
//! scanner plus the next inbound alert for the same driver re-evaluate
//! everything. That is also why the count-in-window re-queries the store
//! instead of keeping a cross-request counter.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::time::Duration as StdDuration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use sentinel_common::alert_store::AlertStore;
use sentinel_common::alert::SYSTEM_ACTOR;
use sentinel_common::rule::CONDITION_DOCUMENT_VALID;
use sentinel_common::{
    Alert, AlertStatus, Database, JobStats, NewAlert, Rule, SentinelConfig, SentinelError,
};

use crate::alert_service::AlertService;
use crate::rule_service::RuleService;

/// Outcome of one deferred evaluation pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanStats {
    pub total_checked: u64,
    pub auto_closed: u64,
    pub cancelled: bool,
    pub errors: Vec<String>,
}

impl ScanStats {
    pub fn job_stats(&self) -> JobStats {
        JobStats {
            alerts_processed: self.total_checked,
            alerts_closed: self.auto_closed,
            // Escalation is real-time only; the scanner never escalates
            alerts_escalated: 0,
        }
    }
}

#[derive(Clone)]
pub struct RuleEngine {
    alerts: AlertStore,
    alert_service: AlertService,
    rule_service: RuleService,
    default_window_mins: u32,
    per_alert_timeout: StdDuration,
}

impl RuleEngine {
    pub fn new(
        db: &Database,
        alert_service: AlertService,
        rule_service: RuleService,
        config: &SentinelConfig,
    ) -> Self {
        Self {
            alerts: db.alerts(),
            alert_service,
            rule_service,
            default_window_mins: config.rules.default_window_mins,
            per_alert_timeout: config.scanner.per_alert_timeout(),
        }
    }

    /// Inbound path: create the alert, then evaluate escalation rules.
    /// Escalation failures never fail the creation; the deferred path is
    /// the safety net.
    pub async fn ingest(&self, new_alert: NewAlert) -> Result<Alert, SentinelError> {
        let alert = self.alert_service.create_alert(new_alert).await?;
        match self.check_and_escalate(&alert).await {
            Ok(false) => Ok(alert),
            Ok(true) => self
                .alert_service
                .get_by_id(&alert.alert_id)
                .await?
                .ok_or_else(|| {
                    SentinelError::Store(format!("alert {} vanished after escalation", alert.alert_id))
                }),
            Err(err) => {
                warn!(
                    alert_id = %alert.alert_id,
                    "escalation check failed, deferring to scanner: {err}"
                );
                Ok(alert)
            }
        }
    }

    /// Evaluate count-in-window rules for a freshly created alert and
    /// escalate on the first rule whose threshold is met. Returns whether
    /// an escalation happened.
    pub async fn check_and_escalate(&self, alert: &Alert) -> Result<bool, SentinelError> {
        if alert.status != AlertStatus::Open {
            debug!(alert_id = %alert.alert_id, status = %alert.status, "not OPEN, skipping escalation");
            return Ok(false);
        }
        let Some(driver_id) = alert.driver_id() else {
            debug!(alert_id = %alert.alert_id, "no driver_id, cannot group for escalation");
            return Ok(false);
        };
        let driver_id = driver_id.to_string();

        let rules = self
            .rule_service
            .get_active_for_source(alert.source_type)
            .await?;
        for rule in &rules {
            let Some(threshold) = rule.conditions.escalate_if_count else {
                continue;
            };
            match self
                .evaluate_escalation_rule(alert, rule, &driver_id, threshold)
                .await
            {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(err) => {
                    // One broken rule must not mask the others
                    error!(
                        alert_id = %alert.alert_id,
                        rule_id = %rule.rule_id,
                        "escalation rule evaluation failed: {err}"
                    );
                }
            }
        }
        Ok(false)
    }

    async fn evaluate_escalation_rule(
        &self,
        alert: &Alert,
        rule: &Rule,
        driver_id: &str,
        threshold: u32,
    ) -> Result<bool, SentinelError> {
        let window_mins = rule.conditions.window_mins.unwrap_or(self.default_window_mins);
        // The window is relative to now, not to the alert's event time
        let window_start = Utc::now() - Duration::minutes(i64::from(window_mins));
        let similar = self
            .alerts
            .count_in_window(driver_id, alert.source_type, window_start, &alert.alert_id)
            .await?;
        // The current alert is excluded from the query and counted here,
        // whether or not its own write was visible to the count.
        let total = similar + 1;
        debug!(
            alert_id = %alert.alert_id,
            rule_id = %rule.rule_id,
            total,
            threshold,
            window_mins,
            "escalation rule evaluated"
        );
        if total < u64::from(threshold) {
            return Ok(false);
        }

        let reason = format!(
            "{total} {} incidents detected within {window_mins} minutes (threshold: {threshold})",
            alert.source_type
        );
        self.alert_service
            .update_status(
                &alert.alert_id,
                AlertStatus::Escalated,
                &reason,
                SYSTEM_ACTOR,
                Some(&rule.rule_id),
            )
            .await?;
        info!(
            alert_id = %alert.alert_id,
            rule_id = %rule.rule_id,
            driver_id,
            "alert escalated: {reason}"
        );
        Ok(true)
    }

    /// Deferred predicate: should this alert auto-close, and why. Checks
    /// rule sentinels first, then the retention expiry.
    pub async fn check_auto_close(&self, alert: &Alert) -> Result<Option<String>, SentinelError> {
        if alert.status.is_terminal() {
            return Ok(None);
        }
        let rules = self
            .rule_service
            .get_active_for_source(alert.source_type)
            .await?;
        for rule in &rules {
            let Some(condition) = rule.conditions.auto_close_if.as_deref() else {
                continue;
            };
            match condition {
                CONDITION_DOCUMENT_VALID => {
                    if alert.document_valid() == Some(true) {
                        return Ok(Some(format!("Document renewed (rule: {})", rule.rule_id)));
                    }
                }
                // Unknown sentinels are reserved for future predicates
                other => {
                    debug!(rule_id = %rule.rule_id, condition = other, "unrecognized auto-close condition");
                }
            }
        }
        Ok(expiry_reason(alert.expires_at, Utc::now()))
    }

    /// Close an alert the deferred path matched
    pub async fn apply_auto_close(
        &self,
        alert_id: &str,
        reason: &str,
    ) -> Result<Alert, SentinelError> {
        self.alert_service
            .update_status(alert_id, AlertStatus::AutoClosed, reason, SYSTEM_ACTOR, None)
            .await
    }

    /// Walk a snapshot of every non-terminal alert through the deferred
    /// predicate. Per-alert failures and timeouts are recorded and the
    /// walk continues; re-running with no intervening mutations closes
    /// nothing further.
    pub async fn evaluate_all_pending(
        &self,
        cancel: watch::Receiver<bool>,
    ) -> Result<ScanStats, SentinelError> {
        let pending = self.alerts.pending().await?;
        info!(count = pending.len(), "evaluating pending alerts for auto-close");

        let mut stats = ScanStats::default();
        for alert in pending {
            if *cancel.borrow() {
                stats.cancelled = true;
                stats.errors.push("scan cancelled before completion".to_string());
                break;
            }
            match tokio::time::timeout(self.per_alert_timeout, self.evaluate_one(&alert)).await {
                Ok(Ok(closed)) => {
                    if closed {
                        stats.auto_closed += 1;
                    }
                }
                Ok(Err(err)) => {
                    error!(alert_id = %alert.alert_id, "auto-close evaluation failed: {err}");
                    stats.errors.push(format!("alert {}: {err}", alert.alert_id));
                }
                Err(_) => {
                    error!(alert_id = %alert.alert_id, "auto-close evaluation timed out");
                    stats
                        .errors
                        .push(format!("alert {}: evaluation timed out", alert.alert_id));
                }
            }
            stats.total_checked += 1;
        }
        info!(
            checked = stats.total_checked,
            closed = stats.auto_closed,
            errors = stats.errors.len(),
            "auto-close evaluation complete"
        );
        Ok(stats)
    }

    async fn evaluate_one(&self, alert: &Alert) -> Result<bool, SentinelError> {
        if let Some(reason) = self.check_auto_close(alert).await? {
            self.apply_auto_close(&alert.alert_id, &reason).await?;
            info!(alert_id = %alert.alert_id, "auto-closed: {reason}");
            return Ok(true);
        }
        Ok(false)
    }
}

/// Time-based closure predicate. Closure happens at the boundary instant
/// itself (`<=`), not one tick after.
fn expiry_reason(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<String> {
    let expires_at = expires_at?;
    if expires_at <= now {
        Some(format!(
            "Time window expired (expired at: {})",
            expires_at.to_rfc3339()
        ))
    } else {
        None
    }
}
