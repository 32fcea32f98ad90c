//! State-machine service over the alert collection.
//!
//! Every transition is validated against the allowed-transition table and
//! written as one guarded update: the store-level filter on the expected
//! prior status is what serializes concurrent transition attempts. On a
//! lost race the service re-reads and re-validates, so the loser surfaces
//! `InvalidTransition` once the winner has landed a conflicting state.

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{debug, info};

use sentinel_common::alert_store::{AlertFilter, AlertStore, TransitionUpdate};
use sentinel_common::{
    Alert, AlertSeverity, AlertStateTransition, AlertStatus, Database, NewAlert, SentinelConfig,
    SentinelError,
};

use crate::alert_id::AlertIdGenerator;

/// Attempts before a contended transition gives up
const TRANSITION_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct AlertService {
    alerts: AlertStore,
    ids: AlertIdGenerator,
    expiration_days: i64,
    default_page_size: u32,
    max_page_size: u32,
}

impl AlertService {
    pub fn new(db: &Database, config: &SentinelConfig) -> Self {
        Self {
            alerts: db.alerts(),
            ids: AlertIdGenerator::new(db.counters()),
            expiration_days: config.alerts.expiration_days,
            default_page_size: config.listing.default_page_size,
            max_page_size: config.listing.max_page_size,
        }
    }

    /// Direct store access, for collaborator-level writes such as
    /// metadata patches
    pub fn store(&self) -> &AlertStore {
        &self.alerts
    }

    /// Create a new alert: validate, assign an id, apply per-source
    /// defaults, seed the state history, persist, and return the stored
    /// document.
    pub async fn create_alert(&self, new_alert: NewAlert) -> Result<Alert, SentinelError> {
        if let Some(driver) = new_alert.metadata.get("driver_id") {
            if !matches!(driver, Value::String(_)) {
                return Err(SentinelError::Validation(
                    "metadata.driver_id must be a string".to_string(),
                ));
            }
        }

        let now = Utc::now();
        let alert_id = self.ids.generate(new_alert.source_type).await?;
        let alert = Alert {
            alert_id: alert_id.clone(),
            source_type: new_alert.source_type,
            severity: new_alert
                .severity
                .unwrap_or_else(|| new_alert.source_type.default_severity()),
            status: AlertStatus::Open,
            timestamp: new_alert.timestamp.unwrap_or(now),
            metadata: new_alert.metadata,
            state_history: vec![AlertStateTransition::creation(now)],
            escalated_at: None,
            closed_at: None,
            resolved_at: None,
            auto_close_reason: None,
            expires_at: Some(
                new_alert
                    .expires_at
                    .unwrap_or(now + Duration::days(self.expiration_days)),
            ),
            resolved_by: None,
            resolution_notes: None,
            created_at: now,
            updated_at: None,
        };
        self.alerts.insert(&alert).await?;
        info!(
            alert_id = %alert_id,
            source = %alert.source_type,
            severity = %alert.severity,
            "alert created"
        );
        self.reread(&alert_id).await
    }

    pub async fn get_by_id(&self, alert_id: &str) -> Result<Option<Alert>, SentinelError> {
        self.alerts.get(alert_id).await
    }

    /// Transition log for one alert, creation record first
    pub async fn get_state_history(
        &self,
        alert_id: &str,
    ) -> Result<Vec<AlertStateTransition>, SentinelError> {
        let alert = self
            .alerts
            .get(alert_id)
            .await?
            .ok_or_else(|| SentinelError::AlertNotFound(alert_id.to_string()))?;
        Ok(alert.state_history)
    }

    /// Filtered page plus the total matching count, newest events first.
    /// `limit` falls back to the configured default page size and is
    /// clamped to the maximum.
    pub async fn list(
        &self,
        filter: &AlertFilter,
        skip: u32,
        limit: Option<u32>,
    ) -> Result<(Vec<Alert>, u64), SentinelError> {
        let limit = limit
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size);
        self.alerts.list(filter, skip, limit).await
    }

    /// Move an alert to `new_status`, recording reason and actor. Writes
    /// status, derived timestamps, severity promotion, and the history
    /// entry in one atomic store update.
    pub async fn update_status(
        &self,
        alert_id: &str,
        new_status: AlertStatus,
        reason: &str,
        triggered_by: &str,
        rule_id: Option<&str>,
    ) -> Result<Alert, SentinelError> {
        self.transition(alert_id, new_status, reason, triggered_by, rule_id, None)
            .await
    }

    /// Manual resolution: RESOLVED plus `resolved_by` and
    /// `resolution_notes` in the same write.
    pub async fn add_resolution(
        &self,
        alert_id: &str,
        notes: &str,
        user_id: &str,
    ) -> Result<Alert, SentinelError> {
        let reason = format!("Alert resolved by user {user_id}");
        self.transition(
            alert_id,
            AlertStatus::Resolved,
            &reason,
            user_id,
            None,
            Some((user_id, notes)),
        )
        .await
    }

    async fn transition(
        &self,
        alert_id: &str,
        new_status: AlertStatus,
        reason: &str,
        triggered_by: &str,
        rule_id: Option<&str>,
        resolution: Option<(&str, &str)>,
    ) -> Result<Alert, SentinelError> {
        for attempt in 0..TRANSITION_ATTEMPTS {
            let alert = self
                .alerts
                .get(alert_id)
                .await?
                .ok_or_else(|| SentinelError::AlertNotFound(alert_id.to_string()))?;
            alert.status.ensure_can_transition_to(new_status)?;

            let now = Utc::now();
            let update = TransitionUpdate {
                expected: alert.status,
                new_status,
                now,
                severity: (new_status == AlertStatus::Escalated).then_some(AlertSeverity::Critical),
                escalated_at: (new_status == AlertStatus::Escalated).then_some(now),
                closed_at: (new_status == AlertStatus::AutoClosed).then_some(now),
                resolved_at: (new_status == AlertStatus::Resolved).then_some(now),
                auto_close_reason: (new_status == AlertStatus::AutoClosed)
                    .then(|| reason.to_string()),
                resolved_by: resolution.map(|(user, _)| user.to_string()),
                resolution_notes: resolution.map(|(_, notes)| notes.to_string()),
                record: AlertStateTransition {
                    from_status: alert.status,
                    to_status: new_status,
                    timestamp: now,
                    reason: reason.to_string(),
                    triggered_by: triggered_by.to_string(),
                    rule_triggered: rule_id.map(str::to_string),
                },
            };

            if self.alerts.apply_transition(alert_id, &update).await? {
                info!(
                    alert_id = %alert_id,
                    from = %alert.status,
                    to = %new_status,
                    triggered_by = %triggered_by,
                    "alert transitioned"
                );
                return self.reread(alert_id).await;
            }
            // A concurrent writer moved the alert between read and write;
            // re-read and re-validate against the transition table.
            debug!(alert_id = %alert_id, attempt, "transition lost a write race, retrying");
        }
        Err(SentinelError::Store(format!(
            "transition contention on alert {alert_id}"
        )))
    }

    async fn reread(&self, alert_id: &str) -> Result<Alert, SentinelError> {
        self.alerts
            .get(alert_id)
            .await?
            .ok_or_else(|| SentinelError::Store(format!("alert {alert_id} vanished after write")))
    }
}
