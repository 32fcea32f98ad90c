//! Alert collection: CRUD, filtered listing, window counting, and the
//! guarded state-transition update.
//!
//! `driver_id` is denormalized out of the metadata document into an
//! indexed column for the count-in-window query; the JSON document stays
//! the source of truth.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde_json::{Map, Value};

use crate::alert::{Alert, AlertSeverity, AlertStateTransition, AlertStatus};
use crate::db::{
    column_decode_err, datetime_from_millis, millis, opt_datetime_from_millis, opt_millis,
    Database,
};
use crate::error::SentinelError;
use crate::source::SourceType;

const ALERT_COLUMNS: &str = "alert_id, source_type, severity, status, timestamp, metadata, \
     state_history, escalated_at, closed_at, resolved_at, auto_close_reason, expires_at, \
     resolved_by, resolution_notes, created_at, updated_at";

/// Filter for alert listings; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub source_type: Option<SourceType>,
    pub severity: Option<AlertSeverity>,
    pub driver_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl AlertFilter {
    fn clauses(&self) -> (String, Vec<SqlValue>) {
        let mut conds: Vec<&str> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        if let Some(status) = self.status {
            conds.push("status = ?");
            params.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(source) = self.source_type {
            conds.push("source_type = ?");
            params.push(SqlValue::Text(source.as_str().to_string()));
        }
        if let Some(severity) = self.severity {
            conds.push("severity = ?");
            params.push(SqlValue::Text(severity.as_str().to_string()));
        }
        if let Some(driver) = &self.driver_id {
            conds.push("driver_id = ?");
            params.push(SqlValue::Text(driver.clone()));
        }
        if let Some(start) = self.start {
            conds.push("timestamp >= ?");
            params.push(SqlValue::Integer(millis(start)));
        }
        if let Some(end) = self.end {
            conds.push("timestamp <= ?");
            params.push(SqlValue::Integer(millis(end)));
        }

        if conds.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", conds.join(" AND ")), params)
        }
    }
}

/// One atomic state-transition write. The update only lands when the
/// stored status still equals `expected`, which is what serializes
/// concurrent transition attempts on the same alert.
#[derive(Debug, Clone)]
pub struct TransitionUpdate {
    pub expected: AlertStatus,
    pub new_status: AlertStatus,
    pub now: DateTime<Utc>,
    /// Severity promotion; absent fields leave the stored value alone
    pub severity: Option<AlertSeverity>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub auto_close_reason: Option<String>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    /// History entry appended in the same write
    pub record: AlertStateTransition,
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
    let source_raw: String = row.get(1)?;
    let source_type: SourceType = source_raw
        .parse()
        .map_err(|e| column_decode_err(1, e))?;
    let severity_raw: String = row.get(2)?;
    let severity: AlertSeverity = severity_raw
        .parse()
        .map_err(|e| column_decode_err(2, e))?;
    let status_raw: String = row.get(3)?;
    let status: AlertStatus = status_raw
        .parse()
        .map_err(|e| column_decode_err(3, e))?;
    let metadata_raw: String = row.get(5)?;
    let metadata: Map<String, Value> =
        serde_json::from_str(&metadata_raw).map_err(|e| column_decode_err(5, e))?;
    let history_raw: String = row.get(6)?;
    let state_history: Vec<AlertStateTransition> =
        serde_json::from_str(&history_raw).map_err(|e| column_decode_err(6, e))?;

    Ok(Alert {
        alert_id: row.get(0)?,
        source_type,
        severity,
        status,
        timestamp: datetime_from_millis(4, row.get(4)?)?,
        metadata,
        state_history,
        escalated_at: opt_datetime_from_millis(7, row.get(7)?)?,
        closed_at: opt_datetime_from_millis(8, row.get(8)?)?,
        resolved_at: opt_datetime_from_millis(9, row.get(9)?)?,
        auto_close_reason: row.get(10)?,
        expires_at: opt_datetime_from_millis(11, row.get(11)?)?,
        resolved_by: row.get(12)?,
        resolution_notes: row.get(13)?,
        created_at: datetime_from_millis(14, row.get(14)?)?,
        updated_at: opt_datetime_from_millis(15, row.get(15)?)?,
    })
}

#[derive(Clone)]
pub struct AlertStore {
    db: Database,
}

impl AlertStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn insert(&self, alert: &Alert) -> Result<(), SentinelError> {
        let metadata = serde_json::to_string(&alert.metadata)?;
        let history = serde_json::to_string(&alert.state_history)?;
        let driver_id = alert.driver_id().map(str::to_string);
        let alert = alert.clone();
        self.db
            .conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO alerts (alert_id, source_type, severity, status, timestamp, \
                     driver_id, metadata, state_history, escalated_at, closed_at, resolved_at, \
                     auto_close_reason, expires_at, resolved_by, resolution_notes, created_at, \
                     updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
                     ?16, ?17)",
                    params![
                        alert.alert_id,
                        alert.source_type.as_str(),
                        alert.severity.as_str(),
                        alert.status.as_str(),
                        millis(alert.timestamp),
                        driver_id,
                        metadata,
                        history,
                        opt_millis(alert.escalated_at),
                        opt_millis(alert.closed_at),
                        opt_millis(alert.resolved_at),
                        alert.auto_close_reason,
                        opt_millis(alert.expires_at),
                        alert.resolved_by,
                        alert.resolution_notes,
                        millis(alert.created_at),
                        opt_millis(alert.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Point lookup by alert id
    pub async fn get(&self, alert_id: &str) -> Result<Option<Alert>, SentinelError> {
        let id = alert_id.to_string();
        let alert = self
            .db
            .conn()
            .call(move |conn| {
                let found = conn
                    .query_row(
                        &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE alert_id = ?1"),
                        params![id],
                        alert_from_row,
                    )
                    .optional()?;
                Ok(found)
            })
            .await?;
        Ok(alert)
    }

    /// One page of alerts plus the total matching count, fetched in a
    /// single transaction so the two stay consistent under concurrent
    /// writes. Sorted by event timestamp descending.
    pub async fn list(
        &self,
        filter: &AlertFilter,
        skip: u32,
        limit: u32,
    ) -> Result<(Vec<Alert>, u64), SentinelError> {
        let filter = filter.clone();
        let result = self
            .db
            .conn()
            .call(move |conn| {
                let (where_sql, filter_params) = filter.clauses();
                let tx = conn.transaction()?;
                let total: i64 = tx.query_row(
                    &format!("SELECT COUNT(*) FROM alerts{where_sql}"),
                    params_from_iter(filter_params.clone()),
                    |row| row.get(0),
                )?;

                let mut page_params = filter_params;
                page_params.push(SqlValue::Integer(i64::from(limit)));
                page_params.push(SqlValue::Integer(i64::from(skip)));
                let mut stmt = tx.prepare(&format!(
                    "SELECT {ALERT_COLUMNS} FROM alerts{where_sql} \
                     ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?"
                ))?;
                let alerts = stmt
                    .query_map(params_from_iter(page_params), alert_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                drop(stmt);
                tx.commit()?;
                Ok((alerts, total as u64))
            })
            .await?;
        Ok(result)
    }

    /// Count alerts for the escalation window: same driver, same source,
    /// still open or escalated, event timestamp at or after the window
    /// start, excluding the alert being evaluated.
    pub async fn count_in_window(
        &self,
        driver_id: &str,
        source_type: SourceType,
        window_start: DateTime<Utc>,
        exclude_alert_id: &str,
    ) -> Result<u64, SentinelError> {
        let driver = driver_id.to_string();
        let source = source_type.as_str();
        let exclude = exclude_alert_id.to_string();
        let count = self
            .db
            .conn()
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM alerts \
                     WHERE driver_id = ?1 AND source_type = ?2 \
                     AND status IN ('OPEN', 'ESCALATED') \
                     AND timestamp >= ?3 AND alert_id <> ?4",
                    params![driver, source, millis(window_start), exclude],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await?;
        Ok(count)
    }

    /// Snapshot of every non-terminal alert, oldest first. Materialized in
    /// one query; the scanner iterates the snapshot, not a live cursor.
    pub async fn pending(&self) -> Result<Vec<Alert>, SentinelError> {
        let alerts = self
            .db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ALERT_COLUMNS} FROM alerts \
                     WHERE status IN ('OPEN', 'ESCALATED') ORDER BY created_at ASC, id ASC"
                ))?;
                let alerts = stmt
                    .query_map([], alert_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(alerts)
            })
            .await?;
        Ok(alerts)
    }

    /// Apply one state transition in a single write: status, bookkeeping
    /// timestamps, optional severity promotion and closure/resolution
    /// fields, and the history append. Returns false when the stored
    /// status no longer matches `update.expected` (a concurrent writer
    /// won) or the alert does not exist.
    pub async fn apply_transition(
        &self,
        alert_id: &str,
        update: &TransitionUpdate,
    ) -> Result<bool, SentinelError> {
        let id = alert_id.to_string();
        let record_json = serde_json::to_string(&update.record)?;
        let update = update.clone();
        let changed = self
            .db
            .conn()
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE alerts SET \
                        status = ?1, \
                        updated_at = ?2, \
                        severity = COALESCE(?3, severity), \
                        escalated_at = COALESCE(?4, escalated_at), \
                        closed_at = COALESCE(?5, closed_at), \
                        resolved_at = COALESCE(?6, resolved_at), \
                        auto_close_reason = COALESCE(?7, auto_close_reason), \
                        resolved_by = COALESCE(?8, resolved_by), \
                        resolution_notes = COALESCE(?9, resolution_notes), \
                        state_history = json_insert(state_history, '$[#]', json(?10)) \
                     WHERE alert_id = ?11 AND status = ?12",
                    params![
                        update.new_status.as_str(),
                        millis(update.now),
                        update.severity.map(|s| s.as_str()),
                        opt_millis(update.escalated_at),
                        opt_millis(update.closed_at),
                        opt_millis(update.resolved_at),
                        update.auto_close_reason,
                        update.resolved_by,
                        update.resolution_notes,
                        record_json,
                        id,
                        update.expected.as_str(),
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(changed)
    }

    /// Replace the metadata document (and the denormalized driver column).
    /// This is the store-level write collaborators use to patch domain
    /// attributes such as `document_valid`.
    pub async fn set_metadata(
        &self,
        alert_id: &str,
        metadata: &Map<String, Value>,
    ) -> Result<bool, SentinelError> {
        let id = alert_id.to_string();
        let driver_id = metadata
            .get("driver_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let metadata = serde_json::to_string(metadata)?;
        let now = millis(Utc::now());
        let changed = self
            .db
            .conn()
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE alerts SET metadata = ?1, driver_id = ?2, updated_at = ?3 \
                     WHERE alert_id = ?4",
                    params![metadata, driver_id, now, id],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(changed)
    }

    /// Override the expiry instant. Test- and backfill-oriented store write.
    pub async fn set_expires_at(
        &self,
        alert_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, SentinelError> {
        let id = alert_id.to_string();
        let expires = opt_millis(expires_at);
        let changed = self
            .db
            .conn()
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE alerts SET expires_at = ?1 WHERE alert_id = ?2",
                    params![expires, id],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::CREATION_REASON;

    fn sample_alert(alert_id: &str, driver: &str) -> Alert {
        let now = Utc::now();
        let mut metadata = Map::new();
        metadata.insert("driver_id".into(), Value::String(driver.into()));
        Alert {
            alert_id: alert_id.into(),
            source_type: SourceType::Overspeeding,
            severity: AlertSeverity::Warning,
            status: AlertStatus::Open,
            timestamp: now,
            metadata,
            state_history: vec![AlertStateTransition::creation(now)],
            escalated_at: None,
            closed_at: None,
            resolved_at: None,
            auto_close_reason: None,
            expires_at: Some(now + chrono::Duration::days(7)),
            resolved_by: None,
            resolution_notes: None,
            created_at: now,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let store = db.alerts();
        let alert = sample_alert("OSP-2025-00001", "DRV001");
        store.insert(&alert).await.unwrap();

        let fetched = store.get("OSP-2025-00001").await.unwrap().unwrap();
        assert_eq!(fetched.alert_id, alert.alert_id);
        assert_eq!(fetched.source_type, SourceType::Overspeeding);
        assert_eq!(fetched.status, AlertStatus::Open);
        assert_eq!(fetched.driver_id(), Some("DRV001"));
        assert_eq!(fetched.state_history.len(), 1);
        assert_eq!(fetched.state_history[0].reason, CREATION_REASON);

        assert!(store.get("OSP-2025-09999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_and_count_stay_consistent() {
        let db = Database::open_in_memory().await.unwrap();
        let store = db.alerts();
        for i in 1..=5 {
            let driver = if i <= 3 { "DRV001" } else { "DRV002" };
            store
                .insert(&sample_alert(&format!("OSP-2025-{i:05}"), driver))
                .await
                .unwrap();
        }

        let filter = AlertFilter {
            driver_id: Some("DRV001".into()),
            ..Default::default()
        };
        let (page, total) = store.list(&filter, 0, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);

        let (rest, total) = store.list(&filter, 2, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn test_transition_guard_rejects_stale_status() {
        let db = Database::open_in_memory().await.unwrap();
        let store = db.alerts();
        store
            .insert(&sample_alert("OSP-2025-00001", "DRV001"))
            .await
            .unwrap();

        let now = Utc::now();
        let update = TransitionUpdate {
            expected: AlertStatus::Escalated,
            new_status: AlertStatus::Resolved,
            now,
            severity: None,
            escalated_at: None,
            closed_at: None,
            resolved_at: Some(now),
            auto_close_reason: None,
            resolved_by: None,
            resolution_notes: Some("done".into()),
            record: AlertStateTransition {
                from_status: AlertStatus::Escalated,
                to_status: AlertStatus::Resolved,
                timestamp: now,
                reason: "done".into(),
                triggered_by: "user-1".into(),
                rule_triggered: None,
            },
        };
        // Stored status is OPEN, not ESCALATED; the guarded write must miss
        assert!(!store.apply_transition("OSP-2025-00001", &update).await.unwrap());

        let unchanged = store.get("OSP-2025-00001").await.unwrap().unwrap();
        assert_eq!(unchanged.status, AlertStatus::Open);
        assert_eq!(unchanged.state_history.len(), 1);
    }

    #[tokio::test]
    async fn test_transition_appends_history_in_same_write() {
        let db = Database::open_in_memory().await.unwrap();
        let store = db.alerts();
        store
            .insert(&sample_alert("OSP-2025-00001", "DRV001"))
            .await
            .unwrap();

        let now = Utc::now();
        let update = TransitionUpdate {
            expected: AlertStatus::Open,
            new_status: AlertStatus::Escalated,
            now,
            severity: Some(AlertSeverity::Critical),
            escalated_at: Some(now),
            closed_at: None,
            resolved_at: None,
            auto_close_reason: None,
            resolved_by: None,
            resolution_notes: None,
            record: AlertStateTransition {
                from_status: AlertStatus::Open,
                to_status: AlertStatus::Escalated,
                timestamp: now,
                reason: "threshold met".into(),
                triggered_by: "system".into(),
                rule_triggered: Some("RULE-OSP-001".into()),
            },
        };
        assert!(store.apply_transition("OSP-2025-00001", &update).await.unwrap());

        let updated = store.get("OSP-2025-00001").await.unwrap().unwrap();
        assert_eq!(updated.status, AlertStatus::Escalated);
        assert_eq!(updated.severity, AlertSeverity::Critical);
        assert!(updated.escalated_at.is_some());
        assert!(updated.updated_at.is_some());
        assert_eq!(updated.state_history.len(), 2);
        assert_eq!(
            updated.state_history[1].rule_triggered.as_deref(),
            Some("RULE-OSP-001")
        );
    }

    #[tokio::test]
    async fn test_window_count_excludes_current_and_old_alerts() {
        let db = Database::open_in_memory().await.unwrap();
        let store = db.alerts();
        let now = Utc::now();

        let mut recent = sample_alert("OSP-2025-00001", "DRV001");
        recent.timestamp = now - chrono::Duration::minutes(10);
        store.insert(&recent).await.unwrap();

        let mut old = sample_alert("OSP-2025-00002", "DRV001");
        old.timestamp = now - chrono::Duration::minutes(90);
        store.insert(&old).await.unwrap();

        let mut current = sample_alert("OSP-2025-00003", "DRV001");
        current.timestamp = now;
        store.insert(&current).await.unwrap();

        let window_start = now - chrono::Duration::minutes(60);
        let count = store
            .count_in_window("DRV001", SourceType::Overspeeding, window_start, "OSP-2025-00003")
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_set_metadata_updates_document_and_driver_column() {
        let db = Database::open_in_memory().await.unwrap();
        let store = db.alerts();
        store
            .insert(&sample_alert("DOC-2025-00001", "DRV009"))
            .await
            .unwrap();

        let mut metadata = Map::new();
        metadata.insert("driver_id".into(), Value::String("DRV010".into()));
        metadata.insert("document_valid".into(), Value::Bool(true));
        assert!(store.set_metadata("DOC-2025-00001", &metadata).await.unwrap());

        let updated = store.get("DOC-2025-00001").await.unwrap().unwrap();
        assert_eq!(updated.driver_id(), Some("DRV010"));
        assert_eq!(updated.document_valid(), Some(true));

        let count = store
            .count_in_window(
                "DRV010",
                SourceType::Overspeeding,
                Utc::now() - chrono::Duration::minutes(60),
                "none",
            )
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
