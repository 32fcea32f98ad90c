//! SQLite-backed document store.
//!
//! One database file holds the four collections (`alerts`, `rules`,
//! `counters`, `background_jobs`). All access goes through the async
//! connection so store interactions never block a request task; the
//! connection executes calls one at a time, which also makes each call
//! atomic with respect to every other call.

use std::path::Path;

use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;

use crate::alert_store::AlertStore;
use crate::counter_store::CounterStore;
use crate::error::SentinelError;
use crate::job_store::JobStore;
use crate::rule_store::RuleStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id TEXT NOT NULL UNIQUE,
    source_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    status TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    driver_id TEXT,
    metadata TEXT NOT NULL,
    state_history TEXT NOT NULL,
    escalated_at INTEGER,
    closed_at INTEGER,
    resolved_at INTEGER,
    auto_close_reason TEXT,
    expires_at INTEGER,
    resolved_by TEXT,
    resolution_notes TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status);
CREATE INDEX IF NOT EXISTS idx_alerts_window
    ON alerts(driver_id, source_type, status, timestamp);
CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts(timestamp);

CREATE TABLE IF NOT EXISTS rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_id TEXT NOT NULL UNIQUE,
    source_type TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    conditions TEXT NOT NULL,
    is_active INTEGER NOT NULL,
    priority INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_rules_active ON rules(source_type, is_active);

CREATE TABLE IF NOT EXISTS counters (
    id TEXT PRIMARY KEY,
    sequence INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS background_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL UNIQUE,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    execution_time_ms INTEGER,
    alerts_processed INTEGER NOT NULL DEFAULT 0,
    alerts_closed INTEGER NOT NULL DEFAULT 0,
    alerts_escalated INTEGER NOT NULL DEFAULT 0,
    errors TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_jobs_started ON background_jobs(started_at);
"#;

/// Handle to the document store; cheap to clone
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database file and bootstrap the schema
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, SentinelError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SentinelError::Store(format!("create database dir: {e}")))?;
        }
        let conn = Connection::open(path.to_path_buf())
            .await
            .map_err(|e| SentinelError::Store(format!("open {}: {e}", path.display())))?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    /// In-memory database, mainly for tests
    pub async fn open_in_memory() -> Result<Self, SentinelError> {
        let conn = Connection::open_in_memory().await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), SentinelError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Cheap liveness probe for health reporting
    pub async fn ping(&self) -> Result<(), SentinelError> {
        self.conn
            .call(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn alerts(&self) -> AlertStore {
        AlertStore::new(self.clone())
    }

    pub fn rules(&self) -> RuleStore {
        RuleStore::new(self.clone())
    }

    pub fn counters(&self) -> CounterStore {
        CounterStore::new(self.clone())
    }

    pub fn jobs(&self) -> JobStore {
        JobStore::new(self.clone())
    }
}

/// Timestamps persist as unix milliseconds
pub(crate) fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn opt_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(millis)
}

pub(crate) fn datetime_from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

pub(crate) fn opt_datetime_from_millis(
    idx: usize,
    ms: Option<i64>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    ms.map(|ms| datetime_from_millis(idx, ms)).transpose()
}

/// Wrap a decode failure so it propagates as a row-mapping error
pub(crate) fn column_decode_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_and_ping() {
        let db = Database::open_in_memory().await.unwrap();
        db.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("sentinel.db");
        let db = Database::open(&path).await.unwrap();
        db.ping().await.unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_millis_round_trip() {
        let now = Utc::now();
        let back = datetime_from_millis(0, millis(now)).unwrap();
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }
}
