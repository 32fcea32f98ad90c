//! Counter collection backing the alert-ID generator.
//!
//! One row per `(prefix, year)`; the increment is a single upsert
//! statement, so concurrent callers can never observe the same sequence
//! value.

use rusqlite::{params, OptionalExtension};

use crate::db::Database;
use crate::error::SentinelError;

#[derive(Clone)]
pub struct CounterStore {
    db: Database,
}

impl CounterStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Atomically increment the counter, creating it at 1, and return the
    /// post-increment value.
    pub async fn next(&self, key: &str) -> Result<i64, SentinelError> {
        let key = key.to_string();
        let sequence = self
            .db
            .conn()
            .call(move |conn| {
                let sequence: i64 = conn.query_row(
                    "INSERT INTO counters (id, sequence) VALUES (?1, 1) \
                     ON CONFLICT(id) DO UPDATE SET sequence = sequence + 1 \
                     RETURNING sequence",
                    params![key],
                    |row| row.get(0),
                )?;
                Ok(sequence)
            })
            .await?;
        Ok(sequence)
    }

    /// Current value without incrementing; absent counters read as None
    pub async fn current(&self, key: &str) -> Result<Option<i64>, SentinelError> {
        let key = key.to_string();
        let sequence = self
            .db
            .conn()
            .call(move |conn| {
                let sequence = conn
                    .query_row(
                        "SELECT sequence FROM counters WHERE id = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(sequence)
            })
            .await?;
        Ok(sequence)
    }
}
