//! Background-job collection: one row per scanner run.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{column_decode_err, datetime_from_millis, millis, opt_datetime_from_millis, Database};
use crate::error::SentinelError;
use crate::job::{BackgroundJob, JobStats, JobStatus};

const JOB_COLUMNS: &str =
    "job_id, job_type, status, started_at, completed_at, execution_time_ms, alerts_processed, \
     alerts_closed, alerts_escalated, errors";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<BackgroundJob> {
    let status_raw: String = row.get(2)?;
    let status: JobStatus = status_raw
        .parse()
        .map_err(|e| column_decode_err(2, e))?;
    let errors_raw: String = row.get(9)?;
    let errors: Vec<String> =
        serde_json::from_str(&errors_raw).map_err(|e| column_decode_err(9, e))?;

    Ok(BackgroundJob {
        job_id: row.get(0)?,
        job_type: row.get(1)?,
        status,
        started_at: datetime_from_millis(3, row.get(3)?)?,
        completed_at: opt_datetime_from_millis(4, row.get(4)?)?,
        execution_time_ms: row.get(5)?,
        alerts_processed: row.get::<_, i64>(6)? as u64,
        alerts_closed: row.get::<_, i64>(7)? as u64,
        alerts_escalated: row.get::<_, i64>(8)? as u64,
        errors,
    })
}

#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn insert(&self, job: &BackgroundJob) -> Result<(), SentinelError> {
        let errors = serde_json::to_string(&job.errors)?;
        let job = job.clone();
        self.db
            .conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO background_jobs (job_id, job_type, status, started_at, \
                     completed_at, execution_time_ms, alerts_processed, alerts_closed, \
                     alerts_escalated, errors) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        job.job_id,
                        job.job_type,
                        job.status.as_str(),
                        millis(job.started_at),
                        job.completed_at.map(millis),
                        job.execution_time_ms,
                        job.alerts_processed as i64,
                        job.alerts_closed as i64,
                        job.alerts_escalated as i64,
                        errors,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Stamp the run's outcome. Returns false when the record is missing.
    pub async fn finalize(
        &self,
        job_id: &str,
        status: JobStatus,
        completed_at: DateTime<Utc>,
        execution_time_ms: i64,
        stats: JobStats,
        errors: &[String],
    ) -> Result<bool, SentinelError> {
        let id = job_id.to_string();
        let errors = serde_json::to_string(errors)?;
        let changed = self
            .db
            .conn()
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE background_jobs SET status = ?1, completed_at = ?2, \
                     execution_time_ms = ?3, alerts_processed = ?4, alerts_closed = ?5, \
                     alerts_escalated = ?6, errors = ?7 \
                     WHERE job_id = ?8",
                    params![
                        status.as_str(),
                        millis(completed_at),
                        execution_time_ms,
                        stats.alerts_processed as i64,
                        stats.alerts_closed as i64,
                        stats.alerts_escalated as i64,
                        errors,
                        id,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(changed)
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<BackgroundJob>, SentinelError> {
        let id = job_id.to_string();
        let job = self
            .db
            .conn()
            .call(move |conn| {
                let found = conn
                    .query_row(
                        &format!("SELECT {JOB_COLUMNS} FROM background_jobs WHERE job_id = ?1"),
                        params![id],
                        job_from_row,
                    )
                    .optional()?;
                Ok(found)
            })
            .await?;
        Ok(job)
    }

    /// Most recent runs first
    pub async fn recent(&self, limit: u32) -> Result<Vec<BackgroundJob>, SentinelError> {
        let jobs = self
            .db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM background_jobs \
                     ORDER BY started_at DESC, id DESC LIMIT ?1"
                ))?;
                let jobs = stmt
                    .query_map(params![i64::from(limit)], job_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(jobs)
            })
            .await?;
        Ok(jobs)
    }
}
