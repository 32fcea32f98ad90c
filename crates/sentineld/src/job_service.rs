//! Background-job bookkeeping for scanner runs.

use chrono::Utc;
use tracing::info;

use sentinel_common::job_store::JobStore;
use sentinel_common::{BackgroundJob, Database, JobStats, JobStatus, SentinelError};

#[derive(Clone)]
pub struct JobService {
    jobs: JobStore,
}

impl JobService {
    pub fn new(db: &Database) -> Self {
        Self { jobs: db.jobs() }
    }

    /// Open a record for a run that just started
    pub async fn open(&self, job_type: &str) -> Result<BackgroundJob, SentinelError> {
        let job = BackgroundJob::started(generate_job_id(), job_type, Utc::now());
        self.jobs.insert(&job).await?;
        info!(job_id = %job.job_id, job_type, "job record created");
        Ok(job)
    }

    /// Stamp the run's outcome and duration onto its record
    pub async fn finalize(
        &self,
        job: &BackgroundJob,
        status: JobStatus,
        stats: JobStats,
        errors: Vec<String>,
    ) -> Result<(), SentinelError> {
        let completed_at = Utc::now();
        let execution_time_ms = (completed_at - job.started_at).num_milliseconds();
        let updated = self
            .jobs
            .finalize(
                &job.job_id,
                status,
                completed_at,
                execution_time_ms,
                stats,
                &errors,
            )
            .await?;
        if !updated {
            return Err(SentinelError::Store(format!(
                "job record {} missing at finalize",
                job.job_id
            )));
        }
        info!(
            job_id = %job.job_id,
            status = %status,
            processed = stats.alerts_processed,
            closed = stats.alerts_closed,
            execution_time_ms,
            "job record finalized"
        );
        Ok(())
    }

    /// Most recent runs first
    pub async fn recent(&self, limit: u32) -> Result<Vec<BackgroundJob>, SentinelError> {
        self.jobs.recent(limit).await
    }
}

/// Job ids look like `JOB-20250801-142530-9f3ac1d2`
fn generate_job_id() -> String {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let suffix = hex::encode(rand::random::<[u8; 4]>());
    format!("JOB-{stamp}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_shape() {
        let id = generate_job_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "JOB");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = generate_job_id();
        let b = generate_job_id();
        assert_ne!(a, b);
    }
}
