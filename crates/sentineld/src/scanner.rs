//! Auto-close scanner: one pass = one BackgroundJob record.
//!
//! The pass brackets the deferred evaluation with job bookkeeping: a
//! `running` record up front, then counters, duration, and any per-alert
//! errors stamped at the end. Failing to write the record itself is fatal
//! for the pass; per-alert failures are not.

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use sentinel_common::{JobStatus, SentinelError};

use crate::engine::{RuleEngine, ScanStats};
use crate::job_service::JobService;

/// `job_type` recorded for scanner runs
pub const SCANNER_JOB_TYPE: &str = "auto_close_scanner";

/// What one pass did, for callers and tests
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub job_id: String,
    pub status: JobStatus,
    pub stats: ScanStats,
}

#[derive(Clone)]
pub struct Scanner {
    engine: RuleEngine,
    jobs: JobService,
}

impl Scanner {
    pub fn new(engine: RuleEngine, jobs: JobService) -> Self {
        Self { engine, jobs }
    }

    /// Run one scanner pass. Idempotent: a second pass with no
    /// intervening mutations observes no additional closures.
    pub async fn run_once(&self, cancel: watch::Receiver<bool>) -> Result<ScanReport, SentinelError> {
        let job = self.jobs.open(SCANNER_JOB_TYPE).await.map_err(|err| {
            error!("failed to create scanner job record: {err}");
            err
        })?;
        info!(job_id = %job.job_id, "auto-close scanner pass started");

        let stats = match self.engine.evaluate_all_pending(cancel).await {
            Ok(stats) => stats,
            Err(err) => {
                error!(job_id = %job.job_id, "evaluating pending alerts failed: {err}");
                let mut stats = ScanStats::default();
                stats.errors.push(format!("evaluating pending alerts: {err}"));
                stats
            }
        };

        let status = if stats.errors.is_empty() && !stats.cancelled {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        self.jobs
            .finalize(&job, status, stats.job_stats(), stats.errors.clone())
            .await?;
        info!(
            job_id = %job.job_id,
            status = %status,
            checked = stats.total_checked,
            closed = stats.auto_closed,
            "auto-close scanner pass finished"
        );
        Ok(ScanReport {
            job_id: job.job_id,
            status,
            stats,
        })
    }
}
