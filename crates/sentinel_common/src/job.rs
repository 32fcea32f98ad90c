//! Background-job execution records, one per scanner run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SentinelError;

/// Execution state of a background job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(SentinelError::Validation(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// Alert counters reported by one job run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub alerts_processed: u64,
    pub alerts_closed: u64,
    /// Always 0 for the scanner; escalation happens on the real-time path
    pub alerts_escalated: u64,
}

/// One document per background job run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundJob {
    pub job_id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<i64>,
    pub alerts_processed: u64,
    pub alerts_closed: u64,
    pub alerts_escalated: u64,
    pub errors: Vec<String>,
}

impl BackgroundJob {
    /// A fresh record for a run that just started
    pub fn started(job_id: String, job_type: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            job_type: job_type.to_string(),
            status: JobStatus::Running,
            started_at,
            completed_at: None,
            execution_time_ms: None,
            alerts_processed: 0,
            alerts_closed: 0,
            alerts_escalated: 0,
            errors: Vec::new(),
        }
    }
}
