use deferd_core::JobId;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Lifecycle state of a job.
///
/// `scheduled → running → {done, scheduled (retry), dead}`, `done → scheduled`
/// for recurring jobs, and `scheduled → cancelled` outside execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue for its `run_at`.
    Scheduled,
    /// Claimed by the dispatcher; the work callback is executing.
    Running,
    /// Finished successfully (terminal unless recurring).
    Done,
    /// Cancelled before it was dispatched.
    Cancelled,
    /// Retry budget exhausted; kept for inspection, never re-dispatched.
    Dead,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Scheduled,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Cancelled,
        JobStatus::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Dead => "dead",
        }
    }

    /// True for states the job never leaves on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Cancelled | JobStatus::Dead
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobStatus::Scheduled),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "cancelled" => Ok(JobStatus::Cancelled),
            "dead" => Ok(JobStatus::Dead),
            other => Err(SchedulerError::InvalidStatus(other.to_string())),
        }
    }
}

/// A schedulable unit of work. Serialized as-is for external consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Earliest dispatch time, seconds since the Unix epoch.
    pub run_at: f64,
    /// Opaque payload handed verbatim to the work callback.
    pub payload: String,
    pub status: JobStatus,
    /// Failed attempts so far.
    pub retries: u32,
    pub recurring: bool,
    /// Seconds between successful runs of a recurring job.
    pub interval: f64,
    /// Reason of the most recent failed attempt.
    pub last_error: Option<String>,
    pub created_at: f64,
    pub updated_at: f64,
}

impl Job {
    /// Build a fresh `scheduled` job with a new id.
    pub fn new(run_at: f64, payload: String, recurring: bool, interval: f64, now: f64) -> Self {
        Self {
            id: JobId::new(),
            run_at,
            payload,
            status: JobStatus::Scheduled,
            retries: 0,
            recurring,
            interval,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Snapshot of job counts for health reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub total: usize,
    pub scheduled: usize,
    pub running: usize,
    pub done: usize,
    pub cancelled: usize,
    pub dead: usize,
    /// Live entries in the time-ordered queue.
    pub queue_depth: usize,
}

impl SchedulerStats {
    pub(crate) fn count(&mut self, status: JobStatus) {
        self.total += 1;
        match status {
            JobStatus::Scheduled => self.scheduled += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Done => self.done += 1,
            JobStatus::Cancelled => self.cancelled += 1,
            JobStatus::Dead => self.dead += 1,
        }
    }
}
