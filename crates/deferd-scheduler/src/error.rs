use deferd_core::JobId;
use thiserror::Error;

use crate::types::JobStatus;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A durable write failed for a reason other than SQLite itself.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: JobId },

    /// The job is executing and its callback cannot be interrupted.
    #[error("Job {id} is already running and cannot be cancelled")]
    AlreadyRunning { id: JobId },

    /// The job already reached a terminal state.
    #[error("Job {id} is already {status}")]
    AlreadyTerminal { id: JobId, status: JobStatus },

    /// Submission rejected before it entered the queue.
    #[error("Invalid job: {0}")]
    Validation(String),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A stored row carried a status string we do not recognise.
    #[error("Invalid status: {0}")]
    InvalidStatus(String),
}

impl SchedulerError {
    /// Short error code string sent to façade clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::Persistence(_) => "PERSISTENCE_ERROR",
            SchedulerError::JobNotFound { .. } => "JOB_NOT_FOUND",
            SchedulerError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            SchedulerError::AlreadyTerminal { .. } => "ALREADY_TERMINAL",
            SchedulerError::Validation(_) => "VALIDATION_ERROR",
            SchedulerError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            SchedulerError::InvalidStatus(_) => "INVALID_STATUS",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
