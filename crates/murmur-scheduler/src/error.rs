//! Error types for the scheduler.

use murmur_core::error::MurmurError;
use murmur_storage::StoreError;

/// Errors from task-store operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Task store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Task store error: {0}")]
    Storage(String),
    #[error("Invalid schedule '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },
    #[error("Invalid task: {0}")]
    InvalidTask(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => SchedulerError::StoreUnavailable(msg),
            StoreError::Internal(msg) => SchedulerError::Storage(msg),
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<SchedulerError> for MurmurError {
    fn from(err: SchedulerError) -> Self {
        MurmurError::Scheduler(err.to_string())
    }
}

/// Errors from notification delivery. Logged, never retried.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Transport failed: {0}")]
    Transport(String),
    #[error("Delivery rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_error_display() {
        let err = SchedulerError::StoreUnavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "Task store unavailable: connection refused");

        let err = SchedulerError::InvalidSchedule {
            expr: "every tuesday".to_string(),
            reason: "bad pattern".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid schedule 'every tuesday': bad pattern"
        );

        let err = SchedulerError::InvalidTask("content is empty".to_string());
        assert_eq!(err.to_string(), "Invalid task: content is empty");
    }

    #[test]
    fn test_store_error_mapping() {
        let err: SchedulerError = StoreError::Unavailable("down".to_string()).into();
        assert!(matches!(err, SchedulerError::StoreUnavailable(_)));

        let err: SchedulerError = StoreError::Internal("poisoned".to_string()).into();
        assert!(matches!(err, SchedulerError::Storage(_)));
    }

    #[test]
    fn test_scheduler_error_into_murmur_error() {
        let err: MurmurError = SchedulerError::InvalidTask("x".to_string()).into();
        assert!(matches!(err, MurmurError::Scheduler(_)));
    }

    #[test]
    fn test_notify_error_display() {
        let err = NotifyError::Rejected {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Delivery rejected with status 502: bad gateway"
        );
        assert_eq!(
            NotifyError::Transport("reset".to_string()).to_string(),
            "Transport failed: reset"
        );
    }
}
