use episode_log::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("no async runtime available to schedule stage timers")]
    NoRuntime,
    #[error("stage timer rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimingError {
    #[error("{earlier} ({earlier_secs}s) must not come after {later} ({later_secs}s)")]
    OutOfOrder {
        earlier: &'static str,
        earlier_secs: f64,
        later: &'static str,
        later_secs: f64,
    },
    #[error("{field} must be a finite, non-negative number of seconds")]
    InvalidDelay { field: &'static str },
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to schedule stage transition: {0}")]
    Scheduling(#[from] SchedulingError),
    #[error("failed to record completed episode: {0}")]
    Record(#[from] StoreError),
}
