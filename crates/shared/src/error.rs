use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::EpisodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    Scheduling,
    Protocol,
    Internal,
}

/// Error surfaced to the presentation layer after a session was forced back to idle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub code: ErrorCode,
    pub message: String,
}

impl FailureNotice {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("duration must be >= 0 minutes, got {0}")]
    NegativeDuration(f64),
    #[error("duration must be a finite number of minutes")]
    NonFiniteDuration,
    #[error("average heart rate must be > 0, got {0}")]
    NonPositiveHeartRate(i32),
    #[error("episode {0} already exists")]
    DuplicateId(EpisodeId),
}

impl From<ValidationError> for FailureNotice {
    fn from(value: ValidationError) -> Self {
        Self::new(ErrorCode::Validation, value.to_string())
    }
}
