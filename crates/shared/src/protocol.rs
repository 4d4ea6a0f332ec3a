use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{EpisodeId, SessionId, Severity, Stage},
    error::{FailureNotice, ValidationError},
};

/// A recorded crisis episode, in its persisted shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeRecord {
    pub id: EpisodeId,
    pub timestamp: DateTime<Utc>,
    pub cause: String,
    pub duration_minutes: f64,
    pub average_heart_rate: i32,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl EpisodeRecord {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_measurements(self.duration_minutes, self.average_heart_rate)
    }
}

/// Candidate episode handed to the log; the id is assigned on insert when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeDraft {
    pub id: Option<EpisodeId>,
    pub timestamp: DateTime<Utc>,
    pub cause: String,
    pub duration_minutes: f64,
    pub average_heart_rate: i32,
    pub severity: Severity,
    pub notes: Option<String>,
}

impl EpisodeDraft {
    pub fn new(
        cause: impl Into<String>,
        duration_minutes: f64,
        average_heart_rate: i32,
        severity: Severity,
    ) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            cause: cause.into(),
            duration_minutes,
            average_heart_rate,
            severity,
            notes: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_measurements(self.duration_minutes, self.average_heart_rate)
    }

    pub fn into_record(self) -> EpisodeRecord {
        EpisodeRecord {
            id: self.id.unwrap_or_default(),
            timestamp: self.timestamp,
            cause: self.cause,
            duration_minutes: self.duration_minutes,
            average_heart_rate: self.average_heart_rate,
            severity: self.severity,
            notes: self.notes,
        }
    }
}

impl From<EpisodeRecord> for EpisodeDraft {
    fn from(value: EpisodeRecord) -> Self {
        Self {
            id: Some(value.id),
            timestamp: value.timestamp,
            cause: value.cause,
            duration_minutes: value.duration_minutes,
            average_heart_rate: value.average_heart_rate,
            severity: value.severity,
            notes: value.notes,
        }
    }
}

fn validate_measurements(
    duration_minutes: f64,
    average_heart_rate: i32,
) -> Result<(), ValidationError> {
    if duration_minutes.is_nan() || duration_minutes.is_infinite() {
        return Err(ValidationError::NonFiniteDuration);
    }
    if duration_minutes < 0.0 {
        return Err(ValidationError::NegativeDuration(duration_minutes));
    }
    if average_heart_rate <= 0 {
        return Err(ValidationError::NonPositiveHeartRate(average_heart_rate));
    }
    Ok(())
}

/// Signals emitted by the orchestrator for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PresentationEvent {
    StageChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        stage: Stage,
        entered_at: DateTime<Utc>,
    },
    UiFaded {
        session_id: SessionId,
    },
    BackgroundFading {
        session_id: SessionId,
    },
    HandoffStarted {
        session_id: SessionId,
    },
    EpisodeRecorded {
        session_id: SessionId,
        episode_id: EpisodeId,
    },
    SessionFailed(FailureNotice),
}
