//! Newest-first log of crisis episodes plus the summary statistics shown to users.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use shared::{
    domain::{EpisodeId, Severity},
    error::ValidationError,
    protocol::{EpisodeDraft, EpisodeRecord},
};

pub mod seed;
mod store;

pub use store::{EpisodeStore, StoreError};

/// Returned by [`EpisodeLog::most_common_cause`] for an empty log.
pub const UNKNOWN_CAUSE: &str = "Unknown";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeLog {
    records: Vec<EpisodeRecord>,
}

/// Aggregates over the whole log, computed in one pass for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeSummary {
    pub total_episodes: usize,
    pub average_duration_minutes: f64,
    pub average_heart_rate: i32,
    pub most_common_cause: String,
    pub severity_distribution: BTreeMap<Severity, usize>,
}

impl EpisodeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a log from records already in newest-first order.
    pub fn from_records(records: Vec<EpisodeRecord>) -> Result<Self, ValidationError> {
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            record.validate()?;
            if !seen.insert(record.id) {
                return Err(ValidationError::DuplicateId(record.id));
            }
        }
        Ok(Self { records })
    }

    pub fn from_json(raw: &str) -> Result<Self, crate::StoreError> {
        let records: Vec<EpisodeRecord> = serde_json::from_str(raw)?;
        Ok(Self::from_records(records)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.records)
    }

    pub fn records(&self) -> &[EpisodeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: EpisodeId) -> Option<&EpisodeRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    /// Validates the draft and inserts it at the head of the log.
    pub fn add(&mut self, draft: impl Into<EpisodeDraft>) -> Result<EpisodeRecord, ValidationError> {
        let draft = draft.into();
        draft.validate()?;
        if let Some(id) = draft.id {
            if self.get(id).is_some() {
                return Err(ValidationError::DuplicateId(id));
            }
        }

        let record = draft.into_record();
        self.records.insert(0, record.clone());
        Ok(record)
    }

    /// Replaces the record with the same id in place.
    ///
    /// Returns `Ok(false)` without touching the log when the id is unknown.
    /// Unlike a missing id, replacing a known record with invalid measurements
    /// is an error and leaves the log unchanged.
    pub fn update(&mut self, record: EpisodeRecord) -> Result<bool, ValidationError> {
        let Some(index) = self.position(record.id) else {
            return Ok(false);
        };
        record.validate()?;
        self.records[index] = record;
        Ok(true)
    }

    /// Removes the record with `id`; unknown ids are ignored.
    pub fn delete(&mut self, id: EpisodeId) -> bool {
        match self.position(id) {
            Some(index) => {
                self.records.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn average_duration(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let total: f64 = self.records.iter().map(|r| r.duration_minutes).sum();
        total / self.records.len() as f64
    }

    /// Mean heart rate with integer division (truncated toward zero).
    pub fn average_heart_rate(&self) -> i32 {
        if self.records.is_empty() {
            return 0;
        }
        let total: i64 = self
            .records
            .iter()
            .map(|r| i64::from(r.average_heart_rate))
            .sum();
        (total / self.records.len() as i64) as i32
    }

    /// Most frequent cause; ties go to the cause that appears first in log order.
    pub fn most_common_cause(&self) -> &str {
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for (index, record) in self.records.iter().enumerate() {
            counts.entry(record.cause.as_str()).or_insert((0, index)).0 += 1;
        }

        counts
            .into_iter()
            .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
                count_a.cmp(count_b).then(first_b.cmp(first_a))
            })
            .map(|(cause, _)| cause)
            .unwrap_or(UNKNOWN_CAUSE)
    }

    pub fn severity_distribution(&self) -> BTreeMap<Severity, usize> {
        let mut distribution: BTreeMap<Severity, usize> =
            Severity::ALL.into_iter().map(|s| (s, 0)).collect();
        for record in &self.records {
            *distribution.entry(record.severity).or_default() += 1;
        }
        distribution
    }

    pub fn summary(&self) -> EpisodeSummary {
        EpisodeSummary {
            total_episodes: self.records.len(),
            average_duration_minutes: self.average_duration(),
            average_heart_rate: self.average_heart_rate(),
            most_common_cause: self.most_common_cause().to_string(),
            severity_distribution: self.severity_distribution(),
        }
    }

    fn position(&self, id: EpisodeId) -> Option<usize> {
        self.records.iter().position(|record| record.id == id)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
