//! Demo episodes used to populate a fresh install.

use chrono::{DateTime, Duration, Utc};
use shared::{
    domain::Severity,
    error::ValidationError,
    protocol::{EpisodeDraft, EpisodeRecord},
};

use crate::EpisodeLog;

const DEMO_EPISODES: &[(i64, &str, f64, i32, Severity, &str)] = &[
    (
        1,
        "Work presentation stress",
        8.5,
        142,
        Severity::Moderate,
        "Felt overwhelmed before the big presentation. Anchor helped me focus and stay calm.",
    ),
    (
        3,
        "Crowded subway",
        12.0,
        156,
        Severity::Severe,
        "Rush hour commute was overwhelming. Breathing exercises helped.",
    ),
    (
        7,
        "Social anxiety at party",
        5.2,
        128,
        Severity::Mild,
        "Quick grounding helped me stay calm.",
    ),
    (
        10,
        "Financial stress",
        15.3,
        148,
        Severity::Severe,
        "Budgeting session triggered anxiety. Anchor's breathing exercises were very helpful.",
    ),
    (
        14,
        "Sleep deprivation",
        6.8,
        135,
        Severity::Moderate,
        "Couldn't sleep, started panicking. Grounding techniques helped me relax.",
    ),
    (
        21,
        "Health anxiety",
        22.5,
        162,
        Severity::Extreme,
        "Worried about symptoms. Anchor's emergency contacts feature was reassuring.",
    ),
    (
        28,
        "Relationship conflict",
        9.7,
        139,
        Severity::Moderate,
        "Argument with partner. Deep breathing helped me calm down.",
    ),
    (
        35,
        "Job interview",
        4.2,
        124,
        Severity::Mild,
        "Pre-interview nerves. Quick grounding exercise before going in.",
    ),
];

/// The demo episodes dated relative to `now`, newest first.
pub fn demo_episodes(now: DateTime<Utc>) -> Vec<EpisodeRecord> {
    DEMO_EPISODES
        .iter()
        .map(|&(days_ago, cause, duration, heart_rate, severity, notes)| {
            EpisodeDraft::new(cause, duration, heart_rate, severity)
                .at(now - Duration::days(days_ago))
                .with_notes(notes)
                .into_record()
        })
        .collect()
}

pub fn demo_log(now: DateTime<Utc>) -> Result<EpisodeLog, ValidationError> {
    EpisodeLog::from_records(demo_episodes(now))
}
