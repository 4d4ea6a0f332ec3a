//! Text rendering of orchestrator events and episode statistics.

use episode_log::EpisodeSummary;
use session_core::SessionSnapshot;
use shared::{
    domain::{Severity, Stage},
    protocol::{EpisodeRecord, PresentationEvent},
};

/// Display colour and icon for each severity.
pub fn severity_style(severity: Severity) -> (&'static str, &'static str) {
    match severity {
        Severity::Mild => ("green", "circle.fill"),
        Severity::Moderate => ("yellow", "triangle.fill"),
        Severity::Severe => ("orange", "exclamationmark.triangle.fill"),
        Severity::Extreme => ("red", "exclamationmark.octagon.fill"),
    }
}

pub fn stage_caption(stage: Stage) -> &'static str {
    match stage {
        Stage::Idle => "Tap the orb when you need an anchor.",
        Stage::Engaging => "Dropping anchor...",
        Stage::HandoffPending => "Sinking below the surface...",
        Stage::Active => "Grounding session in progress.",
        Stage::Resetting => "Surfacing...",
    }
}

pub fn render_event(event: &PresentationEvent) -> String {
    match event {
        PresentationEvent::StageChanged { stage, entered_at, .. } => format!(
            "[{}] stage -> {stage}: {}",
            entered_at.format("%H:%M:%S%.3f"),
            stage_caption(*stage)
        ),
        PresentationEvent::UiFaded { .. } => "menu faded out".to_string(),
        PresentationEvent::BackgroundFading { .. } => "background fading".to_string(),
        PresentationEvent::HandoffStarted { session_id } => {
            format!("handing off to crisis protocol (session {session_id})")
        }
        PresentationEvent::EpisodeRecorded { episode_id, .. } => {
            format!("episode {episode_id} recorded")
        }
        PresentationEvent::SessionFailed(notice) => {
            format!("session failed ({:?}): {}", notice.code, notice.message)
        }
    }
}

pub fn render_snapshot(snapshot: &SessionSnapshot) -> String {
    let mut line = format!(
        "stage={} menu_opacity={:.1} background_opacity={:.1} pending_timers={}",
        snapshot.stage,
        snapshot.menu_opacity(),
        snapshot.background_opacity(),
        snapshot.pending_timers
    );
    if let Some(notice) = &snapshot.last_error {
        line.push_str(&format!(" error={:?}: {}", notice.code, notice.message));
    }
    line
}

pub fn render_record(record: &EpisodeRecord) -> String {
    let (color, icon) = severity_style(record.severity);
    let mut line = format!(
        "{id}  {date}  {severity:<8} [{color}/{icon}]  {cause}  {duration:.1} min  {rate} BPM",
        id = record.id,
        date = record.timestamp.format("%Y-%m-%d"),
        severity = record.severity,
        cause = record.cause,
        duration = record.duration_minutes,
        rate = record.average_heart_rate,
    );
    if let Some(notes) = record.notes.as_deref().filter(|n| !n.is_empty()) {
        line.push_str("\n    ");
        line.push_str(notes);
    }
    line
}

pub fn render_summary(summary: &EpisodeSummary) -> String {
    let mut out = format!(
        "Total episodes: {}\nAverage duration: {:.1} min\nAverage heart rate: {} BPM\nMost common cause: {}\nSeverity:",
        summary.total_episodes,
        summary.average_duration_minutes,
        summary.average_heart_rate,
        summary.most_common_cause,
    );
    for (severity, count) in &summary.severity_distribution {
        let (color, _) = severity_style(*severity);
        out.push_str(&format!("\n  {severity:<8} ({color}): {count}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use episode_log::EpisodeLog;
    use shared::protocol::EpisodeDraft;

    use super::*;

    #[test]
    fn every_severity_has_a_distinct_style() {
        let styles: Vec<_> = Severity::ALL.into_iter().map(severity_style).collect();
        for (i, a) in styles.iter().enumerate() {
            for b in &styles[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn summary_lists_all_severities_even_when_empty() {
        let rendered = render_summary(&EpisodeLog::new().summary());
        assert!(rendered.contains("Most common cause: Unknown"));
        for severity in Severity::ALL {
            assert!(rendered.contains(&format!("{severity:<8} (")));
        }
    }

    #[test]
    fn record_line_includes_measurements_and_notes() {
        let record = EpisodeDraft::new("Crowded subway", 12.0, 156, Severity::Severe)
            .at(Utc.with_ymd_and_hms(2025, 9, 23, 8, 0, 0).unwrap())
            .with_notes("Breathing helped")
            .into_record();
        let line = render_record(&record);

        assert!(line.contains("2025-09-23"));
        assert!(line.contains("12.0 min"));
        assert!(line.contains("156 BPM"));
        assert!(line.contains("orange"));
        assert!(line.ends_with("Breathing helped"));
    }
}
