use chrono::{TimeZone, Utc};
use episode_log::{seed, EpisodeLog, EpisodeStore};
use shared::{domain::Severity, protocol::EpisodeDraft};

#[tokio::test]
async fn exported_log_reloads_with_same_records_in_same_order() {
    let now = Utc.with_ymd_and_hms(2025, 9, 26, 9, 30, 0).unwrap();
    let store = EpisodeStore::with_log(seed::demo_log(now).expect("demo log"));
    store
        .add(
            EpisodeDraft::new("Work stress", 8.5, 142, Severity::Moderate)
                .at(now)
                .with_notes("Before standup"),
        )
        .await
        .expect("add");

    let raw = store.export_json().await.expect("export");
    let reloaded = EpisodeLog::from_json(&raw).expect("reload");

    assert_eq!(reloaded.records(), store.records().await.as_slice());
    assert_eq!(reloaded.records()[0].cause, "Work stress");
}

#[test]
fn persisted_records_use_camel_case_layout() {
    let raw = r#"[
        {
            "id": "6f2b8c1e-3d4a-4f5b-9c6d-7e8f9a0b1c2d",
            "timestamp": "2025-09-25T12:00:00Z",
            "cause": "Crowded subway",
            "durationMinutes": 12.0,
            "averageHeartRate": 156,
            "severity": "Severe",
            "notes": "Rush hour commute was overwhelming."
        },
        {
            "id": "0a1b2c3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d",
            "timestamp": "2025-09-19T12:00:00Z",
            "cause": "Social anxiety at party",
            "durationMinutes": 5.2,
            "averageHeartRate": 128,
            "severity": "Mild"
        }
    ]"#;

    let log = EpisodeLog::from_json(raw).expect("parse");
    assert_eq!(log.len(), 2);
    assert_eq!(log.records()[0].severity, Severity::Severe);
    assert_eq!(log.records()[1].notes, None);
    assert_eq!(log.average_heart_rate(), 142);
}

#[test]
fn persisted_log_with_invalid_record_is_rejected() {
    let raw = r#"[
        {
            "id": "6f2b8c1e-3d4a-4f5b-9c6d-7e8f9a0b1c2d",
            "timestamp": "2025-09-25T12:00:00Z",
            "cause": "Broken",
            "durationMinutes": -3.0,
            "averageHeartRate": 156,
            "severity": "Severe"
        }
    ]"#;

    assert!(EpisodeLog::from_json(raw).is_err());
}
