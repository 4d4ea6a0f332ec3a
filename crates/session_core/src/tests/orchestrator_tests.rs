use super::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::anyhow;
use crate::error::SchedulingError;
use shared::{domain::Severity, error::ValidationError, protocol::EpisodeDraft};
use tokio::sync::{broadcast::error::TryRecvError, Notify};

#[derive(Default)]
struct TestProtocol {
    handles: std::sync::Mutex<Vec<CompletionHandle>>,
    deactivated: std::sync::Mutex<Vec<SessionId>>,
    fail_with: Option<String>,
    /// When set, `activate` does not return until `release` is called.
    gate: Option<Notify>,
    active: AtomicBool,
}

impl TestProtocol {
    fn failing(err: impl Into<String>) -> Self {
        Self {
            fail_with: Some(err.into()),
            ..Self::default()
        }
    }

    fn gated() -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::default()
        }
    }

    fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    fn deactivated(&self) -> Vec<SessionId> {
        self.deactivated.lock().expect("deactivated lock").clone()
    }

    fn activations(&self) -> usize {
        self.handles.lock().expect("handles lock").len()
    }

    fn last_handle(&self) -> CompletionHandle {
        self.handles
            .lock()
            .expect("handles lock")
            .last()
            .cloned()
            .expect("protocol was activated")
    }
}

#[async_trait]
impl CrisisProtocol for TestProtocol {
    async fn activate(&self, completion: CompletionHandle) -> anyhow::Result<()> {
        self.handles
            .lock()
            .expect("handles lock")
            .push(completion);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn deactivate(&self, session_id: SessionId) -> anyhow::Result<()> {
        self.deactivated
            .lock()
            .expect("deactivated lock")
            .push(session_id);
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Delegates to tokio but refuses the n-th (1-based) schedule request.
struct FlakyScheduler {
    fail_on_call: usize,
    calls: AtomicUsize,
}

impl StageScheduler for FlakyScheduler {
    fn schedule(
        &self,
        delay: Duration,
        task: BoxFuture<'static, ()>,
    ) -> Result<ScheduledTask, SchedulingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on_call {
            return Err(SchedulingError::Rejected("timer pool exhausted".to_string()));
        }
        TokioScheduler.schedule(delay, task)
    }
}

fn orchestrator_with(
    protocol: Arc<TestProtocol>,
) -> (Arc<SessionOrchestrator>, Arc<EpisodeStore>) {
    let store = Arc::new(EpisodeStore::in_memory());
    let orchestrator =
        SessionOrchestrator::new(StageTimings::default(), protocol, Arc::clone(&store));
    (orchestrator, store)
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

async fn advance_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    settle().await;
}

fn drain(rx: &mut broadcast::Receiver<PresentationEvent>) -> Vec<PresentationEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
}

fn stages(events: &[PresentationEvent]) -> Vec<Stage> {
    events
        .iter()
        .filter_map(|event| match event {
            PresentationEvent::StageChanged { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect()
}

fn episode(cause: &str) -> EpisodeRecord {
    EpisodeDraft::new(cause, 8.5, 142, Severity::Moderate).into_record()
}

#[tokio::test(start_paused = true)]
async fn start_enters_engaging_synchronously() {
    let protocol = Arc::new(TestProtocol::default());
    let (orchestrator, _) = orchestrator_with(Arc::clone(&protocol));

    let outcome = orchestrator.start().await.expect("start");
    let StartOutcome::Started(session_id) = outcome else {
        panic!("expected a new session, got {outcome:?}");
    };

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.stage, Stage::Engaging);
    assert_eq!(snapshot.session_id, Some(session_id));
    assert_eq!(snapshot.pending_timers, 3);
    assert_eq!(snapshot.menu_opacity(), 1.0);
    assert_eq!(protocol.activations(), 0);
}

#[tokio::test(start_paused = true)]
async fn uncancelled_session_reaches_active_and_activates_once() {
    let protocol = Arc::new(TestProtocol::default());
    let (orchestrator, _) = orchestrator_with(Arc::clone(&protocol));
    let mut events = orchestrator.subscribe();

    orchestrator.start().await.expect("start");

    advance_ms(1_100).await;
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.stage, Stage::Engaging);
    assert!(snapshot.ui_faded);
    assert_eq!(snapshot.menu_opacity(), 0.0);

    advance_ms(1_000).await;
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.stage, Stage::HandoffPending);
    assert_eq!(snapshot.background_opacity(), 0.0);
    assert_eq!(protocol.activations(), 0);

    advance_ms(1_500).await;
    assert_eq!(orchestrator.stage().await, Stage::Active);
    assert_eq!(protocol.activations(), 1);
    assert!(protocol.is_active());

    advance_ms(10_000).await;
    assert_eq!(protocol.activations(), 1);
    assert_eq!(orchestrator.snapshot().await.pending_timers, 0);

    let events = drain(&mut events);
    assert_eq!(
        stages(&events),
        vec![Stage::Engaging, Stage::HandoffPending, Stage::Active]
    );
    let signals: Vec<_> = events
        .iter()
        .filter(|event| !matches!(event, PresentationEvent::StageChanged { .. }))
        .map(|event| match event {
            PresentationEvent::UiFaded { .. } => "ui_faded",
            PresentationEvent::BackgroundFading { .. } => "background_fading",
            PresentationEvent::HandoffStarted { .. } => "handoff_started",
            _ => "other",
        })
        .collect();
    assert_eq!(signals, vec!["ui_faded", "background_fading", "handoff_started"]);
}

#[tokio::test(start_paused = true)]
async fn cancel_before_handoff_never_activates() {
    for cancel_at_ms in [0, 500, 1_500, 2_500, 3_400] {
        let protocol = Arc::new(TestProtocol::default());
        let (orchestrator, _) = orchestrator_with(Arc::clone(&protocol));

        orchestrator.start().await.expect("start");
        advance_ms(cancel_at_ms).await;
        assert!(orchestrator.cancel().await, "cancel at {cancel_at_ms}ms");

        advance_ms(10_000).await;
        let snapshot = orchestrator.snapshot().await;
        assert_eq!(snapshot.stage, Stage::Idle);
        assert_eq!(snapshot.session_id, None);
        assert_eq!(snapshot.last_error, None);
        assert_eq!(protocol.activations(), 0, "cancel at {cancel_at_ms}ms");
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_passes_through_resetting() {
    let protocol = Arc::new(TestProtocol::default());
    let (orchestrator, _) = orchestrator_with(protocol);
    let mut events = orchestrator.subscribe();

    orchestrator.start().await.expect("start");
    advance_ms(2_100).await;
    orchestrator.cancel().await;

    assert_eq!(
        stages(&drain(&mut events)),
        vec![
            Stage::Engaging,
            Stage::HandoffPending,
            Stage::Resetting,
            Stage::Idle
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_when_idle_is_a_noop() {
    let protocol = Arc::new(TestProtocol::default());
    let (orchestrator, _) = orchestrator_with(protocol);
    let mut events = orchestrator.subscribe();

    assert!(!orchestrator.cancel().await);
    assert!(!orchestrator.cancel().await);
    assert!(drain(&mut events).is_empty());
    assert_eq!(orchestrator.stage().await, Stage::Idle);
}

#[tokio::test(start_paused = true)]
async fn timers_from_a_cancelled_session_do_not_leak_into_the_next() {
    let protocol = Arc::new(TestProtocol::default());
    let (orchestrator, _) = orchestrator_with(Arc::clone(&protocol));

    orchestrator.start().await.expect("first start");
    advance_ms(1_500).await;
    orchestrator.cancel().await;
    orchestrator.start().await.expect("second start");

    // 3.6s after the first start, 2.1s after the second.
    advance_ms(2_100).await;
    assert_eq!(orchestrator.stage().await, Stage::HandoffPending);
    assert_eq!(protocol.activations(), 0);

    advance_ms(1_500).await;
    assert_eq!(orchestrator.stage().await, Stage::Active);
    assert_eq!(protocol.activations(), 1);
}

#[tokio::test(start_paused = true)]
async fn start_while_running_is_ignored() {
    let protocol = Arc::new(TestProtocol::default());
    let (orchestrator, _) = orchestrator_with(Arc::clone(&protocol));

    let first = orchestrator.start().await.expect("start");
    advance_ms(500).await;
    let second = orchestrator.start().await.expect("second start");
    assert_eq!(second, StartOutcome::AlreadyRunning(Stage::Engaging));

    let StartOutcome::Started(session_id) = first else {
        panic!("first start should begin a session");
    };
    assert_eq!(orchestrator.snapshot().await.session_id, Some(session_id));

    advance_ms(5_000).await;
    assert_eq!(protocol.activations(), 1);
    assert_eq!(
        orchestrator.start().await.expect("start while active"),
        StartOutcome::AlreadyRunning(Stage::Active)
    );
}

#[tokio::test(start_paused = true)]
async fn completed_episode_is_recorded_and_session_resets() {
    let protocol = Arc::new(TestProtocol::default());
    let (orchestrator, store) = orchestrator_with(Arc::clone(&protocol));
    store
        .add(EpisodeDraft::new("Older", 3.0, 110, Severity::Mild))
        .await
        .expect("seed");

    orchestrator.start().await.expect("start");
    advance_ms(3_600).await;

    let record = episode("Work stress");
    let outcome = orchestrator
        .on_episode_completed(record.clone())
        .await
        .expect("complete");
    assert_eq!(outcome, CompletionOutcome::Recorded(record.clone()));

    let records = store.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], record);

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.stage, Stage::Idle);
    assert_eq!(snapshot.last_error, None);

    orchestrator.start().await.expect("restart after completion");
    assert_eq!(orchestrator.stage().await, Stage::Engaging);
}

#[tokio::test(start_paused = true)]
async fn completion_handle_reports_back_through_the_orchestrator() {
    let protocol = Arc::new(TestProtocol::default());
    let (orchestrator, store) = orchestrator_with(Arc::clone(&protocol));
    let mut events = orchestrator.subscribe();

    orchestrator.start().await.expect("start");
    advance_ms(3_600).await;

    let record = episode("Crowded subway");
    protocol
        .last_handle()
        .complete(record.clone())
        .await
        .expect("complete");

    assert_eq!(store.records().await, vec![record.clone()]);
    assert_eq!(orchestrator.stage().await, Stage::Idle);
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        PresentationEvent::EpisodeRecorded { episode_id, .. } if *episode_id == record.id
    )));
}

#[tokio::test(start_paused = true)]
async fn completion_outside_active_is_ignored() {
    let protocol = Arc::new(TestProtocol::default());
    let (orchestrator, store) = orchestrator_with(protocol);

    let outcome = orchestrator
        .on_episode_completed(episode("Too early"))
        .await
        .expect("ignored");
    assert_eq!(outcome, CompletionOutcome::Ignored);

    orchestrator.start().await.expect("start");
    advance_ms(2_100).await;
    let outcome = orchestrator
        .on_episode_completed(episode("Still too early"))
        .await
        .expect("ignored");
    assert_eq!(outcome, CompletionOutcome::Ignored);

    assert!(store.is_empty().await);
    assert_eq!(orchestrator.stage().await, Stage::HandoffPending);
}

#[tokio::test(start_paused = true)]
async fn stale_completion_handle_is_ignored() {
    let protocol = Arc::new(TestProtocol::default());
    let (orchestrator, store) = orchestrator_with(Arc::clone(&protocol));

    orchestrator.start().await.expect("first start");
    advance_ms(3_600).await;
    let stale = protocol.last_handle();
    orchestrator.cancel().await;

    orchestrator.start().await.expect("second start");
    advance_ms(3_600).await;
    let current = protocol.last_handle();
    assert_ne!(stale.session_id(), current.session_id());

    assert_eq!(protocol.deactivated(), vec![stale.session_id()]);

    stale.complete(episode("Stale")).await.expect("ignored");
    assert!(store.is_empty().await);
    assert_eq!(orchestrator.stage().await, Stage::Active);

    current.complete(episode("Current")).await.expect("recorded");
    assert_eq!(store.len().await, 1);
    assert_eq!(orchestrator.stage().await, Stage::Idle);
}

#[tokio::test(start_paused = true)]
async fn invalid_completed_episode_resets_with_validation_error() {
    let protocol = Arc::new(TestProtocol::default());
    let (orchestrator, store) = orchestrator_with(protocol);
    let mut events = orchestrator.subscribe();

    orchestrator.start().await.expect("start");
    advance_ms(3_600).await;

    let mut record = episode("Broken sensor");
    record.average_heart_rate = 0;
    let err = orchestrator
        .on_episode_completed(record)
        .await
        .expect_err("invalid record");
    assert!(matches!(
        err,
        OrchestratorError::Record(StoreError::Validation(
            ValidationError::NonPositiveHeartRate(0)
        ))
    ));

    assert!(store.is_empty().await);
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.stage, Stage::Idle);
    assert_eq!(
        snapshot.last_error.map(|notice| notice.code),
        Some(ErrorCode::Validation)
    );
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, PresentationEvent::SessionFailed(_))));
}

#[tokio::test(start_paused = true)]
async fn scheduling_failure_resets_and_cancels_partial_schedule() {
    let protocol = Arc::new(TestProtocol::default());
    let store = Arc::new(EpisodeStore::in_memory());
    let orchestrator = SessionOrchestrator::new_with_scheduler(
        StageTimings::default(),
        Arc::clone(&protocol) as Arc<dyn CrisisProtocol>,
        store,
        Arc::new(FlakyScheduler {
            fail_on_call: 2,
            calls: AtomicUsize::new(0),
        }),
    );
    let mut events = orchestrator.subscribe();

    let err = orchestrator.start().await.expect_err("scheduling fails");
    assert!(matches!(
        err,
        OrchestratorError::Scheduling(SchedulingError::Rejected(_))
    ));

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.stage, Stage::Idle);
    assert_eq!(snapshot.pending_timers, 0);
    assert_eq!(
        snapshot.last_error.map(|notice| notice.code),
        Some(ErrorCode::Scheduling)
    );

    advance_ms(10_000).await;
    let events = drain(&mut events);
    assert!(!events
        .iter()
        .any(|event| matches!(event, PresentationEvent::UiFaded { .. })));
    assert_eq!(protocol.activations(), 0);
    assert_eq!(orchestrator.stage().await, Stage::Idle);

    // Not retried automatically; the next explicit start schedules normally.
    orchestrator.start().await.expect("fresh start");
    assert_eq!(orchestrator.stage().await, Stage::Engaging);
    assert_eq!(orchestrator.snapshot().await.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn protocol_activation_failure_resets_to_idle() {
    let protocol = Arc::new(TestProtocol::failing("camera unavailable"));
    let (orchestrator, _) = orchestrator_with(Arc::clone(&protocol));

    orchestrator.start().await.expect("start");
    advance_ms(3_600).await;

    assert_eq!(protocol.activations(), 1);
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.stage, Stage::Idle);
    let notice = snapshot.last_error.expect("error flag");
    assert_eq!(notice.code, ErrorCode::Protocol);
    assert!(notice.message.contains("camera unavailable"));
}

#[tokio::test(start_paused = true)]
async fn equal_delays_still_pass_through_every_stage_in_order() {
    let protocol = Arc::new(TestProtocol::default());
    let store = Arc::new(EpisodeStore::in_memory());
    let timings = StageTimings::from_secs(1.0, 1.0, 1.0).expect("timings");
    let orchestrator = SessionOrchestrator::new(
        timings,
        Arc::clone(&protocol) as Arc<dyn CrisisProtocol>,
        store,
    );
    let mut events = orchestrator.subscribe();

    orchestrator.start().await.expect("start");
    advance_ms(1_100).await;

    assert_eq!(protocol.activations(), 1);
    assert_eq!(
        stages(&drain(&mut events)),
        vec![Stage::Engaging, Stage::HandoffPending, Stage::Active]
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_before_handoff_does_not_deactivate_the_protocol() {
    let protocol = Arc::new(TestProtocol::default());
    let (orchestrator, _) = orchestrator_with(Arc::clone(&protocol));

    orchestrator.start().await.expect("start");
    advance_ms(2_100).await;
    orchestrator.cancel().await;

    assert!(protocol.deactivated().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_racing_the_handoff_never_leaves_the_protocol_running() {
    let protocol = Arc::new(TestProtocol::gated());
    let (orchestrator, _) = orchestrator_with(Arc::clone(&protocol));

    let StartOutcome::Started(session_id) = orchestrator.start().await.expect("start") else {
        panic!("expected a new session");
    };
    advance_ms(3_600).await;
    // Stage is `Active` and `activate` is still in flight.
    assert_eq!(protocol.activations(), 1);
    assert!(!protocol.is_active());

    let cancelling = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.cancel().await }
    });
    settle().await;
    assert!(!cancelling.is_finished());

    protocol.release();
    assert!(cancelling.await.expect("cancel task"));

    assert_eq!(protocol.deactivated(), vec![session_id]);
    assert!(!protocol.is_active());
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.stage, Stage::Idle);
    assert_eq!(snapshot.last_error, None);

    advance_ms(10_000).await;
    assert_eq!(protocol.activations(), 1);
}
