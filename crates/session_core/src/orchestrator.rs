use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crisis_protocol::{CompletionHandle, CompletionSink, CrisisProtocol};
use episode_log::{EpisodeStore, StoreError};
use futures::future::BoxFuture;
use shared::{
    domain::{SessionId, Stage},
    error::{ErrorCode, FailureNotice},
    protocol::{EpisodeRecord, PresentationEvent},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    error::OrchestratorError,
    scheduler::{ScheduledTask, StageScheduler, TokioScheduler},
    timings::StageTimings,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Scheduled steps of the engagement ritual, in firing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RitualStep {
    FadeUi,
    FadeBackground,
    Handoff,
}

impl RitualStep {
    const ALL: [RitualStep; 3] = [
        RitualStep::FadeUi,
        RitualStep::FadeBackground,
        RitualStep::Handoff,
    ];

    fn delay(self, timings: &StageTimings) -> Duration {
        match self {
            RitualStep::FadeUi => timings.fade_out,
            RitualStep::FadeBackground => timings.background_fade,
            RitualStep::Handoff => timings.handoff,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(SessionId),
    /// `start()` was called outside `Idle`; nothing changed.
    AlreadyRunning(Stage),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Recorded(EpisodeRecord),
    /// No matching active session; the record was dropped.
    Ignored,
}

/// Read-only view of the session for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub stage: Stage,
    pub session_id: Option<SessionId>,
    pub entered_at: DateTime<Utc>,
    pub ui_faded: bool,
    pub background_faded: bool,
    pub pending_timers: usize,
    pub last_error: Option<FailureNotice>,
}

impl SessionSnapshot {
    pub fn time_in_stage(&self) -> Duration {
        (Utc::now() - self.entered_at).to_std().unwrap_or_default()
    }

    pub fn menu_opacity(&self) -> f64 {
        if self.ui_faded {
            0.0
        } else {
            1.0
        }
    }

    pub fn background_opacity(&self) -> f64 {
        if self.background_faded {
            0.0
        } else {
            1.0
        }
    }
}

struct SessionState {
    stage: Stage,
    entered_at: DateTime<Utc>,
    /// Bumped on every start and reset; timer callbacks from older generations are no-ops.
    generation: u64,
    session_id: Option<SessionId>,
    progress: Option<RitualStep>,
    ui_faded: bool,
    background_faded: bool,
    pending: Vec<ScheduledTask>,
    last_error: Option<FailureNotice>,
}

impl SessionState {
    fn idle() -> Self {
        Self {
            stage: Stage::Idle,
            entered_at: Utc::now(),
            generation: 0,
            session_id: None,
            progress: None,
            ui_faded: false,
            background_faded: false,
            pending: Vec::new(),
            last_error: None,
        }
    }
}

pub struct SessionOrchestrator {
    timings: StageTimings,
    protocol: Arc<dyn CrisisProtocol>,
    episodes: Arc<EpisodeStore>,
    scheduler: Arc<dyn StageScheduler>,
    state: Mutex<SessionState>,
    events: broadcast::Sender<PresentationEvent>,
}

impl SessionOrchestrator {
    pub fn new(
        timings: StageTimings,
        protocol: Arc<dyn CrisisProtocol>,
        episodes: Arc<EpisodeStore>,
    ) -> Arc<Self> {
        Self::new_with_scheduler(timings, protocol, episodes, Arc::new(TokioScheduler))
    }

    pub fn new_with_scheduler(
        timings: StageTimings,
        protocol: Arc<dyn CrisisProtocol>,
        episodes: Arc<EpisodeStore>,
        scheduler: Arc<dyn StageScheduler>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            timings,
            protocol,
            episodes,
            scheduler,
            state: Mutex::new(SessionState::idle()),
            events,
        })
    }

    pub fn timings(&self) -> &StageTimings {
        &self.timings
    }

    pub fn episodes(&self) -> &Arc<EpisodeStore> {
        &self.episodes
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresentationEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot {
            stage: state.stage,
            session_id: state.session_id,
            entered_at: state.entered_at,
            ui_faded: state.ui_faded,
            background_faded: state.background_faded,
            pending_timers: state.pending.iter().filter(|t| !t.is_finished()).count(),
            last_error: state.last_error.clone(),
        }
    }

    pub async fn stage(&self) -> Stage {
        self.state.lock().await.stage
    }

    /// Begins the engagement ritual. Calling this outside `Idle` is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<StartOutcome, OrchestratorError> {
        let mut state = self.state.lock().await;
        if !state.stage.is_idle() {
            debug!(stage = %state.stage, "session: start ignored, session already running");
            return Ok(StartOutcome::AlreadyRunning(state.stage));
        }

        let session_id = SessionId::new();
        state.generation += 1;
        state.session_id = Some(session_id);
        state.progress = None;
        state.ui_faded = false;
        state.background_faded = false;
        state.last_error = None;
        self.enter(&mut state, Stage::Engaging);

        let generation = state.generation;
        for step in RitualStep::ALL {
            let task = self.step_task(generation, step);
            match self.scheduler.schedule(step.delay(&self.timings), task) {
                Ok(scheduled) => state.pending.push(scheduled),
                Err(err) => {
                    warn!("session: scheduling failed session={session_id} step={step:?}: {err}");
                    let notice = FailureNotice::new(ErrorCode::Scheduling, err.to_string());
                    self.reset_to_idle(&mut state, Some(notice));
                    return Err(err.into());
                }
            }
        }

        info!(
            "session: started session={} handoff_in_ms={}",
            session_id,
            self.timings.handoff.as_millis()
        );
        Ok(StartOutcome::Started(session_id))
    }

    /// Abandons the running session. Returns `false` when already idle.
    ///
    /// A session cancelled in `Active` also stops the crisis protocol run it
    /// started, so the next session can hand off again.
    pub async fn cancel(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.stage.is_idle() {
            return false;
        }

        info!(
            "session: cancelled session={} stage={}",
            display_session(state.session_id),
            state.stage
        );
        let handed_off = state.session_id.filter(|_| state.stage == Stage::Active);
        self.reset_to_idle(&mut state, None);

        if let Some(session_id) = handed_off {
            if let Err(err) = self.protocol.deactivate(session_id).await {
                warn!("session: crisis protocol deactivation failed session={session_id}: {err:#}");
            }
        }
        true
    }

    /// Forwards the episode produced by the crisis protocol to the log and ends the session.
    pub async fn on_episode_completed(
        &self,
        record: EpisodeRecord,
    ) -> Result<CompletionOutcome, OrchestratorError> {
        self.complete_session(None, record).await
    }

    async fn complete_session(
        &self,
        expected_session: Option<SessionId>,
        record: EpisodeRecord,
    ) -> Result<CompletionOutcome, OrchestratorError> {
        let mut state = self.state.lock().await;
        let session_id = match state.session_id {
            Some(current)
                if state.stage == Stage::Active
                    && expected_session.map_or(true, |expected| expected == current) =>
            {
                current
            }
            _ => {
                debug!(
                    stage = %state.stage,
                    episode_id = %record.id,
                    "session: completion ignored, no matching active session"
                );
                return Ok(CompletionOutcome::Ignored);
            }
        };

        // The state lock stays held through the store write: a concurrent cancel
        // waits for the record rather than racing it.
        match self.episodes.add(record).await {
            Ok(stored) => {
                info!("session: episode recorded session={session_id} episode={}", stored.id);
                let _ = self.events.send(PresentationEvent::EpisodeRecorded {
                    session_id,
                    episode_id: stored.id,
                });
                self.reset_to_idle(&mut state, None);
                Ok(CompletionOutcome::Recorded(stored))
            }
            Err(err) => {
                warn!("session: rejected completed episode session={session_id}: {err}");
                let code = match &err {
                    StoreError::Validation(_) => ErrorCode::Validation,
                    _ => ErrorCode::Internal,
                };
                self.reset_to_idle(&mut state, Some(FailureNotice::new(code, err.to_string())));
                Err(err.into())
            }
        }
    }

    fn step_task(self: &Arc<Self>, generation: u64, step: RitualStep) -> BoxFuture<'static, ()> {
        let orchestrator = Arc::downgrade(self);
        Box::pin(async move {
            if let Some(orchestrator) = orchestrator.upgrade() {
                orchestrator.fire(generation, step).await;
            }
        })
    }

    async fn fire(self: &Arc<Self>, generation: u64, target: RitualStep) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(?target, "session: stale stage timer ignored");
            return;
        }

        let mut handoff = None;
        for step in RitualStep::ALL {
            if step > target || state.progress.is_some_and(|done| step <= done) {
                continue;
            }
            handoff = self.apply_step(&mut state, step);
        }

        // Activation happens under the same guard as the transition to
        // `Active`, so a cancel either precedes both or sees the protocol running.
        if let Some(session_id) = handoff {
            self.activate_protocol(&mut state, session_id).await;
        }
    }

    /// Applies one ritual step; returns the session id when the hand-off was reached.
    fn apply_step(&self, state: &mut SessionState, step: RitualStep) -> Option<SessionId> {
        let session_id = state.session_id?;
        state.progress = Some(step);
        match step {
            RitualStep::FadeUi => {
                state.ui_faded = true;
                let _ = self.events.send(PresentationEvent::UiFaded { session_id });
                None
            }
            RitualStep::FadeBackground => {
                self.enter(state, Stage::HandoffPending);
                state.background_faded = true;
                let _ = self
                    .events
                    .send(PresentationEvent::BackgroundFading { session_id });
                None
            }
            RitualStep::Handoff => {
                self.enter(state, Stage::Active);
                // Every step has fired; nothing left to cancel.
                state.pending.clear();
                let _ = self
                    .events
                    .send(PresentationEvent::HandoffStarted { session_id });
                Some(session_id)
            }
        }
    }

    async fn activate_protocol(self: &Arc<Self>, state: &mut SessionState, session_id: SessionId) {
        let sink: Arc<dyn CompletionSink> = Arc::clone(self) as Arc<dyn CompletionSink>;
        let completion = CompletionHandle::new(session_id, Arc::downgrade(&sink));
        info!("session: handing off to crisis protocol session={session_id}");

        if let Err(err) = self.protocol.activate(completion).await {
            warn!("session: crisis protocol activation failed session={session_id}: {err:#}");
            let notice = FailureNotice::new(ErrorCode::Protocol, format!("{err:#}"));
            self.reset_to_idle(state, Some(notice));
        }
    }

    fn enter(&self, state: &mut SessionState, stage: Stage) {
        state.stage = stage;
        state.entered_at = Utc::now();
        let _ = self.events.send(PresentationEvent::StageChanged {
            session_id: state.session_id,
            stage,
            entered_at: state.entered_at,
        });
    }

    fn reset_to_idle(&self, state: &mut SessionState, failure: Option<FailureNotice>) {
        for task in state.pending.drain(..) {
            task.cancel();
        }
        state.generation += 1;

        self.enter(state, Stage::Resetting);
        if let Some(notice) = &failure {
            let _ = self
                .events
                .send(PresentationEvent::SessionFailed(notice.clone()));
        }
        state.session_id = None;
        state.progress = None;
        state.ui_faded = false;
        state.background_faded = false;
        state.last_error = failure;
        self.enter(state, Stage::Idle);
    }
}

#[async_trait]
impl CompletionSink for SessionOrchestrator {
    async fn episode_completed(
        &self,
        session_id: SessionId,
        record: EpisodeRecord,
    ) -> anyhow::Result<()> {
        self.complete_session(Some(session_id), record).await?;
        Ok(())
    }
}

fn display_session(session_id: Option<SessionId>) -> String {
    session_id.map_or_else(|| "-".to_string(), |id| id.to_string())
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
