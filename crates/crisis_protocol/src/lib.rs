use std::sync::Weak;

use anyhow::anyhow;
use async_trait::async_trait;
use shared::{domain::SessionId, protocol::EpisodeRecord};

mod scripted;

pub use scripted::{EpisodeTemplate, ScriptedProtocol};

/// Receives the episode produced by a finished protocol run.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn episode_completed(
        &self,
        session_id: SessionId,
        record: EpisodeRecord,
    ) -> anyhow::Result<()>;
}

/// Handed to the protocol on activation so it can report back exactly once.
#[derive(Clone)]
pub struct CompletionHandle {
    session_id: SessionId,
    sink: Weak<dyn CompletionSink>,
}

impl CompletionHandle {
    pub fn new(session_id: SessionId, sink: Weak<dyn CompletionSink>) -> Self {
        Self { session_id, sink }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub async fn complete(self, record: EpisodeRecord) -> anyhow::Result<()> {
        let sink = self
            .sink
            .upgrade()
            .ok_or_else(|| anyhow!("session {} no longer has a receiver", self.session_id))?;
        sink.episode_completed(self.session_id, record).await
    }
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// External intervention started at the hand-off point of a session.
///
/// Both calls are made while the orchestrator holds its session lock, so
/// neither may report completion before returning.
#[async_trait]
pub trait CrisisProtocol: Send + Sync {
    async fn activate(&self, completion: CompletionHandle) -> anyhow::Result<()>;
    /// Stops the run started for `session_id`, if it is still going. The
    /// session's completion must not be reported afterwards.
    async fn deactivate(&self, session_id: SessionId) -> anyhow::Result<()>;
    fn is_active(&self) -> bool;
}

pub struct MissingCrisisProtocol;

#[async_trait]
impl CrisisProtocol for MissingCrisisProtocol {
    async fn activate(&self, completion: CompletionHandle) -> anyhow::Result<()> {
        Err(anyhow!(
            "crisis protocol is unavailable for session {}",
            completion.session_id()
        ))
    }

    async fn deactivate(&self, _session_id: SessionId) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_active(&self) -> bool {
        false
    }
}
