use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{SessionId, Severity},
    protocol::EpisodeDraft,
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{info, warn};

use crate::{CompletionHandle, CrisisProtocol};

/// Episode data the scripted protocol reports when a run finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeTemplate {
    pub cause: String,
    pub duration_minutes: f64,
    pub average_heart_rate: i32,
    pub severity: Severity,
    pub notes: Option<String>,
}

impl Default for EpisodeTemplate {
    fn default() -> Self {
        Self {
            cause: "Unspecified trigger".to_string(),
            duration_minutes: 5.0,
            average_heart_rate: 120,
            severity: Severity::Moderate,
            notes: None,
        }
    }
}

/// In-process protocol that finishes after a fixed run time and reports a
/// templated episode. Stands in for the camera intervention outside a device.
pub struct ScriptedProtocol {
    template: EpisodeTemplate,
    run_for: Duration,
    active: Arc<AtomicBool>,
    activations: AtomicUsize,
    current: Mutex<Option<(SessionId, JoinHandle<()>)>>,
}

impl ScriptedProtocol {
    pub fn new(template: EpisodeTemplate, run_for: Duration) -> Self {
        Self {
            template,
            run_for,
            active: Arc::new(AtomicBool::new(false)),
            activations: AtomicUsize::new(0),
            current: Mutex::new(None),
        }
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CrisisProtocol for ScriptedProtocol {
    async fn activate(&self, completion: CompletionHandle) -> anyhow::Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            bail!(
                "crisis protocol already running; refused session {}",
                completion.session_id()
            );
        }
        self.activations.fetch_add(1, Ordering::SeqCst);

        let started_at = Utc::now();
        let template = self.template.clone();
        let run_for = self.run_for;
        let active = Arc::clone(&self.active);
        let session_id = completion.session_id();
        info!(
            "crisis protocol: activated session={} run_for_ms={}",
            session_id,
            run_for.as_millis()
        );

        let run = tokio::spawn(async move {
            tokio::time::sleep(run_for).await;
            let mut draft = EpisodeDraft::new(
                template.cause,
                template.duration_minutes,
                template.average_heart_rate,
                template.severity,
            )
            .at(started_at);
            draft.notes = template.notes;

            active.store(false, Ordering::SeqCst);
            if let Err(err) = completion.complete(draft.into_record()).await {
                warn!("crisis protocol: completion rejected session={session_id}: {err:#}");
            }
        });
        *self.current.lock().await = Some((session_id, run));

        Ok(())
    }

    async fn deactivate(&self, session_id: SessionId) -> anyhow::Result<()> {
        let mut current = self.current.lock().await;
        match current.take() {
            Some((running, run)) if running == session_id => {
                run.abort();
                self.active.store(false, Ordering::SeqCst);
                info!("crisis protocol: deactivated session={session_id}");
            }
            other => *current = other,
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
