use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use crisis_protocol::{EpisodeTemplate, ScriptedProtocol};
use episode_log::{seed, EpisodeStore};
use session_core::{SessionOrchestrator, StartOutcome};
use shared::{
    domain::{EpisodeId, Severity, Stage},
    protocol::{EpisodeDraft, PresentationEvent},
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod presentation;

use config::{load_settings, Settings};
use presentation::{render_event, render_record, render_snapshot, render_summary};

#[derive(Parser, Debug)]
#[command(name = "anchor", about = "Crisis session orchestration and episode log")]
struct Cli {
    #[arg(long, default_value = "anchor.toml")]
    config: String,
    /// Overrides the episode log location from the config file.
    #[arg(long)]
    log_path: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs one session through hand-off using the scripted crisis protocol.
    Run {
        #[arg(long, default_value = "Unspecified trigger")]
        cause: String,
        #[arg(long, default_value_t = 5.0)]
        duration: f64,
        #[arg(long, default_value_t = 120)]
        heart_rate: i32,
        #[arg(long, default_value = "moderate")]
        severity: Severity,
        #[arg(long)]
        notes: Option<String>,
        /// Cancel the session after this many seconds.
        #[arg(long)]
        cancel_after: Option<f64>,
    },
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    Stats {
        #[arg(long)]
        json: bool,
    },
    Add {
        cause: String,
        #[arg(long)]
        duration: f64,
        #[arg(long)]
        heart_rate: i32,
        #[arg(long)]
        severity: Severity,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        days_ago: Option<i64>,
    },
    Edit {
        id: Uuid,
        #[arg(long)]
        cause: Option<String>,
        #[arg(long)]
        severity: Option<Severity>,
        #[arg(long)]
        notes: Option<String>,
    },
    Delete {
        id: Uuid,
    },
    /// Replaces the log with the demo episodes.
    Seed {
        #[arg(long)]
        force: bool,
    },
    Export,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(&cli.config)?;
    if let Some(path) = cli.log_path {
        settings.log_path = path;
    }

    let store = Arc::new(open_store(&settings).await?);

    match cli.command {
        Command::Run {
            cause,
            duration,
            heart_rate,
            severity,
            notes,
            cancel_after,
        } => {
            let template = EpisodeTemplate {
                cause,
                duration_minutes: duration,
                average_heart_rate: heart_rate,
                severity,
                notes,
            };
            let cancel_after = cancel_after
                .map(Duration::try_from_secs_f64)
                .transpose()
                .context("invalid --cancel-after")?;
            run_session(&settings, store, template, cancel_after).await?;
        }
        Command::List { limit } => {
            let records = store.records().await;
            if records.is_empty() {
                println!("No episodes recorded.");
            }
            for record in records.iter().take(limit.unwrap_or(usize::MAX)) {
                println!("{}", render_record(record));
            }
        }
        Command::Stats { json } => {
            let summary = store.summary().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", render_summary(&summary));
            }
        }
        Command::Add {
            cause,
            duration,
            heart_rate,
            severity,
            notes,
            days_ago,
        } => {
            let mut draft = EpisodeDraft::new(cause, duration, heart_rate, severity);
            if let Some(days) = days_ago {
                draft = draft.at(Utc::now() - chrono::Duration::days(days));
            }
            draft.notes = notes;
            let record = store.add(draft).await?;
            println!("added {}", render_record(&record));
        }
        Command::Edit {
            id,
            cause,
            severity,
            notes,
        } => {
            let id = EpisodeId(id);
            let Some(mut record) = store.get(id).await else {
                println!("no episode {id}; nothing changed");
                return Ok(());
            };
            if let Some(cause) = cause {
                record.cause = cause;
            }
            if let Some(severity) = severity {
                record.severity = severity;
            }
            if notes.is_some() {
                record.notes = notes;
            }
            if store.update(record.clone()).await? {
                println!("updated {}", render_record(&record));
            } else {
                println!("no episode {id}; nothing changed");
            }
        }
        Command::Delete { id } => {
            let id = EpisodeId(id);
            if store.delete(id).await? {
                println!("deleted episode {id}");
            } else {
                println!("no episode {id}; nothing changed");
            }
        }
        Command::Seed { force } => {
            if !store.is_empty().await && !force {
                bail!("episode log is not empty; pass --force to replace it");
            }
            store.replace(seed::demo_log(Utc::now())?).await?;
            println!("seeded {} demo episodes", store.len().await);
        }
        Command::Export => {
            println!("{}", store.export_json().await?);
        }
    }

    Ok(())
}

async fn open_store(settings: &Settings) -> Result<EpisodeStore> {
    let store = EpisodeStore::open(&settings.log_path)
        .await
        .with_context(|| format!("failed to open episode log {}", settings.log_path.display()))?;
    if settings.seed_when_empty && store.is_empty().await {
        info!("episode log empty; seeding demo episodes");
        store.replace(seed::demo_log(Utc::now())?).await?;
    }
    Ok(store)
}

async fn run_session(
    settings: &Settings,
    store: Arc<EpisodeStore>,
    template: EpisodeTemplate,
    cancel_after: Option<Duration>,
) -> Result<()> {
    let protocol = Arc::new(ScriptedProtocol::new(template, settings.protocol_run_time()?));
    let orchestrator = SessionOrchestrator::new(settings.stage_timings()?, protocol, store);
    let mut events = orchestrator.subscribe();

    match orchestrator.start().await? {
        StartOutcome::Started(session_id) => info!("session {session_id} started"),
        StartOutcome::AlreadyRunning(stage) => bail!("a session is already running ({stage})"),
    }

    let cancel_timer = async {
        match cancel_after {
            Some(delay) => tokio::time::sleep(delay).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(cancel_timer);
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", render_event(&event));
                    if matches!(event, PresentationEvent::StageChanged { stage: Stage::Idle, .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("missed {skipped} session events"),
                Err(RecvError::Closed) => break,
            },
            _ = &mut cancel_timer, if !cancel_requested => {
                cancel_requested = true;
                orchestrator.cancel().await;
            }
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                orchestrator.cancel().await;
            }
        }
    }

    let snapshot = orchestrator.snapshot().await;
    println!("{}", render_snapshot(&snapshot));
    if let Some(notice) = snapshot.last_error {
        bail!("session ended with error: {}", notice.message);
    }
    println!("{} episodes on record", orchestrator.episodes().len().await);
    Ok(())
}
