use std::{fs, path::PathBuf, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use session_core::StageTimings;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub log_path: PathBuf,
    pub fade_out_secs: f64,
    pub background_fade_secs: f64,
    pub handoff_secs: f64,
    pub protocol_run_secs: f64,
    pub seed_when_empty: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("./data/episodes.json"),
            fade_out_secs: 1.0,
            background_fade_secs: 2.0,
            handoff_secs: 3.5,
            protocol_run_secs: 5.0,
            seed_when_empty: false,
        }
    }
}

/// Optional keys accepted in `anchor.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    log_path: Option<PathBuf>,
    fade_out_secs: Option<f64>,
    background_fade_secs: Option<f64>,
    handoff_secs: Option<f64>,
    protocol_run_secs: Option<f64>,
    seed_when_empty: Option<bool>,
}

impl Settings {
    pub fn stage_timings(&self) -> anyhow::Result<StageTimings> {
        StageTimings::from_secs(
            self.fade_out_secs,
            self.background_fade_secs,
            self.handoff_secs,
        )
        .context("invalid stage timings in settings")
    }

    pub fn protocol_run_time(&self) -> anyhow::Result<Duration> {
        Duration::try_from_secs_f64(self.protocol_run_secs)
            .with_context(|| format!("invalid protocol_run_secs {}", self.protocol_run_secs))
    }
}

/// Defaults, then the config file (if present), then `APP__*` environment variables.
pub fn load_settings(config_path: &str) -> anyhow::Result<Settings> {
    let file_raw = match fs::read_to_string(config_path) {
        Ok(raw) => Some(raw),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read config '{config_path}'"))
        }
    };
    resolve_settings(file_raw.as_deref(), |key| std::env::var(key).ok())
        .with_context(|| format!("failed to load settings from '{config_path}'"))
}

pub(crate) fn resolve_settings(
    file_raw: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if let Some(raw) = file_raw {
        let file_cfg: FileSettings = toml::from_str(raw).context("malformed config file")?;
        if let Some(v) = file_cfg.log_path {
            settings.log_path = v;
        }
        if let Some(v) = file_cfg.fade_out_secs {
            settings.fade_out_secs = v;
        }
        if let Some(v) = file_cfg.background_fade_secs {
            settings.background_fade_secs = v;
        }
        if let Some(v) = file_cfg.handoff_secs {
            settings.handoff_secs = v;
        }
        if let Some(v) = file_cfg.protocol_run_secs {
            settings.protocol_run_secs = v;
        }
        if let Some(v) = file_cfg.seed_when_empty {
            settings.seed_when_empty = v;
        }
    }

    if let Some(v) = env("APP__LOG_PATH") {
        settings.log_path = PathBuf::from(v);
    }
    override_secs(&env, "APP__FADE_OUT_SECS", &mut settings.fade_out_secs);
    override_secs(
        &env,
        "APP__BACKGROUND_FADE_SECS",
        &mut settings.background_fade_secs,
    );
    override_secs(&env, "APP__HANDOFF_SECS", &mut settings.handoff_secs);
    override_secs(&env, "APP__PROTOCOL_RUN_SECS", &mut settings.protocol_run_secs);
    if let Some(v) = env("APP__SEED_WHEN_EMPTY") {
        match v.parse::<bool>() {
            Ok(parsed) => settings.seed_when_empty = parsed,
            Err(_) => warn!("config: ignoring APP__SEED_WHEN_EMPTY={v:?}, expected true/false"),
        }
    }

    Ok(settings)
}

fn override_secs(env: &impl Fn(&str) -> Option<String>, key: &str, target: &mut f64) {
    let Some(raw) = env(key) else {
        return;
    };
    match raw.trim().parse::<f64>() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!("config: ignoring {key}={raw:?}, expected seconds"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
