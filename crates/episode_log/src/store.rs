use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use shared::{
    domain::EpisodeId,
    error::ValidationError,
    protocol::{EpisodeDraft, EpisodeRecord},
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{EpisodeLog, EpisodeSummary};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("episode log file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed episode log: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Shared handle around an [`EpisodeLog`].
///
/// Every operation holds the lock for its full duration. When a backing file is
/// configured, a mutation only becomes visible after the file was rewritten.
pub struct EpisodeStore {
    log: RwLock<EpisodeLog>,
    path: Option<PathBuf>,
}

impl EpisodeStore {
    pub fn in_memory() -> Self {
        Self::with_log(EpisodeLog::new())
    }

    pub fn with_log(log: EpisodeLog) -> Self {
        Self {
            log: RwLock::new(log),
            path: None,
        }
    }

    /// Opens the JSON file at `path`; a missing or empty file yields an empty log.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let log = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => EpisodeLog::new(),
            Ok(raw) => EpisodeLog::from_json(&raw)?,
            Err(err) if err.kind() == ErrorKind::NotFound => EpisodeLog::new(),
            Err(err) => return Err(StoreError::io(&path, err)),
        };
        info!(
            "episode log: opened path={} records={}",
            path.display(),
            log.len()
        );
        Ok(Self {
            log: RwLock::new(log),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn add(&self, draft: impl Into<EpisodeDraft>) -> Result<EpisodeRecord, StoreError> {
        let mut guard = self.log.write().await;
        let mut next = guard.clone();
        let record = next.add(draft)?;
        self.persist(&next).await?;
        *guard = next;
        debug!(episode_id = %record.id, "episode log: added record");
        Ok(record)
    }

    pub async fn update(&self, record: EpisodeRecord) -> Result<bool, StoreError> {
        let mut guard = self.log.write().await;
        let mut next = guard.clone();
        if !next.update(record)? {
            return Ok(false);
        }
        self.persist(&next).await?;
        *guard = next;
        Ok(true)
    }

    pub async fn delete(&self, id: EpisodeId) -> Result<bool, StoreError> {
        let mut guard = self.log.write().await;
        let mut next = guard.clone();
        if !next.delete(id) {
            return Ok(false);
        }
        self.persist(&next).await?;
        *guard = next;
        Ok(true)
    }

    /// Replaces the whole log, e.g. with seed or imported data.
    pub async fn replace(&self, log: EpisodeLog) -> Result<(), StoreError> {
        let mut guard = self.log.write().await;
        self.persist(&log).await?;
        *guard = log;
        Ok(())
    }

    pub async fn get(&self, id: EpisodeId) -> Option<EpisodeRecord> {
        self.log.read().await.get(id).cloned()
    }

    pub async fn records(&self) -> Vec<EpisodeRecord> {
        self.log.read().await.records().to_vec()
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.log.read().await.is_empty()
    }

    pub async fn summary(&self) -> EpisodeSummary {
        self.log.read().await.summary()
    }

    pub async fn snapshot(&self) -> EpisodeLog {
        self.log.read().await.clone()
    }

    pub async fn export_json(&self) -> Result<String, StoreError> {
        Ok(self.log.read().await.to_json()?)
    }

    async fn persist(&self, log: &EpisodeLog) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let raw = log.to_json()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::io(parent, err))?;
        }

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, raw)
            .await
            .map_err(|err| StoreError::io(&tmp_path, err))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|err| StoreError::io(path, err))?;
        Ok(())
    }
}

impl Default for EpisodeStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
