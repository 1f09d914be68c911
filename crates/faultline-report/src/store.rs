//! Artifact store - file bookkeeping for the crash artifact directory
//!
//! No business logic beyond naming, enumeration, idempotent deletion and
//! age-based pruning. The directory is shared with the capture side (which
//! writes new artifacts); sharing is safe without cross-component locking
//! because writes and reads/deletes always target distinct files keyed by
//! unique id.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use faultline_core::domain::artifact::ARTIFACT_EXTENSION;
use faultline_core::ArtifactId;
use tracing::{debug, info, warn};

/// Manages the on-disk directory of crash artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    last_prune: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl ArtifactStore {
    /// Creates a store rooted at `dir`. The directory is created lazily by
    /// the capture side; a missing directory just means no pending
    /// artifacts.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            last_prune: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the artifact directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic path for an artifact id: `<dir>/<id>.dmp`.
    pub fn path(&self, id: &ArtifactId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    /// Whether an artifact file exists for `id`.
    pub fn exists(&self, id: &ArtifactId) -> bool {
        self.path(id).is_file()
    }

    /// Enumerates artifact ids currently on disk.
    ///
    /// Re-scans the directory on every call (restartable, never cached).
    /// Files with other extensions or invalid stems are skipped.
    pub fn list_pending(&self) -> anyhow::Result<Vec<ArtifactId>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !path.extension().is_some_and(|e| e == ARTIFACT_EXTENSION) {
                continue;
            }

            let stem = path
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string();
            match ArtifactId::new(stem) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping artifact with invalid name");
                }
            }
        }
        Ok(ids)
    }

    /// Deletes the artifact file. Tolerant of the file already being
    /// absent.
    pub fn remove(&self, id: &ArtifactId) -> anyhow::Result<()> {
        match std::fs::remove_file(self.path(id)) {
            Ok(()) => {
                debug!(artifact_id = %id, "Artifact removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every artifact and event report whose modification time is
    /// older than `now - max_age_days`, regardless of upload state. Returns
    /// the number of files deleted and records the prune timestamp.
    ///
    /// Event reports (`event-*.json`, written by the capture side into the
    /// same directory) share the retention window so the directory stays
    /// bounded. Unrelated files are never touched.
    pub fn prune(&self, max_age_days: u32) -> anyhow::Result<u32> {
        let cutoff = SystemTime::now() - Duration::from_secs(u64::from(max_age_days) * 86_400);
        let mut removed = 0;

        if self.dir.exists() {
            for entry in std::fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if !path.is_file() || !is_prunable(&path) {
                    continue;
                }

                let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Could not stat file, skipping");
                        continue;
                    }
                };

                if modified < cutoff {
                    match std::fs::remove_file(&path) {
                        Ok(()) => {
                            info!(path = %path.display(), "Pruned expired file");
                            removed += 1;
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Failed to prune file");
                        }
                    }
                }
            }
        }

        if let Ok(mut last) = self.last_prune.lock() {
            *last = Some(Utc::now());
        }
        Ok(removed)
    }

    /// When the last prune ran, if any.
    pub fn last_prune(&self) -> Option<DateTime<Utc>> {
        self.last_prune.lock().ok().and_then(|last| *last)
    }
}

/// Files subject to retention pruning: crash artifacts and the event
/// reports the capture backend writes alongside them.
fn is_prunable(path: &Path) -> bool {
    if path.extension().is_some_and(|e| e == ARTIFACT_EXTENSION) {
        return true;
    }
    path.extension().is_some_and(|e| e == "json")
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("event-"))
}
