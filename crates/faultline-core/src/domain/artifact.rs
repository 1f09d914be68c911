//! Crash artifact identity and lifecycle
//!
//! An artifact is an opaque file written at the moment of a fatal failure.
//! Its content is immutable once on disk; only the in-memory upload state
//! changes. Deletion happens after a confirmed upload or via retention
//! pruning, never as part of consent withdrawal.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

/// File extension for crash artifacts on disk.
pub const ARTIFACT_EXTENSION: &str = "dmp";

/// Maximum accepted length for an artifact id.
const MAX_ID_LEN: usize = 64;

/// Opaque, collision-resistant identifier for a crash artifact
///
/// Artifact ids become file names (`<id>.dmp`), so the character set is
/// restricted to ASCII alphanumerics and `-`. Anything else (notably path
/// separators and `.`) is rejected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Validates and wraps an id string.
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_ID_LEN {
            return Err(DomainError::InvalidArtifactId(id));
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(DomainError::InvalidArtifactId(id));
        }
        Ok(Self(id))
    }

    /// Generates a fresh random id (UUID v4, hyphenated form).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name for this artifact: `<id>.dmp`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0, ARTIFACT_EXTENSION)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}

/// Upload lifecycle of an artifact, tracked in memory only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// On disk, not yet attempted (or attempted and abandoned mid-flight).
    Pending,
    /// An upload session currently owns this artifact.
    InFlight,
    /// Transport confirmed delivery; the file is removed.
    Uploaded,
    /// Last attempt failed; the file stays on disk for the next scan.
    Failed,
}

/// A crash artifact as known to the pipeline
///
/// Created by the capture path at fault time, or reconstructed by scanning
/// the store on startup (state inferred as `Pending`).
#[derive(Debug, Clone)]
pub struct CrashArtifact {
    pub id: ArtifactId,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
    pub state: UploadState,
}

impl CrashArtifact {
    /// Artifact discovered on disk with no prior in-memory state.
    pub fn discovered(id: ArtifactId, path: PathBuf, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            path,
            state: UploadState::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_valid() {
        let id = ArtifactId::generate();
        assert!(ArtifactId::new(id.as_str()).is_ok());
    }

    #[test]
    fn test_accepts_plain_ids() {
        assert!(ArtifactId::new("A1B2").is_ok());
        assert!(ArtifactId::new("a1b2c3d4-e5f6-7890-abcd-ef0123456789").is_ok());
    }

    #[test]
    fn test_rejects_path_like_ids() {
        assert!(ArtifactId::new("").is_err());
        assert!(ArtifactId::new("../etc/passwd").is_err());
        assert!(ArtifactId::new("a/b").is_err());
        assert!(ArtifactId::new("id.dmp").is_err());
        assert!(ArtifactId::new("x".repeat(65)).is_err());
    }

    #[test]
    fn test_file_name() {
        let id = ArtifactId::new("A1B2").unwrap();
        assert_eq!(id.file_name(), "A1B2.dmp");
    }

    #[test]
    fn test_serde_round_trip_validates() {
        let ok: Result<ArtifactId, _> = serde_json::from_str("\"A1B2\"");
        assert!(ok.is_ok());
        let bad: Result<ArtifactId, _> = serde_json::from_str("\"a/b\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_discovered_is_pending() {
        let id = ArtifactId::generate();
        let artifact = CrashArtifact::discovered(id, PathBuf::from("/tmp/x.dmp"), Utc::now());
        assert_eq!(artifact.state, UploadState::Pending);
    }
}
