//! Capture backend port (driven/secondary port)
//!
//! The backend owns event serialization and persistence. The policy layer
//! (capture controller) decides *when* to call it and *what* metadata to
//! attach; the backend decides *how* events end up on disk.
//!
//! ## Design Notes
//!
//! - The trait is deliberately synchronous: it must be callable before any
//!   async runtime exists and from shutdown paths where no executor is
//!   available. Implementations must return quickly.
//! - The fatal-signal path does **not** go through this trait. Handlers run
//!   in a compromised context where only async-signal-safe operations are
//!   allowed; the fatal path uses a pre-arranged, allocation-free slot
//!   instead (see the capture crate).
//! - Submissions before `init` (or after `shutdown`) must be dropped, not
//!   errors: a backend that failed to initialize leaves capture inert
//!   without affecting the host application.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::context::CaptureContext;

/// Severity of a captured event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }
}

/// A small timestamped note attached to the next captured event
///
/// Breadcrumbs accumulate in a bounded ring buffer and reconstruct recent
/// application activity preceding a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub category: String,
}

impl Breadcrumb {
    pub fn new(message: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            category: category.into(),
        }
    }
}

/// Configuration handed to the backend at init time
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Directory where the backend persists events and artifacts.
    pub storage_dir: PathBuf,
    /// Context frozen at arm time, attached to every event.
    pub context: CaptureContext,
    /// Verbose diagnostics (forced on outside production).
    pub verbose: bool,
}

/// Port trait for event and breadcrumb submission
///
/// Implementations must be tolerant of misuse: every method other than
/// `init` is a silent no-op until `init` has succeeded.
pub trait CaptureBackend: Send + Sync {
    /// Initializes the backend. Idempotent.
    fn init(&self, config: BackendConfig) -> anyhow::Result<()>;

    /// Submits a captured event with optional key-value attributes.
    fn submit_event(
        &self,
        severity: Severity,
        category: &str,
        message: &str,
        attributes: BTreeMap<String, String>,
    );

    /// Appends a breadcrumb to the ring buffer.
    fn add_breadcrumb(&self, crumb: Breadcrumb);

    /// Flushes and deactivates the backend. Safe to call when never
    /// initialized.
    fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_as_str() {
        assert_eq!(Severity::Fatal.as_str(), "fatal");
        assert_eq!(Severity::Info.as_str(), "info");
    }

    #[test]
    fn test_breadcrumb_defaults() {
        let crumb = Breadcrumb::new("opened profile", "default");
        assert_eq!(crumb.category, "default");
        assert!(!crumb.message.is_empty());
    }
}
