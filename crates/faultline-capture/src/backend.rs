//! Default capture backend: JSON event reports on local disk
//!
//! Keeps the breadcrumb ring buffer and writes one `event-<date>-<uuid8>.json`
//! file per submitted event into the storage directory. Fatal crash
//! artifacts (`.dmp`) are written by the signal path, not through this
//! backend.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use faultline_core::ports::capture_backend::{
    BackendConfig, Breadcrumb, CaptureBackend, Severity,
};
use faultline_core::CaptureContext;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Ring buffer capacity; older breadcrumbs are dropped first.
const BREADCRUMB_CAPACITY: usize = 100;

/// A serialized non-fatal event report
#[derive(Debug, Serialize)]
struct EventReport<'a> {
    id: String,
    timestamp: String,
    severity: Severity,
    category: &'a str,
    message: &'a str,
    attributes: &'a BTreeMap<String, String>,
    breadcrumbs: Vec<Breadcrumb>,
    context: &'a CaptureContext,
}

struct BackendState {
    storage_dir: PathBuf,
    context: CaptureContext,
    verbose: bool,
}

/// Disk-backed [`CaptureBackend`]
///
/// All methods are tolerant of an uninitialized backend: submissions are
/// logged and dropped, never surfaced to the caller.
#[derive(Default)]
pub struct DiskBackend {
    state: Mutex<Option<BackendState>>,
    crumbs: Mutex<VecDeque<Breadcrumb>>,
}

impl DiskBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn breadcrumb_snapshot(&self) -> Vec<Breadcrumb> {
        match self.crumbs.lock() {
            Ok(crumbs) => crumbs.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl CaptureBackend for DiskBackend {
    fn init(&self, config: BackendConfig) -> anyhow::Result<()> {
        let Ok(mut state) = self.state.lock() else {
            anyhow::bail!("Capture backend state is poisoned");
        };
        if state.is_some() {
            debug!("Capture backend already initialized");
            return Ok(());
        }

        std::fs::create_dir_all(&config.storage_dir)?;
        if config.verbose {
            debug!(
                storage_dir = %config.storage_dir.display(),
                environment = %config.context.environment,
                release = %config.context.release,
                "Capture backend initialized with verbose diagnostics"
            );
        }

        *state = Some(BackendState {
            storage_dir: config.storage_dir,
            context: config.context,
            verbose: config.verbose,
        });
        Ok(())
    }

    fn submit_event(
        &self,
        severity: Severity,
        category: &str,
        message: &str,
        attributes: BTreeMap<String, String>,
    ) {
        let Ok(state) = self.state.lock() else {
            return;
        };
        let Some(state) = state.as_ref() else {
            debug!(category, "Event dropped: capture backend not initialized");
            return;
        };

        let report = EventReport {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            severity,
            category,
            message,
            attributes: &attributes,
            breadcrumbs: self.breadcrumb_snapshot(),
            context: &state.context,
        };

        let date = Utc::now().format("%Y%m%d");
        let short_id = &report.id[..8];
        let path = state
            .storage_dir
            .join(format!("event-{date}-{short_id}.json"));

        let json = match serde_json::to_string_pretty(&report) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize event report");
                return;
            }
        };
        if let Err(e) = std::fs::write(&path, json) {
            // Never propagated: capture must not become a failure source.
            warn!(path = %path.display(), error = %e, "Failed to write event report");
            return;
        }

        if state.verbose {
            debug!(
                severity = severity.as_str(),
                category,
                path = %path.display(),
                "Event report written"
            );
        }
    }

    fn add_breadcrumb(&self, crumb: Breadcrumb) {
        let Ok(state) = self.state.lock() else {
            return;
        };
        if state.is_none() {
            return;
        }
        drop(state);

        if let Ok(mut crumbs) = self.crumbs.lock() {
            if crumbs.len() == BREADCRUMB_CAPACITY {
                crumbs.pop_front();
            }
            crumbs.push_back(crumb);
        }
    }

    fn shutdown(&self) {
        if let Ok(mut state) = self.state.lock() {
            if state.take().is_some() {
                debug!("Capture backend shut down");
            }
        }
        if let Ok(mut crumbs) = self.crumbs.lock() {
            crumbs.clear();
        }
    }
}
