//! Upload controller - asynchronous, deduplicated artifact delivery
//!
//! Drives the network round trip for pending crash artifacts. Each attempt
//! is serialized per artifact id (at most one in flight), submitted as a
//! single multipart request, and reported to observers through broadcast
//! events. A successful upload deletes the local artifact; any failure
//! leaves it on disk untouched so the next pending scan retries it.
//!
//! There is deliberately no in-process retry or backoff: retry happens
//! opportunistically at the next [`check_pending_reports`]
//! (typically the next process start). Crash reporting prioritizes eventual
//! delivery over latency.
//!
//! [`check_pending_reports`]: UploadController::check_pending_reports

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use faultline_core::{ArtifactId, ConsentGate};
use reqwest::multipart::{Form, Part};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::store::ArtifactStore;

/// Broadcast channel capacity for upload events.
const EVENT_CAPACITY: usize = 64;

/// Events emitted to observers (e.g. a diagnostics panel)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// Byte progress for an in-flight upload. Fires zero or more times
    /// before the completion event.
    Progress {
        id: ArtifactId,
        bytes_sent: u64,
        bytes_total: u64,
    },
    /// Terminal outcome for an upload attempt. Fires exactly once per
    /// attempt.
    Completed { id: ArtifactId, success: bool },
}

struct Inner {
    store: ArtifactStore,
    consent: ConsentGate,
    /// Minidump ingestion URL; `None` when no DSN is configured, which
    /// disables transmission while local capture continues.
    endpoint: Option<String>,
    release: String,
    retention_days: u32,
    client: reqwest::Client,
    /// Ids currently uploading; per-id mutual exclusion.
    in_flight: Mutex<HashSet<ArtifactId>>,
    events: broadcast::Sender<UploadEvent>,
    initialized: AtomicBool,
}

/// Reliable delivery of pending artifacts without duplication
///
/// Cheaply cloneable; clones share the in-flight set and event channel.
#[derive(Clone)]
pub struct UploadController {
    inner: Arc<Inner>,
}

impl UploadController {
    pub fn new(
        store: ArtifactStore,
        consent: ConsentGate,
        endpoint: Option<String>,
        release: String,
        retention_days: u32,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                consent,
                endpoint,
                release,
                retention_days,
                client: reqwest::Client::new(),
                in_flight: Mutex::new(HashSet::new()),
                events,
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribes to upload progress/completion events.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.inner.events.subscribe()
    }

    /// Startup entry point: prunes expired artifacts, then scans for
    /// pending ones. Idempotent; later calls are no-ops.
    ///
    /// Must be called within a tokio runtime (uploads are spawned).
    pub fn initialize(&self) {
        if self.inner.initialized.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.inner.store.prune(self.inner.retention_days) {
            Ok(removed) if removed > 0 => {
                info!(removed, "Pruned expired crash artifacts");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %format!("{e:#}"), "Retention pruning failed"),
        }
        self.check_pending_reports();
    }

    /// Enumerates the store and issues an upload for every pending
    /// artifact. This is how artifacts orphaned by a prior crash get
    /// retried on the next successful run. Returns the number of artifacts
    /// scheduled.
    pub fn check_pending_reports(&self) -> usize {
        let ids = match self.inner.store.list_pending() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Failed to enumerate pending artifacts");
                return 0;
            }
        };

        let count = ids.len();
        if count > 0 {
            info!(pending = count, "Scheduling pending crash report uploads");
        }
        for id in ids {
            self.upload_crash_report(id);
        }
        count
    }

    /// Uploads one artifact. Returns immediately; the outcome is delivered
    /// via [`UploadEvent::Completed`].
    ///
    /// No-ops when consent is withheld, when no endpoint is configured, or
    /// when an upload for the same id is already in flight. A missing
    /// artifact completes with `success: false` without touching the
    /// network (an expected condition, e.g. already pruned).
    pub fn upload_crash_report(&self, id: ArtifactId) {
        if !self.inner.consent.granted() {
            debug!(artifact_id = %id, "Upload skipped: consent not granted");
            return;
        }
        if self.inner.endpoint.is_none() {
            debug!(artifact_id = %id, "Upload skipped: no ingestion endpoint configured");
            return;
        }

        // Synchronous insertion before any I/O: a concurrent call for the
        // same id sees it and becomes a no-op.
        {
            let Ok(mut in_flight) = self.inner.in_flight.lock() else {
                return;
            };
            if !in_flight.insert(id.clone()) {
                debug!(artifact_id = %id, "Upload already in flight");
                return;
            }
        }

        if !self.inner.store.exists(&id) {
            warn!(artifact_id = %id, "Upload requested for unknown artifact");
            self.finish(&id, false);
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            let success = this.run_upload(&id).await;
            this.finish(&id, success);
        });
    }

    /// The network round trip. Returns the success flag; never panics and
    /// never deletes the artifact unless the transport confirmed delivery.
    async fn run_upload(&self, id: &ArtifactId) -> bool {
        // Endpoint presence was checked before spawning.
        let Some(endpoint) = self.inner.endpoint.as_deref() else {
            return false;
        };

        let path = self.inner.store.path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(artifact_id = %id, error = %e, "Failed to read artifact");
                return false;
            }
        };
        let bytes_total = bytes.len() as u64;

        let form = match build_form(id, bytes, &self.inner.release) {
            Ok(form) => form,
            Err(e) => {
                warn!(artifact_id = %id, error = %format!("{e:#}"), "Failed to build upload body");
                return false;
            }
        };

        self.emit(UploadEvent::Progress {
            id: id.clone(),
            bytes_sent: 0,
            bytes_total,
        });

        let response = self.inner.client.post(endpoint).multipart(form).send().await;

        match response {
            Ok(response) if response.status().is_success() => {
                self.emit(UploadEvent::Progress {
                    id: id.clone(),
                    bytes_sent: bytes_total,
                    bytes_total,
                });
                info!(artifact_id = %id, "Crash report uploaded");
                if let Err(e) = self.inner.store.remove(id) {
                    // The next scan will re-upload it; the server keys on
                    // the same event id, so this is waste, not corruption.
                    warn!(artifact_id = %id, error = %format!("{e:#}"), "Failed to remove uploaded artifact");
                }
                true
            }
            Ok(response) => {
                warn!(
                    artifact_id = %id,
                    status = %response.status(),
                    "Crash report upload rejected; artifact retained for retry"
                );
                false
            }
            Err(e) => {
                warn!(
                    artifact_id = %id,
                    error = %e,
                    "Crash report upload failed; artifact retained for retry"
                );
                false
            }
        }
    }

    /// Removes the id from the in-flight set, then reports the outcome.
    /// The ordering makes completion observable only after the id is free
    /// for a new attempt.
    fn finish(&self, id: &ArtifactId, success: bool) {
        if let Ok(mut in_flight) = self.inner.in_flight.lock() {
            in_flight.remove(id);
        }
        self.emit(UploadEvent::Completed {
            id: id.clone(),
            success,
        });
    }

    fn emit(&self, event: UploadEvent) {
        // No subscribers is fine; events are best-effort.
        let _ = self.inner.events.send(event);
    }
}

/// Builds the multipart envelope: one binary part with the raw artifact
/// bytes, one JSON part with the submission metadata keyed by the artifact
/// id as the remote event identifier.
fn build_form(id: &ArtifactId, bytes: Vec<u8>, release: &str) -> anyhow::Result<Form> {
    let minidump = Part::bytes(bytes)
        .file_name(id.file_name())
        .mime_str("application/octet-stream")?;

    let metadata = serde_json::json!({
        "platform": "native",
        "release": release,
        "timestamp": Utc::now().to_rfc3339(),
        "event_id": id.as_str(),
    });
    let metadata = Part::text(metadata.to_string()).mime_str("application/json")?;

    Ok(Form::new()
        .part("upload_file_minidump", minidump)
        .part("sentry", metadata))
}
