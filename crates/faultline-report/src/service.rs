//! Crash reporting service - explicit wiring of the pipeline
//!
//! One `CrashReporting` instance per process, constructed at application
//! bootstrap and passed by reference to the few call sites that need it
//! (the consent toggle, instrumentation call sites, shutdown). This
//! replaces hidden global singletons while keeping exactly-one-instance
//! semantics: the fatal-handler state is process-global, so arming two
//! instances is not supported.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use faultline_capture::{platform_hooks, CaptureConfig, CaptureController, DiskBackend};
use faultline_core::{Config, ConsentGate};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::store::ArtifactStore;
use crate::uploader::{UploadController, UploadEvent};

/// How often the retention pruner runs while the process stays up.
const PRUNE_INTERVAL: Duration = Duration::from_secs(6 * 3600);

/// The assembled crash-capture-and-report pipeline
pub struct CrashReporting {
    consent: ConsentGate,
    capture: Arc<CaptureController>,
    uploader: UploadController,
    store: ArtifactStore,
    retention_days: u32,
    shutdown: CancellationToken,
}

impl CrashReporting {
    /// Builds the pipeline from configuration and the stored consent
    /// preference. Nothing is armed and nothing is transmitted yet; call
    /// [`start`](Self::start) once a runtime is available.
    pub fn bootstrap(config: &Config, consented: bool) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            bail!("Invalid configuration: {}", joined.join("; "));
        }

        let consent = ConsentGate::new(consented);
        let storage_dir = config.storage_dir();
        let store = ArtifactStore::new(storage_dir.clone());

        // A missing or malformed DSN disables transmission but never
        // capture; artifacts queue locally until upload is configured.
        let endpoint = match config.resolve_dsn() {
            Some(Ok(dsn)) => Some(dsn.minidump_url()),
            Some(Err(e)) => {
                warn!(error = %e, "Ignoring malformed DSN; upload disabled");
                None
            }
            None => None,
        };

        let capture = Arc::new(CaptureController::new(
            CaptureConfig {
                storage_dir,
                version: config.release.version.clone(),
                build: config.release.build.clone(),
                verbose: config.capture.verbose,
            },
            consent.clone(),
            Arc::new(DiskBackend::new()),
            platform_hooks(),
        ));

        let uploader = UploadController::new(
            store.clone(),
            consent.clone(),
            endpoint,
            config.release_string(),
            config.storage.retention_days,
        );

        Ok(Self {
            consent,
            capture,
            uploader,
            store,
            retention_days: config.storage.retention_days,
            shutdown: CancellationToken::new(),
        })
    }

    /// Starts the pipeline: arms capture when consent is already granted,
    /// runs the startup prune + pending scan, and spawns the periodic
    /// pruner. Must run within a tokio runtime.
    pub fn start(&self) {
        if self.consent.granted() {
            if let Err(e) = self.capture.arm() {
                error!(error = %format!("{e:#}"), "Failed to arm crash capture at startup");
            }
        } else {
            info!("Crash reporting consent not granted; capture stays disarmed");
        }

        self.uploader.initialize();
        self.spawn_prune_loop();
    }

    /// Single consent entry point: arms/disarms capture and, on grant,
    /// immediately schedules any queued artifacts instead of waiting for
    /// the next startup scan.
    pub fn set_consent(&self, enabled: bool) {
        let changed = self.consent.granted() != enabled;
        self.capture.set_consent(enabled);
        if enabled && changed {
            self.uploader.check_pending_reports();
        }
    }

    /// Instrumentation surface for the host application.
    pub fn capture(&self) -> &CaptureController {
        &self.capture
    }

    /// The artifact store (read-only uses: listing, diagnostics panels).
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Subscribes to upload progress/completion events.
    pub fn events(&self) -> broadcast::Receiver<UploadEvent> {
        self.uploader.subscribe()
    }

    /// Stops the pruner and disarms capture. In-flight uploads are
    /// abandoned; their artifacts remain on disk and are retried on the
    /// next pending scan.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.capture.disarm();
        info!("Crash reporting shut down");
    }

    fn spawn_prune_loop(&self) {
        let store = self.store.clone();
        let retention_days = self.retention_days;
        let token = self.shutdown.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            // The first tick fires immediately; initialize() already
            // pruned, so consume it.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match store.prune(retention_days) {
                            Ok(removed) if removed > 0 => {
                                info!(removed, "Periodic prune removed expired artifacts");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(error = %format!("{e:#}"), "Periodic prune failed");
                            }
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
    }
}
