//! Capture controller - lifecycle policy around the capture backend
//!
//! Owns the armed/disarmed state machine, installs/removes fatal-signal
//! hooks, freezes the capture context at arm time, and exposes the
//! instrumentation API (`capture_message`, `capture_error`,
//! `add_breadcrumb`) used by the rest of the application.
//!
//! ## State machine
//!
//! Two explicit states, `Disarmed` and `Armed`, with transitions only via
//! [`CaptureController::set_consent`]. This replaces the ambiguous
//! cross-product of separate `initialized`/`consented` booleans: consent
//! granted implies armed (unless arming failed), consent withdrawn implies
//! disarmed.
//!
//! Every instrumentation call is double-gated: the backend must be armed
//! **and** consent must be granted. Capture must never happen without
//! consent, and must never be attempted before initialization completed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use faultline_core::ports::capture_backend::BackendConfig;
use faultline_core::{
    ArtifactId, Breadcrumb, CaptureBackend, CaptureContext, ConsentGate, Environment, Severity,
};
use tracing::{debug, error, info};

use crate::fatal::{FatalHooks, FatalSlot};

/// Capture policy settings, resolved from the application configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Directory receiving crash artifacts and event reports.
    pub storage_dir: PathBuf,
    /// Application version, e.g. `1.4.0`.
    pub version: String,
    /// Build suffix, e.g. `-dev`; drives environment classification.
    pub build: String,
    /// Verbose backend diagnostics (forced on outside production).
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArmState {
    Disarmed,
    Armed,
}

/// Policy layer for consent-gated crash capture
pub struct CaptureController {
    config: CaptureConfig,
    consent: ConsentGate,
    backend: Arc<dyn CaptureBackend>,
    hooks: Box<dyn FatalHooks>,
    state: Mutex<ArmState>,
}

impl CaptureController {
    /// Creates a disarmed controller.
    ///
    /// `consent` is the process-wide gate shared with the upload side; the
    /// controller does not arm until consent is granted via
    /// [`set_consent`](Self::set_consent) (or an explicit [`arm`](Self::arm)
    /// after the gate was pre-set from the stored preference).
    pub fn new(
        config: CaptureConfig,
        consent: ConsentGate,
        backend: Arc<dyn CaptureBackend>,
        hooks: Box<dyn FatalHooks>,
    ) -> Self {
        Self {
            config,
            consent,
            backend,
            hooks,
            state: Mutex::new(ArmState::Disarmed),
        }
    }

    /// Arms capture: initializes the backend, freezes the context, and
    /// installs fatal-signal handlers.
    ///
    /// No-op when already armed or when consent is not granted. Idempotent.
    pub fn arm(&self) -> Result<()> {
        if !self.consent.granted() {
            debug!("Not arming capture: consent not granted");
            return Ok(());
        }
        let Ok(mut state) = self.state.lock() else {
            anyhow::bail!("Capture state is poisoned");
        };
        if *state == ArmState::Armed {
            return Ok(());
        }

        let context = CaptureContext::new(&self.config.version, &self.config.build);
        let verbose = self.config.verbose || context.environment != Environment::Production;

        std::fs::create_dir_all(&self.config.storage_dir).with_context(|| {
            format!(
                "Failed to create artifact directory {}",
                self.config.storage_dir.display()
            )
        })?;

        self.backend
            .init(BackendConfig {
                storage_dir: self.config.storage_dir.clone(),
                context: context.clone(),
                verbose,
            })
            .context("Capture backend failed to initialize")?;

        // Reserve the artifact for the next fatal event and pre-render
        // everything the signal handler will need.
        let artifact_id = ArtifactId::generate();
        let artifact_path = self.config.storage_dir.join(artifact_id.file_name());
        let slot = FatalSlot::prepare(&artifact_path, &context)
            .context("Failed to prepare fatal capture slot")?;
        self.hooks
            .install(&slot)
            .context("Failed to install fatal-signal handlers")?;

        *state = ArmState::Armed;
        info!(
            artifact_id = %artifact_id,
            release = %context.release,
            environment = %context.environment,
            "Crash capture armed"
        );
        self.backend
            .add_breadcrumb(Breadcrumb::new("capture armed", "system"));
        Ok(())
    }

    /// Disarms capture: removes handlers and shuts the backend down.
    ///
    /// Safe to call when never armed. Queued artifacts are untouched.
    pub fn disarm(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if *state == ArmState::Disarmed {
            return;
        }

        self.backend
            .add_breadcrumb(Breadcrumb::new("capture disarming", "system"));
        self.hooks.uninstall();
        self.backend.shutdown();
        *state = ArmState::Disarmed;
        info!("Crash capture disarmed");
    }

    /// The only entry point that transitions consent state.
    ///
    /// Granting consent while disarmed arms capture; withdrawing it while
    /// armed disarms synchronously. Calling with the current value is a
    /// no-op. Arming failures are logged, never propagated: capture then
    /// stays inert while the host application continues.
    pub fn set_consent(&self, enabled: bool) {
        if self.consent.granted() == enabled {
            return;
        }

        if enabled {
            self.consent.set(true);
            if let Err(e) = self.arm() {
                error!(error = %format!("{e:#}"), "Failed to arm crash capture");
            }
        } else {
            // Gate first so instrumentation calls stop immediately, then
            // take the handlers down.
            self.consent.set(false);
            self.disarm();
        }
    }

    /// True when armed and consented; every capture call checks this.
    pub fn is_active(&self) -> bool {
        let armed = self
            .state
            .lock()
            .map(|s| *s == ArmState::Armed)
            .unwrap_or(false);
        armed && self.consent.granted()
    }

    /// Captures an informational message event.
    pub fn capture_message(&self, message: &str) {
        if !self.is_active() {
            return;
        }
        self.backend
            .submit_event(Severity::Info, "message", message, BTreeMap::new());
    }

    /// Captures a non-fatal error event, optionally tagged with the
    /// originating context (function, subsystem).
    pub fn capture_error(&self, message: &str, origin_context: Option<&str>) {
        if !self.is_active() {
            return;
        }
        let mut attributes = BTreeMap::new();
        if let Some(origin) = origin_context {
            attributes.insert("origin_context".to_string(), origin.to_string());
        }
        self.backend
            .submit_event(Severity::Error, "error", message, attributes);
    }

    /// Adds a breadcrumb to the ring buffer attached to the next event.
    pub fn add_breadcrumb(&self, message: &str, category: &str) {
        if !self.is_active() {
            return;
        }
        self.backend
            .add_breadcrumb(Breadcrumb::new(message, category));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend recording every call for assertions.
    #[derive(Default)]
    struct RecordingBackend {
        inits: AtomicUsize,
        shutdowns: AtomicUsize,
        fail_init: bool,
        events: Mutex<Vec<(Severity, String, String)>>,
        crumbs: Mutex<Vec<Breadcrumb>>,
    }

    impl RecordingBackend {
        fn failing() -> Self {
            Self {
                fail_init: true,
                ..Self::default()
            }
        }

        fn event_count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    impl CaptureBackend for RecordingBackend {
        fn init(&self, _config: BackendConfig) -> Result<()> {
            if self.fail_init {
                anyhow::bail!("simulated backend failure");
            }
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn submit_event(
            &self,
            severity: Severity,
            category: &str,
            message: &str,
            _attributes: BTreeMap<String, String>,
        ) {
            self.events.lock().unwrap().push((
                severity,
                category.to_string(),
                message.to_string(),
            ));
        }

        fn add_breadcrumb(&self, crumb: Breadcrumb) {
            self.crumbs.lock().unwrap().push(crumb);
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Hooks counting installs/uninstalls without touching real signals.
    #[derive(Default)]
    struct RecordingHooks {
        installs: Arc<AtomicUsize>,
        uninstalls: Arc<AtomicUsize>,
    }

    impl FatalHooks for RecordingHooks {
        fn install(&self, _slot: &FatalSlot) -> Result<()> {
            self.installs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn uninstall(&self) {
            self.uninstalls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn controller(
        consent: bool,
        backend: Arc<RecordingBackend>,
    ) -> (
        CaptureController,
        Arc<AtomicUsize>,
        Arc<AtomicUsize>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let hooks = RecordingHooks::default();
        let installs = hooks.installs.clone();
        let uninstalls = hooks.uninstalls.clone();
        let controller = CaptureController::new(
            CaptureConfig {
                storage_dir: dir.path().to_path_buf(),
                version: "1.0.0".to_string(),
                build: "-dev".to_string(),
                verbose: false,
            },
            ConsentGate::new(consent),
            backend,
            Box::new(hooks),
        );
        (controller, installs, uninstalls, dir)
    }

    #[test]
    fn test_no_consent_means_no_handlers_and_no_events() {
        let backend = Arc::new(RecordingBackend::default());
        let (controller, installs, _, _dir) = controller(false, backend.clone());

        controller.arm().unwrap();
        controller.capture_message("hello");
        controller.capture_error("boom", Some("test"));
        controller.add_breadcrumb("crumb", "default");

        assert_eq!(installs.load(Ordering::SeqCst), 0);
        assert_eq!(backend.inits.load(Ordering::SeqCst), 0);
        assert_eq!(backend.event_count(), 0);
        assert!(backend.crumbs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_set_consent_true_arms() {
        let backend = Arc::new(RecordingBackend::default());
        let (controller, installs, _, _dir) = controller(false, backend.clone());

        controller.set_consent(true);

        assert!(controller.is_active());
        assert_eq!(installs.load(Ordering::SeqCst), 1);
        assert_eq!(backend.inits.load(Ordering::SeqCst), 1);
        let crumbs = backend.crumbs.lock().unwrap();
        assert_eq!(crumbs.len(), 1);
        assert_eq!(crumbs[0].message, "capture armed");
        assert_eq!(crumbs[0].category, "system");
    }

    #[test]
    fn test_arm_is_idempotent() {
        let backend = Arc::new(RecordingBackend::default());
        let (controller, installs, _, _dir) = controller(true, backend.clone());

        controller.arm().unwrap();
        controller.arm().unwrap();
        controller.set_consent(true); // same value: no-op

        assert_eq!(installs.load(Ordering::SeqCst), 1);
        assert_eq!(backend.inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_consent_withdrawal_disarms_synchronously() {
        let backend = Arc::new(RecordingBackend::default());
        let (controller, _, uninstalls, _dir) = controller(false, backend.clone());

        controller.set_consent(true);
        controller.capture_message("while armed");
        controller.set_consent(false);
        controller.capture_message("after withdrawal");

        assert!(!controller.is_active());
        assert_eq!(uninstalls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.shutdowns.load(Ordering::SeqCst), 1);
        // Only the first message reached the backend.
        assert_eq!(backend.event_count(), 1);
    }

    #[test]
    fn test_consent_reenable_rearms_without_explicit_arm() {
        let backend = Arc::new(RecordingBackend::default());
        let (controller, installs, _, _dir) = controller(false, backend.clone());

        controller.set_consent(true);
        controller.set_consent(false);
        controller.set_consent(true);
        controller.capture_message("back again");

        assert_eq!(installs.load(Ordering::SeqCst), 2);
        assert_eq!(backend.event_count(), 1);
    }

    #[test]
    fn test_backend_failure_leaves_capture_inert() {
        let backend = Arc::new(RecordingBackend::failing());
        let (controller, installs, _, _dir) = controller(false, backend.clone());

        // set_consent swallows the arming failure.
        controller.set_consent(true);

        assert!(!controller.is_active());
        assert_eq!(installs.load(Ordering::SeqCst), 0);
        controller.capture_message("dropped");
        assert_eq!(backend.event_count(), 0);
    }

    #[test]
    fn test_disarm_when_never_armed_is_safe() {
        let backend = Arc::new(RecordingBackend::default());
        let (controller, _, uninstalls, _dir) = controller(false, backend);
        controller.disarm();
        assert_eq!(uninstalls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_capture_error_carries_origin() {
        let backend = Arc::new(RecordingBackend::default());
        let (controller, _, _, _dir) = controller(false, backend.clone());
        controller.set_consent(true);
        controller.capture_error("read failed", Some("sync_engine"));

        let events = backend.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, Severity::Error);
        assert_eq!(events[0].1, "error");
        assert_eq!(events[0].2, "read failed");
    }
}
