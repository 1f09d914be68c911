//! Consent gate - the single authorization switch
//!
//! One process-wide boolean shared by the capture and upload controllers.
//! Toggling it is the only place the capture/transmission lifecycle changes.
//! Withdrawing consent never deletes already-queued artifacts; they remain
//! on disk for potential future consent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheaply cloneable handle to the shared consent flag
#[derive(Debug, Clone, Default)]
pub struct ConsentGate {
    granted: Arc<AtomicBool>,
}

impl ConsentGate {
    /// Creates a gate with an initial value (the stored user preference).
    pub fn new(granted: bool) -> Self {
        Self {
            granted: Arc::new(AtomicBool::new(granted)),
        }
    }

    pub fn granted(&self) -> bool {
        self.granted.load(Ordering::Acquire)
    }

    /// Sets the flag and returns the previous value.
    pub fn set(&self, granted: bool) -> bool {
        self.granted.swap(granted, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_denied() {
        let gate = ConsentGate::default();
        assert!(!gate.granted());
    }

    #[test]
    fn test_set_returns_previous() {
        let gate = ConsentGate::new(false);
        assert!(!gate.set(true));
        assert!(gate.granted());
        assert!(gate.set(true));
    }

    #[test]
    fn test_clones_share_state() {
        let gate = ConsentGate::new(false);
        let other = gate.clone();
        gate.set(true);
        assert!(other.granted());
    }
}
