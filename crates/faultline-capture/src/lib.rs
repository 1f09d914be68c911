//! Faultline Capture - Consent-gated crash capture
//!
//! Provides:
//! - `CaptureController`: arm/disarm lifecycle and the message/error/
//!   breadcrumb instrumentation API, double-gated on armed state and consent
//! - `FatalHooks` / `PosixFatalHooks`: platform seam for fatal-signal
//!   registration with single-shot, restore-and-reraise semantics
//! - `DiskBackend`: default capture backend writing JSON event reports and
//!   keeping the breadcrumb ring buffer

pub mod backend;
pub mod controller;
pub mod fatal;

pub use backend::DiskBackend;
pub use controller::{CaptureConfig, CaptureController};
pub use fatal::{platform_hooks, FatalHooks, FatalSlot};
