//! Faultline Core - Domain types for the crash reporting pipeline
//!
//! Provides:
//! - `Config`: typed configuration (DSN, storage, release, capture)
//! - `ArtifactId` / `CrashArtifact`: crash artifact identity and lifecycle
//! - `CaptureContext` / `Environment`: metadata frozen at arm time
//! - `ConsentGate`: the single authorization switch for capture and upload
//! - `CaptureBackend`: port trait for event/breadcrumb submission

pub mod config;
pub mod domain;
pub mod ports;

pub use config::{Config, Dsn};
pub use domain::artifact::{ArtifactId, CrashArtifact, UploadState};
pub use domain::consent::ConsentGate;
pub use domain::context::{CaptureContext, Environment, SystemInfo};
pub use domain::errors::DomainError;
pub use ports::capture_backend::{Breadcrumb, CaptureBackend, Severity};
