//! Faultline Report - Artifact storage and asynchronous upload
//!
//! Provides:
//! - `ArtifactStore`: on-disk artifact bookkeeping (naming, enumeration,
//!   idempotent deletion, age-based pruning)
//! - `UploadController`: per-artifact-deduplicated multipart uploads with
//!   completion/progress events and opportunistic retry via pending scans
//! - `CrashReporting`: the explicitly constructed service object wiring
//!   consent, capture and upload together

pub mod service;
pub mod store;
pub mod uploader;

pub use service::CrashReporting;
pub use store::ArtifactStore;
pub use uploader::{UploadController, UploadEvent};
