//! Reports command - Inspect and manage queued crash artifacts
//!
//! Provides the `faultline reports` subcommands:
//! - `list`: Show pending crash artifacts
//! - `show`: Display details for one artifact
//! - `upload`: Upload one or all pending artifacts
//! - `prune`: Delete artifacts older than the retention window

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use faultline_core::{ArtifactId, Config, ConsentGate};
use faultline_report::{ArtifactStore, UploadController, UploadEvent};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

/// Crash report subcommands
#[derive(Debug, Subcommand)]
pub enum ReportsCommand {
    /// List pending crash artifacts
    List,
    /// Show details for one artifact
    Show {
        /// Artifact ID
        id: String,
    },
    /// Upload pending artifacts to the configured endpoint
    Upload {
        /// Specific artifact ID (omit to upload all pending)
        id: Option<String>,
    },
    /// Delete artifacts older than the retention window
    Prune {
        /// Maximum age in days (defaults to the configured retention)
        #[arg(long)]
        days: Option<u32>,
    },
}

impl ReportsCommand {
    pub async fn execute(&self, config: &Config, json: bool) -> Result<()> {
        let store = ArtifactStore::new(config.storage_dir());

        match self {
            ReportsCommand::List => {
                let mut ids = store.list_pending()?;
                ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));

                if ids.is_empty() {
                    if json {
                        println!("[]");
                    } else {
                        println!("No pending crash reports.");
                    }
                    return Ok(());
                }

                let mut entries = Vec::new();
                for id in &ids {
                    let meta = std::fs::metadata(store.path(id))
                        .with_context(|| format!("Failed to stat artifact '{id}'"))?;
                    let modified: DateTime<Utc> = meta.modified()?.into();
                    entries.push((id, meta.len(), modified));
                }

                if json {
                    let values: Vec<serde_json::Value> = entries
                        .iter()
                        .map(|(id, size, modified)| {
                            serde_json::json!({
                                "id": id.as_str(),
                                "size_bytes": size,
                                "modified": modified.to_rfc3339(),
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&values)?);
                } else {
                    println!("{:<40} {:>10} {:<20}", "ID", "Size", "Modified");
                    println!("{}", "-".repeat(72));
                    for (id, size, modified) in &entries {
                        println!(
                            "{:<40} {:>10} {:<20}",
                            id.as_str(),
                            format_size(*size),
                            modified.format("%Y-%m-%d %H:%M UTC"),
                        );
                    }
                    println!();
                    println!("Total: {} report(s)", entries.len());
                }
            }

            ReportsCommand::Show { id } => {
                let id = ArtifactId::new(id.clone())?;
                if !store.exists(&id) {
                    bail!("Report '{id}' not found");
                }
                let path = store.path(&id);
                let meta = std::fs::metadata(&path)?;
                let modified: DateTime<Utc> = meta.modified()?.into();

                if json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "id": id.as_str(),
                            "path": path.display().to_string(),
                            "size_bytes": meta.len(),
                            "modified": modified.to_rfc3339(),
                        }))?
                    );
                } else {
                    println!("ID:       {}", id.as_str());
                    println!("Path:     {}", path.display());
                    println!("Size:     {}", format_size(meta.len()));
                    println!("Modified: {}", modified.format("%Y-%m-%d %H:%M UTC"));
                }
            }

            ReportsCommand::Upload { id } => {
                let endpoint = match config.resolve_dsn() {
                    Some(Ok(dsn)) => dsn.minidump_url(),
                    Some(Err(e)) => bail!("Invalid DSN: {e}"),
                    None => bail!(
                        "No DSN configured; set ingest.dsn or the {} environment variable",
                        faultline_core::config::DSN_ENV
                    ),
                };

                let to_upload: Vec<ArtifactId> = match id {
                    Some(raw) => {
                        let id = ArtifactId::new(raw.clone())?;
                        if !store.exists(&id) {
                            bail!("Report '{id}' not found");
                        }
                        vec![id]
                    }
                    None => store.list_pending()?,
                };
                if to_upload.is_empty() {
                    println!("No pending crash reports to upload.");
                    return Ok(());
                }

                // A manual upload request is itself consent.
                let uploader = UploadController::new(
                    store.clone(),
                    ConsentGate::new(true),
                    Some(endpoint),
                    config.release_string(),
                    config.storage.retention_days,
                );
                let rx = uploader.subscribe();

                let waiting: HashSet<ArtifactId> = to_upload.iter().cloned().collect();
                for id in &to_upload {
                    uploader.upload_crash_report(id.clone());
                }

                let (succeeded, failed) = wait_for_completions(rx, waiting).await?;

                if json {
                    println!(
                        "{}",
                        serde_json::json!({ "uploaded": succeeded, "failed": failed })
                    );
                } else {
                    println!();
                    println!("{succeeded} uploaded, {failed} failed");
                }
                if failed > 0 {
                    bail!("{failed} upload(s) failed");
                }
            }

            ReportsCommand::Prune { days } => {
                let max_age = days.unwrap_or(config.storage.retention_days);
                if max_age == 0 {
                    bail!("Retention must be at least 1 day");
                }
                let removed = store.prune(max_age)?;
                if json {
                    println!("{}", serde_json::json!({ "removed": removed }));
                } else {
                    println!("Removed {removed} expired report(s)");
                }
            }
        }

        Ok(())
    }
}

/// Waits for a completion event for every id in `waiting`, returning the
/// (succeeded, failed) counts.
///
/// A lagged receiver (progress events outpacing the channel capacity) is
/// not fatal; the loop resumes from the oldest retained event.
async fn wait_for_completions(
    mut rx: broadcast::Receiver<UploadEvent>,
    mut waiting: HashSet<ArtifactId>,
) -> Result<(u32, u32)> {
    let mut succeeded = 0u32;
    let mut failed = 0u32;
    while !waiting.is_empty() {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Upload event channel lagged");
                continue;
            }
            Err(RecvError::Closed) => bail!("Upload event channel closed"),
        };
        match event {
            UploadEvent::Completed { id, success } => {
                if !waiting.remove(&id) {
                    continue;
                }
                if success {
                    succeeded += 1;
                    println!("Uploaded '{id}'");
                } else {
                    failed += 1;
                    println!("Failed to upload '{id}' (kept for retry)");
                }
            }
            event => debug!(?event, "Ignoring event"),
        }
    }
    Ok((succeeded, failed))
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
