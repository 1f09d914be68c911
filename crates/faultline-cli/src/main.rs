//! Faultline CLI - Inspect and manage local crash reports
//!
//! Provides commands for:
//! - Listing queued crash artifacts
//! - Manually uploading pending reports
//! - Pruning expired artifacts

use anyhow::Result;
use clap::{Parser, Subcommand};
use faultline_core::Config;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::reports::ReportsCommand;

#[derive(Debug, Parser)]
#[command(name = "faultline", version, about = "Crash report capture and upload")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage local crash reports
    #[command(subcommand)]
    Reports(ReportsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .as_ref()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    match cli.command {
        Commands::Reports(cmd) => cmd.execute(&config, cli.json).await,
    }
}
