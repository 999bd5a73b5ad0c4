//! Streamlock CLI
//!
//! Runs a local takeover simulation or watches a real account's lock.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use streamlock_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "streamlock")]
#[command(about = "Single-slot playback lock for shared streaming accounts")]
#[command(version)]
struct Cli {
    /// Console log level, overridden by RUST_LOG
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Also write a full trace log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.into(), cli.log_file.as_deref())
        .context("failed to initialize logging")?;

    if let Err(e) = commands::handle_command(cli.command).await {
        eprintln!("Error: {}", e.user_message());
        return Err(e.into());
    }

    Ok(())
}
