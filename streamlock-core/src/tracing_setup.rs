//! Tracing setup for Streamlock
//!
//! Console output at a user-chosen level plus an optional full trace log on
//! disk, so lock handovers between devices can be reconstructed afterwards.

use std::fs::{File, create_dir_all};
use std::path::Path;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides `console_level` for the console layer. When
/// `log_file` is given, every event down to TRACE is also written there,
/// truncating the previous run.
///
/// # Errors
///
/// - `std::io::Error` - If the log file or its directory cannot be created
pub fn init_tracing(console_level: Level, log_file: Option<&Path>) -> std::io::Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));

    let console_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(console_filter);

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                create_dir_all(parent)?;
            }
            let file = File::create(path)?;
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .with_writer(file)
                    .with_filter(EnvFilter::new("trace")),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    match log_file {
        Some(path) => tracing::debug!(
            "Tracing initialized: console={}, trace_file={}",
            console_level,
            path.display()
        ),
        None => tracing::debug!("Tracing initialized: console={}", console_level),
    }

    Ok(())
}

/// Console verbosity chosen with `--log-level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Warnings such as failed heartbeats, plus errors
    Warn,
    /// Lock status changes and everything above
    #[default]
    Info,
    /// Feed traffic and RPC dispatch
    Debug,
    /// Everything
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::ValueEnum;

    use super::*;

    #[test]
    fn test_cli_level_maps_to_tracing_level() {
        assert_eq!(Level::from(CliLogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(CliLogLevel::default()), Level::INFO);
    }

    #[test]
    fn test_cli_level_parses_case_insensitively() {
        let level = CliLogLevel::from_str("debug", true).unwrap();
        assert_eq!(level, CliLogLevel::Debug);
        assert!(CliLogLevel::from_str("verbose", true).is_err());
    }
}
