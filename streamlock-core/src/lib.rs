//! Streamlock Core - exclusive playback lock for shared streaming accounts
//!
//! IPTV providers usually allow a single concurrent connection per account.
//! This crate arbitrates that slot between every device and instance signed
//! in to the same account: a pure reducer decides local lock state from the
//! coordinator's change feed, and a small actor runs the resulting effects
//! (RPCs, playback stop/start, heartbeats).

pub mod client;
pub mod config;
pub mod coordinator;
pub mod feed;
pub mod identity;
pub mod lock;
pub mod playback;
pub mod tracing_setup;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

// Flat re-exports for the composition root
pub use client::{LockClient, LockHandle, LockView, spawn_lock_client};
pub use config::StreamLockConfig;
pub use coordinator::{CoordinatorError, HttpCoordinator, InMemoryCoordinator, LockCoordinator};
pub use feed::{ChangeFeed, FeedMessage, PollingFeed, Subscription};
pub use identity::{DeviceId, Identity, InstanceId, Session, UserId};
pub use lock::{LockError, LockRecord, LockStatus, RemoteStatus};
pub use playback::{PlaybackCall, PlaybackController, RecordingPlayback, TracingPlayback};

/// Top-level errors that can bubble up from any Streamlock subsystem.
#[derive(Debug, thiserror::Error)]
pub enum StreamLockError {
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamLockError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            StreamLockError::Lock(e) => match e {
                LockError::NoSession => "Sign in before starting playback".to_string(),
                LockError::NotPlayable { status } => {
                    format!("Cannot play right now, lock status is {status}")
                }
                LockError::ClientShutdown => "Lock client has stopped".to_string(),
                _ => "Playback lock error occurred".to_string(),
            },
            StreamLockError::Coordinator(_) => "Could not reach the lock service".to_string(),
            StreamLockError::Configuration { .. } => "Configuration error occurred".to_string(),
            StreamLockError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input or misconfiguration.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            StreamLockError::Configuration { .. }
                | StreamLockError::Lock(LockError::NoSession)
                | StreamLockError::Lock(LockError::NotPlayable { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, StreamLockError>;
