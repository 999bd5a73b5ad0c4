//! Coordinator RPC boundary.
//!
//! The coordinator owns the lock record and serializes every mutation of
//! it. Clients only ever touch the record through these calls.

pub mod http;
pub mod memory;

use async_trait::async_trait;

pub use http::HttpCoordinator;
pub use memory::InMemoryCoordinator;

use crate::identity::{DeviceId, Session};
use crate::lock::LockRecord;

/// Errors from the coordinator boundary.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Coordinator rejected the call: {reason}")]
    Rejected { reason: String },

    #[error("Coordinator unreachable: {reason}")]
    Transport { reason: String },

    #[error("Coordinator returned an invalid record: {reason}")]
    InvalidRecord { reason: String },

    #[error("HTTP error")]
    Http(#[from] reqwest::Error),

    #[error("JSON error")]
    Decode(#[from] serde_json::Error),

    #[error("URL parsing error")]
    Url(#[from] url::ParseError),
}

/// Calls the lock client makes against the coordinator.
///
/// Implementations must apply `request_lock` atomically: concurrent
/// requests for one account serialize, and each either takes a free lock or
/// turns a held one into a pending handover.
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Asks for the playback slot on behalf of `device_id`.
    async fn request_lock(
        &self,
        session: &Session,
        device_id: &DeviceId,
    ) -> Result<(), CoordinatorError>;

    /// Gives up the slot, or completes a pending handover.
    async fn release_lock(
        &self,
        session: &Session,
        device_id: &DeviceId,
    ) -> Result<(), CoordinatorError>;

    /// Touches `last_heartbeat_at` if `device_id` holds the lock.
    async fn heartbeat(&self, session: &Session, device_id: &DeviceId)
    -> Result<(), CoordinatorError>;

    /// Reads the current record, `None` if the account never locked.
    async fn fetch_record(&self, session: &Session) -> Result<Option<LockRecord>, CoordinatorError>;
}
