//! Lock record model and the reconciliation reducer.
//!
//! Everything in here is synchronous and free of I/O; the client actor in
//! [`crate::client`] feeds it events and executes the effects it returns.

pub mod record;
pub mod reducer;
pub mod status;

pub use record::LockRecord;
pub use reducer::{Effect, LockEvent, LockState, ReducerContext, Transition, reduce};
pub use status::{LockStatus, RemoteStatus};

/// Errors surfaced by the lock client.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("No active session")]
    NoSession,

    #[error("Cannot start playback while lock status is {status}")]
    NotPlayable { status: LockStatus },

    #[error("Lock client has shut down")]
    ClientShutdown,

    #[error("Malformed lock record: {reason}")]
    MalformedRecord { reason: String },

    #[error("Subscription failed: {reason}")]
    Subscription { reason: String },
}
