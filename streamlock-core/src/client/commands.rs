//! Command definitions for the lock client actor.

use tokio::sync::oneshot;

use crate::identity::Session;
use crate::lock::{LockError, LockEvent};

/// Commands that can be sent to the lock client actor.
///
/// Each command carries a response channel; the actor processes them one at
/// a time, so the lock state never needs a mutex.
pub enum LockCommand {
    /// Subscribe to the session's lock record. Idempotent per account.
    StartSession {
        session: Session,
        responder: oneshot::Sender<Result<(), LockError>>,
    },
    /// Drop the subscription, stop the heartbeat and reset local state.
    EndSession { responder: oneshot::Sender<()> },
    /// Ask for the playback slot.
    RequestLock {
        responder: oneshot::Sender<Result<(), LockError>>,
    },
    /// Give up the playback slot.
    ReleaseLock {
        responder: oneshot::Sender<Result<(), LockError>>,
    },
    /// Stop playback and give up the slot if this instance holds it.
    StopAndRelease {
        responder: oneshot::Sender<Result<(), LockError>>,
    },
    /// Play a stream, acquiring the slot first when needed.
    Play {
        url: String,
        responder: oneshot::Sender<Result<(), LockError>>,
    },
    /// End the session and stop the actor.
    Shutdown { responder: oneshot::Sender<()> },
}

/// Completion of work the actor spawned for a session.
///
/// Tagged with the session epoch it was started under so late results from
/// a previous session are dropped.
#[derive(Debug)]
pub struct SessionEvent {
    pub epoch: u64,
    pub event: LockEvent,
}
