//! Handles for communicating with the lock client actor.

use tokio::sync::{mpsc, oneshot, watch};

use super::commands::LockCommand;
use crate::identity::Session;
use crate::lock::{LockError, LockState, LockStatus};

/// What consumers may see of the local lock state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockView {
    pub status: LockStatus,
    pub current_stream_url: Option<String>,
}

impl From<&LockState> for LockView {
    fn from(state: &LockState) -> Self {
        Self {
            status: state.status,
            current_stream_url: state.current_stream_url.clone(),
        }
    }
}

/// Consumer-facing handle to the lock client.
///
/// Cheap to clone and safe to share across tasks. Exposes the lock status
/// and the user-level operations; instance bookkeeping stays inside the
/// actor.
#[derive(Clone)]
pub struct LockHandle {
    sender: mpsc::Sender<LockCommand>,
    view: watch::Receiver<LockView>,
}

impl LockHandle {
    pub(crate) fn new(sender: mpsc::Sender<LockCommand>, view: watch::Receiver<LockView>) -> Self {
        Self { sender, view }
    }

    /// Current lock status.
    pub fn status(&self) -> LockStatus {
        self.view.borrow().status
    }

    /// Current status together with the stream being played.
    pub fn view(&self) -> LockView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every published change.
    pub fn watch(&self) -> watch::Receiver<LockView> {
        self.view.clone()
    }

    /// Waits until the status equals `status`.
    ///
    /// # Errors
    /// - `LockError::ClientShutdown` - Actor stopped before reaching it
    pub async fn wait_for_status(&self, status: LockStatus) -> Result<LockView, LockError> {
        let mut view = self.view.clone();
        let reached = view
            .wait_for(|current| current.status == status)
            .await
            .map_err(|_| LockError::ClientShutdown)?;
        Ok(reached.clone())
    }

    /// Asks the coordinator for the playback slot.
    ///
    /// Returns once the request is dispatched; the status moves to
    /// `ACQUIRED` or `PENDING` only when the change feed confirms it. Also
    /// used for takeover from `LOCKED_BY_OTHER`.
    ///
    /// # Errors
    /// - `LockError::NoSession` - No session started
    /// - `LockError::ClientShutdown` - Actor has stopped
    pub async fn request_lock(&self) -> Result<(), LockError> {
        self.call(|responder| LockCommand::RequestLock { responder })
            .await?
    }

    /// Gives up the playback slot.
    ///
    /// # Errors
    /// - `LockError::NoSession` - No session started
    /// - `LockError::ClientShutdown` - Actor has stopped
    pub async fn release_lock(&self) -> Result<(), LockError> {
        self.call(|responder| LockCommand::ReleaseLock { responder })
            .await?
    }

    /// Stops playback and releases the slot. Does nothing unless this
    /// instance holds the lock.
    ///
    /// # Errors
    /// - `LockError::NoSession` - No session started
    /// - `LockError::ClientShutdown` - Actor has stopped
    pub async fn stop_and_release(&self) -> Result<(), LockError> {
        self.call(|responder| LockCommand::StopAndRelease { responder })
            .await?
    }

    /// Plays `url`, acquiring the slot first if this instance does not hold
    /// it. Playback starts once the lock is acquired.
    ///
    /// # Errors
    /// - `LockError::NoSession` - No session started
    /// - `LockError::NotPlayable` - A request or release is in progress
    /// - `LockError::ClientShutdown` - Actor has stopped
    pub async fn play(&self, url: impl Into<String>) -> Result<(), LockError> {
        let url = url.into();
        self.call(|responder| LockCommand::Play { url, responder })
            .await?
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> LockCommand,
    ) -> Result<T, LockError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(command(responder))
            .await
            .map_err(|_| LockError::ClientShutdown)?;

        rx.await.map_err(|_| LockError::ClientShutdown)
    }
}

/// Owning side of the lock client, held by the composition root.
///
/// Controls the session lifecycle; hand [`LockHandle`]s to consumers.
pub struct LockClient {
    handle: LockHandle,
}

impl LockClient {
    pub(crate) fn new(handle: LockHandle) -> Self {
        Self { handle }
    }

    /// Consumer handle for this client.
    pub fn handle(&self) -> LockHandle {
        self.handle.clone()
    }

    /// Subscribes to the session's lock record and seeds local state.
    ///
    /// Calling it again for the same account while subscribed only updates
    /// the stored session. A different account replaces the old session.
    ///
    /// # Errors
    /// - `LockError::Subscription` - Feed refused the subscription; the
    ///   status is `ERROR` and `start` may be called again
    /// - `LockError::ClientShutdown` - Actor has stopped
    pub async fn start(&self, session: Session) -> Result<(), LockError> {
        self.handle
            .call(|responder| LockCommand::StartSession { session, responder })
            .await?
    }

    /// Ends the session: unsubscribes, stops the heartbeat and resets local
    /// state before returning.
    ///
    /// # Errors
    /// - `LockError::ClientShutdown` - Actor has stopped
    pub async fn stop(&self) -> Result<(), LockError> {
        self.handle
            .call(|responder| LockCommand::EndSession { responder })
            .await
    }

    /// Ends the session and stops the actor.
    ///
    /// # Errors
    /// - `LockError::ClientShutdown` - Actor had already stopped
    pub async fn shutdown(self) -> Result<(), LockError> {
        self.handle
            .call(|responder| LockCommand::Shutdown { responder })
            .await
    }
}
