//! Actor implementation for the lock client.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::commands::{LockCommand, SessionEvent};
use super::handle::{LockClient, LockHandle, LockView};
use super::heartbeat::Heartbeat;
use crate::config::LockConfig;
use crate::coordinator::LockCoordinator;
use crate::feed::{ChangeFeed, FeedMessage, Subscription};
use crate::identity::{Identity, Session};
use crate::lock::{Effect, LockError, LockEvent, LockRecord, LockState, LockStatus};
use crate::lock::{ReducerContext, Transition, reduce};
use crate::playback::PlaybackController;

/// Spawns the lock client actor and returns its owning [`LockClient`].
///
/// The actor owns the local lock state, the feed subscription and the
/// heartbeat. Commands, feed messages and completions of the RPCs it spawned
/// are processed one at a time, so no locking is needed around the state.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use std::sync::Arc;
///
/// use streamlock_core::config::LockConfig;
/// use streamlock_core::{
///     DeviceId, Identity, InMemoryCoordinator, LockStatus, RecordingPlayback, Session, UserId,
///     spawn_lock_client,
/// };
///
/// let coordinator = InMemoryCoordinator::new();
/// let client = spawn_lock_client(
///     LockConfig::default(),
///     Identity::for_device(DeviceId::generate()),
///     coordinator.clone(),
///     coordinator,
///     Arc::new(RecordingPlayback::new()),
/// );
/// client.start(Session::new(UserId::new("user-1"), "token")).await.unwrap();
///
/// let handle = client.handle();
/// handle.wait_for_status(LockStatus::Available).await.unwrap();
/// handle.play("http://provider/live/42.ts").await.unwrap();
/// # }
/// ```
pub fn spawn_lock_client(
    config: LockConfig,
    identity: Identity,
    coordinator: Arc<dyn LockCoordinator>,
    feed: Arc<dyn ChangeFeed>,
    playback: Arc<dyn PlaybackController>,
) -> LockClient {
    let (sender, receiver) = mpsc::channel(config.command_buffer);
    let (internal_sender, internal_receiver) = mpsc::unbounded_channel();
    let (view_sender, view_receiver) = watch::channel(LockView::default());

    let actor = LockActor {
        context: ReducerContext::new(identity, config.stale_lock_policy),
        coordinator,
        feed,
        playback,
        state: LockState::default(),
        session: None,
        epoch: 0,
        subscription: None,
        heartbeat: Heartbeat::new(config.heartbeat_interval),
        view: view_sender,
        internal_sender,
    };

    tokio::spawn(async move {
        actor.run(receiver, internal_receiver).await;
    });

    LockClient::new(LockHandle::new(sender, view_receiver))
}

#[derive(Debug, Clone, Copy)]
enum RpcCall {
    RequestLock,
    ReleaseLock,
}

struct LockActor {
    context: ReducerContext,
    coordinator: Arc<dyn LockCoordinator>,
    feed: Arc<dyn ChangeFeed>,
    playback: Arc<dyn PlaybackController>,
    state: LockState,
    session: Option<Session>,
    epoch: u64,
    subscription: Option<Subscription>,
    heartbeat: Heartbeat,
    view: watch::Sender<LockView>,
    internal_sender: mpsc::UnboundedSender<SessionEvent>,
}

impl LockActor {
    /// Main message loop. Runs until shutdown or until every handle is gone.
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<LockCommand>,
        mut internal: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        tracing::debug!(
            "Lock client actor started for device {} instance {}",
            self.context.identity.device_id,
            self.context.identity.instance_id
        );

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(SessionEvent { epoch, event }) = internal.recv() => {
                    self.handle_session_event(epoch, event);
                }
                message = next_feed_message(&mut self.subscription), if self.subscription.is_some() => {
                    self.handle_feed_message(message);
                }
                _ = self.heartbeat.tick() => {
                    self.send_heartbeat();
                }
            }
        }

        self.end_session();
        tracing::debug!("Lock client actor stopped");
    }

    /// Handles a single command. Returns false to shut down.
    async fn handle_command(&mut self, command: LockCommand) -> bool {
        match command {
            LockCommand::StartSession { session, responder } => {
                let result = self.start_session(session).await;
                let _ = responder.send(result);
            }
            LockCommand::EndSession { responder } => {
                self.end_session();
                let _ = responder.send(());
            }
            LockCommand::RequestLock { responder } => {
                let result = self.dispatch_user_event(LockEvent::RequestLock);
                let _ = responder.send(result);
            }
            LockCommand::ReleaseLock { responder } => {
                let result = self.dispatch_user_event(LockEvent::ReleaseLock);
                let _ = responder.send(result);
            }
            LockCommand::StopAndRelease { responder } => {
                let result = self.dispatch_user_event(LockEvent::StopAndRelease);
                let _ = responder.send(result);
            }
            LockCommand::Play { url, responder } => {
                let status = self.state.status;
                let result = if self.session.is_some() && !status.allows_play() {
                    Err(LockError::NotPlayable { status })
                } else {
                    self.dispatch_user_event(LockEvent::Play { url })
                };
                let _ = responder.send(result);
            }
            LockCommand::Shutdown { responder } => {
                tracing::debug!("Lock client actor shutting down");
                self.end_session();
                let _ = responder.send(());
                return false;
            }
        }
        true
    }

    fn dispatch_user_event(&mut self, event: LockEvent) -> Result<(), LockError> {
        if self.session.is_none() {
            return Err(LockError::NoSession);
        }
        self.apply(event);
        Ok(())
    }

    async fn start_session(&mut self, session: Session) -> Result<(), LockError> {
        if let Some(active) = self.session.as_mut() {
            if active.user_id == session.user_id && self.subscription.is_some() {
                tracing::debug!("Lock subscription for {} already active", session.user_id);
                // Keep the refreshed token for later RPCs.
                *active = session;
                return Ok(());
            }
        }
        self.end_session();

        self.epoch += 1;
        self.state = LockState::default();
        self.publish();
        self.session = Some(session.clone());

        tracing::info!("Subscribing to lock record for {}", session.user_id);
        match self.feed.subscribe(&session).await {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Lock subscription for {} failed: {}", session.user_id, e);
                self.apply(LockEvent::SubscriptionFailed);
                Err(LockError::Subscription {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Tears the session down synchronously. In-flight RPCs keep running but
    /// their completions carry a stale epoch and are ignored.
    fn end_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        self.epoch += 1;
        self.subscription = None;
        self.heartbeat.disarm();
        if self.state.current_stream_url.is_some() {
            self.playback.stop();
        }
        self.state = LockState::default();
        self.publish();

        tracing::info!("Unsubscribed from lock record for {}", session.user_id);
    }

    fn handle_session_event(&mut self, epoch: u64, event: LockEvent) {
        if epoch != self.epoch || self.session.is_none() {
            tracing::debug!("Discarding {:?} from ended session", event);
            return;
        }
        self.apply(event);
    }

    fn handle_feed_message(&mut self, message: Option<FeedMessage>) {
        match message {
            Some(FeedMessage::Subscribed) => {
                tracing::info!("Lock subscription established");
                self.spawn_initial_read();
            }
            Some(FeedMessage::Update(payload)) => self.handle_remote_payload(&payload),
            Some(FeedMessage::ChannelError(reason)) => {
                tracing::error!("Lock subscription error: {}", reason);
                self.subscription = None;
                self.apply(LockEvent::SubscriptionFailed);
            }
            Some(FeedMessage::TimedOut) => {
                tracing::error!("Lock subscription timed out");
                self.subscription = None;
                self.apply(LockEvent::SubscriptionFailed);
            }
            None => {
                tracing::warn!("Lock change feed closed");
                self.subscription = None;
                self.apply(LockEvent::SubscriptionFailed);
            }
        }
    }

    fn handle_remote_payload(&mut self, payload: &serde_json::Value) {
        let record = match LockRecord::from_payload(payload) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Ignoring lock update: {}", e);
                return;
            }
        };

        let expected_user = self.session.as_ref().map(|session| &session.user_id);
        if expected_user != Some(&record.user_id) {
            tracing::warn!("Ignoring lock update for foreign account {}", record.user_id);
            return;
        }

        tracing::debug!(
            "[{}] Lock update: {:?} locked_by={:?} requested_by={:?}",
            self.context.identity.instance_id,
            record.status,
            record.locked_by_device_id,
            record.requested_by_device_id
        );
        self.apply(LockEvent::RemoteUpdate(record));
    }

    /// Runs the reducer for `event` and every follow-up event it requests,
    /// executing effects in order.
    fn apply(&mut self, event: LockEvent) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let previous = self.state.status;
            let Transition { state, effects } =
                reduce(std::mem::take(&mut self.state), &event, &self.context);
            self.state = state;

            if self.state.status != previous {
                tracing::info!(
                    "[{}] Lock status {} -> {}",
                    self.context.identity.instance_id,
                    previous,
                    self.state.status
                );
            }

            if self.state.status == LockStatus::Acquired {
                self.heartbeat.arm();
            } else {
                self.heartbeat.disarm();
            }
            self.publish();

            for effect in effects {
                match effect {
                    Effect::StopPlayback => self.playback.stop(),
                    Effect::StartPlayback { url } => self.playback.play(&url),
                    Effect::CallRequestLock => self.spawn_rpc(RpcCall::RequestLock),
                    Effect::CallReleaseLock => self.spawn_rpc(RpcCall::ReleaseLock),
                    Effect::ReleaseLock => queue.push_back(LockEvent::ReleaseLock),
                }
            }
        }
    }

    fn publish(&self) {
        let view = LockView::from(&self.state);
        self.view.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn spawn_rpc(&self, call: RpcCall) {
        let Some(session) = self.session.clone() else {
            return;
        };
        let coordinator = Arc::clone(&self.coordinator);
        let device_id = self.context.identity.device_id.clone();
        let sender = self.internal_sender.clone();
        let epoch = self.epoch;

        tracing::debug!("Sending {:?} for device {}", call, device_id);
        tokio::spawn(async move {
            let (result, failure) = match call {
                RpcCall::RequestLock => (
                    coordinator.request_lock(&session, &device_id).await,
                    LockEvent::RequestFailed,
                ),
                RpcCall::ReleaseLock => (
                    coordinator.release_lock(&session, &device_id).await,
                    LockEvent::ReleaseFailed,
                ),
            };

            if let Err(e) = result {
                tracing::error!("{:?} failed: {}", call, e);
                let _ = sender.send(SessionEvent {
                    epoch,
                    event: failure,
                });
            }
        });
    }

    fn spawn_initial_read(&self) {
        let Some(session) = self.session.clone() else {
            return;
        };
        let coordinator = Arc::clone(&self.coordinator);
        let sender = self.internal_sender.clone();
        let epoch = self.epoch;

        tokio::spawn(async move {
            let event = match coordinator.fetch_record(&session).await {
                Ok(record) => LockEvent::Snapshot(record),
                Err(e) => {
                    tracing::error!("Initial lock read for {} failed: {}", session.user_id, e);
                    LockEvent::SubscriptionFailed
                }
            };
            let _ = sender.send(SessionEvent { epoch, event });
        });
    }

    fn send_heartbeat(&self) {
        if self.state.status != LockStatus::Acquired {
            return;
        }
        let Some(session) = self.session.clone() else {
            return;
        };
        let coordinator = Arc::clone(&self.coordinator);
        let device_id = self.context.identity.device_id.clone();

        tokio::spawn(async move {
            match coordinator.heartbeat(&session, &device_id).await {
                Ok(()) => tracing::debug!("Sent heartbeat for device {}", device_id),
                Err(e) => tracing::warn!("Heartbeat for device {} failed: {}", device_id, e),
            }
        });
    }
}

async fn next_feed_message(subscription: &mut Option<Subscription>) -> Option<FeedMessage> {
    match subscription.as_mut() {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::coordinator::InMemoryCoordinator;
    use crate::identity::{DeviceId, InstanceId, UserId};
    use crate::playback::RecordingPlayback;
    use crate::test_mocks::{CountingCoordinator, RejectingCoordinator, ScriptedFeed};

    const WAIT: Duration = Duration::from_secs(2);

    fn identity() -> Identity {
        Identity::new(DeviceId::new("device-me"), InstanceId::new("instance-me"))
    }

    fn session() -> Session {
        Session::new(UserId::new("user-1"), "token")
    }

    fn spawn_with(
        coordinator: Arc<dyn LockCoordinator>,
        feed: Arc<dyn ChangeFeed>,
        playback: Arc<RecordingPlayback>,
    ) -> LockClient {
        spawn_lock_client(LockConfig::default(), identity(), coordinator, feed, playback)
    }

    async fn wait_for(handle: &LockHandle, status: LockStatus) {
        tokio::time::timeout(WAIT, handle.wait_for_status(status))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {status}, at {}", handle.status()))
            .unwrap();
    }

    #[tokio::test]
    async fn test_commands_require_session() {
        let coordinator = InMemoryCoordinator::new();
        let client = spawn_with(
            coordinator.clone(),
            coordinator,
            Arc::new(RecordingPlayback::new()),
        );

        let result = client.handle().request_lock().await;
        assert!(matches!(result, Err(LockError::NoSession)));
        let result = client.handle().play("http://provider/live/1.ts").await;
        assert!(matches!(result, Err(LockError::NoSession)));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let feed = ScriptedFeed::new();
        let client = spawn_with(
            InMemoryCoordinator::new(),
            feed.clone(),
            Arc::new(RecordingPlayback::new()),
        );

        client.start(session()).await.unwrap();
        client.start(session()).await.unwrap();

        assert_eq!(feed.subscribe_count(), 1);
        assert_eq!(feed.live_subscribers(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_error() {
        let client = spawn_with(
            InMemoryCoordinator::new(),
            ScriptedFeed::rejecting(),
            Arc::new(RecordingPlayback::new()),
        );

        let result = client.start(session()).await;

        assert!(matches!(result, Err(LockError::Subscription { .. })));
        assert_eq!(client.handle().status(), LockStatus::Error);
    }

    #[tokio::test]
    async fn test_channel_error_drops_subscription() {
        let feed = ScriptedFeed::new();
        let client = spawn_with(
            InMemoryCoordinator::new(),
            feed.clone(),
            Arc::new(RecordingPlayback::new()),
        );
        let handle = client.handle();

        client.start(session()).await.unwrap();
        feed.push(FeedMessage::ChannelError("socket closed".to_string()));
        wait_for(&handle, LockStatus::Error).await;

        assert_eq!(feed.live_subscribers(), 0);
    }

    #[tokio::test]
    async fn test_failed_initial_read_is_error() {
        let feed = ScriptedFeed::new();
        let client = spawn_with(
            Arc::new(RejectingCoordinator),
            feed.clone(),
            Arc::new(RecordingPlayback::new()),
        );
        let handle = client.handle();

        client.start(session()).await.unwrap();
        feed.push(FeedMessage::Subscribed);
        wait_for(&handle, LockStatus::Error).await;
    }

    #[tokio::test]
    async fn test_malformed_and_foreign_updates_are_ignored() {
        let feed = ScriptedFeed::new();
        let client = spawn_with(
            InMemoryCoordinator::new(),
            feed.clone(),
            Arc::new(RecordingPlayback::new()),
        );
        let handle = client.handle();

        client.start(session()).await.unwrap();
        feed.push(FeedMessage::Subscribed);
        wait_for(&handle, LockStatus::Available).await;

        feed.push(FeedMessage::Update(json!({ "status": "LOCKED" })));
        feed.push(FeedMessage::Update(json!("not a record")));
        feed.push_record(&LockRecord::locked(
            UserId::new("user-2"),
            DeviceId::new("device-other"),
        ));
        feed.push_record(&LockRecord::locked(
            UserId::new("user-1"),
            DeviceId::new("device-other"),
        ));

        wait_for(&handle, LockStatus::LockedByOther).await;
    }

    #[tokio::test]
    async fn test_duplicate_yield_request_releases_once() {
        let memory = InMemoryCoordinator::new();
        let coordinator = CountingCoordinator::new(memory);
        let feed = ScriptedFeed::new();
        let playback = Arc::new(RecordingPlayback::new());
        let client = spawn_with(coordinator.clone(), feed.clone(), playback.clone());
        let handle = client.handle();

        client.start(session()).await.unwrap();
        feed.push(FeedMessage::Subscribed);
        wait_for(&handle, LockStatus::Available).await;

        handle.play("http://provider/live/5.ts").await.unwrap();
        feed.push_record(&LockRecord::locked(session().user_id, DeviceId::new("device-me")));
        wait_for(&handle, LockStatus::Acquired).await;
        assert_eq!(playback.now_playing().as_deref(), Some("http://provider/live/5.ts"));

        let handover = LockRecord::awaiting_release(
            session().user_id,
            DeviceId::new("device-me"),
            DeviceId::new("device-other"),
        );
        feed.push_record(&handover);
        feed.push_record(&handover);
        wait_for(&handle, LockStatus::Releasing).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(coordinator.release_count(), 1);
        assert_eq!(playback.stop_count(), 1);
        assert_eq!(handle.status(), LockStatus::Releasing);
        assert_eq!(handle.view().current_stream_url, None);
    }

    #[tokio::test]
    async fn test_request_after_failed_release_recovers_lock() {
        let memory = InMemoryCoordinator::new();
        let coordinator = CountingCoordinator::with_failing_releases(memory.clone(), 1);
        let client = spawn_with(
            coordinator.clone(),
            memory.clone(),
            Arc::new(RecordingPlayback::new()),
        );
        let handle = client.handle();

        client.start(session()).await.unwrap();
        wait_for(&handle, LockStatus::Available).await;
        handle.request_lock().await.unwrap();
        wait_for(&handle, LockStatus::Acquired).await;

        handle.release_lock().await.unwrap();
        wait_for(&handle, LockStatus::Error).await;
        let stuck = memory.record(&session().user_id).unwrap();
        assert_eq!(stuck.locked_by_device_id, Some(DeviceId::new("device-me")));

        handle.request_lock().await.unwrap();
        wait_for(&handle, LockStatus::Acquired).await;

        let record = memory.record(&session().user_id).unwrap();
        assert_eq!(record.status, crate::lock::RemoteStatus::Locked);
        assert_eq!(record.locked_by_device_id, Some(DeviceId::new("device-me")));
        assert_eq!(record.requested_by_device_id, None);
        assert_eq!(coordinator.release_count(), 2);
    }

    #[tokio::test]
    async fn test_late_rpc_failure_does_not_resurrect_state() {
        let feed = ScriptedFeed::new();
        let client = spawn_with(
            Arc::new(RejectingCoordinator),
            feed.clone(),
            Arc::new(RecordingPlayback::new()),
        );
        let handle = client.handle();

        client.start(session()).await.unwrap();
        handle.request_lock().await.unwrap();
        client.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.status(), LockStatus::Initial);
        assert_eq!(feed.live_subscribers(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_handles() {
        let coordinator = InMemoryCoordinator::new();
        let client = spawn_with(
            coordinator.clone(),
            coordinator,
            Arc::new(RecordingPlayback::new()),
        );
        let handle = client.handle();

        client.shutdown().await.unwrap();

        let result = handle.request_lock().await;
        assert!(matches!(result, Err(LockError::ClientShutdown)));
    }
}
