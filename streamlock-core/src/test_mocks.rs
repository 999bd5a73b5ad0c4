//! Mock collaborators for testing the lock client.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::coordinator::{CoordinatorError, InMemoryCoordinator, LockCoordinator};
use crate::feed::{ChangeFeed, FeedMessage, Subscription};
use crate::identity::{DeviceId, Session};
use crate::lock::LockRecord;

fn rejection() -> CoordinatorError {
    CoordinatorError::Rejected {
        reason: "Mock coordinator failure".to_string(),
    }
}

/// Coordinator whose every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingCoordinator;

#[async_trait]
impl LockCoordinator for RejectingCoordinator {
    async fn request_lock(&self, _: &Session, _: &DeviceId) -> Result<(), CoordinatorError> {
        Err(rejection())
    }

    async fn release_lock(&self, _: &Session, _: &DeviceId) -> Result<(), CoordinatorError> {
        Err(rejection())
    }

    async fn heartbeat(&self, _: &Session, _: &DeviceId) -> Result<(), CoordinatorError> {
        Err(rejection())
    }

    async fn fetch_record(&self, _: &Session) -> Result<Option<LockRecord>, CoordinatorError> {
        Err(rejection())
    }
}

/// Wraps an [`InMemoryCoordinator`] and counts the calls made through it.
pub struct CountingCoordinator {
    inner: Arc<InMemoryCoordinator>,
    requests: AtomicUsize,
    releases: AtomicUsize,
    heartbeats: AtomicUsize,
    fail_heartbeats: bool,
    releases_to_fail: AtomicUsize,
}

impl CountingCoordinator {
    fn build(
        inner: Arc<InMemoryCoordinator>,
        fail_heartbeats: bool,
        releases_to_fail: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner,
            requests: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            heartbeats: AtomicUsize::new(0),
            fail_heartbeats,
            releases_to_fail: AtomicUsize::new(releases_to_fail),
        })
    }

    pub fn new(inner: Arc<InMemoryCoordinator>) -> Arc<Self> {
        Self::build(inner, false, 0)
    }

    /// Like [`CountingCoordinator::new`] but every heartbeat is rejected.
    pub fn with_failing_heartbeats(inner: Arc<InMemoryCoordinator>) -> Arc<Self> {
        Self::build(inner, true, 0)
    }

    /// The first `count` releases fail without reaching the coordinator,
    /// like a request lost in transit.
    pub fn with_failing_releases(inner: Arc<InMemoryCoordinator>, count: usize) -> Arc<Self> {
        Self::build(inner, false, count)
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn heartbeat_attempts(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockCoordinator for CountingCoordinator {
    async fn request_lock(
        &self,
        session: &Session,
        device_id: &DeviceId,
    ) -> Result<(), CoordinatorError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.inner.request_lock(session, device_id).await
    }

    async fn release_lock(
        &self,
        session: &Session,
        device_id: &DeviceId,
    ) -> Result<(), CoordinatorError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .releases_to_fail
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CoordinatorError::Transport {
                reason: "Mock release lost in transit".to_string(),
            });
        }
        self.inner.release_lock(session, device_id).await
    }

    async fn heartbeat(
        &self,
        session: &Session,
        device_id: &DeviceId,
    ) -> Result<(), CoordinatorError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if self.fail_heartbeats {
            return Err(rejection());
        }
        self.inner.heartbeat(session, device_id).await
    }

    async fn fetch_record(&self, session: &Session) -> Result<Option<LockRecord>, CoordinatorError> {
        self.inner.fetch_record(session).await
    }
}

/// Change feed driven by the test instead of a coordinator.
#[derive(Default)]
pub struct ScriptedFeed {
    senders: Mutex<Vec<mpsc::UnboundedSender<FeedMessage>>>,
    subscriptions: AtomicUsize,
    reject_subscribe: bool,
}

impl ScriptedFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Feed whose `subscribe` call itself fails.
    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            reject_subscribe: true,
            ..Self::default()
        })
    }

    /// Delivers `message` to every live subscriber.
    pub fn push(&self, message: FeedMessage) {
        self.senders
            .lock()
            .retain(|sender| sender.send(message.clone()).is_ok());
    }

    /// Delivers `record` as an update.
    pub fn push_record(&self, record: &LockRecord) {
        match serde_json::to_value(record) {
            Ok(payload) => self.push(FeedMessage::Update(payload)),
            Err(e) => panic!("lock record must serialize: {e}"),
        }
    }

    /// Total number of `subscribe` calls.
    pub fn subscribe_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Subscriptions that have not been dropped.
    pub fn live_subscribers(&self) -> usize {
        let mut senders = self.senders.lock();
        senders.retain(|sender| !sender.is_closed());
        senders.len()
    }
}

#[async_trait]
impl ChangeFeed for ScriptedFeed {
    async fn subscribe(&self, _session: &Session) -> Result<Subscription, CoordinatorError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        if self.reject_subscribe {
            return Err(CoordinatorError::Transport {
                reason: "Mock subscribe failure".to_string(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.senders.lock().push(sender);
        Ok(Subscription::new(receiver))
    }
}
