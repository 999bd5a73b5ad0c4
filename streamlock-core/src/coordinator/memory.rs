//! In-process coordinator and change feed.
//!
//! Holds every account's record behind one mutex, so request/release are
//! trivially atomic, and pushes each committed record to the account's
//! subscribers while still holding the lock to preserve commit order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{CoordinatorError, LockCoordinator};
use crate::feed::{ChangeFeed, FeedMessage, Subscription};
use crate::identity::{DeviceId, Session, UserId};
use crate::lock::{LockRecord, RemoteStatus};

#[derive(Default)]
struct CoordinatorState {
    records: HashMap<UserId, LockRecord>,
    subscribers: HashMap<UserId, Vec<mpsc::UnboundedSender<FeedMessage>>>,
    heartbeats: HashMap<UserId, u64>,
}

impl CoordinatorState {
    fn commit(&mut self, record: LockRecord) -> Result<(), CoordinatorError> {
        let payload = serde_json::to_value(&record)?;
        let user_id = record.user_id.clone();
        tracing::debug!(
            "Committed lock record for {}: {:?} locked_by={:?} requested_by={:?}",
            user_id,
            record.status,
            record.locked_by_device_id,
            record.requested_by_device_id
        );
        self.records.insert(user_id.clone(), record);

        if let Some(senders) = self.subscribers.get_mut(&user_id) {
            senders.retain(|sender| sender.send(FeedMessage::Update(payload.clone())).is_ok());
        }
        Ok(())
    }
}

/// Reference coordinator for tests, simulations and single-host setups.
#[derive(Default)]
pub struct InMemoryCoordinator {
    state: Mutex<CoordinatorState>,
}

impl InMemoryCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current record for an account.
    pub fn record(&self, user_id: &UserId) -> Option<LockRecord> {
        self.state.lock().records.get(user_id).cloned()
    }

    /// Stores a record without notifying subscribers, as if it had been
    /// written before anyone subscribed.
    pub fn seed(&self, record: LockRecord) {
        self.state
            .lock()
            .records
            .insert(record.user_id.clone(), record);
    }

    /// Number of accepted heartbeats for an account.
    pub fn heartbeat_count(&self, user_id: &UserId) -> u64 {
        self.state
            .lock()
            .heartbeats
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of live feed subscriptions for an account.
    pub fn subscriber_count(&self, user_id: &UserId) -> usize {
        let mut state = self.state.lock();
        match state.subscribers.get_mut(user_id) {
            Some(senders) => {
                senders.retain(|sender| !sender.is_closed());
                senders.len()
            }
            None => 0,
        }
    }
}

#[async_trait]
impl LockCoordinator for InMemoryCoordinator {
    async fn request_lock(
        &self,
        session: &Session,
        device_id: &DeviceId,
    ) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock();
        let user_id = session.user_id.clone();
        let current = state.records.get(&user_id).cloned();

        let next = match current {
            None => LockRecord::locked(user_id, device_id.clone()),
            Some(record) => match (record.status, record.locked_by_device_id) {
                (RemoteStatus::Available, _) | (_, None) => {
                    LockRecord::locked(user_id, device_id.clone())
                }
                (_, Some(holder)) => LockRecord {
                    last_heartbeat_at: record.last_heartbeat_at,
                    ..LockRecord::awaiting_release(user_id, holder, device_id.clone())
                },
            },
        };

        state.commit(next)
    }

    async fn release_lock(
        &self,
        session: &Session,
        device_id: &DeviceId,
    ) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock();
        let user_id = session.user_id.clone();
        let Some(record) = state.records.get(&user_id).cloned() else {
            return Err(CoordinatorError::Rejected {
                reason: format!("no lock record for {user_id}"),
            });
        };

        let holder = record.is_locked_by(device_id);
        let requester = record.is_requested_by(device_id);

        let next = match (record.status, record.locked_by_device_id, record.requested_by_device_id) {
            (RemoteStatus::Locked, _, _) if holder => LockRecord::available(user_id),
            (RemoteStatus::AwaitingRelease, _, Some(next_holder)) if holder => {
                LockRecord::locked(user_id, next_holder)
            }
            (RemoteStatus::AwaitingRelease, Some(current_holder), _) if requester => LockRecord {
                last_heartbeat_at: record.last_heartbeat_at,
                ..LockRecord::locked(user_id, current_holder)
            },
            _ => {
                return Err(CoordinatorError::Rejected {
                    reason: format!("device {device_id} does not hold the lock"),
                });
            }
        };

        state.commit(next)
    }

    async fn heartbeat(
        &self,
        session: &Session,
        device_id: &DeviceId,
    ) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock();
        let user_id = session.user_id.clone();
        let Some(mut record) = state
            .records
            .get(&user_id)
            .filter(|record| record.is_locked_by(device_id))
            .cloned()
        else {
            return Err(CoordinatorError::Rejected {
                reason: format!("device {device_id} does not hold the lock"),
            });
        };

        record.last_heartbeat_at = Some(Utc::now());
        *state.heartbeats.entry(user_id).or_default() += 1;
        state.commit(record)
    }

    async fn fetch_record(&self, session: &Session) -> Result<Option<LockRecord>, CoordinatorError> {
        Ok(self.record(&session.user_id))
    }
}

#[async_trait]
impl ChangeFeed for InMemoryCoordinator {
    async fn subscribe(&self, session: &Session) -> Result<Subscription, CoordinatorError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        // Receiver is alive, so this cannot fail.
        let _ = sender.send(FeedMessage::Subscribed);
        self.state
            .lock()
            .subscribers
            .entry(session.user_id.clone())
            .or_default()
            .push(sender);
        Ok(Subscription::new(receiver))
    }
}
