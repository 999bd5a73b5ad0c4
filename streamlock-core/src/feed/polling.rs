//! Change feed built by polling the coordinator's record read.
//!
//! For coordinators reachable only over request/response. Rapid successive
//! commits between two polls collapse into the latest record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::{ChangeFeed, FeedMessage, Subscription};
use crate::coordinator::{CoordinatorError, LockCoordinator};
use crate::identity::Session;
use crate::lock::LockRecord;

/// Polling change feed over any [`LockCoordinator`].
pub struct PollingFeed {
    coordinator: Arc<dyn LockCoordinator>,
    poll_interval: Duration,
}

impl PollingFeed {
    pub fn new(coordinator: Arc<dyn LockCoordinator>, poll_interval: Duration) -> Self {
        Self {
            coordinator,
            poll_interval,
        }
    }
}

#[async_trait]
impl ChangeFeed for PollingFeed {
    async fn subscribe(&self, session: &Session) -> Result<Subscription, CoordinatorError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let coordinator = Arc::clone(&self.coordinator);
        let session = session.clone();
        let poll_interval = self.poll_interval;

        let task = tokio::spawn(async move {
            run_poll_loop(coordinator, session, poll_interval, sender).await;
        });

        Ok(Subscription::with_task(receiver, task))
    }
}

async fn run_poll_loop(
    coordinator: Arc<dyn LockCoordinator>,
    session: Session,
    poll_interval: Duration,
    sender: mpsc::UnboundedSender<FeedMessage>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Outer None until the first successful read.
    let mut last_seen: Option<Option<LockRecord>> = None;

    loop {
        ticker.tick().await;
        if sender.is_closed() {
            break;
        }

        match coordinator.fetch_record(&session).await {
            Ok(record) => {
                let delivered = match &last_seen {
                    None => sender.send(FeedMessage::Subscribed).is_ok(),
                    Some(previous) if *previous != record => match &record {
                        Some(changed) => send_update(&sender, changed),
                        None => true,
                    },
                    Some(_) => true,
                };
                if !delivered {
                    break;
                }
                last_seen = Some(record);
            }
            Err(e) if last_seen.is_none() => {
                let _ = sender.send(FeedMessage::ChannelError(e.to_string()));
                break;
            }
            Err(e) => {
                tracing::warn!("Lock record poll for {} failed: {}", session.user_id, e);
            }
        }
    }

    tracing::debug!("Polling feed for {} stopped", session.user_id);
}

fn send_update(sender: &mpsc::UnboundedSender<FeedMessage>, record: &LockRecord) -> bool {
    match serde_json::to_value(record) {
        Ok(payload) => sender.send(FeedMessage::Update(payload)).is_ok(),
        Err(e) => {
            tracing::warn!("Could not encode polled lock record: {e}");
            true
        }
    }
}
