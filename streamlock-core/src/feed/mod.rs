//! Change feed carrying committed lock record mutations to clients.

pub mod polling;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use polling::PollingFeed;

use crate::coordinator::CoordinatorError;
use crate::identity::Session;

/// Messages delivered on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Subscription is live; later commits will be delivered
    Subscribed,
    /// Full post-update record, undecoded
    Update(serde_json::Value),
    /// Channel failed
    ChannelError(String),
    /// Channel did not come up in time
    TimedOut,
}

/// Live subscription to one account's lock record.
///
/// Dropping it unsubscribes.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<FeedMessage>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wraps a receiver fed by someone else.
    pub fn new(receiver: mpsc::UnboundedReceiver<FeedMessage>) -> Self {
        Self {
            receiver,
            task: None,
        }
    }

    /// Wraps a receiver fed by a task owned by this subscription.
    pub fn with_task(receiver: mpsc::UnboundedReceiver<FeedMessage>, task: JoinHandle<()>) -> Self {
        Self {
            receiver,
            task: Some(task),
        }
    }

    /// Next message, `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<FeedMessage> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Source of lock record changes for an account.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens a subscription for the session's account.
    ///
    /// The first message is `Subscribed` on success, or a failure signal.
    async fn subscribe(&self, session: &Session) -> Result<Subscription, CoordinatorError>;
}
