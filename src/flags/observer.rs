//! In-process publish/subscribe for flag changes
//!
//! Subscribers are kept in one ordered table and receive changes in
//! subscription order. A callback that fails or panics is logged and skipped;
//! it never blocks delivery to the others and never undoes the change.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::types::FlagChange;

/// Which changes a subscription receives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Changes to one flag
    Flag(String),
    /// Every change
    All,
}

impl Topic {
    pub fn flag(name: impl Into<String>) -> Self {
        Topic::Flag(name.into())
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Topic::Flag(flag) => flag == name,
            Topic::All => true,
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Synchronous change callback
pub type FlagCallback = Arc<dyn Fn(&FlagChange) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
enum Sink {
    Callback(FlagCallback),
    Channel(mpsc::UnboundedSender<FlagChange>),
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    sink: Sink,
}

/// Flag change bus
pub struct ObserverBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a callback. Callbacks run on the publishing task while the
    /// flag store's write path is held, so they must not block.
    pub async fn subscribe<F>(&self, topic: Topic, callback: F) -> SubscriptionId
    where
        F: Fn(&FlagChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        debug!("Subscription {:?} registered for {:?}", id, topic);
        self.subscriptions.write().await.push(Subscription {
            id,
            topic,
            sink: Sink::Callback(Arc::new(callback)),
        });
        id
    }

    /// Register a channel subscriber; dropping the receiver unsubscribes
    pub async fn subscribe_channel(
        &self,
        topic: Topic,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<FlagChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.allocate_id();
        debug!("Channel subscription {:?} registered for {:?}", id, topic);
        self.subscriptions.write().await.push(Subscription {
            id,
            topic,
            sink: Sink::Channel(tx),
        });
        (id, rx)
    }

    /// Remove a subscription; returns false if it was already gone
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Number of live subscriptions
    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Deliver a change to every matching subscriber, in subscription order
    pub async fn publish(&self, change: &FlagChange) {
        // Snapshot so callbacks never run under the table lock
        let targets: Vec<Subscription> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .iter()
                .filter(|s| s.topic.matches(&change.name))
                .cloned()
                .collect()
        };

        if targets.is_empty() {
            return;
        }

        let mut closed = Vec::new();
        for subscription in targets {
            match &subscription.sink {
                Sink::Callback(callback) => {
                    match catch_unwind(AssertUnwindSafe(|| callback(change))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(
                            "Subscriber {:?} failed handling change to {}: {}",
                            subscription.id, change.name, e
                        ),
                        Err(_) => warn!(
                            "Subscriber {:?} panicked handling change to {}",
                            subscription.id, change.name
                        ),
                    }
                }
                Sink::Channel(sender) => {
                    if sender.send(change.clone()).is_err() {
                        debug!("Subscriber {:?} channel closed", subscription.id);
                        closed.push(subscription.id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut subscriptions = self.subscriptions.write().await;
            subscriptions.retain(|s| !closed.contains(&s.id));
        }
    }
}

impl Default for ObserverBus {
    fn default() -> Self {
        Self::new()
    }
}
