//! Lifecycle event notifications
//!
//! Subscribers receive a `ModuleEvent` for every registration and state
//! change the manager performs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex as TokioMutex;
use tracing::debug;

use crate::utils::current_timestamp_millis;

/// Kind of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleEventKind {
    Registered,
    Started,
    Stopped,
    Failed,
    Reset,
    Unregistered,
}

/// A lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEvent {
    pub module: String,
    pub kind: ModuleEventKind,
    /// Error text for `Failed`, empty otherwise
    pub detail: Option<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl ModuleEvent {
    pub fn new(module: &str, kind: ModuleEventKind, detail: Option<String>) -> Self {
        Self {
            module: module.to_string(),
            kind,
            detail,
            timestamp: current_timestamp_millis(),
        }
    }
}

/// Lifecycle event fan-out
pub struct ModuleEventHub {
    subscribers: Arc<TokioMutex<Vec<mpsc::UnboundedSender<ModuleEvent>>>>,
}

impl ModuleEventHub {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(TokioMutex::new(Vec::new())),
        }
    }

    /// Subscribe to every lifecycle event
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<ModuleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        rx
    }

    /// Publish an event; closed subscribers are dropped
    pub async fn publish(&self, event: ModuleEvent) {
        debug!("Module event: {} {:?}", event.module, event.kind);
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Default for ModuleEventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_live_subscribers() {
        let hub = ModuleEventHub::new();
        let mut live = hub.subscribe().await;
        let dropped = hub.subscribe().await;
        drop(dropped);

        hub.publish(ModuleEvent::new("alerts", ModuleEventKind::Started, None))
            .await;

        let event = live.recv().await.unwrap();
        assert_eq!(event.module, "alerts");
        assert_eq!(event.kind, ModuleEventKind::Started);
        assert_eq!(hub.subscribers.lock().await.len(), 1);
    }
}
