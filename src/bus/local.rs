//! In-process implementation of [`PubSub`].
//!
//! Every published message is broadcast to observers obtained through
//! [`LocalBus::observe`] and, when a handler is subscribed to the same topic,
//! looped back into it. Inbound traffic is simulated with
//! [`LocalBus::deliver`], which runs the handler on the caller's thread.

use super::{BusError, Message, MessageHandler, PubSub};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Number of published messages buffered for slow observers.
const DEFAULT_CAPACITY: usize = 256;

/// Shared loopback bus. Clones share the same handlers and observers.
#[derive(Clone)]
pub struct LocalBus {
    handlers: Arc<RwLock<HashMap<String, MessageHandler>>>,
    rejected: Arc<RwLock<HashSet<String>>>,
    published: broadcast::Sender<Message>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (published, _) = broadcast::channel(capacity);
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            rejected: Arc::new(RwLock::new(HashSet::new())),
            published,
        }
    }

    /// Receiver yielding every message published from now on.
    pub fn observe(&self) -> broadcast::Receiver<Message> {
        self.published.subscribe()
    }

    /// Hand `payload` to the handler subscribed on `topic`.
    ///
    /// Returns `false` when nobody listens on that topic.
    pub fn deliver(&self, topic: &str, payload: Vec<u8>) -> bool {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(topic)
            .cloned();

        match handler {
            Some(handler) => {
                handler(Message::new(topic, payload));
                true
            }
            None => {
                debug!("no handler for topic {}, message dropped", topic);
                false
            }
        }
    }

    /// Make every later subscription to `topic` fail.
    pub fn reject(&self, topic: &str) {
        self.rejected
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(topic.to_string());
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(topic)
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        topics.sort();
        topics
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl PubSub for LocalBus {
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BusError> {
        let rejected = self
            .rejected
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(topic);
        if rejected {
            return Err(BusError::Rejected(topic.to_string()));
        }

        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(topic.to_string(), handler);
        debug!("subscribed to {}", topic);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError> {
        let removed = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(topic);
        if removed.is_none() {
            warn!("unsubscribe from {} without active subscription", topic);
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) {
        // No observer is a normal condition.
        let _ = self.published.send(Message::new(topic, payload.clone()));
        self.deliver(topic, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn deliver_reaches_subscribed_handler() {
        let bus = LocalBus::default();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        bus.subscribe(
            "car/steering",
            Arc::new(move |msg: Message| sink.lock().unwrap().push(msg)),
        )
        .await
        .unwrap();

        assert!(bus.deliver("car/steering", vec![1, 2, 3]));
        assert!(!bus.deliver("car/other", vec![4]));

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], Message::new("car/steering", vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn publish_is_observed() {
        let bus = LocalBus::default();
        let mut observer = bus.observe();

        bus.publish("car/throttle", vec![9]);

        let msg = observer.recv().await.unwrap();
        assert_eq!(msg, Message::new("car/throttle", vec![9]));
    }

    #[tokio::test]
    async fn publish_without_observer_does_not_fail() {
        let bus = LocalBus::default();
        bus.publish("car/throttle", vec![1]);
    }

    #[tokio::test]
    async fn rejected_topic_fails_subscription() {
        let bus = LocalBus::default();
        bus.reject("car/forbidden");

        let result = bus.subscribe("car/forbidden", Arc::new(|_: Message| {})).await;
        assert!(matches!(result, Err(BusError::Rejected(_))));
        assert!(!bus.is_subscribed("car/forbidden"));
    }

    #[tokio::test]
    async fn unsubscribe_removes_handler() {
        let bus = LocalBus::default();
        bus.subscribe("car/mode", Arc::new(|_: Message| {})).await.unwrap();
        assert_eq!(bus.subscribed_topics(), vec!["car/mode".to_string()]);

        bus.unsubscribe("car/mode").await.unwrap();
        assert!(bus.subscribed_topics().is_empty());
        assert!(!bus.deliver("car/mode", vec![]));
    }
}
