//! # Message bus
//!
//! The throttle controller only talks to the outside world through named
//! topics carrying binary payloads. This module defines that contract and two
//! implementations of it:
//!
//! ```text
//! bus/
//! ├── mqtt.rs   - rumqttc client, the transport used on the car
//! └── local.rs  - in-process loopback bus for tests and dry runs
//! ```
//!
//! Handlers are plain closures. Each implementation decides how to run them,
//! but a handler may always be invoked concurrently with other handlers and
//! with the periodic publisher of the controller.

pub mod local;
pub mod mqtt;

pub use local::LocalBus;
pub use mqtt::{MqttBus, MqttSettings};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// A single payload received on, or sent to, a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Callback invoked for every message received on a subscribed topic.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("unable to subscribe to topic {topic}: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("unable to unsubscribe from topic {topic}: {reason}")]
    Unsubscribe { topic: String, reason: String },

    #[error("subscription to topic {0} rejected")]
    Rejected(String),

    #[error("invalid bus settings: {0}")]
    Settings(String),
}

/// Publish/subscribe channel used by the controller.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Route every message received on `topic` to `handler`, replacing any
    /// previous handler for the same topic.
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BusError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError>;

    /// Fire-and-forget publication. Failures are logged by the implementation.
    fn publish(&self, topic: &str, payload: Vec<u8>);
}
