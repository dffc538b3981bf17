//! MQTT transport backed by `rumqttc`.
//!
//! The client owns a background task polling the rumqttc event loop. Incoming
//! PUBLISH packets are routed by exact topic match to the registered handler,
//! each one on its own tokio task.
//!
//! ```text
//! broker ──► EventLoop task ──► tokio::spawn(handler) per message
//!   ▲
//!   └──── AsyncClient::try_publish (fire-and-forget)
//! ```

use super::{BusError, Message, MessageHandler, PubSub};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeReasonCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(5);
const REQUEST_CHANNEL_CAPACITY: usize = 100;
/// Pause between two polls after a connection error.
const RETRY_DELAY: Duration = Duration::from_secs(1);

type HandlerMap = Arc<RwLock<HashMap<String, MessageHandler>>>;

/// Connection parameters for the MQTT broker.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    /// Broker address, `tcp://host:port`, `mqtt://host:port` or `host:port`
    pub broker: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 0, 1 or 2
    pub qos: u8,
    pub retain: bool,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker: format!("tcp://127.0.0.1:{}", DEFAULT_PORT),
            client_id: "robocar-throttle".to_string(),
            username: None,
            password: None,
            qos: 0,
            retain: false,
        }
    }
}

impl MqttSettings {
    /// Split the broker address into host and port.
    pub fn host_and_port(&self) -> Result<(String, u16), BusError> {
        let address = self
            .broker
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.broker)
            .trim_end_matches('/');

        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    BusError::Settings(format!("invalid port in broker {}: {}", self.broker, e))
                })?;
                (host, port)
            }
            None => (address, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(BusError::Settings(format!(
                "missing host in broker {}",
                self.broker
            )));
        }
        Ok((host.to_string(), port))
    }

    pub fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }
}

pub struct MqttBus {
    client: AsyncClient,
    handlers: HandlerMap,
    qos: QoS,
    retain: bool,
    cancel: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBus {
    /// Create the client and spawn its event loop. The connection itself is
    /// established lazily by the event loop, so this never blocks.
    ///
    /// Cancelling `cancel` stops the event loop.
    pub fn connect(settings: &MqttSettings, cancel: CancellationToken) -> Result<Self, BusError> {
        let (host, port) = settings.host_and_port()?;
        info!(
            "Connecting to MQTT broker {}:{} as {}",
            host, port, settings.client_id
        );

        let mut options = MqttOptions::new(settings.client_id.clone(), host, port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some(username) = &settings.username {
            options.set_credentials(
                username.clone(),
                settings.password.clone().unwrap_or_default(),
            );
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let handlers: HandlerMap = Arc::new(RwLock::new(HashMap::new()));

        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            handlers.clone(),
            settings.qos(),
            cancel.clone(),
        ));

        Ok(Self {
            client,
            handlers,
            qos: settings.qos(),
            retain: settings.retain,
            cancel,
            event_loop: Mutex::new(Some(task)),
        })
    }

    /// Send DISCONNECT, stop the event loop and wait for it to finish.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("Unable to send MQTT disconnect: {}", e);
        }
        self.cancel.cancel();

        let task = self
            .event_loop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("MQTT event loop terminated abnormally: {}", e);
            }
        }
        info!("Disconnected from MQTT broker");
    }
}

#[async_trait]
impl PubSub for MqttBus {
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BusError> {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(topic.to_string(), handler);

        if let Err(e) = self.client.subscribe(topic, self.qos).await {
            self.handlers
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(topic);
            return Err(BusError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            });
        }
        info!("Subscribed to {}", topic);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError> {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(topic);

        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| BusError::Unsubscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) {
        if let Err(e) = self
            .client
            .try_publish(topic, self.qos, self.retain, payload)
        {
            error!("Unable to publish on {}: {}", topic, e);
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    handlers: HandlerMap,
    qos: QoS,
    cancel: CancellationToken,
) {
    info!("MQTT event loop started");
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                dispatch(&handlers, publish.topic, publish.payload.to_vec());
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker");
                resubscribe(&client, &handlers, qos);
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    error!("Broker rejected subscription request {}", ack.pkid);
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }
    info!("MQTT event loop stopped");
}

fn dispatch(handlers: &HandlerMap, topic: String, payload: Vec<u8>) {
    let handler = handlers
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(&topic)
        .cloned();

    match handler {
        Some(handler) => {
            tokio::spawn(async move {
                handler(Message { topic, payload });
            });
        }
        None => debug!("Ignore message on unhandled topic {}", topic),
    }
}

/// Restore the subscriptions after a (re)connection, the session is clean.
fn resubscribe(client: &AsyncClient, handlers: &HandlerMap, qos: QoS) {
    let topics: Vec<String> = handlers
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .keys()
        .cloned()
        .collect();

    for topic in topics {
        if let Err(e) = client.try_subscribe(topic.as_str(), qos) {
            error!("Unable to restore subscription to {}: {}", topic, e);
        }
    }
}
