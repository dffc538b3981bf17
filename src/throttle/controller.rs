//! Throttle Controller - arbitration between the driver and the autopilot
//!
//! Listens to the inbound topics of the car and decides which throttle value
//! reaches the throttle output topic:
//!
//! ```text
//! drive mode ─┐
//! steering ───┤                      USER / COPILOT
//! rc throttle ┼──► ThrottleController ──► rc throttle, capped at max throttle
//! feedback ───┤                      PILOT (every tick)
//! max ctrl ───┤                       ──► brake(processor(steering))
//! speed zone ─┘
//! ```
//!
//! Every field shared between the bus handlers and the periodic publisher
//! has its own lock.

use crate::brake::{BrakeController, DisabledController};
use crate::bus::{BusError, Message, MessageHandler, PubSub};
use crate::messages::{
    self, DriveModeMessage, SpeedZoneMessage, SteeringMessage, ThrottleMessage,
};
use crate::throttle::processor::{Processor, SteeringProcessor};
use crate::types::{DriveMode, Steering, Throttle};
use prost::Message as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Minimum throttle of the default steering processor.
const DEFAULT_MIN_THROTTLE: Throttle = 0.1;

/// Topic names used by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerTopics {
    /// Output, the only topic the controller publishes on
    pub throttle: String,
    pub drive_mode: String,
    pub rc_throttle: String,
    pub steering: String,
    /// Throttle actually applied by the car, fed to the brake controller
    pub throttle_feedback: String,
    /// Runtime updates of the max throttle ceiling
    pub max_throttle_ctrl: String,
    pub speed_zone: String,
}

impl ControllerTopics {
    /// Inbound topics, in subscription order.
    pub fn inbound(&self) -> [&str; 6] {
        [
            self.drive_mode.as_str(),
            self.rc_throttle.as_str(),
            self.steering.as_str(),
            self.throttle_feedback.as_str(),
            self.max_throttle_ctrl.as_str(),
            self.speed_zone.as_str(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSettings {
    /// Ceiling applied to the rc throttle, and upper bound of the default
    /// steering processor
    pub max_throttle: Throttle,

    /// Autopilot publications per second
    pub publish_pilot_frequency: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("subscription failed: {0}")]
    Subscription(#[from] BusError),

    #[error("publish pilot frequency must be greater than 0")]
    InvalidFrequency,
}

/// Mixes rc throttle and autopilot throttle according to the drive mode.
///
/// Built with [`ThrottleController::new`], optionally customised with
/// [`with_processor`](Self::with_processor) and
/// [`with_brake_controller`](Self::with_brake_controller), then shared in an
/// `Arc` and driven by [`start`](Self::start) until [`stop`](Self::stop).
pub struct ThrottleController {
    bus: Arc<dyn PubSub>,
    topics: ControllerTopics,
    publish_period: Duration,

    processor: Box<dyn Processor>,
    brake: Box<dyn BrakeController>,

    drive_mode: RwLock<DriveMode>,
    steering: RwLock<Steering>,
    max_throttle: RwLock<Throttle>,

    cancel: CancellationToken,
    stopped: AtomicBool,
}

impl ThrottleController {
    /// Controller in USER mode with a [`SteeringProcessor`] between
    /// `0.1` and `max_throttle` and no brake shaping.
    pub fn new(
        bus: Arc<dyn PubSub>,
        topics: ControllerTopics,
        settings: ControllerSettings,
    ) -> Result<Self, ControllerError> {
        if settings.publish_pilot_frequency == 0 {
            return Err(ControllerError::InvalidFrequency);
        }

        Ok(Self {
            bus,
            topics,
            publish_period: Duration::from_secs_f64(
                1.0 / f64::from(settings.publish_pilot_frequency),
            ),
            processor: Box::new(SteeringProcessor::new(
                DEFAULT_MIN_THROTTLE,
                settings.max_throttle,
            )),
            brake: Box::new(DisabledController),
            drive_mode: RwLock::new(DriveMode::User),
            steering: RwLock::new(0.0),
            max_throttle: RwLock::new(settings.max_throttle),
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn with_processor(mut self, processor: Box<dyn Processor>) -> Self {
        self.processor = processor;
        self
    }

    pub fn with_brake_controller(mut self, brake: Box<dyn BrakeController>) -> Self {
        self.brake = brake;
        self
    }

    pub fn topics(&self) -> &ControllerTopics {
        &self.topics
    }

    /// Subscribe to every inbound topic, then publish the autopilot throttle
    /// on each tick until [`stop`](Self::stop) is called.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Subscription`] when the bus refuses one of
    /// the subscriptions. Nothing is published in that case.
    pub async fn start(self: Arc<Self>) -> Result<(), ControllerError> {
        if let Err(e) = self.register_callbacks().await {
            error!("Unable to register callbacks: {}", e);
            return Err(e);
        }

        info!(
            "Throttle controller started, pilot period {:?}",
            self.publish_period
        );
        let mut ticker = tokio::time::interval(self.publish_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.on_publish_pilot_value(),
            }
        }

        info!("Throttle controller stopped");
        Ok(())
    }

    /// Stop the publication loop and release the subscriptions.
    ///
    /// Only the first call has an effect. Handlers already running are left
    /// to complete.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Throttle controller already stopped");
            return;
        }
        info!("Stopping throttle controller");
        self.cancel.cancel();

        for topic in self.topics.inbound() {
            if let Err(e) = self.bus.unsubscribe(topic).await {
                warn!("{}", e);
            }
        }
    }

    pub fn drive_mode(&self) -> DriveMode {
        *self
            .drive_mode
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn steering(&self) -> Steering {
        *self
            .steering
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn max_throttle(&self) -> Throttle {
        *self
            .max_throttle
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn register_callbacks(self: &Arc<Self>) -> Result<(), ControllerError> {
        let callbacks: [(&str, fn(&Self, &Message)); 6] = [
            (self.topics.drive_mode.as_str(), Self::on_drive_mode),
            (self.topics.rc_throttle.as_str(), Self::on_rc_throttle),
            (self.topics.steering.as_str(), Self::on_steering),
            (self.topics.throttle_feedback.as_str(), Self::on_throttle_feedback),
            (self.topics.max_throttle_ctrl.as_str(), Self::on_max_throttle_ctrl),
            (self.topics.speed_zone.as_str(), Self::on_speed_zone),
        ];

        for (topic, callback) in callbacks {
            self.bus.subscribe(topic, self.handler(callback)).await?;
        }
        Ok(())
    }

    /// Wrap `callback` in a bus handler holding only a weak reference.
    fn handler(self: &Arc<Self>, callback: fn(&Self, &Message)) -> MessageHandler {
        let controller = Arc::downgrade(self);
        Arc::new(move |msg: Message| {
            if let Some(controller) = controller.upgrade() {
                callback(&controller, &msg);
            }
        })
    }

    pub fn on_drive_mode(&self, msg: &Message) {
        let drive_mode = match DriveModeMessage::decode(msg.payload.as_slice()) {
            Ok(m) => m.drive_mode(),
            Err(e) => {
                error!("Unable to decode drive mode on {}: {}", msg.topic, e);
                return;
            }
        };

        let mut current = self
            .drive_mode
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current != drive_mode {
            info!("Drive mode changed from {:?} to {:?}", *current, drive_mode);
        }
        *current = drive_mode;
    }

    pub fn on_steering(&self, msg: &Message) {
        let steering = match SteeringMessage::decode(msg.payload.as_slice()) {
            Ok(m) => m.steering,
            Err(e) => {
                error!("Unable to decode steering, skip value: {}", e);
                return;
            }
        };

        *self
            .steering
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = steering;
    }

    /// Forward the rc throttle in USER and COPILOT modes, capped at the max
    /// throttle. An uncapped value is republished byte for byte.
    pub fn on_rc_throttle(&self, msg: &Message) {
        let mut throttle_msg = match ThrottleMessage::decode(msg.payload.as_slice()) {
            Ok(m) => m,
            Err(e) => {
                error!("Unable to decode rc throttle: {}", e);
                return;
            }
        };

        let drive_mode = self
            .drive_mode
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !matches!(*drive_mode, DriveMode::User | DriveMode::Copilot) {
            return;
        }

        debug!("Publish new throttle value from rc: {}", throttle_msg.throttle);
        let max_throttle = self.max_throttle();
        if throttle_msg.throttle <= max_throttle {
            self.bus.publish(&self.topics.throttle, msg.payload.clone());
            return;
        }

        debug!(
            "Throttle above max value allowed, patch value from {} to {}",
            throttle_msg.throttle, max_throttle
        );
        throttle_msg.throttle = max_throttle;
        match messages::encode(&throttle_msg) {
            Ok(payload) => self.bus.publish(&self.topics.throttle, payload),
            Err(e) => error!("Unable to encode throttle message: {}", e),
        }
    }

    pub fn on_throttle_feedback(&self, msg: &Message) {
        match ThrottleMessage::decode(msg.payload.as_slice()) {
            Ok(m) => self.brake.set_real_throttle(m.throttle),
            Err(e) => error!("Unable to decode throttle feedback: {}", e),
        }
    }

    pub fn on_max_throttle_ctrl(&self, msg: &Message) {
        let max_throttle = match ThrottleMessage::decode(msg.payload.as_slice()) {
            Ok(m) => m.throttle,
            Err(e) => {
                error!("Unable to decode max throttle, keep previous value: {}", e);
                return;
            }
        };

        let mut current = self
            .max_throttle
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current != max_throttle {
            info!("Max throttle changed from {} to {}", *current, max_throttle);
        }
        *current = max_throttle;
    }

    pub fn on_speed_zone(&self, msg: &Message) {
        match SpeedZoneMessage::decode(msg.payload.as_slice()) {
            Ok(m) => self.processor.set_speed_zone(m.speed_zone()),
            Err(e) => error!("Unable to decode speed zone, skip value: {}", e),
        }
    }

    /// Tick of the publication loop, publishes only in PILOT mode.
    fn on_publish_pilot_value(&self) {
        let drive_mode = self
            .drive_mode
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *drive_mode != DriveMode::Pilot {
            return;
        }

        let target = self.processor.process(self.steering());
        let throttle_msg = ThrottleMessage {
            throttle: self.brake.adjust_throttle(target),
            confidence: 1.0,
            frame_ref: None,
        };

        match messages::encode(&throttle_msg) {
            Ok(payload) => self.bus.publish(&self.topics.throttle, payload),
            Err(e) => error!("Unable to encode pilot throttle {:?}: {}", throttle_msg, e),
        }
    }
}
