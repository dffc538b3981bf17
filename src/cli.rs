//! Command line and environment configuration of the service.
//!
//! Every flag falls back to an environment variable so that the binary can
//! be configured entirely from a container definition.

use crate::brake::{BrakeConfig, BrakeController, CustomController, DisabledController};
use crate::bus::MqttSettings;
use crate::throttle::{
    ControllerSettings, ControllerTopics, CustomSteeringProcessor, Processor, SpeedZoneProcessor,
    SpeedZoneSettings, SteeringProcessor, SteeringThrottleConfig,
};
use crate::types::Throttle;
use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use std::path::PathBuf;
use tracing::info;

pub const DEFAULT_CLIENT_ID: &str = "robocar-throttle";
pub const DEFAULT_THROTTLE_MIN: Throttle = 0.3;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "robocar-throttle",
    version,
    about = "Throttle arbitration between the rc controller and the autopilot"
)]
pub struct Args {
    /// Broker address, tcp://host:port
    #[arg(long, env = "MQTT_BROKER", default_value = "tcp://127.0.0.1:1883")]
    pub mqtt_broker: String,

    #[arg(long, env = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    #[arg(long, env = "MQTT_CLIENT_ID", default_value = DEFAULT_CLIENT_ID)]
    pub mqtt_client_id: String,

    /// Quality of service of subscriptions and publications
    #[arg(long, env = "MQTT_QOS", default_value_t = 0,
          value_parser = clap::value_parser!(u8).range(0..=2))]
    pub mqtt_qos: u8,

    /// Publish throttle messages with the retain flag
    #[arg(long, env = "MQTT_RETAIN")]
    pub mqtt_retain: bool,

    /// Topic to publish the throttle result on
    #[arg(long, env = "MQTT_TOPIC_THROTTLE")]
    pub mqtt_topic_throttle: String,

    #[arg(long, env = "MQTT_TOPIC_DRIVE_MODE")]
    pub mqtt_topic_drive_mode: String,

    #[arg(long, env = "MQTT_TOPIC_RC_THROTTLE")]
    pub mqtt_topic_rc_throttle: String,

    #[arg(long, env = "MQTT_TOPIC_STEERING")]
    pub mqtt_topic_steering: String,

    /// Topic carrying the throttle actually applied by the car
    #[arg(long, env = "MQTT_TOPIC_THROTTLE_FEEDBACK")]
    pub mqtt_topic_throttle_feedback: String,

    /// Topic to change the max throttle at runtime
    #[arg(long, env = "MQTT_TOPIC_MAX_THROTTLE_CTRL")]
    pub mqtt_topic_max_throttle_ctrl: String,

    #[arg(long, env = "MQTT_TOPIC_SPEED_ZONE")]
    pub mqtt_topic_speed_zone: String,

    #[arg(long, env = "THROTTLE_MIN", default_value_t = DEFAULT_THROTTLE_MIN)]
    pub throttle_min: Throttle,

    /// Defaults to the min throttle
    #[arg(long, env = "THROTTLE_MAX")]
    pub throttle_max: Option<Throttle>,

    /// Autopilot throttle publications per second
    #[arg(long, env = "PUBLISH_PILOT_FREQUENCY", default_value_t = 10)]
    pub publish_pilot_frequency: u32,

    /// Shape the autopilot throttle with the brake controller
    #[arg(long, env = "BRAKE_ENABLE")]
    pub brake_enable: bool,

    /// Brake table (json or toml), built-in table when absent
    #[arg(long, env = "BRAKE_CONFIG")]
    pub brake_config: Option<PathBuf>,

    #[arg(long, env = "BRAKE_ACCELERATOR_FACTOR", default_value_t = 1.0)]
    pub brake_accelerator_factor: f32,

    /// Pick the throttle from the speed zone instead of the steering
    #[arg(long, env = "THROTTLE_SPEED_ZONE_ENABLE")]
    pub throttle_speed_zone_enable: bool,

    #[arg(long, env = "THROTTLE_SPEED_ZONE_SLOW", default_value_t = 0.2)]
    pub throttle_speed_zone_slow: Throttle,

    #[arg(long, env = "THROTTLE_SPEED_ZONE_NORMAL", default_value_t = 0.5)]
    pub throttle_speed_zone_normal: Throttle,

    #[arg(long, env = "THROTTLE_SPEED_ZONE_FAST", default_value_t = 0.8)]
    pub throttle_speed_zone_fast: Throttle,

    #[arg(long, env = "THROTTLE_SPEED_ZONE_MODERATE_STEERING", default_value_t = 0.4)]
    pub throttle_speed_zone_moderate_steering: f32,

    #[arg(long, env = "THROTTLE_SPEED_ZONE_FULL_STEERING", default_value_t = 0.8)]
    pub throttle_speed_zone_full_steering: f32,

    /// Pick the throttle from a steering/throttle table
    #[arg(long, env = "THROTTLE_CUSTOM_ENABLE")]
    pub throttle_custom_enable: bool,

    /// Steering/throttle table (json or toml)
    #[arg(long, env = "THROTTLE_CUSTOM_CONFIG")]
    pub throttle_custom_config: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Reject flag combinations that cannot be served.
    pub fn validate(&self) -> Result<()> {
        if self.throttle_speed_zone_enable && self.throttle_custom_enable {
            return Err(eyre!(
                "speed zone and custom throttle processors are mutually exclusive"
            ));
        }
        if self.throttle_custom_enable && self.throttle_custom_config.is_none() {
            return Err(eyre!(
                "custom throttle processor enabled without --throttle-custom-config"
            ));
        }
        Ok(())
    }

    pub fn max_throttle(&self) -> Throttle {
        self.throttle_max.unwrap_or(self.throttle_min)
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            broker: self.mqtt_broker.clone(),
            client_id: self.mqtt_client_id.clone(),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
            qos: self.mqtt_qos,
            retain: self.mqtt_retain,
        }
    }

    pub fn topics(&self) -> ControllerTopics {
        ControllerTopics {
            throttle: self.mqtt_topic_throttle.clone(),
            drive_mode: self.mqtt_topic_drive_mode.clone(),
            rc_throttle: self.mqtt_topic_rc_throttle.clone(),
            steering: self.mqtt_topic_steering.clone(),
            throttle_feedback: self.mqtt_topic_throttle_feedback.clone(),
            max_throttle_ctrl: self.mqtt_topic_max_throttle_ctrl.clone(),
            speed_zone: self.mqtt_topic_speed_zone.clone(),
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            max_throttle: self.max_throttle(),
            publish_pilot_frequency: self.publish_pilot_frequency,
        }
    }

    fn speed_zone_settings(&self) -> SpeedZoneSettings {
        SpeedZoneSettings {
            slow_throttle: self.throttle_speed_zone_slow,
            normal_throttle: self.throttle_speed_zone_normal,
            fast_throttle: self.throttle_speed_zone_fast,
            moderate_steering: self.throttle_speed_zone_moderate_steering,
            full_steering: self.throttle_speed_zone_full_steering,
        }
    }

    /// Throttle processor selected by the flags, steering based by default.
    pub async fn processor(&self) -> Result<Box<dyn Processor>> {
        self.validate()?;

        if self.throttle_speed_zone_enable {
            info!("Throttle processor: speed zone");
            let processor = SpeedZoneProcessor::new(self.speed_zone_settings())
                .wrap_err("invalid speed zone settings")?;
            return Ok(Box::new(processor));
        }

        if let Some(path) = self
            .throttle_custom_config
            .as_deref()
            .filter(|_| self.throttle_custom_enable)
        {
            info!("Throttle processor: custom table {}", path.display());
            let cfg = SteeringThrottleConfig::from_file(path)
                .await
                .wrap_err("unable to load custom throttle config")?;
            return Ok(Box::new(CustomSteeringProcessor::new(cfg)));
        }

        info!(
            "Throttle processor: steering, min {} max {}",
            self.throttle_min,
            self.max_throttle()
        );
        Ok(Box::new(SteeringProcessor::new(
            self.throttle_min,
            self.max_throttle(),
        )))
    }

    pub async fn brake_controller(&self) -> Result<Box<dyn BrakeController>> {
        if !self.brake_enable {
            info!("Brake controller disabled");
            return Ok(Box::new(DisabledController));
        }

        let cfg = match &self.brake_config {
            Some(path) => BrakeConfig::from_file(path)
                .await
                .wrap_err("unable to load brake config")?,
            None => BrakeConfig::default(),
        };
        info!(
            "Brake controller enabled, accelerator factor {}",
            self.brake_accelerator_factor
        );
        Ok(Box::new(CustomController::with_config(
            cfg,
            self.brake_accelerator_factor,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TOPICS: [&str; 14] = [
        "--mqtt-topic-throttle",
        "car/throttle",
        "--mqtt-topic-drive-mode",
        "car/drive_mode",
        "--mqtt-topic-rc-throttle",
        "car/rc/throttle",
        "--mqtt-topic-steering",
        "car/steering",
        "--mqtt-topic-throttle-feedback",
        "car/throttle/feedback",
        "--mqtt-topic-max-throttle-ctrl",
        "car/throttle/max",
        "--mqtt-topic-speed-zone",
        "car/speed_zone",
    ];

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["robocar-throttle"];
        argv.extend_from_slice(&TOPICS);
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.mqtt_client_id, DEFAULT_CLIENT_ID);
        assert_eq!(args.mqtt_qos, 0);
        assert_eq!(args.throttle_min, 0.3);
        assert_eq!(args.max_throttle(), 0.3);
        assert_eq!(args.publish_pilot_frequency, 10);
        assert!(!args.brake_enable);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn topics_are_mapped() {
        let topics = parse(&[]).unwrap().topics();
        assert_eq!(topics.throttle, "car/throttle");
        assert_eq!(topics.rc_throttle, "car/rc/throttle");
        assert_eq!(topics.max_throttle_ctrl, "car/throttle/max");
        assert_eq!(topics.speed_zone, "car/speed_zone");
    }

    #[test]
    fn explicit_max_throttle() {
        let args = parse(&["--throttle-min", "0.2", "--throttle-max", "0.6"]).unwrap();
        assert_eq!(args.max_throttle(), 0.6);
        assert_eq!(args.controller_settings().max_throttle, 0.6);
    }

    #[test]
    fn missing_topic_is_an_error() {
        let result = Args::try_parse_from(["robocar-throttle", "--mqtt-topic-throttle", "t"]);
        assert!(result.is_err());
    }

    #[test]
    fn qos_out_of_range_is_an_error() {
        assert!(parse(&["--mqtt-qos", "3"]).is_err());
        assert_eq!(parse(&["--mqtt-qos", "2"]).unwrap().mqtt_settings().qos, 2);
    }

    #[test]
    fn processors_are_mutually_exclusive() {
        let args = parse(&[
            "--throttle-speed-zone-enable",
            "--throttle-custom-enable",
            "--throttle-custom-config",
            "table.json",
        ])
        .unwrap();
        assert!(args.validate().is_err());
    }

    #[test]
    fn custom_processor_needs_a_config() {
        let args = parse(&["--throttle-custom-enable"]).unwrap();
        assert!(args.validate().is_err());
    }

    #[tokio::test]
    async fn steering_processor_by_default() {
        let args = parse(&["--throttle-min", "0.3", "--throttle-max", "0.5"]).unwrap();
        let processor = args.processor().await.unwrap();
        assert!((processor.process(0.0) - 0.5).abs() < 1e-6);
        assert!((processor.process(1.0) - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn speed_zone_processor_when_enabled() {
        let args = parse(&["--throttle-speed-zone-enable"]).unwrap();
        let processor = args.processor().await.unwrap();
        // Speed zone still unknown
        assert_eq!(processor.process(0.0), 0.2);
    }

    #[tokio::test]
    async fn custom_processor_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"steering_values": [0.2, 0.6], "throttle_steps": [0.7, 0.4]}}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let args = parse(&["--throttle-custom-enable", "--throttle-custom-config", path]).unwrap();
        let processor = args.processor().await.unwrap();
        assert_eq!(processor.process(0.0), 0.7);
        assert_eq!(processor.process(-0.9), 0.4);
    }

    #[tokio::test]
    async fn invalid_custom_table_is_fatal() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"steering_values": [0.2, 0.6], "throttle_steps": [0.4, 0.7]}}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let args = parse(&["--throttle-custom-enable", "--throttle-custom-config", path]).unwrap();
        assert!(args.processor().await.is_err());
    }

    #[tokio::test]
    async fn brake_disabled_by_default() {
        let brake = parse(&[]).unwrap().brake_controller().await.unwrap();
        brake.set_real_throttle(0.9);
        assert_eq!(brake.adjust_throttle(0.1), 0.1);
    }

    #[tokio::test]
    async fn brake_with_builtin_table() {
        let brake = parse(&["--brake-enable"])
            .unwrap()
            .brake_controller()
            .await
            .unwrap();
        brake.set_real_throttle(0.9);
        assert_eq!(brake.adjust_throttle(0.1), -1.0);
    }

    #[tokio::test]
    async fn brake_with_missing_file_is_fatal() {
        let args = parse(&["--brake-enable", "--brake-config", "/nonexistent/brake.json"]).unwrap();
        assert!(args.brake_controller().await.is_err());
    }
}
