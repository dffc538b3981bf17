//! Protobuf wire messages shared with the other robocar services.
//!
//! The schema mirrors the upstream `events` package field by field, so the
//! numbering here is part of the bus contract and must not be reshuffled.
//! Messages are derived with `prost` directly instead of generated from a
//! `.proto` file.

use prost::{EncodeError, Message};

/// Who is in charge of the vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DriveMode {
    Invalid = 0,
    /// Human driver on the radio controller
    User = 1,
    /// Fully autonomous
    Pilot = 2,
    /// Autonomous steering, throttle still from the radio controller
    Copilot = 3,
}

/// Classification of the current stretch of track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SpeedZone {
    Unknown = 0,
    Slow = 1,
    Normal = 2,
    Fast = 3,
}

/// Reference to the camera frame a value was computed from.
#[derive(Clone, PartialEq, Message)]
pub struct FrameRef {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ThrottleMessage {
    #[prost(float, tag = "1")]
    pub throttle: f32,
    #[prost(float, tag = "2")]
    pub confidence: f32,
    #[prost(message, optional, tag = "3")]
    pub frame_ref: Option<FrameRef>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SteeringMessage {
    #[prost(float, tag = "1")]
    pub steering: f32,
    #[prost(float, tag = "2")]
    pub confidence: f32,
    #[prost(message, optional, tag = "3")]
    pub frame_ref: Option<FrameRef>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DriveModeMessage {
    #[prost(enumeration = "DriveMode", tag = "1")]
    pub drive_mode: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SpeedZoneMessage {
    #[prost(enumeration = "SpeedZone", tag = "1")]
    pub speed_zone: i32,
    #[prost(float, tag = "2")]
    pub confidence: f32,
    #[prost(message, optional, tag = "3")]
    pub frame_ref: Option<FrameRef>,
}

/// Serialize `msg` into a freshly allocated buffer.
pub fn encode<M: Message>(msg: &M) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::with_capacity(msg.encoded_len());
    msg.encode(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_drive_mode_decodes_as_invalid() {
        let msg = DriveModeMessage { drive_mode: 42 };
        let payload = encode(&msg).unwrap();

        let decoded = DriveModeMessage::decode(payload.as_slice()).unwrap();
        assert_eq!(decoded.drive_mode(), DriveMode::Invalid);
    }

    #[test]
    fn throttle_message_keeps_frame_ref() {
        let msg = ThrottleMessage {
            throttle: 0.42,
            confidence: 0.9,
            frame_ref: Some(FrameRef {
                name: "camera".to_string(),
                id: "frame-12".to_string(),
            }),
        };
        let payload = encode(&msg).unwrap();

        let decoded = ThrottleMessage::decode(payload.as_slice()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let msg = SteeringMessage {
            steering: -0.5,
            confidence: 1.0,
            frame_ref: None,
        };
        let payload = encode(&msg).unwrap();

        assert!(SteeringMessage::decode(&payload[..payload.len() - 1]).is_err());
    }
}
