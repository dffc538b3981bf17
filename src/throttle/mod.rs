//! # Throttle
//!
//! ```text
//! throttle/
//! ├── controller.rs - drive mode state machine and periodic pilot publisher
//! ├── processor.rs  - Processor trait, steering and speed zone processors
//! └── custom.rs     - table driven steering processor and its config file
//! ```

pub mod controller;
pub mod custom;
pub mod processor;

pub use controller::{ControllerError, ControllerSettings, ControllerTopics, ThrottleController};
pub use custom::{CustomSteeringProcessor, SteeringThrottleConfig};
pub use processor::{Processor, SpeedZoneProcessor, SpeedZoneSettings, SteeringProcessor};
