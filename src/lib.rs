//! # robocar-throttle
//!
//! Throttle service of the robocar. It forwards the radio controlled throttle
//! while a human drives and computes the throttle itself, from the steering,
//! the speed zone and the throttle feedback, while the autopilot drives.
//!
//! ```text
//! src/
//! ├── throttle/  - controller, throttle processors
//! ├── brake/     - brake controllers and brake table
//! ├── bus/       - publish/subscribe abstraction, MQTT and in-process buses
//! ├── messages   - protobuf wire messages
//! ├── config     - config file loading
//! ├── cli        - command line arguments
//! └── types      - shared scalar types
//! ```

pub mod brake;
pub mod bus;
pub mod cli;
pub mod config;
pub mod messages;
pub mod throttle;
pub mod types;
