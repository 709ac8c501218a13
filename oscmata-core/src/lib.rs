//! oscmata Core Library
//!
//! Shared types and the value-mapping engine for the oscmata bridge: the
//! configuration tree with its JSON persistence, the MIDI-to-actuator
//! mapping logic, and the WLAN/LAN address selector.

pub mod config;
pub mod error;
pub mod mapping;
pub mod net;

// Re-export commonly used types
pub use config::{Config, ConfigStore, ServoConfig, StepperConfig};
pub use error::{BridgeError, Result};
pub use mapping::{map_value, ActuatorCommand, MappingEngine, STEPPER_DUTY_CYCLE};
pub use net::{AddressPair, Interface};
