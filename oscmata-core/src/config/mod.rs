//! Configuration tree for the bridge
//!
//! Mirrors the on-disk `config.json` layout. The tree is loaded once at
//! startup, held as mutable state for the process lifetime (servo `home`/
//! `max` are recalibrated live by CC messages), and flushed back to disk
//! exactly once on graceful shutdown.

mod store;

pub use store::ConfigStore;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BridgeError, Result};

/// Root configuration, one per process.
///
/// Fields are declared in alphabetical order so the flushed JSON document
/// keeps the same sorted-key layout it was authored in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Digital output pin for the status LED, driven high at startup
    pub led_pin: u8,
    /// Upper bound of the incoming MIDI-style value range (typically 127)
    pub midi_max: i32,
    /// Lower bound of the incoming MIDI-style value range (typically 0)
    pub midi_min: i32,
    /// UDP port the OSC listener binds to
    pub port: u16,
    /// Router address used only to discover the local outbound IP
    pub router_ip: String,
    /// Servo calibration entries, scanned in order
    pub servo: Vec<ServoConfig>,
    /// The single stepper actuator
    pub stepper: StepperConfig,
}

/// One physical servo and its calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServoConfig {
    /// CC numbers that recalibrate this servo
    pub cc: ServoCc,
    /// MIDI note that selects this servo for note-on messages
    pub note: i32,
    /// Calibrated and absolute position bounds, in actuator output units
    pub pos: ServoPosition,
    /// PWM-capable pin driving this servo
    pub pwm_pin: u8,
    /// Invert the CC input when recalibrating `home`
    pub reverse_home_direction: bool,
    /// Invert the CC input when recalibrating `max`
    pub reverse_max_direction: bool,
    /// Invert the computed position about the absolute range before output
    pub reverse_servo_direction: bool,
}

/// CC numbers addressing a servo's calibration points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServoCc {
    /// Recalibrates the home position
    pub home: i32,
    /// Recalibrates the max position
    pub max: i32,
}

/// Servo position calibration.
///
/// Intended steady state is `abs_min <= home <= max <= abs_max`, but `home`
/// and `max` are mutated live by calibration CC messages and are not
/// re-validated against it. Out-of-order CC messages can set `max < home`;
/// that permissiveness is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServoPosition {
    /// Hardware-safe upper bound the commanded position must never exceed
    pub abs_max: i32,
    /// Hardware-safe lower bound
    pub abs_min: i32,
    /// Calibrated minimum commanded position, runtime-adjustable
    pub home: i32,
    /// Calibrated maximum commanded position, runtime-adjustable
    pub max: i32,
}

/// The stepper actuator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepperConfig {
    /// CC number addressing the stepper
    pub cc: StepperCc,
    /// Digital output pin selecting the step direction
    pub direction_pin: u8,
    /// Movement parameters
    #[serde(rename = "move")]
    pub movement: StepperMove,
    /// Output pin pulsed by the hardware timer
    pub step_pin: u8,
}

/// CC numbers addressing the stepper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepperCc {
    /// Adjusts the step frequency
    pub speed: i32,
}

/// Stepper movement parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepperMove {
    /// Initial direction level, written once at startup
    pub direction: u8,
    /// Upper step frequency bound in Hz
    pub max_speed: i32,
    /// Lower step frequency bound in Hz
    pub min_speed: i32,
}

impl Config {
    /// Parse a configuration from a JSON document.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to JSON with sorted keys and 4-space indentation, the
    /// layout the flushed `config.json` uses on disk.
    pub fn to_json(&self) -> Result<String> {
        // Going through serde_json::Value sorts object keys (the default
        // Map is keyed by a BTreeMap).
        let value = serde_json::to_value(self)?;
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value
            .serialize(&mut ser)
            .map_err(|e| BridgeError::Serialization(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| BridgeError::Serialization(e.to_string()))
    }

    /// Validate the invariants the mapping engine relies on.
    ///
    /// `midi_min < midi_max` is required: every remapping divides by the
    /// width of that range. The per-servo `abs_min <= home <= max <= abs_max`
    /// ordering is only the intended steady state and gets a warning, not an
    /// error, since calibration CC messages may legitimately leave it broken.
    pub fn validate(&self) -> Result<()> {
        if self.midi_min >= self.midi_max {
            return Err(BridgeError::Config(format!(
                "midi_min ({}) must be less than midi_max ({})",
                self.midi_min, self.midi_max
            )));
        }

        if self.stepper.movement.min_speed >= self.stepper.movement.max_speed {
            return Err(BridgeError::Config(format!(
                "stepper min_speed ({}) must be less than max_speed ({})",
                self.stepper.movement.min_speed, self.stepper.movement.max_speed
            )));
        }

        for (idx, servo) in self.servo.iter().enumerate() {
            let p = &servo.pos;
            if p.abs_min >= p.abs_max {
                return Err(BridgeError::Config(format!(
                    "servo {} (note {}): abs_min ({}) must be less than abs_max ({})",
                    idx, servo.note, p.abs_min, p.abs_max
                )));
            }
            if !(p.abs_min <= p.home && p.home <= p.max && p.max <= p.abs_max) {
                warn!(
                    "servo {} (note {}): calibration out of order \
                     (abs_min={} home={} max={} abs_max={})",
                    idx, servo.note, p.abs_min, p.home, p.max, p.abs_max
                );
            }
        }

        Ok(())
    }
}
