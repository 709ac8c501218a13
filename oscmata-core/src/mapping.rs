//! Value mapping and dispatch engine
//!
//! Converts MIDI-style note and control-change values into actuator
//! commands. The engine owns the mutable configuration tree: calibration CC
//! messages rewrite servo `home`/`max` in place, and the daemon flushes the
//! tree back to disk on shutdown.

use crate::config::Config;

/// Timer duty cycle for the stepper step pin: 50% of the 0-1023 range.
pub const STEPPER_DUTY_CYCLE: u16 = 511;

/// An outbound command toward the Firmata client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    /// Move a servo: PWM write of `value` on `pin`
    ServoWrite { pin: u8, value: i32 },
    /// Set the hardware timer frequency driving the stepper, in Hz
    TimerFrequency(i32),
    /// Set the timer PWM duty cycle on the step pin
    TimerPwm { pin: u8, duty: u16 },
}

/// Map `x` from the input range onto the output range, like the Arduino
/// `map()` function but in floating point.
///
/// Linear interpolation, not clamped: inputs outside `[lower_in, upper_in]`
/// extrapolate outside `[lower_out, upper_out]`. Produces infinity or NaN
/// when `upper_in == lower_in`; callers must guarantee the input range has
/// nonzero width. Truncation to an integer actuator value happens only at
/// the final step, toward zero.
#[inline]
pub fn map_value(x: f64, lower_in: f64, upper_in: f64, lower_out: f64, upper_out: f64) -> f64 {
    lower_out + ((x - lower_in) / (upper_in - lower_in)) * (upper_out - lower_out)
}

/// Calibration and mapping engine.
///
/// Owns the in-memory configuration tree; all mutation happens through
/// `apply_control_change` on the single dispatch task, preserving the
/// single-writer guarantee.
pub struct MappingEngine {
    config: Config,
}

impl MappingEngine {
    /// Create an engine owning the given configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Current configuration tree (used by the shutdown flush).
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle a note-on message: move the selected servo between its
    /// calibrated `home` and `max` positions according to velocity.
    ///
    /// Only the first servo whose `note` matches is affected; later entries
    /// with the same note are skipped. Velocity is expected in
    /// `[midi_min, midi_max]` but not validated, so out-of-range input
    /// extrapolates beyond the calibrated range. Returns `None` when no
    /// servo matches.
    pub fn apply_note(&self, _channel: i32, note: i32, velocity: i32) -> Option<ActuatorCommand> {
        let midi_min = f64::from(self.config.midi_min);
        let midi_max = f64::from(self.config.midi_max);

        let servo = self.config.servo.iter().find(|s| s.note == note)?;

        let mut pos = map_value(
            f64::from(velocity),
            midi_min,
            midi_max,
            f64::from(servo.pos.home),
            f64::from(servo.pos.max),
        );
        if servo.reverse_servo_direction {
            pos = invert_about(pos, &servo.pos);
        }

        Some(ActuatorCommand::ServoWrite {
            pin: servo.pwm_pin,
            value: pos as i32,
        })
    }

    /// Handle a control-change message.
    ///
    /// Every servo whose `cc.home` or `cc.max` matches is recalibrated (no
    /// early exit, unlike note handling), and the stepper speed CC is
    /// checked independently, so one message can produce several commands.
    ///
    /// The new `home`/`max` value is persisted before the optional output
    /// inversion: with `reverse_servo_direction` set, the stored calibration
    /// and the emitted actuator value differ.
    pub fn apply_control_change(
        &mut self,
        _channel: i32,
        cc_number: i32,
        cc_value: i32,
    ) -> Vec<ActuatorCommand> {
        let midi_min = f64::from(self.config.midi_min);
        let midi_max = f64::from(self.config.midi_max);

        let mut commands = Vec::new();

        for servo in &mut self.config.servo {
            if cc_number == servo.cc.home {
                let mut value = f64::from(cc_value);
                if servo.reverse_home_direction {
                    value = map_value(value, midi_min, midi_max, midi_max, midi_min);
                }
                let mut pos = map_value(
                    value,
                    midi_min,
                    midi_max,
                    f64::from(servo.pos.abs_min),
                    f64::from(servo.pos.abs_max),
                );
                servo.pos.home = pos as i32;
                if servo.reverse_servo_direction {
                    pos = invert_about(pos, &servo.pos);
                }
                commands.push(ActuatorCommand::ServoWrite {
                    pin: servo.pwm_pin,
                    value: pos as i32,
                });
            } else if cc_number == servo.cc.max {
                let mut value = f64::from(cc_value);
                if servo.reverse_max_direction {
                    value = map_value(value, midi_min, midi_max, midi_max, midi_min);
                }
                // The output range starts at the current home, which an
                // earlier home-calibration message may already have moved.
                let mut pos = map_value(
                    value,
                    midi_min,
                    midi_max,
                    f64::from(servo.pos.home),
                    f64::from(servo.pos.abs_max),
                );
                servo.pos.max = pos as i32;
                if servo.reverse_servo_direction {
                    pos = invert_about(pos, &servo.pos);
                }
                commands.push(ActuatorCommand::ServoWrite {
                    pin: servo.pwm_pin,
                    value: pos as i32,
                });
            }
        }

        if cc_number == self.config.stepper.cc.speed {
            let speed = map_value(
                f64::from(cc_value),
                midi_min,
                midi_max,
                f64::from(self.config.stepper.movement.min_speed),
                f64::from(self.config.stepper.movement.max_speed),
            );
            commands.push(ActuatorCommand::TimerFrequency(speed as i32));
            // Duty cycle stays at 50% regardless of speed; re-emitted with
            // every frequency change.
            commands.push(ActuatorCommand::TimerPwm {
                pin: self.config.stepper.step_pin,
                duty: STEPPER_DUTY_CYCLE,
            });
        }

        commands
    }
}

/// Invert a position about the servo's absolute range.
#[inline]
fn invert_about(pos: f64, p: &crate::config::ServoPosition) -> f64 {
    map_value(
        pos,
        f64::from(p.abs_min),
        f64::from(p.abs_max),
        f64::from(p.abs_max),
        f64::from(p.abs_min),
    )
}
