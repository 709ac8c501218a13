//! Firmata client - high-level interface for actuator output
//!
//! Encodes the Firmata wire protocol over a serial transport. Standard
//! messages cover pin modes, digital levels, and PWM/servo writes; the
//! stepper's hardware timer uses firmware-defined sysex extensions in the
//! user-reserved command range.

use crate::serial_driver::{SerialDriver, SerialTransport};
use oscmata_core::{ActuatorCommand, Result};
use tracing::debug;

/// Analog (PWM) write, pin number in the low nibble (0xE0)
pub const ANALOG_MESSAGE: u8 = 0xE0;
/// Set pin mode (0xF4)
pub const SET_PIN_MODE: u8 = 0xF4;
/// Set digital pin value (0xF5)
pub const SET_DIGITAL_PIN_VALUE: u8 = 0xF5;
/// Start of a sysex frame (0xF0)
pub const SYSEX_START: u8 = 0xF0;
/// End of a sysex frame (0xF7)
pub const SYSEX_END: u8 = 0xF7;
/// Servo configuration sysex command (0x70)
pub const SERVO_CONFIG: u8 = 0x70;

// Firmware-defined timer peripheral extensions, user-reserved sysex IDs
/// Initialize the hardware timer (0x0A)
pub const TIMER_INITIALIZE: u8 = 0x0A;
/// Set the timer frequency in Hz (0x0B)
pub const TIMER_FREQUENCY: u8 = 0x0B;
/// Set the timer PWM duty cycle on a pin (0x0C)
pub const TIMER_PWM: u8 = 0x0C;

/// Default servo pulse width range in microseconds (Arduino Servo library
/// defaults).
const SERVO_MIN_PULSE: u16 = 544;
const SERVO_MAX_PULSE: u16 = 2400;

/// Pin modes the bridge configures at startup
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum PinMode {
    /// Digital output (0x01)
    Output = 0x01,
    /// PWM output (0x03)
    Pwm = 0x03,
    /// Servo output (0x04)
    Servo = 0x04,
}

/// Split a value into Firmata's 7-bit LSB/MSB pair.
///
/// Values are masked to 14 bits: the protocol carries no sign, and the
/// engine's extrapolated out-of-range positions pass through unvalidated.
#[inline]
pub fn encode_14bit(value: i32) -> (u8, u8) {
    let lsb = (value & 0x7F) as u8;
    let msb = ((value >> 7) & 0x7F) as u8;
    (lsb, msb)
}

/// Firmata client interface
///
/// Generic over the transport type, allowing real hardware (`SerialDriver`)
/// or mock transports for testing.
pub struct FirmataClient<T: SerialTransport + ?Sized = dyn SerialTransport> {
    transport: Box<T>,
}

impl FirmataClient<SerialDriver> {
    /// Create a client over a real serial driver
    pub fn new(driver: SerialDriver) -> Self {
        Self {
            transport: Box::new(driver),
        }
    }
}

impl<T: SerialTransport + ?Sized> FirmataClient<T> {
    /// Create a client with a boxed transport
    ///
    /// This is primarily useful for testing with mock transports.
    pub fn with_transport(transport: Box<T>) -> Self {
        Self { transport }
    }

    /// Configure a pin's mode
    pub async fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<()> {
        debug!("Set pin {} mode {:?}", pin, mode);
        self.transport
            .send(&[SET_PIN_MODE, pin & 0x7F, mode as u8])
            .await
    }

    /// Drive a digital pin high or low
    pub async fn digital_write(&mut self, pin: u8, level: bool) -> Result<()> {
        debug!("Digital write pin {} = {}", pin, level);
        self.transport
            .send(&[SET_DIGITAL_PIN_VALUE, pin & 0x7F, level as u8])
            .await
    }

    /// PWM write: for servo pins this commands the position
    pub async fn analog_write(&mut self, pin: u8, value: i32) -> Result<()> {
        debug!("Analog write pin {} = {}", pin, value);
        let (lsb, msb) = encode_14bit(value);
        self.transport
            .send(&[ANALOG_MESSAGE | (pin & 0x0F), lsb, msb])
            .await
    }

    /// Configure a PWM-capable pin as a servo output with the default pulse
    /// width range
    pub async fn servo_config(&mut self, pin: u8) -> Result<()> {
        debug!("Servo config pin {}", pin);
        let (min_lsb, min_msb) = encode_14bit(i32::from(SERVO_MIN_PULSE));
        let (max_lsb, max_msb) = encode_14bit(i32::from(SERVO_MAX_PULSE));
        self.transport
            .send(&[
                SYSEX_START,
                SERVO_CONFIG,
                pin & 0x7F,
                min_lsb,
                min_msb,
                max_lsb,
                max_msb,
                SYSEX_END,
            ])
            .await
    }

    /// Initialize the hardware timer driving the stepper
    pub async fn timer_initialize(&mut self) -> Result<()> {
        debug!("Timer initialize");
        self.transport
            .send(&[SYSEX_START, TIMER_INITIALIZE, SYSEX_END])
            .await
    }

    /// Set the timer frequency in Hz
    pub async fn timer_set_frequency(&mut self, hz: i32) -> Result<()> {
        debug!("Timer frequency {} Hz", hz);
        let (lsb, msb) = encode_14bit(hz);
        self.transport
            .send(&[SYSEX_START, TIMER_FREQUENCY, lsb, msb, SYSEX_END])
            .await
    }

    /// Set the timer PWM duty cycle (0-1023) on a pin
    pub async fn timer_pwm(&mut self, pin: u8, duty: u16) -> Result<()> {
        debug!("Timer PWM pin {} duty {}", pin, duty);
        let (lsb, msb) = encode_14bit(i32::from(duty));
        self.transport
            .send(&[SYSEX_START, TIMER_PWM, pin & 0x7F, lsb, msb, SYSEX_END])
            .await
    }

    /// Execute one engine command
    pub async fn apply(&mut self, command: ActuatorCommand) -> Result<()> {
        match command {
            ActuatorCommand::ServoWrite { pin, value } => self.analog_write(pin, value).await,
            ActuatorCommand::TimerFrequency(hz) => self.timer_set_frequency(hz).await,
            ActuatorCommand::TimerPwm { pin, duty } => self.timer_pwm(pin, duty).await,
        }
    }

    /// Whether the underlying transport still looks connected
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}
