//! oscmata-hardware
//!
//! Hardware abstraction crate that contains the low-level serial driver and
//! the Firmata protocol client. The daemon uses it to push actuator output
//! to the microcontroller.
//
//! Public API:
//! - `firmata::FirmataClient` — high-level client encoding Firmata frames
//! - `serial_driver::SerialDriver` — low-level serial I/O driver
//! - `serial_driver::SerialTransport` — transport seam for mock-based tests

// Re-export modules so consumers can use `oscmata_hardware::FirmataClient`
// and `oscmata_hardware::SerialDriver`.
pub mod firmata;
pub mod serial_driver;

pub use firmata::{FirmataClient, PinMode};
pub use serial_driver::{SerialDriver, SerialTransport, FIRMATA_BAUD_RATE};
