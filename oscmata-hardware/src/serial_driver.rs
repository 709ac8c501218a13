//! Serial driver for low-level hardware communication
//!
//! Provides async serial I/O toward the microcontroller running the
//! Firmata-style firmware.

use async_trait::async_trait;
use oscmata_core::{BridgeError, Result};
use std::time::Duration;
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error};

/// Baud rate of the Firmata firmware's serial link.
pub const FIRMATA_BAUD_RATE: u32 = 57_600;

/// Trait for serial transport abstraction
///
/// This trait enables testing of `FirmataClient` without real hardware
/// by allowing mock implementations.
#[async_trait]
pub trait SerialTransport: Send {
    /// Write one protocol frame to the wire
    async fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Check if the transport is connected
    fn is_connected(&self) -> bool;

    /// Get the port path for diagnostics
    fn port_path(&self) -> Option<&str>;
}

/// Serial driver for hardware communication
#[derive(Debug)]
pub struct SerialDriver {
    port: SerialStream,
    port_path: String,
    timeout_duration: Duration,
}

impl SerialDriver {
    /// Open the serial device.
    ///
    /// # Arguments
    /// * `port_path` - Path to the serial device (e.g., "/dev/ttyATH0")
    /// * `timeout_ms` - Timeout in milliseconds for write operations
    pub fn new(port_path: &str, timeout_ms: u64) -> Result<Self> {
        debug!("Opening serial port: {}", port_path);

        let port = tokio_serial::new(port_path, FIRMATA_BAUD_RATE)
            .timeout(Duration::from_millis(timeout_ms))
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                error!("Failed to open serial port {}: {}", port_path, e);
                BridgeError::Serial(format!("Failed to open serial port: {}", e))
            })?;

        debug!("Serial port opened successfully");

        Ok(Self {
            port,
            port_path: port_path.to_string(),
            timeout_duration: Duration::from_millis(timeout_ms),
        })
    }
}

#[async_trait]
impl SerialTransport for SerialDriver {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        debug!("TX: {:02X?}", frame);

        timeout(self.timeout_duration, self.port.write_all(frame))
            .await
            .map_err(|_| {
                error!("Write timeout");
                BridgeError::Timeout("Write operation timed out".to_string())
            })?
            .map_err(|e| {
                error!("Write failed: {}", e);
                BridgeError::Serial(format!("Write failed: {}", e))
            })?;

        // Flush to ensure the frame reaches the wire
        timeout(self.timeout_duration, self.port.flush())
            .await
            .map_err(|_| BridgeError::Timeout("Flush operation timed out".to_string()))?
            .map_err(|e| BridgeError::Serial(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        // Disconnection surfaces as write errors; SerialStream has no
        // direct "is open" check
        true
    }

    fn port_path(&self) -> Option<&str> {
        Some(&self.port_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device_fails() {
        let result = SerialDriver::new("/dev/does-not-exist", 100);
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), BridgeError::Serial(_)));
    }
}
