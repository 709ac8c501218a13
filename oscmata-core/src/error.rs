//! Error types for the oscmata bridge

use thiserror::Error;

/// Core error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Hardware communication errors
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Network interface discovery or bind errors
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Parsing errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}
