//! Error type for driver operations.

use thiserror::Error;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Error type for the Grott driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Invalid or incomplete settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Broker connection or handshake failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish/subscribe failure on an open connection
    #[error("Communication error: {0}")]
    Communication(String),

    /// Payload could not be decoded or encoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Capability sink rejected an operation
    #[error("Capability error: {0}")]
    Capability(String),

    /// No open broker connection
    #[error("Not connected to a broker")]
    NotConnected,

    /// Operation timeout
    #[error("Operation timeout after {0}ms")]
    Timeout(u64),

    /// Other error
    #[error("Driver error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for DriverError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
