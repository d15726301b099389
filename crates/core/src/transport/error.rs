//! Error types specific to smart card connections

/// Transport error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection error
    #[error("Failed to connect to device")]
    Connection,

    /// Transmission error
    #[error("Failed to transmit data")]
    Transmission,

    /// The connection was closed before or during the exchange
    #[error("Connection closed")]
    Closed,

    /// Device reported a failure
    #[error("Device error: {0}")]
    Device(String),

    /// Other error with message
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a new device error
    pub fn device<S: Into<String>>(message: S) -> Self {
        Self::Device(message.into())
    }

    /// Create a general other error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }
}
