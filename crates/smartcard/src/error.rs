use yubikit_core::{StatusError, StatusWord};

/// Result type for smart card protocol operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for smart card protocol operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Transport, framing and response format errors
    #[error(transparent)]
    Core(#[from] yubikit_core::Error),

    /// Secure channel setup or secure messaging failed
    #[error(transparent)]
    Scp(#[from] yubikit_scp::Error),

    /// A command was answered with a non-success status word
    #[error("APDU error: {0}")]
    Apdu(StatusError),

    /// The application could not be selected
    #[error("Application not available: {0}")]
    ApplicationNotAvailable(StatusError),

    /// A status word the operation has no meaning for
    #[error("Unexpected status during {operation}: {status}")]
    UnexpectedStatus {
        /// Operation that failed
        operation: &'static str,
        /// Status the card answered with
        status: StatusError,
    },

    /// The device does not support the requested operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl Error {
    /// The status word carried by this error, if any
    pub fn status_word(&self) -> Option<StatusWord> {
        match self {
            Self::Core(err) => err.status_word(),
            Self::Scp(err) => err.status_word(),
            Self::Apdu(err) | Self::ApplicationNotAvailable(err) => Some(err.status),
            Self::UnexpectedStatus { status, .. } => Some(status.status),
            Self::Unsupported(_) => None,
        }
    }

    /// Whether the error was raised by the connection rather than the card
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Core(err) => err.is_transport(),
            Self::Scp(yubikit_scp::Error::Core(err)) => err.is_transport(),
            _ => false,
        }
    }
}
