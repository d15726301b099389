//! Core error type for all APDU operations
//!
//! Every fallible operation in this crate returns [`Error`]. The variants mirror
//! the failure classes a caller needs to tell apart: transport failures, status
//! words reported by the card, malformed responses and precondition violations
//! caught before any I/O happens.

use crate::response::StatusError;
use crate::response::status::StatusWord;
use crate::transport::TransportError;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Core error type that encompasses all possible errors in the crate
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    //
    // Transport related errors
    //
    /// The underlying connection failed or was closed
    #[error(transparent)]
    Transport(#[from] TransportError),

    //
    // Response related errors
    //
    /// The card answered with a non-success status word
    #[error(transparent)]
    Status(#[from] StatusError),

    /// The response could not be parsed (too short, malformed TLV, bad padding)
    #[error("Bad response: {0}")]
    BadResponse(String),

    //
    // Command related errors
    //
    /// A caller supplied a value outside of its allowed range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The formatted APDU does not fit in a single frame
    #[error("APDU too long: {length} bytes exceeds the maximum of {max}")]
    ApduTooLong {
        /// Length of the frame that would have been sent
        length: usize,
        /// Largest frame the active formatter accepts
        max: usize,
    },

    /// The connected device does not support the requested feature
    #[error("Not supported: {0}")]
    NotSupported(String),

    //
    // Secure channel errors
    //
    /// A secure channel cryptogram or MAC did not verify
    #[error("Secure channel authentication failed: {0}")]
    AuthenticationFailed(&'static str),

    /// The secure channel was torn down and cannot protect further commands
    #[error("Secure channel is closed")]
    SecureChannelClosed,

    //
    // General errors
    //
    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a new bad response error
    pub fn bad_response<S: Into<String>>(message: S) -> Self {
        Self::BadResponse(message.into())
    }

    /// Create a new invalid argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a new status error without response data
    pub fn status(status: impl Into<StatusWord>) -> Self {
        Self::Status(StatusError::new(status.into()))
    }

    /// The innermost error, looking through any added context
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// The status word carried by this error, if any
    pub fn status_word(&self) -> Option<StatusWord> {
        match self.root() {
            Self::Status(err) => Some(err.status),
            _ => None,
        }
    }

    /// Whether this error was raised by the transport rather than the card
    pub fn is_transport(&self) -> bool {
        matches!(self.root(), Self::Transport(_))
    }
}

/// Extension trait for Result with APDU Errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T, Error>;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_word_through_context() {
        let err = Error::status(0x6A82u16).with_context("Selecting application");
        assert_eq!(err.status_word(), Some(StatusWord::new(0x6A, 0x82)));
        assert!(!err.is_transport());
        assert_eq!(
            err.to_string(),
            "Selecting application: Status error 6A 82: File not found"
        );
    }

    #[test]
    fn test_transport_classification() {
        let err: Error = TransportError::Closed.into();
        assert!(err.is_transport());
        assert_eq!(err.status_word(), None);
    }
}
