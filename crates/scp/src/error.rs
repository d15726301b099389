use yubikit_core::{StatusError, StatusWord};

/// Result type for secure channel operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for secure channel operations
///
/// Cryptogram, receipt and response MAC failures surface as
/// [`yubikit_core::Error::AuthenticationFailed`] through [`Error::Core`], since
/// the secure processor reports them from inside the command pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Errors from the APDU layer, including authentication failures
    #[error(transparent)]
    Core(#[from] yubikit_core::Error),

    /// A handshake command was rejected by the card
    #[error(transparent)]
    Status(#[from] StatusError),

    /// The key parameters do not describe a usable key set
    #[error("Invalid key parameters: {0}")]
    InvalidKeyParams(String),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

impl Error {
    /// The status word carried by this error, if any
    pub fn status_word(&self) -> Option<StatusWord> {
        match self {
            Self::Core(err) => err.status_word(),
            Self::Status(err) => Some(err.status),
            _ => None,
        }
    }

    /// Whether the card or host rejected the secure channel authentication
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::Core(err) if matches!(err.root(), yubikit_core::Error::AuthenticationFailed(_))
        )
    }
}

impl From<Error> for yubikit_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Core(err) => err,
            Error::Status(err) => Self::Status(err),
            Error::InvalidKeyParams(msg) => Self::InvalidArgument(msg),
            Error::Crypto(msg) => Self::BadResponse(msg),
        }
    }
}
