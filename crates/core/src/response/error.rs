//! Error carried by a non-success status word

use bytes::Bytes;

use super::status::StatusWord;

/// A card reply whose status word is not 90 00, with any data it carried
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Status error {status}: {}", .status.description())]
pub struct StatusError {
    /// Status word that caused the error
    pub status: StatusWord,
    /// Response data returned alongside the status word
    pub data: Bytes,
}

impl StatusError {
    /// Create a new status error without data
    pub const fn new(status: StatusWord) -> Self {
        Self {
            status,
            data: Bytes::new(),
        }
    }

    /// Create a new status error carrying response data
    pub const fn with_data(status: StatusWord, data: Bytes) -> Self {
        Self { status, data }
    }

    /// Get the status word
    pub const fn status_word(&self) -> StatusWord {
        self.status
    }
}
