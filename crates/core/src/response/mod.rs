//! APDU response definitions
//!
//! A response is the data returned by the card followed by the two byte
//! status word. Reassembled chained responses use the same type.

pub mod error;
pub mod status;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

pub use error::StatusError;
use status::StatusWord;

use crate::{Error, Result};

/// Basic APDU response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data, without the status word
    data: Bytes,
    /// Status word
    status: StatusWord,
}

impl ApduResponse {
    /// Create a new response with data and status
    pub fn new(data: impl Into<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            data: data.into(),
            status: status.into(),
        }
    }

    /// Create a success response
    pub const fn success(data: Bytes) -> Self {
        Self {
            data,
            status: status::common::SUCCESS,
        }
    }

    /// Parse a response from raw bytes (including status word)
    ///
    /// Frames shorter than two bytes cannot carry a status word and are
    /// rejected as a bad response.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let Some(split) = raw.len().checked_sub(2) else {
            return Err(Error::bad_response(format!(
                "Response of {} bytes is too short to hold a status word",
                raw.len()
            )));
        };
        let status = StatusWord::new(raw[split], raw[split + 1]);

        trace!(
            sw1 = format_args!("{:#04x}", status.sw1),
            sw2 = format_args!("{:#04x}", status.sw2),
            data_len = split,
            "Parsed APDU response"
        );

        Ok(Self {
            data: Bytes::copy_from_slice(&raw[..split]),
            status,
        })
    }

    /// Response data
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Take the response data
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Status word as a 16-bit value
    pub const fn sw(&self) -> u16 {
        self.status.to_u16()
    }

    /// Check if the response indicates success
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Return the data on success, or a [`StatusError`] carrying status and data
    pub fn into_result(self) -> Result<Bytes, StatusError> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(StatusError::with_data(self.status, self.data))
        }
    }

    /// Serialize back to data followed by the status word
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 2);
        buf.put_slice(&self.data);
        buf.put_u16(self.status.to_u16());
        buf.freeze()
    }
}

impl TryFrom<&[u8]> for ApduResponse {
    type Error = Error;

    fn try_from(data: &[u8]) -> Result<Self> {
        Self::from_bytes(data)
    }
}

impl From<ApduResponse> for Bytes {
    fn from(response: ApduResponse) -> Self {
        response.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_response_from_bytes() {
        let resp = ApduResponse::from_bytes(&hex!("010203 9000")).unwrap();
        assert_eq!(resp.data().as_ref(), &hex!("010203"));
        assert_eq!(resp.sw(), 0x9000);
        assert!(resp.is_success());

        let resp = ApduResponse::from_bytes(&hex!("6A82")).unwrap();
        assert!(resp.data().is_empty());
        assert_eq!(resp.status(), StatusWord::new(0x6A, 0x82));
        assert!(!resp.is_success());
    }

    #[test]
    fn test_response_too_short() {
        assert!(matches!(
            ApduResponse::from_bytes(&[0x90]),
            Err(Error::BadResponse(_))
        ));
        assert!(ApduResponse::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_response_into_result() {
        let ok = ApduResponse::success(Bytes::from_static(&hex!("0102")));
        assert_eq!(ok.into_result().unwrap().as_ref(), &hex!("0102"));

        let err = ApduResponse::new(Bytes::from_static(&hex!("AA")), 0x6982u16)
            .into_result()
            .unwrap_err();
        assert_eq!(err.status.to_u16(), 0x6982);
        assert_eq!(err.data.as_ref(), &hex!("AA"));
    }

    #[test]
    fn test_response_to_bytes() {
        let resp = ApduResponse::new(Bytes::from_static(&hex!("CAFE")), StatusWord::new(0x61, 0x10));
        assert_eq!(resp.to_bytes().as_ref(), &hex!("CAFE 6110"));
    }
}
