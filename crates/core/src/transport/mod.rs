//! Connection traits for APDU communication with YubiKeys
//!
//! A connection moves raw frames between the host and the device. It has no
//! knowledge of APDU structure, chaining or secure messaging.

pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

use std::fmt;

use bytes::Bytes;
use derive_more::Display;
pub use error::TransportError;
use tracing::{debug, trace};

/// Physical interface a connection runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Transport {
    /// USB CCID
    #[display("USB")]
    Usb,
    /// NFC
    #[display("NFC")]
    Nfc,
}

/// Trait for raw smart card connections
///
/// At most one exchange is in flight at a time; callers serialize access.
pub trait SmartCardConnection: Send + fmt::Debug {
    /// Send one raw frame and return the raw response, status word included
    fn send_and_receive(&mut self, apdu: &[u8]) -> Result<Bytes, TransportError> {
        trace!(command = ?hex::encode(apdu), "Transmitting raw command");
        let result = self.do_send_and_receive(apdu);
        match &result {
            Ok(response) => {
                trace!(response = ?hex::encode(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of send_and_receive
    /// This is the method that concrete implementations should override
    fn do_send_and_receive(&mut self, apdu: &[u8]) -> Result<Bytes, TransportError>;

    /// The interface this connection uses
    fn transport(&self) -> Transport;

    /// Whether the reader and device accept extended length APDUs
    fn is_extended_length_supported(&self) -> bool;

    /// Answer to reset, passed through untouched
    fn atr(&self) -> Bytes;

    /// Close the connection; any later exchange fails with a transport error
    fn close(&mut self) -> Result<(), TransportError>;
}
