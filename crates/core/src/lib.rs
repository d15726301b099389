//! Core types for exchanging APDUs with YubiKey smart card applications
//!
//! This crate provides the transport-agnostic half of the YubiKey smart card
//! stack according to ISO/IEC 7816-4.
//!
//! ## Overview
//!
//! - [`Apdu`] and [`ApduResponse`] describe one logical command and its reply
//! - [`ApduFormatter`] turns a command into short or extended wire frames
//! - [`processor`] holds the pipeline that performs command chaining, response
//!   chaining and the touch workaround over a [`SmartCardConnection`]
//! - [`tlv`] encodes and decodes the BER-TLV records payloads are built from
//! - [`Version`] drives firmware-specific behaviour
//!
//! Secure messaging lives in `yubikit-scp` and the application-facing protocol
//! in `yubikit-smartcard`.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod formatter;
pub mod processor;
pub mod response;
pub mod tlv;
pub mod transport;
pub mod version;

mod error;
pub use error::{Error, Result, ResultExt};

pub use command::Apdu;
pub use formatter::{ApduFormat, ApduFormatter, MaxApduSize};
pub use processor::{CommandProcessor, PipelineConfig, ProcessorPipeline};
pub use response::{ApduResponse, StatusError, status::StatusWord};
pub use tlv::{Tlv, TlvMap};
pub use transport::{SmartCardConnection, Transport, TransportError};
pub use version::Version;

#[cfg(any(test, feature = "mock"))]
pub use transport::mock::MockConnection;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Apdu, ApduFormat, ApduResponse, Bytes, BytesMut, CommandProcessor, Error, Result,
        ResultExt, SmartCardConnection, StatusWord, Tlv, Transport, Version,
        response::status::common,
    };
}
