//! Application-facing smart card protocol for YubiKeys
//!
//! [`SmartCardProtocol`] wraps a [`SmartCardConnection`](yubikit_core::SmartCardConnection)
//! and is what application sessions (OATH, PIV, OpenPGP, management) send their
//! commands through. It selects applications, adapts APDU framing to the
//! firmware version and can upgrade the session to an SCP03 or SCP11 secure
//! channel.
//!
//! ```ignore
//! let mut protocol = SmartCardProtocol::new(connection);
//! protocol.select(&OATH_AID)?;
//! protocol.configure(version, ProtocolOptions::ykoath());
//! let data = protocol.send_and_receive(&Apdu::new(0x00, 0xA1, 0x00, 0x00))?;
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod options;
pub mod protocol;

mod error;
pub use error::{Error, Result};

pub use options::ProtocolOptions;
pub use protocol::SmartCardProtocol;

// Re-export the secure channel parameters callers build for init_scp
pub use yubikit_scp::{DataEncryptor, Scp03KeyParams, Scp11KeyParams, ScpKeyParams};
