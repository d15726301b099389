//! Secure Channel Protocol for YubiKey smart card applications
//!
//! This crate implements GlobalPlatform SCP03 (pre-shared AES keys) and SCP11
//! (elliptic curve key agreement, variants a, b and c) on top of the command
//! pipeline from `yubikit-core`.
//!
//! A session is set up in two steps. A handshake function on [`ScpState`]
//! exchanges the plain handshake commands and derives the session keys, then
//! an [`ScpProcessor`] wrapping that state becomes the head of a new pipeline.
//! From then on every command is encrypted and MAC'ed, and every response is
//! verified and decrypted. A response MAC mismatch closes the session for good.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod constants;
pub mod crypto;
pub mod keys;
pub mod params;
pub mod processor;
pub mod state;

mod error;
pub use error::{Error, Result};

pub use keys::{KeyRef, ScpKid, SessionKeys, StaticKeys};
pub use params::{Scp03KeyParams, Scp11KeyParams, ScpKeyParams};
pub use processor::ScpProcessor;
pub use state::{DataEncryptor, ScpPhase, ScpState};

// Re-export the curve types SCP11 parameters are built from
pub use p256::{PublicKey, SecretKey};
