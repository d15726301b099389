//! Key parameters selecting and configuring a secure channel variant

use bytes::Bytes;
use p256::{PublicKey, SecretKey};

use crate::keys::{KeyRef, ScpKid, StaticKeys};
use crate::{Error, Result};

/// Parameters for an SCP03 session
#[derive(Debug, Clone)]
pub struct Scp03KeyParams {
    key_ref: KeyRef,
    keys: StaticKeys,
}

impl Scp03KeyParams {
    /// Create SCP03 parameters, the key id must be [`ScpKid::SCP03`]
    pub fn new(key_ref: KeyRef, keys: StaticKeys) -> Result<Self> {
        if key_ref.kid != ScpKid::SCP03 {
            return Err(Error::InvalidKeyParams(format!(
                "SCP03 requires key id 0x01, got {key_ref}"
            )));
        }
        Ok(Self { key_ref, keys })
    }

    /// Reference of the key set on the card
    pub const fn key_ref(&self) -> KeyRef {
        self.key_ref
    }

    /// The static key set
    pub const fn keys(&self) -> &StaticKeys {
        &self.keys
    }
}

/// Parameters for an SCP11a, SCP11b or SCP11c session
///
/// SCP11b authenticates the card only and takes no off-card entity (OCE)
/// material. SCP11a and SCP11c additionally authenticate the host and need the
/// OCE key reference, its private key and the certificate chain ending in the
/// OCE certificate, each certificate DER encoded.
#[derive(Debug, Clone)]
pub struct Scp11KeyParams {
    key_ref: KeyRef,
    pk_sd_ecka: PublicKey,
    oce_key_ref: Option<KeyRef>,
    sk_oce_ecka: Option<SecretKey>,
    certificates: Vec<Bytes>,
}

impl Scp11KeyParams {
    /// Create SCP11 parameters, validating them against the variant the key id selects
    pub fn new(
        key_ref: KeyRef,
        pk_sd_ecka: PublicKey,
        oce_key_ref: Option<KeyRef>,
        sk_oce_ecka: Option<SecretKey>,
        certificates: Vec<Bytes>,
    ) -> Result<Self> {
        match key_ref.kid {
            ScpKid::SCP11B => {
                if oce_key_ref.is_some() || sk_oce_ecka.is_some() || !certificates.is_empty() {
                    return Err(Error::InvalidKeyParams(
                        "SCP11b takes no OCE key reference, OCE private key or certificates".into(),
                    ));
                }
            }
            ScpKid::SCP11A | ScpKid::SCP11C => {
                if oce_key_ref.is_none() || sk_oce_ecka.is_none() || certificates.is_empty() {
                    return Err(Error::InvalidKeyParams(
                        "SCP11a and SCP11c need an OCE key reference, OCE private key and certificates".into(),
                    ));
                }
            }
            _ => {
                return Err(Error::InvalidKeyParams(format!(
                    "Key id of {key_ref} is not an SCP11 key"
                )));
            }
        }

        Ok(Self {
            key_ref,
            pk_sd_ecka,
            oce_key_ref,
            sk_oce_ecka,
            certificates,
        })
    }

    /// Convenience constructor for SCP11b
    pub fn scp11b(key_ref: KeyRef, pk_sd_ecka: PublicKey) -> Result<Self> {
        Self::new(key_ref, pk_sd_ecka, None, None, Vec::new())
    }

    /// Reference of the security domain key
    pub const fn key_ref(&self) -> KeyRef {
        self.key_ref
    }

    /// Static public key of the security domain
    pub const fn pk_sd_ecka(&self) -> &PublicKey {
        &self.pk_sd_ecka
    }

    /// Reference of the OCE key, SCP11a/c only
    pub const fn oce_key_ref(&self) -> Option<KeyRef> {
        self.oce_key_ref
    }

    /// Private key of the OCE, SCP11a/c only
    pub const fn sk_oce_ecka(&self) -> Option<&SecretKey> {
        self.sk_oce_ecka.as_ref()
    }

    /// Certificate chain, leaf last
    pub fn certificates(&self) -> &[Bytes] {
        &self.certificates
    }
}

/// Key parameters for any supported secure channel
#[derive(Debug, Clone)]
pub enum ScpKeyParams {
    /// Symmetric SCP03
    Scp03(Scp03KeyParams),
    /// Elliptic curve based SCP11
    Scp11(Scp11KeyParams),
}

impl ScpKeyParams {
    /// Reference of the card key the session is established with
    pub const fn key_ref(&self) -> KeyRef {
        match self {
            Self::Scp03(params) => params.key_ref(),
            Self::Scp11(params) => params.key_ref(),
        }
    }
}

impl From<Scp03KeyParams> for ScpKeyParams {
    fn from(params: Scp03KeyParams) -> Self {
        Self::Scp03(params)
    }
}

impl From<Scp11KeyParams> for ScpKeyParams {
    fn from(params: Scp11KeyParams) -> Self {
        Self::Scp11(params)
    }
}
