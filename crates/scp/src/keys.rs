//! Static and session key material

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{
    AesKey, DERIVATION_S_ENC, DERIVATION_S_MAC, DERIVATION_S_RMAC, derive_key,
};

/// Key identifiers of the secure channel key sets
#[derive(Debug, Clone, Copy)]
pub struct ScpKid;

impl ScpKid {
    /// SCP03 pre-shared key set
    pub const SCP03: u8 = 0x01;
    /// SCP11a, mutual authentication with an OCE certificate chain
    pub const SCP11A: u8 = 0x11;
    /// SCP11b, card authentication only
    pub const SCP11B: u8 = 0x13;
    /// SCP11c, like SCP11a with offline scripting support
    pub const SCP11C: u8 = 0x15;

    /// Whether `kid` names one of the SCP11 variants
    pub const fn is_scp11(kid: u8) -> bool {
        matches!(kid, Self::SCP11A | Self::SCP11B | Self::SCP11C)
    }
}

/// Reference to a key on the card by key id and key version number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyRef {
    /// Key identifier
    pub kid: u8,
    /// Key version number
    pub kvn: u8,
}

impl KeyRef {
    /// Create a key reference
    pub const fn new(kid: u8, kvn: u8) -> Self {
        Self { kid, kvn }
    }
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyRef{{kid=0x{:02x}, kvn=0x{:02x}}}", self.kid, self.kvn)
    }
}

/// Pre-shared SCP03 key set
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StaticKeys {
    enc: AesKey,
    mac: AesKey,
    dek: Option<AesKey>,
}

const DEFAULT_KEY: AesKey = [
    0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4A, 0x4B, 0x4C, 0x4D, 0x4E, 0x4F,
];

impl StaticKeys {
    /// Create a key set from its encryption, MAC and optional data encryption keys
    pub const fn new(enc: AesKey, mac: AesKey, dek: Option<AesKey>) -> Self {
        Self { enc, mac, dek }
    }

    /// The publicly known factory key set
    pub const fn default_keys() -> Self {
        Self::new(DEFAULT_KEY, DEFAULT_KEY, Some(DEFAULT_KEY))
    }

    /// Whether a data encryption key is part of this set
    pub const fn has_dek(&self) -> bool {
        self.dek.is_some()
    }

    /// Derive session keys for the given host and card challenge context
    pub fn derive(&self, context: &[u8]) -> SessionKeys {
        SessionKeys {
            senc: derive_key(&self.enc, DERIVATION_S_ENC, context),
            smac: derive_key(&self.mac, DERIVATION_S_MAC, context),
            srmac: derive_key(&self.mac, DERIVATION_S_RMAC, context),
            dek: self.dek,
        }
    }
}

impl fmt::Debug for StaticKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeys")
            .field("dek", &self.dek.is_some())
            .finish_non_exhaustive()
    }
}

/// Keys fixed for the lifetime of one secure channel session
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub(crate) senc: AesKey,
    pub(crate) smac: AesKey,
    pub(crate) srmac: AesKey,
    pub(crate) dek: Option<AesKey>,
}

impl SessionKeys {
    /// Create session keys from their parts
    pub const fn new(senc: AesKey, smac: AesKey, srmac: AesKey, dek: Option<AesKey>) -> Self {
        Self {
            senc,
            smac,
            srmac,
            dek,
        }
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("dek", &self.dek.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_derive_default_keys() {
        let keys = StaticKeys::default_keys();
        assert!(keys.has_dek());

        let session = keys.derive(&hex!("360CB43F4301B894 CAAFA4DAC615236A"));
        assert_eq!(session.senc, hex!("7A3F4BB6F7081D7E25437674CCA306CB"));
        assert_eq!(session.smac, hex!("FC90AA67CDC5DABFD5051663045DFA23"));
        assert_eq!(session.srmac, hex!("38C0C6E3D0B6AED40FBB420B51399081"));
        assert_eq!(session.dek, Some(DEFAULT_KEY));
    }

    #[test]
    fn test_debug_hides_key_material() {
        let debug = format!("{:?}", StaticKeys::default_keys());
        assert!(!debug.contains("64"));
        assert!(debug.contains("StaticKeys"));
    }

    #[test]
    fn test_zeroize_wipes_session_keys() {
        let mut session = StaticKeys::default_keys().derive(&[0u8; 16]);
        session.zeroize();
        assert_eq!(session.senc, [0u8; 16]);
        assert_eq!(session.dek, None);
    }

    #[test]
    fn test_key_ref_display() {
        assert_eq!(KeyRef::new(0x13, 0x01).to_string(), "KeyRef{kid=0x13, kvn=0x01}");
        assert!(ScpKid::is_scp11(ScpKid::SCP11B));
        assert!(!ScpKid::is_scp11(ScpKid::SCP03));
    }
}
