//! Cryptographic primitives for SCP03 and SCP11
//!
//! Everything here is AES-128 based: the SCP03 counter mode KDF built on
//! AES-CMAC, C-MAC/R-MAC computation, the ICV derivation for command and
//! response encryption, and the X9.63 KDF SCP11 uses to turn the ECDH shared
//! secrets into session keys.

use aes::Aes128;
use cipher::{
    BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
    block_padding::{Iso7816, NoPadding},
    generic_array::GenericArray,
};
use cmac::{Cmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{Error, Result};

/// AES-128 key
pub type AesKey = [u8; 16];
/// Random challenge sent in INITIALIZE UPDATE
pub type HostChallenge = [u8; 8];
/// Challenge returned by the card in INITIALIZE UPDATE
pub type CardChallenge = [u8; 8];
/// Card or host authentication cryptogram
pub type Cryptogram = [u8; 8];
/// Full CMAC of the previous command, chained into the next one
pub type MacChain = [u8; 16];
/// Truncated C-MAC or R-MAC appended to a message
pub type ScpMac = [u8; 8];

/// AES block size
pub const BLOCK_SIZE: usize = 16;

/// Derivation constant for the card cryptogram
pub const DERIVATION_CARD_CRYPTOGRAM: u8 = 0x00;
/// Derivation constant for the host cryptogram
pub const DERIVATION_HOST_CRYPTOGRAM: u8 = 0x01;
/// Derivation constant for S-ENC
pub const DERIVATION_S_ENC: u8 = 0x04;
/// Derivation constant for S-MAC
pub const DERIVATION_S_MAC: u8 = 0x06;
/// Derivation constant for S-RMAC
pub const DERIVATION_S_RMAC: u8 = 0x07;

/// SCP11 key usage qualifier: C-MAC, R-MAC, C-DECRYPTION and R-ENCRYPTION
pub const SCP11_KEY_USAGE: u8 = 0x3C;
/// SCP11 key type: AES
pub const SCP11_KEY_TYPE: u8 = 0x88;
/// SCP11 session key length in bytes
pub const SCP11_KEY_LEN: u8 = 16;

fn cmac(key: &AesKey) -> Cmac<Aes128> {
    <Cmac<Aes128> as Mac>::new(GenericArray::from_slice(key))
}

/// SCP03 KDF in counter mode (NIST SP 800-108) with AES-CMAC as PRF
///
/// The derivation data is 11 zero bytes, the derivation constant `t`, a zero
/// separator, the output length in bits, the counter `01` and the context.
fn kdf(key: &AesKey, t: u8, context: &[u8], bits: u16) -> Cmac<Aes128> {
    let mut mac = cmac(key);
    mac.update(&[0u8; 11]);
    mac.update(&[t, 0x00]);
    mac.update(&bits.to_be_bytes());
    mac.update(&[0x01]);
    mac.update(context);
    mac
}

/// Derive a 128 bit session key from a static key
pub fn derive_key(key: &AesKey, t: u8, context: &[u8]) -> AesKey {
    kdf(key, t, context, 0x80).finalize().into_bytes().into()
}

/// Derive a 64 bit card or host cryptogram from S-MAC
pub fn derive_cryptogram(smac: &AesKey, t: u8, context: &[u8]) -> Cryptogram {
    let full = kdf(smac, t, context, 0x40).finalize().into_bytes();
    let mut cryptogram = Cryptogram::default();
    cryptogram.copy_from_slice(&full[..8]);
    cryptogram
}

/// Constant time check of a cryptogram received from the card
pub fn verify_cryptogram(smac: &AesKey, t: u8, context: &[u8], cryptogram: &[u8]) -> bool {
    kdf(smac, t, context, 0x40)
        .verify_truncated_left(cryptogram)
        .is_ok()
}

/// Full 16 byte AES-CMAC over the concatenation of `parts`
pub fn cmac_full(key: &AesKey, parts: &[&[u8]]) -> [u8; 16] {
    let mut mac = cmac(key);
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Constant time check of a truncated AES-CMAC over the concatenation of `parts`
pub fn verify_cmac(key: &AesKey, parts: &[&[u8]], expected: &[u8]) -> bool {
    let mut mac = cmac(key);
    for part in parts {
        mac.update(part);
    }
    mac.verify_truncated_left(expected).is_ok()
}

/// Encrypt one block in ECB mode, used to derive the ICV
pub fn encrypt_block(key: &AesKey, block: [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::from(block);
    cipher.encrypt_block(&mut block);
    block.into()
}

/// AES-CBC encrypt with ISO 7816-4 padding, which always adds at least one byte
pub fn cbc_encrypt_padded(key: &AesKey, iv: &[u8; BLOCK_SIZE], data: &[u8]) -> Vec<u8> {
    cbc::Encryptor::<Aes128>::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .encrypt_padded_vec_mut::<Iso7816>(data)
}

/// AES-CBC decrypt and strip ISO 7816-4 padding
pub fn cbc_decrypt_padded(key: &AesKey, iv: &[u8; BLOCK_SIZE], data: &[u8]) -> Result<Vec<u8>> {
    cbc::Decryptor::<Aes128>::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .decrypt_padded_vec_mut::<Iso7816>(data)
        .map_err(|_| Error::Crypto("Wrong padding".into()))
}

/// AES-CBC encrypt block aligned data with a zero IV
pub fn cbc_encrypt_aligned(key: &AesKey, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(Error::Crypto(format!(
            "Data of {} bytes is not a multiple of the block size",
            data.len()
        )));
    }
    let iv = [0u8; BLOCK_SIZE];
    Ok(
        cbc::Encryptor::<Aes128>::new(GenericArray::from_slice(key), GenericArray::from_slice(&iv))
            .encrypt_padded_vec_mut::<NoPadding>(data),
    )
}

/// ANSI X9.63 KDF over SHA-256 producing `count` AES-128 keys
pub fn x963_kdf(shared_secret: &[u8], shared_info: &[u8], count: usize) -> Vec<Zeroizing<AesKey>> {
    let mut output = Zeroizing::new(Vec::with_capacity(count * 16 + 32));
    let mut counter: u32 = 1;
    while output.len() < count * 16 {
        let digest = Sha256::new()
            .chain_update(shared_secret)
            .chain_update(counter.to_be_bytes())
            .chain_update(shared_info)
            .finalize();
        output.extend_from_slice(&digest);
        counter += 1;
    }
    output
        .chunks_exact(16)
        .take(count)
        .map(|chunk| {
            let mut key = Zeroizing::new(AesKey::default());
            key.copy_from_slice(chunk);
            key
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const KEY: AesKey = hex!("404142434445464748494A4B4C4D4E4F");
    const CONTEXT: [u8; 16] = hex!("360CB43F4301B894 CAAFA4DAC615236A");

    #[test]
    fn test_session_key_derivation() {
        assert_eq!(
            derive_key(&KEY, DERIVATION_S_ENC, &CONTEXT),
            hex!("7A3F4BB6F7081D7E25437674CCA306CB")
        );
        assert_eq!(
            derive_key(&KEY, DERIVATION_S_MAC, &CONTEXT),
            hex!("FC90AA67CDC5DABFD5051663045DFA23")
        );
        assert_eq!(
            derive_key(&KEY, DERIVATION_S_RMAC, &CONTEXT),
            hex!("38C0C6E3D0B6AED40FBB420B51399081")
        );
    }

    #[test]
    fn test_cryptograms() {
        let smac = hex!("FC90AA67CDC5DABFD5051663045DFA23");
        assert_eq!(
            derive_cryptogram(&smac, DERIVATION_CARD_CRYPTOGRAM, &CONTEXT),
            hex!("DD5607216F3E115C")
        );
        assert_eq!(
            derive_cryptogram(&smac, DERIVATION_HOST_CRYPTOGRAM, &CONTEXT),
            hex!("45330AB30BB1A079")
        );
        assert!(verify_cryptogram(
            &smac,
            DERIVATION_CARD_CRYPTOGRAM,
            &CONTEXT,
            &hex!("DD5607216F3E115C")
        ));
        assert!(!verify_cryptogram(
            &smac,
            DERIVATION_CARD_CRYPTOGRAM,
            &CONTEXT,
            &hex!("45330AB30BB1A079")
        ));
    }

    #[test]
    fn test_verify_cmac_truncated() {
        let full = cmac_full(&KEY, &[&hex!("0102")[..], &hex!("03")[..]]);
        assert!(verify_cmac(&KEY, &[&hex!("010203")[..]], &full[..8]));
        assert!(!verify_cmac(&KEY, &[&hex!("010204")[..]], &full[..8]));
        assert!(!verify_cmac(&KEY, &[&hex!("010203")[..]], &[]));
    }

    #[test]
    fn test_cbc_padding() {
        let iv = [0u8; BLOCK_SIZE];
        let encrypted = cbc_encrypt_padded(&KEY, &iv, &hex!("5F0102"));
        assert_eq!(encrypted.len(), 16);
        assert_eq!(
            cbc_decrypt_padded(&KEY, &iv, &encrypted).unwrap(),
            hex!("5F0102")
        );
        // A full block still gets a padding block
        assert_eq!(cbc_encrypt_padded(&KEY, &iv, &[0u8; 16]).len(), 32);
        assert!(cbc_decrypt_padded(&KEY, &iv, &[0u8; 15]).is_err());
    }

    #[test]
    fn test_cbc_aligned() {
        let data: [u8; 16] = core::array::from_fn(|i| i as u8);
        assert_eq!(
            cbc_encrypt_aligned(&KEY, &data).unwrap(),
            hex!("3D0FA4B855D2A5AA4954B8B5DF582A3A")
        );
        assert!(matches!(
            cbc_encrypt_aligned(&KEY, &[0u8; 17]),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_x963_kdf_rounds() {
        let keys = x963_kdf(&[0xAA; 64], &[SCP11_KEY_USAGE, SCP11_KEY_TYPE, SCP11_KEY_LEN], 5);
        assert_eq!(keys.len(), 5);

        let first = Sha256::new()
            .chain_update([0xAA; 64])
            .chain_update(1u32.to_be_bytes())
            .chain_update(hex!("3C8810"))
            .finalize();
        assert_eq!(keys[0].as_slice(), &first[..16]);
        assert_eq!(keys[1].as_slice(), &first[16..]);

        let third = Sha256::new()
            .chain_update([0xAA; 64])
            .chain_update(3u32.to_be_bytes())
            .chain_update(hex!("3C8810"))
            .finalize();
        assert_eq!(keys[4].as_slice(), &third[..16]);
    }
}
