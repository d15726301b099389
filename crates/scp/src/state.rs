//! Secure channel session state
//!
//! [`ScpState`] owns the session keys, the MAC chaining value and the
//! encryption counter of one session. It is created by one of the handshakes
//! and then driven by [`ScpProcessor`](crate::ScpProcessor) for every command.

use std::fmt;

use bytes::Bytes;
use p256::{PublicKey, SecretKey, ecdh::diffie_hellman, elliptic_curve::sec1::ToEncodedPoint};
use rand::RngCore;
use tracing::{debug, instrument, trace, warn};
use yubikit_core::{
    Apdu, CommandProcessor, SmartCardConnection, StatusWord, Tlv,
    tlv::{self, decode_list},
};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::constants::{PSO_MORE_CERTIFICATES, SCP11_IDENTIFIER, cla, ins, tags};
use crate::crypto::{
    AesKey, BLOCK_SIZE, CardChallenge, Cryptogram, DERIVATION_CARD_CRYPTOGRAM,
    DERIVATION_HOST_CRYPTOGRAM, HostChallenge, MacChain, SCP11_KEY_LEN, SCP11_KEY_TYPE,
    SCP11_KEY_USAGE, ScpMac, cbc_decrypt_padded, cbc_encrypt_aligned, cbc_encrypt_padded,
    cmac_full, derive_cryptogram, encrypt_block, verify_cmac, verify_cryptogram, x963_kdf,
};
use crate::keys::{KeyRef, ScpKid, SessionKeys};
use crate::params::{Scp03KeyParams, Scp11KeyParams};
use crate::{Error, Result};

/// Length of the INITIALIZE UPDATE response up to and including the card cryptogram
const INITIALIZE_UPDATE_RESPONSE_LEN: usize = 10 + 3 + 8 + 8;

/// Lifecycle of a secure channel session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScpPhase {
    /// Keys are derived but the card has not yet accepted the host
    Handshaking,
    /// Both sides are authenticated
    Established,
    /// Keys were wiped, no further command can be protected
    Closed,
}

/// Key material and counters of one secure channel session
pub struct ScpState {
    keys: SessionKeys,
    mac_chain: MacChain,
    enc_counter: u32,
    phase: ScpPhase,
}

impl ScpState {
    /// Create a session from derived keys and the initial MAC chaining value
    pub const fn new(keys: SessionKeys, mac_chain: MacChain) -> Self {
        Self {
            keys,
            mac_chain,
            enc_counter: 1,
            phase: ScpPhase::Handshaking,
        }
    }

    /// Current phase
    pub const fn phase(&self) -> ScpPhase {
        self.phase
    }

    /// Whether the session was closed
    pub const fn is_closed(&self) -> bool {
        matches!(self.phase, ScpPhase::Closed)
    }

    pub(crate) fn establish(&mut self) {
        if !self.is_closed() {
            self.phase = ScpPhase::Established;
        }
    }

    fn ensure_open(&self) -> yubikit_core::Result<()> {
        if self.is_closed() {
            return Err(yubikit_core::Error::SecureChannelClosed);
        }
        Ok(())
    }

    /// Encrypt command data under S-ENC, advancing the encryption counter
    pub fn encrypt(&mut self, data: &[u8]) -> yubikit_core::Result<Vec<u8>> {
        let encrypted = self.encrypt_pending(data)?;
        self.commit_encryption();
        Ok(encrypted)
    }

    /// Encrypt command data under the current counter without consuming it
    ///
    /// The counter must be advanced with [`commit_encryption`](Self::commit_encryption)
    /// once the command is known to go out.
    pub(crate) fn encrypt_pending(&self, data: &[u8]) -> yubikit_core::Result<Vec<u8>> {
        self.ensure_open()?;
        let mut block = [0u8; BLOCK_SIZE];
        block[12..].copy_from_slice(&self.enc_counter.to_be_bytes());
        let iv = Zeroizing::new(encrypt_block(&self.keys.senc, block));
        trace!(len = data.len(), "Encrypting command data");
        Ok(cbc_encrypt_padded(&self.keys.senc, &iv, data))
    }

    pub(crate) const fn commit_encryption(&mut self) {
        self.enc_counter = self.enc_counter.wrapping_add(1);
    }

    /// Decrypt response data under S-ENC, using the counter of the last command
    pub fn decrypt(&self, encrypted: &[u8]) -> yubikit_core::Result<Bytes> {
        self.ensure_open()?;
        let mut block = [0u8; BLOCK_SIZE];
        block[0] = 0x80;
        block[12..].copy_from_slice(&self.enc_counter.wrapping_sub(1).to_be_bytes());
        let iv = Zeroizing::new(encrypt_block(&self.keys.senc, block));
        let decrypted = cbc_decrypt_padded(&self.keys.senc, &iv, encrypted)?;
        trace!(len = decrypted.len(), "Decrypted response data");
        Ok(Bytes::from(decrypted))
    }

    /// Compute the C-MAC of a formatted command and chain it
    pub fn mac(&mut self, data: &[u8]) -> yubikit_core::Result<ScpMac> {
        self.ensure_open()?;
        self.mac_chain = cmac_full(&self.keys.smac, &[&self.mac_chain[..], data]);
        let mut mac = ScpMac::default();
        mac.copy_from_slice(&self.mac_chain[..8]);
        Ok(mac)
    }

    /// Verify and strip the R-MAC of response data
    ///
    /// A mismatch closes the session.
    pub fn unmac(&mut self, data: &[u8], sw: u16) -> yubikit_core::Result<Bytes> {
        self.ensure_open()?;
        let Some(split) = data.len().checked_sub(8) else {
            return Err(yubikit_core::Error::bad_response(format!(
                "Response of {} bytes is too short to carry a MAC",
                data.len()
            )));
        };
        let (message, rmac) = data.split_at(split);
        if !verify_cmac(
            &self.keys.srmac,
            &[&self.mac_chain[..], message, &sw.to_be_bytes()[..]],
            rmac,
        ) {
            warn!(sw = %StatusWord::from_u16(sw), "Response MAC mismatch, closing secure channel");
            self.close();
            return Err(yubikit_core::Error::AuthenticationFailed("Wrong MAC"));
        }
        Ok(Bytes::copy_from_slice(message))
    }

    /// Encryptor for out-of-band data under the session DEK, if there is one
    pub fn data_encryptor(&self) -> Option<DataEncryptor> {
        if self.is_closed() {
            return None;
        }
        self.keys.dek.map(|dek| DataEncryptor { dek })
    }

    /// Wipe the key material and refuse any further use
    pub fn close(&mut self) {
        if !self.is_closed() {
            debug!("Closing secure channel");
        }
        self.keys.zeroize();
        self.mac_chain.zeroize();
        self.enc_counter = 0;
        self.phase = ScpPhase::Closed;
    }

    /// Run the first half of the SCP03 handshake
    ///
    /// Sends INITIALIZE UPDATE through `processor`, verifies the card cryptogram
    /// and returns the new state along with the host cryptogram, which the
    /// caller sends through [`ScpProcessor::authenticate`](crate::ScpProcessor::authenticate).
    /// A random host challenge is used unless one is given.
    #[instrument(skip_all, fields(key_ref = %params.key_ref()))]
    pub fn scp03_init(
        processor: &mut dyn CommandProcessor,
        connection: &mut dyn SmartCardConnection,
        params: &Scp03KeyParams,
        host_challenge: Option<HostChallenge>,
    ) -> Result<(Self, Cryptogram)> {
        let host_challenge = host_challenge.unwrap_or_else(|| {
            let mut challenge = HostChallenge::default();
            rand::rng().fill_bytes(&mut challenge);
            challenge
        });

        let apdu = Apdu::new(cla::GP, ins::INITIALIZE_UPDATE, params.key_ref().kvn, 0x00)
            .with_data(Bytes::copy_from_slice(&host_challenge));
        let response = processor
            .process_command(&apdu, connection)?
            .into_result()?;

        if response.len() < INITIALIZE_UPDATE_RESPONSE_LEN {
            return Err(yubikit_core::Error::bad_response(format!(
                "INITIALIZE UPDATE response of {} bytes, expected at least {}",
                response.len(),
                INITIALIZE_UPDATE_RESPONSE_LEN
            ))
            .into());
        }
        trace!(key_info = %hex::encode(&response[10..13]), "INITIALIZE UPDATE accepted");

        let mut card_challenge = CardChallenge::default();
        card_challenge.copy_from_slice(&response[13..21]);
        let card_cryptogram = &response[21..29];

        let mut context = [0u8; 16];
        context[..8].copy_from_slice(&host_challenge);
        context[8..].copy_from_slice(&card_challenge);

        let keys = params.keys().derive(&context);
        if !verify_cryptogram(
            &keys.smac,
            DERIVATION_CARD_CRYPTOGRAM,
            &context,
            card_cryptogram,
        ) {
            debug!("Card cryptogram mismatch");
            return Err(yubikit_core::Error::AuthenticationFailed("Wrong SCP03 key set").into());
        }

        let host_cryptogram = derive_cryptogram(&keys.smac, DERIVATION_HOST_CRYPTOGRAM, &context);
        debug!("Card authenticated, SCP03 keys derived");
        Ok((Self::new(keys, MacChain::default()), host_cryptogram))
    }

    /// Run the SCP11 handshake
    ///
    /// For SCP11a and SCP11c the OCE certificate chain is uploaded first. The
    /// returned state is already established: the receipt both authenticates
    /// the card and seeds the MAC chain.
    #[instrument(skip_all, fields(key_ref = %params.key_ref()))]
    pub fn scp11_init(
        processor: &mut dyn CommandProcessor,
        connection: &mut dyn SmartCardConnection,
        params: &Scp11KeyParams,
    ) -> Result<Self> {
        let KeyRef { kid, kvn } = params.key_ref();
        let scp_params = match kid {
            ScpKid::SCP11A => 0b01,
            ScpKid::SCP11B => 0b00,
            ScpKid::SCP11C => 0b11,
            _ => {
                return Err(Error::InvalidKeyParams(format!(
                    "Key id {kid:#04x} is not an SCP11 key"
                )));
            }
        };

        if kid != ScpKid::SCP11B {
            upload_certificates(processor, connection, params)?;
        }

        let esk_oce = SecretKey::random(&mut rand_v8::thread_rng());
        let epk_oce = esk_oce.public_key().to_encoded_point(false);

        let control_reference = tlv::encode_list(&[
            Tlv::new(tags::SCP_IDENTIFIER, vec![SCP11_IDENTIFIER, scp_params])?,
            Tlv::new(tags::KEY_USAGE, vec![SCP11_KEY_USAGE])?,
            Tlv::new(tags::KEY_TYPE, vec![SCP11_KEY_TYPE])?,
            Tlv::new(tags::KEY_LENGTH, vec![SCP11_KEY_LEN])?,
        ]);
        let data = tlv::encode_list(&[
            Tlv::new(tags::CONTROL_REFERENCE, control_reference)?,
            Tlv::new(tags::EPHEMERAL_KEY, epk_oce.as_bytes().to_vec())?,
        ]);

        let instruction = if kid == ScpKid::SCP11B {
            ins::INTERNAL_AUTHENTICATE
        } else {
            ins::EXTERNAL_AUTHENTICATE
        };
        let apdu = Apdu::new(cla::GP, instruction, kvn, kid).with_data(data.clone());
        let response = processor
            .process_command(&apdu, connection)?
            .into_result()?;

        let tlvs = decode_list(&response)?;
        let [epk_sd_tlv, receipt_tlv, ..] = tlvs.as_slice() else {
            return Err(yubikit_core::Error::bad_response(format!(
                "Authenticate response holds {} TLVs, expected 2",
                tlvs.len()
            ))
            .into());
        };
        if epk_sd_tlv.tag() != tags::EPHEMERAL_KEY || receipt_tlv.tag() != tags::RECEIPT {
            return Err(yubikit_core::Error::bad_response(format!(
                "Unexpected tags {:#x} and {:#x} in authenticate response",
                epk_sd_tlv.tag(),
                receipt_tlv.tag()
            ))
            .into());
        }
        let epk_sd = PublicKey::from_sec1_bytes(epk_sd_tlv.value())
            .map_err(|_| Error::Crypto("Invalid ephemeral security domain key".into()))?;

        let static_sk = params.sk_oce_ecka().unwrap_or(&esk_oce);
        let ka1 = diffie_hellman(esk_oce.to_nonzero_scalar(), epk_sd.as_affine());
        let ka2 = diffie_hellman(static_sk.to_nonzero_scalar(), params.pk_sd_ecka().as_affine());

        let mut key_material = Zeroizing::new(Vec::with_capacity(64));
        key_material.extend_from_slice(ka1.raw_secret_bytes());
        key_material.extend_from_slice(ka2.raw_secret_bytes());

        let keys = x963_kdf(
            &key_material,
            &[SCP11_KEY_USAGE, SCP11_KEY_TYPE, SCP11_KEY_LEN],
            5,
        );

        let receipt = receipt_tlv.value();
        if receipt.len() != 16
            || !verify_cmac(&keys[0], &[&data[..], &epk_sd_tlv.to_bytes()[..]], receipt)
        {
            debug!("SCP11 receipt mismatch");
            return Err(yubikit_core::Error::AuthenticationFailed("Receipt does not match").into());
        }

        let mut mac_chain = MacChain::default();
        mac_chain.copy_from_slice(receipt);
        let session = SessionKeys::new(*keys[1], *keys[2], *keys[3], Some(*keys[4]));

        let mut state = Self::new(session, mac_chain);
        state.establish();
        debug!("SCP11 session established");
        Ok(state)
    }
}

fn upload_certificates(
    processor: &mut dyn CommandProcessor,
    connection: &mut dyn SmartCardConnection,
    params: &Scp11KeyParams,
) -> Result<()> {
    let oce_ref = params.oce_key_ref().unwrap_or(KeyRef::new(0, 0));
    let certificates = params.certificates();
    if certificates.is_empty() {
        return Err(Error::InvalidKeyParams(
            "SCP11a and SCP11c need a certificate chain".into(),
        ));
    }

    let last = certificates.len() - 1;
    for (i, certificate) in certificates.iter().enumerate() {
        let p2 = oce_ref.kid | if i < last { PSO_MORE_CERTIFICATES } else { 0x00 };
        let apdu = Apdu::new(cla::GP, ins::PERFORM_SECURITY_OPERATION, oce_ref.kvn, p2)
            .with_data(certificate.clone());
        trace!(index = i, len = certificate.len(), "Uploading OCE certificate");
        processor
            .process_command(&apdu, connection)?
            .into_result()?;
    }
    Ok(())
}

impl fmt::Debug for ScpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScpState")
            .field("phase", &self.phase)
            .field("enc_counter", &self.enc_counter)
            .finish_non_exhaustive()
    }
}

impl Drop for ScpState {
    fn drop(&mut self) {
        self.mac_chain.zeroize();
    }
}

/// Encrypts data such as keys to import under the session DEK
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataEncryptor {
    dek: AesKey,
}

impl DataEncryptor {
    /// AES-CBC with a zero IV; `data` must be block aligned
    pub fn encrypt(&self, data: &[u8]) -> Result<Bytes> {
        cbc_encrypt_aligned(&self.dek, data).map(Bytes::from)
    }
}

impl fmt::Debug for DataEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataEncryptor").finish_non_exhaustive()
    }
}
