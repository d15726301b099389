//! Command processor applying secure messaging

use bytes::Bytes;
use tracing::{debug, trace};
use yubikit_core::{
    Apdu, ApduFormat, ApduFormatter, ApduResponse, CommandProcessor, PipelineConfig,
    SmartCardConnection, formatter::SHORT_APDU_MAX_CHUNK, processor::chaining::ChainingProcessor,
};

use crate::constants::{cla, ins, security_level};
use crate::crypto::Cryptogram;
use crate::state::{DataEncryptor, ScpState};

const MAC_LEN: usize = 8;

/// Head of a secure pipeline: encrypts and MACs every command and verifies and
/// decrypts every response before handing it back
///
/// Frames go out through a [`ChainingProcessor`] configured like the plain
/// pipeline it replaces, so long commands are still chained on short APDUs.
#[derive(Debug)]
pub struct ScpProcessor {
    state: ScpState,
    inner: ChainingProcessor,
    extended: ApduFormatter,
}

impl ScpProcessor {
    /// Wrap `state` for a pipeline with the given configuration
    pub fn new(state: ScpState, config: &PipelineConfig) -> Self {
        Self {
            state,
            inner: config.chaining_processor(),
            extended: ApduFormatter::new(ApduFormat::Extended, config.max_apdu_size),
        }
    }

    /// Session state
    pub const fn state(&self) -> &ScpState {
        &self.state
    }

    /// Encryptor for out-of-band data under the session DEK
    pub fn data_encryptor(&self) -> Option<DataEncryptor> {
        self.state.data_encryptor()
    }

    /// Wipe the session keys; later commands fail
    pub fn close(&mut self) {
        self.state.close();
    }

    /// Finish the SCP03 handshake with EXTERNAL AUTHENTICATE
    ///
    /// The command is MAC'ed but not encrypted. Rejection by the card closes
    /// the session.
    pub fn authenticate(
        &mut self,
        host_cryptogram: &Cryptogram,
        connection: &mut dyn SmartCardConnection,
    ) -> crate::Result<()> {
        let apdu = Apdu::new(
            cla::GP_SECURE,
            ins::EXTERNAL_AUTHENTICATE,
            security_level::CDEC_RENC_CMAC_RMAC,
            0x00,
        )
        .with_data(Bytes::copy_from_slice(host_cryptogram));

        let response = self.send_apdu(&apdu, false, connection)?;
        if let Err(err) = response.into_result() {
            debug!(sw = %err.status, "EXTERNAL AUTHENTICATE rejected");
            self.state.close();
            return Err(err.into());
        }

        self.state.establish();
        debug!("SCP03 session established");
        Ok(())
    }

    /// Send one command with secure messaging
    ///
    /// `encrypt` controls encryption of the command data only. MAC coverage
    /// is the whole frame as laid out for a single transmission, header and
    /// Lc included, before any chaining split.
    pub fn send_apdu(
        &mut self,
        apdu: &Apdu,
        encrypt: bool,
        connection: &mut dyn SmartCardConnection,
    ) -> yubikit_core::Result<ApduResponse> {
        let mut data = if encrypt {
            self.state.encrypt_pending(apdu.data())?
        } else {
            apdu.data().to_vec()
        };
        let cla = apdu.cla() | cla::SECURE_MESSAGING;

        data.extend_from_slice(&[0u8; MAC_LEN]);
        let frame = self
            .mac_formatter(data.len())
            .format(cla, apdu.ins(), apdu.p1(), apdu.p2(), &data, 0)?;
        // The counter only moves once the command fits a frame
        if encrypt {
            self.state.commit_encryption();
        }
        let mac = self.state.mac(&frame[..frame.len() - MAC_LEN])?;
        let mac_offset = data.len() - MAC_LEN;
        data[mac_offset..].copy_from_slice(&mac);

        let protected = Apdu::new(cla, apdu.ins(), apdu.p1(), apdu.p2())
            .with_data(data)
            .with_le(apdu.le());
        let response = self.inner.process_command(&protected, connection)?;
        let status = response.status();

        let mut data = response.into_data();
        if !data.is_empty() {
            data = self.state.unmac(&data, status.to_u16())?;
        }
        if !data.is_empty() {
            data = self.state.decrypt(&data)?;
        }
        trace!(sw = %status, data_len = data.len(), "Unwrapped secure response");
        Ok(ApduResponse::new(data, status))
    }

    /// Formatter the MAC is computed over
    ///
    /// A short pipeline MACs oversized commands over their extended encoding.
    /// The chaining layer below still splits them into short frames.
    fn mac_formatter(&self, maced_len: usize) -> ApduFormatter {
        let formatter = self.inner.formatter();
        if formatter.is_short() && maced_len > SHORT_APDU_MAX_CHUNK {
            self.extended
        } else {
            formatter
        }
    }
}

impl CommandProcessor for ScpProcessor {
    fn do_process_command(
        &mut self,
        apdu: &Apdu,
        connection: &mut dyn SmartCardConnection,
    ) -> yubikit_core::Result<ApduResponse> {
        self.send_apdu(apdu, true, connection)
    }

    fn is_secure(&self) -> bool {
        true
    }
}
