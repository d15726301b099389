//! The smart card protocol façade applications talk through

use bytes::Bytes;
use tracing::{Level, debug, info, instrument, warn};
use yubikit_core::{
    Apdu, ApduFormat, ApduResponse, MaxApduSize, PipelineConfig, ProcessorPipeline,
    SmartCardConnection, Transport, Version,
};
use yubikit_scp::{
    DataEncryptor, Scp03KeyParams, Scp11KeyParams, ScpKeyParams, ScpProcessor, ScpState,
};

use crate::options::ProtocolOptions;
use crate::{Error, Result};

const INS_SELECT: u8 = 0xA4;
const P1_SELECT: u8 = 0x04;
const P2_SELECT: u8 = 0x00;

/// First firmware affected by the touch timeout issue
const TOUCH_WORKAROUND_MIN: Version = Version::new(4, 2, 0);
/// First firmware with the touch timeout issue fixed
const TOUCH_WORKAROUND_FIXED: Version = Version::new(4, 2, 7);
/// First firmware accepting extended APDUs
const EXTENDED_APDUS_MIN: Version = Version::new(4, 0, 0);
/// First firmware accepting the larger extended APDU size
const LARGE_APDUS_MIN: Version = Version::new(4, 3, 0);

/// Sends APDUs to one application over a [`SmartCardConnection`]
///
/// The protocol owns the active processor pipeline. Any configuration change
/// builds a fresh pipeline; selecting an application always drops back to
/// the plain pipeline, ending any secure channel.
#[derive(Debug)]
pub struct SmartCardProtocol<C: SmartCardConnection> {
    connection: C,
    options: ProtocolOptions,
    base: PipelineConfig,
    pipeline: ProcessorPipeline,
}

impl<C: SmartCardConnection> SmartCardProtocol<C> {
    /// Create a protocol with default options
    pub fn new(connection: C) -> Self {
        Self::with_options(connection, ProtocolOptions::default())
    }

    /// Create a protocol with the given options
    ///
    /// Until [`configure`](Self::configure) is called, short APDUs sized for
    /// the YubiKey NEO are used.
    pub fn with_options(connection: C, options: ProtocolOptions) -> Self {
        let base = PipelineConfig::default()
            .with_max_apdu_size(MaxApduSize::Neo)
            .with_ins_send_remaining(options.ins_send_remaining);
        Self {
            connection,
            options,
            base,
            pipeline: ProcessorPipeline::new(base),
        }
    }

    /// The underlying connection
    pub const fn connection(&self) -> &C {
        &self.connection
    }

    /// Current options
    pub const fn options(&self) -> &ProtocolOptions {
        &self.options
    }

    /// Configuration of the active pipeline
    pub const fn pipeline_config(&self) -> &PipelineConfig {
        self.pipeline.config()
    }

    /// Whether commands are currently sent with secure messaging
    pub fn is_secure(&self) -> bool {
        self.pipeline.is_secure()
    }

    /// Select an application by AID and return its selection data
    ///
    /// Any secure channel is ended first.
    #[instrument(skip(self, aid), fields(aid = %hex::encode_upper(aid)))]
    pub fn select(&mut self, aid: &[u8]) -> Result<Bytes> {
        if self.pipeline.is_secure() {
            debug!("Dropping secure channel before SELECT");
        }
        self.pipeline = ProcessorPipeline::new(self.base);

        let apdu = Apdu::new(0x00, INS_SELECT, P1_SELECT, P2_SELECT)
            .with_data(Bytes::copy_from_slice(aid));
        let response = self.transmit(&apdu)?;
        let status = response.status();
        match response.into_result() {
            Ok(data) => Ok(data),
            Err(err)
                if status.is_file_not_found()
                    || status.is_function_not_supported()
                    // Returned by the NEO for applications it lacks
                    || status.is_invalid_instruction() =>
            {
                debug!(sw = %status, "Application not available");
                Err(Error::ApplicationNotAvailable(err))
            }
            Err(err) => Err(Error::UnexpectedStatus {
                operation: "select",
                status: err,
            }),
        }
    }

    /// Send a command and return its response data
    ///
    /// A non-success status word becomes [`Error::Apdu`] carrying the status
    /// word and any response data.
    pub fn send_and_receive(&mut self, apdu: &Apdu) -> Result<Bytes> {
        let response = self.transmit(apdu)?;
        response.into_result().map_err(|err| {
            let level = err.status.tracing_level();
            if level == Level::WARN {
                warn!(sw = %err.status, ins = apdu.ins(), "Command failed");
            } else if level == Level::INFO {
                info!(sw = %err.status, ins = apdu.ins(), "Command returned a warning");
            } else {
                debug!(sw = %err.status, ins = apdu.ins(), "Command returned status");
            }
            Error::Apdu(err)
        })
    }

    /// Adapt framing to the firmware version and replace the options
    ///
    /// USB devices from 4.2.0 up to but excluding 4.2.7 get the touch
    /// workaround. Otherwise firmware 4.0.0 and later switches to extended
    /// APDUs when the connection supports them and short APDUs are not
    /// forced. Earlier settings are replaced, except that the framing of an
    /// active secure channel is left alone.
    #[instrument(skip(self, options))]
    pub fn configure(&mut self, version: Version, options: ProtocolOptions) {
        self.options = options;
        let fresh = PipelineConfig::default()
            .with_max_apdu_size(MaxApduSize::Neo)
            .with_ins_send_remaining(options.ins_send_remaining);

        let base = if self.connection.transport() == Transport::Usb
            && version >= TOUCH_WORKAROUND_MIN
            && version < TOUCH_WORKAROUND_FIXED
        {
            debug!("Enabling touch workaround");
            fresh.with_touch_workaround(true)
        } else if self.pipeline.is_secure() {
            debug!("Secure channel active, keeping APDU format");
            fresh
                .with_apdu_format(self.base.apdu_format)
                .with_max_apdu_size(self.base.max_apdu_size)
        } else if version >= EXTENDED_APDUS_MIN
            && self.connection.is_extended_length_supported()
            && !options.force_short_apdus
        {
            let max_apdu_size = if version >= LARGE_APDUS_MIN {
                MaxApduSize::Yk4_3
            } else {
                MaxApduSize::Yk4
            };
            debug!(?max_apdu_size, "Enabling extended APDUs");
            fresh
                .with_apdu_format(ApduFormat::Extended)
                .with_max_apdu_size(max_apdu_size)
        } else {
            fresh
        };

        self.apply(base);
    }

    /// Switch between short and extended APDUs
    ///
    /// Fails while a secure channel is active.
    pub fn set_apdu_format(&mut self, format: ApduFormat) -> Result<()> {
        if self.pipeline.is_secure() {
            return Err(yubikit_core::Error::invalid_argument(
                "Cannot change APDU format while secure messaging is active",
            )
            .into());
        }
        self.apply(self.base.with_apdu_format(format));
        Ok(())
    }

    /// Enable or disable the touch workaround
    pub fn set_touch_workaround(&mut self, enabled: bool) {
        self.apply(self.base.with_touch_workaround(enabled));
    }

    /// Establish a secure channel
    ///
    /// Returns an encryptor for out-of-band data when the session has a DEK.
    /// A card rejecting the secure messaging class yields [`Error::Unsupported`].
    #[instrument(skip_all, fields(key_ref = %params.key_ref()))]
    pub fn init_scp(&mut self, params: &ScpKeyParams) -> Result<Option<DataEncryptor>> {
        let result = match params {
            ScpKeyParams::Scp03(params) => self.init_scp03(params),
            ScpKeyParams::Scp11(params) => self.init_scp11(params),
        };
        result.map_err(|err| match err.status_word() {
            Some(sw) if sw.is_class_not_supported() => {
                Error::Unsupported("This YubiKey does not support secure messaging".into())
            }
            _ => err,
        })
    }

    fn init_scp03(&mut self, params: &Scp03KeyParams) -> Result<Option<DataEncryptor>> {
        let config = *self.pipeline.config();
        let (state, host_cryptogram) = ScpState::scp03_init(
            self.pipeline.processor_mut(),
            &mut self.connection,
            params,
            None,
        )?;

        let mut processor = ScpProcessor::new(state, &config);
        processor.authenticate(&host_cryptogram, &mut self.connection)?;
        let encryptor = processor.data_encryptor();
        self.pipeline = ProcessorPipeline::with_processor(config, Box::new(processor));
        Ok(encryptor)
    }

    fn init_scp11(&mut self, params: &Scp11KeyParams) -> Result<Option<DataEncryptor>> {
        let config = *self.pipeline.config();
        let state =
            ScpState::scp11_init(self.pipeline.processor_mut(), &mut self.connection, params)?;

        let processor = ScpProcessor::new(state, &config);
        let encryptor = processor.data_encryptor();
        self.pipeline = ProcessorPipeline::with_processor(config, Box::new(processor));
        Ok(encryptor)
    }

    /// End any secure channel and close the connection
    pub fn close(&mut self) -> Result<()> {
        self.pipeline = ProcessorPipeline::new(self.base);
        self.connection
            .close()
            .map_err(|err| Error::Core(err.into()))
    }

    /// Give up the protocol and return the connection
    pub fn into_connection(self) -> C {
        self.connection
    }

    fn transmit(&mut self, apdu: &Apdu) -> Result<ApduResponse> {
        Ok(self.pipeline.process_command(apdu, &mut self.connection)?)
    }

    fn apply(&mut self, base: PipelineConfig) {
        if base == self.base {
            return;
        }
        self.base = base;
        if self.pipeline.is_secure() {
            debug!("Secure channel active, new framing applies after the next SELECT");
        } else {
            self.pipeline = ProcessorPipeline::new(base);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::YKOATH_INS_SEND_REMAINING;
    use hex_literal::hex;
    use yubikit_core::{MockConnection, StatusWord};
    use yubikit_scp::crypto::{
        DERIVATION_CARD_CRYPTOGRAM, DERIVATION_S_MAC, derive_cryptogram, derive_key,
    };
    use yubikit_scp::{KeyRef, ScpKid, StaticKeys};

    const OATH_AID: [u8; 7] = hex!("A0000005272101");
    const CARD_CHALLENGE: [u8; 8] = hex!("CAAFA4DAC615236A");
    const DEFAULT_KEY: [u8; 16] = hex!("404142434445464748494A4B4C4D4E4F");

    fn scp03_params() -> ScpKeyParams {
        Scp03KeyParams::new(KeyRef::new(ScpKid::SCP03, 0xFF), StaticKeys::default_keys())
            .unwrap()
            .into()
    }

    /// A card answering the SCP03 handshake for any host challenge, then SELECT
    fn scp03_card() -> MockConnection {
        MockConnection::with_responder(|frame| match frame[1] {
            0x50 => {
                let mut context = [0u8; 16];
                context[..8].copy_from_slice(&frame[5..13]);
                context[8..].copy_from_slice(&CARD_CHALLENGE);
                let smac = derive_key(&DEFAULT_KEY, DERIVATION_S_MAC, &context);
                let cryptogram = derive_cryptogram(&smac, DERIVATION_CARD_CRYPTOGRAM, &context);

                let mut response = hex!("00010203040506070809 FF0370").to_vec();
                response.extend_from_slice(&CARD_CHALLENGE);
                response.extend_from_slice(&cryptogram);
                response.extend_from_slice(&hex!("9000"));
                Bytes::from(response)
            }
            _ => Bytes::from_static(&hex!("9000")),
        })
    }

    #[test]
    fn test_select_returns_data() {
        let connection = MockConnection::new([hex!("5F0102 9000")]);
        let mut protocol = SmartCardProtocol::new(connection);

        let data = protocol.select(&OATH_AID).unwrap();

        assert_eq!(data.as_ref(), &hex!("5F0102"));
        assert_eq!(
            protocol.connection().commands()[0].as_ref(),
            &hex!("00A4040007 A0000005272101")
        );
    }

    #[test]
    fn test_select_missing_application() {
        for sw in [hex!("6A82"), hex!("6A81"), hex!("6D00")] {
            let mut protocol = SmartCardProtocol::new(MockConnection::new([sw]));
            let err = protocol.select(&OATH_AID).unwrap_err();
            assert!(
                matches!(err, Error::ApplicationNotAvailable(_)),
                "{sw:02X?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_select_unexpected_status() {
        let mut protocol = SmartCardProtocol::new(MockConnection::new([hex!("6982")]));

        let err = protocol.select(&OATH_AID).unwrap_err();

        assert!(matches!(
            err,
            Error::UnexpectedStatus {
                operation: "select",
                ..
            }
        ));
        assert_eq!(err.status_word(), Some(StatusWord::new(0x69, 0x82)));
    }

    #[test]
    fn test_send_and_receive_error_keeps_data() {
        let mut protocol = SmartCardProtocol::new(MockConnection::new([hex!("AB 6982")]));

        let err = protocol
            .send_and_receive(&Apdu::new(0x00, 0x01, 0x00, 0x00))
            .unwrap_err();

        let Error::Apdu(status) = err else {
            panic!("expected an APDU error, got {err:?}");
        };
        assert_eq!(status.status, StatusWord::new(0x69, 0x82));
        assert_eq!(status.data.as_ref(), &[0xAB]);
    }

    #[test]
    fn test_send_and_receive_malformed_response() {
        let mut protocol = SmartCardProtocol::new(MockConnection::new([hex!("90")]));

        let err = protocol
            .send_and_receive(&Apdu::new(0x00, 0x01, 0x00, 0x00))
            .unwrap_err();

        assert!(matches!(err, Error::Core(yubikit_core::Error::BadResponse(_))));
        assert!(!err.is_transport());
    }

    #[test]
    fn test_ykoath_response_chaining() {
        let connection = MockConnection::new([hex!("0102 6102"), hex!("0304 9000")]);
        let mut protocol = SmartCardProtocol::with_options(connection, ProtocolOptions::ykoath());

        let data = protocol
            .send_and_receive(&Apdu::new(0x00, 0xA1, 0x00, 0x00))
            .unwrap();

        assert_eq!(data.as_ref(), &hex!("01020304"));
        assert_eq!(
            protocol.connection().commands()[1].as_ref(),
            &[0x00, YKOATH_INS_SEND_REMAINING, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_configure_touch_workaround_on_usb() {
        let mut protocol = SmartCardProtocol::new(MockConnection::new([[0u8; 0]; 0]));

        protocol.configure(Version::new(4, 2, 6), ProtocolOptions::default());

        let config = protocol.pipeline_config();
        assert!(config.touch_workaround);
        assert_eq!(config.apdu_format, ApduFormat::Short);
    }

    #[test]
    fn test_configure_extended_over_nfc() {
        let connection = MockConnection::new([[0u8; 0]; 0]).with_transport(Transport::Nfc);
        let mut protocol = SmartCardProtocol::new(connection);

        protocol.configure(Version::new(4, 2, 6), ProtocolOptions::default());

        let config = protocol.pipeline_config();
        assert!(!config.touch_workaround);
        assert_eq!(config.apdu_format, ApduFormat::Extended);
        assert_eq!(config.max_apdu_size, MaxApduSize::Yk4);
    }

    #[test]
    fn test_configure_large_apdus() {
        let mut protocol = SmartCardProtocol::new(MockConnection::new([[0u8; 0]; 0]));

        protocol.configure(Version::new(4, 3, 1), ProtocolOptions::default());

        let config = protocol.pipeline_config();
        assert_eq!(config.apdu_format, ApduFormat::Extended);
        assert_eq!(config.max_apdu_size, MaxApduSize::Yk4_3);
    }

    #[test]
    fn test_configure_replaces_earlier_settings() {
        let mut protocol = SmartCardProtocol::new(MockConnection::new([[0u8; 0]; 0]));

        protocol.configure(Version::new(4, 2, 6), ProtocolOptions::default());
        assert!(protocol.pipeline_config().touch_workaround);

        protocol.configure(Version::new(5, 4, 3), ProtocolOptions::default());
        let config = protocol.pipeline_config();
        assert!(!config.touch_workaround);
        assert_eq!(config.apdu_format, ApduFormat::Extended);
        assert_eq!(config.max_apdu_size, MaxApduSize::Yk4_3);
        assert!(!config.formatter().is_short());

        protocol.configure(Version::new(3, 4, 0), ProtocolOptions::default());
        let config = protocol.pipeline_config();
        assert_eq!(config.apdu_format, ApduFormat::Short);
        assert_eq!(config.max_apdu_size, MaxApduSize::Neo);
    }

    #[test]
    fn test_configure_keeps_short_apdus() {
        let mut old = SmartCardProtocol::new(MockConnection::new([[0u8; 0]; 0]));
        old.configure(Version::new(3, 4, 0), ProtocolOptions::default());
        assert_eq!(old.pipeline_config().apdu_format, ApduFormat::Short);

        let mut forced = SmartCardProtocol::new(MockConnection::new([[0u8; 0]; 0]));
        forced.configure(
            Version::new(5, 7, 2),
            ProtocolOptions::default().with_force_short_apdus(true),
        );
        assert_eq!(forced.pipeline_config().apdu_format, ApduFormat::Short);
        assert!(forced.options().force_short_apdus);

        let reader = MockConnection::new([[0u8; 0]; 0]).with_extended_length(false);
        let mut limited = SmartCardProtocol::new(reader);
        limited.configure(Version::new(5, 7, 2), ProtocolOptions::default());
        assert_eq!(limited.pipeline_config().apdu_format, ApduFormat::Short);
    }

    #[test]
    fn test_extended_frames_after_configure() {
        let connection = MockConnection::new([hex!("9000")]);
        let mut protocol = SmartCardProtocol::new(connection);
        protocol.configure(Version::new(5, 4, 3), ProtocolOptions::default());

        let apdu = Apdu::new(0x00, 0x01, 0x00, 0x00).with_data(vec![0x42; 300]);
        protocol.send_and_receive(&apdu).unwrap();

        let frames = protocol.connection().commands();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..7], &hex!("00010000 00012C"));
    }

    #[test]
    fn test_init_scp_unsupported() {
        let mut protocol = SmartCardProtocol::new(MockConnection::new([hex!("6E00")]));

        let err = protocol.init_scp(&scp03_params()).unwrap_err();

        assert!(matches!(err, Error::Unsupported(_)));
        assert!(!protocol.is_secure());
    }

    #[test]
    fn test_init_scp_rejected_key_set() {
        let mut protocol = SmartCardProtocol::new(MockConnection::new([hex!("6A88")]));

        let err = protocol.init_scp(&scp03_params()).unwrap_err();

        assert_eq!(err.status_word(), Some(StatusWord::new(0x6A, 0x88)));
        assert!(!protocol.is_secure());
    }

    #[test]
    fn test_scp03_session_ends_on_select() {
        let mut protocol = SmartCardProtocol::new(scp03_card());

        let encryptor = protocol.init_scp(&scp03_params()).unwrap();
        assert!(encryptor.is_some());
        assert!(protocol.is_secure());
        assert!(
            protocol
                .set_apdu_format(ApduFormat::Extended)
                .unwrap_err()
                .to_string()
                .contains("secure messaging")
        );

        protocol.select(&OATH_AID).unwrap();

        assert!(!protocol.is_secure());
        let frames = protocol.connection().commands();
        assert_eq!(frames[0][..5], hex!("8050FF0008"));
        assert_eq!(frames[1][..5], hex!("8482330010"));
        assert_eq!(frames[2].as_ref(), &hex!("00A4040007 A0000005272101"));
    }

    #[test]
    fn test_close_closes_connection() {
        let mut protocol = SmartCardProtocol::new(MockConnection::new([[0u8; 0]; 0]));

        protocol.close().unwrap();

        assert!(protocol.connection().is_closed());
        assert!(
            protocol
                .send_and_receive(&Apdu::new(0x00, 0x01, 0x00, 0x00))
                .unwrap_err()
                .is_transport()
        );
    }
}
