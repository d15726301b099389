//! Command processors turning one logical APDU into physical exchanges
//!
//! Processors compose in a fixed order. The touch workaround wraps command
//! chaining, which wraps response chaining, which talks to the raw
//! [`SmartCardConnection`]. Secure messaging, when active, replaces the touch
//! workaround at the head of the chain.
//!
//! A [`ProcessorPipeline`] is built from a [`PipelineConfig`] and never
//! reconfigured in place: a configuration change builds a new pipeline.

pub mod chaining;
pub mod touch;

use std::fmt;

use tracing::{debug, trace};

use crate::command::Apdu;
use crate::formatter::{ApduFormat, ApduFormatter, MaxApduSize};
use crate::response::ApduResponse;
use crate::transport::SmartCardConnection;
use crate::Result;
use chaining::ChainingProcessor;
use touch::TouchWorkaroundProcessor;

/// Default instruction for fetching the rest of a chained response
pub const INS_SEND_REMAINING: u8 = 0xC0;

/// Trait for command processors which transform commands
/// before sending them over the connection
pub trait CommandProcessor: Send + fmt::Debug {
    /// Process a command through this processor
    ///
    /// This method takes a command, potentially transforms it, sends it through
    /// the connection, and potentially transforms the response.
    fn process_command(
        &mut self,
        apdu: &Apdu,
        connection: &mut dyn SmartCardConnection,
    ) -> Result<ApduResponse> {
        trace!(
            apdu = ?apdu,
            processor = std::any::type_name::<Self>(),
            "Processing command"
        );

        let result = self.do_process_command(apdu, connection);

        match &result {
            Ok(response) => {
                trace!(
                    sw = %response.status(),
                    data_len = response.data().len(),
                    "Processed response"
                );
            }
            Err(e) => {
                debug!(error = ?e, "Error during command processing");
            }
        }

        result
    }

    /// Internal implementation of process_command
    fn do_process_command(
        &mut self,
        apdu: &Apdu,
        connection: &mut dyn SmartCardConnection,
    ) -> Result<ApduResponse>;

    /// Whether this processor applies secure messaging
    fn is_secure(&self) -> bool {
        false
    }
}

/// Settings a pipeline is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Short or extended APDUs
    pub apdu_format: ApduFormat,
    /// Frame size cap for extended APDUs
    pub max_apdu_size: MaxApduSize,
    /// Whether to insert the touch workaround at the head of the chain
    pub touch_workaround: bool,
    /// Instruction used to fetch the rest of a chained response
    pub ins_send_remaining: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            apdu_format: ApduFormat::Short,
            max_apdu_size: MaxApduSize::Neo,
            touch_workaround: false,
            ins_send_remaining: INS_SEND_REMAINING,
        }
    }
}

impl PipelineConfig {
    /// Set the APDU encoding
    pub const fn with_apdu_format(mut self, apdu_format: ApduFormat) -> Self {
        self.apdu_format = apdu_format;
        self
    }

    /// Set the frame size cap
    pub const fn with_max_apdu_size(mut self, max_apdu_size: MaxApduSize) -> Self {
        self.max_apdu_size = max_apdu_size;
        self
    }

    /// Enable or disable the touch workaround
    pub const fn with_touch_workaround(mut self, enabled: bool) -> Self {
        self.touch_workaround = enabled;
        self
    }

    /// Set the instruction used to fetch remaining response data
    pub const fn with_ins_send_remaining(mut self, ins: u8) -> Self {
        self.ins_send_remaining = ins;
        self
    }

    /// Formatter matching this configuration
    ///
    /// The touch workaround only runs on short APDUs.
    pub const fn formatter(&self) -> ApduFormatter {
        if self.touch_workaround {
            ApduFormatter::Short
        } else {
            ApduFormatter::new(self.apdu_format, self.max_apdu_size)
        }
    }

    /// Command and response chaining for this configuration
    pub fn chaining_processor(&self) -> ChainingProcessor {
        ChainingProcessor::new(self.formatter(), self.ins_send_remaining)
    }
}

/// An immutable chain of processors built from one configuration
#[derive(Debug)]
pub struct ProcessorPipeline {
    config: PipelineConfig,
    head: Box<dyn CommandProcessor>,
}

impl ProcessorPipeline {
    /// Build the plain (non secure) chain for `config`
    pub fn new(config: PipelineConfig) -> Self {
        let head: Box<dyn CommandProcessor> = if config.touch_workaround {
            Box::new(TouchWorkaroundProcessor::new(config.ins_send_remaining))
        } else {
            Box::new(config.chaining_processor())
        };
        debug!(?config, "Built processor pipeline");
        Self { config, head }
    }

    /// Build a chain headed by `processor`, typically a secure channel
    pub fn with_processor(config: PipelineConfig, processor: Box<dyn CommandProcessor>) -> Self {
        debug!(?config, secure = processor.is_secure(), "Built processor pipeline");
        Self {
            config,
            head: processor,
        }
    }

    /// Configuration this pipeline was built from
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Whether the head of the chain applies secure messaging
    pub fn is_secure(&self) -> bool {
        self.head.is_secure()
    }

    /// The processor at the head of the chain
    pub fn processor_mut(&mut self) -> &mut dyn CommandProcessor {
        self.head.as_mut()
    }

    /// Send one logical command through the chain
    pub fn process_command(
        &mut self,
        apdu: &Apdu,
        connection: &mut dyn SmartCardConnection,
    ) -> Result<ApduResponse> {
        self.head.process_command(apdu, connection)
    }
}

impl Default for ProcessorPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockConnection;
    use bytes::Bytes;
    use hex_literal::hex;

    #[test]
    fn test_default_pipeline_uses_short_apdus() {
        let mut connection = MockConnection::new([hex!("9000")]);
        let mut pipeline = ProcessorPipeline::default();
        assert!(!pipeline.is_secure());

        let apdu = Apdu::new(0x00, 0xA4, 0x04, 0x00).with_data(Bytes::from_static(&hex!("A0")));
        let response = pipeline.process_command(&apdu, &mut connection).unwrap();

        assert!(response.is_success());
        assert_eq!(connection.commands()[0].as_ref(), &hex!("00A40400 01 A0"));
    }

    #[test]
    fn test_extended_pipeline_sends_single_frame() {
        let mut connection = MockConnection::new([hex!("9000")]);
        let config = PipelineConfig::default()
            .with_apdu_format(ApduFormat::Extended)
            .with_max_apdu_size(MaxApduSize::Yk4);
        let mut pipeline = ProcessorPipeline::new(config);

        let apdu = Apdu::new(0x00, 0xDB, 0x3F, 0xFF).with_data(vec![0x42; 600]);
        pipeline.process_command(&apdu, &mut connection).unwrap();

        assert_eq!(connection.commands().len(), 1);
        assert_eq!(connection.commands()[0][..7], hex!("00DB3FFF 00 0258"));
    }

    #[test]
    fn test_touch_workaround_forces_short_apdus() {
        let config = PipelineConfig::default()
            .with_apdu_format(ApduFormat::Extended)
            .with_touch_workaround(true);
        assert_eq!(config.formatter(), ApduFormatter::Short);
    }
}
