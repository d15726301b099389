//! Command chaining and response chaining

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use super::CommandProcessor;
use crate::command::Apdu;
use crate::formatter::{ApduFormatter, SHORT_APDU_MAX_CHUNK};
use crate::response::ApduResponse;
use crate::transport::SmartCardConnection;
use crate::Result;

/// CLA bit marking a frame that is followed by more of the same command
pub const CLA_CHAINING_BIT: u8 = 0x10;

/// Sends one frame and collects "more data available" continuations
#[derive(Debug, Clone)]
pub struct ResponseChaining {
    get_remaining: Bytes,
}

impl ResponseChaining {
    /// Create a response chainer issuing `00 <ins> 00 00 00` for the remainder
    pub fn new(ins_send_remaining: u8) -> Self {
        // The same frame in short and extended encoding
        Self {
            get_remaining: Bytes::copy_from_slice(&[0x00, ins_send_remaining, 0x00, 0x00, 0x00]),
        }
    }

    /// The frame sent to fetch remaining response data
    pub const fn get_remaining_frame(&self) -> &Bytes {
        &self.get_remaining
    }

    /// Transmit `frame` and reassemble the full response
    pub fn transmit(
        &self,
        frame: &[u8],
        connection: &mut dyn SmartCardConnection,
    ) -> Result<ApduResponse> {
        let mut response = ApduResponse::from_bytes(&connection.send_and_receive(frame)?)?;
        if !response.status().is_more_data_available() {
            return Ok(response);
        }

        let mut buffer = BytesMut::new();
        let mut rounds = 0usize;
        while response.status().is_more_data_available() {
            buffer.extend_from_slice(response.data());
            rounds += 1;
            trace!(
                remaining = response.status().sw2,
                round = rounds,
                "Fetching remaining response data"
            );
            response =
                ApduResponse::from_bytes(&connection.send_and_receive(&self.get_remaining)?)?;
        }
        buffer.extend_from_slice(response.data());

        trace!(
            total_data_len = buffer.len(),
            final_sw = %response.status(),
            "Completed response chaining"
        );
        Ok(ApduResponse::new(buffer.freeze(), response.status()))
    }
}

/// Splits long commands into chained short frames and reassembles responses
#[derive(Debug, Clone)]
pub struct ChainingProcessor {
    formatter: ApduFormatter,
    responses: ResponseChaining,
}

impl ChainingProcessor {
    /// Create a processor for the given formatter
    pub fn new(formatter: ApduFormatter, ins_send_remaining: u8) -> Self {
        Self {
            formatter,
            responses: ResponseChaining::new(ins_send_remaining),
        }
    }

    /// The formatter frames are laid out with
    pub const fn formatter(&self) -> ApduFormatter {
        self.formatter
    }
}

impl CommandProcessor for ChainingProcessor {
    fn do_process_command(
        &mut self,
        apdu: &Apdu,
        connection: &mut dyn SmartCardConnection,
    ) -> Result<ApduResponse> {
        let data = apdu.data();
        let mut offset = 0;

        // Only short APDUs need command chaining
        while self.formatter.is_short() && data.len() - offset > SHORT_APDU_MAX_CHUNK {
            let frame = self.formatter.format(
                apdu.cla() | CLA_CHAINING_BIT,
                apdu.ins(),
                apdu.p1(),
                apdu.p2(),
                &data[offset..offset + SHORT_APDU_MAX_CHUNK],
                apdu.le(),
            )?;
            // Intermediate replies are returned as-is, without response chaining
            let response = ApduResponse::from_bytes(&connection.send_and_receive(&frame)?)?;
            if !response.is_success() {
                debug!(
                    sw = %response.status(),
                    offset,
                    "Chained command rejected, not sending remaining frames"
                );
                return Ok(response);
            }
            offset += SHORT_APDU_MAX_CHUNK;
        }

        let frame = self.formatter.format(
            apdu.cla(),
            apdu.ins(),
            apdu.p1(),
            apdu.p2(),
            &data[offset..],
            apdu.le(),
        )?;
        self.responses.transmit(&frame, connection)
    }
}
