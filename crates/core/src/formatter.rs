//! Wire framing for short and extended APDUs
//!
//! Formatting is a pure transformation from command fields to the bytes of a
//! single frame. Splitting oversized commands into several frames is the job of
//! [`ChainingProcessor`](crate::processor::chaining::ChainingProcessor).

use bytes::{BufMut, Bytes, BytesMut};

use crate::command::{Apdu, MAX_EXPECTED_LENGTH};
use crate::{Error, Result};

/// Largest data chunk, and largest Le, a short APDU can carry
pub const SHORT_APDU_MAX_CHUNK: usize = 0xFF;

/// Largest data field an extended APDU can carry
pub const EXTENDED_APDU_MAX_DATA: usize = 0xFFFF;

const HEADER_LEN: usize = 4;

/// Which APDU encoding a pipeline uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ApduFormat {
    /// Short APDUs, long commands are chained
    #[default]
    Short,
    /// Extended length APDUs
    Extended,
}

/// Largest frame a firmware generation accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaxApduSize {
    /// YubiKey NEO
    #[default]
    Neo,
    /// YubiKey 4 before 4.3
    Yk4,
    /// YubiKey 4.3 and later
    Yk4_3,
}

impl MaxApduSize {
    /// Size in bytes
    pub const fn bytes(self) -> usize {
        match self {
            Self::Neo => 1390,
            Self::Yk4 => 2038,
            Self::Yk4_3 => 3062,
        }
    }
}

/// Lays out one frame in the active encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApduFormatter {
    /// Short encoding: 1-byte Lc and Le
    Short,
    /// Extended encoding, capped at the given frame size
    Extended {
        /// Largest frame the device accepts
        max_apdu_size: usize,
    },
}

impl ApduFormatter {
    /// Formatter for the given encoding
    pub const fn new(format: ApduFormat, max_apdu_size: MaxApduSize) -> Self {
        match format {
            ApduFormat::Short => Self::Short,
            ApduFormat::Extended => Self::Extended {
                max_apdu_size: max_apdu_size.bytes(),
            },
        }
    }

    /// Whether this formatter produces short APDUs
    pub const fn is_short(&self) -> bool {
        matches!(self, Self::Short)
    }

    /// Format the command fields and data chunk into one frame
    ///
    /// `data` is the chunk for this frame only; callers slice the full payload.
    /// Violating the size limits of the encoding fails before any I/O.
    pub fn format(&self, cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8], le: usize) -> Result<Bytes> {
        match *self {
            Self::Short => format_short(cla, ins, p1, p2, data, le),
            Self::Extended { max_apdu_size } => {
                format_extended(cla, ins, p1, p2, data, le, max_apdu_size)
            }
        }
    }

    /// Format a complete command into one frame
    pub fn format_apdu(&self, apdu: &Apdu) -> Result<Bytes> {
        self.format(apdu.cla(), apdu.ins(), apdu.p1(), apdu.p2(), apdu.data(), apdu.le())
    }
}

fn format_short(cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8], le: usize) -> Result<Bytes> {
    if data.len() > SHORT_APDU_MAX_CHUNK {
        return Err(Error::ApduTooLong {
            length: data.len(),
            max: SHORT_APDU_MAX_CHUNK,
        });
    }
    if le > SHORT_APDU_MAX_CHUNK {
        return Err(Error::invalid_argument(format!(
            "Le of {le} does not fit a short APDU"
        )));
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + 2 + data.len());
    buf.put_slice(&[cla, ins, p1, p2]);
    if !data.is_empty() {
        buf.put_u8(data.len() as u8);
        buf.put_slice(data);
    }
    if le > 0 || data.is_empty() {
        // Case 1 commands still end in a zero Le byte
        buf.put_u8(le as u8);
    }
    Ok(buf.freeze())
}

fn format_extended(
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: &[u8],
    le: usize,
    max_apdu_size: usize,
) -> Result<Bytes> {
    if data.len() <= SHORT_APDU_MAX_CHUNK && le <= SHORT_APDU_MAX_CHUNK {
        return format_short(cla, ins, p1, p2, data, le);
    }
    if le > MAX_EXPECTED_LENGTH {
        return Err(Error::invalid_argument(format!(
            "Le of {le} exceeds {MAX_EXPECTED_LENGTH}"
        )));
    }

    let length = HEADER_LEN
        + 1
        + if data.is_empty() { 0 } else { 2 + data.len() }
        + if le > 0 { 2 } else { 0 };
    let max = max_apdu_size.min(HEADER_LEN + 1 + 2 + EXTENDED_APDU_MAX_DATA + 2);
    if length > max || data.len() > EXTENDED_APDU_MAX_DATA {
        return Err(Error::ApduTooLong { length, max });
    }

    let mut buf = BytesMut::with_capacity(length);
    buf.put_slice(&[cla, ins, p1, p2, 0x00]);
    if !data.is_empty() {
        buf.put_u16(data.len() as u16);
        buf.put_slice(data);
    }
    if le > 0 {
        // 65536 wraps to 0000, meaning "as much as available"
        buf.put_u16(le as u16);
    }
    Ok(buf.freeze())
}
