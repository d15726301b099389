//! APDU command definition
//!
//! An [`Apdu`] describes one logical command. It carries no framing decision:
//! the active [`ApduFormatter`](crate::ApduFormatter) decides how the command
//! is laid out on the wire, and whether it is chained across frames.

use bytes::Bytes;

use crate::{Error, Result};

/// Largest expected length an extended APDU can request
pub const MAX_EXPECTED_LENGTH: usize = 65536;

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Bytes,
    le: usize,
}

impl Apdu {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Bytes::new(),
            le: 0,
        }
    }

    /// Create a command from wider integers, rejecting values outside 0..=0xFF
    pub fn checked(cla: u32, ins: u32, p1: u32, p2: u32) -> Result<Self> {
        let byte = |value: u32, name: &str| {
            u8::try_from(value).map_err(|_| {
                Error::invalid_argument(format!("{name} {value:#x} does not fit in a byte"))
            })
        };
        Ok(Self::new(
            byte(cla, "CLA")?,
            byte(ins, "INS")?,
            byte(p1, "P1")?,
            byte(p2, "P2")?,
        ))
    }

    /// Set the command data
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    /// Set the expected response length; 0 leaves it to the protocol default
    pub const fn with_le(mut self, le: usize) -> Self {
        self.le = le;
        self
    }

    /// Command class (CLA)
    pub const fn cla(&self) -> u8 {
        self.cla
    }

    /// Instruction code (INS)
    pub const fn ins(&self) -> u8 {
        self.ins
    }

    /// First parameter (P1)
    pub const fn p1(&self) -> u8 {
        self.p1
    }

    /// Second parameter (P2)
    pub const fn p2(&self) -> u8 {
        self.p2
    }

    /// Command data, empty when there is none
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Expected response length
    pub const fn le(&self) -> usize {
        self.le
    }

    /// Parse a raw frame in short or extended form
    pub fn from_bytes(frame: &[u8]) -> Result<Self> {
        let [cla, ins, p1, p2, body @ ..] = frame else {
            return Err(Error::invalid_argument(format!(
                "APDU of {} bytes is shorter than its header",
                frame.len()
            )));
        };
        let apdu = Self::new(*cla, *ins, *p1, *p2);
        let malformed = || Error::invalid_argument("APDU body does not match its length fields");

        let (data, le): (&[u8], usize) = match body {
            // Case 1
            [] => (&[], 0),
            // Case 2 short
            [le] => (&[], short_le(*le)),
            // Case 2 extended
            [0x00, hi, lo] => (&[], extended_le(*hi, *lo)),
            // Case 3/4 extended
            [0x00, hi, lo, rest @ ..] => {
                let lc = usize::from(u16::from_be_bytes([*hi, *lo]));
                match rest.len().checked_sub(lc) {
                    Some(0) => (rest, 0),
                    Some(2) => (&rest[..lc], extended_le(rest[lc], rest[lc + 1])),
                    _ => return Err(malformed()),
                }
            }
            // Case 3/4 short
            [lc, rest @ ..] => {
                let lc = usize::from(*lc);
                match rest.len().checked_sub(lc) {
                    Some(0) => (rest, 0),
                    Some(1) => (&rest[..lc], short_le(rest[lc])),
                    _ => return Err(malformed()),
                }
            }
        };

        Ok(apdu.with_data(Bytes::copy_from_slice(data)).with_le(le))
    }
}

const fn short_le(le: u8) -> usize {
    if le == 0 { 256 } else { le as usize }
}

const fn extended_le(hi: u8, lo: u8) -> usize {
    match u16::from_be_bytes([hi, lo]) {
        0 => MAX_EXPECTED_LENGTH,
        le => le as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_builder() {
        let apdu = Apdu::new(0x00, 0xA4, 0x04, 0x00)
            .with_data(Bytes::from_static(&hex!("A000000527")))
            .with_le(0x20);
        assert_eq!(apdu.cla(), 0x00);
        assert_eq!(apdu.ins(), 0xA4);
        assert_eq!(apdu.data().as_ref(), &hex!("A000000527"));
        assert_eq!(apdu.le(), 0x20);

        let bare = Apdu::new(0x00, 0xFD, 0x00, 0x00);
        assert!(bare.data().is_empty());
        assert_eq!(bare.le(), 0);
    }

    #[test]
    fn test_checked_rejects_out_of_range() {
        assert_eq!(
            Apdu::checked(0x80, 0x50, 0xFF, 0x00).unwrap(),
            Apdu::new(0x80, 0x50, 0xFF, 0x00)
        );
        assert!(matches!(
            Apdu::checked(0x100, 0x50, 0, 0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(Apdu::checked(0, 0, 0, 256).is_err());
    }

    #[test]
    fn test_from_bytes_short() {
        let apdu = Apdu::from_bytes(&hex!("00A40400 05 A000000527 00")).unwrap();
        assert_eq!(apdu.p1(), 0x04);
        assert_eq!(apdu.data().as_ref(), &hex!("A000000527"));
        assert_eq!(apdu.le(), 256);

        let apdu = Apdu::from_bytes(&hex!("80500000 08 0102030405060708")).unwrap();
        assert_eq!(apdu.data().len(), 8);
        assert_eq!(apdu.le(), 0);

        let apdu = Apdu::from_bytes(&hex!("00C00000 10")).unwrap();
        assert!(apdu.data().is_empty());
        assert_eq!(apdu.le(), 16);
    }

    #[test]
    fn test_from_bytes_extended() {
        let mut frame = hex!("00DB3FFF 00 0100").to_vec();
        frame.extend_from_slice(&[0xAB; 256]);
        frame.extend_from_slice(&hex!("0000"));
        let apdu = Apdu::from_bytes(&frame).unwrap();
        assert_eq!(apdu.data().len(), 256);
        assert_eq!(apdu.le(), 65536);

        let apdu = Apdu::from_bytes(&hex!("00CB3FFF 00 0400")).unwrap();
        assert!(apdu.data().is_empty());
        assert_eq!(apdu.le(), 1024);
    }

    #[test]
    fn test_from_bytes_rejects_inconsistent_lengths() {
        assert!(Apdu::from_bytes(&hex!("00A404")).is_err());
        assert!(Apdu::from_bytes(&hex!("00A40400 05 A000")).is_err());
        assert!(Apdu::from_bytes(&hex!("00A40400 02 AABB CCDD")).is_err());
    }
}
