//! BER-TLV encoding as used by YubiKey application payloads
//!
//! Tags are one or two bytes: when the low five bits of the first byte are all
//! set, a second tag byte follows. Lengths use the definite form with at most
//! two length bytes, so a single value is limited to 65535 bytes.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Tag of a TLV record, one or two bytes wide
pub type Tag = u16;

/// Largest value length the length field can express
pub const MAX_VALUE_LENGTH: usize = 0xFFFF;

const MULTI_BYTE_TAG_MARKER: u8 = 0x1F;

/// A single tag-length-value record
#[derive(Clone, PartialEq, Eq)]
pub struct Tlv {
    tag: Tag,
    value: Bytes,
}

impl Tlv {
    /// Create a record, validating the tag shape and the value length
    pub fn new(tag: Tag, value: impl Into<Bytes>) -> Result<Self> {
        validate_tag(tag)?;
        let value = value.into();
        if value.len() > MAX_VALUE_LENGTH {
            return Err(Error::invalid_argument(format!(
                "TLV value of {} bytes exceeds {MAX_VALUE_LENGTH}",
                value.len()
            )));
        }
        Ok(Self { tag, value })
    }

    /// The tag
    pub const fn tag(&self) -> Tag {
        self.tag
    }

    /// The value
    pub const fn value(&self) -> &Bytes {
        &self.value
    }

    /// Take the value
    pub fn into_value(self) -> Bytes {
        self.value
    }

    /// Length of the value
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// Whether the value is empty
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Decode one record starting at `offset`
    ///
    /// Returns the record and the number of bytes it occupied. Reading past the
    /// end of `data`, or an unsupported length prefix, is a bad response.
    pub fn decode(data: &[u8], offset: usize) -> Result<(Self, usize)> {
        let input = data
            .get(offset..)
            .ok_or_else(|| Error::bad_response("TLV offset beyond end of data"))?;
        let mut reader = Reader { input, pos: 0 };

        let first = reader.byte("tag")?;
        let mut tag = Tag::from(first);
        if first & MULTI_BYTE_TAG_MARKER == MULTI_BYTE_TAG_MARKER {
            tag = (tag << 8) | Tag::from(reader.byte("tag")?);
        }

        let length = match reader.byte("length")? {
            short @ 0x00..=0x7F => usize::from(short),
            0x81 => usize::from(reader.byte("length")?),
            0x82 => {
                let bytes = reader.take(2, "length")?;
                usize::from(u16::from_be_bytes([bytes[0], bytes[1]]))
            }
            prefix => {
                return Err(Error::bad_response(format!(
                    "Unsupported TLV length prefix {prefix:#04x}"
                )));
            }
        };

        let value = Bytes::copy_from_slice(reader.take(length, "value")?);
        Ok((Self { tag, value }, reader.pos))
    }

    /// Number of bytes the encoded record occupies
    pub fn encoded_len(&self) -> usize {
        tag_len(self.tag) + length_len(self.value.len()) + self.value.len()
    }

    /// Append the encoded record to `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        if self.tag > 0xFF {
            buf.put_u16(self.tag);
        } else {
            buf.put_u8(self.tag as u8);
        }

        let length = self.value.len();
        if length < 0x80 {
            buf.put_u8(length as u8);
        } else if length <= 0xFF {
            buf.put_u8(0x81);
            buf.put_u8(length as u8);
        } else {
            buf.put_u8(0x82);
            buf.put_u16(length as u16);
        }

        buf.put_slice(&self.value);
    }

    /// Encode the record
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }
}

impl fmt::Debug for Tlv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tlv")
            .field("tag", &format_args!("{:#x}", self.tag))
            .field("value", &hex::encode(&self.value))
            .finish()
    }
}

/// Tag to value mapping keeping the order in which tags were first seen
///
/// A repeated tag replaces the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvMap {
    entries: Vec<(Tag, Bytes)>,
}

impl TlvMap {
    /// Create an empty map
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert a value, replacing any previous value for the tag
    pub fn insert(&mut self, tag: Tag, value: Bytes) {
        match self.entries.iter_mut().find(|(t, _)| *t == tag) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((tag, value)),
        }
    }

    /// Value stored for `tag`
    pub fn get(&self, tag: Tag) -> Option<&Bytes> {
        self.entries
            .iter()
            .find_map(|(t, v)| (*t == tag).then_some(v))
    }

    /// Value stored for `tag`, or a bad response error naming the tag
    pub fn require(&self, tag: Tag) -> Result<&Bytes> {
        self.get(tag)
            .ok_or_else(|| Error::bad_response(format!("Missing TLV with tag {tag:#x}")))
    }

    /// Whether `tag` is present
    pub fn contains(&self, tag: Tag) -> bool {
        self.get(tag).is_some()
    }

    /// Number of distinct tags
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in order of first occurrence
    pub fn iter(&self) -> impl Iterator<Item = (Tag, &Bytes)> {
        self.entries.iter().map(|(t, v)| (*t, v))
    }
}

/// Encode a single record
pub fn encode(tag: Tag, value: &[u8]) -> Result<Bytes> {
    Ok(Tlv::new(tag, Bytes::copy_from_slice(value))?.to_bytes())
}

/// Encode records back to back
pub fn encode_list<'a>(tlvs: impl IntoIterator<Item = &'a Tlv>) -> Bytes {
    let mut buf = BytesMut::new();
    for tlv in tlvs {
        tlv.encode_into(&mut buf);
    }
    buf.freeze()
}

/// Decode records until `data` is exhausted
pub fn decode_list(data: &[u8]) -> Result<Vec<Tlv>> {
    let mut tlvs = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (tlv, consumed) = Tlv::decode(data, offset)?;
        offset += consumed;
        tlvs.push(tlv);
    }
    Ok(tlvs)
}

/// Decode records into a [`TlvMap`]
pub fn decode_map(data: &[u8]) -> Result<TlvMap> {
    let mut map = TlvMap::new();
    for tlv in decode_list(data)? {
        map.insert(tlv.tag, tlv.value);
    }
    Ok(map)
}

/// Decode exactly one record with the expected tag and return its value
pub fn unpack_value(expected_tag: Tag, data: &[u8]) -> Result<Bytes> {
    let (tlv, consumed) = Tlv::decode(data, 0)?;
    if tlv.tag != expected_tag {
        return Err(Error::bad_response(format!(
            "Expected TLV tag {expected_tag:#x}, got {:#x}",
            tlv.tag
        )));
    }
    if consumed != data.len() {
        return Err(Error::bad_response(format!(
            "{} trailing bytes after TLV {expected_tag:#x}",
            data.len() - consumed
        )));
    }
    Ok(tlv.value)
}

fn validate_tag(tag: Tag) -> Result<()> {
    let valid = if tag > 0xFF {
        (tag >> 8) as u8 & MULTI_BYTE_TAG_MARKER == MULTI_BYTE_TAG_MARKER
    } else {
        tag as u8 & MULTI_BYTE_TAG_MARKER != MULTI_BYTE_TAG_MARKER
    };
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!("Invalid TLV tag {tag:#x}")))
    }
}

const fn tag_len(tag: Tag) -> usize {
    if tag > 0xFF { 2 } else { 1 }
}

const fn length_len(length: usize) -> usize {
    if length < 0x80 {
        1
    } else if length <= 0xFF {
        2
    } else {
        3
    }
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let bytes = self
            .input
            .get(self.pos..self.pos + n)
            .ok_or_else(|| Error::bad_response(format!("Truncated TLV {what}")))?;
        self.pos += n;
        Ok(bytes)
    }

    fn byte(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }
}
