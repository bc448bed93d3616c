use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::StoreError;
use crate::constants::{
    DEFAULT_PART_SIZE, STORABLES_MAGIC, STORABLES_MAX_FIELDS, STORABLES_VERSION,
};

/// Bytes before the body of an encoded prefix: magic, version, body length.
pub const STORABLES_HEADER_LEN: usize = 7;

const MAX_BODY_LEN: usize = 64 * 1024;

/// Metadata stored as a prefix in front of an entry's payload.
///
/// Holds the part size the payload was framed with plus any number of named
/// string fields. The encoded length is known up front so the store can
/// reserve `prefix + payload` bytes in one allocation.
///
/// Layout: `"SB" | version u8 | body_len u32 | part_size u64 | count u16 |
/// (name_len u16, name, value_len u16, value)*`, big-endian.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Storables {
    part_size: u64,
    fields: BTreeMap<String, String>,
}

impl Storables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for a blob framed with the default part size.
    pub fn framed() -> Self {
        Self::new().with_part_size(DEFAULT_PART_SIZE)
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn body_len(&self) -> usize {
        8 + 2
            + self
                .fields
                .iter()
                .map(|(k, v)| 2 + k.len() + 2 + v.len())
                .sum::<usize>()
    }

    /// Length of the encoded prefix.
    pub fn encoded_len(&self) -> usize {
        STORABLES_HEADER_LEN + self.body_len()
    }

    pub fn encode(&self) -> Result<Bytes, StoreError> {
        if self.fields.len() > STORABLES_MAX_FIELDS {
            return Err(StoreError::CorruptMetadata(format!(
                "too many fields: {}",
                self.fields.len()
            )));
        }
        let body_len = self.body_len();
        if body_len > MAX_BODY_LEN {
            return Err(StoreError::CorruptMetadata(format!(
                "metadata too large: {} bytes",
                body_len
            )));
        }

        let mut buf = BytesMut::with_capacity(STORABLES_HEADER_LEN + body_len);
        buf.put_slice(&STORABLES_MAGIC);
        buf.put_u8(STORABLES_VERSION);
        buf.put_u32(body_len as u32);
        buf.put_u64(self.part_size);
        buf.put_u16(self.fields.len() as u16);
        for (name, value) in &self.fields {
            if name.len() > u16::MAX as usize || value.len() > u16::MAX as usize {
                return Err(StoreError::CorruptMetadata(format!("field too long: {}", name)));
            }
            buf.put_u16(name.len() as u16);
            buf.put_slice(name.as_bytes());
            buf.put_u16(value.len() as u16);
            buf.put_slice(value.as_bytes());
        }
        Ok(buf.freeze())
    }

    /// Validates a prefix header and returns the body length that follows it.
    pub fn decode_header(header: &[u8]) -> Result<usize, StoreError> {
        if header.len() < STORABLES_HEADER_LEN {
            return Err(StoreError::CorruptMetadata("header too short".into()));
        }
        if header[..2] != STORABLES_MAGIC {
            return Err(StoreError::CorruptMetadata("bad magic".into()));
        }
        if header[2] != STORABLES_VERSION {
            return Err(StoreError::CorruptMetadata(format!(
                "unsupported version {}",
                header[2]
            )));
        }
        let body_len = u32::from_be_bytes([header[3], header[4], header[5], header[6]]) as usize;
        if !(10..=MAX_BODY_LEN).contains(&body_len) {
            return Err(StoreError::CorruptMetadata(format!(
                "bad body length {}",
                body_len
            )));
        }
        Ok(body_len)
    }

    pub fn decode_body(mut body: &[u8]) -> Result<Self, StoreError> {
        if body.remaining() < 10 {
            return Err(StoreError::CorruptMetadata("body too short".into()));
        }
        let part_size = body.get_u64();
        let count = body.get_u16() as usize;
        if count > STORABLES_MAX_FIELDS {
            return Err(StoreError::CorruptMetadata(format!("too many fields: {}", count)));
        }

        let mut fields = BTreeMap::new();
        for _ in 0..count {
            let name = read_string(&mut body)?;
            let value = read_string(&mut body)?;
            fields.insert(name, value);
        }
        if body.has_remaining() {
            return Err(StoreError::CorruptMetadata("trailing bytes".into()));
        }

        Ok(Self { part_size, fields })
    }

    /// Decodes a complete prefix, returning the metadata and its encoded length.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), StoreError> {
        let body_len = Self::decode_header(data)?;
        let end = STORABLES_HEADER_LEN + body_len;
        if data.len() < end {
            return Err(StoreError::CorruptMetadata("prefix truncated".into()));
        }
        let storables = Self::decode_body(&data[STORABLES_HEADER_LEN..end])?;
        Ok((storables, end))
    }
}

fn read_string(body: &mut &[u8]) -> Result<String, StoreError> {
    if body.remaining() < 2 {
        return Err(StoreError::CorruptMetadata("field truncated".into()));
    }
    let len = body.get_u16() as usize;
    if body.remaining() < len {
        return Err(StoreError::CorruptMetadata("field truncated".into()));
    }
    let raw = body.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| StoreError::CorruptMetadata("field is not utf-8".into()))
}
