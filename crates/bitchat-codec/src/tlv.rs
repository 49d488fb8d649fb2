//! Tag-length-value helpers shared by the payload types in [`crate::payloads`].
//!
//! Every TLV field is `tag:u8 | len:u8 | value`. A `u8` length caps a single
//! field at 255 bytes, which is enough for every field bitchat payloads
//! carry (public keys, nicknames, fingerprints); payloads that need more
//! room (message bodies) are framed directly by the enclosing packet's
//! `u16` payload length instead of as a TLV field.

use crate::error::{CodecError, Result};
use crate::reader::{Reader, Writer};

pub struct TlvWriter {
    inner: Writer,
}

impl TlvWriter {
    pub fn new() -> Self {
        Self { inner: Writer::new() }
    }

    pub fn field(&mut self, tag: u8, value: &[u8]) -> &mut Self {
        self.inner.write_u8(tag);
        self.inner.write_length_prefixed_u8(value);
        self
    }

    pub fn field_u8(&mut self, tag: u8, value: u8) -> &mut Self {
        self.field(tag, &[value])
    }

    pub fn field_u64(&mut self, tag: u8, value: u64) -> &mut Self {
        self.field(tag, &value.to_be_bytes())
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.inner.into_vec()
    }
}

impl Default for TlvWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks a flat sequence of `tag | len | value` fields, handing each one to
/// `visit`. Stops at the first malformed field.
pub fn for_each_field<'a>(bytes: &'a [u8], mut visit: impl FnMut(u8, &'a [u8]) -> Result<()>) -> Result<()> {
    let mut r = Reader::new(bytes);
    while !r.is_empty() {
        let tag = r.read_u8().ok_or(CodecError::TruncatedInput)?;
        let value = r
            .read_length_prefixed_u8(u8::MAX as usize)
            .ok_or(CodecError::TruncatedInput)?;
        visit(tag, value)?;
    }
    Ok(())
}

pub fn read_u8_field(value: &[u8]) -> Result<u8> {
    value.first().copied().ok_or(CodecError::TruncatedInput)
}

pub fn read_u64_field(value: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = value.try_into().map_err(|_| CodecError::TruncatedInput)?;
    Ok(u64::from_be_bytes(arr))
}
