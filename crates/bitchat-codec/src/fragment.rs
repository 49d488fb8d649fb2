//! Fragment framing (§6.5). A packet whose encoding exceeds
//! [`crate::constants::FRAGMENT_THRESHOLD`] is split into a `FRAGMENT_START`
//! frame followed by zero or more `FRAGMENT_CONTINUE` frames and a final
//! `FRAGMENT_END` frame; each frame's payload is one [`FragmentFrame`].

use crate::constants::MAX_FRAGMENT_SIZE;
use crate::error::{CodecError, Result};
use crate::reader::{Reader, Writer};

/// One slice of a larger packet that didn't fit in a single frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FragmentFrame {
    pub fragment_id: [u8; 8],
    pub index: u16,
    pub total: u16,
    /// `packet_type` of the original, unfragmented packet.
    pub original_type: u8,
    pub data: Vec<u8>,
}

impl FragmentFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(13 + self.data.len());
        w.write_bytes(&self.fragment_id);
        w.write_u16(self.index);
        w.write_u16(self.total);
        w.write_u8(self.original_type);
        w.write_bytes(&self.data);
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let fragment_id = r.read_array::<8>().ok_or(CodecError::TruncatedInput)?;
        let index = r.read_u16().ok_or(CodecError::TruncatedInput)?;
        let total = r.read_u16().ok_or(CodecError::TruncatedInput)?;
        if total == 0 || index >= total {
            return Err(CodecError::LengthOverflow);
        }
        let original_type = r.read_u8().ok_or(CodecError::TruncatedInput)?;
        let data = r.read_fixed(r.remaining()).ok_or(CodecError::TruncatedInput)?;
        Ok(Self {
            fragment_id,
            index,
            total,
            original_type,
            data: data.to_vec(),
        })
    }
}

/// Splits `data` (an already-encoded packet) into fragments of at most
/// [`MAX_FRAGMENT_SIZE`] bytes each. Returns an empty vec only when `data`
/// is empty, which callers should treat as "don't fragment."
pub fn split(fragment_id: [u8; 8], original_type: u8, data: &[u8]) -> Vec<FragmentFrame> {
    if data.is_empty() {
        return Vec::new();
    }
    let chunks: Vec<&[u8]> = data.chunks(MAX_FRAGMENT_SIZE).collect();
    let total = chunks.len() as u16;
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| FragmentFrame {
            fragment_id,
            index: index as u16,
            total,
            original_type,
            data: chunk.to_vec(),
        })
        .collect()
}

/// Reassembles fragments already known to share one `fragment_id`, in
/// arrival order with no assumption about index order. Returns `None` if
/// the set is incomplete or contains a duplicate/out-of-range index.
pub fn reassemble(fragments: &[FragmentFrame]) -> Option<(u8, Vec<u8>)> {
    let total = fragments.first()?.total as usize;
    if fragments.len() != total {
        return None;
    }
    let original_type = fragments.first()?.original_type;
    let mut ordered: Vec<Option<&FragmentFrame>> = vec![None; total];
    for frame in fragments {
        if frame.total as usize != total || frame.original_type != original_type {
            return None;
        }
        let slot = ordered.get_mut(frame.index as usize)?;
        if slot.is_some() {
            return None;
        }
        *slot = Some(frame);
    }
    let mut data = Vec::new();
    for slot in ordered {
        data.extend_from_slice(&slot?.data);
    }
    Some((original_type, data))
}
