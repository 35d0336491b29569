//! Blob and wire formats
//!
//! All integers are little-endian.
//!
//! ## Subkey List
//! ```text
//! ┌───────────┬──────────┬─────────┬─────┐
//! │ count (4) │ len (4)  │ bytes   │ ... │
//! └───────────┴──────────┴─────────┴─────┘
//! ```
//!
//! ## Attribute List (entries sorted by name)
//! ```text
//! ┌───────────┬───────────────┬──────┬────────────────┬───────┬─────┐
//! │ count (4) │ name_len (4)  │ name │ value_len (4)  │ value │ ... │
//! └───────────┴───────────────┴──────┴────────────────┴───────┴─────┘
//! ```
//!
//! ## Serialized Element
//! ```text
//! ┌──────────┬─────────────┬──────────────────────────────────┬───────────────────────┐
//! │ hash (4) │ subhash (4) │ 4 x [len (8) | rel_offset (8)]   │ key|value|subkeys|attrs│
//! └──────────┴─────────────┴──────────────────────────────────┴───────────────────────┘
//! ```
//! Offsets are relative to the start of the record; the four blobs follow
//! the 72-byte header back to back.
//!
//! ## Queue Marker
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬──────────────┬──────┬──────┐
//! │ head_len (4) │ head_off (4) │ tail_len (4) │ tail_off (4) │ head │ tail │
//! └──────────────┴──────────────┴──────────────┴──────────────┴──────┴──────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::attrs::Attributes;
use crate::error::{Result, ShmkvError};
use crate::hash::KeyHash;

// =============================================================================
// Length-Prefixed Lists
// =============================================================================

fn take_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(ShmkvError::corrupt(format!("{} truncated", what)));
    }
    Ok(buf.get_u32_le())
}

fn take_bytes(buf: &mut &[u8], what: &str) -> Result<Vec<u8>> {
    let len = take_u32(buf, what)? as usize;
    if buf.remaining() < len {
        return Err(ShmkvError::corrupt(format!(
            "{} entry of {} bytes overruns the blob",
            what, len
        )));
    }
    let out = buf[..len].to_vec();
    buf.advance(len);
    Ok(out)
}

/// Encode a subkey list
pub(crate) fn encode_subkeys(subkeys: &[Vec<u8>]) -> Vec<u8> {
    if subkeys.is_empty() {
        return Vec::new();
    }
    let size = 4 + subkeys.iter().map(|k| 4 + k.len()).sum::<usize>();
    let mut buf = Vec::with_capacity(size);
    buf.put_u32_le(subkeys.len() as u32);
    for key in subkeys {
        buf.put_u32_le(key.len() as u32);
        buf.put_slice(key);
    }
    buf
}

/// Decode a subkey list (an empty blob is an empty list)
pub(crate) fn decode_subkeys(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let mut buf = bytes;
    let count = take_u32(&mut buf, "subkey list")?;
    let mut out = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        out.push(take_bytes(&mut buf, "subkey list")?);
    }
    if buf.has_remaining() {
        return Err(ShmkvError::corrupt("trailing bytes after subkey list"));
    }
    Ok(out)
}

/// Encode an attribute list
pub(crate) fn encode_attrs(attrs: &Attributes) -> Vec<u8> {
    if attrs.is_empty() {
        return Vec::new();
    }
    let mut buf = Vec::new();
    buf.put_u32_le(attrs.len() as u32);
    for (name, value) in attrs.iter() {
        buf.put_u32_le(name.len() as u32);
        buf.put_slice(name);
        buf.put_u32_le(value.len() as u32);
        buf.put_slice(value);
    }
    buf
}

/// Decode an attribute list, checking that names are strictly ascending
pub(crate) fn decode_attrs(bytes: &[u8]) -> Result<Attributes> {
    if bytes.is_empty() {
        return Ok(Attributes::new());
    }
    let mut buf = bytes;
    let count = take_u32(&mut buf, "attribute list")?;
    let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let name = take_bytes(&mut buf, "attribute list")?;
        let value = take_bytes(&mut buf, "attribute list")?;
        if let Some((last, _)) = entries.last() {
            if *last >= name {
                return Err(ShmkvError::corrupt("attribute list is not sorted by name"));
            }
        }
        entries.push((name, value));
    }
    if buf.has_remaining() {
        return Err(ShmkvError::corrupt("trailing bytes after attribute list"));
    }
    Ok(Attributes::from_sorted(entries))
}

// =============================================================================
// Serialized Element
// =============================================================================

/// Size of the fixed serialized element header
pub const ELEMENT_HEADER_SIZE: usize = 8 + 4 * 16;

/// A self-contained copy of one element, as produced by a range scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedElement {
    bytes: Bytes,
    spans: [(usize, usize); 4],
}

impl SerializedElement {
    /// Pack an element's hashes and blobs into one buffer
    pub fn encode(
        key_hash: KeyHash,
        key: &[u8],
        value: &[u8],
        subkeys: &[u8],
        attrs: &[u8],
    ) -> Self {
        let blobs = [key, value, subkeys, attrs];
        let total = ELEMENT_HEADER_SIZE + blobs.iter().map(|b| b.len()).sum::<usize>();
        let mut buf = BytesMut::with_capacity(total);

        buf.put_u32_le(key_hash.hash);
        buf.put_u32_le(key_hash.subhash);

        let mut spans = [(0usize, 0usize); 4];
        let mut offset = ELEMENT_HEADER_SIZE;
        for (i, blob) in blobs.iter().enumerate() {
            buf.put_u64_le(blob.len() as u64);
            buf.put_u64_le(offset as u64);
            spans[i] = (offset, blob.len());
            offset += blob.len();
        }
        for blob in blobs {
            buf.put_slice(blob);
        }

        Self {
            bytes: buf.freeze(),
            spans,
        }
    }

    /// Validate a received buffer
    ///
    /// Lengths and offsets must describe four back-to-back blobs that end
    /// exactly at the end of the buffer, and the key must not be empty.
    pub fn decode(bytes: Bytes) -> Result<Self> {
        if bytes.len() < ELEMENT_HEADER_SIZE {
            return Err(ShmkvError::corrupt(format!(
                "serialized element of {} bytes is shorter than its header",
                bytes.len()
            )));
        }

        let mut header = &bytes[8..ELEMENT_HEADER_SIZE];
        let mut spans = [(0usize, 0usize); 4];
        let mut expected = ELEMENT_HEADER_SIZE as u64;
        for span in spans.iter_mut() {
            let len = header.get_u64_le();
            let offset = header.get_u64_le();
            if offset != expected {
                return Err(ShmkvError::corrupt(format!(
                    "serialized blob at offset {} (expected {})",
                    offset, expected
                )));
            }
            expected = offset
                .checked_add(len)
                .filter(|end| *end <= bytes.len() as u64)
                .ok_or_else(|| ShmkvError::corrupt("serialized blob overruns the buffer"))?;
            *span = (offset as usize, len as usize);
        }
        if expected != bytes.len() as u64 {
            return Err(ShmkvError::corrupt(format!(
                "serialized element has {} trailing bytes",
                bytes.len() as u64 - expected
            )));
        }
        if spans[0].1 == 0 {
            return Err(ShmkvError::corrupt("serialized element has an empty key"));
        }

        Ok(Self { bytes, spans })
    }

    fn span(&self, i: usize) -> &[u8] {
        let (offset, len) = self.spans[i];
        &self.bytes[offset..offset + len]
    }

    pub fn key_hash(&self) -> KeyHash {
        let mut head = &self.bytes[..8];
        let hash = head.get_u32_le();
        let subhash = head.get_u32_le();
        KeyHash::new(hash, subhash)
    }

    pub fn key(&self) -> &[u8] {
        self.span(0)
    }

    pub fn value(&self) -> &[u8] {
        self.span(1)
    }

    /// Raw subkey list blob
    pub fn subkeys_blob(&self) -> &[u8] {
        self.span(2)
    }

    /// Raw attribute list blob
    pub fn attrs_blob(&self) -> &[u8] {
        self.span(3)
    }

    pub fn subkeys(&self) -> Result<Vec<Vec<u8>>> {
        decode_subkeys(self.subkeys_blob())
    }

    pub fn attrs(&self) -> Result<Attributes> {
        decode_attrs(self.attrs_blob())
    }

    /// The whole record
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

// =============================================================================
// Queue Marker
// =============================================================================

const MARKER_HEADER_SIZE: usize = 16;

/// Head and tail keys of a queue; both empty when the queue is empty
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Marker {
    pub head: Vec<u8>,
    pub tail: Vec<u8>,
}

impl Marker {
    pub fn is_empty(&self) -> bool {
        self.head.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MARKER_HEADER_SIZE + self.head.len() + self.tail.len());
        let head_off = MARKER_HEADER_SIZE as u32;
        let tail_off = head_off + self.head.len() as u32;
        buf.put_u32_le(self.head.len() as u32);
        buf.put_u32_le(head_off);
        buf.put_u32_le(self.tail.len() as u32);
        buf.put_u32_le(tail_off);
        buf.put_slice(&self.head);
        buf.put_slice(&self.tail);
        buf
    }

    /// Decode a marker value (a missing or empty value is an empty queue)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        if bytes.len() < MARKER_HEADER_SIZE {
            return Err(ShmkvError::corrupt("queue marker shorter than its header"));
        }

        let mut header = &bytes[..MARKER_HEADER_SIZE];
        let head_len = header.get_u32_le() as usize;
        let head_off = header.get_u32_le() as usize;
        let tail_len = header.get_u32_le() as usize;
        let tail_off = header.get_u32_le() as usize;

        let slice = |off: usize, len: usize| {
            off.checked_add(len)
                .filter(|end| *end <= bytes.len())
                .map(|end| bytes[off..end].to_vec())
                .ok_or_else(|| ShmkvError::corrupt("queue marker key overruns the marker"))
        };
        let marker = Self {
            head: slice(head_off, head_len)?,
            tail: slice(tail_off, tail_len)?,
        };

        if marker.head.is_empty() != marker.tail.is_empty() {
            return Err(ShmkvError::corrupt("queue marker has only one of head and tail"));
        }
        Ok(marker)
    }
}
