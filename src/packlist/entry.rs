//! Decoded entry view: a pure function of `(blob, offset)`.
//!
//! The view caches everything needed to size and address one entry. It holds
//! no reference into the blob, only byte counts and the offset it was decoded
//! at; any mutation of the blob invalidates it and callers must re-decode.

use super::encoding::{self, is_str};

/// Decode cache for a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Bytes of the prevlen field (1 or 5).
    pub prevlen_size: usize,
    /// Total byte length of the predecessor entry (0 at the head).
    pub prevlen: usize,
    /// Bytes of the encoding header (1, 2 or 5).
    pub enc_size: usize,
    /// Payload bytes (0 for immediate integers).
    pub payload_len: usize,
    /// `prevlen_size + enc_size`.
    pub header_size: usize,
    /// Normalized tag byte.
    pub encoding: u8,
    /// Offset of the entry's first byte in the blob.
    pub offset: usize,
}

impl Entry {
    /// Decode the entry starting at `offset`. `offset` must address an
    /// entry's first byte, not the end-of-list marker.
    pub fn decode(blob: &[u8], offset: usize) -> Entry {
        debug_assert_ne!(blob[offset], encoding::END, "decode at end-of-list");
        let (prevlen_size, prevlen) = encoding::decode_prevlen(blob, offset);
        let tag = blob[offset + prevlen_size];
        let (enc_size, payload_len, encoding) = if is_str(tag) {
            let (enc_size, len) = encoding::decode_str_header(blob, offset + prevlen_size);
            (enc_size, len, tag & encoding::STR_MASK)
        } else {
            (1, encoding::int_payload_size(tag), tag)
        };
        Entry {
            prevlen_size,
            prevlen,
            enc_size,
            payload_len,
            header_size: prevlen_size + enc_size,
            encoding,
            offset,
        }
    }

    /// Total bytes the entry occupies.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.header_size + self.payload_len
    }

    /// Offset of the first payload byte.
    #[inline]
    pub fn payload_offset(&self) -> usize {
        self.offset + self.header_size
    }

    /// True when the payload is a string.
    #[inline]
    pub fn is_str(&self) -> bool {
        is_str(self.encoding)
    }
}

/// Total byte length of the entry at `offset` without materializing a view.
#[inline]
pub fn raw_entry_len(blob: &[u8], offset: usize) -> usize {
    Entry::decode(blob, offset).total_size()
}
