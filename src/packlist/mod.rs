//! Packed entry list: a doubly-traversable sequence of small strings and
//! integers in one contiguous blob.
//!
//! Layout: `total:u32 LE | tail:u32 LE | count:u16 LE | entries | 0xFF`.
//! `tail` is the offset of the last entry's first byte, `count` saturates at
//! `0xFFFF` (sentinel: traverse to count). Each entry is
//! `<prevlen><encoding>[<payload>]`; the prevlen chain makes backward
//! traversal possible without an index.
//!
//! Every mutation may reallocate and shift the blob, so entry identity is a
//! byte offset that callers must re-derive after any mutating call. The
//! central invariant is the prevlen cascade: when an entry's size changes,
//! successor prevlen fields grow (1 to 5 bytes) as needed, propagating until
//! a field is already wide enough. Fields are never shrunk back; a field
//! that could shrink keeps its 5-byte form re-encoded with the smaller
//! value, which stops repeated edits at a boundary size from oscillating.

pub mod encoding;
pub mod entry;

use crate::config::PACKLIST_SAFETY_LIMIT;
use encoding::END;
pub use entry::Entry;

/// Blob header size: `total:u32` + `tail:u32` + `count:u16`.
pub const HEADER_SIZE: usize = 10;

/// Bytes of an empty list (header plus the end marker).
pub const EMPTY_SIZE: usize = HEADER_SIZE + 1;

/// Saturation sentinel of the `count` header field.
const COUNT_SENTINEL: u16 = u16::MAX;

// ─────────────────────────────────────────────────────────────────────────────
// Error and value types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors surfaced by packed-entry-list operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackError {
    /// The mutation would push the blob past the safety limit.
    Full,
    /// Blob shorter than its own header claims.
    Truncated,
    /// The `total` header field disagrees with the byte length.
    TotalMismatch,
    /// Missing or misplaced end-of-list marker.
    BadTerminator,
    /// An entry carries an undefined encoding tag.
    BadTag,
    /// An entry's prevlen does not match its predecessor's size.
    PrevlenMismatch,
    /// The `tail` header field does not address the last entry.
    TailMismatch,
    /// The `count` header field disagrees with the entry count.
    CountMismatch,
}

/// A decoded entry payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackValue<'a> {
    Str(&'a [u8]),
    Int(i64),
}

impl PackValue<'_> {
    /// Payload as owned bytes (integers in their decimal form).
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            PackValue::Str(s) => s.to_vec(),
            PackValue::Int(v) => v.to_string().into_bytes(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PackList
// ─────────────────────────────────────────────────────────────────────────────

/// The packed entry list. Owns exactly one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackList {
    blob: Vec<u8>,
}

impl Default for PackList {
    fn default() -> Self {
        PackList::new()
    }
}

impl PackList {
    /// Empty list: header + end marker, 11 bytes.
    pub fn new() -> PackList {
        let mut blob = vec![0u8; EMPTY_SIZE];
        blob[0..4].copy_from_slice(&(EMPTY_SIZE as u32).to_le_bytes());
        blob[4..8].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        blob[EMPTY_SIZE - 1] = END;
        PackList { blob }
    }

    // ── header accessors ─────────────────────────────────────────────────────

    #[inline]
    fn tail_offset(&self) -> usize {
        u32::from_le_bytes(self.blob[4..8].try_into().unwrap()) as usize
    }

    #[inline]
    fn set_tail_offset(&mut self, off: usize) {
        self.blob[4..8].copy_from_slice(&(off as u32).to_le_bytes());
    }

    #[inline]
    fn count_raw(&self) -> u16 {
        u16::from_le_bytes(self.blob[8..10].try_into().unwrap())
    }

    #[inline]
    fn set_count_raw(&mut self, count: u16) {
        self.blob[8..10].copy_from_slice(&count.to_le_bytes());
    }

    /// Adjust the count header by `delta`, honoring the saturation sentinel.
    fn adjust_count(&mut self, delta: isize) {
        let raw = self.count_raw();
        if raw < COUNT_SENTINEL {
            let new = (raw as isize + delta).max(0) as usize;
            self.set_count_raw(new.min(COUNT_SENTINEL as usize) as u16);
        }
    }

    /// Grow or shrink the blob, keeping the `total` field and the end marker
    /// in sync. Content beyond the end marker position is unspecified.
    fn resize_blob(&mut self, new_len: usize) {
        self.blob.resize(new_len, 0);
        self.blob[0..4].copy_from_slice(&(new_len as u32).to_le_bytes());
        self.blob[new_len - 1] = END;
    }

    // ── size and traversal ───────────────────────────────────────────────────

    /// Total blob size in bytes.
    #[inline]
    pub fn blob_len(&self) -> usize {
        self.blob.len()
    }

    /// The serialized form; valid input for `from_bytes`.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.blob
    }

    /// Whether adding `add` payload bytes keeps the blob under the limit.
    #[inline]
    pub fn safe_to_add(&self, add: usize) -> bool {
        self.blob.len() + add + 11 <= PACKLIST_SAFETY_LIMIT
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blob[HEADER_SIZE] == END
    }

    /// Element count. O(1) while the header count is exact, O(n) once it has
    /// saturated.
    pub fn len(&self) -> usize {
        let raw = self.count_raw();
        if raw < COUNT_SENTINEL {
            return raw as usize;
        }
        let mut n = 0usize;
        let mut p = HEADER_SIZE;
        while self.blob[p] != END {
            p += entry::raw_entry_len(&self.blob, p);
            n += 1;
        }
        n
    }

    /// Offset of the first entry.
    pub fn head_offset(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(HEADER_SIZE)
        }
    }

    /// Offset of the last entry.
    pub fn tail_entry_offset(&self) -> Option<usize> {
        let t = self.tail_offset();
        if self.blob[t] == END {
            None
        } else {
            Some(t)
        }
    }

    /// Offset of the entry after the one at `offset`.
    pub fn next(&self, offset: usize) -> Option<usize> {
        if self.blob[offset] == END {
            return None;
        }
        let n = offset + entry::raw_entry_len(&self.blob, offset);
        if self.blob[n] == END {
            None
        } else {
            Some(n)
        }
    }

    /// Offset of the entry before the one at `offset`.
    pub fn prev(&self, offset: usize) -> Option<usize> {
        if self.blob[offset] == END {
            return self.tail_entry_offset();
        }
        if offset == HEADER_SIZE {
            return None;
        }
        let (_, prevlen) = encoding::decode_prevlen(&self.blob, offset);
        debug_assert!(prevlen > 0);
        Some(offset - prevlen)
    }

    /// Offset of the entry at `index`; negative indexes count from the tail
    /// (`-1` is the last entry) and walk the prevlen chain.
    pub fn index(&self, index: i64) -> Option<usize> {
        if index < 0 {
            let mut remaining = index.unsigned_abs() - 1;
            let mut p = self.tail_entry_offset()?;
            loop {
                if remaining == 0 {
                    return Some(p);
                }
                let (_, prevlen) = encoding::decode_prevlen(&self.blob, p);
                if prevlen == 0 {
                    return None;
                }
                p -= prevlen;
                remaining -= 1;
            }
        } else {
            let mut remaining = index;
            let mut p = HEADER_SIZE;
            while self.blob[p] != END {
                if remaining == 0 {
                    return Some(p);
                }
                p += entry::raw_entry_len(&self.blob, p);
                remaining -= 1;
            }
            None
        }
    }

    /// Decode the payload of the entry at `offset`.
    pub fn get(&self, offset: usize) -> Option<PackValue<'_>> {
        if offset >= self.blob.len() || self.blob[offset] == END {
            return None;
        }
        let e = Entry::decode(&self.blob, offset);
        Some(if e.is_str() {
            PackValue::Str(&self.blob[e.payload_offset()..e.payload_offset() + e.payload_len])
        } else {
            PackValue::Int(encoding::load_int(&self.blob, e.payload_offset(), e.encoding))
        })
    }

    /// Compare the entry at `offset` against raw bytes: string entries
    /// byte-compare, integer entries compare by value when `data` parses as
    /// an integer.
    pub fn entry_eq(&self, offset: usize, data: &[u8]) -> bool {
        if self.blob[offset] == END {
            return false;
        }
        let e = Entry::decode(&self.blob, offset);
        if e.is_str() {
            e.payload_len == data.len()
                && &self.blob[e.payload_offset()..e.payload_offset() + e.payload_len] == data
        } else {
            match encoding::parse_int(data) {
                Some(v) => encoding::load_int(&self.blob, e.payload_offset(), e.encoding) == v,
                None => false,
            }
        }
    }

    /// Find the first entry equal to `needle` starting at `from`, visiting
    /// one entry in every `skip + 1`.
    pub fn find(&self, from: usize, needle: &[u8], skip: usize) -> Option<usize> {
        let mut p = from;
        let mut skipcnt = 0usize;
        // The integer form of the needle is computed at most once, and only
        // if an integer entry is actually reached.
        let mut needle_int: Option<Option<i64>> = None;
        while self.blob[p] != END {
            let e = Entry::decode(&self.blob, p);
            if skipcnt == 0 {
                if e.is_str() {
                    if e.payload_len == needle.len()
                        && &self.blob[e.payload_offset()..e.payload_offset() + e.payload_len]
                            == needle
                    {
                        return Some(p);
                    }
                } else {
                    let cached = needle_int.get_or_insert_with(|| encoding::parse_int(needle));
                    if let Some(v) = cached {
                        if encoding::load_int(&self.blob, e.payload_offset(), e.encoding) == *v {
                            return Some(p);
                        }
                    }
                }
                skipcnt = skip;
            } else {
                skipcnt -= 1;
            }
            p += e.total_size();
        }
        None
    }

    // ── mutation ─────────────────────────────────────────────────────────────

    /// Append at the tail. Returns the new entry's offset.
    pub fn push_tail(&mut self, data: &[u8]) -> Result<usize, PackError> {
        let end = self.blob.len() - 1;
        self.insert(end, data)
    }

    /// Prepend at the head. Returns the new entry's offset.
    pub fn push_head(&mut self, data: &[u8]) -> Result<usize, PackError> {
        self.insert(HEADER_SIZE, data)
    }

    /// Insert `data` before the entry at `offset` (or at the very end when
    /// `offset` addresses the end marker). Returns the new entry's offset.
    pub fn insert(&mut self, offset: usize, data: &[u8]) -> Result<usize, PackError> {
        let cur_len = self.blob.len();

        // prevlen of the new entry: size of the entry it lands after.
        let prevlen = if self.blob[offset] != END {
            encoding::decode_prevlen(&self.blob, offset).1
        } else {
            match self.tail_entry_offset() {
                Some(t) => entry::raw_entry_len(&self.blob, t),
                None => 0,
            }
        };

        // Payload encoding: integer when the text qualifies, else string.
        let int_form = encoding::try_int_encode(data);
        let (enc_size, payload_size) = match int_form {
            Some((_, e)) => (1, encoding::int_payload_size(e)),
            None => (encoding::str_header_size(data.len()), data.len()),
        };
        let reqlen = encoding::prevlen_size(prevlen) + enc_size + payload_size;

        // Room the successor's prevlen field gains or loses. A field that
        // could shrink is kept wide (forcelarge) so boundary-size edits do
        // not oscillate.
        let mut forcelarge = false;
        let mut nextdiff: isize = if self.blob[offset] != END {
            let have = encoding::decode_prevlen(&self.blob, offset).0;
            encoding::prevlen_size(reqlen) as isize - have as isize
        } else {
            0
        };
        if nextdiff == -4 && reqlen < 4 {
            nextdiff = 0;
            forcelarge = true;
        }

        let new_len = (cur_len as isize + reqlen as isize + nextdiff) as usize;
        if new_len > PACKLIST_SAFETY_LIMIT {
            return Err(PackError::Full);
        }

        if self.blob[offset] != END {
            // Grow, then shift the successor region right. The source range
            // starts `nextdiff` bytes before the successor so the shifted
            // image leaves exactly the right room for its new prevlen field.
            self.resize_blob(new_len);
            let src_start = (offset as isize - nextdiff) as usize;
            self.blob.copy_within(src_start..cur_len - 1, offset + reqlen);

            if forcelarge {
                encoding::store_prevlen_large(&mut self.blob, offset + reqlen, reqlen);
            } else {
                encoding::store_prevlen(&mut self.blob, offset + reqlen, reqlen);
            }

            let mut tail = self.tail_offset() + reqlen;
            let succ = Entry::decode(&self.blob, offset + reqlen);
            if self.blob[offset + reqlen + succ.total_size()] != END {
                tail = (tail as isize + nextdiff) as usize;
            }
            self.set_tail_offset(tail);
        } else {
            self.resize_blob(new_len);
            self.set_tail_offset(offset);
        }

        // Write the new entry.
        let mut p = offset;
        p += encoding::store_prevlen(&mut self.blob, p, prevlen);
        match int_form {
            Some((v, e)) => {
                self.blob[p] = e;
                encoding::store_int(&mut self.blob, p + 1, e, v);
            }
            None => {
                p += encoding::store_str_header(&mut self.blob, p, data.len());
                self.blob[p..p + data.len()].copy_from_slice(data);
            }
        }
        self.adjust_count(1);

        if nextdiff != 0 {
            self.cascade_update(offset + reqlen);
        }
        Ok(offset)
    }

    /// Delete the entry at `offset`. Returns the offset of the entry that
    /// now sits there (the old successor), or `None` at the end.
    pub fn delete(&mut self, offset: usize) -> Option<usize> {
        self.delete_at(offset, 1);
        if self.blob[offset] == END {
            None
        } else {
            Some(offset)
        }
    }

    /// Delete `count` entries starting at `index`. Returns how many were
    /// actually deleted.
    pub fn delete_range(&mut self, index: i64, count: usize) -> usize {
        match self.index(index) {
            Some(p) => self.delete_at(p, count),
            None => 0,
        }
    }

    /// Delete up to `num` entries starting at the entry at `offset`.
    fn delete_at(&mut self, offset: usize, num: usize) -> usize {
        if self.blob[offset] == END {
            return 0;
        }
        let first = Entry::decode(&self.blob, offset);
        let mut p = offset;
        let mut deleted = 0usize;
        while self.blob[p] != END && deleted < num {
            p += entry::raw_entry_len(&self.blob, p);
            deleted += 1;
        }
        if deleted == 0 {
            return 0;
        }
        let totlen = p - offset;
        let cur_len = self.blob.len();
        let mut nextdiff: isize = 0;

        if self.blob[p] != END {
            // The survivor behind the gap takes the prevlen of the entry
            // that preceded the deleted range. There is always room: a
            // wider field reuses bytes of a deleted entry.
            let have = encoding::decode_prevlen(&self.blob, p).0;
            nextdiff = encoding::prevlen_size(first.prevlen) as isize - have as isize;
            let p_new = (p as isize - nextdiff) as usize;
            encoding::store_prevlen(&mut self.blob, p_new, first.prevlen);

            let mut tail = self.tail_offset() - totlen;
            let survivor = Entry::decode(&self.blob, p_new);
            if self.blob[p_new + survivor.total_size()] != END {
                tail = (tail as isize + nextdiff) as usize;
            }
            self.set_tail_offset(tail);

            self.blob.copy_within(p_new..cur_len - 1, offset);
        } else {
            // Whole tail removed: the predecessor becomes the tail.
            self.set_tail_offset(offset - first.prevlen);
        }

        let new_len = (cur_len as isize - totlen as isize + nextdiff) as usize;
        self.resize_blob(new_len);
        self.adjust_count(-(deleted as isize));

        if nextdiff != 0 {
            self.cascade_update(offset);
        }
        deleted
    }

    /// Propagate a size change along successor prevlen fields, starting at
    /// the entry at `p` (whose own size may have just changed).
    ///
    /// Grows 1-byte fields to 5 bytes as needed and walks forward until a
    /// field already matches. A field that is wider than necessary keeps its
    /// width, re-encoded with the smaller value. Terminates in at most one
    /// pass over the remaining entries.
    fn cascade_update(&mut self, mut p: usize) {
        while self.blob[p] != END {
            let cur = Entry::decode(&self.blob, p);
            let rawlen = cur.total_size();
            let rawlensize = encoding::prevlen_size(rawlen);

            let np = p + rawlen;
            if self.blob[np] == END {
                break;
            }
            let next = Entry::decode(&self.blob, np);
            if next.prevlen == rawlen {
                break;
            }

            if next.prevlen_size < rawlensize {
                let cur_total = self.blob.len();
                let extra = rawlensize - next.prevlen_size;
                self.resize_blob(cur_total + extra);
                // The entry keeps its start; only entries after it shift.
                if self.tail_offset() != np {
                    let t = self.tail_offset();
                    self.set_tail_offset(t + extra);
                }
                self.blob
                    .copy_within(np + next.prevlen_size..cur_total - 1, np + rawlensize);
                encoding::store_prevlen(&mut self.blob, np, rawlen);
                p = np;
            } else {
                if next.prevlen_size > rawlensize {
                    encoding::store_prevlen_large(&mut self.blob, np, rawlen);
                } else {
                    encoding::store_prevlen(&mut self.blob, np, rawlen);
                }
                break;
            }
        }
    }

    /// Concatenate two lists, preserving `first`-then-`second` order. The
    /// larger blob is extended in place; the boundary entry's prevlen is
    /// fixed up by a cascade pass.
    pub fn merge(first: PackList, second: PackList) -> Result<PackList, PackError> {
        if first.is_empty() {
            return Ok(second);
        }
        if second.is_empty() {
            return Ok(first);
        }
        let combined = first.blob_len() + second.blob_len() - EMPTY_SIZE;
        if combined > PACKLIST_SAFETY_LIMIT {
            return Err(PackError::Full);
        }

        let first_count = first.len();
        let second_count = second.len();
        let append = first.blob_len() >= second.blob_len();
        let (mut target, source) = if append {
            (first, second)
        } else {
            (second, first)
        };
        let target_bytes = target.blob_len();
        let source_bytes = source.blob_len();
        let extra = source_bytes - EMPTY_SIZE;

        let (first_tail, merged_tail);
        if append {
            // Source entries land after the target's, over its end marker.
            first_tail = target.tail_offset();
            merged_tail = (source.tail_offset() - HEADER_SIZE) + (target_bytes - 1);
            target.resize_blob(target_bytes + extra);
            target.blob[target_bytes - 1..target_bytes - 1 + extra]
                .copy_from_slice(&source.blob[HEADER_SIZE..source_bytes - 1]);
        } else {
            // Source entries land in front; target entries shift right.
            first_tail = source.tail_offset();
            merged_tail = target.tail_offset() + extra;
            target.resize_blob(target_bytes + extra);
            target
                .blob
                .copy_within(HEADER_SIZE..target_bytes - 1, HEADER_SIZE + extra);
            target.blob[HEADER_SIZE..HEADER_SIZE + extra]
                .copy_from_slice(&source.blob[HEADER_SIZE..source_bytes - 1]);
        }
        target.set_tail_offset(merged_tail);
        let total = first_count + second_count;
        target.set_count_raw(total.min(COUNT_SENTINEL as usize) as u16);

        // The old head of the logical-second list still claims prevlen 0;
        // let the cascade rewrite it (and anything downstream).
        target.cascade_update(first_tail);
        Ok(target)
    }

    // ── deserialization ──────────────────────────────────────────────────────

    /// Validate and adopt a serialized blob: header fields, every entry's
    /// tag and bounds, the prevlen chain, the tail offset and the count.
    pub fn from_bytes(bytes: &[u8]) -> Result<PackList, PackError> {
        if bytes.len() < EMPTY_SIZE {
            return Err(PackError::Truncated);
        }
        let total = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if total != bytes.len() {
            return Err(PackError::TotalMismatch);
        }
        if bytes[bytes.len() - 1] != END {
            return Err(PackError::BadTerminator);
        }
        let tail = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let count = u16::from_le_bytes(bytes[8..10].try_into().unwrap());

        let mut p = HEADER_SIZE;
        let mut prev_size = 0usize;
        let mut last_offset = HEADER_SIZE;
        let mut walked = 0usize;
        while p < bytes.len() - 1 && bytes[p] != END {
            let size = Self::validate_entry(bytes, p, prev_size)?;
            last_offset = p;
            prev_size = size;
            p += size;
            walked += 1;
        }
        if p != bytes.len() - 1 {
            return Err(PackError::BadTerminator);
        }
        let expect_tail = if walked == 0 { HEADER_SIZE } else { last_offset };
        if tail != expect_tail {
            return Err(PackError::TailMismatch);
        }
        if count != COUNT_SENTINEL && count as usize != walked {
            return Err(PackError::CountMismatch);
        }
        Ok(PackList {
            blob: bytes.to_vec(),
        })
    }

    /// Bounds- and tag-check one entry; returns its total size.
    fn validate_entry(bytes: &[u8], p: usize, expect_prevlen: usize) -> Result<usize, PackError> {
        let limit = bytes.len() - 1;
        // prevlen field
        let (plsize, prevlen) = if bytes[p] < encoding::PREVLEN_LARGE_MARKER {
            (1, bytes[p] as usize)
        } else {
            if p + 5 > limit {
                return Err(PackError::Truncated);
            }
            (
                5,
                u32::from_le_bytes(bytes[p + 1..p + 5].try_into().unwrap()) as usize,
            )
        };
        if prevlen != expect_prevlen {
            return Err(PackError::PrevlenMismatch);
        }
        if p + plsize >= limit {
            return Err(PackError::Truncated);
        }
        // encoding tag + payload
        let tag = bytes[p + plsize];
        let (enc_size, payload) = match tag & encoding::STR_MASK {
            encoding::STR_06B => (1, (tag & 0x3F) as usize),
            encoding::STR_14B => {
                if p + plsize + 2 > limit {
                    return Err(PackError::Truncated);
                }
                (
                    2,
                    (((tag & 0x3F) as usize) << 8) | bytes[p + plsize + 1] as usize,
                )
            }
            encoding::STR_32B if tag == encoding::STR_32B => {
                if p + plsize + 5 > limit {
                    return Err(PackError::Truncated);
                }
                (
                    5,
                    u32::from_be_bytes(bytes[p + plsize + 1..p + plsize + 5].try_into().unwrap())
                        as usize,
                )
            }
            _ => match tag {
                encoding::INT_8 | encoding::INT_16 | encoding::INT_24 | encoding::INT_32
                | encoding::INT_64 => (1, encoding::int_payload_size(tag)),
                t if (encoding::INT_IMM_MIN..=encoding::INT_IMM_MAX).contains(&t) => (1, 0),
                _ => return Err(PackError::BadTag),
            },
        };
        let size = plsize + enc_size + payload;
        if p + size > limit {
            return Err(PackError::Truncated);
        }
        Ok(size)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pl: &PackList) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut p = pl.head_offset();
        while let Some(off) = p {
            out.push(pl.get(off).unwrap().to_bytes());
            p = pl.next(off);
        }
        out
    }

    /// Walk the whole list asserting every structural invariant.
    fn check_invariants(pl: &PackList) {
        let blob = pl.as_bytes();
        assert_eq!(
            u32::from_le_bytes(blob[0..4].try_into().unwrap()) as usize,
            blob.len()
        );
        assert_eq!(blob[blob.len() - 1], END);
        let mut p = HEADER_SIZE;
        let mut prev = 0usize;
        let mut last = HEADER_SIZE;
        let mut n = 0usize;
        while blob[p] != END {
            let e = Entry::decode(blob, p);
            assert_eq!(e.prevlen, prev, "prevlen chain broken at {p}");
            prev = e.total_size();
            last = p;
            p += e.total_size();
            n += 1;
        }
        let tail = u32::from_le_bytes(blob[4..8].try_into().unwrap()) as usize;
        assert_eq!(tail, if n == 0 { HEADER_SIZE } else { last });
        assert_eq!(pl.len(), n);
        if n > 0 {
            // tail-offset + size(last entry) + 1 == total-bytes
            assert_eq!(tail + Entry::decode(blob, tail).total_size() + 1, blob.len());
        }
    }

    #[test]
    fn empty_list_layout() {
        let pl = PackList::new();
        assert_eq!(
            pl.as_bytes(),
            &[0x0B, 0, 0, 0, 0x0A, 0, 0, 0, 0, 0, 0xFF]
        );
        assert!(pl.is_empty());
        assert_eq!(pl.len(), 0);
        check_invariants(&pl);
    }

    #[test]
    fn two_small_ints_exact_bytes() {
        let mut pl = PackList::new();
        pl.push_tail(b"2").unwrap();
        pl.push_tail(b"5").unwrap();
        assert_eq!(
            pl.as_bytes(),
            &[
                0x0F, 0x00, 0x00, 0x00, // total 15
                0x0C, 0x00, 0x00, 0x00, // tail 12
                0x02, 0x00, // count 2
                0x00, 0xF3, // "2" -> immediate 2
                0x02, 0xF6, // "5" -> immediate 5, prevlen 2
                0xFF,
            ]
        );
        check_invariants(&pl);
    }

    #[test]
    fn push_pop_inverse() {
        for payload in [&b"x"[..], b"hello world", b"1234567", b"-42"] {
            let mut pl = PackList::new();
            pl.push_tail(payload).unwrap();
            let off = pl.tail_entry_offset().unwrap();
            assert_eq!(pl.get(off).unwrap().to_bytes(), payload.to_vec());
            pl.delete(off);
            assert!(pl.is_empty());
            check_invariants(&pl);
        }
    }

    #[test]
    fn head_and_tail_pushes_interleave() {
        let mut pl = PackList::new();
        pl.push_tail(b"b").unwrap();
        pl.push_head(b"a").unwrap();
        pl.push_tail(b"c").unwrap();
        assert_eq!(values(&pl), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        check_invariants(&pl);
    }

    #[test]
    fn insert_before_middle() {
        let mut pl = PackList::new();
        pl.push_tail(b"one").unwrap();
        pl.push_tail(b"three").unwrap();
        let mid = pl.index(1).unwrap();
        pl.insert(mid, b"two").unwrap();
        assert_eq!(
            values(&pl),
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );
        check_invariants(&pl);
    }

    #[test]
    fn integer_encodings_roundtrip_through_entries() {
        let mut pl = PackList::new();
        let samples: Vec<String> = vec![
            "0", "12", "13", "-1", "127", "-128", "300", "-300", "70000", "-70000", "8388607",
            "-8388608", "2147483647", "-2147483648", "9223372036854775807",
            "-9223372036854775808",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        for s in &samples {
            pl.push_tail(s.as_bytes()).unwrap();
        }
        let got = values(&pl);
        for (g, s) in got.iter().zip(&samples) {
            assert_eq!(g, s.as_bytes());
        }
        // All of them really are integer-encoded.
        let mut p = pl.head_offset();
        while let Some(off) = p {
            assert!(matches!(pl.get(off).unwrap(), PackValue::Int(_)));
            p = pl.next(off);
        }
        check_invariants(&pl);
    }

    #[test]
    fn string_length_tiers() {
        let mut pl = PackList::new();
        let small = vec![b'a'; 63];
        let medium = vec![b'b'; 500];
        let large = vec![b'c'; 20_000];
        pl.push_tail(&small).unwrap();
        pl.push_tail(&medium).unwrap();
        pl.push_tail(&large).unwrap();
        assert_eq!(values(&pl), vec![small, medium, large]);
        check_invariants(&pl);
    }

    #[test]
    fn negative_index_walks_prevlen_chain() {
        let mut pl = PackList::new();
        for i in 0..10 {
            pl.push_tail(format!("item-{i}").as_bytes()).unwrap();
        }
        let last = pl.index(-1).unwrap();
        assert_eq!(pl.get(last).unwrap().to_bytes(), b"item-9".to_vec());
        let third_from_end = pl.index(-3).unwrap();
        assert_eq!(pl.get(third_from_end).unwrap().to_bytes(), b"item-7".to_vec());
        assert_eq!(pl.index(-11), None);
        assert_eq!(pl.index(10), None);
    }

    #[test]
    fn delete_range_middle() {
        let mut pl = PackList::new();
        for i in 0..8 {
            pl.push_tail(format!("{i}").as_bytes()).unwrap();
        }
        assert_eq!(pl.delete_range(2, 3), 3);
        assert_eq!(
            values(&pl),
            vec![
                b"0".to_vec(),
                b"1".to_vec(),
                b"5".to_vec(),
                b"6".to_vec(),
                b"7".to_vec()
            ]
        );
        check_invariants(&pl);
        // deleting past the end stops at the end
        assert_eq!(pl.delete_range(3, 100), 2);
        check_invariants(&pl);
    }

    #[test]
    fn cascade_grows_every_successor_once() {
        // 200 entries of 250 bytes each (1-byte prevlen + 2-byte header +
        // 247 payload), then a 300-byte entry prepended: every successor's
        // prevlen field grows from 1 to 5 bytes exactly once.
        let mut pl = PackList::new();
        let payload = vec![b'x'; 247];
        for _ in 0..200 {
            pl.push_tail(&payload).unwrap();
        }
        let before = pl.blob_len();
        // Entry sizes: every entry is 250 bytes except the head (prevlen 0
        // still 1 byte, same size).
        let head = pl.head_offset().unwrap();
        assert_eq!(Entry::decode(pl.as_bytes(), head).total_size(), 250);

        let big = vec![b'y'; 297]; // 1 + 2 + 297 = 300 total
        pl.push_head(&big).unwrap();

        assert_eq!(pl.blob_len(), before + 300 + 4 * 200);
        let mut p = pl.head_offset();
        let mut idx = 0;
        while let Some(off) = p {
            let e = Entry::decode(pl.as_bytes(), off);
            match idx {
                0 => {
                    assert_eq!(e.prevlen, 0);
                    assert_eq!(e.total_size(), 300);
                }
                1 => {
                    assert_eq!(e.prevlen_size, 5);
                    assert_eq!(e.prevlen, 300);
                    assert_eq!(e.total_size(), 254);
                }
                _ => {
                    assert_eq!(e.prevlen_size, 5);
                    assert_eq!(e.prevlen, 254);
                    assert_eq!(e.total_size(), 254);
                }
            }
            p = pl.next(off);
            idx += 1;
        }
        assert_eq!(idx, 201);
        check_invariants(&pl);
    }

    #[test]
    fn prevlen_field_never_shrinks() {
        // [big(300), mid(257), c]: c's prevlen field is 5 bytes. Deleting
        // big shrinks mid to 253 bytes; the cascade must leave c's field at
        // 5 bytes, re-encoded with the small value.
        let mut pl = PackList::new();
        pl.push_tail(&vec![b'a'; 297]).unwrap(); // 1 + 2 + 297 = 300
        pl.push_tail(&vec![b'b'; 250]).unwrap(); // 5 + 2 + 250 = 257
        pl.push_tail(b"cc").unwrap();
        let c = pl.index(2).unwrap();
        assert_eq!(Entry::decode(pl.as_bytes(), c).prevlen_size, 5);
        assert_eq!(Entry::decode(pl.as_bytes(), c).prevlen, 257);

        let head = pl.head_offset().unwrap();
        pl.delete(head);
        let mid = pl.index(0).unwrap();
        assert_eq!(Entry::decode(pl.as_bytes(), mid).total_size(), 253);
        let c = pl.index(1).unwrap();
        let e = Entry::decode(pl.as_bytes(), c);
        assert_eq!(e.prevlen_size, 5, "field must not shrink");
        assert_eq!(e.prevlen, 253);
        check_invariants(&pl);

        // The insert path honors the same rule when a tiny entry lands in
        // front of an oversized field (the new field would not fit the
        // reclaimed bytes otherwise).
        pl.insert(c, b"7").unwrap();
        let c = pl.index(2).unwrap();
        let e = Entry::decode(pl.as_bytes(), c);
        assert_eq!(e.prevlen_size, 5);
        assert_eq!(e.prevlen, 2);
        check_invariants(&pl);
    }

    #[test]
    fn find_with_skip() {
        let mut pl = PackList::new();
        for v in ["a", "1", "b", "1", "c", "1"] {
            pl.push_tail(v.as_bytes()).unwrap();
        }
        let head = pl.head_offset().unwrap();
        let hit = pl.find(head, b"1", 0).unwrap();
        assert_eq!(hit, pl.index(1).unwrap());
        // skip=1 visits entries 0, 2, 4, ... so the first "1" at index 1 is
        // skipped and index 3 wins... index 2 is "b", index 4 is "c"; with
        // skip 1 only even indexes are compared, so no "1" is ever seen.
        assert_eq!(pl.find(head, b"1", 1), None);
        assert_eq!(pl.find(head, b"missing", 0), None);
    }

    #[test]
    fn entry_eq_compares_by_value_for_ints() {
        let mut pl = PackList::new();
        pl.push_tail(b"100").unwrap();
        pl.push_tail(b"text").unwrap();
        let first = pl.index(0).unwrap();
        let second = pl.index(1).unwrap();
        assert!(pl.entry_eq(first, b"100"));
        assert!(!pl.entry_eq(first, b"101"));
        assert!(!pl.entry_eq(first, b"abc"));
        assert!(pl.entry_eq(second, b"text"));
        assert!(!pl.entry_eq(second, b"texts"));
    }

    #[test]
    fn merge_keeps_order_and_fixes_boundary() {
        let mut a = PackList::new();
        let mut b = PackList::new();
        for i in 0..5 {
            a.push_tail(format!("a{i}").as_bytes()).unwrap();
        }
        // Make b the larger blob so the prepend path is exercised.
        for i in 0..5 {
            b.push_tail(format!("b{i}-padding-padding").as_bytes()).unwrap();
        }
        let merged = PackList::merge(a, b).unwrap();
        let got = values(&merged);
        assert_eq!(got.len(), 10);
        assert_eq!(got[0], b"a0".to_vec());
        assert_eq!(got[4], b"a4".to_vec());
        assert_eq!(got[5], b"b0-padding-padding".to_vec());
        check_invariants(&merged);

        // Append path: first is larger.
        let mut a = PackList::new();
        let mut b = PackList::new();
        for i in 0..5 {
            a.push_tail(format!("a{i}-padding-padding").as_bytes()).unwrap();
        }
        b.push_tail(b"tail-piece").unwrap();
        let merged = PackList::merge(a, b).unwrap();
        assert_eq!(merged.len(), 6);
        assert_eq!(values(&merged)[5], b"tail-piece".to_vec());
        check_invariants(&merged);
    }

    #[test]
    fn merge_with_empty_sides() {
        let mut a = PackList::new();
        a.push_tail(b"only").unwrap();
        let merged = PackList::merge(a.clone(), PackList::new()).unwrap();
        assert_eq!(values(&merged), vec![b"only".to_vec()]);
        let merged = PackList::merge(PackList::new(), a).unwrap();
        assert_eq!(values(&merged), vec![b"only".to_vec()]);
    }

    #[test]
    fn merge_big_boundary_prevlen() {
        // First list ends with a 300-byte entry: the boundary entry of the
        // merged list needs a 5-byte prevlen field.
        let mut a = PackList::new();
        a.push_tail(&vec![b'x'; 297]).unwrap();
        let mut b = PackList::new();
        b.push_tail(b"after").unwrap();
        b.push_tail(b"more").unwrap();
        let merged = PackList::merge(a, b).unwrap();
        let boundary = merged.index(1).unwrap();
        let e = Entry::decode(merged.as_bytes(), boundary);
        assert_eq!(e.prevlen, 300);
        assert_eq!(e.prevlen_size, 5);
        check_invariants(&merged);
    }

    #[test]
    fn blob_roundtrip_via_from_bytes() {
        let mut pl = PackList::new();
        for v in ["alpha", "42", "-7", "a-much-longer-string-payload"] {
            pl.push_tail(v.as_bytes()).unwrap();
        }
        let copy = PackList::from_bytes(pl.as_bytes()).unwrap();
        assert_eq!(copy, pl);
    }

    #[test]
    fn from_bytes_rejects_corruption() {
        let mut pl = PackList::new();
        pl.push_tail(b"abc").unwrap();
        let good = pl.as_bytes().to_vec();

        assert_eq!(PackList::from_bytes(&good[..5]), Err(PackError::Truncated));

        let mut bad = good.clone();
        bad[0] ^= 0x01; // total field off by one
        assert_eq!(PackList::from_bytes(&bad), Err(PackError::TotalMismatch));

        let mut bad = good.clone();
        let last = bad.len() - 1;
        bad[last] = 0x00;
        assert_eq!(PackList::from_bytes(&bad), Err(PackError::BadTerminator));

        let mut bad = good.clone();
        bad[4] = 0x09; // tail pointing into the header
        assert_eq!(PackList::from_bytes(&bad), Err(PackError::TailMismatch));

        let mut bad = good.clone();
        bad[8] = 7; // count mismatch
        assert_eq!(PackList::from_bytes(&bad), Err(PackError::CountMismatch));

        let mut bad = good;
        bad[10] = 3; // first entry prevlen must be 0
        assert_eq!(PackList::from_bytes(&bad), Err(PackError::PrevlenMismatch));
    }

    #[test]
    fn len_traverses_past_sentinel() {
        let mut pl = PackList::new();
        for i in 0..20 {
            pl.push_tail(format!("{i}").as_bytes()).unwrap();
        }
        // Force the sentinel and confirm the traversal fallback.
        pl.set_count_raw(COUNT_SENTINEL);
        assert_eq!(pl.len(), 20);
    }
}
