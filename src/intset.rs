//! Packed integer set: a sorted set of signed 64-bit integers stored in one
//! contiguous little-endian blob.
//!
//! Layout: `encoding:u32 LE | length:u32 LE | elements[length]`, where
//! `encoding` is the element width in bytes (2, 4 or 8) and every element is
//! a little-endian signed integer of that width, in strictly ascending
//! order.
//!
//! The width is the smallest that fits every member and only ever grows:
//! adding a value wider than the current encoding promotes the whole blob,
//! removing the last wide value does not demote it. The blob format travels
//! through persistence, so it is bit-exact and validated on load.

use rand::Rng;

// ─────────────────────────────────────────────────────────────────────────────
// Encoding widths
// ─────────────────────────────────────────────────────────────────────────────

/// Element width for values fitting in `i16`.
pub const ENC_INT16: u32 = 2;
/// Element width for values fitting in `i32` but not `i16`.
pub const ENC_INT32: u32 = 4;
/// Element width for everything else.
pub const ENC_INT64: u32 = 8;

/// Blob header size: `encoding:u32` + `length:u32`.
const HEADER_SIZE: usize = 8;

/// Smallest width whose range contains `v`.
#[inline]
fn value_encoding(v: i64) -> u32 {
    if v < i32::MIN as i64 || v > i32::MAX as i64 {
        ENC_INT64
    } else if v < i16::MIN as i64 || v > i16::MAX as i64 {
        ENC_INT32
    } else {
        ENC_INT16
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors returned when deserializing an integer-set blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntSetError {
    /// Fewer than 8 bytes, or element area shorter than `length * width`.
    Truncated,
    /// Encoding field is not one of 2, 4, 8.
    BadEncoding,
    /// Blob length does not equal `8 + length * width` exactly.
    SizeMismatch,
    /// Elements are not strictly ascending.
    OutOfOrder,
}

// ─────────────────────────────────────────────────────────────────────────────
// IntSet
// ─────────────────────────────────────────────────────────────────────────────

/// Sorted contiguous-array integer set with self-promoting width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntSet {
    blob: Vec<u8>,
}

impl Default for IntSet {
    fn default() -> Self {
        IntSet::new()
    }
}

impl IntSet {
    /// Empty set at the narrowest width.
    pub fn new() -> IntSet {
        let mut blob = Vec::with_capacity(HEADER_SIZE);
        blob.extend_from_slice(&ENC_INT16.to_le_bytes());
        blob.extend_from_slice(&0u32.to_le_bytes());
        IntSet { blob }
    }

    /// Element width in bytes (2, 4 or 8).
    #[inline]
    pub fn encoding(&self) -> u32 {
        u32::from_le_bytes(self.blob[0..4].try_into().unwrap())
    }

    /// Number of members.
    #[inline]
    pub fn len(&self) -> usize {
        u32::from_le_bytes(self.blob[4..8].try_into().unwrap()) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

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

    /// Validate and adopt a serialized blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<IntSet, IntSetError> {
        if bytes.len() < HEADER_SIZE {
            return Err(IntSetError::Truncated);
        }
        let encoding = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if encoding != ENC_INT16 && encoding != ENC_INT32 && encoding != ENC_INT64 {
            return Err(IntSetError::BadEncoding);
        }
        let length = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let want = HEADER_SIZE + length * encoding as usize;
        if bytes.len() < want {
            return Err(IntSetError::Truncated);
        }
        if bytes.len() != want {
            return Err(IntSetError::SizeMismatch);
        }
        let set = IntSet {
            blob: bytes.to_vec(),
        };
        for i in 1..length {
            if set.get_at(i - 1, encoding) >= set.get_at(i, encoding) {
                return Err(IntSetError::OutOfOrder);
            }
        }
        Ok(set)
    }

    #[inline]
    fn set_len(&mut self, len: usize) {
        self.blob[4..8].copy_from_slice(&(len as u32).to_le_bytes());
    }

    #[inline]
    fn set_encoding(&mut self, enc: u32) {
        self.blob[0..4].copy_from_slice(&enc.to_le_bytes());
    }

    /// Element at `pos` decoded with an explicit width. Used both for normal
    /// reads and for reading old-width elements mid-promotion.
    fn get_at(&self, pos: usize, enc: u32) -> i64 {
        let w = enc as usize;
        let off = HEADER_SIZE + pos * w;
        let b = &self.blob[off..off + w];
        match enc {
            ENC_INT16 => i16::from_le_bytes(b.try_into().unwrap()) as i64,
            ENC_INT32 => i32::from_le_bytes(b.try_into().unwrap()) as i64,
            _ => i64::from_le_bytes(b.try_into().unwrap()),
        }
    }

    fn put_at(&mut self, pos: usize, v: i64) {
        let enc = self.encoding();
        let w = enc as usize;
        let off = HEADER_SIZE + pos * w;
        match enc {
            ENC_INT16 => self.blob[off..off + w].copy_from_slice(&(v as i16).to_le_bytes()),
            ENC_INT32 => self.blob[off..off + w].copy_from_slice(&(v as i32).to_le_bytes()),
            _ => self.blob[off..off + w].copy_from_slice(&v.to_le_bytes()),
        }
    }

    /// Member at index `idx` in ascending order.
    pub fn get(&self, idx: usize) -> Option<i64> {
        if idx >= self.len() {
            return None;
        }
        Some(self.get_at(idx, self.encoding()))
    }

    /// Uniformly random member. Empty sets have no member to return.
    pub fn random_member(&self) -> Option<i64> {
        if self.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..self.len());
        self.get(idx)
    }

    /// Binary search. Returns `(found, pos)` where `pos` is the index of the
    /// match or the insertion point keeping the array sorted.
    fn search(&self, v: i64) -> (bool, usize) {
        let len = self.len();
        if len == 0 {
            return (false, 0);
        }
        let enc = self.encoding();
        // Fast reject against the extremes before the loop.
        if v > self.get_at(len - 1, enc) {
            return (false, len);
        }
        if v < self.get_at(0, enc) {
            return (false, 0);
        }
        let (mut lo, mut hi) = (0isize, len as isize - 1);
        while lo <= hi {
            let mid = ((lo + hi) >> 1) as usize;
            let cur = self.get_at(mid, enc);
            if v > cur {
                lo = mid as isize + 1;
            } else if v < cur {
                hi = mid as isize - 1;
            } else {
                return (true, mid);
            }
        }
        (false, lo as usize)
    }

    /// Membership test. A value wider than the stored encoding cannot be
    /// present, so it is rejected without searching.
    pub fn find(&self, v: i64) -> bool {
        value_encoding(v) <= self.encoding() && self.search(v).0
    }

    /// Grow the blob to hold `len` elements at the current width.
    fn resize(&mut self, len: usize) {
        let w = self.encoding() as usize;
        self.blob.resize(HEADER_SIZE + len * w, 0);
    }

    /// Promote to the width required by `v`, then add it. `v` is guaranteed
    /// extremal (it did not fit the old width), so it lands at one end.
    fn upgrade_and_add(&mut self, v: i64) {
        let cur_enc = self.encoding();
        let new_enc = value_encoding(v);
        let len = self.len();
        let prepend = if v < 0 { 1 } else { 0 };

        self.set_encoding(new_enc);
        self.resize(len + 1);

        // Widen existing elements from the tail so nothing is overwritten
        // before it is read.
        for i in (0..len).rev() {
            // Old-width read happens against the already-grown buffer, which
            // is fine: old data sits at the front, untouched at these
            // offsets until the wider write below reaches it.
            let val = {
                let w = cur_enc as usize;
                let off = HEADER_SIZE + i * w;
                let b = &self.blob[off..off + w];
                match cur_enc {
                    ENC_INT16 => i16::from_le_bytes(b.try_into().unwrap()) as i64,
                    ENC_INT32 => i32::from_le_bytes(b.try_into().unwrap()) as i64,
                    _ => i64::from_le_bytes(b.try_into().unwrap()),
                }
            };
            self.put_at(i + prepend, val);
        }

        if prepend == 1 {
            self.put_at(0, v);
        } else {
            self.put_at(len, v);
        }
        self.set_len(len + 1);
    }

    /// Shift elements `[from, len)` to start at index `to`, byte-wise.
    fn move_tail(&mut self, from: usize, to: usize) {
        let w = self.encoding() as usize;
        let len = self.len();
        let src = HEADER_SIZE + from * w;
        let dst = HEADER_SIZE + to * w;
        let bytes = (len - from) * w;
        self.blob.copy_within(src..src + bytes, dst);
    }

    /// Insert `v`. Returns `false` if it was already present.
    pub fn add(&mut self, v: i64) -> bool {
        if value_encoding(v) > self.encoding() {
            self.upgrade_and_add(v);
            return true;
        }
        let (found, pos) = self.search(v);
        if found {
            return false;
        }
        let len = self.len();
        self.resize(len + 1);
        if pos < len {
            self.move_tail(pos, pos + 1);
        }
        self.put_at(pos, v);
        self.set_len(len + 1);
        true
    }

    /// Remove `v`. Returns `false` if it was not present. The encoding is
    /// never demoted, even when the removed value was the only wide one.
    pub fn remove(&mut self, v: i64) -> bool {
        if value_encoding(v) > self.encoding() {
            return false;
        }
        let (found, pos) = self.search(v);
        if !found {
            return false;
        }
        let len = self.len();
        if pos < len - 1 {
            self.move_tail(pos + 1, pos);
        }
        self.set_len(len - 1);
        self.resize(len - 1);
        true
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        let enc = self.encoding();
        (0..self.len()).map(move |i| self.get_at(i, enc))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
