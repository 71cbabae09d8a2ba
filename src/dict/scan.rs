//! Stateless scan with a reverse-bit cursor.
//!
//! The cursor is a bucket index incremented in reversed-bit order: set the
//! bits above the mask, reverse, add one, reverse back. Walking buckets in
//! this order guarantees that every key present for the whole scan is
//! visited at least once even if the table doubles or halves (any number of
//! times) between calls; transient keys may be missed or seen twice, so
//! callers must tolerate duplicates.
//!
//! While a migration is active, one call emits the addressed bucket of the
//! smaller table plus every bucket of the larger table that expands it
//! (same low bits, every combination of the high bits).

use super::{Bucket, Dict, DictKey};

#[inline]
fn next_cursor(v: u64, mask: u64) -> u64 {
    let mut v = v | !mask;
    v = v.reverse_bits();
    v = v.wrapping_add(1);
    v.reverse_bits()
}

impl<K: DictKey, V> Dict<K, V> {
    fn emit_chain<F: FnMut(&K, &V)>(bucket: &Bucket<K, V>, f: &mut F) {
        let mut cur = bucket.as_deref();
        while let Some(node) = cur {
            f(&node.key, &node.val);
            cur = node.next.as_deref();
        }
    }

    /// Visit the bucket(s) addressed by `cursor` and return the next
    /// cursor; a return of 0 ends the scan. Start with `cursor = 0`.
    ///
    /// Rehash stepping is paused for the duration of the call so the bucket
    /// pair stays coherent.
    pub fn scan<F: FnMut(&K, &V)>(&self, cursor: u64, f: F) -> u64 {
        self.scan_with(cursor, f, |_, _| {})
    }

    /// Like [`scan`](Dict::scan), with a bucket hook invoked once per
    /// visited bucket (table index, bucket index) before its chain is
    /// emitted. Hosts use it for per-bucket bookkeeping.
    pub fn scan_with<F, B>(&self, cursor: u64, mut f: F, mut bucket_fn: B) -> u64
    where
        F: FnMut(&K, &V),
        B: FnMut(usize, usize),
    {
        if self.len() == 0 {
            return 0;
        }
        self.pause_rehash();
        let mut v = cursor;
        if !self.is_rehashing() {
            let mask = self.ht[0].sizemask();
            bucket_fn(0, (v & mask) as usize);
            Self::emit_chain(&self.ht[0].table[(v & mask) as usize], &mut f);
            v = next_cursor(v, mask);
        } else {
            // t0 is the smaller table.
            let (t0, t1) = if self.ht[0].size() > self.ht[1].size() {
                (1, 0)
            } else {
                (0, 1)
            };
            let m0 = self.ht[t0].sizemask();
            let m1 = self.ht[t1].sizemask();
            bucket_fn(t0, (v & m0) as usize);
            Self::emit_chain(&self.ht[t0].table[(v & m0) as usize], &mut f);
            // All larger-table buckets whose low bits match the cursor.
            loop {
                bucket_fn(t1, (v & m1) as usize);
                Self::emit_chain(&self.ht[t1].table[(v & m1) as usize], &mut f);
                v = next_cursor(v, m1);
                if v & (m0 ^ m1) == 0 {
                    break;
                }
            }
        }
        self.resume_rehash();
        v
    }
}
