//! Chained hash table with incremental rehash.
//!
//! Two sub-tables back every dict. Normally only the first is populated;
//! a resize allocates the second at the target capacity and sets
//! `rehash_idx` to 0, after which every mutating or probing call migrates
//! one bucket (unless iteration has paused rehashing). Lookups probe both
//! tables while migration is active, inserts go straight to the new table,
//! and buckets below `rehash_idx` in the old table are guaranteed empty.
//!
//! Capacities are powers of two, floor 4. The key hash comes from the
//! `DictKey` trait whose provided impls use the process-seeded SipHash-1-3;
//! hosts inject their own function by implementing the trait.
//!
//! Submodules: [`iter`] (safe/unsafe iterators and the structure
//! fingerprint), [`scan`] (reverse-bit cursor), [`random`] (sampling).

pub mod iter;
pub mod random;
pub mod scan;

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::clock;
use crate::config::{
    DICT_FORCE_RESIZE_RATIO, DICT_INITIAL_SIZE, DICT_REHASH_BATCH, DICT_REHASH_EMPTY_VISITS,
};
use crate::siphash::sip13;

pub use iter::Iter;

// ─────────────────────────────────────────────────────────────────────────────
// Global resize switch
// ─────────────────────────────────────────────────────────────────────────────

static RESIZE_ENABLED: AtomicBool = AtomicBool::new(true);

/// Whether automatic expansion at load factor 1 is currently allowed.
/// Expansion past [`DICT_FORCE_RESIZE_RATIO`] happens regardless.
pub fn resize_enabled() -> bool {
    RESIZE_ENABLED.load(Ordering::Relaxed)
}

/// Scoped suppression of automatic resizing, used around copy-on-write
/// windows (a forked persistence pass dirties pages on every table move).
/// Restores the previous state on drop.
pub struct ResizeGuard {
    previous: bool,
}

impl ResizeGuard {
    pub fn disable() -> ResizeGuard {
        let previous = RESIZE_ENABLED.swap(false, Ordering::Relaxed);
        ResizeGuard { previous }
    }
}

impl Drop for ResizeGuard {
    fn drop(&mut self) {
        RESIZE_ENABLED.store(self.previous, Ordering::Relaxed);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keys
// ─────────────────────────────────────────────────────────────────────────────

/// Host-injected hash for dict keys. Provided impls hash through the
/// process-seeded SipHash-1-3.
pub trait DictKey: Eq {
    fn dict_hash(&self) -> u64;
}

impl DictKey for Vec<u8> {
    #[inline]
    fn dict_hash(&self) -> u64 {
        sip13(self)
    }
}

impl DictKey for String {
    #[inline]
    fn dict_hash(&self) -> u64 {
        sip13(self.as_bytes())
    }
}

impl DictKey for u64 {
    #[inline]
    fn dict_hash(&self) -> u64 {
        sip13(&self.to_le_bytes())
    }
}

impl DictKey for i64 {
    #[inline]
    fn dict_hash(&self) -> u64 {
        sip13(&self.to_le_bytes())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entries and sub-tables
// ─────────────────────────────────────────────────────────────────────────────

/// One chained entry. `unlink` hands the box to the caller; dropping it is
/// the free-unlinked step.
#[derive(Debug)]
pub struct DictEntry<K, V> {
    pub key: K,
    pub val: V,
    next: Option<Box<DictEntry<K, V>>>,
}

type Bucket<K, V> = Option<Box<DictEntry<K, V>>>;

#[derive(Debug)]
struct SubTable<K, V> {
    table: Vec<Bucket<K, V>>,
    used: usize,
}

impl<K, V> Default for SubTable<K, V> {
    fn default() -> Self {
        SubTable {
            table: Vec::new(),
            used: 0,
        }
    }
}

impl<K, V> SubTable<K, V> {
    #[inline]
    fn size(&self) -> usize {
        self.table.len()
    }

    #[inline]
    fn sizemask(&self) -> u64 {
        if self.table.is_empty() {
            0
        } else {
            self.table.len() as u64 - 1
        }
    }

    fn with_capacity(size: usize) -> SubTable<K, V> {
        let mut table = Vec::with_capacity(size);
        table.resize_with(size, || None);
        SubTable { table, used: 0 }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dict
// ─────────────────────────────────────────────────────────────────────────────

/// The incremental-rehash hash table.
#[derive(Debug)]
pub struct Dict<K: DictKey, V> {
    ht: [SubTable<K, V>; 2],
    /// Next old-table bucket to migrate; −1 while not rehashing.
    rehash_idx: isize,
    /// While nonzero, automatic rehash steps are suppressed (safe
    /// iterators and scans in flight).
    pause_rehash: Cell<usize>,
}

impl<K: DictKey, V> Default for Dict<K, V> {
    fn default() -> Self {
        Dict::new()
    }
}

impl<K: DictKey, V> Dict<K, V> {
    /// Empty dict; the bucket array is allocated on first insert.
    pub fn new() -> Dict<K, V> {
        Dict {
            ht: [SubTable::default(), SubTable::default()],
            rehash_idx: -1,
            pause_rehash: Cell::new(0),
        }
    }

    /// Number of entries across both tables.
    #[inline]
    pub fn len(&self) -> usize {
        self.ht[0].used + self.ht[1].used
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bucket count across both tables.
    #[inline]
    pub fn buckets(&self) -> usize {
        self.ht[0].size() + self.ht[1].size()
    }

    #[inline]
    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx != -1
    }

    /// Suppress automatic rehash steps; pair with [`resume_rehash`].
    #[inline]
    pub fn pause_rehash(&self) {
        self.pause_rehash.set(self.pause_rehash.get() + 1);
    }

    /// Re-allow automatic rehash steps.
    #[inline]
    pub fn resume_rehash(&self) {
        let n = self.pause_rehash.get();
        debug_assert!(n > 0, "resume without pause");
        self.pause_rehash.set(n - 1);
    }

    // ── expansion ───────────────────────────────────────────────────────────

    fn next_power(size: usize) -> usize {
        let mut p = DICT_INITIAL_SIZE;
        while p < size {
            p <<= 1;
        }
        p
    }

    /// Allocate toward `target` entries. The first expansion populates the
    /// primary table directly; later ones stage the new table and start
    /// incremental migration. No-op while already rehashing or when the
    /// capacity would not change.
    pub fn expand(&mut self, target: usize) {
        if self.is_rehashing() || self.ht[0].used > target {
            return;
        }
        let realsize = Self::next_power(target);
        if realsize == self.ht[0].size() {
            return;
        }
        let fresh = SubTable::with_capacity(realsize);
        if self.ht[0].size() == 0 {
            self.ht[0] = fresh;
        } else {
            log::debug!(
                "dict expand: {} -> {} buckets ({} entries)",
                self.ht[0].size(),
                realsize,
                self.ht[0].used
            );
            self.ht[1] = fresh;
            self.rehash_idx = 0;
        }
    }

    /// Shrink the bucket array to fit the current population (floor 4).
    /// Honors the global resize switch and never interrupts a migration.
    pub fn resize(&mut self) {
        if self.is_rehashing() || !resize_enabled() {
            return;
        }
        let minimal = self.ht[0].used.max(DICT_INITIAL_SIZE);
        let realsize = Self::next_power(minimal);
        if realsize >= self.ht[0].size() {
            return;
        }
        log::debug!(
            "dict shrink: {} -> {} buckets",
            self.ht[0].size(),
            realsize
        );
        self.ht[1] = SubTable::with_capacity(realsize);
        self.rehash_idx = 0;
    }

    /// Grow when the load factor hits 1 (if globally allowed) or 5
    /// (unconditionally).
    fn expand_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }
        if self.ht[0].size() == 0 {
            self.expand(DICT_INITIAL_SIZE);
            return;
        }
        let used = self.ht[0].used;
        let size = self.ht[0].size();
        if used >= size && (resize_enabled() || used / size > DICT_FORCE_RESIZE_RATIO) {
            self.expand(used + 1);
        }
    }

    // ── incremental rehash ──────────────────────────────────────────────────

    /// Migrate up to `n` non-empty buckets, visiting at most `10·n` empty
    /// ones. Returns `false` once migration is complete.
    pub fn rehash(&mut self, n: usize) -> bool {
        if !self.is_rehashing() {
            return false;
        }
        let mut empty_visits = n * DICT_REHASH_EMPTY_VISITS;
        let mut steps = n;
        while steps > 0 && self.ht[0].used != 0 {
            steps -= 1;
            assert!(
                (self.rehash_idx as usize) < self.ht[0].size(),
                "rehash index past table size"
            );
            while self.ht[0].table[self.rehash_idx as usize].is_none() {
                self.rehash_idx += 1;
                empty_visits -= 1;
                if empty_visits == 0 {
                    return true;
                }
            }
            let mut chain = self.ht[0].table[self.rehash_idx as usize].take();
            while let Some(mut entry) = chain {
                chain = entry.next.take();
                let idx = (entry.key.dict_hash() & self.ht[1].sizemask()) as usize;
                entry.next = self.ht[1].table[idx].take();
                self.ht[1].table[idx] = Some(entry);
                self.ht[0].used -= 1;
                self.ht[1].used += 1;
            }
            self.rehash_idx += 1;
        }
        if self.ht[0].used == 0 {
            self.ht[0] = std::mem::take(&mut self.ht[1]);
            self.rehash_idx = -1;
            log::debug!("dict rehash complete: {} buckets", self.ht[0].size());
            return false;
        }
        true
    }

    /// One automatic migration step, skipped while iteration is in flight.
    #[inline]
    fn rehash_step(&mut self) {
        if self.pause_rehash.get() == 0 {
            self.rehash(1);
        }
    }

    /// Migrate for roughly `ms` milliseconds, checking the clock every
    /// [`DICT_REHASH_BATCH`] buckets. Returns buckets migrated.
    pub fn rehash_ms(&mut self, ms: u64) -> usize {
        let start = clock::mono_start();
        let mut done = 0;
        while self.rehash(DICT_REHASH_BATCH) {
            done += DICT_REHASH_BATCH;
            if clock::mono_elapsed_ms(start) >= ms {
                break;
            }
        }
        done
    }

    // ── lookup ──────────────────────────────────────────────────────────────

    fn walk_bucket<'a>(bucket: &'a Bucket<K, V>, key: &K) -> Option<&'a DictEntry<K, V>> {
        let mut cur = bucket.as_deref();
        while let Some(node) = cur {
            if node.key == *key {
                return Some(node);
            }
            cur = node.next.as_deref();
        }
        None
    }

    /// Probe for `key`, driving one rehash step.
    pub fn find(&mut self, key: &K) -> Option<&DictEntry<K, V>> {
        if self.len() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let h = key.dict_hash();
        for t in 0..2 {
            if t == 1 && !self.is_rehashing() {
                break;
            }
            let idx = (h & self.ht[t].sizemask()) as usize;
            if t == 0 && self.is_rehashing() && (idx as isize) < self.rehash_idx {
                // Already-migrated buckets hold nothing.
                debug_assert!(self.ht[0].table[idx].is_none());
                continue;
            }
            if let Some(e) = Self::walk_bucket(&self.ht[t].table[idx], key) {
                return Some(e);
            }
        }
        None
    }

    /// Value lookup, driving one rehash step.
    #[inline]
    pub fn get(&mut self, key: &K) -> Option<&V> {
        // Reborrow dance: find returns a shared ref tied to &mut self.
        match self.find(key) {
            Some(e) => Some(&e.val),
            None => None,
        }
    }

    /// Mutable value lookup, driving one rehash step.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if self.len() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let h = key.dict_hash();
        let rehashing = self.is_rehashing();
        let rehash_idx = self.rehash_idx;
        for (t, ht) in self.ht.iter_mut().enumerate() {
            if t == 1 && !rehashing {
                break;
            }
            let idx = (h & ht.sizemask()) as usize;
            if t == 0 && rehashing && (idx as isize) < rehash_idx {
                continue;
            }
            let mut cur = ht.table[idx].as_deref_mut();
            while let Some(node) = cur {
                if node.key == *key {
                    return Some(&mut node.val);
                }
                cur = node.next.as_deref_mut();
            }
        }
        None
    }

    /// Membership probe without a rehash step, usable from shared contexts.
    pub fn contains(&self, key: &K) -> bool {
        if self.len() == 0 {
            return false;
        }
        let h = key.dict_hash();
        for t in 0..2 {
            if t == 1 && !self.is_rehashing() {
                break;
            }
            let idx = (h & self.ht[t].sizemask()) as usize;
            if Self::walk_bucket(&self.ht[t].table[idx], key).is_some() {
                return true;
            }
        }
        false
    }

    // ── mutation ────────────────────────────────────────────────────────────

    /// Insert a fresh key. Returns `false` (and drops nothing) when the key
    /// is already present; the existing entry is left untouched.
    pub fn add(&mut self, key: K, val: V) -> bool {
        if self.is_rehashing() {
            self.rehash_step();
        }
        if self.contains(&key) {
            return false;
        }
        self.expand_if_needed();
        let t = if self.is_rehashing() { 1 } else { 0 };
        let idx = (key.dict_hash() & self.ht[t].sizemask()) as usize;
        let entry = Box::new(DictEntry {
            key,
            val,
            next: self.ht[t].table[idx].take(),
        });
        self.ht[t].table[idx] = Some(entry);
        self.ht[t].used += 1;
        true
    }

    /// Insert or overwrite. Returns `true` when the key was new.
    pub fn replace(&mut self, key: K, val: V) -> bool {
        if let Some(slot) = self.get_mut(&key) {
            *slot = val;
            return false;
        }
        self.add(key, val)
    }

    /// Detach the entry for `key` without dropping it; the caller owns the
    /// box. Dropping the box is the free step.
    pub fn unlink(&mut self, key: &K) -> Option<Box<DictEntry<K, V>>> {
        if self.len() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let h = key.dict_hash();
        let rehashing = self.is_rehashing();
        let rehash_idx = self.rehash_idx;
        for t in 0..2 {
            if t == 1 && !rehashing {
                break;
            }
            let idx = (h & self.ht[t].sizemask()) as usize;
            if t == 0 && rehashing && (idx as isize) < rehash_idx {
                continue;
            }
            let mut cur = &mut self.ht[t].table[idx];
            loop {
                let hit = match cur.as_deref() {
                    None => break,
                    Some(node) => node.key == *key,
                };
                if hit {
                    let mut node = cur.take().unwrap();
                    *cur = node.next.take();
                    self.ht[t].used -= 1;
                    return Some(node);
                }
                cur = &mut cur.as_mut().unwrap().next;
            }
        }
        None
    }

    /// Remove and drop the entry for `key`. Returns the value.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        self.unlink(key).map(|e| e.val)
    }

    /// Drop every entry and return to the unallocated state. The callback,
    /// when given, runs every [`crate::config::DICT_CLEAR_CALLBACK_PERIOD`]
    /// buckets so long clears can yield progress.
    pub fn clear_with(&mut self, mut callback: Option<&mut dyn FnMut(usize)>) {
        for t in 0..2 {
            for i in 0..self.ht[t].size() {
                if let Some(cb) = callback.as_deref_mut() {
                    if i & (crate::config::DICT_CLEAR_CALLBACK_PERIOD - 1) == 0 {
                        cb(i);
                    }
                }
                // Drop the chain iteratively; a long chain would otherwise
                // recurse in Box's drop.
                let mut chain = self.ht[t].table[i].take();
                while let Some(mut entry) = chain {
                    chain = entry.next.take();
                    self.ht[t].used -= 1;
                }
            }
            self.ht[t] = SubTable::default();
        }
        self.rehash_idx = -1;
    }

    /// Drop every entry.
    #[inline]
    pub fn clear(&mut self) {
        self.clear_with(None);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn k(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    // The resize switch is process-global; tests touching it must not
    // overlap.
    static GUARD_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn add_find_delete() {
        let mut d: Dict<Vec<u8>, u32> = Dict::new();
        assert!(d.add(k("a"), 1));
        assert!(d.add(k("b"), 2));
        assert!(!d.add(k("a"), 99), "duplicate add must be rejected");
        assert_eq!(d.len(), 2);
        assert_eq!(d.get(&k("a")), Some(&1));
        assert_eq!(d.get(&k("missing")), None);
        assert_eq!(d.delete(&k("a")), Some(1));
        assert_eq!(d.get(&k("a")), None);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn replace_semantics() {
        let mut d: Dict<Vec<u8>, u32> = Dict::new();
        assert!(d.replace(k("x"), 1));
        assert!(!d.replace(k("x"), 2));
        assert_eq!(d.get(&k("x")), Some(&2));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut d: Dict<u64, u64> = Dict::new();
        for i in 0..1_000u64 {
            assert!(d.add(i, i * 2));
        }
        // Let any in-flight migration finish.
        while d.rehash(100) {}
        assert_eq!(d.len(), 1_000);
        assert!(d.ht[0].size() > DICT_INITIAL_SIZE);
        assert!(d.ht[0].size().is_power_of_two());
        for i in 0..1_000u64 {
            assert_eq!(d.get(&i), Some(&(i * 2)));
        }
    }

    #[test]
    fn lookups_work_mid_rehash() {
        let mut d: Dict<u64, u64> = Dict::new();
        for i in 0..64u64 {
            d.add(i, i);
        }
        // Drain any in-flight growth, then stage a large expansion and
        // stop partway.
        while d.rehash(100) {}
        d.expand(1 << 12);
        assert!(d.is_rehashing());
        d.rehash(3);
        assert!(d.is_rehashing());
        for i in 0..64u64 {
            assert_eq!(d.get(&i), Some(&i), "key {i} lost mid-rehash");
        }
        // Inserts during rehash land in the staging table.
        d.add(1_000, 1_000);
        assert_eq!(d.get(&1_000), Some(&1_000));
        while d.rehash(100) {}
        assert_eq!(d.len(), 65);
    }

    #[test]
    fn used_tracks_adds_and_deletes() {
        let mut d: Dict<u64, ()> = Dict::new();
        let mut expect = 0usize;
        for i in 0..500u64 {
            d.add(i, ());
            expect += 1;
            if i % 3 == 0 {
                d.delete(&i);
                expect -= 1;
            }
            assert_eq!(d.len(), expect);
        }
    }

    #[test]
    fn unlink_transfers_ownership() {
        let mut d: Dict<Vec<u8>, String> = Dict::new();
        d.add(k("key"), "value".into());
        let e = d.unlink(&k("key")).unwrap();
        assert_eq!(e.key, k("key"));
        assert_eq!(e.val, "value");
        assert_eq!(d.len(), 0);
        assert!(d.unlink(&k("key")).is_none());
    }

    #[test]
    fn shrink_honors_floor_and_guard() {
        let _lock = GUARD_LOCK.lock().unwrap();
        let mut d: Dict<u64, ()> = Dict::new();
        for i in 0..512u64 {
            d.add(i, ());
        }
        while d.rehash(100) {}
        for i in 0..512u64 {
            d.delete(&i);
        }
        let before = d.ht[0].size();
        {
            let _guard = ResizeGuard::disable();
            d.resize();
            assert_eq!(d.ht[0].size(), before, "resize while disabled");
        }
        d.resize();
        while d.rehash(100) {}
        assert_eq!(d.ht[0].size(), DICT_INITIAL_SIZE);
    }

    #[test]
    fn forced_expand_overrides_guard() {
        let _lock = GUARD_LOCK.lock().unwrap();
        let _guard = ResizeGuard::disable();
        let mut d: Dict<u64, ()> = Dict::new();
        // Push load factor past the force ratio; expansion must still
        // happen eventually.
        for i in 0..DICT_INITIAL_SIZE as u64 * (DICT_FORCE_RESIZE_RATIO as u64 + 2) {
            d.add(i, ());
        }
        assert!(d.buckets() > DICT_INITIAL_SIZE);
    }

    #[test]
    fn pause_suppresses_auto_steps() {
        let mut d: Dict<u64, ()> = Dict::new();
        for i in 0..64u64 {
            d.add(i, ());
        }
        while d.rehash(100) {}
        d.expand(1 << 10);
        assert!(d.is_rehashing());
        let idx_before = d.rehash_idx;
        d.pause_rehash();
        let _ = d.get(&1);
        let _ = d.get(&2);
        assert_eq!(d.rehash_idx, idx_before, "paused dict must not migrate");
        d.resume_rehash();
        let _ = d.get(&3);
        assert!(d.rehash_idx != idx_before || !d.is_rehashing());
    }

    #[test]
    fn clear_with_progress_callback() {
        let mut d: Dict<u64, ()> = Dict::new();
        for i in 0..100u64 {
            d.add(i, ());
        }
        let mut calls = 0;
        d.clear_with(Some(&mut |_i| calls += 1));
        assert!(calls >= 1);
        assert_eq!(d.len(), 0);
        assert_eq!(d.buckets(), 0);
        // Reusable after clear.
        assert!(d.add(7, ()));
    }
}
