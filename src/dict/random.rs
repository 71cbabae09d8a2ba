//! Random sampling of dict entries.
//!
//! `random_entry` picks a random non-empty bucket, then a uniform element
//! of its chain; elements in short chains are favored. `some_entries`
//! harvests a best-effort batch from a random window of buckets, and
//! `fair_random_entry` draws uniformly from such a batch, which flattens
//! most of the bucket bias at the price of a bounded walk.

use rand::Rng;

use super::{Dict, DictKey};
use crate::config::DICT_FAIR_RANDOM_SAMPLE;

/// Position of a sampled entry: table, bucket, chain depth.
type Pos = (usize, usize, usize);

impl<K: DictKey, V> Dict<K, V> {
    fn entry_at(&self, (t, bucket, depth): Pos) -> (&K, &V) {
        let mut cur = self.ht[t].table[bucket].as_deref();
        for _ in 0..depth {
            cur = cur.unwrap().next.as_deref();
        }
        let node = cur.unwrap();
        (&node.key, &node.val)
    }

    /// Uniformly random non-empty bucket, then uniformly random chain
    /// element. Drives one rehash step.
    pub fn random_entry(&mut self) -> Option<(&K, &V)> {
        if self.len() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let mut rng = rand::thread_rng();
        let (t, bucket) = loop {
            if self.is_rehashing() {
                // Buckets below the rehash index are empty; sample the
                // remaining range of both tables as one flat space.
                let s0 = self.ht[0].size();
                let start = self.rehash_idx as usize;
                let h = start + rng.gen_range(0..self.buckets() - start);
                let (t, i) = if h >= s0 { (1, h - s0) } else { (0, h) };
                if self.ht[t].table[i].is_some() {
                    break (t, i);
                }
            } else {
                let i = (rng.gen::<u64>() & self.ht[0].sizemask()) as usize;
                if self.ht[0].table[i].is_some() {
                    break (0, i);
                }
            }
        };
        let mut chain_len = 0usize;
        let mut cur = self.ht[t].table[bucket].as_deref();
        while let Some(node) = cur {
            chain_len += 1;
            cur = node.next.as_deref();
        }
        let depth = rng.gen_range(0..chain_len);
        Some(self.entry_at((t, bucket, depth)))
    }

    /// Positions of up to `count` entries from a random bucket window,
    /// bounded by `10 * count` bucket visits; a run of empty buckets (at
    /// least 5, more than `count`) triggers a jump to a fresh random point.
    fn some_positions(&mut self, mut count: usize) -> Vec<Pos> {
        if count > self.len() {
            count = self.len();
        }
        if count == 0 {
            return Vec::new();
        }
        // Put in migration work proportional to the sample size first.
        for _ in 0..count {
            if self.is_rehashing() {
                self.rehash_step();
            } else {
                break;
            }
        }
        let tables = if self.is_rehashing() { 2 } else { 1 };
        let mut maxsizemask = self.ht[0].sizemask();
        if tables > 1 && self.ht[1].sizemask() > maxsizemask {
            maxsizemask = self.ht[1].sizemask();
        }

        let mut rng = rand::thread_rng();
        let mut i = (rng.gen::<u64>() & maxsizemask) as usize;
        let mut empty_run = 0usize;
        let mut out: Vec<Pos> = Vec::with_capacity(count);
        let mut maxsteps = count * 10;
        while out.len() < count && maxsteps > 0 {
            maxsteps -= 1;
            for t in 0..tables {
                if tables == 2 && t == 0 && (i as isize) < self.rehash_idx {
                    // Nothing lives below the rehash index in either
                    // table's overlap; jump ahead when the second table
                    // cannot cover this index either.
                    if i >= self.ht[1].size() {
                        i = self.rehash_idx as usize;
                    } else {
                        continue;
                    }
                }
                if i >= self.ht[t].size() {
                    continue;
                }
                if self.ht[t].table[i].is_none() {
                    empty_run += 1;
                    if empty_run >= 5 && empty_run > count {
                        i = (rng.gen::<u64>() & maxsizemask) as usize;
                        empty_run = 0;
                    }
                } else {
                    empty_run = 0;
                    let mut depth = 0usize;
                    let mut cur = self.ht[t].table[i].as_deref();
                    while let Some(node) = cur {
                        out.push((t, i, depth));
                        if out.len() == count {
                            return out;
                        }
                        depth += 1;
                        cur = node.next.as_deref();
                    }
                }
            }
            i = (i + 1) & maxsizemask as usize;
        }
        out
    }

    /// Best-effort sample of up to `count` distinct entries. May return
    /// fewer (even zero) when the walk budget runs out.
    pub fn some_entries(&mut self, count: usize) -> Vec<(&K, &V)> {
        let positions = self.some_positions(count);
        let mut out = Vec::with_capacity(positions.len());
        for p in positions {
            out.push(self.entry_at(p));
        }
        out
    }

    /// Uniform pick from a [`DICT_FAIR_RANDOM_SAMPLE`]-sized sample,
    /// falling back to [`random_entry`](Dict::random_entry) when the sample
    /// comes back empty.
    pub fn fair_random_entry(&mut self) -> Option<(&K, &V)> {
        let positions = self.some_positions(DICT_FAIR_RANDOM_SAMPLE);
        if positions.is_empty() {
            return self.random_entry();
        }
        let pick = rand::thread_rng().gen_range(0..positions.len());
        Some(self.entry_at(positions[pick]))
    }
}
