//! Thin wrapper around the `siphasher` crate providing the keyed 64-bit hash
//! used by the hash-table layer.
//!
//! The hash is SipHash-1-3 keyed with a process-wide 16-byte seed. The seed
//! is set once at startup (or lazily from the OS RNG on first use) and read
//! on every hash; containers hashed under one seed are not portable to a
//! process seeded differently, which is the point.

use std::hash::Hasher;
use std::sync::OnceLock;

use rand::RngCore;
use siphasher::sip::SipHasher13;

static HASH_SEED: OnceLock<[u8; 16]> = OnceLock::new();

/// Install the process-wide hash seed. Returns `false` if a seed was already
/// installed (first caller wins; the seed never changes once read).
pub fn set_hash_seed(seed: [u8; 16]) -> bool {
    HASH_SEED.set(seed).is_ok()
}

/// The current seed, initializing it from the OS RNG if unset.
pub fn hash_seed() -> [u8; 16] {
    *HASH_SEED.get_or_init(|| {
        let mut seed = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut seed);
        seed
    })
}

/// One-shot SipHash-1-3 of `data` under the process seed.
#[inline]
pub fn sip13(data: &[u8]) -> u64 {
    let seed = hash_seed();
    let k0 = u64::from_le_bytes(seed[..8].try_into().unwrap());
    let k1 = u64::from_le_bytes(seed[8..].try_into().unwrap());
    let mut h = SipHasher13::new_with_keys(k0, k1);
    h.write(data);
    h.finish()
}
