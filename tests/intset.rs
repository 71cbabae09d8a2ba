//! Integer-set scenario tests: width promotion, ordering under churn, and
//! blob round-trips through a real file.

use corekv::intset::{IntSet, ENC_INT16, ENC_INT32, ENC_INT64};

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: promotion chain 2 -> 4 -> 8 bytes with membership preserved
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn promotion_chain_preserves_membership() {
    let mut s = IntSet::new();
    assert!(s.add(32));
    assert_eq!(s.encoding(), ENC_INT16);

    assert!(s.add(65_535));
    assert_eq!(s.encoding(), ENC_INT32);
    assert!(s.find(32));
    assert!(s.find(65_535));

    assert!(s.add(-4_294_967_295));
    assert_eq!(s.encoding(), ENC_INT64);
    assert!(s.find(32));
    assert!(s.find(65_535));
    assert!(s.find(-4_294_967_295));
}

#[test]
fn width_is_monotonic_across_lifetime() {
    let mut s = IntSet::new();
    s.add(10);
    s.add(1 << 20);
    assert_eq!(s.encoding(), ENC_INT32);
    s.remove(1 << 20);
    // The only wide element is gone; the width stays.
    assert_eq!(s.encoding(), ENC_INT32);
    s.add(11);
    assert_eq!(s.encoding(), ENC_INT32);
}

#[test]
fn ordering_invariant_under_random_churn() {
    // Deterministic pseudo-random churn: ordering and membership must hold
    // at every step.
    let mut s = IntSet::new();
    let mut model = std::collections::BTreeSet::new();
    let mut x: i64 = 0x1234_5678;
    for step in 0..2_000 {
        // xorshift
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        let v = x % 1_000;
        if step % 3 == 2 {
            assert_eq!(s.remove(v), model.remove(&v), "remove {v}");
        } else {
            assert_eq!(s.add(v), model.insert(v), "add {v}");
        }
    }
    let got: Vec<i64> = s.iter().collect();
    let want: Vec<i64> = model.into_iter().collect();
    assert_eq!(got, want);
}

#[test]
fn contains_iff_inserted_and_not_removed() {
    let mut s = IntSet::new();
    for v in 0..100 {
        s.add(v * 7);
    }
    for v in 0..100 {
        if v % 2 == 0 {
            s.remove(v * 7);
        }
    }
    for v in 0..100 {
        assert_eq!(s.find(v * 7), v % 2 != 0);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Blob round-trip through the filesystem
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn serialized_blob_roundtrips_through_a_file() {
    let mut s = IntSet::new();
    for v in [i64::MIN, -1, 0, 1, 42, i64::MAX] {
        s.add(v);
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("set.bin");
    std::fs::write(&path, s.as_bytes()).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let loaded = IntSet::from_bytes(&bytes).unwrap();
    assert_eq!(loaded.len(), s.len());
    let a: Vec<i64> = loaded.iter().collect();
    let b: Vec<i64> = s.iter().collect();
    assert_eq!(a, b);
}

#[test]
fn blob_layout_is_little_endian() {
    let mut s = IntSet::new();
    s.add(0x1234);
    let b = s.as_bytes();
    // encoding=2, count=1, then 0x1234 little-endian.
    assert_eq!(b, &[2, 0, 0, 0, 1, 0, 0, 0, 0x34, 0x12]);
}
