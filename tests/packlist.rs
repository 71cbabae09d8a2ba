//! Packed-entry-list scenario tests: exact blob bytes, the prevlen
//! cascade, traversal inverses, and file round-trips.

use corekv::packlist::{entry::Entry, PackList, PackValue};

fn values(pl: &PackList) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut p = pl.head_offset();
    while let Some(off) = p {
        out.push(pl.get(off).unwrap().to_bytes());
        p = pl.next(off);
    }
    out
}

/// Assert every structural invariant by walking the blob.
fn check(pl: &PackList) {
    let blob = pl.as_bytes();
    assert_eq!(
        u32::from_le_bytes(blob[0..4].try_into().unwrap()) as usize,
        blob.len(),
        "total header"
    );
    assert_eq!(blob[blob.len() - 1], 0xFF, "terminator");
    let mut p = 10;
    let mut prev = 0usize;
    let mut last = 10;
    let mut n = 0;
    while blob[p] != 0xFF {
        let e = Entry::decode(blob, p);
        assert_eq!(e.prevlen, prev, "prevlen chain at offset {p}");
        prev = e.total_size();
        last = p;
        p += e.total_size();
        n += 1;
    }
    let tail = u32::from_le_bytes(blob[4..8].try_into().unwrap()) as usize;
    assert_eq!(tail, if n == 0 { 10 } else { last }, "tail offset");
    if n > 0 {
        assert_eq!(
            tail + Entry::decode(blob, tail).total_size() + 1,
            blob.len(),
            "tail + last size + terminator == total"
        );
    }
    assert_eq!(pl.len(), n);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: push "2", push "5" produces the 15 exact bytes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn two_pushes_exact_blob() {
    let mut pl = PackList::new();
    pl.push_tail(b"2").unwrap();
    pl.push_tail(b"5").unwrap();
    assert_eq!(
        pl.as_bytes(),
        &[
            0x0F, 0x00, 0x00, 0x00, //
            0x0C, 0x00, 0x00, 0x00, //
            0x02, 0x00, //
            0x00, 0xF3, //
            0x02, 0xF6, //
            0xFF,
        ]
    );
    assert_eq!(pl.get(pl.head_offset().unwrap()), Some(PackValue::Int(2)));
    check(&pl);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: 200 x 250-byte entries, prepend 300 bytes, cascade once each
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn cascade_prepend_grows_every_prevlen_once() {
    let mut pl = PackList::new();
    let payload = vec![b'x'; 247]; // 1 (prevlen) + 2 (header) + 247 = 250
    for _ in 0..200 {
        pl.push_tail(&payload).unwrap();
    }
    let before = pl.blob_len();

    let big = vec![b'y'; 297]; // 1 + 2 + 297 = 300
    pl.push_head(&big).unwrap();

    assert_eq!(pl.blob_len(), before + 300 + 4 * 200);
    let mut seen = 0;
    let mut p = pl.head_offset();
    while let Some(off) = p {
        let e = Entry::decode(pl.as_bytes(), off);
        if seen > 0 {
            assert_eq!(e.prevlen_size, 5, "entry {seen} must carry a wide field");
        }
        seen += 1;
        p = pl.next(off);
    }
    assert_eq!(seen, 201);
    check(&pl);
}

#[test]
fn cascade_terminates_within_one_pass() {
    // Alternating sizes around the 254-byte boundary: any insertion
    // sequence must settle, and settle with a valid chain.
    let mut pl = PackList::new();
    for i in 0..50 {
        let size = if i % 2 == 0 { 240 } else { 260 };
        pl.push_head(&vec![b'z'; size]).unwrap();
        check(&pl);
    }
    while let Some(off) = pl.head_offset() {
        pl.delete(off);
        check(&pl);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Traversal and mutation properties
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn push_then_pop_is_identity_both_ends() {
    for payload in [&b"v"[..], b"longer-value-here", b"123456", b"-9"] {
        let mut pl = PackList::new();
        pl.push_head(payload).unwrap();
        let off = pl.head_offset().unwrap();
        assert_eq!(pl.get(off).unwrap().to_bytes(), payload);
        pl.delete(off);
        assert!(pl.is_empty());

        pl.push_tail(payload).unwrap();
        let off = pl.tail_entry_offset().unwrap();
        assert_eq!(pl.get(off).unwrap().to_bytes(), payload);
        pl.delete(off);
        assert!(pl.is_empty());
        check(&pl);
    }
}

#[test]
fn forward_and_backward_walks_agree() {
    let mut pl = PackList::new();
    for i in 0..64 {
        pl.push_tail(format!("entry-{i:03}").as_bytes()).unwrap();
    }
    let forward = values(&pl);
    let mut backward = Vec::new();
    let mut p = pl.tail_entry_offset();
    while let Some(off) = p {
        backward.push(pl.get(off).unwrap().to_bytes());
        p = pl.prev(off);
    }
    backward.reverse();
    assert_eq!(forward, backward);

    // index() agrees from both directions.
    for i in 0..64i64 {
        let a = pl.index(i).unwrap();
        let b = pl.index(i - 64).unwrap();
        assert_eq!(a, b, "index {i} vs {}", i - 64);
    }
}

#[test]
fn mixed_sizes_survive_deletion_storm() {
    let mut pl = PackList::new();
    let mut model: Vec<Vec<u8>> = Vec::new();
    for i in 0..120usize {
        let v: Vec<u8> = match i % 4 {
            0 => format!("{}", i as i64 - 60).into_bytes(),
            1 => vec![b'a'; i % 60],
            2 => vec![b'b'; 200 + i],
            _ => format!("{}", i * 1_000_000).into_bytes(),
        };
        if v.is_empty() {
            continue;
        }
        pl.push_tail(&v).unwrap();
        model.push(v);
    }
    check(&pl);
    // Delete every third entry, front to back.
    let mut idx = 0usize;
    while idx < model.len() {
        if idx % 3 == 0 {
            let off = pl.index(idx as i64).unwrap();
            pl.delete(off);
            model.remove(idx);
            check(&pl);
        } else {
            idx += 1;
        }
    }
    assert_eq!(values(&pl), model);
}

#[test]
fn delete_range_spanning_wide_prevlens() {
    let mut pl = PackList::new();
    pl.push_tail(&vec![b'a'; 300]).unwrap();
    pl.push_tail(&vec![b'b'; 300]).unwrap();
    pl.push_tail(b"small").unwrap();
    pl.push_tail(&vec![b'c'; 300]).unwrap();
    assert_eq!(pl.delete_range(1, 2), 2);
    check(&pl);
    assert_eq!(pl.len(), 2);
    let last = pl.index(-1).unwrap();
    assert_eq!(pl.get(last).unwrap().to_bytes(), vec![b'c'; 300]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Deterministic encoding choice
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn encoding_choice_is_deterministic() {
    let mut pl = PackList::new();
    // Round-tripping integer text becomes an integer entry; anything else
    // stays a string.
    let cases: &[(&[u8], bool)] = &[
        (b"0", true),
        (b"12", true),
        (b"-1", true),
        (b"9223372036854775807", true),
        (b"9223372036854775808", false), // overflows i64
        (b"01", false),                  // does not round-trip
        (b"+1", false),
        (b"1.0", false),
        (b"", false),
        (b"plain", false),
    ];
    for (payload, _) in cases {
        if payload.is_empty() {
            // Empty payloads are legal string entries.
            pl.push_tail(payload).unwrap();
            continue;
        }
        pl.push_tail(payload).unwrap();
    }
    let mut p = pl.head_offset();
    let mut i = 0;
    while let Some(off) = p {
        let want_int = cases[i].1;
        match pl.get(off).unwrap() {
            PackValue::Int(_) => assert!(want_int, "case {i} unexpectedly integer"),
            PackValue::Str(_) => assert!(!want_int, "case {i} unexpectedly string"),
        }
        p = pl.next(off);
        i += 1;
    }
    assert_eq!(i, cases.len());
}

// ─────────────────────────────────────────────────────────────────────────────
// Blob round-trip through the filesystem
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn blob_roundtrips_through_a_file() {
    let mut pl = PackList::new();
    for v in ["alpha", "-100", "0", &"x".repeat(500), "tail"] {
        pl.push_tail(v.as_bytes()).unwrap();
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("list.bin");
    std::fs::write(&path, pl.as_bytes()).unwrap();
    let loaded = PackList::from_bytes(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(values(&loaded), values(&pl));
    check(&loaded);
}
