// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Literal scenarios and boundary cases from the table's specification.

use lockfree_hashtable::{Config, KeyHash, Table};

fn table(n: usize, k: usize, v: usize) -> Table {
    Table::new(Config::new(n, k, v).unwrap())
}

/// S1: N=4, K=1, V=1 — basic insert/find/erase/reinsert cycle.
#[test]
fn scenario_s1_basic_cycle() {
    let t = table(4, 1, 1);

    assert!(t.insert(b"a", b"1"));
    assert!(t.insert(b"b", b"2"));

    let mut out = [0u8; 1];
    assert!(t.find(b"a", Some(&mut out)));
    assert_eq!(&out, b"1");
    assert!(t.find(b"b", Some(&mut out)));
    assert_eq!(&out, b"2");
    assert!(!t.find(b"c", None));

    assert!(t.erase(b"a"));
    assert!(!t.find(b"a", None));

    assert!(t.insert(b"c", b"3"));
    assert!(t.find(b"c", Some(&mut out)));
    assert_eq!(&out, b"3");
}

/// S2: N=1, K=1, V=1 — single-slot table.
#[test]
fn scenario_s2_single_slot() {
    let t = table(1, 1, 1);

    assert!(t.insert(b"x", b"1"));
    assert!(!t.insert(b"y", b"2"));

    let mut out = [0u8; 1];
    assert!(t.find(b"x", Some(&mut out)));
    assert_eq!(&out, b"1");

    assert!(t.erase(b"x"));
    assert!(t.insert(b"y", b"2"));
    assert!(t.find(b"y", Some(&mut out)));
    assert_eq!(&out, b"2");
}

/// Forces every key to the same starting probe position, so S3 exercises
/// full-chain linear probing and tombstone traversal deterministically.
struct AllSameHash;

impl KeyHash for AllSameHash {
    fn hash(_key: &[u8]) -> u32 {
        0
    }
}

/// S3: N=16, K=4, V=4, all keys colliding at the same starting index.
#[test]
fn scenario_s3_forced_collision_chain() {
    let t: Table<AllSameHash> = Table::new(Config::new(16, 4, 4).unwrap());

    for i in 0u32..16 {
        assert!(t.insert(&i.to_le_bytes(), &i.to_le_bytes()), "insert {i} failed");
    }
    let overflow = 16u32.to_le_bytes();
    assert!(!t.insert(&overflow, &overflow));

    for i in 0u32..16 {
        let mut out = [0u8; 4];
        assert!(t.find(&i.to_le_bytes(), Some(&mut out)));
        assert_eq!(out, i.to_le_bytes());
    }

    assert!(t.erase(&7u32.to_le_bytes()));
    assert!(!t.find(&7u32.to_le_bytes(), None));
    // Probe must traverse the tombstone left at k7's position to still find k15.
    assert!(t.find(&15u32.to_le_bytes(), None));
}

#[test]
fn boundary_fill_to_capacity_exact() {
    let n = 32usize;
    let t = table(n, 4, 4);

    for i in 0..n as u32 {
        assert!(t.insert(&i.to_le_bytes(), &i.to_le_bytes()));
    }
    assert!(!t.insert(&(n as u32).to_le_bytes(), &(n as u32).to_le_bytes()));

    for i in 0..n as u32 {
        let mut out = [0u8; 4];
        assert!(t.find(&i.to_le_bytes(), Some(&mut out)));
        assert_eq!(out, i.to_le_bytes());
    }
}

#[test]
fn boundary_key_length_one() {
    let t = table(4, 1, 4);
    assert!(t.insert(b"k", b"1234"));
    let mut out = [0u8; 4];
    assert!(t.find(b"k", Some(&mut out)));
    assert_eq!(&out, b"1234");
}

#[test]
fn boundary_key_length_eight() {
    let t = table(4, 8, 4);
    let key = b"12345678";
    assert!(t.insert(key, b"val!"));
    let mut out = [0u8; 4];
    assert!(t.find(key, Some(&mut out)));
    assert_eq!(&out, b"val!");
}

#[test]
fn boundary_key_length_nine_exercises_arena_roundup() {
    // K=9 forces Config::layout to round the key arena size up to a
    // multiple of 8 (N*K = 36, rounds to 40).
    let cfg = Config::new(4, 9, 4).unwrap();
    let t: Table = Table::new(cfg);
    let key = b"123456789";
    assert!(t.insert(key, b"val!"));
    let mut out = [0u8; 4];
    assert!(t.find(key, Some(&mut out)));
    assert_eq!(&out, b"val!");
}

#[test]
fn roundtrip_overwrite_then_find_returns_latest() {
    let t = table(4, 1, 1);
    assert!(t.insert(b"k", b"1"));
    assert!(t.insert(b"k", b"2"));
    let mut out = [0u8; 1];
    assert!(t.find(b"k", Some(&mut out)));
    assert_eq!(&out, b"2");
}

#[test]
fn roundtrip_tombstone_reuse() {
    let t = table(4, 1, 1);
    assert!(t.insert(b"k", b"1"));
    assert!(t.erase(b"k"));
    assert!(!t.find(b"k", None));
    assert!(t.insert(b"k", b"9"));
    let mut out = [0u8; 1];
    assert!(t.find(b"k", Some(&mut out)));
    assert_eq!(&out, b"9");
}
