//! Tests for element nodes and blob pages
//!
//! These tests verify:
//! - Keys with identical hash pairs coexist and stay distinct
//! - Deleting from every position of a collision tree
//! - Key uniqueness under overwrite
//! - Blob sizes around page boundaries
//! - Pages return to the pool when values shrink or keys go away

use shmkv::{Config, HashFn, KeyHash, Store};

// =============================================================================
// Helper Functions
// =============================================================================

/// Every key collides on both hashes
fn constant_hash(_key: &[u8]) -> KeyHash {
    KeyHash::new(0x1234_5678, 0x9ABC_DEF0)
}

/// Same primary hash, subhash varies with the key
fn shared_primary(key: &[u8]) -> KeyHash {
    let subhash = key.iter().fold(17u32, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u32));
    KeyHash::new(0x8000_0000, subhash)
}

fn store_with(hash_fn: HashFn, elements: u32, pages: u32) -> Store {
    let config = Config::builder()
        .anonymous()
        .hash_fn(hash_fn)
        .bit_depth(2)
        .max_bit_depth(8)
        .collision_bits(1)
        .page_size(256)
        .element_capacity(elements)
        .page_capacity(pages)
        .lock_stripes(8)
        .build();
    Store::open(config).unwrap()
}

fn keys(count: usize) -> Vec<Vec<u8>> {
    (0..count).map(|i| format!("member-{}", i).into_bytes()).collect()
}

// =============================================================================
// Collision Tests
// =============================================================================

#[test]
fn test_identical_hash_pairs_stay_distinct() {
    let store = store_with(
        HashFn::Custom {
            name: "constant",
            func: constant_hash,
        },
        64,
        512,
    );
    let keys = keys(20);
    for (i, key) in keys.iter().enumerate() {
        store.set(key, format!("value-{}", i).as_bytes()).unwrap();
    }

    assert_eq!(store.len().unwrap(), 20);
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(store.get(key).unwrap(), Some(format!("value-{}", i).into_bytes()));
    }
    assert_eq!(store.get(b"member-20").unwrap(), None);
    store.verify().unwrap();
}

#[test]
fn test_delete_from_duplicate_chain() {
    let store = store_with(
        HashFn::Custom {
            name: "constant",
            func: constant_hash,
        },
        64,
        512,
    );
    let keys = keys(6);
    for key in &keys {
        store.set(key, key).unwrap();
    }

    // Chain head, middle and end
    assert!(store.remove(&keys[0]).unwrap());
    assert!(store.remove(&keys[3]).unwrap());
    assert!(store.remove(&keys[5]).unwrap());
    assert!(!store.remove(&keys[5]).unwrap());

    for (i, key) in keys.iter().enumerate() {
        let expected = if [0, 3, 5].contains(&i) { None } else { Some(key.clone()) };
        assert_eq!(store.get(key).unwrap(), expected);
    }
    assert_eq!(store.len().unwrap(), 3);
    store.verify().unwrap();
}

#[test]
fn test_collision_tree_deletes_in_every_shape() {
    let store = store_with(
        HashFn::Custom {
            name: "shared-primary",
            func: shared_primary,
        },
        256,
        1024,
    );
    let keys = keys(100);
    for key in &keys {
        store.set(key, key).unwrap();
    }

    // Remove in an order that hits leaves, inner nodes and the root
    for (n, key) in keys.iter().enumerate().filter(|(i, _)| i % 3 != 1) {
        assert!(store.remove(key).unwrap(), "remove {}", n);
        store.verify().unwrap();
    }
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(store.exists(key).unwrap(), i % 3 == 1);
    }

    // Reinsert into the thinned tree
    for key in keys.iter().step_by(3) {
        store.set(key, b"again").unwrap();
    }
    store.verify().unwrap();
    assert_eq!(store.get(&keys[0]).unwrap(), Some(b"again".to_vec()));
}

#[test]
fn test_overwrite_keeps_one_element() {
    let store = store_with(HashFn::Crc32, 16, 64);
    store.set(b"unique", b"first").unwrap();
    store.set(b"unique", b"second").unwrap();
    store.set(b"unique", b"third").unwrap();

    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(store.get(b"unique").unwrap(), Some(b"third".to_vec()));
}

#[test]
fn test_remove_then_reinsert_reuses_node() {
    let store = store_with(HashFn::Crc32, 1, 16);
    store.set(b"only", b"1").unwrap();
    store.remove(b"only").unwrap();
    store.set(b"other", b"2").unwrap();
    assert_eq!(store.get(b"other").unwrap(), Some(b"2".to_vec()));
    assert_eq!(store.stats().unwrap().free_elements, 0);
}

// =============================================================================
// Blob Page Tests
// =============================================================================

#[test]
fn test_values_around_page_boundaries() {
    // 256-byte pages carry 232 data bytes each
    let store = store_with(HashFn::Crc32, 64, 1024);
    for size in [0usize, 1, 231, 232, 233, 463, 464, 465, 10_000] {
        let key = format!("size-{}", size).into_bytes();
        let value: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        store.set(&key, &value).unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(value), "size {}", size);
    }
}

#[test]
fn test_long_keys_span_pages() {
    let store = store_with(HashFn::Crc32, 16, 256);
    let key = vec![b'k'; 1000];
    store.set(&key, b"long key").unwrap();
    assert_eq!(store.get(&key).unwrap(), Some(b"long key".to_vec()));

    let mut near = key.clone();
    near[999] = b'j';
    assert_eq!(store.get(&near).unwrap(), None);
}

#[test]
fn test_shrinking_value_returns_pages() {
    let store = store_with(HashFn::Crc32, 16, 256);
    store.set(b"grow", &vec![1u8; 5000]).unwrap();
    let full = store.stats().unwrap().free_pages;

    store.set(b"grow", b"small").unwrap();
    let shrunk = store.stats().unwrap().free_pages;
    assert_eq!(shrunk, full + 21);

    store.remove(b"grow").unwrap();
    assert_eq!(store.stats().unwrap().free_pages, 256);
}

#[test]
fn test_empty_key_is_rejected() {
    let store = store_with(HashFn::Crc32, 4, 16);
    assert!(store.set(b"", b"v").is_err());
    assert!(store.get(b"").is_err());
}
