//! Tests for the range sync engine
//!
//! These tests verify:
//! - Hash ranges partition the key space without gaps or overlap
//! - Chunked scans resume exactly where the previous chunk stopped
//! - Modification-time windows, including the relaxed old range
//! - Expired elements are skipped and reaped
//! - Last-writer-wins merges, and idempotence of repeated merges

use std::collections::HashSet;

use bytes::Bytes;
use shmkv::{
    now_millis, Attributes, Config, ErrorCategory, HashRange, MergeOutcome, ScanRequest,
    SerializedElement, ShmkvError, Store, EXPIRES_ATTR, MTIME_ATTR,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store() -> Store {
    let config = Config::builder()
        .anonymous()
        .bit_depth(4)
        .max_bit_depth(12)
        .collision_bits(2)
        .element_capacity(1024)
        .page_capacity(4096)
        .lock_stripes(32)
        .build();
    Store::open(config).unwrap()
}

fn fill(store: &Store, count: usize) -> Vec<Vec<u8>> {
    let keys: Vec<Vec<u8>> = (0..count).map(|i| format!("sync-{}", i).into_bytes()).collect();
    for key in &keys {
        store.set(key, key).unwrap();
    }
    keys
}

/// Follow `next_hash` until the whole hash space is covered
fn scan_all(store: &Store, request: ScanRequest) -> Vec<SerializedElement> {
    let mut request = request;
    let mut out = Vec::new();
    loop {
        let chunk = store.scan_by_hash(&request).unwrap();
        out.extend(chunk.elements);
        match chunk.next_hash {
            Some(next) => request = request.start_hash(next),
            None => return out,
        }
    }
}

fn key_set(elements: &[SerializedElement]) -> HashSet<Vec<u8>> {
    elements.iter().map(|e| e.key().to_vec()).collect()
}

fn set_with_mtime(store: &Store, key: &[u8], value: &[u8], mtime: Option<u64>) {
    store.set(key, value).unwrap();
    let mut attrs = Attributes::new();
    if let Some(mtime) = mtime {
        attrs.set_u64(MTIME_ATTR, mtime);
    }
    store.set_attrs(key, &attrs).unwrap();
}

/// Serialized form of one key, taken through a scan
fn export(store: &Store, key: &[u8]) -> SerializedElement {
    scan_all(store, ScanRequest::new(HashRange::all()))
        .into_iter()
        .find(|e| e.key() == key)
        .unwrap()
}

// =============================================================================
// Scan Tests
// =============================================================================

#[test]
fn test_full_scan_returns_every_key() {
    let store = setup_store();
    let keys = fill(&store, 200);

    let result = store.scan_by_hash(&ScanRequest::new(HashRange::all())).unwrap();
    assert_eq!(result.next_hash, None);
    assert_eq!(result.reaped, 0);
    assert_eq!(key_set(&result.elements), keys.into_iter().collect());
}

#[test]
fn test_scan_output_is_in_hash_order() {
    let store = setup_store();
    fill(&store, 150);

    let elements = scan_all(&store, ScanRequest::new(HashRange::all()));
    let hashes: Vec<u32> = elements.iter().map(|e| e.key_hash().hash).collect();
    let mut sorted = hashes.clone();
    sorted.sort_unstable();
    assert_eq!(hashes, sorted);
}

#[test]
fn test_ranges_partition_the_key_space() {
    let store = setup_store();
    let keys: HashSet<Vec<u8>> = fill(&store, 300).into_iter().collect();

    let mut seen = HashSet::new();
    for start in 0..3 {
        let part = scan_all(&store, ScanRequest::new(HashRange::new(start, 1, 3)));
        for element in part {
            assert_eq!(element.key_hash().hash as u64 % 3, start);
            assert!(seen.insert(element.key().to_vec()), "duplicate across ranges");
        }
    }
    assert_eq!(seen, keys);
}

#[test]
fn test_wrapped_range() {
    let store = setup_store();
    fill(&store, 200);

    // 3, 0 (mod 4)
    let wrapped = scan_all(&store, ScanRequest::new(HashRange::new(3, 2, 4)));
    for element in &wrapped {
        let r = element.key_hash().hash % 4;
        assert!(r == 3 || r == 0);
    }
    let expected = scan_all(&store, ScanRequest::new(HashRange::new(3, 1, 4))).len()
        + scan_all(&store, ScanRequest::new(HashRange::new(0, 1, 4))).len();
    assert_eq!(wrapped.len(), expected);
}

#[test]
fn test_chunked_scan_neither_repeats_nor_misses() {
    let store = setup_store();
    let keys: HashSet<Vec<u8>> = fill(&store, 300).into_iter().collect();

    let mut request = ScanRequest::new(HashRange::all()).max_elements(7);
    let mut seen = HashSet::new();
    let mut chunks = 0;
    loop {
        let chunk = store.scan_by_hash(&request).unwrap();
        chunks += 1;
        for element in &chunk.elements {
            assert!(seen.insert(element.key().to_vec()));
        }
        match chunk.next_hash {
            Some(next) => {
                assert!(chunk.elements.len() >= 7);
                assert!(next > request.start_hash);
                request = request.start_hash(next);
            }
            None => break,
        }
    }
    assert!(chunks > 1);
    assert_eq!(seen, keys);
}

#[test]
fn test_chunked_scan_after_split() {
    let store = setup_store();
    let keys: HashSet<Vec<u8>> = fill(&store, 250).into_iter().collect();
    store.grow_index(6).unwrap();
    for prefix in (0..64u32).step_by(5) {
        store.split_bucket(prefix << 26).unwrap();
    }

    let elements = scan_all(&store, ScanRequest::new(HashRange::all()).max_elements(5));
    assert_eq!(elements.len(), keys.len());
    assert_eq!(key_set(&elements), keys);
}

#[test]
fn test_zero_modulus_is_rejected() {
    let store = setup_store();
    let err = store
        .scan_by_hash(&ScanRequest::new(HashRange::new(0, 1, 0)))
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Parameter);

    let err = store
        .scan_by_hash(&ScanRequest::new(HashRange::all()).old_range(HashRange::new(0, 1, 0)))
        .unwrap_err();
    assert!(matches!(err, ShmkvError::InvalidParameter(_)));
}

// =============================================================================
// Time Window Tests
// =============================================================================

#[test]
fn test_time_window() {
    let store = setup_store();
    set_with_mtime(&store, b"t100", b"a", Some(100));
    set_with_mtime(&store, b"t200", b"b", Some(200));
    set_with_mtime(&store, b"t300", b"c", Some(300));
    set_with_mtime(&store, b"none", b"d", None);

    let mid = scan_all(&store, ScanRequest::new(HashRange::all()).window(150, 250));
    assert_eq!(key_set(&mid), [b"t200".to_vec()].into_iter().collect());

    // A missing modification time counts as 0
    let early = scan_all(&store, ScanRequest::new(HashRange::all()).window(0, 150));
    assert_eq!(
        key_set(&early),
        [b"t100".to_vec(), b"none".to_vec()].into_iter().collect()
    );

    // End bound is exclusive
    let upto = scan_all(&store, ScanRequest::new(HashRange::all()).window(200, 300));
    assert_eq!(key_set(&upto), [b"t200".to_vec()].into_iter().collect());
}

#[test]
fn test_old_range_ignores_window_start() {
    let store = setup_store();
    let keys: Vec<Vec<u8>> = (0..40).map(|i| format!("old-{}", i).into_bytes()).collect();
    for (i, key) in keys.iter().enumerate() {
        set_with_mtime(&store, key, b"v", Some(100 + i as u64 * 10));
    }

    let old = HashRange::new(0, 1, 2);
    let request = ScanRequest::new(HashRange::all())
        .window(300, 400)
        .old_range(old);
    let got = key_set(&scan_all(&store, request));

    for (i, key) in keys.iter().enumerate() {
        let mtime = 100 + i as u64 * 10;
        let owned = old.contains(store.hash(key).hash);
        let expected = mtime < 400 && (owned || mtime >= 300);
        assert_eq!(got.contains(key), expected, "key {} mtime {}", i, mtime);
    }
}

// =============================================================================
// Expiry Tests
// =============================================================================

#[test]
fn test_scan_reaps_expired_elements() {
    let store = setup_store();
    fill(&store, 10);
    let past = now_millis() - 1;
    store.set_attr(b"sync-3", EXPIRES_ATTR, &past.to_le_bytes()).unwrap();
    store.set_attr(b"sync-7", EXPIRES_ATTR, &past.to_le_bytes()).unwrap();

    let result = store.scan_by_hash(&ScanRequest::new(HashRange::all())).unwrap();
    assert_eq!(result.elements.len(), 8);
    assert_eq!(result.reaped, 2);
    assert_eq!(store.len().unwrap(), 8);
    assert!(!key_set(&result.elements).contains(&b"sync-3".to_vec()));
    store.verify().unwrap();
}

#[test]
fn test_scan_without_expiry_check() {
    let store = setup_store();
    fill(&store, 10);
    let past = now_millis() - 1;
    store.set_attr(b"sync-5", EXPIRES_ATTR, &past.to_le_bytes()).unwrap();

    let request = ScanRequest::new(HashRange::all()).check_expiry(false);
    let result = store.scan_by_hash(&request).unwrap();
    assert_eq!(result.elements.len(), 10);
    assert_eq!(result.reaped, 0);
    assert_eq!(store.len().unwrap(), 10);
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_merge_into_empty_store() {
    let source = setup_store();
    let target = setup_store();
    source.set(b"copied", b"value").unwrap();
    source.add_subkey(b"copied", b"child").unwrap();

    let element = export(&source, b"copied");
    assert_eq!(target.merge_element(&element, None).unwrap(), MergeOutcome::Applied);

    assert_eq!(target.get(b"copied").unwrap(), Some(b"value".to_vec()));
    assert_eq!(target.subkeys(b"copied").unwrap(), Some(vec![b"child".to_vec()]));
    assert_eq!(target.attrs(b"copied").unwrap(), source.attrs(b"copied").unwrap());
}

#[test]
fn test_merge_is_idempotent() {
    let source = setup_store();
    let target = setup_store();
    set_with_mtime(&source, b"k", b"v", Some(500));

    let element = export(&source, b"k");
    assert_eq!(target.merge_element(&element, None).unwrap(), MergeOutcome::Applied);
    assert_eq!(target.merge_element(&element, None).unwrap(), MergeOutcome::Skipped);
    assert_eq!(target.len().unwrap(), 1);
}

#[test]
fn test_merge_last_writer_wins() {
    let source = setup_store();
    let target = setup_store();
    set_with_mtime(&target, b"k", b"local", Some(500));

    set_with_mtime(&source, b"k", b"older", Some(400));
    let older = export(&source, b"k");
    assert_eq!(target.merge_element(&older, None).unwrap(), MergeOutcome::Skipped);
    assert_eq!(target.get(b"k").unwrap(), Some(b"local".to_vec()));

    set_with_mtime(&source, b"k", b"newer", Some(600));
    let newer = export(&source, b"k");
    assert_eq!(target.merge_element(&newer, None).unwrap(), MergeOutcome::Applied);
    assert_eq!(target.get(b"k").unwrap(), Some(b"newer".to_vec()));
    assert_eq!(target.attr(b"k", MTIME_ATTR).unwrap(), Some(600u64.to_le_bytes().to_vec()));
}

#[test]
fn test_merge_without_time_uses_as_of() {
    let source = setup_store();
    let target = setup_store();
    set_with_mtime(&source, b"k", b"v", None);
    let element = export(&source, b"k");

    assert_eq!(target.merge_element(&element, Some(700)).unwrap(), MergeOutcome::Applied);
    assert_eq!(target.attr(b"k", MTIME_ATTR).unwrap(), Some(700u64.to_le_bytes().to_vec()));

    // The stamped time now wins ties
    assert_eq!(target.merge_element(&element, Some(700)).unwrap(), MergeOutcome::Skipped);
    assert_eq!(target.merge_element(&element, Some(800)).unwrap(), MergeOutcome::Applied);
}

#[test]
fn test_merge_with_unknown_times() {
    let source = setup_store();
    let target = setup_store();
    set_with_mtime(&source, b"k", b"incoming", None);
    let untimed = export(&source, b"k");

    // Absent locally: applied even without a time
    assert_eq!(target.merge_element(&untimed, None).unwrap(), MergeOutcome::Applied);

    // Present locally, neither side timed: skipped
    assert_eq!(target.merge_element(&untimed, None).unwrap(), MergeOutcome::Skipped);

    // Local has no time, incoming has one: applied
    set_with_mtime(&source, b"k", b"timed", Some(10));
    let timed = export(&source, b"k");
    assert_eq!(target.merge_element(&timed, None).unwrap(), MergeOutcome::Applied);
    assert_eq!(target.get(b"k").unwrap(), Some(b"timed".to_vec()));
}

#[test]
fn test_merge_over_expired_local_key() {
    let source = setup_store();
    let target = setup_store();
    set_with_mtime(&target, b"k", b"stale", Some(10_000));
    let past = now_millis() - 1;
    target.set_attr(b"k", EXPIRES_ATTR, &past.to_le_bytes()).unwrap();

    set_with_mtime(&source, b"k", b"fresh", Some(1));
    let element = export(&source, b"k");
    assert_eq!(target.merge_element(&element, None).unwrap(), MergeOutcome::Applied);
    assert_eq!(target.get(b"k").unwrap(), Some(b"fresh".to_vec()));
    assert_eq!(target.len().unwrap(), 1);
}

#[test]
fn test_failed_merge_keeps_local_value() {
    let config = Config::builder()
        .anonymous()
        .bit_depth(3)
        .max_bit_depth(10)
        .collision_bits(2)
        .element_capacity(8)
        .page_capacity(6)
        .lock_stripes(16)
        .build();
    let target = Store::open(config).unwrap();
    target.set(b"k", b"old").unwrap();

    let big = vec![0u8; 10_000];
    let element = SerializedElement::encode(target.hash(b"k"), b"k", &big, b"", b"");
    let err = target
        .merge_element(&element, Some(now_millis() + 60_000))
        .unwrap_err();
    assert!(matches!(err, ShmkvError::PoolExhausted { pool: "page" }));

    assert_eq!(target.get(b"k").unwrap(), Some(b"old".to_vec()));
    assert_eq!(target.len().unwrap(), 1);
    target.verify().unwrap();
}

#[test]
fn test_merge_skips_expired_incoming() {
    let source = setup_store();
    let target = setup_store();
    source.set(b"k", b"v").unwrap();
    let past = now_millis() - 1;
    source.set_attr(b"k", EXPIRES_ATTR, &past.to_le_bytes()).unwrap();

    let request = ScanRequest::new(HashRange::all()).check_expiry(false);
    let element = scan_all(&source, request).into_iter().next().unwrap();
    assert_eq!(target.merge_element(&element, None).unwrap(), MergeOutcome::Skipped);
    assert!(!target.exists(b"k").unwrap());
}

#[test]
fn test_merge_rejects_mismatched_hash() {
    let source = setup_store();
    let target = setup_store();
    source.set(b"k", b"v").unwrap();

    let mut raw = export(&source, b"k").into_bytes().to_vec();
    raw[0] ^= 0xFF;
    let tampered = SerializedElement::decode(Bytes::from(raw)).unwrap();

    let err = target.merge_element(&tampered, None).unwrap_err();
    assert!(matches!(err, ShmkvError::Corruption(_)));
    assert!(!target.exists(b"k").unwrap());
}

#[test]
fn test_decode_rejects_truncated_element() {
    let source = setup_store();
    source.set(b"k", b"value").unwrap();
    let raw = export(&source, b"k").into_bytes();

    let short = raw.slice(..raw.len() - 1);
    assert!(SerializedElement::decode(short).is_err());
    assert!(SerializedElement::decode(raw).is_ok());
}

#[test]
fn test_rebalance_moves_one_partition() {
    let source = setup_store();
    let target = setup_store();
    let keys = fill(&source, 200);

    let partition = HashRange::new(1, 1, 2);
    let mut request = ScanRequest::new(partition).max_elements(16);
    loop {
        let chunk = source.scan_by_hash(&request).unwrap();
        for element in &chunk.elements {
            target.merge_element(element, Some(now_millis())).unwrap();
        }
        match chunk.next_hash {
            Some(next) => request = request.start_hash(next),
            None => break,
        }
    }

    for key in &keys {
        let owned = partition.contains(source.hash(key).hash);
        assert_eq!(target.exists(key).unwrap(), owned);
    }
    target.verify().unwrap();
}
