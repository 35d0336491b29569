//! Tests for the queue engine
//!
//! These tests verify:
//! - FIFO and LIFO ordering, alone and mixed
//! - Non-destructive reads by position
//! - Expired items: reaped by pop, skipped by read and count
//! - Bulk removal through the cursor and the verdict callback
//! - Concurrent producers and consumers

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use shmkv::{
    now_millis, Config, Decision, Flow, QueueOrder, QueuePosition, Store, Verdict, EXPIRES_ATTR,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store() -> Store {
    let config = Config::builder()
        .anonymous()
        .bit_depth(3)
        .max_bit_depth(10)
        .collision_bits(1)
        .element_capacity(2048)
        .page_capacity(8192)
        .lock_stripes(16)
        .build();
    Store::open(config).unwrap()
}

/// Key of the `seq`-th item pushed onto the queue at `prefix`
fn item_key(prefix: &[u8], seq: u64) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(b"\0q\0");
    key.extend_from_slice(format!("{:016x}", seq).as_bytes());
    key
}

fn expire(store: &Store, key: &[u8]) {
    let past = now_millis() - 1;
    assert!(store.set_attr(key, EXPIRES_ATTR, &past.to_le_bytes()).unwrap());
}

fn pop_all(store: &Store, prefix: &[u8]) -> Vec<Vec<u8>> {
    let queue = store.queue(prefix);
    let mut out = Vec::new();
    while let Some(value) = queue.pop().unwrap() {
        out.push(value);
    }
    out
}

fn values(items: &[&str]) -> Vec<Vec<u8>> {
    items.iter().map(|s| s.as_bytes().to_vec()).collect()
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_fifo_order() {
    let store = setup_store();
    let queue = store.queue(b"jobs");
    for v in ["a", "b", "c"] {
        queue.push(v.as_bytes(), QueueOrder::Fifo).unwrap();
    }
    assert_eq!(pop_all(&store, b"jobs"), values(&["a", "b", "c"]));
    assert_eq!(queue.pop().unwrap(), None);
}

#[test]
fn test_lifo_order() {
    let store = setup_store();
    let queue = store.queue(b"stack");
    for v in ["a", "b", "c"] {
        queue.push(v.as_bytes(), QueueOrder::Lifo).unwrap();
    }
    assert_eq!(pop_all(&store, b"stack"), values(&["c", "b", "a"]));
}

#[test]
fn test_mixed_order() {
    let store = setup_store();
    let queue = store.queue(b"mixed");
    queue.push(b"a", QueueOrder::Fifo).unwrap();
    queue.push(b"b", QueueOrder::Fifo).unwrap();
    queue.push(b"urgent", QueueOrder::Lifo).unwrap();
    queue.push(b"c", QueueOrder::Fifo).unwrap();
    assert_eq!(pop_all(&store, b"mixed"), values(&["urgent", "a", "b", "c"]));
}

#[test]
fn test_queues_are_independent() {
    let store = setup_store();
    store.queue(b"left").push(b"l", QueueOrder::Fifo).unwrap();
    store.queue(b"right").push(b"r", QueueOrder::Fifo).unwrap();
    store.queue(b"").push(b"unnamed", QueueOrder::Fifo).unwrap();

    assert_eq!(store.queue(b"right").pop().unwrap(), Some(b"r".to_vec()));
    assert_eq!(store.queue(b"left").pop().unwrap(), Some(b"l".to_vec()));
    assert_eq!(store.queue(b"").pop().unwrap(), Some(b"unnamed".to_vec()));
}

#[test]
fn test_push_after_drained() {
    let store = setup_store();
    let queue = store.queue(b"q");
    queue.push(b"1", QueueOrder::Fifo).unwrap();
    assert_eq!(queue.pop().unwrap(), Some(b"1".to_vec()));
    assert!(queue.is_empty().unwrap());

    queue.push(b"2", QueueOrder::Fifo).unwrap();
    queue.push(b"3", QueueOrder::Fifo).unwrap();
    assert_eq!(pop_all(&store, b"q"), values(&["2", "3"]));

    // Only the marker is left behind
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn test_items_are_ordinary_keys() {
    let store = setup_store();
    let queue = store.queue(b"q");
    queue.push(b"first", QueueOrder::Fifo).unwrap();
    queue.push(b"second", QueueOrder::Fifo).unwrap();

    let first = item_key(b"q", 1);
    let second = item_key(b"q", 2);
    assert_eq!(store.get(&first).unwrap(), Some(b"first".to_vec()));
    assert_eq!(store.subkeys(&first).unwrap(), Some(vec![second.clone()]));
    assert_eq!(store.subkeys(&second).unwrap(), Some(Vec::new()));
}

// =============================================================================
// Inspection Tests
// =============================================================================

#[test]
fn test_count_and_is_empty() {
    let store = setup_store();
    let queue = store.queue(b"q");
    assert!(queue.is_empty().unwrap());
    assert_eq!(queue.count().unwrap(), 0);

    for i in 0..5 {
        queue.push(format!("{}", i).as_bytes(), QueueOrder::Fifo).unwrap();
    }
    assert!(!queue.is_empty().unwrap());
    assert_eq!(queue.count().unwrap(), 5);
}

#[test]
fn test_read_positions() {
    let store = setup_store();
    let queue = store.queue(b"q");
    for v in ["x", "y", "z"] {
        queue.push(v.as_bytes(), QueueOrder::Fifo).unwrap();
    }

    assert_eq!(queue.read(QueuePosition::First).unwrap(), Some(b"x".to_vec()));
    assert_eq!(queue.read(QueuePosition::Last).unwrap(), Some(b"z".to_vec()));
    assert_eq!(queue.read(QueuePosition::Nth(1)).unwrap(), Some(b"y".to_vec()));
    assert_eq!(queue.read(QueuePosition::Nth(3)).unwrap(), None);

    // Reads remove nothing
    assert_eq!(queue.count().unwrap(), 3);
}

#[test]
fn test_read_empty_queue() {
    let store = setup_store();
    let queue = store.queue(b"none");
    assert_eq!(queue.read(QueuePosition::First).unwrap(), None);
    assert_eq!(queue.read(QueuePosition::Last).unwrap(), None);
    assert_eq!(queue.pop().unwrap(), None);
}

// =============================================================================
// Expiry Tests
// =============================================================================

#[test]
fn test_pop_reaps_expired_heads() {
    let store = setup_store();
    let queue = store.queue(b"q");
    for v in ["a", "b", "c"] {
        queue.push(v.as_bytes(), QueueOrder::Fifo).unwrap();
    }
    expire(&store, &item_key(b"q", 1));
    expire(&store, &item_key(b"q", 2));

    assert_eq!(queue.pop().unwrap(), Some(b"c".to_vec()));
    assert!(!store.exists(&item_key(b"q", 1)).unwrap());
    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(queue.pop().unwrap(), None);
}

#[test]
fn test_pop_of_only_expired_items_empties_queue() {
    let store = setup_store();
    let queue = store.queue(b"q");
    queue.push(b"gone", QueueOrder::Fifo).unwrap();
    expire(&store, &item_key(b"q", 1));

    assert_eq!(queue.pop().unwrap(), None);
    assert!(queue.is_empty().unwrap());
}

#[test]
fn test_fifo_push_after_tail_expired() {
    let store = setup_store();
    let queue = store.queue(b"q");
    queue.push(b"a", QueueOrder::Fifo).unwrap();
    expire(&store, &item_key(b"q", 1));

    queue.push(b"b", QueueOrder::Fifo).unwrap();

    // Linking "b" behind the expired tail must not revive it
    assert!(!store.exists(&item_key(b"q", 1)).unwrap());
    assert_eq!(queue.count().unwrap(), 1);
    assert_eq!(queue.pop().unwrap(), Some(b"b".to_vec()));
    assert_eq!(queue.pop().unwrap(), None);
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn test_read_skips_expired_without_deleting() {
    let store = setup_store();
    let queue = store.queue(b"q");
    for v in ["a", "b", "c"] {
        queue.push(v.as_bytes(), QueueOrder::Fifo).unwrap();
    }
    expire(&store, &item_key(b"q", 1));
    expire(&store, &item_key(b"q", 3));

    assert_eq!(queue.read(QueuePosition::First).unwrap(), Some(b"b".to_vec()));
    assert_eq!(queue.read(QueuePosition::Last).unwrap(), Some(b"b".to_vec()));
    assert_eq!(queue.read(QueuePosition::Nth(1)).unwrap(), None);
    assert_eq!(queue.count().unwrap(), 1);

    // Marker plus all three items are still stored
    assert_eq!(store.len().unwrap(), 4);
}

#[test]
fn test_pop_leaves_no_orphaned_items() {
    let store = setup_store();
    let queue = store.queue(b"q");
    for v in ["a", "b", "c"] {
        queue.push(v.as_bytes(), QueueOrder::Fifo).unwrap();
    }
    queue.push(b"z", QueueOrder::Lifo).unwrap();
    expire(&store, &item_key(b"q", 2));

    assert_eq!(pop_all(&store, b"q"), values(&["z", "a", "c"]));

    // Only the marker survives
    assert_eq!(store.len().unwrap(), 1);
    for seq in 1..=4 {
        assert_eq!(store.get(&item_key(b"q", seq)).unwrap(), None);
    }
    store.verify().unwrap();
}

// =============================================================================
// Bulk Removal Tests
// =============================================================================

#[test]
fn test_cursor_removes_selected_items() {
    let store = setup_store();
    let queue = store.queue(b"q");
    for i in 1..=6 {
        queue.push(format!("{}", i).as_bytes(), QueueOrder::Fifo).unwrap();
    }

    let mut cursor = queue.drain(usize::MAX);
    while let Some(value) = cursor.next().unwrap() {
        let n: u32 = String::from_utf8(value).unwrap().parse().unwrap();
        let decision = if n % 2 == 0 { Decision::Remove } else { Decision::Keep };
        assert!(cursor.decide(decision, Flow::Continue).unwrap());
    }
    assert_eq!(cursor.removed(), 3);

    // The tail was removed, so pushes must append after the last kept item
    queue.push(b"7", QueueOrder::Fifo).unwrap();
    assert_eq!(pop_all(&store, b"q"), values(&["1", "3", "5", "7"]));
}

#[test]
fn test_cursor_stop() {
    let store = setup_store();
    let queue = store.queue(b"q");
    for v in ["a", "b", "c"] {
        queue.push(v.as_bytes(), QueueOrder::Fifo).unwrap();
    }

    let mut cursor = queue.drain(10);
    assert_eq!(cursor.next().unwrap(), Some(b"a".to_vec()));
    cursor.decide(Decision::Remove, Flow::Stop).unwrap();
    assert_eq!(cursor.next().unwrap(), None);

    assert_eq!(pop_all(&store, b"q"), values(&["b", "c"]));
}

#[test]
fn test_remove_with_count_limit() {
    let store = setup_store();
    let queue = store.queue(b"q");
    for i in 0..10 {
        queue.push(format!("{}", i).as_bytes(), QueueOrder::Fifo).unwrap();
    }

    let removed = queue.remove_with(4, |_| Verdict::RemoveContinue).unwrap();
    assert_eq!(removed, 4);
    assert_eq!(queue.count().unwrap(), 6);
    assert_eq!(queue.read(QueuePosition::First).unwrap(), Some(b"4".to_vec()));
}

#[test]
fn test_remove_with_verdicts() {
    let store = setup_store();
    let queue = store.queue(b"q");
    for v in ["keep", "drop", "keep", "drop-and-stop", "untouched"] {
        queue.push(v.as_bytes(), QueueOrder::Fifo).unwrap();
    }

    let removed = queue
        .remove_with(usize::MAX, |value| match value {
            b"keep" => Verdict::KeepContinue,
            b"drop" => Verdict::RemoveContinue,
            b"drop-and-stop" => Verdict::RemoveStop,
            _ => Verdict::Abort,
        })
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(pop_all(&store, b"q"), values(&["keep", "keep", "untouched"]));
}

#[test]
fn test_remove_with_abort_touches_nothing() {
    let store = setup_store();
    let queue = store.queue(b"q");
    queue.push(b"a", QueueOrder::Fifo).unwrap();
    queue.push(b"b", QueueOrder::Fifo).unwrap();

    let removed = queue.remove_with(usize::MAX, |_| Verdict::Abort).unwrap();
    assert_eq!(removed, 0);
    assert_eq!(queue.count().unwrap(), 2);
}

#[test]
fn test_remove_with_keep_stop() {
    let store = setup_store();
    let queue = store.queue(b"q");
    queue.push(b"a", QueueOrder::Fifo).unwrap();
    queue.push(b"b", QueueOrder::Fifo).unwrap();

    let mut seen = Vec::new();
    let removed = queue
        .remove_with(usize::MAX, |value| {
            seen.push(value.to_vec());
            Verdict::KeepStop
        })
        .unwrap();
    assert_eq!(removed, 0);
    assert_eq!(seen, values(&["a"]));
}

#[test]
fn test_clear() {
    let store = setup_store();
    let queue = store.queue(b"q");
    for i in 0..25 {
        queue.push(format!("{}", i).as_bytes(), QueueOrder::Lifo).unwrap();
    }

    assert_eq!(queue.clear().unwrap(), 25);
    assert!(queue.is_empty().unwrap());
    assert_eq!(store.len().unwrap(), 1);

    queue.push(b"again", QueueOrder::Fifo).unwrap();
    assert_eq!(queue.pop().unwrap(), Some(b"again".to_vec()));
}

#[test]
fn test_drain_reaps_expired_without_counting() {
    let store = setup_store();
    let queue = store.queue(b"q");
    for v in ["a", "b", "c"] {
        queue.push(v.as_bytes(), QueueOrder::Fifo).unwrap();
    }
    expire(&store, &item_key(b"q", 2));

    let mut offered = Vec::new();
    let removed = queue
        .remove_with(usize::MAX, |value| {
            offered.push(value.to_vec());
            Verdict::KeepContinue
        })
        .unwrap();
    assert_eq!(removed, 0);
    assert_eq!(offered, values(&["a", "c"]));
    assert!(!store.exists(&item_key(b"q", 2)).unwrap());
    assert_eq!(pop_all(&store, b"q"), values(&["a", "c"]));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_producers_and_consumers() {
    let store = Arc::new(setup_store());

    let producers: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let queue = store.queue(b"shared");
                for i in 0..100 {
                    queue.push(format!("{}-{}", t, i).as_bytes(), QueueOrder::Fifo).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let queue = store.queue(b"shared");
                let mut got = Vec::new();
                while let Some(value) = queue.pop().unwrap() {
                    got.push(value);
                }
                got
            })
        })
        .collect();

    let mut all = HashSet::new();
    for consumer in consumers {
        for value in consumer.join().unwrap() {
            assert!(all.insert(value));
        }
    }
    assert_eq!(all.len(), 400);
    assert!(store.queue(b"shared").is_empty().unwrap());
}

#[test]
fn test_per_producer_fifo_order() {
    let store = Arc::new(setup_store());

    let producers: Vec<_> = (0..3)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let queue = store.queue(b"ordered");
                for i in 0..50u32 {
                    queue.push(format!("{}:{}", t, i).as_bytes(), QueueOrder::Fifo).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let mut last = [None::<u32>; 3];
    for value in pop_all(&store, b"ordered") {
        let text = String::from_utf8(value).unwrap();
        let (t, i) = text.split_once(':').unwrap();
        let t: usize = t.parse().unwrap();
        let i: u32 = i.parse().unwrap();
        if let Some(prev) = last[t] {
            assert!(i > prev);
        }
        last[t] = Some(i);
    }
    assert_eq!(last, [Some(49); 3]);
}
