//! Queue Engine
//!
//! FIFO and LIFO queues built from ordinary keys.
//!
//! ## Layout
//! ```text
//! marker  <prefix>\0q\0marker   value: [head key | tail key], attr queue.seq
//!
//! items   <prefix>\0q\0<seq as 16 hex digits>
//!
//!   head ──subkey──▶ item ──subkey──▶ item ──subkey──▶ tail
//! ```
//!
//! Each item names the next one as its single subkey. Pop always takes the
//! head; FIFO push extends the tail, LIFO push extends the head. Every
//! mutation locks the marker's slot, so operations on one queue are totally
//! ordered.

use crate::attrs::Attributes;
use crate::codec::{encode_attrs, encode_subkeys, Marker};
use crate::error::{Result, ShmkvError};
use crate::page::Blob;
use crate::store::{Keys, Store};

const QUEUE_INFIX: &[u8] = b"\0q\0";
const MARKER_SUFFIX: &[u8] = b"marker";

/// Attribute on the marker holding the last issued item number
pub const QUEUE_SEQ_ATTR: &[u8] = b"queue.seq";

/// Which end a push extends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOrder {
    /// Push at the tail; pop returns the oldest item
    Fifo,
    /// Push at the head; pop returns the newest item
    Lifo,
}

/// Position for a non-destructive read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    First,
    Last,
    /// Zero-based, counting live items from the head
    Nth(usize),
}

/// Per-item answer for [`Queue::remove_with`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    RemoveContinue,
    KeepContinue,
    RemoveStop,
    KeepStop,
    /// Stop without touching the current item
    Abort,
}

/// What a [`RemoveCursor`] does with the current item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Remove,
}

/// Whether a [`RemoveCursor`] moves on after a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Marker contents plus the item counter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct QueueState {
    marker: Marker,
    seq: u64,
}

/// One queue, identified by its key prefix
pub struct Queue<'s> {
    store: &'s Store,
    prefix: Vec<u8>,
    marker_key: Vec<u8>,
}

impl Store {
    /// Handle on the queue stored under `prefix` (may be empty)
    pub fn queue(&self, prefix: &[u8]) -> Queue<'_> {
        let mut marker_key = Vec::with_capacity(prefix.len() + QUEUE_INFIX.len() + MARKER_SUFFIX.len());
        marker_key.extend_from_slice(prefix);
        marker_key.extend_from_slice(QUEUE_INFIX);
        marker_key.extend_from_slice(MARKER_SUFFIX);
        Queue {
            store: self,
            prefix: prefix.to_vec(),
            marker_key,
        }
    }
}

impl<'s> Queue<'s> {
    fn item_key(&self, seq: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.prefix.len() + QUEUE_INFIX.len() + 16);
        key.extend_from_slice(&self.prefix);
        key.extend_from_slice(QUEUE_INFIX);
        key.extend_from_slice(format!("{:016x}", seq).as_bytes());
        key
    }

    // =========================================================================
    // State Under Held Locks
    // =========================================================================

    fn state_in(&self, keys: &Keys<'_>) -> Result<QueueState> {
        match keys.lookup(&self.marker_key)?.node {
            Some(node) => Ok(QueueState {
                marker: Marker::decode(&keys.blob(node, Blob::Value)?)?,
                seq: keys.attrs_of(node)?.get_u64(QUEUE_SEQ_ATTR).unwrap_or(0),
            }),
            None => Ok(QueueState::default()),
        }
    }

    fn write_state_in(&self, keys: &Keys<'_>, state: &QueueState) -> Result<()> {
        let mut attrs = match keys.lookup(&self.marker_key)?.node {
            Some(node) => keys.attrs_of(node)?,
            None => Attributes::new(),
        };
        attrs.set_u64(QUEUE_SEQ_ATTR, state.seq);
        let value = state.marker.encode();
        let attrs = encode_attrs(&attrs);
        keys.write(
            &self.marker_key,
            &[(Blob::Value, value.as_slice()), (Blob::Attrs, attrs.as_slice())],
            true,
        )?;
        Ok(())
    }

    /// The item after `item`, or `None` at the end of the chain
    fn next_in(&self, keys: &Keys<'_>, item: &[u8]) -> Result<Option<Vec<u8>>> {
        let node = keys
            .lookup(item)?
            .node
            .ok_or_else(|| broken_chain(item))?;
        Ok(keys.subkeys_of(node)?.into_iter().next())
    }

    /// Relink `item` in place; an expired item stays expired
    fn set_next_in(&self, keys: &Keys<'_>, item: &[u8], next: Option<&[u8]>) -> Result<()> {
        let node = keys
            .lookup(item)?
            .node
            .ok_or_else(|| broken_chain(item))?;
        let list: Vec<Vec<u8>> = next.map(|n| vec![n.to_vec()]).unwrap_or_default();
        let encoded = encode_subkeys(&list);
        keys.rewrite(node, &[(Blob::Subkeys, encoded.as_slice())], true)
    }

    fn state(&self) -> Result<QueueState> {
        self.store.read_key(&self.marker_key, |keys| self.state_in(keys))
    }

    /// Value, successor and expiry of one item, read under its slot lock
    fn item(&self, key: &[u8]) -> Result<Option<Item>> {
        self.store.read_key(key, |keys| {
            let Some(node) = keys.lookup(key)?.node else {
                return Ok(None);
            };
            Ok(Some(Item {
                value: keys.blob(node, Blob::Value)?,
                next: keys.subkeys_of(node)?.into_iter().next(),
                expired: keys.is_expired(node)?,
            }))
        })
    }

    // =========================================================================
    // Push / Pop
    // =========================================================================

    /// Append `value` at the end `order` names
    pub fn push(&self, value: &[u8], order: QueueOrder) -> Result<()> {
        loop {
            // Step 1: learn the tail and item number without holding locks
            let snapshot = self.state()?;
            let item = self.item_key(snapshot.seq + 1);

            let mut lock_keys: Vec<&[u8]> = vec![self.marker_key.as_slice(), item.as_slice()];
            if order == QueueOrder::Fifo && !snapshot.marker.is_empty() {
                lock_keys.push(snapshot.marker.tail.as_slice());
            }

            // Step 2: re-check under the locks, then create and link
            let pushed = self.store.write_keys(&lock_keys, |keys| {
                if self.state_in(keys)? != snapshot {
                    return Ok(false);
                }
                self.push_locked(keys, &snapshot, &item, value, order)?;
                Ok(true)
            })?;

            if pushed {
                return Ok(());
            }
        }
    }

    fn push_locked(
        &self,
        keys: &Keys<'_>,
        snapshot: &QueueState,
        item: &[u8],
        value: &[u8],
        order: QueueOrder,
    ) -> Result<()> {
        let empty = snapshot.marker.is_empty();
        let mut next = QueueState {
            marker: snapshot.marker.clone(),
            seq: snapshot.seq + 1,
        };

        let subkeys = if order == QueueOrder::Lifo && !empty {
            encode_subkeys(&[snapshot.marker.head.clone()])
        } else {
            Vec::new()
        };
        keys.write(
            item,
            &[(Blob::Value, value), (Blob::Subkeys, subkeys.as_slice())],
            true,
        )?;

        let tail_linked = order == QueueOrder::Fifo && !empty;
        let linked = (|| {
            if empty {
                next.marker = Marker {
                    head: item.to_vec(),
                    tail: item.to_vec(),
                };
            } else if order == QueueOrder::Fifo {
                self.set_next_in(keys, &snapshot.marker.tail, Some(item))?;
                next.marker.tail = item.to_vec();
            } else {
                next.marker.head = item.to_vec();
            }
            self.write_state_in(keys, &next)
        })();

        if let Err(e) = linked {
            // Tear down whichever half succeeded
            if tail_linked {
                if let Err(undo) = self.set_next_in(keys, &snapshot.marker.tail, None) {
                    tracing::warn!(error = %undo, "failed to unlink queue tail after a failed push");
                }
            }
            if let Err(undo) = keys.delete(item) {
                tracing::warn!(error = %undo, "failed to delete orphaned queue item");
            } else {
                tracing::debug!(error = %e, "rolled back queue push");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove and return the head item's value
    ///
    /// Expired items at the head are deleted on the way.
    pub fn pop(&self) -> Result<Option<Vec<u8>>> {
        loop {
            let snapshot = self.state()?;
            if snapshot.marker.is_empty() {
                return Ok(None);
            }
            let head = snapshot.marker.head.clone();

            let step = self
                .store
                .write_keys(&[self.marker_key.as_slice(), head.as_slice()], |keys| {
                    if self.state_in(keys)? != snapshot {
                        return Ok(PopStep::Retry);
                    }
                    let found = keys.lookup(&head)?;
                    let node = found.node.ok_or_else(|| broken_chain(&head))?;
                    let expired = keys.is_expired(node)?;
                    let value = if expired {
                        None
                    } else {
                        Some(keys.blob(node, Blob::Value)?)
                    };

                    let next = keys.subkeys_of(node)?.into_iter().next();
                    let mut state = snapshot.clone();
                    state.marker = match next {
                        Some(next) if head != snapshot.marker.tail => Marker {
                            head: next,
                            tail: snapshot.marker.tail.clone(),
                        },
                        _ => Marker::default(),
                    };
                    self.write_state_in(keys, &state)?;
                    if let Err(e) = keys.delete_node(found.slot, node) {
                        tracing::warn!(error = %e, "failed to delete popped queue item");
                        if let Err(undo) = self.write_state_in(keys, &snapshot) {
                            tracing::warn!(
                                error = %undo,
                                "failed to restore queue marker after a failed pop"
                            );
                        }
                        return Err(e);
                    }

                    Ok(match value {
                        Some(value) => PopStep::Popped(value),
                        None => PopStep::Reaped,
                    })
                })?;

            match step {
                PopStep::Popped(value) => return Ok(Some(value)),
                PopStep::Reaped => {
                    tracing::debug!("reaped expired queue head");
                }
                PopStep::Retry => {}
            }
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Whether the marker records no items
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.state()?.marker.is_empty())
    }

    /// Number of live items reachable from the head
    ///
    /// Expired items are skipped but not deleted.
    pub fn count(&self) -> Result<usize> {
        let mut count = 0;
        self.walk(|_| {
            count += 1;
            true
        })?;
        Ok(count)
    }

    /// Read one item without removing anything
    ///
    /// Expired items are skipped but not deleted, unlike [`Queue::pop`].
    pub fn read(&self, position: QueuePosition) -> Result<Option<Vec<u8>>> {
        match position {
            QueuePosition::First => self.nth(0),
            QueuePosition::Nth(n) => self.nth(n),
            QueuePosition::Last => {
                let snapshot = self.state()?;
                if snapshot.marker.is_empty() {
                    return Ok(None);
                }
                if let Some(tail) = self.item(&snapshot.marker.tail)? {
                    if !tail.expired {
                        return Ok(Some(tail.value));
                    }
                }
                let mut last = None;
                self.walk(|value| {
                    last = Some(value.to_vec());
                    true
                })?;
                Ok(last)
            }
        }
    }

    fn nth(&self, n: usize) -> Result<Option<Vec<u8>>> {
        let mut seen = 0;
        let mut found = None;
        self.walk(|value| {
            if seen == n {
                found = Some(value.to_vec());
                return false;
            }
            seen += 1;
            true
        })?;
        Ok(found)
    }

    /// Visit live item values from the head until `f` returns false
    ///
    /// Each item is read under its own slot lock; a chain cut by a
    /// concurrent pop ends the walk.
    fn walk<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let snapshot = self.state()?;
        if snapshot.marker.is_empty() {
            return Ok(());
        }

        let limit = self.store.len()? + 1;
        let mut current = Some(snapshot.marker.head);
        let mut steps = 0u64;

        while let Some(key) = current {
            steps += 1;
            if steps > limit {
                return Err(ShmkvError::corrupt("queue chain has a cycle"));
            }
            let Some(item) = self.item(&key)? else {
                break;
            };
            if !item.expired && !f(&item.value) {
                break;
            }
            if key == snapshot.marker.tail {
                break;
            }
            current = item.next;
        }
        Ok(())
    }

    // =========================================================================
    // Bulk Removal
    // =========================================================================

    /// Cursor removing at most `count` items from the head onward
    pub fn drain(&self, count: usize) -> RemoveCursor<'_, 's> {
        RemoveCursor {
            queue: self,
            limit: count,
            removed: 0,
            prev_kept: None,
            current: None,
            started: false,
            done: count == 0,
        }
    }

    /// Remove up to `count` items, asking `decide` about each live one
    ///
    /// Returns the number of items removed.
    pub fn remove_with<F>(&self, count: usize, mut decide: F) -> Result<usize>
    where
        F: FnMut(&[u8]) -> Verdict,
    {
        let mut cursor = self.drain(count);
        while let Some(value) = cursor.next()? {
            let (decision, flow) = match decide(&value) {
                Verdict::RemoveContinue => (Decision::Remove, Flow::Continue),
                Verdict::KeepContinue => (Decision::Keep, Flow::Continue),
                Verdict::RemoveStop => (Decision::Remove, Flow::Stop),
                Verdict::KeepStop => (Decision::Keep, Flow::Stop),
                Verdict::Abort => break,
            };
            cursor.decide(decision, flow)?;
        }
        Ok(cursor.removed())
    }

    /// Remove every item; returns how many were removed
    pub fn clear(&self) -> Result<usize> {
        self.remove_with(usize::MAX, |_| Verdict::RemoveContinue)
    }
}

struct Item {
    value: Vec<u8>,
    next: Option<Vec<u8>>,
    expired: bool,
}

enum PopStep {
    Popped(Vec<u8>),
    Reaped,
    Retry,
}

fn broken_chain(item: &[u8]) -> ShmkvError {
    ShmkvError::corrupt(format!(
        "queue item {:?} is referenced but missing",
        String::from_utf8_lossy(item)
    ))
}

// =============================================================================
// Remove Cursor
// =============================================================================

/// Walks a queue from the head, removing or keeping one item per step
///
/// Each decision is applied atomically under the locks of the marker, the
/// last kept item and the current item. When the queue changed under the
/// cursor so that the current item moved, the decision is dropped and the
/// walk restarts from the head, offering items again.
pub struct RemoveCursor<'q, 's> {
    queue: &'q Queue<'s>,
    limit: usize,
    removed: usize,
    /// Last item kept before `current`; `None` when `current` is the head
    prev_kept: Option<Vec<u8>>,
    current: Option<Vec<u8>>,
    started: bool,
    done: bool,
}

impl<'q, 's> RemoveCursor<'q, 's> {
    /// Value of the next live item to decide on
    ///
    /// Expired items met on the way are removed without being offered and
    /// without counting toward the limit.
    pub fn next(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if !self.started {
                self.restart()?;
                continue;
            }
            let Some(key) = self.current.clone() else {
                self.done = true;
                return Ok(None);
            };

            match self.queue.item(&key)? {
                None => self.restart()?,
                Some(item) if item.expired => {
                    if !self.apply(Decision::Remove)? {
                        self.restart()?;
                    }
                }
                Some(item) => return Ok(Some(item.value)),
            }
        }
    }

    /// Apply a decision to the item last returned by `next`
    ///
    /// Returns `false` when the queue changed under the cursor and the
    /// decision was dropped.
    pub fn decide(&mut self, decision: Decision, flow: Flow) -> Result<bool> {
        if self.done || self.current.is_none() {
            return Ok(false);
        }

        let applied = self.apply(decision)?;
        if !applied {
            self.restart()?;
            return Ok(false);
        }

        if decision == Decision::Remove {
            self.removed += 1;
            if self.removed >= self.limit {
                self.done = true;
            }
        }
        if flow == Flow::Stop {
            self.done = true;
        }
        Ok(true)
    }

    /// Items removed so far (expired items excluded)
    pub fn removed(&self) -> usize {
        self.removed
    }

    fn restart(&mut self) -> Result<()> {
        let state = self.queue.state()?;
        self.started = true;
        self.prev_kept = None;
        self.current = if state.marker.is_empty() {
            None
        } else {
            Some(state.marker.head)
        };
        Ok(())
    }

    /// Keep or remove `current` and advance; `false` if the chain moved
    fn apply(&mut self, decision: Decision) -> Result<bool> {
        let Some(current) = self.current.clone() else {
            return Ok(false);
        };
        let queue = self.queue;

        let mut lock_keys: Vec<&[u8]> = vec![queue.marker_key.as_slice(), current.as_slice()];
        if let Some(prev) = &self.prev_kept {
            lock_keys.push(prev.as_slice());
        }

        let prev_kept = self.prev_kept.clone();
        let advanced = queue.store.write_keys(&lock_keys, |keys| {
            // Step 1: the current item must still follow the last kept one
            let state = queue.state_in(keys)?;
            if state.marker.is_empty() {
                return Ok(None);
            }
            let linked = match &prev_kept {
                None => state.marker.head == current,
                Some(prev) => match keys.lookup(prev)?.node {
                    Some(_) => queue.next_in(keys, prev)?.as_deref() == Some(current.as_slice()),
                    None => false,
                },
            };
            let found = keys.lookup(&current)?;
            let Some(node) = found.node.filter(|_| linked) else {
                return Ok(None);
            };

            let next = keys.subkeys_of(node)?.into_iter().next();
            let is_tail = state.marker.tail == current;

            if decision == Decision::Keep {
                return Ok(Some((Some(current.clone()), if is_tail { None } else { next })));
            }

            // Step 2: unlink `current`, fixing the marker if it was an end
            let mut updated = state.clone();
            match &prev_kept {
                None => {
                    updated.marker = match &next {
                        Some(next) if !is_tail => Marker {
                            head: next.clone(),
                            tail: state.marker.tail.clone(),
                        },
                        _ => Marker::default(),
                    };
                }
                Some(prev) => {
                    let successor = if is_tail { None } else { next.as_deref() };
                    queue.set_next_in(keys, prev, successor)?;
                    if is_tail {
                        updated.marker.tail = prev.clone();
                    }
                }
            }
            if updated != state {
                queue.write_state_in(keys, &updated)?;
            }
            keys.delete_node(found.slot, node)?;

            Ok(Some((prev_kept.clone(), if is_tail { None } else { next })))
        })?;

        match advanced {
            Some((prev, next)) => {
                self.prev_kept = prev;
                self.current = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
