//! Blob bucket: one shard of the key space.
//!
//! A bucket is an ordered mapping from key to blob plus a recency list:
//! - `map`: key -> slot index (hashbrown)
//! - slot slab: doubly-linked list threaded through slot indices
//! - list head is least-recently-used, tail is most-recently-used
//!
//! Invariants:
//! - every map entry corresponds to exactly one linked slot
//! - `len() <= capacity` after every mutating call
//! - a caller serializes all mutating operations (the table wraps each
//!   bucket in a mutex)
//!
//! Eviction releases exactly one entry (the head) per overflowing insert.

use bytes::Bytes;
use hashbrown::HashMap;

use crate::error::{CacheError, Result};

const NIL: u32 = u32::MAX;

struct Slot {
    key: String,
    blob: Bytes,
    prev: u32,
    next: u32,
}

/// A single LRU bucket. Not internally synchronized.
pub struct Bucket {
    slots: Vec<Slot>,
    free: Vec<u32>,
    map: HashMap<String, u32>,
    head: u32,
    tail: u32,
    capacity: usize,
}

impl Bucket {
    /// Create a bucket holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bucket capacity must be non-zero");
        Self {
            slots: Vec::with_capacity(capacity.min(1024)),
            free: Vec::new(),
            map: HashMap::with_capacity(capacity.min(1024)),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up `key`. A hit promotes the entry to most-recently-used and
    /// returns a cheap refcounted handle to the blob.
    pub fn get(&mut self, key: &str) -> Option<Bytes> {
        let idx = *self.map.get(key)?;
        self.touch(idx);
        Some(self.slots[idx as usize].blob.clone())
    }

    /// Look up `key` without promoting it. Used by tests and the backing
    /// store initializer.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<&Bytes> {
        let idx = *self.map.get(key)?;
        Some(&self.slots[idx as usize].blob)
    }

    /// Insert or overwrite `key`. Returns the entry evicted to stay within
    /// capacity, if any.
    pub fn upsert(&mut self, key: &str, blob: Bytes) -> Option<(String, Bytes)> {
        if let Some(&idx) = self.map.get(key) {
            self.slots[idx as usize].blob = blob;
            self.touch(idx);
            return None;
        }

        let idx = self.alloc_slot(key.to_owned(), blob);
        self.link_tail(idx);
        self.map.insert(key.to_owned(), idx);

        if self.map.len() > self.capacity {
            return self.evict_head();
        }
        None
    }

    /// Atomically move the entry at `old_key` to `new_key`, promoting it.
    ///
    /// Fails with [`CacheError::NotFound`] when `old_key` is absent and with
    /// [`CacheError::Conflict`] when both keys are present.
    pub fn rename(&mut self, old_key: &str, new_key: &str) -> Result<Bytes> {
        if old_key == new_key {
            return self.get(old_key).ok_or(CacheError::NotFound);
        }
        if self.map.contains_key(new_key) {
            if self.map.contains_key(old_key) {
                return Err(CacheError::Conflict);
            }
            return Err(CacheError::NotFound);
        }
        let idx = self.map.remove(old_key).ok_or(CacheError::NotFound)?;
        self.slots[idx as usize].key = new_key.to_owned();
        self.map.insert(new_key.to_owned(), idx);
        self.touch(idx);
        Ok(self.slots[idx as usize].blob.clone())
    }

    /// Remove `key`, releasing its buffer. Returns the removed blob.
    pub fn remove(&mut self, key: &str) -> Option<Bytes> {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        let slot = &mut self.slots[idx as usize];
        let blob = std::mem::take(&mut slot.blob);
        slot.key.clear();
        self.free.push(idx);
        Some(blob)
    }

    /// Release every buffer; empty map and list.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.map.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Keys in recency order, least-recently-used first.
    pub fn keys_lru_order(&self) -> impl Iterator<Item = &str> {
        let mut order = Vec::with_capacity(self.map.len());
        let mut cur = self.head;
        while cur != NIL {
            order.push(self.slots[cur as usize].key.as_str());
            cur = self.slots[cur as usize].next;
        }
        order.into_iter()
    }

    fn alloc_slot(&mut self, key: String, blob: Bytes) -> u32 {
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.key = key;
            slot.blob = blob;
            slot.prev = NIL;
            slot.next = NIL;
            idx
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Slot {
                key,
                blob,
                prev: NIL,
                next: NIL,
            });
            idx
        }
    }

    fn evict_head(&mut self) -> Option<(String, Bytes)> {
        let idx = self.head;
        if idx == NIL {
            return None;
        }
        self.unlink(idx);
        let slot = &mut self.slots[idx as usize];
        let key = std::mem::take(&mut slot.key);
        let blob = std::mem::take(&mut slot.blob);
        self.map.remove(&key);
        self.free.push(idx);
        Some((key, blob))
    }

    /// Move `idx` to the tail (most-recently-used) position.
    fn touch(&mut self, idx: u32) {
        if self.tail == idx {
            return;
        }
        self.unlink(idx);
        self.link_tail(idx);
    }

    fn unlink(&mut self, idx: u32) {
        let (prev, next) = {
            let slot = &self.slots[idx as usize];
            (slot.prev, slot.next)
        };
        if prev != NIL {
            self.slots[prev as usize].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slots[next as usize].prev = prev;
        } else {
            self.tail = prev;
        }
        let slot = &mut self.slots[idx as usize];
        slot.prev = NIL;
        slot.next = NIL;
    }

    fn link_tail(&mut self, idx: u32) {
        let old_tail = self.tail;
        let slot = &mut self.slots[idx as usize];
        slot.prev = old_tail;
        slot.next = NIL;
        if old_tail != NIL {
            self.slots[old_tail as usize].next = idx;
        } else {
            self.head = idx;
        }
        self.tail = idx;
    }

    #[cfg(test)]
    fn list_len(&self) -> usize {
        let mut n = 0;
        let mut cur = self.head;
        while cur != NIL {
            n += 1;
            cur = self.slots[cur as usize].next;
        }
        n
    }
}
