//! Bounded LRU cache of encoded log records.
//!
//! The cache holds records in their wire encoding. Eviction recovers the
//! victim's ID from the first 8 bytes of the cached value, so every value
//! must start with its own big-endian ID exactly as [`crate::Log`] encodes it.

use std::collections::HashMap;

const NIL: usize = usize::MAX;

const DEFAULT_CAPABILITY: usize = 1024 * 1024;
const DEFAULT_MAX_NUM: usize = 16;

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    prev: usize,
    next: usize,
}

/// LRU cache bounded by total byte size and by item count at the same time.
#[derive(Debug)]
pub struct LogLruCache {
    nodes: Vec<Node>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    items: HashMap<u64, usize>,
    size: usize,
    capability: usize,
    max_num: usize,
}

fn id_prefix(data: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = data.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

impl LogLruCache {
    /// Creates a cache holding at most `capability` bytes and `max_num` items.
    ///
    /// Zero bounds fall back to 1 MiB and 16 items.
    #[must_use]
    pub fn new(capability: usize, max_num: usize) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            items: HashMap::new(),
            size: 0,
            capability: if capability == 0 {
                DEFAULT_CAPABILITY
            } else {
                capability
            },
            max_num: if max_num == 0 { DEFAULT_MAX_NUM } else { max_num },
        }
    }

    /// Caches the encoded record `data` under `id` as most recently used.
    ///
    /// Values that do not begin with `id` are ignored, since eviction could
    /// not find their map entry again.
    pub fn set(&mut self, id: u64, data: Vec<u8>) {
        if id_prefix(&data) != Some(id) {
            return;
        }

        if let Some(&idx) = self.items.get(&id) {
            self.unlink(idx);
            self.push_front(idx);
            let old = std::mem::replace(&mut self.nodes[idx].data, data);
            self.size = self.size + self.nodes[idx].data.len() - old.len();
        } else {
            self.size += data.len();
            let idx = self.alloc(data);
            self.push_front(idx);
            self.items.insert(id, idx);
        }

        while self.size > self.capability || self.items.len() > self.max_num {
            if !self.evict_back() {
                break;
            }
        }
    }

    /// Returns the cached bytes for `id` and marks them most recently used.
    pub fn get(&mut self, id: u64) -> Option<&[u8]> {
        let idx = *self.items.get(&id)?;
        self.unlink(idx);
        self.push_front(idx);
        Some(self.nodes[idx].data.as_slice())
    }

    /// Removes `id` if cached.
    pub fn delete(&mut self, id: u64) {
        if let Some(idx) = self.items.remove(&id) {
            self.unlink(idx);
            let data = self.release(idx);
            self.size = self.size.saturating_sub(data.len());
        }
    }

    /// Number of cached records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total cached bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Drops everything by replacing the backing structures.
    pub fn reset(&mut self) {
        self.nodes = Vec::new();
        self.free = Vec::new();
        self.items = HashMap::new();
        self.head = NIL;
        self.tail = NIL;
        self.size = 0;
    }

    fn evict_back(&mut self) -> bool {
        let idx = self.tail;
        if idx == NIL {
            return false;
        }

        self.unlink(idx);
        let data = self.release(idx);
        if let Some(id) = id_prefix(&data) {
            self.items.remove(&id);
        }
        self.size = self.size.saturating_sub(data.len());
        true
    }

    fn alloc(&mut self, data: Vec<u8>) -> usize {
        let node = Node {
            data,
            prev: NIL,
            next: NIL,
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) -> Vec<u8> {
        self.free.push(idx);
        std::mem::take(&mut self.nodes[idx].data)
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);

        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev].next = next;
        }

        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }

        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }
}
