//! Byte-budgeted LRU cache for a single shard
//!
//! Nodes live in an arena addressed by index, linked into a doubly-linked
//! recency list. Head is most recently used, tail is the next eviction victim.

use ahash::RandomState;
use std::collections::HashMap;
use tracing::debug;

use crate::stats::CacheStats;

/// Node in the LRU doubly-linked list
struct Node {
    key: Vec<u8>,
    value: Vec<u8>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Node {
    fn footprint(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// LRU cache bounded by the total byte length of its keys and values.
///
/// Not synchronized; wrap it in [`ThreadSafeLru`](crate::ThreadSafeLru) to share it.
pub struct SimpleLru {
    map: HashMap<Vec<u8>, usize, RandomState>,
    nodes: Vec<Option<Node>>,
    head: Option<usize>,
    tail: Option<usize>,
    free_list: Vec<usize>,
    max_bytes: usize,
    used_bytes: usize,
    stats: CacheStats,
}

impl SimpleLru {
    /// Create an empty cache holding at most `max_bytes` of keys plus values
    pub fn new(max_bytes: usize) -> Self {
        Self {
            map: HashMap::with_hasher(RandomState::new()),
            nodes: Vec::new(),
            head: None,
            tail: None,
            free_list: Vec::new(),
            max_bytes,
            used_bytes: 0,
            stats: CacheStats::new(),
        }
    }

    /// Insert or overwrite `key`.
    ///
    /// Returns `false` without touching the cache if `key.len() + value.len()`
    /// exceeds the byte budget.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> bool {
        match self.map.get(key) {
            Some(&idx) => self.update(idx, value),
            None => self.insert(key, value),
        }
    }

    /// Insert `key` only if it is absent.
    pub fn put_if_absent(&mut self, key: &[u8], value: &[u8]) -> bool {
        if self.map.contains_key(key) {
            self.stats.record_rejection();
            return false;
        }
        self.insert(key, value)
    }

    /// Overwrite `key` only if it is present.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> bool {
        match self.map.get(key) {
            Some(&idx) => self.update(idx, value),
            None => {
                self.stats.record_rejection();
                false
            }
        }
    }

    /// Remove `key`, returning whether it was present
    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self.map.get(key) {
            Some(&idx) => {
                self.remove_node(idx);
                self.stats.record_delete();
                true
            }
            None => false,
        }
    }

    /// Copy out the value of `key`, promoting it to most recently used
    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let Some(&idx) = self.map.get(key) else {
            self.stats.record_miss();
            return None;
        };

        self.move_to_front(idx);
        self.stats.record_hit();
        self.nodes[idx].as_ref().map(|node| node.value.clone())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Bytes currently charged against the budget
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// The byte budget fixed at construction
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Counters for this cache
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Drop every entry. The arena keeps its allocation.
    pub fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free_list.clear();
        self.head = None;
        self.tail = None;
        self.used_bytes = 0;
    }

    /// Keys from most to least recently used
    pub fn keys_by_recency(&self) -> Vec<Vec<u8>> {
        let mut keys = Vec::with_capacity(self.map.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            match &self.nodes[idx] {
                Some(node) => {
                    keys.push(node.key.clone());
                    cursor = node.next;
                }
                None => break,
            }
        }
        keys
    }

    fn insert(&mut self, key: &[u8], value: &[u8]) -> bool {
        let footprint = key.len() + value.len();
        if footprint > self.max_bytes {
            self.stats.record_rejection();
            return false;
        }

        self.evict_for(footprint, None);

        let idx = self.alloc_node();
        self.nodes[idx] = Some(Node {
            key: key.to_vec(),
            value: value.to_vec(),
            prev: None,
            next: None,
        });
        self.attach_front(idx);
        self.map.insert(key.to_vec(), idx);
        self.used_bytes += footprint;
        self.stats.record_insert();
        true
    }

    fn update(&mut self, idx: usize, value: &[u8]) -> bool {
        let (key_len, old_len) = match &self.nodes[idx] {
            Some(node) => (node.key.len(), node.value.len()),
            None => return false,
        };
        if key_len + value.len() > self.max_bytes {
            self.stats.record_rejection();
            return false;
        }

        // The node must sit at the head before evicting so it is never its own victim.
        self.move_to_front(idx);
        if value.len() > old_len {
            self.evict_for(value.len() - old_len, Some(idx));
        }

        self.used_bytes = self.used_bytes - old_len + value.len();
        if let Some(node) = &mut self.nodes[idx] {
            node.value.clear();
            node.value.extend_from_slice(value);
        }
        self.stats.record_update();
        true
    }

    /// Evict from the tail until `incoming` more bytes fit.
    fn evict_for(&mut self, incoming: usize, protected: Option<usize>) {
        let mut evicted = 0usize;
        while self.used_bytes + incoming > self.max_bytes {
            match self.tail {
                Some(tail_idx) if Some(tail_idx) != protected => {
                    self.remove_node(tail_idx);
                    self.stats.record_eviction();
                    evicted += 1;
                }
                _ => break,
            }
        }
        if evicted > 0 {
            debug!(evicted, used_bytes = self.used_bytes, "evicted lru entries");
        }
    }

    fn remove_node(&mut self, idx: usize) -> Option<Node> {
        self.unlink(idx);
        let node = self.nodes[idx].take()?;
        self.map.remove(&node.key);
        self.free_node(idx);
        self.used_bytes -= node.footprint();
        Some(node)
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return; // Already at front
        }

        self.unlink(idx);
        self.attach_front(idx);
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = old_head;
        }

        if let Some(head_idx) = old_head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = if let Some(node) = &self.nodes[idx] {
            (node.prev, node.next)
        } else {
            return;
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = next;
                }
            }
            None => {
                self.head = next;
            }
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.nodes[next_idx] {
                    next_node.prev = prev;
                }
            }
            None => {
                self.tail = prev;
            }
        }

        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = None;
        }
    }

    fn alloc_node(&mut self) -> usize {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(None);
            idx
        }
    }

    fn free_node(&mut self, idx: usize) {
        self.free_list.push(idx);
    }

    /// Panics if links, index and byte accounting disagree.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut seen = 0usize;
        let mut bytes = 0usize;
        let mut prev: Option<usize> = None;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = self.nodes[idx].as_ref().expect("linked slot is empty");
            assert_eq!(node.prev, prev, "back link mismatch at slot {}", idx);
            assert_eq!(self.map.get(&node.key), Some(&idx), "index disagrees with list");
            seen += 1;
            bytes += node.footprint();
            prev = Some(idx);
            cursor = node.next;
        }
        assert_eq!(self.tail, prev, "tail is not the last linked node");
        assert_eq!(seen, self.map.len(), "list and index sizes differ");
        assert_eq!(bytes, self.used_bytes, "used_bytes drifted");
        assert!(self.used_bytes <= self.max_bytes, "budget exceeded");
        let live = self.nodes.iter().filter(|slot| slot.is_some()).count();
        assert_eq!(live + self.free_list.len(), self.nodes.len(), "leaked arena slot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(cache: &SimpleLru) -> Vec<String> {
        cache
            .keys_by_recency()
            .into_iter()
            .map(|k| String::from_utf8(k).unwrap())
            .collect()
    }

    #[test]
    fn test_lru_basic() {
        let mut cache = SimpleLru::new(64);

        assert!(cache.put(b"a", b"1"));
        assert!(cache.put(b"b", b"2"));

        assert_eq!(cache.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(cache.get(b"b"), Some(b"2".to_vec()));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.used_bytes(), 4);
        cache.check_invariants();
    }

    #[test]
    fn test_lru_eviction_oldest_first() {
        let mut cache = SimpleLru::new(1024);
        // 6-byte key + 10-byte value = 16 bytes, 64 fit
        for i in 0..70 {
            let key = format!("key{:03}", i);
            assert!(cache.put(key.as_bytes(), b"1234567890"));
        }

        assert_eq!(cache.len(), 64);
        assert_eq!(cache.used_bytes(), 1024);
        for i in 0..6 {
            assert_eq!(cache.get(format!("key{:03}", i).as_bytes()), None);
        }
        for i in 6..70 {
            assert!(cache.get(format!("key{:03}", i).as_bytes()).is_some());
        }
        cache.check_invariants();
    }

    #[test]
    fn test_get_promotes() {
        let mut cache = SimpleLru::new(6);

        cache.put(b"a", b"1");
        cache.put(b"b", b"2");
        cache.put(b"c", b"3");
        cache.get(b"a"); // Move a to front
        cache.put(b"d", b"4"); // Should evict b

        assert_eq!(keys(&cache), vec!["d", "a", "c"]);
        assert_eq!(cache.get(b"b"), None);
        cache.check_invariants();
    }

    #[test]
    fn test_insert_evicts_minimum() {
        let mut cache = SimpleLru::new(10);

        cache.put(b"a", b"1111"); // 5
        cache.put(b"b", b"22"); // 3
        cache.put(b"c", b"3"); // 2

        // needs 4 bytes, only evicting a frees enough
        assert!(cache.put(b"d", b"444"));
        assert_eq!(keys(&cache), vec!["d", "c", "b"]);
        assert_eq!(cache.used_bytes(), 9);
        assert_eq!(cache.stats().snapshot().evictions, 1);
        cache.check_invariants();
    }

    #[test]
    fn test_update_grow_protects_itself() {
        let mut cache = SimpleLru::new(10);

        cache.put(b"a", b"11"); // 3, tail
        cache.put(b"b", b"22"); // 3
        cache.put(b"c", b"33"); // 3

        // a grows to 8 bytes; b and c must go, a survives although it was the tail
        assert!(cache.put(b"a", b"1111111"));
        assert_eq!(keys(&cache), vec!["a"]);
        assert_eq!(cache.used_bytes(), 8);
        cache.check_invariants();
    }

    #[test]
    fn test_update_shrink_keeps_others() {
        let mut cache = SimpleLru::new(10);

        cache.put(b"a", b"11111");
        cache.put(b"b", b"22");
        assert!(cache.set(b"a", b"1"));

        assert_eq!(cache.used_bytes(), 5);
        assert_eq!(keys(&cache), vec!["a", "b"]);
        assert_eq!(cache.get(b"a"), Some(b"1".to_vec()));
        cache.check_invariants();
    }

    #[test]
    fn test_too_large_is_noop() {
        let mut cache = SimpleLru::new(8);

        cache.put(b"a", b"1");
        cache.put(b"b", b"2");
        assert!(!cache.put(b"big", b"123456"));
        assert!(!cache.put(b"a", b"12345678"));

        assert_eq!(keys(&cache), vec!["b", "a"]);
        assert_eq!(cache.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(cache.used_bytes(), 4);
        cache.check_invariants();
    }

    #[test]
    fn test_exact_fit() {
        let mut cache = SimpleLru::new(8);
        assert!(cache.put(b"kkkk", b"vvvv"));
        assert_eq!(cache.used_bytes(), 8);
    }

    #[test]
    fn test_put_if_absent_and_set() {
        let mut cache = SimpleLru::new(64);

        assert!(!cache.set(b"a", b"1"));
        assert!(cache.is_empty());

        assert!(cache.put_if_absent(b"a", b"1"));
        assert!(!cache.put_if_absent(b"a", b"2"));
        assert_eq!(cache.get(b"a"), Some(b"1".to_vec()));

        assert!(cache.set(b"a", b"3"));
        assert_eq!(cache.get(b"a"), Some(b"3".to_vec()));
        assert_eq!(cache.stats().snapshot().rejections, 2);
    }

    #[test]
    fn test_set_promotes() {
        let mut cache = SimpleLru::new(64);

        cache.put(b"a", b"1");
        cache.put(b"b", b"2");
        cache.set(b"a", b"9");

        assert_eq!(keys(&cache), vec!["a", "b"]);
    }

    #[test]
    fn test_delete_idempotent() {
        let mut cache = SimpleLru::new(64);

        cache.put(b"a", b"1");
        cache.put(b"b", b"2");
        assert!(cache.delete(b"a"));
        assert!(!cache.delete(b"a"));
        assert!(!cache.delete(b"a"));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used_bytes(), 2);
        cache.check_invariants();
    }

    #[test]
    fn test_delete_sole_node() {
        let mut cache = SimpleLru::new(64);

        cache.put(b"only", b"1");
        assert!(cache.delete(b"only"));
        assert!(cache.is_empty());
        assert_eq!(cache.used_bytes(), 0);
        cache.check_invariants();

        assert!(cache.put(b"again", b"2"));
        cache.check_invariants();
    }

    #[test]
    fn test_delete_middle_and_tail() {
        let mut cache = SimpleLru::new(64);

        cache.put(b"a", b"1");
        cache.put(b"b", b"2");
        cache.put(b"c", b"3");
        cache.delete(b"b");
        assert_eq!(keys(&cache), vec!["c", "a"]);
        cache.delete(b"a");
        assert_eq!(keys(&cache), vec!["c"]);
        cache.check_invariants();
    }

    #[test]
    fn test_arena_slot_reuse() {
        let mut cache = SimpleLru::new(64);

        cache.put(b"a", b"1");
        cache.put(b"b", b"2");
        cache.delete(b"a");
        cache.put(b"c", b"3");

        assert_eq!(cache.nodes.len(), 2);
        cache.check_invariants();
    }

    #[test]
    fn test_clear() {
        let mut cache = SimpleLru::new(64);

        cache.put(b"a", b"1");
        cache.put(b"b", b"2");
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.used_bytes(), 0);
        assert_eq!(cache.get(b"a"), None);
        cache.check_invariants();
    }
}
