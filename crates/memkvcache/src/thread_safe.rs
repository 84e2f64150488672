//! Mutex-guarded wrapper around [`SimpleLru`]

use parking_lot::Mutex;

use crate::lru::SimpleLru;
use crate::stats::StatsSnapshot;
use crate::Storage;

/// A [`SimpleLru`] behind one lock held for the whole of every call
pub struct ThreadSafeLru {
    inner: Mutex<SimpleLru>,
}

impl ThreadSafeLru {
    /// Create a cache with a budget of `max_bytes`
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(SimpleLru::new(max_bytes)),
        }
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        self.inner.lock().check_invariants();
    }
}

impl Storage for ThreadSafeLru {
    fn put(&self, key: &[u8], value: &[u8]) -> bool {
        self.inner.lock().put(key, value)
    }

    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> bool {
        self.inner.lock().put_if_absent(key, value)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> bool {
        self.inner.lock().set(key, value)
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.inner.lock().delete(key)
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.lock().get(key)
    }

    fn clear(&self) {
        self.inner.lock().clear();
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }

    fn used_bytes(&self) -> usize {
        self.inner.lock().used_bytes()
    }

    fn max_bytes(&self) -> usize {
        self.inner.lock().max_bytes()
    }

    fn stats(&self) -> StatsSnapshot {
        self.inner.lock().stats().snapshot()
    }
}
