mod list;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::{Duration, Instant};

use list::{List, Slot};

/// Default byte capacity of a single store.
pub const DEFAULT_CAPACITY: usize = 64 * 1024 * 1024;

/// Anything that can be stored needs to report how many bytes it occupies, which is what the
/// capacity is measured in.
pub trait Sizeable {
    fn byte_len(&self) -> usize;
}

/// A capacity-bounded key-value store with least-recently-used eviction and per-key TTLs.
///
/// The size of an entry is the length of its key plus the byte length of its value. Whenever a
/// write pushes the total over the capacity, entries are evicted from the least recently used end
/// until it fits again. A capacity of zero disables eviction.
///
/// Expiry is lazy: an expired entry is only dropped when a lookup runs into it, and it keeps
/// counting towards [`Store::len`] until then.
///
/// Every operation runs under a single lock, so none of them can be observed half-applied. Reads
/// that touch the recency order (`get`) need the write side; pure size queries share the read
/// side.
pub struct Store<V> {
    state: RwLock<State<V>>,
}

struct State<V> {
    capacity: usize,
    used: usize,
    keys: HashMap<String, Slot>,
    order: List<Entry<V>>,
}

struct Entry<V> {
    key: String,
    value: V,
    expires_at: Option<Instant>,
}

impl<V: Sizeable> Entry<V> {
    fn size(&self) -> usize {
        self.key.len() + self.value.byte_len()
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl<V: Sizeable> Store<V> {
    pub fn new() -> Store<V> {
        Store::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Store<V> {
        let state = State {
            capacity,
            used: 0,
            keys: HashMap::new(),
            order: List::new(),
        };

        Store {
            state: RwLock::new(state),
        }
    }

    /// Returns the value stored under `key`, marking it as most recently used. An expired entry
    /// is dropped and reported as missing.
    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        let mut state = self.write();
        let slot = *state.keys.get(key)?;

        if state.order.get(slot)?.is_expired(Instant::now()) {
            state.unlink(slot);
            return None;
        }

        state.order.move_to_front(slot);
        state.order.get(slot).map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: String, value: V) {
        self.set_with_ttl(key, value, Duration::ZERO)
    }

    /// Stores `value` under `key`. A non-zero `ttl` makes the entry expire that long from now; a
    /// zero `ttl` stores it without expiry, clearing any expiry a previous value had.
    pub fn set_with_ttl(&self, key: String, value: V, ttl: Duration) {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        let mut guard = self.write();
        let state = &mut *guard;

        match state.keys.get(&key).copied() {
            Some(slot) => {
                let new_len = value.byte_len();
                if let Some(entry) = state.order.get_mut(slot) {
                    let old_len = entry.value.byte_len();
                    entry.value = value;
                    entry.expires_at = expires_at;
                    state.used = state.used - old_len + new_len;
                }
                state.order.move_to_front(slot);
            }
            None => {
                let entry = Entry {
                    key: key.clone(),
                    value,
                    expires_at,
                };
                state.used += entry.size();
                let slot = state.order.push_front(entry);
                state.keys.insert(key, slot);
            }
        }

        state.evict();
    }

    /// Drops the entry under `key`, if any. Returns whether a live (unexpired) entry was removed.
    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.write();
        let Some(slot) = state.keys.get(key).copied() else {
            return false;
        };

        state
            .unlink(slot)
            .is_some_and(|entry| !entry.is_expired(Instant::now()))
    }

    /// Makes the live entry under `key` expire `ttl` from now, leaving its recency alone. Returns
    /// whether there was a live entry to update.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut state = self.write();
        let Some(slot) = state.keys.get(key).copied() else {
            return false;
        };

        if state.order.get(slot).map_or(true, |entry| entry.is_expired(now)) {
            state.unlink(slot);
            return false;
        }

        if let Some(entry) = state.order.get_mut(slot) {
            entry.expires_at = Some(now + ttl);
        }
        true
    }

    /// Number of stored entries, including expired ones nobody has looked up yet.
    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.write();
        state.keys.clear();
        state.order.clear();
        state.used = 0;
    }

    /// Bytes currently accounted for, see [`Store`] for how entries are sized.
    pub fn used_bytes(&self) -> usize {
        self.read().used
    }

    pub fn capacity(&self) -> usize {
        self.read().capacity
    }

    // Every critical section leaves the state consistent before it can panic, so a poisoned lock
    // is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, State<V>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State<V>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Sizeable> Default for Store<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Sizeable> State<V> {
    /// Removes an entry from both the recency order and the key index, releasing its bytes.
    fn unlink(&mut self, slot: Slot) -> Option<Entry<V>> {
        let entry = self.order.remove(slot)?;
        self.keys.remove(&entry.key);
        self.used -= entry.size();
        Some(entry)
    }

    fn evict(&mut self) {
        while self.capacity > 0 && self.used > self.capacity {
            let Some(oldest) = self.order.back() else {
                break;
            };
            self.unlink(oldest);
        }
    }
}
