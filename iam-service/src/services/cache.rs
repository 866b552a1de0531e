//! Advisory existence caches.
//!
//! Entries are positive facts that never become false again ("this id is
//! registered", "this id is deleted"). They are filled lazily after a store
//! read and are never invalidated. When a set is full an arbitrary entry is
//! evicted, so a miss only means "ask the store".

use std::hash::Hash;

use dashmap::DashMap;

pub const DEFAULT_CACHE_CAPACITY: usize = 65_535;

/// Bounded concurrent set of keys.
pub struct BoundedSet<K: Eq + Hash> {
    entries: DashMap<K, ()>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone> BoundedSet<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&self, key: K) {
        if self.entries.contains_key(&key) {
            return;
        }
        if self.entries.len() >= self.capacity {
            let victim = self.entries.iter().next().map(|entry| entry.key().clone());
            if let Some(victim) = victim {
                self.entries.remove(&victim);
            }
        }
        self.entries.insert(key, ());
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// What the store said about an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceState {
    pub registered: bool,
    pub deleted: bool,
}

impl InstanceState {
    pub fn is_active(&self) -> bool {
        self.registered && !self.deleted
    }
}

/// Registered and deleted id sets for one entity kind.
pub struct InstanceStateCache<K: Eq + Hash> {
    registered: BoundedSet<K>,
    deleted: BoundedSet<K>,
}

impl<K: Eq + Hash + Clone> InstanceStateCache<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            registered: BoundedSet::new(capacity),
            deleted: BoundedSet::new(capacity),
        }
    }

    /// Answers only when both facts are cached, which means the instance is
    /// known to be registered and deleted.
    pub fn get(&self, key: &K) -> Option<InstanceState> {
        (self.registered.contains(key) && self.deleted.contains(key)).then_some(InstanceState {
            registered: true,
            deleted: true,
        })
    }

    #[cfg(test)]
    fn is_registered(&self, key: &K) -> bool {
        self.registered.contains(key)
    }

    /// Records the positive parts of a store answer.
    pub fn record(&self, key: &K, state: InstanceState) {
        if state.registered {
            self.registered.insert(key.clone());
        }
        if state.deleted {
            self.deleted.insert(key.clone());
        }
    }
}

impl<K: Eq + Hash + Clone> Default for InstanceStateCache<K> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_set_evicts_when_full() {
        let set = BoundedSet::new(2);
        set.insert(1);
        set.insert(2);
        set.insert(3);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&3));

        set.insert(3);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_only_positive_facts_are_kept() {
        let cache = InstanceStateCache::new(16);
        cache.record(
            &7u64,
            InstanceState {
                registered: true,
                deleted: false,
            },
        );
        assert!(cache.is_registered(&7));
        assert_eq!(cache.get(&7), None);

        cache.record(
            &7,
            InstanceState {
                registered: true,
                deleted: true,
            },
        );
        let state = cache.get(&7);
        assert_eq!(state.map(|s| s.is_active()), Some(false));

        cache.record(
            &9,
            InstanceState {
                registered: false,
                deleted: false,
            },
        );
        assert!(!cache.is_registered(&9));
    }
}
