//! Concurrent identity -> owned resource map.
//!
//! One `RwLock` guards the map: lookups share, structural changes exclude.
//! Used for live players, engine environments and texture registrations.

use log::trace;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

pub struct ResourceRegistry<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for ResourceRegistry<K, V>
where
    K: Eq + Hash + Copy + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ResourceRegistry<K, V>
where
    K: Eq + Hash + Copy + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert `value` under `key`, returning the entry it replaced.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let previous = self.entries.write().unwrap_or_else(|e| e.into_inner()).insert(key, value);
        if previous.is_some() {
            trace!("ResourceRegistry: replaced entry {:?}", key);
        }
        previous
    }

    /// Run `f` against the entry under the shared lock.
    pub fn with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).get(key).map(f)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).contains_key(key)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).remove(key)
    }

    /// Drop every entry, returning how many there were.
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut *self.entries.write().unwrap_or_else(|e| e.into_inner()));
        let count = drained.len();
        // Values drop here, after the lock is released
        drop(drained);
        count
    }

    /// Remove every entry and hand ownership of each one to `visitor`.
    ///
    /// The map is emptied under the exclusive lock; `visitor` runs after the
    /// lock is released, so per-entry teardown may query this registry.
    pub fn remove_all(&self, mut visitor: impl FnMut(K, V)) -> usize {
        let drained = std::mem::take(&mut *self.entries.write().unwrap_or_else(|e| e.into_inner()));
        let count = drained.len();
        for (key, value) in drained {
            visitor(key, value);
        }
        count
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> ResourceRegistry<K, V>
where
    K: Eq + Hash + Copy + std::fmt::Debug,
    V: Clone,
{
    /// Clone of the entry (cheap for `Arc` values).
    pub fn get(&self, key: &K) -> Option<V> {
        self.with(key, V::clone)
    }

    pub fn values(&self) -> Vec<V> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_insert_get_remove() {
        let registry: ResourceRegistry<i64, Arc<String>> = ResourceRegistry::new();
        assert!(registry.insert(1, Arc::new("a".into())).is_none());
        assert!(registry.insert(1, Arc::new("b".into())).is_some());
        assert_eq!(registry.get(&1).as_deref().map(String::as_str), Some("b"));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&1).is_some());
        assert!(registry.get(&1).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_all_visits_without_lock() {
        let registry = Arc::new(ResourceRegistry::<i64, String>::new());
        for id in 0..5 {
            registry.insert(id, format!("res-{}", id));
        }

        let mut visited = Vec::new();
        let reg = Arc::clone(&registry);
        let count = registry.remove_all(|id, value| {
            // Re-entering the registry must not deadlock
            assert!(!reg.contains(&id));
            reg.len();
            visited.push((id, value));
        });

        assert_eq!(count, 5);
        visited.sort();
        assert_eq!(visited.len(), 5);
        assert_eq!(visited[0], (0, "res-0".to_string()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_lookups() {
        let registry = Arc::new(ResourceRegistry::<u32, u32>::new());
        for i in 0..100 {
            registry.insert(i, i * 2);
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || (0..100).all(|i| registry.get(&i) == Some(i * 2)))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }

    #[test]
    fn test_clear_counts() {
        let registry = ResourceRegistry::<u8, ()>::new();
        registry.insert(1, ());
        registry.insert(2, ());
        assert_eq!(registry.clear(), 2);
        assert_eq!(registry.clear(), 0);
    }
}
