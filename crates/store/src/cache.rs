//! Read-mostly snapshot cache shared across reconcilers.

use std::sync::Arc;

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;

/// Lock-free reads; concurrent inserts are last-write-wins per key.
pub struct SnapshotCache<V> {
    snap: ArcSwap<FxHashMap<String, Arc<V>>>,
}

impl<V> Default for SnapshotCache<V> {
    fn default() -> Self {
        Self { snap: ArcSwap::from_pointee(FxHashMap::default()) }
    }
}

impl<V> SnapshotCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.snap.load().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.snap.rcu(|cur| {
            let mut next = FxHashMap::clone(cur);
            next.insert(key.to_string(), Arc::clone(&value));
            next
        });
        value
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn evict_prefix(&self, prefix: &str) {
        self.snap.rcu(|cur| {
            let mut next = FxHashMap::clone(cur);
            next.retain(|k, _| !k.starts_with(prefix));
            next
        });
    }

    pub fn len(&self) -> usize {
        self.snap.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_evict() {
        let c: SnapshotCache<u32> = SnapshotCache::new();
        c.insert("a@1", 1);
        c.insert("a@2", 2);
        c.insert("b@1", 3);
        assert_eq!(c.get("a@2").as_deref(), Some(&2));
        c.evict_prefix("a@");
        assert!(c.get("a@1").is_none());
        assert_eq!(c.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_population_keeps_every_key() {
        let c = Arc::new(SnapshotCache::<usize>::new());
        let mut tasks = Vec::new();
        for i in 0..32usize {
            let c = Arc::clone(&c);
            tasks.push(tokio::spawn(async move {
                c.insert(&format!("k{}", i), i);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(c.len(), 32);
    }
}
