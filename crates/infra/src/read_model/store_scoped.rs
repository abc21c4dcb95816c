use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use pantry_core::StoreId;

/// Store-isolated key/value storage for disposable read models.
pub trait StoreScopedStore<K, V>: Send + Sync {
    fn get(&self, store_id: StoreId, key: &K) -> Option<V>;
    fn upsert(&self, store_id: StoreId, key: K, value: V);
    fn list(&self, store_id: StoreId) -> Vec<V>;
    /// Drop every record of one store (rebuild support).
    fn clear_store(&self, store_id: StoreId);
}

impl<K, V, S> StoreScopedStore<K, V> for Arc<S>
where
    S: StoreScopedStore<K, V> + ?Sized,
{
    fn get(&self, store_id: StoreId, key: &K) -> Option<V> {
        (**self).get(store_id, key)
    }

    fn upsert(&self, store_id: StoreId, key: K, value: V) {
        (**self).upsert(store_id, key, value)
    }

    fn list(&self, store_id: StoreId) -> Vec<V> {
        (**self).list(store_id)
    }

    fn clear_store(&self, store_id: StoreId) {
        (**self).clear_store(store_id)
    }
}

#[derive(Debug)]
pub struct InMemoryStoreScoped<K, V> {
    inner: RwLock<HashMap<(StoreId, K), V>>,
}

impl<K, V> InMemoryStoreScoped<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryStoreScoped<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> StoreScopedStore<K, V> for InMemoryStoreScoped<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, store_id: StoreId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(store_id, key.clone())).cloned()
    }

    fn upsert(&self, store_id: StoreId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((store_id, key), value);
        }
    }

    fn list(&self, store_id: StoreId) -> Vec<V> {
        let Ok(map) = self.inner.read() else {
            return vec![];
        };
        map.iter()
            .filter(|((s, _), _)| *s == store_id)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn clear_store(&self, store_id: StoreId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(s, _), _| *s != store_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_do_not_see_each_other() {
        let rm = InMemoryStoreScoped::<u8, &str>::new();
        let (a, b) = (StoreId::new(), StoreId::new());
        rm.upsert(a, 1, "a");
        rm.upsert(b, 1, "b");

        assert_eq!(rm.get(a, &1), Some("a"));
        assert_eq!(rm.list(b), vec!["b"]);

        rm.clear_store(a);
        assert!(rm.list(a).is_empty());
        assert_eq!(rm.get(b, &1), Some("b"));
    }
}
