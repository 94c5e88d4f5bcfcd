use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, RwLock, RwLockWriteGuard},
};

use crate::error::EngineError;

// Type alias, not a new type, cannot define methods on it
pub type Pod<T> = Arc<RwLock<T>>;

pub type ResultPod<T> = Result<Pod<T>, EngineError>;
pub type EngineResult<T> = Result<T, EngineError>;
pub type SimpleResult = Result<(), EngineError>;

/// A hash map behind a reader/writer lock.
///
/// All accessors take `&self`; multiple threads may look pages up while
/// another inserts a freshly loaded one.
pub struct ConcurrentHashMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> ConcurrentHashMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.read().unwrap().get(key).cloned()
    }

    /// Return the value for `key`, loading it via `f` on a miss.
    ///
    /// The write lock is held across the load so two threads cannot
    /// instantiate the same page twice.
    pub fn get_or_insert<F>(&self, key: &K, f: F) -> Result<V, EngineError>
    where
        F: FnOnce(&K) -> Result<V, EngineError>,
    {
        let mut inner = self.inner.write().unwrap();
        if let Some(v) = inner.get(key) {
            return Ok(v.clone());
        }

        let v = f(key)?;
        inner.insert(key.clone(), v.clone());
        Ok(v)
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.write().unwrap().insert(key, value);
    }

    pub fn remove(&self, key: &K) {
        self.inner.write().unwrap().remove(key);
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.read().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.read().unwrap().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.inner.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn get_inner_wl(&self) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        self.inner.write().unwrap()
    }
}
