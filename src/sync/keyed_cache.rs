use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use log::trace;
use parking_lot::RwLock;

use super::KeyedRwLock;
use crate::error::Result;

/// A string-keyed memo of fallible computations.
///
/// Each key is computed at most once and the result, success or error, is
/// cached forever. Computations for different keys run in parallel; callers
/// of the same key wait for the single in-flight computation.
///
/// Lock order is always the per-key lock first, then the map lock.
pub struct KeyedCache<V> {
    name: &'static str,
    key_lock: KeyedRwLock,
    values: RwLock<HashMap<String, Result<V>>>,
    calls: AtomicU64,
    cache_hits: AtomicU64,
}

impl<V: Clone> KeyedCache<V> {
    pub fn new(name: &'static str) -> Self {
        KeyedCache {
            name,
            key_lock: KeyedRwLock::new(),
            values: RwLock::new(HashMap::new()),
            calls: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    pub fn get_or_compute<F>(&self, key: &str, compute: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let cached = {
            let _key_guard = self.key_lock.read(key);
            self.values.read().get(key).cloned()
        };
        if let Some(result) = cached {
            self.record(true);
            return result;
        }

        let _key_guard = self.key_lock.write(key);
        if let Some(result) = self.values.read().get(key).cloned() {
            self.record(true);
            return result;
        }
        let result = compute();
        self.values.write().insert(key.to_owned(), result.clone());
        self.record(false);
        result
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    fn record(&self, hit: bool) {
        let calls = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let cache_hits = if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.cache_hits.load(Ordering::Relaxed)
        };
        trace!("{} cache: {} calls, {} hits", self.name, calls, cache_hits);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::error::ModuleError;
    use pretty_assertions::assert_eq;

    #[test]
    fn computes_each_key_once() {
        let cache = KeyedCache::<String>::new("test");
        let computed = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for i in 0..32 {
                let cache = &cache;
                let computed = &computed;
                scope.spawn(move || {
                    let key = format!("key{}", i % 4);
                    let value = cache
                        .get_or_compute(&key, || {
                            computed.fetch_add(1, Ordering::SeqCst);
                            Ok(key.to_uppercase())
                        })
                        .unwrap();
                    assert_eq!(value, key.to_uppercase());
                });
            }
        });
        assert_eq!(computed.load(Ordering::SeqCst), 4);
        assert_eq!(cache.calls(), 32);
        assert_eq!(cache.cache_hits(), 28);
    }

    #[test]
    fn errors_are_cached() {
        let cache = KeyedCache::<String>::new("test");
        let computed = AtomicUsize::new(0);
        for _ in 0..2 {
            let result = cache.get_or_compute("missing", || {
                computed.fetch_add(1, Ordering::SeqCst);
                Err(ModuleError::FileNotFound {
                    path: "missing".to_string(),
                })
            });
            assert!(result.unwrap_err().is_not_found());
        }
        assert_eq!(computed.load(Ordering::SeqCst), 1);
    }
}
