use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{
    lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard},
    RawRwLock, RwLock,
};

/// A reader/writer lock scoped per string key.
///
/// Operations on the same key serialize, different keys never contend. Each
/// key maps to a reference-counted lock that is created on first use and
/// dropped from the map once its last guard is released.
#[derive(Default)]
pub struct KeyedRwLock {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

pub struct KeyedReadGuard<'a> {
    owner: &'a KeyedRwLock,
    key: String,
    guard: Option<ArcRwLockReadGuard<RawRwLock, ()>>,
}

pub struct KeyedWriteGuard<'a> {
    owner: &'a KeyedRwLock,
    key: String,
    guard: Option<ArcRwLockWriteGuard<RawRwLock, ()>>,
}

impl KeyedRwLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, key: &str) -> KeyedReadGuard<'_> {
        let lock = self.acquire(key);
        KeyedReadGuard {
            owner: self,
            key: key.to_owned(),
            guard: Some(lock.read_arc()),
        }
    }

    pub fn write(&self, key: &str) -> KeyedWriteGuard<'_> {
        let lock = self.acquire(key);
        KeyedWriteGuard {
            owner: self,
            key: key.to_owned(),
            guard: Some(lock.write_arc()),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    // The shard lock is released at the end of the statement, before the
    // caller blocks on the per-key lock.
    fn acquire(&self, key: &str) -> Arc<RwLock<()>> {
        self.locks.entry(key.to_owned()).or_default().value().clone()
    }

    fn release(&self, key: &str) {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl Drop for KeyedReadGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.owner.release(&self.key);
    }
}

impl Drop for KeyedWriteGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.owner.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            mpsc, Barrier,
        },
        time::Duration,
    };

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn same_key_serializes_writers() {
        let lock = KeyedRwLock::new();
        let inside = AtomicBool::new(false);
        let entered = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let _guard = lock.write("pkg");
                    assert!(!inside.swap(true, Ordering::SeqCst));
                    std::thread::sleep(Duration::from_millis(2));
                    inside.store(false, Ordering::SeqCst);
                    entered.fetch_add(1, Ordering::SeqCst);
                });
            }
        });
        assert_eq!(entered.load(Ordering::SeqCst), 8);
        assert!(lock.is_empty());
    }

    #[test]
    fn different_keys_do_not_block() {
        let lock = KeyedRwLock::new();
        let _held = lock.write("a");
        let (sender, receiver) = mpsc::channel();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let _other = lock.write("b");
                sender.send(()).unwrap();
            });
            receiver
                .recv_timeout(Duration::from_secs(5))
                .expect("lock on an unrelated key was blocked");
        });
        assert_eq!(lock.len(), 1);
    }

    #[test]
    fn readers_share_a_key() {
        let lock = KeyedRwLock::new();
        let barrier = Barrier::new(4);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let _guard = lock.read("pkg");
                    // all four readers must hold the key at the same time to pass
                    barrier.wait();
                });
            }
        });
        assert!(lock.is_empty());
    }
}
