mod keyed_cache;
mod keyed_lock;
mod once;

pub use keyed_cache::KeyedCache;
pub use keyed_lock::{KeyedReadGuard, KeyedRwLock, KeyedWriteGuard};
pub use once::{once, OnceFn, OnceValue};
