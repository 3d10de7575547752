use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::error::{ModuleError, Result};

/// A cell holding the result of a computation that runs at most once.
///
/// Concurrent first callers block until the single computation finishes and
/// then all observe the same value or the same error. Errors are cached like
/// values and are never retried.
pub struct OnceValue<T> {
    cell: OnceCell<Result<T>>,
}

impl<T: Clone> OnceValue<T> {
    pub const fn new() -> Self {
        OnceValue {
            cell: OnceCell::new(),
        }
    }

    pub fn get_or_compute<F>(&self, compute: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.cell.get_or_init(compute).clone()
    }

    /// The cached result, if the computation already completed.
    pub fn get(&self) -> Option<Result<T>> {
        self.cell.get().cloned()
    }
}

impl<T: Clone> Default for OnceValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

type Thunk<T> = Box<dyn FnOnce() -> Result<T> + Send>;

/// A thunk that is evaluated at most once, on first call.
///
/// Used for inputs that are expensive to produce and may never be needed:
/// a module's bucket, original configuration file data, the dependency keys
/// of a remote module, the digest behind a `ModuleKey`.
pub struct OnceFn<T> {
    compute: Mutex<Option<Thunk<T>>>,
    value: OnceValue<T>,
}

impl<T: Clone> OnceFn<T> {
    pub fn new<F>(compute: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        OnceFn {
            compute: Mutex::new(Some(Box::new(compute))),
            value: OnceValue::new(),
        }
    }

    /// A function that is already evaluated.
    pub fn ready(value: T) -> Self {
        let once = OnceFn {
            compute: Mutex::new(None),
            value: OnceValue::new(),
        };
        let _ = once.value.get_or_compute(|| Ok(value));
        once
    }

    pub fn call(&self) -> Result<T> {
        self.value.get_or_compute(|| match self.compute.lock().take() {
            Some(compute) => compute(),
            None => Err(ModuleError::internal("once function evaluated twice")),
        })
    }
}

/// Wraps `compute` so it runs at most once no matter how many callers.
pub fn once<T, F>(compute: F) -> OnceFn<T>
where
    T: Clone,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    OnceFn::new(compute)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    };

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn computes_once_under_contention() {
        let calls = Arc::new(AtomicUsize::new(0));
        let value = Arc::new(OnceValue::<u64>::new());
        let barrier = Arc::new(Barrier::new(16));

        let handles = (0..16)
            .map(|_| {
                let calls = calls.clone();
                let value = value.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    value
                        .get_or_compute(|| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(42)
                        })
                        .unwrap()
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn caches_errors() {
        let calls = AtomicUsize::new(0);
        let value = OnceValue::<u64>::new();
        for _ in 0..3 {
            let result = value.get_or_compute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ModuleError::FileNotFound {
                    path: "a.proto".to_string(),
                })
            });
            assert!(matches!(result, Err(ModuleError::FileNotFound { .. })));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn once_fn_runs_thunk_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let thunk = once(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok("value".to_string())
        });
        assert_eq!(thunk.call().unwrap(), "value");
        assert_eq!(thunk.call().unwrap(), "value");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ready_once_fn() {
        let thunk = OnceFn::ready(7_u32);
        assert_eq!(thunk.call().unwrap(), 7);
    }
}
