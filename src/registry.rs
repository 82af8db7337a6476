//! End-of-process safety net for caches that were never closed.

use std::{
    hash::Hash,
    sync::{Arc, Mutex, Weak},
};

use serde::Serialize;
use tracing::warn;

use crate::persist::PersistentCache;

/// A caller-owned registry of shared caches to flush at shutdown.
///
/// Holds weak references, so registering a cache does not keep it alive:
/// instances that were dropped (and thereby saved themselves) are simply
/// skipped. Wire [`flush_all`](Self::flush_all) into the application's
/// shutdown path to make sure forgotten caches still reach disk, and rely
/// on explicit [`close`](PersistentCache::close) calls for the normal
/// path.
///
/// # Examples
///
/// ```no_run
/// use std::sync::{Arc, Mutex};
///
/// use lru_stash::{FlushRegistry, PersistentCache};
///
/// let mut registry = FlushRegistry::new();
///
/// let cache: PersistentCache<String, u64> = PersistentCache::open("app.cache")?;
/// let cache = Arc::new(Mutex::new(cache));
/// registry.register(&cache);
///
/// // ... at the end of main:
/// registry.flush_all();
/// # Ok::<(), lru_stash::Error>(())
/// ```
pub struct FlushRegistry<K: Hash + Eq + Serialize, V: Serialize> {
    caches: Vec<Weak<Mutex<PersistentCache<K, V>>>>,
}

impl<K: Hash + Eq + Serialize, V: Serialize> Default for FlushRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Serialize, V: Serialize> FlushRegistry<K, V> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { caches: Vec::new() }
    }

    /// Tracks a shared cache without taking ownership of it.
    pub fn register(&mut self, cache: &Arc<Mutex<PersistentCache<K, V>>>) {
        self.caches.push(Arc::downgrade(cache));
    }

    /// Number of registered handles, dead or alive.
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// True if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Closes every registered cache that is still alive and open,
    /// returning how many needed closing.
    ///
    /// Failures are logged, not propagated — this runs on shutdown paths
    /// where there is nobody left to handle an error. The registry is
    /// drained; registrations do not survive a flush.
    pub fn flush_all(&mut self) -> usize {
        let mut flushed = 0;
        for weak in self.caches.drain(..) {
            let Some(shared) = weak.upgrade() else {
                continue;
            };
            let mut cache = match shared.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if cache.is_closed() {
                continue;
            }
            flushed += 1;
            if let Err(error) = cache.close() {
                warn!(path = %cache.path().display(), %error, "failed to close cache at shutdown");
            }
        }
        if flushed > 0 {
            warn!(flushed, "closed caches left open at shutdown");
        }
        flushed
    }
}
