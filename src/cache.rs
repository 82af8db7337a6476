//! The eviction controller: occupancy budgets, dirty tracking, and the
//! two-threshold trim algorithm over the ordered store.

use std::hash::Hash;

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    bytes::{format_bytesize, DEFAULT_MAX_BYTESIZE, DEFAULT_MAX_ITEMS},
    error::{Error, Result},
    map::LruMap,
};

/// Occupancy budgets for an [`LruCache`].
///
/// `max_bytesize` bounds the cost of serializing the *entire* store as one
/// unit, not a sum of per-entry sizes. The defaults are effectively
/// unbounded items and a 10 MiB byte budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of entries kept after a trim.
    pub max_items: usize,
    /// Maximum whole-store serialized size, in bytes, kept after a trim.
    pub max_bytesize: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            max_bytesize: DEFAULT_MAX_BYTESIZE,
        }
    }
}

/// A size-bounded LRU cache.
///
/// Wraps an [`LruMap`] with two eviction budgets — an entry count and a
/// whole-store serialized-size budget — plus the bookkeeping that makes
/// trimming and saving lazy:
///
/// - `dirty` is set by any logical content change (insert, effective
///   remove, clear, a `get_or_load` miss, an eviction). Reads promote
///   recency but do not mark the cache dirty, so a read-only session never
///   triggers a rewrite of a backing file.
/// - `needs_trim` is set by anything that can grow the cache, and cleared
///   by [`trim`](Self::trim). A cache that has only been read from or
///   shrunk since the last trim is not re-trimmed.
///
/// The cache itself is purely in-memory; [`PersistentCache`] layers a
/// backing file on top.
///
/// [`PersistentCache`]: crate::PersistentCache
///
/// # Examples
///
/// ```
/// use lru_stash::{Limits, LruCache};
///
/// let mut cache = LruCache::with_limits(Limits {
///     max_items: 2,
///     ..Limits::default()
/// });
/// cache.insert(1, "one");
/// cache.insert(2, "two");
/// cache.insert(3, "three");
///
/// // Key 1 is least recently used, so it goes first.
/// assert_eq!(cache.trim().unwrap(), 1);
/// assert!(!cache.contains_key(&1));
/// assert_eq!(cache.len(), 2);
/// ```
pub struct LruCache<K, V> {
    map: LruMap<K, V>,
    limits: Limits,
    dirty: bool,
    needs_trim: bool,
}

impl<K, V> Default for LruCache<K, V> {
    fn default() -> Self {
        Self::with_limits(Limits::default())
    }
}

impl<K, V> LruCache<K, V> {
    /// Creates an empty cache with default [`Limits`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty cache with the given budgets.
    pub fn with_limits(limits: Limits) -> Self {
        Self {
            map: LruMap::new(),
            limits,
            dirty: false,
            needs_trim: true,
        }
    }

    /// The configured budgets.
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Returns the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the cache contains no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// True if the contents have changed since the cache was last saved,
    /// loaded, or created.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// True if a write has happened since the last completed trim.
    pub fn needs_trim(&self) -> bool {
        self.needs_trim
    }

    /// Iterates over entries in recency order, least recently used first,
    /// without promoting anything.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter()
    }

    /// Iterates over keys, least recently used first.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }

    /// Iterates over values, least recently used first.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.map.values()
    }

    /// Returns the next eviction candidate without touching the order.
    pub fn tail(&self) -> Option<(&K, &V)> {
        self.map.tail()
    }

    /// Empties the cache. An empty store trivially satisfies both budgets,
    /// so the pending-trim flag is reset rather than set.
    pub fn clear(&mut self) {
        debug!("clear");
        self.dirty = true;
        self.needs_trim = false;
        self.map.clear();
    }

    pub(crate) fn map(&self) -> &LruMap<K, V> {
        &self.map
    }

    /// Installs freshly loaded contents; they are in sync with the backing
    /// file by definition, but may exceed the configured budgets.
    pub(crate) fn replace_map(&mut self, map: LruMap<K, V>) {
        self.map = map;
        self.dirty = false;
        self.needs_trim = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl<K: Hash + Eq, V> LruCache<K, V> {
    /// Returns the value for `key`, promoting it to most recently used.
    ///
    /// Promotion only reorders; it does not mark the cache dirty.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        match self.map.get(key) {
            Some(value) => {
                debug!("hit");
                Some(value)
            }
            None => {
                debug!("miss");
                None
            }
        }
    }

    /// Like [`get`](Self::get), but returns a mutable reference. The value
    /// is assumed to be modified through it, so this marks the cache dirty
    /// and needing a trim.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let value = self.map.get_mut(key)?;
        self.dirty = true;
        self.needs_trim = true;
        Some(value)
    }

    /// Returns the value for `key` without touching the recency order.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.map.peek(key)
    }

    /// Returns true if the cache contains `key`. No side effects.
    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Inserts or overwrites `key`, promoting it to most recently used.
    /// Returns the previous value on overwrite. Marks the cache dirty and
    /// needing a trim.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        debug!("insert");
        self.dirty = true;
        self.needs_trim = true;
        self.map.insert(key, value)
    }

    /// Removes `key`, returning its value. Removing an absent key is an
    /// idempotent no-op that leaves the dirty flag alone. Removal cannot
    /// grow the cache, so it never sets the pending-trim flag.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.map.remove(key);
        if removed.is_some() {
            debug!("remove");
            self.dirty = true;
        }
        removed
    }

    /// Removes and returns the least-recently-used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let popped = self.map.pop_lru();
        if popped.is_some() {
            self.dirty = true;
        }
        popped
    }

    /// Returns the value for `key`, or invokes `load` exactly once, stores
    /// the result, and returns it.
    ///
    /// A hit promotes the entry like [`get`](Self::get); a miss stores the
    /// loaded value verbatim and marks the cache dirty and needing a trim.
    ///
    /// # Examples
    ///
    /// ```
    /// use lru_stash::LruCache;
    ///
    /// let mut cache = LruCache::new();
    /// let mut computed = 0;
    ///
    /// for _ in 0..3 {
    ///     let value = cache.get_or_load("answer", || {
    ///         computed += 1;
    ///         42
    ///     });
    ///     assert_eq!(*value, 42);
    /// }
    /// assert_eq!(computed, 1);
    /// ```
    pub fn get_or_load(&mut self, key: K, load: impl FnOnce() -> V) -> &V {
        let mut loaded = false;
        let value = self.map.get_or_insert_with(key, |_| {
            loaded = true;
            load()
        });
        if loaded {
            debug!("miss, loaded value");
            self.dirty = true;
            self.needs_trim = true;
        } else {
            debug!("hit");
        }
        value
    }
}

impl<K: Hash + Eq + Serialize, V: Serialize> LruCache<K, V> {
    /// Returns the cost, in bytes, of serializing the entire store as a
    /// single unit.
    ///
    /// This is the budget metric [`trim`](Self::trim) enforces. It is
    /// computed against an in-memory encoding, never the filesystem, so it
    /// is cheap enough to recompute inside the trim loop. Equal contents
    /// always yield equal cost, and the cost never decreases when an entry
    /// is added.
    pub fn bytesize(&self) -> Result<u64> {
        bincode::serialized_size(&self.map).map_err(Error::Serialize)
    }

    /// Evicts least-recently-used entries until both budgets are satisfied,
    /// returning how many entries were evicted.
    ///
    /// Skips all work and returns `Ok(0)` if nothing was written since the
    /// last trim. Otherwise entries are evicted one at a time from the LRU
    /// end: first while the entry count exceeds `max_items`, then while the
    /// whole-store serialized cost exceeds `max_bytesize`. The cost is
    /// recomputed after every eviction because it does not decompose into
    /// per-entry sums. Only whole entries are evicted, so if a single
    /// remaining entry exceeds the byte budget on its own, trimming
    /// continues until the cache is empty.
    ///
    /// Clears the pending-trim flag on completion whether or not anything
    /// was evicted; a failure to measure the serialized cost leaves the
    /// flag set and the cache unchanged beyond the evictions already made.
    pub fn trim(&mut self) -> Result<usize> {
        if !self.needs_trim {
            debug!("skipping trim");
            return Ok(0);
        }

        let mut evicted = 0;
        while self.map.len() > self.limits.max_items {
            self.map.pop_lru();
            self.dirty = true;
            evicted += 1;
        }
        while !self.map.is_empty() && self.bytesize()? > self.limits.max_bytesize {
            self.map.pop_lru();
            self.dirty = true;
            evicted += 1;
        }

        self.needs_trim = false;
        if evicted > 0 {
            warn!(evicted, "trimmed cache entries");
        }
        Ok(evicted)
    }
}

impl<K: Hash + Eq + Serialize, V: Serialize> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let size = match self.bytesize() {
            Ok(size) => format_bytesize(size),
            Err(_) => "<unserializable>".to_string(),
        };
        f.debug_struct("LruCache")
            .field("items", &self.len())
            .field("bytesize", &size)
            .field("dirty", &self.dirty)
            .finish()
    }
}
