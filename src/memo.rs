//! Function memoization layered over the cache.
//!
//! A memoized result is keyed by a [`MemoKey`]: the identity of the call
//! site plus a canonical encoding of the arguments. Two functions with
//! equal arguments therefore never collide, and the same function always
//! maps equal arguments to the same entry.

use std::{borrow::Cow, hash::Hash, path::PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    cache::{Limits, LruCache},
    error::Result,
    persist::PersistentCache,
};

/// Composite cache key for a memoized call: call-site identity plus the
/// call's arguments.
///
/// The site string stands in for the function identity (the original
/// dynamic-language design hashed module and function names); pick one
/// stable string per memoized function. Arguments are compared and hashed
/// by value, and multi-argument functions use a tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoKey<A> {
    site: Cow<'static, str>,
    args: A,
}

impl<A> MemoKey<A> {
    /// Builds the key for `site` called with `args`.
    pub fn new(site: impl Into<Cow<'static, str>>, args: A) -> Self {
        Self {
            site: site.into(),
            args,
        }
    }

    /// The call-site identity.
    pub fn site(&self) -> &str {
        &self.site
    }

    /// The encoded arguments.
    pub fn args(&self) -> &A {
        &self.args
    }
}

/// Memoizes a single function over an in-memory [`LruCache`].
///
/// [`call`](Self::call) hands the memoizer back to the compute closure, so
/// recursive functions memoize every frame of the recursion:
///
/// ```
/// use lru_stash::Memo;
///
/// fn fib(memo: &mut Memo<u64, u64>, n: u64) -> u64 {
///     memo.call(n, |memo, n| {
///         if n < 2 { n } else { fib(memo, n - 1) + fib(memo, n - 2) }
///     })
/// }
///
/// let mut memo = Memo::new("fib");
/// assert_eq!(fib(&mut memo, 20), 6765);
/// assert_eq!(memo.len(), 21);
/// ```
pub struct Memo<A, R> {
    cache: LruCache<MemoKey<A>, R>,
    site: Cow<'static, str>,
}

impl<A: Hash + Eq + Clone, R: Clone> Memo<A, R> {
    /// Creates a memoizer for the given call site with default [`Limits`].
    pub fn new(site: impl Into<Cow<'static, str>>) -> Self {
        Self::with_limits(site, Limits::default())
    }

    /// Creates a memoizer with the given budgets.
    pub fn with_limits(site: impl Into<Cow<'static, str>>, limits: Limits) -> Self {
        Self {
            cache: LruCache::with_limits(limits),
            site: site.into(),
        }
    }

    /// Returns the memoized result for `args`, computing it with `f` on a
    /// miss. `f` runs at most once per call and its result is stored
    /// verbatim.
    pub fn call<F>(&mut self, args: A, f: F) -> R
    where
        F: FnOnce(&mut Self, A) -> R,
    {
        let key = MemoKey {
            site: self.site.clone(),
            args: args.clone(),
        };
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let value = f(self, args);
        self.cache.insert(key, value.clone());
        value
    }

    /// Number of memoized results currently held.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True if nothing has been memoized yet.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// The underlying cache, for inspection and trimming.
    pub fn cache(&self) -> &LruCache<MemoKey<A>, R> {
        &self.cache
    }

    /// Mutable access to the underlying cache.
    pub fn cache_mut(&mut self) -> &mut LruCache<MemoKey<A>, R> {
        &mut self.cache
    }
}

/// Memoizes a single function over a [`PersistentCache`], making results
/// durable across process runs.
///
/// The same adapter as [`Memo`], plus the persistence lifecycle: open it
/// on a path, [`save`](Self::save) or [`close`](Self::close) when done.
pub struct PersistentMemo<A, R>
where
    A: Hash + Eq + Serialize,
    R: Serialize,
{
    cache: PersistentCache<MemoKey<A>, R>,
    site: Cow<'static, str>,
}

impl<A, R> PersistentMemo<A, R>
where
    A: Hash + Eq + Clone + Serialize + DeserializeOwned,
    R: Clone + Serialize + DeserializeOwned,
{
    /// Opens a persistent memoizer backed by `path` with default limits.
    pub fn open(site: impl Into<Cow<'static, str>>, path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(site, path, Limits::default())
    }

    /// Opens a persistent memoizer with the given budgets.
    pub fn open_with(
        site: impl Into<Cow<'static, str>>,
        path: impl Into<PathBuf>,
        limits: Limits,
    ) -> Result<Self> {
        Ok(Self {
            cache: PersistentCache::open_with(path, limits)?,
            site: site.into(),
        })
    }
}

impl<A, R> PersistentMemo<A, R>
where
    A: Hash + Eq + Clone + Serialize,
    R: Clone + Serialize,
{
    /// Returns the memoized result for `args`, computing it with `f` on a
    /// miss. See [`Memo::call`].
    pub fn call<F>(&mut self, args: A, f: F) -> R
    where
        F: FnOnce(&mut Self, A) -> R,
    {
        let key = MemoKey {
            site: self.site.clone(),
            args: args.clone(),
        };
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let value = f(self, args);
        self.cache.insert(key, value.clone());
        value
    }

    /// Number of memoized results currently held.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True if nothing has been memoized yet.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// The underlying persistent cache.
    pub fn cache(&self) -> &PersistentCache<MemoKey<A>, R> {
        &self.cache
    }

    /// Mutable access to the underlying persistent cache.
    pub fn cache_mut(&mut self) -> &mut PersistentCache<MemoKey<A>, R> {
        &mut self.cache
    }

    /// Saves memoized results to the backing file. See
    /// [`PersistentCache::save`].
    pub fn save(&mut self) -> Result<()> {
        self.cache.save()
    }

    /// Saves and closes the backing cache. See [`PersistentCache::close`].
    pub fn close(&mut self) -> Result<()> {
        self.cache.close()
    }
}
