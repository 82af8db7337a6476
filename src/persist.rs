//! A cache bound to a single backing file: loaded whole on open, trimmed
//! and rewritten whole on save.

use std::{
    ffi::OsString,
    fs::{self, File},
    hash::Hash,
    io::{BufReader, BufWriter, ErrorKind, Write},
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::{
    cache::{Limits, LruCache},
    error::{Error, Result},
    map::LruMap,
};

/// An [`LruCache`] persisted to a single file.
///
/// Opening reads the whole backing file (if it exists and is non-empty)
/// into memory; saving trims the cache and atomically rewrites the file
/// with the whole store. Between those points the cache behaves exactly
/// like the in-memory [`LruCache`] it derefs to.
///
/// A cache that never gets mutated never writes anything: opening a
/// nonexistent path yields an empty cache and leaves the filesystem
/// untouched until the first dirty [`save`](Self::save).
///
/// The backing file is owned by one instance at a time. Nothing stops two
/// instances from opening the same path, but there is no locking — the
/// last writer wins.
///
/// # Lifecycle
///
/// Call [`close`](Self::close) when done; it saves and puts the cache in a
/// terminal closed state, and closing twice is an error so lifecycle bugs
/// surface. If an open, dirty cache is dropped instead, it saves itself
/// and logs a warning — errors on that path can only be logged, which is
/// why the explicit `close` is preferred.
///
/// # Examples
///
/// ```no_run
/// use lru_stash::PersistentCache;
///
/// let mut cache: PersistentCache<String, u64> =
///     PersistentCache::open("cache/fib.bin")?;
/// let value = *cache.get_or_load("fib(80)".to_string(), || expensive());
/// cache.close()?;
/// # fn expensive() -> u64 { 0 }
/// # Ok::<(), lru_stash::Error>(())
/// ```
pub struct PersistentCache<K: Hash + Eq + Serialize, V: Serialize> {
    cache: LruCache<K, V>,
    path: PathBuf,
    closed: bool,
}

impl<K, V> PersistentCache<K, V>
where
    K: Hash + Eq + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    /// Opens a cache backed by `path` with default [`Limits`].
    ///
    /// A missing or empty file means "start empty" and is not an error. A
    /// file that exists but cannot be decoded is [`Error::Corrupt`] — the
    /// cache refuses to open rather than silently discarding prior data.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(path, Limits::default())
    }

    /// Opens a cache backed by `path` with the given budgets.
    ///
    /// Loaded contents count as already saved (`dirty` is false), but the
    /// file may have been written under different budgets, so the first
    /// trim after opening inspects them.
    pub fn open_with(path: impl Into<PathBuf>, limits: Limits) -> Result<Self> {
        let path = path.into();
        let mut cache = LruCache::with_limits(limits);

        match fs::metadata(&path) {
            Ok(meta) if meta.len() > 0 => {
                let reader = BufReader::new(File::open(&path)?);
                let map: LruMap<K, V> =
                    bincode::deserialize_from(reader).map_err(|source| Error::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                info!(path = %path.display(), items = map.len(), "loaded cache");
                cache.replace_map(map);
            }
            Ok(_) => {
                debug!(path = %path.display(), "backing file is empty");
            }
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "cache not found, starting empty");
            }
            Err(error) => return Err(Error::Io(error)),
        }

        Ok(Self {
            cache,
            path,
            closed: false,
        })
    }
}

impl<K: Hash + Eq + Serialize, V: Serialize> PersistentCache<K, V> {
    /// The location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once [`close`](Self::close) has succeeded.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Trims the cache and rewrites the backing file if anything changed.
    ///
    /// A clean cache is a logged no-op. Parent directories are created as
    /// needed, and the store is written to a sibling temp file that is
    /// renamed over the backing file, so a crash mid-save never leaves a
    /// half-written cache behind.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyClosed`] after [`close`](Self::close);
    /// [`Error::Serialize`] if a stored value cannot be encoded;
    /// [`Error::Io`] on filesystem failures.
    pub fn save(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::AlreadyClosed);
        }
        if !self.cache.is_dirty() {
            debug!("no changes to save");
            return Ok(());
        }
        self.save_inner()
    }

    /// Saves and closes the backing file; the cache is terminally closed
    /// afterwards.
    ///
    /// In-memory reads keep working on a closed cache, but `save` and a
    /// second `close` fail with [`Error::AlreadyClosed`]. If the save
    /// fails, the cache stays open so the caller can retry.
    pub fn close(&mut self) -> Result<()> {
        self.save()?;
        self.closed = true;
        debug!(path = %self.path.display(), "closed cache");
        Ok(())
    }

    fn save_inner(&mut self) -> Result<()> {
        self.cache.trim()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = tmp_path(&self.path);
        let mut writer = BufWriter::new(File::create(&tmp)?);
        if let Err(source) = bincode::serialize_into(&mut writer, self.cache.map()) {
            drop(writer);
            let _ = fs::remove_file(&tmp);
            return Err(Error::Serialize(source));
        }
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, &self.path)?;

        info!(
            path = %self.path.display(),
            items = self.cache.len(),
            "saved cache"
        );
        self.cache.mark_clean();
        Ok(())
    }
}

/// Sibling path for the temp file a save writes before renaming: the
/// backing path with `.tmp` appended, so it lands on the same filesystem
/// and the rename stays atomic.
fn tmp_path(path: &Path) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

impl<K: Hash + Eq + Serialize, V: Serialize> Deref for PersistentCache<K, V> {
    type Target = LruCache<K, V>;

    fn deref(&self) -> &LruCache<K, V> {
        &self.cache
    }
}

impl<K: Hash + Eq + Serialize, V: Serialize> DerefMut for PersistentCache<K, V> {
    fn deref_mut(&mut self) -> &mut LruCache<K, V> {
        &mut self.cache
    }
}

impl<K: Hash + Eq + Serialize, V: Serialize> Drop for PersistentCache<K, V> {
    fn drop(&mut self) {
        if self.closed || !self.cache.is_dirty() {
            return;
        }
        warn!(
            path = %self.path.display(),
            "cache dropped while open, saving"
        );
        if let Err(error) = self.save_inner() {
            warn!(%error, "failed to save cache on drop");
        }
        self.closed = true;
    }
}

impl<K: Hash + Eq + Serialize, V: Serialize> std::fmt::Debug for PersistentCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache")
            .field("path", &self.path)
            .field("closed", &self.closed)
            .field("cache", &self.cache)
            .finish()
    }
}
