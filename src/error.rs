//! Error types for cache persistence.

use std::path::PathBuf;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by trim, save, and the open/close lifecycle.
///
/// In-memory reads and writes never fail; only operations that touch the
/// serialized form or the backing file do.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `save` or `close` was called on a cache that is already closed.
    #[error("cache is already closed")]
    AlreadyClosed,

    /// The backing file exists but could not be decoded. Surfaced at open
    /// time; the file is left untouched rather than silently overwritten.
    #[error("corrupt cache file '{}': {source}", .path.display())]
    Corrupt {
        /// Location of the unreadable backing file.
        path: PathBuf,
        /// The decode failure.
        #[source]
        source: bincode::Error,
    },

    /// A cached value could not be encoded. Surfaced when the serialized
    /// size is measured or the cache is saved, not when the value is
    /// inserted.
    #[error("failed to serialize cache contents: {0}")]
    Serialize(#[source] bincode::Error),

    /// A filesystem operation on the backing file failed.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}
