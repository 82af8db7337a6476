#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

mod bytes;
mod cache;
mod error;
mod map;
mod memo;
mod persist;
mod registry;

pub use bytes::{format_bytesize, gib, kib, mib, DEFAULT_MAX_BYTESIZE, DEFAULT_MAX_ITEMS};
pub use cache::{Limits, LruCache};
pub use error::{Error, Result};
pub use map::{IntoIter, LruMap};
pub use memo::{Memo, MemoKey, PersistentMemo};
pub use persist::PersistentCache;
pub use registry::FlushRegistry;

#[cfg(not(feature = "ahash"))]
type RandomState = std::hash::RandomState;
#[cfg(feature = "ahash")]
type RandomState = ahash::RandomState;
