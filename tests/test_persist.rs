use std::{
    fs,
    sync::{Arc, Mutex},
};

use lru_stash::{Error, FlushRegistry, Limits, LruMap, PersistentCache};

#[test]
fn test_open_missing_path_starts_empty_and_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    let cache: PersistentCache<u32, String> = PersistentCache::open(&path).unwrap();
    assert!(cache.is_empty());
    assert!(!path.exists());
}

#[test]
fn test_unmutated_cache_leaves_no_file_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    let mut cache: PersistentCache<u32, String> = PersistentCache::open(&path).unwrap();
    cache.save().unwrap();
    cache.close().unwrap();
    assert!(!path.exists());
}

#[test]
fn test_set_close_reopen_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    let mut cache: PersistentCache<String, u64> = PersistentCache::open(&path).unwrap();
    cache.insert("answer".to_string(), 42);
    assert!(!path.exists());

    cache.close().unwrap();
    assert!(path.exists());

    let mut reopened: PersistentCache<String, u64> = PersistentCache::open(&path).unwrap();
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.get(&"answer".to_string()), Some(&42));
    assert!(!reopened.is_dirty());
    reopened.close().unwrap();
}

#[test]
fn test_reopen_preserves_recency_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    let mut cache: PersistentCache<u32, u32> = PersistentCache::open(&path).unwrap();
    for i in 0..5 {
        cache.insert(i, i * 10);
    }
    cache.get(&1);
    let before: Vec<u32> = cache.keys().copied().collect();
    cache.close().unwrap();

    let reopened: PersistentCache<u32, u32> = PersistentCache::open(&path).unwrap();
    let after: Vec<u32> = reopened.keys().copied().collect();
    assert_eq!(before, after);
}

#[test]
fn test_save_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a").join("b").join("cache.bin");

    let mut cache: PersistentCache<u32, u32> = PersistentCache::open(&path).unwrap();
    cache.insert(1, 1);
    cache.close().unwrap();
    assert!(path.exists());
}

#[test]
fn test_save_is_skipped_when_clean() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    let mut cache: PersistentCache<u32, u32> = PersistentCache::open(&path).unwrap();
    cache.insert(1, 1);
    cache.save().unwrap();
    let first_write = fs::metadata(&path).unwrap().modified().unwrap();

    // Reads don't dirty the cache, so this save must not rewrite the file.
    cache.get(&1);
    cache.save().unwrap();
    let second_write = fs::metadata(&path).unwrap().modified().unwrap();
    assert_eq!(first_write, second_write);
    cache.close().unwrap();
}

#[test]
fn test_save_trims_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    let mut cache: PersistentCache<u32, u32> = PersistentCache::open_with(
        &path,
        Limits {
            max_items: 3,
            ..Limits::default()
        },
    )
    .unwrap();
    for i in 0..10 {
        cache.insert(i, i);
    }
    cache.close().unwrap();

    let reopened: PersistentCache<u32, u32> = PersistentCache::open(&path).unwrap();
    assert_eq!(reopened.len(), 3);
    let survivors: Vec<u32> = reopened.keys().copied().collect();
    assert_eq!(survivors, [7, 8, 9]);
}

#[test]
fn test_double_close_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    let mut cache: PersistentCache<u32, u32> = PersistentCache::open(&path).unwrap();
    cache.insert(1, 1);
    cache.close().unwrap();
    assert!(cache.is_closed());
    assert!(matches!(cache.close(), Err(Error::AlreadyClosed)));
    assert!(matches!(cache.save(), Err(Error::AlreadyClosed)));
}

#[test]
fn test_corrupt_file_fails_open_without_overwriting() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");
    fs::write(&path, b"\xff\xff\xff\xff\xff\xff\xff\xff\xff garbage").unwrap();

    let result: Result<PersistentCache<u32, String>, _> = PersistentCache::open(&path);
    assert!(matches!(result, Err(Error::Corrupt { .. })));

    // The unreadable file is left in place, not silently replaced.
    assert_eq!(
        fs::read(&path).unwrap(),
        b"\xff\xff\xff\xff\xff\xff\xff\xff\xff garbage"
    );
}

#[test]
fn test_empty_file_opens_as_empty_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");
    fs::write(&path, b"").unwrap();

    let cache: PersistentCache<u32, u32> = PersistentCache::open(&path).unwrap();
    assert!(cache.is_empty());
}

#[test]
fn test_drop_saves_dirty_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    {
        let mut cache: PersistentCache<u32, u32> = PersistentCache::open(&path).unwrap();
        cache.insert(5, 50);
        // Dropped without close.
    }
    assert!(path.exists());

    let mut reopened: PersistentCache<u32, u32> = PersistentCache::open(&path).unwrap();
    assert_eq!(reopened.get(&5), Some(&50));
    reopened.close().unwrap();
}

#[test]
fn test_drop_of_clean_cache_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    {
        let _cache: PersistentCache<u32, u32> = PersistentCache::open(&path).unwrap();
    }
    assert!(!path.exists());
}

#[test]
fn test_save_overwrites_previous_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    let mut cache: PersistentCache<u32, String> = PersistentCache::open(&path).unwrap();
    cache.insert(1, "x".repeat(4096));
    cache.save().unwrap();

    cache.remove(&1);
    cache.insert(2, "y".to_string());
    cache.close().unwrap();

    // Truncate-and-replace: the rewritten file holds only current state.
    let bytes = fs::read(&path).unwrap();
    let decoded: LruMap<u32, String> = bincode::deserialize(&bytes).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded.peek(&2), Some(&"y".to_string()));
    assert!(bytes.len() < 4096);
}

#[test]
fn test_registry_flushes_open_caches_and_skips_dead_ones() {
    let dir = tempfile::tempdir().unwrap();
    let open_path = dir.path().join("open.bin");
    let dropped_path = dir.path().join("dropped.bin");

    let mut registry = FlushRegistry::new();

    let open_cache: PersistentCache<u32, u32> = PersistentCache::open(&open_path).unwrap();
    let open_cache = Arc::new(Mutex::new(open_cache));
    registry.register(&open_cache);
    open_cache.lock().unwrap().insert(1, 1);

    {
        let dropped: PersistentCache<u32, u32> = PersistentCache::open(&dropped_path).unwrap();
        let dropped = Arc::new(Mutex::new(dropped));
        registry.register(&dropped);
        dropped.lock().unwrap().insert(2, 2);
        // Goes out of scope here; Drop saves it on its own.
    }

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.flush_all(), 1);
    assert!(open_cache.lock().unwrap().is_closed());
    assert!(open_path.exists());
    assert!(dropped_path.exists());
}

#[test]
fn test_registry_skips_already_closed_caches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    let mut registry = FlushRegistry::new();
    let cache: PersistentCache<u32, u32> = PersistentCache::open(&path).unwrap();
    let cache = Arc::new(Mutex::new(cache));
    registry.register(&cache);

    cache.lock().unwrap().insert(1, 1);
    cache.lock().unwrap().close().unwrap();

    assert_eq!(registry.flush_all(), 0);
}
