//! The ordered store underlying the cache: a hash map threaded with an
//! intrusive doubly linked list that tracks recency of use.
//!
//! Nodes live in a slab arena and are addressed by [`Ptr`] indices; a raw
//! hash table maps key hashes to pointers. Moving an entry to the
//! most-recently-used end is a constant-time relink, independent of where
//! the entry currently sits in the order.

use std::hash::{BuildHasher, Hash};

use hashbrown::{hash_table, HashTable};
use slab::Slab;

use crate::RandomState;

/// Index of a node in the arena, with `usize::MAX` reserved as null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ptr(usize);

impl Ptr {
    const NULL: Ptr = Ptr(usize::MAX);

    fn is_null(self) -> bool {
        self == Ptr::NULL
    }

    fn get(self) -> Option<usize> {
        if self.is_null() {
            None
        } else {
            Some(self.0)
        }
    }
}

#[derive(Debug, Clone)]
struct Node<K, V> {
    key: K,
    value: V,
    hash: u64,
    /// Neighbor toward the least-recently-used end.
    prev: Ptr,
    /// Neighbor toward the most-recently-used end.
    next: Ptr,
}

/// An associative container that keeps its entries in recency order.
///
/// Every successful lookup and every write promotes the affected key to the
/// most-recently-used end of the order; a miss changes nothing. Lookups,
/// inserts, removals, and promotions are all O(1) amortized.
///
/// `LruMap` imposes no size limit of its own — bounding and eviction live in
/// [`LruCache`](crate::LruCache), which drains this map from its
/// least-recently-used end.
///
/// # Examples
///
/// ```
/// use lru_stash::LruMap;
///
/// let mut map = LruMap::new();
/// map.insert("a", 1);
/// map.insert("b", 2);
/// map.insert("c", 3);
///
/// // Reading "a" makes it the most recently used entry.
/// assert_eq!(map.get(&"a"), Some(&1));
///
/// // Iteration runs from the least recently used end.
/// let order: Vec<_> = map.keys().copied().collect();
/// assert_eq!(order, ["b", "c", "a"]);
/// ```
pub struct LruMap<K, V> {
    nodes: Slab<Node<K, V>>,
    table: HashTable<Ptr>,
    /// Most-recently-used end of the list.
    head: Ptr,
    /// Least-recently-used end of the list.
    tail: Ptr,
    hasher: RandomState,
}

impl<K, V> Default for LruMap<K, V> {
    fn default() -> Self {
        Self {
            nodes: Slab::new(),
            table: HashTable::new(),
            head: Ptr::NULL,
            tail: Ptr::NULL,
            hasher: RandomState::default(),
        }
    }
}

impl<K, V> LruMap<K, V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty map with room for `capacity` entries before
    /// reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Slab::with_capacity(capacity),
            table: HashTable::with_capacity(capacity),
            head: Ptr::NULL,
            tail: Ptr::NULL,
            hasher: RandomState::default(),
        }
    }

    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.table.clear();
        self.head = Ptr::NULL;
        self.tail = Ptr::NULL;
    }

    /// Iterates over entries in recency order, least recently used first.
    ///
    /// The iterator is lazy and restartable; it observes the order as of the
    /// call. Do not rely on any particular behavior if the map is mutated
    /// while an iterator from a previous call is still around — the borrow
    /// checker prevents it within safe code anyway.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        let mut ptr = self.tail;
        std::iter::from_fn(move || {
            let index = ptr.get()?;
            let node = &self.nodes[index];
            ptr = node.next;
            Some((&node.key, &node.value))
        })
    }

    /// Iterates over keys in recency order, least recently used first.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    /// Iterates over values in recency order, least recently used first.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Returns the least-recently-used entry without touching the order.
    pub fn tail(&self) -> Option<(&K, &V)> {
        let node = &self.nodes[self.tail.get()?];
        Some((&node.key, &node.value))
    }

    /// Unlinks `ptr` from the recency list, stitching its neighbors
    /// together.
    fn unlink(&mut self, ptr: Ptr) {
        let node = &self.nodes[ptr.0];
        let (prev, next) = (node.prev, node.next);
        match prev.get() {
            Some(index) => self.nodes[index].next = next,
            None => self.tail = next,
        }
        match next.get() {
            Some(index) => self.nodes[index].prev = prev,
            None => self.head = prev,
        }
    }

    /// Links `ptr` in as the most-recently-used entry.
    fn link_as_head(&mut self, ptr: Ptr) {
        let old_head = self.head;
        {
            let node = &mut self.nodes[ptr.0];
            node.prev = old_head;
            node.next = Ptr::NULL;
        }
        match old_head.get() {
            Some(index) => self.nodes[index].next = ptr,
            None => self.tail = ptr,
        }
        self.head = ptr;
    }

    /// Moves `ptr` to the most-recently-used end.
    fn promote(&mut self, ptr: Ptr) {
        if self.head == ptr {
            return;
        }
        self.unlink(ptr);
        self.link_as_head(ptr);
    }
}

impl<K: Hash + Eq, V> LruMap<K, V> {
    fn find(&self, key: &K) -> Option<Ptr> {
        let hash = self.hasher.hash_one(key);
        let nodes = &self.nodes;
        self.table
            .find(hash, |&ptr| nodes[ptr.0].key == *key)
            .copied()
    }

    /// Returns true if the map contains `key`. Never perturbs the order.
    pub fn contains_key(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Returns the value for `key` without touching the recency order.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.find(key).map(|ptr| &self.nodes[ptr.0].value)
    }

    /// Returns the value for `key`, promoting it to most recently used.
    /// A miss leaves the order untouched.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.get_mut(key).map(|value| &*value)
    }

    /// Like [`get`](Self::get), but returns a mutable reference.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let ptr = self.find(key)?;
        self.promote(ptr);
        Some(&mut self.nodes[ptr.0].value)
    }

    /// Inserts or overwrites `key`, promoting it to most recently used in
    /// both cases. Returns the previous value on overwrite.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = self.hasher.hash_one(&key);
        let nodes = &self.nodes;
        match self.table.entry(
            hash,
            |&ptr| nodes[ptr.0].key == key,
            |&ptr| nodes[ptr.0].hash,
        ) {
            hash_table::Entry::Occupied(occupied) => {
                let ptr = *occupied.get();
                let old = std::mem::replace(&mut self.nodes[ptr.0].value, value);
                self.promote(ptr);
                Some(old)
            }
            hash_table::Entry::Vacant(vacant) => {
                let ptr = Ptr(self.nodes.insert(Node {
                    key,
                    value,
                    hash,
                    prev: Ptr::NULL,
                    next: Ptr::NULL,
                }));
                vacant.insert(ptr);
                self.link_as_head(ptr);
                None
            }
        }
    }

    /// Returns the value for `key`, inserting one built by `or_insert` if
    /// absent. Either way the entry ends up most recently used.
    pub fn get_or_insert_with(&mut self, key: K, or_insert: impl FnOnce(&K) -> V) -> &mut V {
        let hash = self.hasher.hash_one(&key);
        let nodes = &self.nodes;
        let ptr = match self.table.entry(
            hash,
            |&ptr| nodes[ptr.0].key == key,
            |&ptr| nodes[ptr.0].hash,
        ) {
            hash_table::Entry::Occupied(occupied) => {
                let ptr = *occupied.get();
                self.promote(ptr);
                ptr
            }
            hash_table::Entry::Vacant(vacant) => {
                let value = or_insert(&key);
                let ptr = Ptr(self.nodes.insert(Node {
                    key,
                    value,
                    hash,
                    prev: Ptr::NULL,
                    next: Ptr::NULL,
                }));
                vacant.insert(ptr);
                self.link_as_head(ptr);
                ptr
            }
        };
        &mut self.nodes[ptr.0].value
    }

    /// Removes `key`, returning its value. Removing an absent key is an
    /// idempotent no-op returning `None`.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let hash = self.hasher.hash_one(key);
        let nodes = &self.nodes;
        let ptr = match self
            .table
            .find_entry(hash, |&ptr| nodes[ptr.0].key == *key)
        {
            Ok(occupied) => {
                let (ptr, _) = occupied.remove();
                ptr
            }
            Err(_) => return None,
        };
        self.unlink(ptr);
        let node = self.nodes.remove(ptr.0);
        Some(node.value)
    }

    /// Removes and returns the least-recently-used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let ptr = self.tail;
        let index = ptr.get()?;
        let hash = self.nodes[index].hash;
        match self.table.find_entry(hash, |&p| p == ptr) {
            Ok(occupied) => {
                occupied.remove();
            }
            Err(_) => {
                debug_assert!(false, "tail pointer missing from table");
            }
        }
        self.unlink(ptr);
        let node = self.nodes.remove(index);
        Some((node.key, node.value))
    }
}

impl<K: std::fmt::Debug, V: std::fmt::Debug> std::fmt::Debug for LruMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Clone + Hash + Eq, V: Clone> Clone for LruMap<K, V> {
    fn clone(&self) -> Self {
        // Reinserting in recency order reproduces the same order.
        self.iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl<K: Hash + Eq, V> FromIterator<(K, V)> for LruMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut map = Self::with_capacity(iter.size_hint().0);
        map.extend(iter);
        map
    }
}

impl<K: Hash + Eq, V> Extend<(K, V)> for LruMap<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

/// Owning iterator over a map's entries, least recently used first.
pub struct IntoIter<K, V> {
    map: LruMap<K, V>,
}

impl<K: Hash + Eq, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        self.map.pop_lru()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.map.len();
        (len, Some(len))
    }
}

impl<K: Hash + Eq, V> IntoIterator for LruMap<K, V> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> IntoIter<K, V> {
        IntoIter { map: self }
    }
}

mod serde_impls {
    //! The map encodes as a sequence of `(key, value)` pairs written from
    //! the least-recently-used end, so a round trip reproduces both the
    //! contents and the recency order.

    use std::{fmt, hash::Hash, marker::PhantomData};

    use serde::{
        de::{SeqAccess, Visitor},
        ser::SerializeSeq,
        Deserialize, Deserializer, Serialize, Serializer,
    };

    use super::LruMap;

    impl<K: Serialize, V: Serialize> Serialize for LruMap<K, V> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut seq = serializer.serialize_seq(Some(self.len()))?;
            for entry in self.iter() {
                seq.serialize_element(&entry)?;
            }
            seq.end()
        }
    }

    struct MapVisitor<K, V>(PhantomData<(K, V)>);

    impl<'de, K, V> Visitor<'de> for MapVisitor<K, V>
    where
        K: Deserialize<'de> + Hash + Eq,
        V: Deserialize<'de>,
    {
        type Value = LruMap<K, V>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a sequence of key-value pairs")
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<LruMap<K, V>, A::Error> {
            // `size_hint` comes from the serialized length prefix, which is
            // untrusted when loading a file. Cap the pre-allocation so a
            // corrupt hint cannot trigger a capacity-overflow panic before
            // the deserializer reports the truncation as an error.
            let cap = seq.size_hint().unwrap_or(0).min(4096);
            let mut map = LruMap::with_capacity(cap);
            while let Some((key, value)) = seq.next_element::<(K, V)>()? {
                map.insert(key, value);
            }
            Ok(map)
        }
    }

    impl<'de, K, V> Deserialize<'de> for LruMap<K, V>
    where
        K: Deserialize<'de> + Hash + Eq,
        V: Deserialize<'de>,
    {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_seq(MapVisitor(PhantomData))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order<K: Copy + Hash + Eq, V>(map: &LruMap<K, V>) -> Vec<K> {
        map.keys().copied().collect()
    }

    #[test]
    fn test_empty() {
        let mut map = LruMap::<i32, i32>::new();
        assert_eq!(map.len(), 0);
        assert!(map.is_empty());
        assert_eq!(map.get(&1), None);
        assert_eq!(map.peek(&1), None);
        assert_eq!(map.remove(&1), None);
        assert_eq!(map.pop_lru(), None);
        assert_eq!(map.tail(), None);
        assert!(!map.contains_key(&1));
    }

    #[test]
    fn test_insert_and_get() {
        let mut map = LruMap::new();
        assert_eq!(map.insert(1, "one"), None);
        assert_eq!(map.insert(2, "two"), None);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&1), Some(&"one"));
        assert_eq!(map.get(&2), Some(&"two"));
        assert_eq!(map.get(&3), None);
    }

    #[test]
    fn test_overwrite_returns_previous() {
        let mut map = LruMap::new();
        map.insert(1, "one");
        assert_eq!(map.insert(1, "uno"), Some("one"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.peek(&1), Some(&"uno"));
    }

    #[test]
    fn test_read_promotes() {
        let mut map = LruMap::new();
        map.insert(1, ());
        map.insert(2, ());
        map.insert(3, ());
        assert_eq!(order(&map), [1, 2, 3]);

        map.get(&1);
        assert_eq!(order(&map), [2, 3, 1]);
        assert_eq!(map.tail(), Some((&2, &())));
    }

    #[test]
    fn test_miss_does_not_perturb_order() {
        let mut map = LruMap::new();
        map.insert(1, ());
        map.insert(2, ());
        map.get(&99);
        assert_eq!(order(&map), [1, 2]);
    }

    #[test]
    fn test_peek_and_contains_do_not_promote() {
        let mut map = LruMap::new();
        map.insert(1, ());
        map.insert(2, ());
        assert_eq!(map.peek(&1), Some(&()));
        assert!(map.contains_key(&1));
        assert_eq!(order(&map), [1, 2]);
    }

    #[test]
    fn test_overwrite_promotes() {
        let mut map = LruMap::new();
        map.insert(1, 10);
        map.insert(2, 20);
        map.insert(3, 30);
        map.insert(1, 11);
        assert_eq!(order(&map), [2, 3, 1]);
    }

    #[test]
    fn test_remove() {
        let mut map = LruMap::new();
        map.insert(1, "one");
        map.insert(2, "two");
        map.insert(3, "three");

        assert_eq!(map.remove(&2), Some("two"));
        assert_eq!(map.remove(&2), None);
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key(&2));
        assert_eq!(order(&map), [1, 3]);
    }

    #[test]
    fn test_remove_ends_of_list() {
        let mut map = LruMap::new();
        map.insert(1, ());
        map.insert(2, ());
        map.insert(3, ());

        map.remove(&1);
        assert_eq!(order(&map), [2, 3]);
        map.remove(&3);
        assert_eq!(order(&map), [2]);
        map.remove(&2);
        assert!(map.is_empty());
        assert_eq!(map.tail(), None);
    }

    #[test]
    fn test_pop_lru_order() {
        let mut map = LruMap::new();
        map.insert(1, "one");
        map.insert(2, "two");
        map.insert(3, "three");
        map.get(&1);

        assert_eq!(map.pop_lru(), Some((2, "two")));
        assert_eq!(map.pop_lru(), Some((3, "three")));
        assert_eq!(map.pop_lru(), Some((1, "one")));
        assert_eq!(map.pop_lru(), None);
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut map = LruMap::new();
        let mut calls = 0;

        let value = map.get_or_insert_with(1, |_| {
            calls += 1;
            "one"
        });
        assert_eq!(*value, "one");

        let value = map.get_or_insert_with(1, |_| {
            calls += 1;
            "other"
        });
        assert_eq!(*value, "one");
        assert_eq!(calls, 1);

        map.insert(2, "two");
        map.get_or_insert_with(1, |_| "unused");
        assert_eq!(order(&map), [2, 1]);
    }

    #[test]
    fn test_clear() {
        let mut map = LruMap::new();
        map.insert(1, ());
        map.insert(2, ());
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.tail(), None);

        map.insert(3, ());
        assert_eq!(order(&map), [3]);
    }

    #[test]
    fn test_slot_reuse_keeps_order_consistent() {
        let mut map = LruMap::new();
        for i in 0..8 {
            map.insert(i, i);
        }
        for i in 0..4 {
            map.remove(&i);
        }
        for i in 8..12 {
            map.insert(i, i);
        }
        assert_eq!(order(&map), [4, 5, 6, 7, 8, 9, 10, 11]);

        map.get(&4);
        map.get(&9);
        assert_eq!(order(&map), [5, 6, 7, 8, 10, 11, 4, 9]);
    }

    #[test]
    fn test_into_iter_lru_first() {
        let mut map = LruMap::new();
        map.insert(1, "one");
        map.insert(2, "two");
        map.get(&1);

        let pairs: Vec<_> = map.into_iter().collect();
        assert_eq!(pairs, [(2, "two"), (1, "one")]);
    }

    #[test]
    fn test_from_iterator_overlapping_keys() {
        let map: LruMap<i32, &str> = [(1, "a"), (2, "b"), (1, "c")].into_iter().collect();
        assert_eq!(map.len(), 2);
        assert_eq!(map.peek(&1), Some(&"c"));
        assert_eq!(order(&map), [2, 1]);
    }

    #[test]
    fn test_clone_preserves_order() {
        let mut map = LruMap::new();
        for i in 0..5 {
            map.insert(i, i * 10);
        }
        map.get(&0);
        map.get(&3);

        let cloned = map.clone();
        assert_eq!(order(&cloned), order(&map));
        assert_eq!(cloned.peek(&3), Some(&30));
    }

    #[test]
    fn test_serde_round_trip_preserves_order() {
        let mut map = LruMap::new();
        for i in 0..10u32 {
            map.insert(i, format!("value_{i}"));
        }
        map.get(&2);
        map.get(&7);
        map.remove(&5);

        let bytes = bincode::serialize(&map).unwrap();
        let decoded: LruMap<u32, String> = bincode::deserialize(&bytes).unwrap();

        assert_eq!(decoded.len(), map.len());
        assert_eq!(order(&decoded), order(&map));
        for (key, value) in map.iter() {
            assert_eq!(decoded.peek(key), Some(value));
        }
    }

    #[test]
    fn test_serialized_size_grows_with_entries() {
        let mut map = LruMap::new();
        let mut last = bincode::serialized_size(&map).unwrap();
        for i in 0..50u64 {
            map.insert(i, i);
            let size = bincode::serialized_size(&map).unwrap();
            assert!(size > last);
            last = size;
        }
    }
}
