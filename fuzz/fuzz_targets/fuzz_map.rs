#![no_main]

use libfuzzer_sys::fuzz_target;
use lru_stash::LruMap;

#[derive(Debug)]
enum MapOperation {
    Insert(u16, u16),
    Get(u16),
    Peek(u16),
    Remove(u16),
    PopLru,
    Clear,
    GetOrInsertWith(u16, u16),
    Iter,
}

impl<'a> arbitrary::Arbitrary<'a> for MapOperation {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        match u.int_in_range(0..=7)? {
            0 => Ok(MapOperation::Insert(u.arbitrary()?, u.arbitrary()?)),
            1 => Ok(MapOperation::Get(u.arbitrary()?)),
            2 => Ok(MapOperation::Peek(u.arbitrary()?)),
            3 => Ok(MapOperation::Remove(u.arbitrary()?)),
            4 => Ok(MapOperation::PopLru),
            5 => Ok(MapOperation::Clear),
            6 => Ok(MapOperation::GetOrInsertWith(u.arbitrary()?, u.arbitrary()?)),
            7 => Ok(MapOperation::Iter),
            _ => unreachable!(),
        }
    }
}

/// Reference model: a vector of pairs kept in recency order, LRU first.
struct Model {
    entries: Vec<(u16, u16)>,
}

impl Model {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn position(&self, key: u16) -> Option<usize> {
        self.entries.iter().position(|&(k, _)| k == key)
    }

    fn touch(&mut self, key: u16, value: u16) {
        if let Some(index) = self.position(key) {
            self.entries.remove(index);
        }
        self.entries.push((key, value));
    }

    fn get(&mut self, key: u16) -> Option<u16> {
        let index = self.position(key)?;
        let (_, value) = self.entries.remove(index);
        self.entries.push((key, value));
        Some(value)
    }

    fn remove(&mut self, key: u16) -> Option<u16> {
        let index = self.position(key)?;
        Some(self.entries.remove(index).1)
    }
}

fuzz_target!(|operations: Vec<MapOperation>| {
    let mut map = LruMap::<u16, u16>::new();
    let mut model = Model::new();

    for operation in operations {
        match operation {
            MapOperation::Insert(key, value) => {
                map.insert(key, value);
                model.touch(key, value);
            }
            MapOperation::Get(key) => {
                assert_eq!(map.get(&key).copied(), model.get(key));
            }
            MapOperation::Peek(key) => {
                let expected = model.position(key).map(|i| model.entries[i].1);
                assert_eq!(map.peek(&key).copied(), expected);
            }
            MapOperation::Remove(key) => {
                assert_eq!(map.remove(&key), model.remove(key));
            }
            MapOperation::PopLru => {
                let expected = if model.entries.is_empty() {
                    None
                } else {
                    Some(model.entries.remove(0))
                };
                assert_eq!(map.pop_lru(), expected);
            }
            MapOperation::Clear => {
                map.clear();
                model.entries.clear();
            }
            MapOperation::GetOrInsertWith(key, value) => {
                let expected = match model.get(key) {
                    Some(existing) => existing,
                    None => {
                        model.touch(key, value);
                        value
                    }
                };
                assert_eq!(*map.get_or_insert_with(key, |_| value), expected);
            }
            MapOperation::Iter => {
                let order: Vec<(u16, u16)> = map.iter().map(|(&k, &v)| (k, v)).collect();
                assert_eq!(order, model.entries);
            }
        }

        assert_eq!(map.len(), model.entries.len());
        assert_eq!(
            map.tail().map(|(&k, &v)| (k, v)),
            model.entries.first().copied()
        );
    }
});
