// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! A read-mostly map for control-plane indexes. Readers load an immutable
//! snapshot pointer and never take a lock; writers serialize behind a mutex
//! and publish a fresh snapshot atomically.
//!
//! Return convention, kept from the original control plane: mutating calls
//! return `1` on success and `-1` on failure (e.g. an unmet predicate), and
//! the size queries return `0` when nothing is readable.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::ByteSize;

pub const MODIFY_OK: i32 = 1;
pub const MODIFY_FAIL: i32 = -1;

pub struct SafeMap<K, V> {
    current: ArcSwap<HashMap<K, V>>,
    // Serializes every publish; readers never touch it.
    modify_lock: Mutex<()>,
}

impl<K, V> Default for SafeMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        SafeMap {
            current: ArcSwap::from_pointee(HashMap::new()),
            modify_lock: Mutex::new(()),
        }
    }
}

impl<K, V> SafeMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Must be called before heavy use; pre-sizes the backing table.
    pub fn init(&self, capacity: usize) {
        self.modify(|m| {
            m.reserve(capacity);
            true
        });
    }

    fn modify<F>(&self, f: F) -> i32
    where
        F: FnOnce(&mut HashMap<K, V>) -> bool,
    {
        let _guard = self.modify_lock.lock();
        let mut next = HashMap::clone(&self.current.load());
        if !f(&mut next) {
            return MODIFY_FAIL;
        }
        self.current.store(Arc::new(next));
        MODIFY_OK
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.current.load().get(key).cloned()
    }

    pub fn count(&self, key: &K) -> u64 {
        u64::from(self.current.load().contains_key(key))
    }

    pub fn size(&self) -> u64 {
        self.current.load().len() as u64
    }

    pub fn put(&self, key: K, value: V) -> i32 {
        self.modify(|m| {
            m.insert(key, value);
            true
        })
    }

    pub fn put_if_absent(&self, key: K, value: V) -> i32 {
        self.modify(|m| {
            if m.contains_key(&key) {
                return false;
            }
            m.insert(key, value);
            true
        })
    }

    pub fn put_if_exists(&self, key: K, value: V) -> i32 {
        self.modify(|m| {
            if !m.contains_key(&key) {
                return false;
            }
            m.insert(key, value);
            true
        })
    }

    /// All-or-nothing insert of parallel key/value slices.
    pub fn multi_put(&self, keys: Vec<K>, values: Vec<V>) -> i32 {
        if keys.len() != values.len() {
            return MODIFY_FAIL;
        }
        self.modify(|m| {
            for (k, v) in keys.into_iter().zip(values) {
                m.insert(k, v);
            }
            true
        })
    }

    pub fn erase(&self, key: &K) -> i32 {
        self.modify(|m| m.remove(key).is_some())
    }

    pub fn clear(&self) -> i32 {
        self.modify(|m| {
            m.clear();
            true
        })
    }

    /// Replaces this map's content with `other`'s and vice versa.
    pub fn swap(&self, other: &SafeMap<K, V>) -> i32 {
        let _guard = self.modify_lock.lock();
        let _other_guard = other.modify_lock.lock();
        let mine = self.current.load_full();
        let theirs = other.current.load_full();
        self.current.store(theirs);
        other.current.store(mine);
        MODIFY_OK
    }

    pub fn copy_from(&self, other: &SafeMap<K, V>) -> i32 {
        let snapshot = other.current.load_full();
        self.modify(|m| {
            *m = HashMap::clone(&snapshot);
            true
        })
    }

    /// Collects every value passing `filter` from one consistent snapshot.
    pub fn get_all_values<F>(&self, filter: F) -> Vec<V>
    where
        F: Fn(&V) -> bool,
    {
        self.current
            .load()
            .values()
            .filter(|v| filter(v))
            .cloned()
            .collect()
    }

    pub fn get_all_key_values(&self) -> Vec<(K, V)> {
        self.current
            .load()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<K, V> SafeMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    /// Replaces the value only when the stored one equals `expect`.
    pub fn put_if_equal(&self, key: K, expect: &V, value: V) -> i32 {
        self.modify(|m| match m.get(&key) {
            Some(cur) if cur == expect => {
                m.insert(key, value);
                true
            }
            _ => false,
        })
    }

    pub fn put_if_not_equal(&self, key: K, reject: &V, value: V) -> i32 {
        self.modify(|m| match m.get(&key) {
            Some(cur) if cur == reject => false,
            _ => {
                m.insert(key, value);
                true
            }
        })
    }
}

impl<K, V> SafeMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + ByteSize,
{
    pub fn memory_size(&self) -> u64 {
        self.current
            .load()
            .values()
            .map(|v| v.byte_size() as u64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_ops() {
        let map: SafeMap<u64, String> = SafeMap::new();
        map.init(16);
        assert_eq!(map.put(1, "a".to_owned()), MODIFY_OK);
        assert_eq!(map.get(&1).unwrap(), "a");
        assert_eq!(map.count(&1), 1);
        assert_eq!(map.count(&2), 0);
        assert_eq!(map.size(), 1);
        assert_eq!(map.erase(&1), MODIFY_OK);
        assert_eq!(map.erase(&1), MODIFY_FAIL);
        assert_eq!(map.size(), 0);
    }

    #[test]
    fn test_conditional_puts() {
        let map: SafeMap<u64, u64> = SafeMap::new();
        assert_eq!(map.put_if_exists(1, 10), MODIFY_FAIL);
        assert_eq!(map.put_if_absent(1, 10), MODIFY_OK);
        assert_eq!(map.put_if_absent(1, 11), MODIFY_FAIL);
        assert_eq!(map.get(&1).unwrap(), 10);

        // put_if_equal succeeds only when the current value matches.
        assert_eq!(map.put_if_equal(1, &9, 12), MODIFY_FAIL);
        assert_eq!(map.get(&1).unwrap(), 10);
        assert_eq!(map.put_if_equal(1, &10, 12), MODIFY_OK);
        assert_eq!(map.get(&1).unwrap(), 12);

        assert_eq!(map.put_if_not_equal(1, &12, 13), MODIFY_FAIL);
        assert_eq!(map.put_if_not_equal(1, &99, 13), MODIFY_OK);
        assert_eq!(map.get(&1).unwrap(), 13);
    }

    #[test]
    fn test_multi_put_all_or_nothing() {
        let map: SafeMap<u64, u64> = SafeMap::new();
        assert_eq!(map.multi_put(vec![1, 2], vec![10]), MODIFY_FAIL);
        assert_eq!(map.size(), 0);
        assert_eq!(map.multi_put(vec![1, 2], vec![10, 20]), MODIFY_OK);
        assert_eq!(map.size(), 2);
    }

    #[test]
    fn test_swap_and_copy() {
        let a: SafeMap<u64, u64> = SafeMap::new();
        let b: SafeMap<u64, u64> = SafeMap::new();
        a.put(1, 1);
        b.put(2, 2);
        a.swap(&b);
        assert_eq!(a.get(&2).unwrap(), 2);
        assert_eq!(b.get(&1).unwrap(), 1);
        a.copy_from(&b);
        assert_eq!(a.get(&1).unwrap(), 1);
        assert_eq!(a.size(), 1);
    }

    #[test]
    fn test_reader_sees_stable_snapshot() {
        let map: SafeMap<u64, Vec<u8>> = SafeMap::new();
        map.put(1, vec![1]);
        let before = map.get(&1).unwrap();
        map.put(1, vec![2]);
        // The value fetched earlier is unaffected by the later publish.
        assert_eq!(before, vec![1]);
        assert_eq!(map.get(&1).unwrap(), vec![2]);
        assert_eq!(map.memory_size(), 1);
    }
}
