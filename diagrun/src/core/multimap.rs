//! Bidirectional one-to-many map.
//!
//! Forward: key -> set of values. The inverse index (value -> set of keys) is
//! updated on every insert, so lookups in both directions stay consistent.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiMultiMap<K: Ord + Clone, V: Ord + Clone> {
    forward: BTreeMap<K, BTreeSet<V>>,
    inverse: BTreeMap<V, BTreeSet<K>>,
}

impl<K: Ord + Clone, V: Ord + Clone> Default for BiMultiMap<K, V> {
    fn default() -> Self {
        Self {
            forward: BTreeMap::new(),
            inverse: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone, V: Ord + Clone> BiMultiMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` to the set under `key`. Returns false if already present.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        let added = self
            .forward
            .entry(key.clone())
            .or_default()
            .insert(value.clone());
        if added {
            self.inverse.entry(value).or_default().insert(key);
        }
        added
    }

    pub fn get(&self, key: &K) -> Option<&BTreeSet<V>> {
        self.forward.get(key)
    }

    /// Keys whose value set contains `value`.
    pub fn get_inverse(&self, value: &V) -> Option<&BTreeSet<K>> {
        self.inverse.get(value)
    }
}

impl<K: Ord + Clone, V: Ord + Clone> FromIterator<(K, V)> for BiMultiMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<K: Ord + Clone, V: Ord + Clone> Extend<(K, V)> for BiMultiMap<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(map: &BiMultiMap<&'static str, u32>, value: u32) -> Vec<&'static str> {
        map.get_inverse(&value)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    #[test]
    fn inverse_groups_shared_values() {
        let mut map: BiMultiMap<&str, u32> = [("a", 1), ("b", 2)].into_iter().collect();
        map.insert("c", 1);
        assert_eq!(keys(&map, 1), vec!["a", "c"]);
        assert_eq!(keys(&map, 2), vec!["b"]);
    }

    #[test]
    fn multi_valued_keys_track_each_value() {
        let mut map: BiMultiMap<&str, u32> =
            [("a", 1), ("b", 2), ("c", 1)].into_iter().collect();
        map.insert("c", 2);
        assert_eq!(keys(&map, 2), vec!["b", "c"]);
        assert_eq!(keys(&map, 1), vec!["a", "c"]);
        assert_eq!(
            map.get(&"c").map(|set| set.iter().copied().collect::<Vec<_>>()),
            Some(vec![1, 2])
        );
        assert_eq!(keys(&map, 7), Vec::<&str>::new());
    }

    #[test]
    fn duplicate_insert_is_reported() {
        let mut map: BiMultiMap<&str, u32> = BiMultiMap::new();
        assert!(map.insert("x", 2));
        assert!(!map.insert("x", 2));
        assert_eq!(map.get(&"x").map(BTreeSet::len), Some(1));
    }
}
