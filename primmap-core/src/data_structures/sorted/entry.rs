use std::cmp::Ordering;
use std::fmt;

use crate::data_structures::key::SentinelKey;

/// An immutable snapshot of one mapping.
///
/// Entries are copies taken at the moment they were read; later changes to
/// the map are not reflected. Entries order by key (natural order), then by
/// value.
#[derive(Clone)]
pub struct Entry<K, V> {
    key: K,
    value: V,
}

impl<K: SentinelKey, V> Entry<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Entry { key, value }
    }

    pub fn key(&self) -> K {
        self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}

impl<K: SentinelKey, V: PartialEq> PartialEq for Entry<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key.natural_cmp(other.key) == Ordering::Equal && self.value == other.value
    }
}

impl<K: SentinelKey, V: Eq> Eq for Entry<K, V> {}

impl<K: SentinelKey, V: PartialOrd> PartialOrd for Entry<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.key.natural_cmp(other.key) {
            Ordering::Equal => self.value.partial_cmp(&other.value),
            ordering => Some(ordering),
        }
    }
}

impl<K: SentinelKey, V: Ord> Ord for Entry<K, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .natural_cmp(other.key)
            .then_with(|| self.value.cmp(&other.value))
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Entry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}={:?}", self.key, self.value)
    }
}

impl<K: SentinelKey, V> From<(K, V)> for Entry<K, V> {
    fn from((key, value): (K, V)) -> Self {
        Entry::new(key, value)
    }
}
