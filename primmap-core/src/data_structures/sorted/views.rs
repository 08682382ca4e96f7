//! Live collection views over a map or one of its ranges.
//!
//! Views hold no state of their own. Every call goes to the backing map,
//! through the sub-map logic when the view is bounded or descending.

use std::fmt;

use crate::data_structures::key::{KeyComparator, SentinelKey};
use crate::data_structures::sorted::bounds::Span;
use crate::data_structures::sorted::entry::Entry;
use crate::data_structures::sorted::iter::{remove_matching, Iter, Keys, Values};
use crate::data_structures::sorted::skip_list_map::SkipListMap;
use crate::data_structures::sorted::sub_map::SubMap;
use crate::error::MapError;
use crate::guard::Guard;

/// Resolve a span to the sub-map serving it, if it is bounded.
fn bounded<'a, K: SentinelKey, V, G: Guard>(
    map: &'a SkipListMap<K, V, G>,
    span: &Span<K>,
) -> Option<SubMap<'a, K, V, G>> {
    match span {
        Span::Full => None,
        Span::Bounded(bounds) => Some(SubMap::new(map, *bounds)),
    }
}

// =============================================================================
// KeySet
// =============================================================================

/// The keys of a map or range, as a navigable set.
pub struct KeySet<'a, K: SentinelKey, V, G: Guard> {
    map: &'a SkipListMap<K, V, G>,
    span: Span<K>,
}

impl<K: SentinelKey, V, G: Guard> Clone for KeySet<'_, K, V, G> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: SentinelKey, V, G: Guard> Copy for KeySet<'_, K, V, G> {}

impl<'a, K: SentinelKey, V: Clone, G: Guard> KeySet<'a, K, V, G> {
    pub(crate) fn new(map: &'a SkipListMap<K, V, G>, span: Span<K>) -> Self {
        KeySet { map, span }
    }

    fn sub(&self) -> Option<SubMap<'a, K, V, G>> {
        bounded(self.map, &self.span)
    }

    pub fn len(&self) -> usize {
        match self.sub() {
            None => self.map.len(),
            Some(sub) => sub.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.sub() {
            None => self.map.is_empty(),
            Some(sub) => sub.is_empty(),
        }
    }

    pub fn contains(&self, key: K) -> bool {
        match self.sub() {
            None => self.map.contains_key(key),
            Some(sub) => sub.contains_key(key),
        }
    }

    /// Remove `key` from the backing map. Returns whether it was present.
    pub fn remove(&self, key: K) -> bool {
        match self.sub() {
            None => self.map.remove(key).is_some(),
            Some(sub) => sub.remove(key).is_some(),
        }
    }

    pub fn clear(&self) {
        match self.sub() {
            None => self.map.clear(),
            Some(sub) => sub.clear(),
        }
    }

    pub fn comparator(&self) -> KeyComparator<K> {
        match self.sub() {
            None => self.map.comparator().clone(),
            Some(sub) => sub.comparator(),
        }
    }

    pub fn first(&self) -> Result<K, MapError> {
        match self.sub() {
            None => self.map.first_key(),
            Some(sub) => sub.first_key(),
        }
    }

    pub fn last(&self) -> Result<K, MapError> {
        match self.sub() {
            None => self.map.last_key(),
            Some(sub) => sub.last_key(),
        }
    }

    pub fn lower(&self, key: K) -> Result<K, MapError> {
        match self.sub() {
            None => self.map.lower_key(key),
            Some(sub) => sub.lower_key(key),
        }
    }

    pub fn floor(&self, key: K) -> Result<K, MapError> {
        match self.sub() {
            None => self.map.floor_key(key),
            Some(sub) => sub.floor_key(key),
        }
    }

    pub fn ceiling(&self, key: K) -> Result<K, MapError> {
        match self.sub() {
            None => self.map.ceiling_key(key),
            Some(sub) => sub.ceiling_key(key),
        }
    }

    pub fn higher(&self, key: K) -> Result<K, MapError> {
        match self.sub() {
            None => self.map.higher_key(key),
            Some(sub) => sub.higher_key(key),
        }
    }

    /// Remove and return the first key.
    pub fn poll_first(&self) -> Result<K, MapError> {
        let entry = match self.sub() {
            None => self.map.poll_first_entry(),
            Some(sub) => sub.poll_first_entry(),
        };
        entry.map(|e| e.key()).ok_or(MapError::NoSuchElement)
    }

    /// Remove and return the last key.
    pub fn poll_last(&self) -> Result<K, MapError> {
        let entry = match self.sub() {
            None => self.map.poll_last_entry(),
            Some(sub) => sub.poll_last_entry(),
        };
        entry.map(|e| e.key()).ok_or(MapError::NoSuchElement)
    }

    pub fn iter(&self) -> Keys<'a, K, V, G> {
        Keys::new(self.map, self.span)
    }

    pub fn descending_iter(&self) -> Keys<'a, K, V, G> {
        self.descending_set().iter()
    }

    pub fn descending_set(&self) -> KeySet<'a, K, V, G> {
        KeySet::new(self.map, Span::Bounded(self.span.bounds().reversed()))
    }

    pub fn sub_set(
        &self,
        from: K,
        from_inclusive: bool,
        to: K,
        to_inclusive: bool,
    ) -> Result<KeySet<'a, K, V, G>, MapError> {
        let sub = match self.sub() {
            None => self.map.sub_map(from, from_inclusive, to, to_inclusive)?,
            Some(sub) => sub.sub_map(from, from_inclusive, to, to_inclusive)?,
        };
        Ok(sub.key_set())
    }

    pub fn head_set(&self, to: K, inclusive: bool) -> Result<KeySet<'a, K, V, G>, MapError> {
        let sub = match self.sub() {
            None => self.map.head_map(to, inclusive)?,
            Some(sub) => sub.head_map(to, inclusive)?,
        };
        Ok(sub.key_set())
    }

    pub fn tail_set(&self, from: K, inclusive: bool) -> Result<KeySet<'a, K, V, G>, MapError> {
        let sub = match self.sub() {
            None => self.map.tail_map(from, inclusive)?,
            Some(sub) => sub.tail_map(from, inclusive)?,
        };
        Ok(sub.key_set())
    }

    pub fn to_vec(&self) -> Vec<K> {
        self.iter().collect()
    }
}

impl<'a, K: SentinelKey, V: Clone, G: Guard> IntoIterator for &KeySet<'a, K, V, G> {
    type Item = K;
    type IntoIter = Keys<'a, K, V, G>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: SentinelKey, V: Clone, G: Guard> fmt::Debug for KeySet<'_, K, V, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

// =============================================================================
// ValueCollection
// =============================================================================

/// The values of a map or range, in key order.
pub struct ValueCollection<'a, K: SentinelKey, V, G: Guard> {
    map: &'a SkipListMap<K, V, G>,
    span: Span<K>,
}

impl<'a, K: SentinelKey, V: Clone, G: Guard> ValueCollection<'a, K, V, G> {
    pub(crate) fn new(map: &'a SkipListMap<K, V, G>, span: Span<K>) -> Self {
        ValueCollection { map, span }
    }

    pub fn len(&self) -> usize {
        match bounded(self.map, &self.span) {
            None => self.map.len(),
            Some(sub) => sub.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match bounded(self.map, &self.span) {
            None => self.map.is_empty(),
            Some(sub) => sub.is_empty(),
        }
    }

    pub fn clear(&self) {
        match bounded(self.map, &self.span) {
            None => self.map.clear(),
            Some(sub) => sub.clear(),
        }
    }

    pub fn iter(&self) -> Values<'a, K, V, G> {
        Values::new(self.map, self.span)
    }

    /// Remove every mapping whose value satisfies `predicate`. Returns whether
    /// anything was removed.
    pub fn remove_if<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(&V) -> bool,
    {
        remove_matching(self.map, self.span, |_, value| predicate(value))
    }

    pub fn to_vec(&self) -> Vec<V> {
        self.iter().collect()
    }
}

impl<K: SentinelKey, V: Clone + PartialEq, G: Guard> ValueCollection<'_, K, V, G> {
    pub fn contains(&self, value: &V) -> bool {
        match bounded(self.map, &self.span) {
            None => self.map.contains_value(value),
            Some(sub) => sub.contains_value(value),
        }
    }
}

impl<'a, K: SentinelKey, V: Clone, G: Guard> IntoIterator for &ValueCollection<'a, K, V, G> {
    type Item = V;
    type IntoIter = Values<'a, K, V, G>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// EntrySet
// =============================================================================

/// The mappings of a map or range, as entry snapshots.
pub struct EntrySet<'a, K: SentinelKey, V, G: Guard> {
    map: &'a SkipListMap<K, V, G>,
    span: Span<K>,
}

impl<'a, K: SentinelKey, V: Clone, G: Guard> EntrySet<'a, K, V, G> {
    pub(crate) fn new(map: &'a SkipListMap<K, V, G>, span: Span<K>) -> Self {
        EntrySet { map, span }
    }

    pub fn len(&self) -> usize {
        match bounded(self.map, &self.span) {
            None => self.map.len(),
            Some(sub) => sub.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match bounded(self.map, &self.span) {
            None => self.map.is_empty(),
            Some(sub) => sub.is_empty(),
        }
    }

    pub fn clear(&self) {
        match bounded(self.map, &self.span) {
            None => self.map.clear(),
            Some(sub) => sub.clear(),
        }
    }

    pub fn iter(&self) -> Iter<'a, K, V, G> {
        Iter::new(self.map, self.span)
    }

    /// Remove every mapping whose entry satisfies `predicate`. Returns whether
    /// anything was removed.
    pub fn remove_if<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(&Entry<K, V>) -> bool,
    {
        remove_matching(self.map, self.span, |key, value| {
            predicate(&Entry::new(key, value.clone()))
        })
    }

    pub fn to_vec(&self) -> Vec<Entry<K, V>> {
        self.iter().collect()
    }
}

impl<K: SentinelKey, V: Clone + PartialEq, G: Guard> EntrySet<'_, K, V, G> {
    /// Whether the entry's key is in the view and maps to an equal value.
    pub fn contains(&self, entry: &Entry<K, V>) -> bool {
        let current = match bounded(self.map, &self.span) {
            None => self.map.get(entry.key()),
            Some(sub) => sub.get(entry.key()),
        };
        current.as_ref() == Some(entry.value())
    }

    /// Remove the entry's key only while it maps to an equal value.
    pub fn remove(&self, entry: &Entry<K, V>) -> bool {
        match bounded(self.map, &self.span) {
            None => self.map.remove_if_equals(entry.key(), entry.value()),
            Some(sub) => sub.remove_if_equals(entry.key(), entry.value()),
        }
    }
}

impl<'a, K: SentinelKey, V: Clone, G: Guard> IntoIterator for &EntrySet<'a, K, V, G> {
    type Item = Entry<K, V>;
    type IntoIter = Iter<'a, K, V, G>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
