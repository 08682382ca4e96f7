use std::fmt;
use std::ptr;

use crate::data_structures::key::{KeyComparator, SentinelKey};
use crate::data_structures::sorted::bounds::{Bounds, Span};
use crate::data_structures::sorted::entry::Entry;
use crate::data_structures::sorted::iter::{Cursor, Iter, Keys};
use crate::data_structures::sorted::node::NodePtr;
use crate::data_structures::sorted::skip_list_map::{EQ, GT, LT, SkipListMap};
use crate::data_structures::sorted::views::{EntrySet, KeySet, ValueCollection};
use crate::error::MapError;
use crate::guard::Guard;

// =============================================================================
// Range primitives on the backing map (caller must be pinned)
// =============================================================================

impl<K: SentinelKey, V, G: Guard> SkipListMap<K, V, G> {
    /// The first node at or above the lower bound.
    pub(crate) unsafe fn lo_node(&self, bounds: &Bounds<K>) -> NodePtr<K, V> {
        unsafe {
            match bounds.lo {
                None => self.find_first(),
                Some(lo) if bounds.lo_inclusive => self.find_near(lo, GT | EQ),
                Some(lo) => self.find_near(lo, GT),
            }
        }
    }

    /// The last node at or below the upper bound.
    pub(crate) unsafe fn hi_node(&self, bounds: &Bounds<K>) -> NodePtr<K, V> {
        unsafe {
            match bounds.hi {
                None => self.find_last(),
                Some(hi) if bounds.hi_inclusive => self.find_near(hi, LT | EQ),
                Some(hi) => self.find_near(hi, LT),
            }
        }
    }

    /// Whether a walk that reached `n` is still below the upper bound.
    /// Markers never end a walk.
    pub(crate) unsafe fn is_before_end(&self, n: NodePtr<K, V>, bounds: &Bounds<K>) -> bool {
        if n.is_null() {
            return false;
        }
        unsafe {
            if (*n).is_marker() {
                return true;
            }
            !bounds.too_high((*n).key, self.comparator())
        }
    }
}

/// A live view of a key range of a [`SkipListMap`], possibly in descending
/// order.
///
/// Reads and writes go straight to the backing map. Keys outside the range
/// are invisible through the view, and writing them is an error.
pub struct SubMap<'a, K: SentinelKey, V, G: Guard> {
    map: &'a SkipListMap<K, V, G>,
    bounds: Bounds<K>,
}

impl<K: SentinelKey, V, G: Guard> Clone for SubMap<'_, K, V, G> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: SentinelKey, V, G: Guard> Copy for SubMap<'_, K, V, G> {}

impl<'a, K: SentinelKey, V, G: Guard> SubMap<'a, K, V, G> {
    pub(crate) fn new(map: &'a SkipListMap<K, V, G>, bounds: Bounds<K>) -> Self {
        SubMap { map, bounds }
    }

    pub fn is_descending(&self) -> bool {
        self.bounds.descending
    }

    /// The order the view presents its keys in.
    pub fn comparator(&self) -> KeyComparator<K> {
        if self.bounds.descending {
            self.map.comparator().reversed()
        } else {
            self.map.comparator().clone()
        }
    }

    fn in_bounds(&self, key: K) -> bool {
        !key.is_sentinel() && self.bounds.in_bounds(key, self.map.comparator())
    }

    fn check_key(&self, key: K) -> Result<(), MapError> {
        self.bounds.check_key(key, self.map.comparator())
    }

    /// Walk the live nodes of the range in ascending order.
    fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(NodePtr<K, V>, *mut V),
    {
        let _pin = G::pin();
        unsafe {
            let mut n = self.map.lo_node(&self.bounds);
            while self.map.is_before_end(n, &self.bounds) {
                let v = (*n).value_ptr();
                if !v.is_null() {
                    visit(n, v);
                }
                n = (*n).get_next();
            }
        }
    }

    /// Number of mappings in the range. Walks the range.
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.walk(|_, _| count += 1);
        count
    }

    pub fn is_empty(&self) -> bool {
        let _pin = G::pin();
        unsafe {
            let n = self.map.lo_node(&self.bounds);
            !self.map.is_before_end(n, &self.bounds)
        }
    }

    pub fn contains_key(&self, key: K) -> bool {
        self.in_bounds(key) && self.map.contains_key(key)
    }

    pub fn sub_map(
        &self,
        from: K,
        from_inclusive: bool,
        to: K,
        to_inclusive: bool,
    ) -> Result<SubMap<'a, K, V, G>, MapError> {
        let bounds = self.bounds.narrow(
            Some(from),
            from_inclusive,
            Some(to),
            to_inclusive,
            self.map.comparator(),
        )?;
        Ok(SubMap::new(self.map, bounds))
    }

    pub fn head_map(&self, to: K, inclusive: bool) -> Result<SubMap<'a, K, V, G>, MapError> {
        let bounds = self
            .bounds
            .narrow(None, false, Some(to), inclusive, self.map.comparator())?;
        Ok(SubMap::new(self.map, bounds))
    }

    pub fn tail_map(&self, from: K, inclusive: bool) -> Result<SubMap<'a, K, V, G>, MapError> {
        let bounds = self
            .bounds
            .narrow(Some(from), inclusive, None, false, self.map.comparator())?;
        Ok(SubMap::new(self.map, bounds))
    }

    /// The same range in the opposite direction.
    pub fn descending_map(&self) -> SubMap<'a, K, V, G> {
        SubMap::new(self.map, self.bounds.reversed())
    }
}

impl<'a, K: SentinelKey, V: Clone, G: Guard> SubMap<'a, K, V, G> {
    pub fn get(&self, key: K) -> Option<V> {
        if self.in_bounds(key) { self.map.get(key) } else { None }
    }

    pub fn put(&self, key: K, value: V) -> Result<Option<V>, MapError> {
        self.check_key(key)?;
        Ok(self.map.put(key, value))
    }

    pub fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>, MapError> {
        self.check_key(key)?;
        Ok(self.map.put_if_absent(key, value))
    }

    pub fn replace(&self, key: K, value: V) -> Result<Option<V>, MapError> {
        self.check_key(key)?;
        Ok(self.map.replace(key, value))
    }

    pub fn remove(&self, key: K) -> Option<V> {
        if self.in_bounds(key) { self.map.remove(key) } else { None }
    }

    /// See [`SkipListMap::compute_if_absent`]. `key` must lie in the range.
    pub fn compute_if_absent<F>(&self, key: K, mapping: F) -> Result<V, MapError>
    where
        F: FnOnce(K) -> V,
    {
        self.check_key(key)?;
        Ok(self.map.compute_if_absent(key, mapping))
    }

    /// See [`SkipListMap::merge`]. `key` must lie in the range.
    pub fn merge<F>(&self, key: K, value: V, remap: F) -> Result<Option<V>, MapError>
    where
        F: Fn(&V, &V) -> Option<V>,
    {
        self.check_key(key)?;
        Ok(self.map.merge(key, value, remap))
    }

    /// Call `action` with every mapping of the range, in the view's order.
    pub fn for_each<F>(&self, mut action: F)
    where
        F: FnMut(K, &V),
    {
        let mut cursor = Cursor::new(self.map, Span::Bounded(self.bounds));
        while let Some((key, value)) = cursor.advance() {
            action(key, unsafe { &*value });
        }
    }

    /// Replace every value of the range with `function(key, value)`, in
    /// ascending key order.
    pub fn replace_all<F>(&self, mut function: F)
    where
        F: FnMut(K, &V) -> V,
    {
        self.walk(|n, _| unsafe {
            loop {
                let v = (*n).value_ptr();
                if v.is_null() {
                    break;
                }
                let r = Box::into_raw(Box::new(function((*n).key, &*v)));
                if (*n).cas_value(v, r) {
                    self.map.retire_value(v);
                    break;
                }
                drop(Box::from_raw(r));
            }
        });
    }

    /// Remove every mapping in the range.
    pub fn clear(&self) {
        let mut keys = Vec::new();
        self.walk(|n, _| unsafe { keys.push((*n).key) });
        for key in keys {
            self.map.remove(key);
        }
    }

    // =========================================================================
    // Ends of the range
    // =========================================================================

    fn lowest_key(&self) -> Result<K, MapError> {
        let _pin = G::pin();
        unsafe {
            let n = self.map.lo_node(&self.bounds);
            if self.map.is_before_end(n, &self.bounds) && !(*n).is_marker() {
                Ok((*n).key)
            } else {
                Err(MapError::NoSuchElement)
            }
        }
    }

    fn highest_key(&self) -> Result<K, MapError> {
        let _pin = G::pin();
        unsafe {
            let n = self.map.hi_node(&self.bounds);
            if !n.is_null() && self.in_bounds((*n).key) {
                Ok((*n).key)
            } else {
                Err(MapError::NoSuchElement)
            }
        }
    }

    fn lowest_entry(&self) -> Option<Entry<K, V>> {
        let _pin = G::pin();
        unsafe {
            loop {
                let n = self.map.lo_node(&self.bounds);
                if !self.map.is_before_end(n, &self.bounds) || (*n).is_marker() {
                    return None;
                }
                let v = (*n).value_ptr();
                if !v.is_null() {
                    return Some(Entry::new((*n).key, (*v).clone()));
                }
            }
        }
    }

    fn highest_entry(&self) -> Option<Entry<K, V>> {
        let _pin = G::pin();
        unsafe {
            loop {
                let n = self.map.hi_node(&self.bounds);
                if n.is_null() || !self.in_bounds((*n).key) {
                    return None;
                }
                let v = (*n).value_ptr();
                if !v.is_null() {
                    return Some(Entry::new((*n).key, (*v).clone()));
                }
            }
        }
    }

    fn remove_end(&self, highest: bool) -> Option<Entry<K, V>> {
        let _pin = G::pin();
        unsafe {
            loop {
                let n = if highest {
                    self.map.hi_node(&self.bounds)
                } else {
                    self.map.lo_node(&self.bounds)
                };
                if n.is_null() || (*n).is_marker() {
                    return None;
                }
                let key = (*n).key;
                if !self.in_bounds(key) {
                    return None;
                }
                let v = self.map.do_remove(key, |_| true);
                if !v.is_null() {
                    return Some(Entry::new(key, (*v).clone()));
                }
            }
        }
    }

    pub fn first_key(&self) -> Result<K, MapError> {
        if self.bounds.descending { self.highest_key() } else { self.lowest_key() }
    }

    pub fn last_key(&self) -> Result<K, MapError> {
        if self.bounds.descending { self.lowest_key() } else { self.highest_key() }
    }

    pub fn first_entry(&self) -> Option<Entry<K, V>> {
        if self.bounds.descending { self.highest_entry() } else { self.lowest_entry() }
    }

    pub fn last_entry(&self) -> Option<Entry<K, V>> {
        if self.bounds.descending { self.lowest_entry() } else { self.highest_entry() }
    }

    pub fn poll_first_entry(&self) -> Option<Entry<K, V>> {
        self.remove_end(self.bounds.descending)
    }

    pub fn poll_last_entry(&self) -> Option<Entry<K, V>> {
        self.remove_end(!self.bounds.descending)
    }

    // =========================================================================
    // Relational lookups
    // =========================================================================

    /// The node nearest to `key` within the range, for a relation already in
    /// the backing map's direction. Null when there is none.
    unsafe fn near_node(&self, key: K, rel: u8) -> NodePtr<K, V> {
        unsafe {
            let cmp = self.map.comparator();
            if self.bounds.too_low(key, cmp) {
                if rel & LT != 0 {
                    return ptr::null_mut();
                }
                let n = self.map.lo_node(&self.bounds);
                return if self.map.is_before_end(n, &self.bounds) && !(*n).is_marker() {
                    n
                } else {
                    ptr::null_mut()
                };
            }
            if self.bounds.too_high(key, cmp) {
                if rel & LT == 0 {
                    return ptr::null_mut();
                }
                let n = self.map.hi_node(&self.bounds);
                return if !n.is_null() && self.in_bounds((*n).key) {
                    n
                } else {
                    ptr::null_mut()
                };
            }
            let n = self.map.find_near(key, rel);
            if n.is_null() || !self.in_bounds((*n).key) {
                ptr::null_mut()
            } else {
                n
            }
        }
    }

    fn near_key(&self, key: K, rel: u8) -> Result<K, MapError> {
        if key.is_sentinel() {
            return Err(MapError::ReservedKey);
        }
        let rel = self.bounds.adjust_relation(rel);
        let _pin = G::pin();
        unsafe {
            let n = self.near_node(key, rel);
            if n.is_null() {
                Err(MapError::NoSuchElement)
            } else {
                Ok((*n).key)
            }
        }
    }

    fn near_entry(&self, key: K, rel: u8) -> Option<Entry<K, V>> {
        if key.is_sentinel() {
            return None;
        }
        let rel = self.bounds.adjust_relation(rel);
        let _pin = G::pin();
        unsafe {
            loop {
                let n = self.near_node(key, rel);
                if n.is_null() {
                    return None;
                }
                let v = (*n).value_ptr();
                if !v.is_null() {
                    return Some(Entry::new((*n).key, (*v).clone()));
                }
            }
        }
    }

    pub fn lower_key(&self, key: K) -> Result<K, MapError> {
        self.near_key(key, LT)
    }

    pub fn floor_key(&self, key: K) -> Result<K, MapError> {
        self.near_key(key, LT | EQ)
    }

    pub fn ceiling_key(&self, key: K) -> Result<K, MapError> {
        self.near_key(key, GT | EQ)
    }

    pub fn higher_key(&self, key: K) -> Result<K, MapError> {
        self.near_key(key, GT)
    }

    pub fn lower_entry(&self, key: K) -> Option<Entry<K, V>> {
        self.near_entry(key, LT)
    }

    pub fn floor_entry(&self, key: K) -> Option<Entry<K, V>> {
        self.near_entry(key, LT | EQ)
    }

    pub fn ceiling_entry(&self, key: K) -> Option<Entry<K, V>> {
        self.near_entry(key, GT | EQ)
    }

    pub fn higher_entry(&self, key: K) -> Option<Entry<K, V>> {
        self.near_entry(key, GT)
    }

    // =========================================================================
    // Views
    // =========================================================================

    pub fn key_set(&self) -> KeySet<'a, K, V, G> {
        KeySet::new(self.map, Span::Bounded(self.bounds))
    }

    pub fn navigable_key_set(&self) -> KeySet<'a, K, V, G> {
        self.key_set()
    }

    pub fn descending_key_set(&self) -> KeySet<'a, K, V, G> {
        KeySet::new(self.map, Span::Bounded(self.bounds.reversed()))
    }

    pub fn values(&self) -> ValueCollection<'a, K, V, G> {
        ValueCollection::new(self.map, Span::Bounded(self.bounds))
    }

    pub fn entry_set(&self) -> EntrySet<'a, K, V, G> {
        EntrySet::new(self.map, Span::Bounded(self.bounds))
    }

    /// Entries of the range in the view's direction.
    pub fn iter(&self) -> Iter<'a, K, V, G> {
        Iter::new(self.map, Span::Bounded(self.bounds))
    }

    pub fn keys(&self) -> Keys<'a, K, V, G> {
        Keys::new(self.map, Span::Bounded(self.bounds))
    }
}

impl<K: SentinelKey, V: Clone + PartialEq, G: Guard> SubMap<'_, K, V, G> {
    pub fn contains_value(&self, value: &V) -> bool {
        let mut found = false;
        self.walk(|_, v| unsafe { found |= *v == *value });
        found
    }

    pub fn remove_if_equals(&self, key: K, expected: &V) -> bool {
        self.in_bounds(key) && self.map.remove_if_equals(key, expected)
    }

    pub fn replace_if_equals(&self, key: K, expected: &V, value: V) -> Result<bool, MapError> {
        self.check_key(key)?;
        Ok(self.map.replace_if_equals(key, expected, value))
    }
}

impl<K: SentinelKey, V: Clone + fmt::Debug, G: Guard> fmt::Debug for SubMap<'_, K, V, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|entry| entry.into_parts()))
            .finish()
    }
}

impl<'a, K: SentinelKey, V: Clone, G: Guard> IntoIterator for &SubMap<'a, K, V, G> {
    type Item = Entry<K, V>;
    type IntoIter = Iter<'a, K, V, G>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::DeferredGuard;

    type Map = SkipListMap<i64, i64, DeferredGuard>;

    fn filled(keys: &[i64]) -> Map {
        keys.iter().map(|&k| (k, k * 10)).collect()
    }

    fn keys_of(sub: &SubMap<'_, i64, i64, DeferredGuard>) -> Vec<i64> {
        sub.keys().collect()
    }

    #[test]
    fn test_half_open_range() {
        let map = filled(&[1, 2, 4, 8, 9]);
        let sub = map.sub_map(2, true, 8, false).unwrap();
        assert_eq!(keys_of(&sub), vec![2, 4]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.first_key(), Ok(2));
        assert_eq!(sub.last_key(), Ok(4));
        assert!(!sub.contains_key(8));
        assert_eq!(sub.get(9), None);
    }

    #[test]
    fn test_inconsistent_range() {
        let map = filled(&[1, 2]);
        assert_eq!(
            map.sub_map(5, true, 1, true).unwrap_err(),
            MapError::InconsistentRange
        );
    }

    #[test]
    fn test_writes_are_range_checked() {
        let map = filled(&[]);
        let sub = map.sub_map(0, true, 10, true).unwrap();
        assert_eq!(sub.put(5, 50), Ok(None));
        assert_eq!(sub.put(11, 1), Err(MapError::KeyOutOfRange));
        assert_eq!(sub.put_if_absent(i64::MIN, 1), Err(MapError::ReservedKey));
        assert_eq!(map.get(5), Some(50));
        assert!(!map.contains_key(11));
    }

    #[test]
    fn test_view_is_live() {
        let map = filled(&[1, 5]);
        let sub = map.sub_map(0, true, 10, false).unwrap();
        map.put(3, 30);
        map.put(20, 200);
        assert_eq!(keys_of(&sub), vec![1, 3, 5]);
        map.remove(1);
        assert_eq!(sub.first_key(), Ok(3));
    }

    #[test]
    fn test_descending_view() {
        let map = filled(&[1, 2, 3, 4, 5]);
        let desc = map.descending_map();
        assert_eq!(keys_of(&desc), vec![5, 4, 3, 2, 1]);
        assert_eq!(desc.first_key(), Ok(5));
        assert_eq!(desc.last_key(), Ok(1));
        // Relations follow the view's order
        assert_eq!(desc.higher_key(3), Ok(2));
        assert_eq!(desc.lower_key(3), Ok(4));
        assert_eq!(desc.ceiling_key(6), Ok(5));
        assert_eq!(desc.floor_key(0), Ok(1));
        assert!(desc.comparator().is_reversed());
    }

    #[test]
    fn test_nested_ranges() {
        let map = filled(&(0..20).collect::<Vec<_>>());
        let sub = map.sub_map(5, true, 15, true).unwrap();
        let nested = sub.head_map(8, false).unwrap();
        assert_eq!(keys_of(&nested), vec![5, 6, 7]);
        let tail = sub.tail_map(13, false).unwrap();
        assert_eq!(keys_of(&tail), vec![14, 15]);
        assert_eq!(
            sub.sub_map(4, true, 6, true).unwrap_err(),
            MapError::KeyOutOfRange
        );

        let desc = sub.descending_map();
        let desc_head = desc.head_map(12, true).unwrap();
        assert_eq!(keys_of(&desc_head), vec![15, 14, 13, 12]);
    }

    #[test]
    fn test_relations_clamp_to_bounds() {
        let map = filled(&[1, 3, 5, 7, 9]);
        let sub = map.sub_map(3, true, 7, true).unwrap();
        assert_eq!(sub.ceiling_key(0), Ok(3));
        assert_eq!(sub.floor_key(100), Ok(7));
        assert_eq!(sub.lower_key(3), Err(MapError::NoSuchElement));
        assert_eq!(sub.higher_key(7), Err(MapError::NoSuchElement));
        assert!(sub.floor_entry(2).is_none());
        assert_eq!(sub.higher_entry(4).map(|e| e.key()), Some(5));
    }

    #[test]
    fn test_poll_and_clear() {
        let map = filled(&[1, 2, 3, 4, 5, 6]);
        let sub = map.sub_map(2, true, 5, true).unwrap();
        assert_eq!(sub.poll_first_entry().map(|e| e.key()), Some(2));
        assert_eq!(sub.poll_last_entry().map(|e| e.key()), Some(5));
        sub.clear();
        assert!(sub.is_empty());
        let remaining: Vec<i64> = map.keys().collect();
        assert_eq!(remaining, vec![1, 6]);
    }

    #[test]
    fn test_contains_key_respects_bounds() {
        let map = filled(&[1, 2, 3]);
        let sub = map.sub_map(2, true, 3, false).unwrap();
        assert!(sub.contains_key(2));
        assert!(!sub.contains_key(1));
        assert!(!sub.contains_key(3));
        assert!(!sub.contains_key(i64::MIN));
        assert!(sub.key_set().contains(2));
        assert!(!sub.key_set().contains(3));
    }

    #[test]
    fn test_compute_and_merge_in_range() {
        let map = filled(&[1, 5, 20]);
        let sub = map.sub_map(0, true, 10, true).unwrap();

        assert_eq!(sub.compute_if_absent(5, |_| 0), Ok(50));
        assert_eq!(sub.compute_if_absent(6, |k| k * 100), Ok(600));
        assert_eq!(sub.compute_if_absent(11, |_| 0), Err(MapError::KeyOutOfRange));
        assert_eq!(map.get(6), Some(600));
        assert!(!map.contains_key(11));

        assert_eq!(sub.merge(1, 5, |a, b| Some(a + b)), Ok(Some(15)));
        assert_eq!(sub.merge(7, 70, |a, b| Some(a + b)), Ok(Some(70)));
        assert_eq!(sub.merge(6, 0, |_, _| None), Ok(None));
        assert_eq!(sub.merge(20, 1, |a, b| Some(a + b)), Err(MapError::KeyOutOfRange));
        assert!(!map.contains_key(6));
        assert_eq!(map.get(20), Some(200));
    }

    #[test]
    fn test_bulk_operations_stay_in_range() {
        let map = filled(&[1, 2, 3, 4, 5]);
        let sub = map.sub_map(2, true, 4, true).unwrap();

        let mut seen = Vec::new();
        sub.for_each(|k, v| seen.push((k, *v)));
        assert_eq!(seen, vec![(2, 20), (3, 30), (4, 40)]);

        let mut seen_desc = Vec::new();
        sub.descending_map().for_each(|k, _| seen_desc.push(k));
        assert_eq!(seen_desc, vec![4, 3, 2]);

        sub.replace_all(|k, v| v + k);
        let values: Vec<i64> = map.values().to_vec();
        assert_eq!(values, vec![10, 22, 33, 44, 50]);
    }

    #[test]
    fn test_empty_range() {
        let map = filled(&[1, 10]);
        let sub = map.sub_map(2, true, 9, true).unwrap();
        assert!(sub.is_empty());
        assert_eq!(sub.first_key(), Err(MapError::NoSuchElement));
        assert!(sub.last_entry().is_none());
        assert!(sub.poll_first_entry().is_none());
    }
}
