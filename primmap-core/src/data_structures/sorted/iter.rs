//! Weakly consistent iterators over maps and views.
//!
//! An iterator pins the map's guard for its whole life. It reflects the map
//! at some point at or after its creation, never yields a key twice, skips
//! entries deleted before it reaches them, and never fails because of
//! concurrent modification.
//!
//! The value yielded for a key is the one present when the iterator stepped
//! onto that key, cloned when it is yielded.

use std::iter::FusedIterator;
use std::ptr;

use crate::data_structures::key::SentinelKey;
use crate::data_structures::sorted::bounds::{Bounds, Span};
use crate::data_structures::sorted::entry::Entry;
use crate::data_structures::sorted::node::NodePtr;
use crate::data_structures::sorted::skip_list_map::{LT, SkipListMap};
use crate::error::MapError;
use crate::guard::Guard;

/// Position shared by all iterator flavours.
pub(crate) struct Cursor<'a, K: SentinelKey, V, G: Guard> {
    map: &'a SkipListMap<K, V, G>,
    bounds: Bounds<K>,
    next: NodePtr<K, V>,
    next_value: *mut V,
    last_returned: Option<K>,
    _pin: G::ReadGuard,
}

impl<'a, K: SentinelKey, V, G: Guard> Cursor<'a, K, V, G> {
    pub(crate) fn new(map: &'a SkipListMap<K, V, G>, span: Span<K>) -> Self {
        let pin = G::pin();
        let mut cursor = Cursor {
            map,
            bounds: span.bounds(),
            next: ptr::null_mut(),
            next_value: ptr::null_mut(),
            last_returned: None,
            _pin: pin,
        };
        unsafe { cursor.seek_start() };
        cursor
    }

    unsafe fn seek_start(&mut self) {
        unsafe {
            loop {
                let n = if self.bounds.descending {
                    self.map.hi_node(&self.bounds)
                } else {
                    self.map.lo_node(&self.bounds)
                };
                if n.is_null() {
                    return;
                }
                let v = (*n).value_ptr();
                if !v.is_null() {
                    if self.bounds.in_bounds((*n).key, self.map.comparator()) {
                        self.next = n;
                        self.next_value = v;
                    }
                    return;
                }
            }
        }
    }

    /// Step past the current position. Returns the key and value it held.
    ///
    /// The value pointer stays valid for the cursor's lifetime.
    pub(crate) fn advance(&mut self) -> Option<(K, *mut V)> {
        if self.next.is_null() {
            return None;
        }
        unsafe {
            let key = (*self.next).key;
            let value = self.next_value;
            self.last_returned = Some(key);
            if self.bounds.descending {
                self.descend(key);
            } else {
                self.ascend();
            }
            Some((key, value))
        }
    }

    unsafe fn ascend(&mut self) {
        unsafe {
            loop {
                self.next = (*self.next).get_next();
                if self.next.is_null() {
                    return;
                }
                // Skips markers and deleted nodes alike
                let v = (*self.next).value_ptr();
                if !v.is_null() {
                    if self.bounds.too_high((*self.next).key, self.map.comparator()) {
                        self.next = ptr::null_mut();
                    } else {
                        self.next_value = v;
                    }
                    return;
                }
            }
        }
    }

    unsafe fn descend(&mut self, last: K) {
        unsafe {
            loop {
                self.next = self.map.find_near(last, LT);
                if self.next.is_null() {
                    return;
                }
                let v = (*self.next).value_ptr();
                if !v.is_null() {
                    if self.bounds.too_low((*self.next).key, self.map.comparator()) {
                        self.next = ptr::null_mut();
                    } else {
                        self.next_value = v;
                    }
                    return;
                }
            }
        }
    }

    /// Remove the key last returned by `advance`.
    pub(crate) fn remove_current(&mut self) -> Result<(), MapError>
    where
        V: Clone,
    {
        let key = self.last_returned.take().ok_or(MapError::NoCurrentElement)?;
        self.map.remove(key);
        Ok(())
    }

    /// Remove `key` only if it still holds the value this cursor yielded.
    pub(crate) fn remove_yielded(&self, key: K, value: *mut V) -> bool
    where
        V: Clone,
    {
        unsafe { self.map.remove_exact(key, value) }
    }
}

/// Remove every live entry of `span` whose key and value satisfy `predicate`.
///
/// An entry whose value changed after it was tested is left alone. Returns
/// whether anything was removed.
pub(crate) fn remove_matching<K, V, G, F>(
    map: &SkipListMap<K, V, G>,
    span: Span<K>,
    mut predicate: F,
) -> bool
where
    K: SentinelKey,
    V: Clone,
    G: Guard,
    F: FnMut(K, &V) -> bool,
{
    let mut cursor = Cursor::new(map, span);
    let mut removed = false;
    while let Some((key, value)) = cursor.advance() {
        if unsafe { predicate(key, &*value) } && cursor.remove_yielded(key, value) {
            removed = true;
        }
    }
    removed
}

// =============================================================================
// Public iterators
// =============================================================================

/// Iterator over entry snapshots.
pub struct Iter<'a, K: SentinelKey, V, G: Guard> {
    cursor: Cursor<'a, K, V, G>,
}

impl<'a, K: SentinelKey, V: Clone, G: Guard> Iter<'a, K, V, G> {
    pub(crate) fn new(map: &'a SkipListMap<K, V, G>, span: Span<K>) -> Self {
        Iter {
            cursor: Cursor::new(map, span),
        }
    }

    /// Remove the entry last returned by `next` from the map.
    pub fn remove(&mut self) -> Result<(), MapError> {
        self.cursor.remove_current()
    }
}

impl<K: SentinelKey, V: Clone, G: Guard> Iterator for Iter<'_, K, V, G> {
    type Item = Entry<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.cursor.advance()?;
        Some(Entry::new(key, unsafe { (*value).clone() }))
    }
}

impl<K: SentinelKey, V: Clone, G: Guard> FusedIterator for Iter<'_, K, V, G> {}

/// Iterator over keys.
pub struct Keys<'a, K: SentinelKey, V, G: Guard> {
    cursor: Cursor<'a, K, V, G>,
}

impl<'a, K: SentinelKey, V: Clone, G: Guard> Keys<'a, K, V, G> {
    pub(crate) fn new(map: &'a SkipListMap<K, V, G>, span: Span<K>) -> Self {
        Keys {
            cursor: Cursor::new(map, span),
        }
    }

    /// Remove the key last returned by `next` from the map.
    pub fn remove(&mut self) -> Result<(), MapError> {
        self.cursor.remove_current()
    }
}

impl<K: SentinelKey, V: Clone, G: Guard> Iterator for Keys<'_, K, V, G> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        self.cursor.advance().map(|(key, _)| key)
    }
}

impl<K: SentinelKey, V: Clone, G: Guard> FusedIterator for Keys<'_, K, V, G> {}

/// Iterator over values, in key order.
pub struct Values<'a, K: SentinelKey, V, G: Guard> {
    cursor: Cursor<'a, K, V, G>,
}

impl<'a, K: SentinelKey, V: Clone, G: Guard> Values<'a, K, V, G> {
    pub(crate) fn new(map: &'a SkipListMap<K, V, G>, span: Span<K>) -> Self {
        Values {
            cursor: Cursor::new(map, span),
        }
    }

    /// Remove the mapping whose value was last returned by `next`.
    pub fn remove(&mut self) -> Result<(), MapError> {
        self.cursor.remove_current()
    }
}

impl<K: SentinelKey, V: Clone, G: Guard> Iterator for Values<'_, K, V, G> {
    type Item = V;

    fn next(&mut self) -> Option<V> {
        let (_, value) = self.cursor.advance()?;
        Some(unsafe { (*value).clone() })
    }
}

impl<K: SentinelKey, V: Clone, G: Guard> FusedIterator for Values<'_, K, V, G> {}
