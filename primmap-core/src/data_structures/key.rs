//! Primitive key types and the orderings maps are built over.
//!
//! Every key type reserves one value, [`SentinelKey::EMPTY`], which is never a
//! legal user key. The base list uses it to tag its header node and the marker
//! nodes appended behind deleted entries.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A copyable primitive with a total order and one reserved sentinel value.
pub trait SentinelKey: Copy + Send + Sync + fmt::Debug + 'static {
    /// The reserved value tagging header and marker nodes.
    const EMPTY: Self;

    /// Whether this key is the reserved sentinel.
    fn is_sentinel(self) -> bool;

    /// The natural total order of the primitive.
    fn natural_cmp(self, other: Self) -> Ordering;
}

impl SentinelKey for i64 {
    const EMPTY: Self = i64::MIN;

    #[inline]
    fn is_sentinel(self) -> bool {
        self == Self::EMPTY
    }

    #[inline]
    fn natural_cmp(self, other: Self) -> Ordering {
        self.cmp(&other)
    }
}

impl SentinelKey for i32 {
    const EMPTY: Self = i32::MIN;

    #[inline]
    fn is_sentinel(self) -> bool {
        self == Self::EMPTY
    }

    #[inline]
    fn natural_cmp(self, other: Self) -> Ordering {
        self.cmp(&other)
    }
}

/// Doubles are ordered by [`f64::total_cmp`], so `-0.0 < 0.0` and NaNs are
/// ordinary keys. The smallest positive subnormal value (bit pattern `1`) is
/// reserved.
impl SentinelKey for f64 {
    const EMPTY: Self = f64::from_bits(1);

    #[inline]
    fn is_sentinel(self) -> bool {
        self.to_bits() == Self::EMPTY.to_bits()
    }

    #[inline]
    fn natural_cmp(self, other: Self) -> Ordering {
        self.total_cmp(&other)
    }
}

type CompareFn<K> = dyn Fn(K, K) -> Ordering + Send + Sync;

/// The ordering a map sorts its keys by.
///
/// Either the key's natural order or a user-supplied total order, optionally
/// reversed. Cloning shares the underlying closure.
pub struct KeyComparator<K> {
    custom: Option<Arc<CompareFn<K>>>,
    reversed: bool,
}

impl<K: SentinelKey> KeyComparator<K> {
    /// The key type's natural order.
    pub fn natural() -> Self {
        KeyComparator {
            custom: None,
            reversed: false,
        }
    }

    /// The reverse of the key type's natural order.
    pub fn reverse_order() -> Self {
        KeyComparator {
            custom: None,
            reversed: true,
        }
    }

    /// A custom total order.
    ///
    /// The closure must be a consistent total order over every key the map
    /// will ever see; the map never calls it with the sentinel.
    pub fn from_fn<F>(compare: F) -> Self
    where
        F: Fn(K, K) -> Ordering + Send + Sync + 'static,
    {
        KeyComparator {
            custom: Some(Arc::new(compare)),
            reversed: false,
        }
    }

    /// This order, reversed.
    pub fn reversed(&self) -> Self {
        KeyComparator {
            custom: self.custom.clone(),
            reversed: !self.reversed,
        }
    }

    #[inline]
    pub fn compare(&self, a: K, b: K) -> Ordering {
        let ordering = match &self.custom {
            None => a.natural_cmp(b),
            Some(compare) => compare(a, b),
        };
        if self.reversed {
            ordering.reverse()
        } else {
            ordering
        }
    }

    /// True for the unmodified natural order.
    pub fn is_natural(&self) -> bool {
        self.custom.is_none() && !self.reversed
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// Whether two comparators are known to impose the same order.
    ///
    /// Custom closures are only recognised as equal when they are the same
    /// shared instance.
    pub fn same_order(&self, other: &Self) -> bool {
        let same_fn = match (&self.custom, &other.custom) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        same_fn && self.reversed == other.reversed
    }
}

impl<K> Clone for KeyComparator<K> {
    fn clone(&self) -> Self {
        KeyComparator {
            custom: self.custom.clone(),
            reversed: self.reversed,
        }
    }
}

impl<K: SentinelKey> Default for KeyComparator<K> {
    fn default() -> Self {
        Self::natural()
    }
}

impl<K> fmt::Debug for KeyComparator<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyComparator")
            .field("custom", &self.custom.is_some())
            .field("reversed", &self.reversed)
            .finish()
    }
}
