use std::cmp::Ordering;

use crate::data_structures::key::{KeyComparator, SentinelKey};
use crate::data_structures::sorted::skip_list_map::LT;
use crate::error::MapError;

/// Range and direction of a sub-map view.
///
/// `None` bounds are open. Bounds are always expressed in the backing map's
/// order; `descending` only flips the direction the view presents.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bounds<K> {
    pub(crate) lo: Option<K>,
    pub(crate) lo_inclusive: bool,
    pub(crate) hi: Option<K>,
    pub(crate) hi_inclusive: bool,
    pub(crate) descending: bool,
}

/// The shape a view projects from its backing map.
///
/// Views of the whole map go straight to the map's own operations; bounded
/// views go through the sub-map logic.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Span<K> {
    Full,
    Bounded(Bounds<K>),
}

impl<K: SentinelKey> Span<K> {
    /// The bounds iteration should respect. `Full` is the open ascending range.
    pub(crate) fn bounds(&self) -> Bounds<K> {
        match self {
            Span::Full => Bounds::unbounded(false),
            Span::Bounded(bounds) => *bounds,
        }
    }

    pub(crate) fn is_descending(&self) -> bool {
        matches!(self, Span::Bounded(bounds) if bounds.descending)
    }
}

impl<K: SentinelKey> Bounds<K> {
    pub(crate) fn unbounded(descending: bool) -> Self {
        Bounds {
            lo: None,
            lo_inclusive: false,
            hi: None,
            hi_inclusive: false,
            descending,
        }
    }

    /// Build a range, rejecting sentinel bounds and `lo > hi`.
    pub(crate) fn new(
        lo: Option<K>,
        lo_inclusive: bool,
        hi: Option<K>,
        hi_inclusive: bool,
        descending: bool,
        cmp: &KeyComparator<K>,
    ) -> Result<Self, MapError> {
        if lo.is_some_and(|k| k.is_sentinel()) || hi.is_some_and(|k| k.is_sentinel()) {
            return Err(MapError::ReservedKey);
        }
        if let (Some(lo), Some(hi)) = (lo, hi) {
            if cmp.compare(lo, hi) == Ordering::Greater {
                return Err(MapError::InconsistentRange);
            }
        }
        Ok(Bounds {
            lo,
            lo_inclusive,
            hi,
            hi_inclusive,
            descending,
        })
    }

    // =========================================================================
    // Membership
    // =========================================================================

    pub(crate) fn too_low(&self, key: K, cmp: &KeyComparator<K>) -> bool {
        match self.lo {
            None => false,
            Some(lo) => match cmp.compare(key, lo) {
                Ordering::Less => true,
                Ordering::Equal => !self.lo_inclusive,
                Ordering::Greater => false,
            },
        }
    }

    pub(crate) fn too_high(&self, key: K, cmp: &KeyComparator<K>) -> bool {
        match self.hi {
            None => false,
            Some(hi) => match cmp.compare(key, hi) {
                Ordering::Greater => true,
                Ordering::Equal => !self.hi_inclusive,
                Ordering::Less => false,
            },
        }
    }

    pub(crate) fn in_bounds(&self, key: K, cmp: &KeyComparator<K>) -> bool {
        !self.too_low(key, cmp) && !self.too_high(key, cmp)
    }

    pub(crate) fn check_key(&self, key: K, cmp: &KeyComparator<K>) -> Result<(), MapError> {
        if key.is_sentinel() {
            Err(MapError::ReservedKey)
        } else if self.in_bounds(key, cmp) {
            Ok(())
        } else {
            Err(MapError::KeyOutOfRange)
        }
    }

    // =========================================================================
    // Derived views
    // =========================================================================

    /// Translate a relation into the backing map's direction.
    pub(crate) fn adjust_relation(&self, rel: u8) -> u8 {
        if !self.descending {
            rel
        } else if rel & LT == 0 {
            rel | LT
        } else {
            rel & !LT
        }
    }

    pub(crate) fn reversed(&self) -> Self {
        Bounds {
            descending: !self.descending,
            ..*self
        }
    }

    /// A nested range. `from`/`to` are given in this view's direction and
    /// must lie within the current bounds; open ends inherit them.
    pub(crate) fn narrow(
        &self,
        mut from: Option<K>,
        mut from_inclusive: bool,
        mut to: Option<K>,
        mut to_inclusive: bool,
        cmp: &KeyComparator<K>,
    ) -> Result<Self, MapError> {
        if from.is_some_and(|k| k.is_sentinel()) || to.is_some_and(|k| k.is_sentinel()) {
            return Err(MapError::ReservedKey);
        }
        if self.descending {
            std::mem::swap(&mut from, &mut to);
            std::mem::swap(&mut from_inclusive, &mut to_inclusive);
        }
        if let Some(lo) = self.lo {
            match from {
                None => {
                    from = Some(lo);
                    from_inclusive = self.lo_inclusive;
                }
                Some(key) => {
                    let c = cmp.compare(key, lo);
                    if c == Ordering::Less
                        || (c == Ordering::Equal && !self.lo_inclusive && from_inclusive)
                    {
                        return Err(MapError::KeyOutOfRange);
                    }
                }
            }
        }
        if let Some(hi) = self.hi {
            match to {
                None => {
                    to = Some(hi);
                    to_inclusive = self.hi_inclusive;
                }
                Some(key) => {
                    let c = cmp.compare(key, hi);
                    if c == Ordering::Greater
                        || (c == Ordering::Equal && !self.hi_inclusive && to_inclusive)
                    {
                        return Err(MapError::KeyOutOfRange);
                    }
                }
            }
        }
        Bounds::new(from, from_inclusive, to, to_inclusive, self.descending, cmp)
    }
}
