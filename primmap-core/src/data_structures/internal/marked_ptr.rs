// Marked pointer for index-level `right` links.
//
// Bit layout:
//   Bit 0: REMOVAL_MARK - the index node owning this pointer is leaving its level
//
// An index node is marked before it is unlinked, and a marked pointer is never
// CAS'd again: every CAS on a `right` link expects an unmarked value. This makes
// the unlink of any index node an exactly-once event.
//
// A head index node marks its (null) `right` while it is being retired by a
// level reduction, so a head level can't gain new entries while it is dropped.
//
const REMOVAL_MARK: usize = 0b01;

/// A pointer that uses the least significant bit as a removal mark.
pub(crate) struct MarkedPtr<T> {
    ptr: *mut T,
}

impl<T> Clone for MarkedPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for MarkedPtr<T> {}

impl<T> MarkedPtr<T> {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Wrap a (possibly marked) raw pointer.
    #[inline]
    pub(crate) fn new(ptr: *mut T) -> Self {
        MarkedPtr { ptr }
    }

    /// A marked null pointer: the end of a level that is being retired.
    #[inline]
    pub(crate) fn marked_null() -> Self {
        MarkedPtr {
            ptr: REMOVAL_MARK as *mut T,
        }
    }

    /// Strip the mark from a raw pointer.
    #[inline]
    pub(crate) fn unmask(ptr: *mut T) -> *mut T {
        (ptr as usize & !REMOVAL_MARK) as *mut T
    }

    // =========================================================================
    // Extraction
    // =========================================================================

    /// The clean pointer (the one you dereference).
    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut T {
        Self::unmask(self.ptr)
    }

    /// The raw pointer with the mark intact (for CAS operations).
    #[inline]
    pub(crate) fn as_raw(&self) -> *mut T {
        self.ptr
    }

    // =========================================================================
    // Predicates
    // =========================================================================

    #[inline]
    pub(crate) fn is_marked(&self) -> bool {
        (self.ptr as usize & REMOVAL_MARK) != 0
    }

    /// Null once the mark is stripped.
    #[inline]
    pub(crate) fn is_null(&self) -> bool {
        self.as_ptr().is_null()
    }

    // =========================================================================
    // Transformers
    // =========================================================================

    #[inline]
    pub(crate) fn with_mark(&self, mark: bool) -> Self {
        let bits = self.as_ptr() as usize;
        MarkedPtr {
            ptr: if mark { bits | REMOVAL_MARK } else { bits } as *mut T,
        }
    }
}
