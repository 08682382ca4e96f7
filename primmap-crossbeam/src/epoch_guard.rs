//! Epoch-based guard implementation using crossbeam-epoch.
//!
//! `EpochGuard` implements the `Guard` trait on top of the global
//! crossbeam-epoch collector. Maps parameterized with it free unlinked nodes,
//! index towers and replaced values once every thread that could still see
//! them has unpinned.
//!
//! ```text
//! SkipListMap<i64, V, EpochGuard>
//!     │
//!     ├── every operation: epoch::pin() for its duration
//!     ├── iterators: one pin for their whole life
//!     └── retired memory: guard.defer_unchecked(dealloc)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use primmap_core::SkipListMap;
//! use primmap_crossbeam::EpochGuard;
//!
//! let map: SkipListMap<i64, String, EpochGuard> = SkipListMap::new();
//! map.put(42, "answer".to_string());
//!
//! if let Some(value) = map.get_ref(42) {
//!     println!("Found: {}", *value);
//! }
//!
//! map.remove(42);
//! ```

use std::fmt;
use std::ops::Deref;

use crossbeam_epoch::{self as epoch, Guard as CrossbeamGuard};
use primmap_core::guard::Guard;

/// Reclamation through the global crossbeam-epoch collector.
///
/// The guard itself holds no state, so a map parameterized with it stays
/// `Send + Sync` for free. Each `defer_destroy` hands the allocation to the
/// collector, which runs the deallocation once every thread pinned at
/// retirement time has moved on. A long-lived iterator holds its pin and
/// delays reclamation for as long as it lives.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpochGuard;

impl EpochGuard {
    pub fn new() -> Self {
        EpochGuard
    }
}

/// A value reference carrying its own epoch pin.
///
/// The referenced value stays readable even if its mapping is replaced or
/// removed while the reference lives.
pub struct EpochRef<'a, T> {
    reference: &'a T,
    _pin: CrossbeamGuard,
}

impl<T> EpochRef<'_, T> {
    pub fn get(&self) -> &T {
        self.reference
    }
}

impl<T> Deref for EpochRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.reference
    }
}

impl<T: fmt::Display> fmt::Display for EpochRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.reference, f)
    }
}

impl<T: fmt::Debug> fmt::Debug for EpochRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EpochRef").field(self.reference).finish()
    }
}

impl Guard for EpochGuard {
    type GuardedRef<'a, T: 'a> = EpochRef<'a, T>;

    type ReadGuard = CrossbeamGuard;

    #[inline]
    fn pin() -> Self::ReadGuard {
        epoch::pin()
    }

    unsafe fn defer_destroy<N>(&self, node: *mut N, dealloc: unsafe fn(*mut N)) {
        // Re-entrant: inside a map operation this only bumps the pin count
        let pin = epoch::pin();
        unsafe { pin.defer_unchecked(move || dealloc(node)) };
    }

    unsafe fn make_ref<'a, T: 'a>(ptr: *const T) -> Self::GuardedRef<'a, T> {
        // Taken while the caller is still pinned, so the epoch can't have
        // passed the value
        EpochRef {
            reference: unsafe { &*ptr },
            _pin: epoch::pin(),
        }
    }
}
