//! Guard trait for memory reclamation strategies.
//!
//! Nodes, index towers and value boxes unlinked from a map can still be in use
//! by readers that reached them before the unlink. The `Guard` trait abstracts
//! over how such memory is retired and when it may be freed.
//!
//! # Design
//!
//! The map is generic over its reclamation strategy:
//!
//! ```text
//! SkipListMap<K, V, G: Guard>
//!     │
//!     ├── SkipListMap<i64, V, EpochGuard>      (production, primmap-crossbeam)
//!     └── SkipListMap<i64, V, DeferredGuard>   (testing)
//! ```
//!
//! Every public map operation pins `G::pin()` for its duration; iterators and
//! views hold a pin for as long as they live. Anything unlinked while a pin is
//! held stays allocated until that pin is released.
//!
//! # Example
//!
//! ```rust,ignore
//! use primmap_core::{SkipListMap, DeferredGuard};
//! use primmap_crossbeam::EpochGuard;
//!
//! // Production: epoch-based reclamation
//! let map: SkipListMap<i64, String, EpochGuard> = SkipListMap::new();
//! map.put(42, "answer".to_string());
//!
//! // Testing: deferred destruction
//! let test_map: SkipListMap<i64, String, DeferredGuard> = SkipListMap::new();
//! ```

mod deferred_guard;

use std::ops::Deref;

pub use deferred_guard::{DeferredGuard, DeferredRef};

/// A memory reclamation guard that protects concurrent access to nodes.
///
/// - **EpochGuard**: Low overhead, batched reclamation (crossbeam-epoch)
/// - **DeferredGuard**: Defers all destruction until the guard drops (testing)
///
/// # Safety Contract
///
/// Implementations must ensure:
/// 1. Pointers passed to `defer_destroy` are not freed while any `ReadGuard`
///    pinned before the call is still alive
/// 2. `GuardedRef` keeps the referenced data valid for its lifetime
///
/// # Design Note
///
/// The guard stored in a map only schedules destruction. Pinning happens per
/// operation through [`Guard::pin`].
///
pub trait Guard: Sized + Default + Send + Sync {
    /// A reference protected by a guard of this type.
    type GuardedRef<'a, T: 'a>: Deref<Target = T>;

    /// An active guard that protects reads for its lifetime.
    ///
    /// For epoch-based guards this is a pinned `crossbeam_epoch::Guard`.
    /// For deferred guards it is `()`: nothing is freed before the map drops.
    type ReadGuard: Sized;

    /// Pin an active read guard.
    fn pin() -> Self::ReadGuard;

    /// Schedule an allocation for deferred destruction.
    ///
    /// # Safety
    ///
    /// - `node` must be a valid pointer allocated by the map
    /// - `node` must be unreachable for any thread that pins after this call
    /// - `dealloc` must be the correct deallocation function for `node`
    /// - `node` must not be retired twice
    ///
    unsafe fn defer_destroy<N>(&self, node: *mut N, dealloc: unsafe fn(*mut N));

    /// Create a guarded reference from a raw pointer.
    ///
    /// # Safety
    ///
    /// - `ptr` must point to data protected by a pin held by the caller
    /// - The data must remain valid for lifetime `'a`
    ///
    unsafe fn make_ref<'a, T: 'a>(ptr: *const T) -> Self::GuardedRef<'a, T>;
}
