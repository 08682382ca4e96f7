//! Epoch-based reclamation and ready-made primitive maps for primmap.
//!
//! This crate provides `EpochGuard`, an implementation of the `Guard` trait
//! using crossbeam-epoch, and map aliases for the common key primitives.
//!
//! # Usage
//!
//! ```ignore
//! use primmap_crossbeam::{ConcurrentLongMap, create_sorted_map};
//!
//! let prices: ConcurrentLongMap<f64> = create_sorted_map();
//! prices.put(1_700_000_000, 101.5);
//! prices.put(1_700_000_060, 101.7);
//!
//! let latest = prices.floor_entry(1_700_000_030);
//! ```

pub mod epoch_guard;

use primmap_core::{KeyComparator, SentinelKey, SkipListMap};

// Export the Guard implementation
pub use epoch_guard::{EpochGuard, EpochRef};

/// Navigable map keyed by `i64`. `i64::MIN` is reserved.
pub type ConcurrentLongMap<V> = SkipListMap<i64, V, EpochGuard>;

/// Navigable map keyed by `i32`. `i32::MIN` is reserved.
pub type ConcurrentIntMap<V> = SkipListMap<i32, V, EpochGuard>;

/// Navigable map keyed by `f64` in total order. The smallest positive
/// subnormal, `f64::from_bits(1)`, is reserved.
pub type ConcurrentDoubleMap<V> = SkipListMap<f64, V, EpochGuard>;

/// An empty epoch-backed map in natural key order.
pub fn create_sorted_map<K: SentinelKey, V>() -> SkipListMap<K, V, EpochGuard> {
    SkipListMap::new()
}

/// An empty epoch-backed map ordered by `comparator`.
pub fn create_sorted_map_with<K: SentinelKey, V>(
    comparator: KeyComparator<K>,
) -> SkipListMap<K, V, EpochGuard> {
    SkipListMap::with_comparator(comparator)
}

/// An empty epoch-backed map in reverse natural key order.
pub fn create_reversed_map<K: SentinelKey, V>() -> SkipListMap<K, V, EpochGuard> {
    SkipListMap::reversed()
}
