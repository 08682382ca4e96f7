//! Data structures for concurrent maps.
//!
//! # Organization
//!
//! - [`key`] - Primitive key types and comparators
//! - [`sorted`] - The lock-free skip list map, its range views and iterators
//! - [`internal`] - Internal implementation details (pub(crate))

pub mod key;
pub(crate) mod internal;
pub mod sorted;

pub use key::{KeyComparator, SentinelKey};
pub use sorted::{
    Entry, EntrySet, Iter, KeySet, Keys, SkipListMap, SubMap, ValueCollection, Values,
};
