#[macro_use]
mod tracing_helpers;

pub mod common_tests;
pub mod config;
pub mod data_structures;
pub mod error;
pub mod guard;

// Re-export the main types for convenience
pub use config::MapConfig;
pub use data_structures::{
    Entry, EntrySet, Iter, KeyComparator, KeySet, Keys, SentinelKey, SkipListMap, SubMap,
    ValueCollection, Values,
};
pub use error::MapError;
pub use guard::{DeferredGuard, DeferredRef, Guard};

/*
Benchmarks:

cargo bench -p primmap-crossbeam --bench navigable_map_benchmark

Coverage:

cargo llvm-cov --html
*/
