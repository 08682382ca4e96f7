//! Construction-time configuration for maps.
//!
//! ```rust,ignore
//! use primmap_core::{KeyComparator, MapConfig, SkipListMap, DeferredGuard};
//!
//! let config = MapConfig::new()
//!     .comparator(KeyComparator::reverse_order())
//!     .counter_stripes(16);
//! let map: SkipListMap<i64, String, DeferredGuard> = SkipListMap::with_config(config);
//! ```

use std::thread;

use crate::data_structures::{KeyComparator, SentinelKey};

/// Options applied when a map is created.
#[derive(Debug, Clone)]
pub struct MapConfig<K> {
    pub(crate) comparator: KeyComparator<K>,
    pub(crate) counter_stripes: usize,
}

impl<K: SentinelKey> MapConfig<K> {
    /// Natural key order and one counter stripe per available core.
    pub fn new() -> Self {
        MapConfig {
            comparator: KeyComparator::natural(),
            counter_stripes: default_stripes(),
        }
    }

    /// Order keys with `comparator`.
    pub fn comparator(mut self, comparator: KeyComparator<K>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Number of cells in the element counter, rounded up to a power of two.
    pub fn counter_stripes(mut self, stripes: usize) -> Self {
        self.counter_stripes = stripes.max(1);
        self
    }
}

impl<K: SentinelKey> Default for MapConfig<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn default_stripes() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .next_power_of_two()
}
