//! Lock-free navigable maps over a sorted skip list.
//!
//! Maps are parameterized by a guard type `G: Guard` that determines the
//! memory reclamation strategy:
//!
//! - `DeferredGuard`: Testing - defers destruction until guard drops
//! - `EpochGuard`: Production - epoch-based reclamation (crossbeam-epoch)

mod bounds;
pub mod entry;
pub mod iter;
mod node;
pub mod skip_list_map;
pub mod sub_map;
pub mod views;

pub use entry::Entry;
pub use iter::{Iter, Keys, Values};
pub use skip_list_map::SkipListMap;
pub use sub_map::SubMap;
pub use views::{EntrySet, KeySet, ValueCollection};
