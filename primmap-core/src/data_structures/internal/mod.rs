//! Internal implementation details.
//!
//! These are pub(crate) and not intended for external use.

pub(crate) mod marked_ptr;
pub(crate) mod striped_counter;

pub(crate) use marked_ptr::MarkedPtr;
pub(crate) use striped_counter::StripedCounter;
