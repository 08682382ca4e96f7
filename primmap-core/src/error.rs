//! Error type for navigable map operations.
//!
//! Only contract-level failures surface here. Structural races inside the
//! lock-free algorithms are resolved by retrying and never reach the caller.

use thiserror::Error;

/// Errors returned by key accessors, range views and bounded writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MapError {
    /// No key satisfies the request (empty map, or no lower/floor/ceiling/higher key).
    #[error("no such element")]
    NoSuchElement,

    /// A range was requested whose lower bound is greater than its upper bound.
    #[error("inconsistent range")]
    InconsistentRange,

    /// A key or nested range falls outside the bounds of a sub-map view.
    #[error("key out of range")]
    KeyOutOfRange,

    /// The reserved sentinel key was supplied where a real key is required.
    #[error("the reserved sentinel key cannot be stored in a map")]
    ReservedKey,

    /// An iterator was asked to remove an element before returning one.
    #[error("no element has been returned by this iterator")]
    NoCurrentElement,
}
