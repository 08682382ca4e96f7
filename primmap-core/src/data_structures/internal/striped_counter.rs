//! Striped element counter.
//!
//! Writers add to one of several cache-padded cells chosen per thread, so
//! concurrent inserts and removes on different threads rarely share a cache
//! line. Readers sum every cell. The sum is only a snapshot: it may lag
//! operations that are still in flight and is clamped at zero.

use std::cell::Cell;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

static NEXT_STRIPE: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static STRIPE_HINT: Cell<usize> = Cell::new(NEXT_STRIPE.fetch_add(1, Ordering::Relaxed));
}

pub(crate) struct StripedCounter {
    cells: Box<[CachePadded<AtomicI64>]>,
    mask: usize,
}

impl StripedCounter {
    /// Create a counter with `stripes` cells, rounded up to a power of two.
    pub(crate) fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1).next_power_of_two();
        let cells = (0..stripes)
            .map(|_| CachePadded::new(AtomicI64::new(0)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        StripedCounter {
            cells,
            mask: stripes - 1,
        }
    }

    #[inline]
    pub(crate) fn add(&self, delta: i64) {
        let stripe = STRIPE_HINT.with(|hint| hint.get()) & self.mask;
        self.cells[stripe].fetch_add(delta, Ordering::Relaxed);
    }

    pub(crate) fn sum(&self) -> usize {
        let total: i64 = self
            .cells
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed))
            .sum();
        total.max(0) as usize
    }

    pub(crate) fn stripes(&self) -> usize {
        self.cells.len()
    }
}
