//! Retire-until-drop reclamation for tests.
//!
//! `DeferredGuard` never frees anything while a map is alive. Every node,
//! index tower and value box a map retires is parked in a log and released
//! when the map, and with it the guard, is dropped. Readers can therefore
//! never touch freed memory, which makes the structural tests independent of
//! any collector, and the log doubles as an audit trail: retiring the same
//! address twice panics on the spot in debug builds.

#[cfg(debug_assertions)]
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::{Mutex, MutexGuard};

use super::Guard;

/// A guard that parks retired allocations until it is dropped.
///
/// Memory grows with every overwrite and removal, so use it for tests and
/// short-lived maps only.
pub struct DeferredGuard {
    log: Mutex<RetireLog>,
}

#[derive(Default)]
struct RetireLog {
    pending: Vec<Retired>,
    #[cfg(debug_assertions)]
    addresses: HashSet<usize>,
}

/// One parked allocation and the function that frees it.
struct Retired {
    ptr: *mut (),
    free: unsafe fn(*mut ()),
}

// Safety: the log only moves raw addresses between threads; they are
// dereferenced once, by `free`, when the guard drops.
unsafe impl Send for Retired {}

impl RetireLog {
    #[cfg(debug_assertions)]
    fn check_unique(&mut self, addr: usize) {
        if !self.addresses.insert(addr) {
            panic!("allocation {:#x} retired twice", addr);
        }
    }

    #[cfg(not(debug_assertions))]
    fn check_unique(&mut self, _addr: usize) {}
}

impl DeferredGuard {
    pub fn new() -> Self {
        DeferredGuard {
            log: Mutex::new(RetireLog::default()),
        }
    }

    // A panic while holding the lock leaves the log consistent, so poisoning
    // is ignored
    fn log(&self) -> MutexGuard<'_, RetireLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of allocations retired so far.
    pub fn retired_count(&self) -> usize {
        self.log().pending.len()
    }
}

impl Default for DeferredGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeferredGuard {
    fn drop(&mut self) {
        let log = self
            .log
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for retired in log.pending.drain(..) {
            unsafe { (retired.free)(retired.ptr) };
        }
    }
}

/// A value reference that is valid as long as the map it came from.
pub struct DeferredRef<'a, T> {
    data: &'a T,
}

impl<T> Deref for DeferredRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for DeferredRef<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DeferredRef").field(self.data).finish()
    }
}

impl Guard for DeferredGuard {
    type GuardedRef<'a, T: 'a> = DeferredRef<'a, T>;

    /// Nothing to pin: the map's own guard keeps everything alive.
    type ReadGuard = ();

    fn pin() -> Self::ReadGuard {}

    unsafe fn defer_destroy<N>(&self, node: *mut N, dealloc: unsafe fn(*mut N)) {
        // Same ABI, only the pointee type is erased
        let free = unsafe { std::mem::transmute::<unsafe fn(*mut N), unsafe fn(*mut ())>(dealloc) };
        let mut log = self.log();
        log.check_unique(node as usize);
        log.pending.push(Retired {
            ptr: node.cast(),
            free,
        });
    }

    unsafe fn make_ref<'a, T: 'a>(ptr: *const T) -> Self::GuardedRef<'a, T> {
        DeferredRef {
            data: unsafe { &*ptr },
        }
    }
}
