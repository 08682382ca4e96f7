use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering as AtomicOrdering};

use crate::config::MapConfig;
use crate::data_structures::internal::StripedCounter;
use crate::data_structures::key::{KeyComparator, SentinelKey};
use crate::data_structures::sorted::bounds::{Bounds, Span};
use crate::data_structures::sorted::entry::Entry;
use crate::data_structures::sorted::iter::{Iter, Keys};
use crate::data_structures::sorted::node::{Index, IndexPtr, Node, NodePtr};
use crate::data_structures::sorted::sub_map::SubMap;
use crate::data_structures::sorted::views::{EntrySet, KeySet, ValueCollection};
use crate::error::MapError;
use crate::guard::Guard;

/// Relation bit: accept an exact match.
pub(crate) const EQ: u8 = 1;
/// Relation bit: look below the key instead of above it.
pub(crate) const LT: u8 = 2;
/// No bits: the first key strictly above.
pub(crate) const GT: u8 = 0;

// =============================================================================
// SKIP LIST MAP INVARIANTS
// =============================================================================
//
// Structure (index levels above, base list at the bottom):
//
// Head L3:  [H] ─────────────────────────────────────► [30] ──────────► null
//            │                                           │
// Head L2:  [H] ──────────► [10] ─────────────────────► [30] ──────────► null
//            │                │                          │
// Head L1:  [H] ──────────► [10] ─────────► [20] ─────► [30] ──────────► null
//            │                │               │          │
// Base:    header ───────►  10 ─────────►  20 ──────►  30 ──────►  40 ──► null
//
// The base list is the ground truth. Index levels are search accelerators and
// may be missing entries (a failed splice is simply dropped).
//
// INVARIANTS:
// 1. Base keys are strictly ascending under the map's comparator
// 2. The header carries the sentinel key and is never deleted
// 3. A node is logically deleted when its value is null; it is then given a
//    marker successor and finally unlinked from its predecessor
// 4. `key` and `down` never change; `value`, `next`, `right` and the head
//    pointer only change by CAS
// 5. A marked `right` pointer is frozen (see MarkedPtr)
//
// =============================================================================
// DELETION (three steps, any thread may finish the last two)
// =============================================================================
//
// Before:         b ──────► n ──────► f
//
// 1. CAS n.value from v to null (the linearization point of the remove)
//
// 2. Append a marker:
//                 b ──────► n ──────► marker ──────► f
//
//    Nothing can be inserted directly behind n any more: every insert CASes
//    the predecessor's next, and n.next now points to a marker that nobody
//    CASes.
//
// 3. CAS b.next from n to f:
//                 b ─────────────────────────────────► f
//
// Index nodes of n are unlinked lazily by whoever walks past them.
//
// =============================================================================
// TRAVERSAL SAFETY
// =============================================================================
//
// Every operation runs pinned. Memory unlinked after the pin began stays
// allocated until the pin ends, so a pointer read from a node that was still
// in the structure after the pin began is safe to follow. The rules below keep
// every traversal inside that set:
//
// - Move right onto an index node only after seeing its base node live
// - Never follow a marked `right` pointer. A marked pointer with a non-null
//   target restarts the search from the head; a marked null pointer is a head
//   level being retired and just means "descend"
// - Start a base walk only from the header or from a node seen live
// - Never use a marker as a predecessor. Reaching one restarts the search
//
// =============================================================================

/// A lock-free concurrent navigable map keyed by a primitive.
///
/// Keys are kept sorted by the map's [`KeyComparator`]. All operations may be
/// called concurrently from any number of threads through a shared reference.
/// Single-key operations are linearizable. Bulk operations (`len`, `clear`,
/// equality, iteration, views) are weakly consistent: they never fail under
/// concurrent modification but may or may not observe changes that happen
/// while they run.
///
/// Values are returned as clones; the map keeps its own copy.
///
/// The reserved key [`SentinelKey::EMPTY`] can't be stored. Write operations
/// panic when given it and read operations treat it as absent.
pub struct SkipListMap<K: SentinelKey, V, G: Guard> {
    head: AtomicPtr<Index<K, V>>,
    comparator: KeyComparator<K>,
    counter: StripedCounter,
    guard: G,
    _marker: PhantomData<Box<V>>,
}

// Safety: all shared state is reached through atomics, and values are only
// handed out as clones or guarded references.
unsafe impl<K: SentinelKey, V: Send + Sync, G: Guard> Send for SkipListMap<K, V, G> {}
unsafe impl<K: SentinelKey, V: Send + Sync, G: Guard> Sync for SkipListMap<K, V, G> {}

unsafe fn drop_value<V>(ptr: *mut V) {
    unsafe { drop(Box::from_raw(ptr)) }
}

impl<K: SentinelKey, V, G: Guard> SkipListMap<K, V, G> {
    /// An empty map in the key's natural order.
    pub fn new() -> Self {
        Self::with_config(MapConfig::new())
    }

    /// An empty map ordered by `comparator`.
    pub fn with_comparator(comparator: KeyComparator<K>) -> Self {
        Self::with_config(MapConfig::new().comparator(comparator))
    }

    /// An empty map in reverse natural order.
    pub fn reversed() -> Self {
        Self::with_comparator(KeyComparator::reverse_order())
    }

    pub fn with_config(config: MapConfig<K>) -> Self {
        let header = Node::alloc_header();
        let head = Index::alloc(header, ptr::null_mut(), ptr::null_mut());
        SkipListMap {
            head: AtomicPtr::new(head),
            comparator: config.comparator,
            counter: StripedCounter::new(config.counter_stripes),
            guard: G::default(),
            _marker: PhantomData,
        }
    }

    pub fn comparator(&self) -> &KeyComparator<K> {
        &self.comparator
    }

    /// The reclamation guard retired memory is handed to.
    pub fn guard(&self) -> &G {
        &self.guard
    }

    pub fn counter_stripes(&self) -> usize {
        self.counter.stripes()
    }

    /// Number of index levels above the base list.
    ///
    /// A diagnostic snapshot; it changes as inserts grow and removes shrink
    /// the index.
    pub fn height(&self) -> usize {
        let _pin = G::pin();
        let mut levels = 0;
        let mut q = self.head.load(AtomicOrdering::Acquire);
        unsafe {
            while !q.is_null() {
                levels += 1;
                q = (*q).down;
            }
        }
        levels
    }

    #[inline]
    pub(crate) fn cmp(&self, a: K, b: K) -> Ordering {
        self.comparator.compare(a, b)
    }

    // =========================================================================
    // Reclamation
    // =========================================================================

    /// Drop one reference to `node`, retiring it when it was the last.
    unsafe fn release_node(&self, node: NodePtr<K, V>) {
        unsafe {
            if (*node).release_ref() {
                self.guard.defer_destroy(node, Node::<K, V>::dealloc_ptr);
            }
        }
    }

    /// Retire a value box that was just replaced or removed.
    ///
    /// Zero-sized values all share one dangling address, so they are dropped
    /// immediately instead of being tracked.
    pub(crate) unsafe fn retire_value(&self, value: *mut V) {
        unsafe {
            if mem::size_of::<V>() == 0 {
                drop(Box::from_raw(value));
            } else {
                self.guard.defer_destroy(value, drop_value::<V>);
            }
        }
    }

    /// Free a node and value allocated for an insert that never happened.
    unsafe fn discard_unused(node: NodePtr<K, V>, value: *mut V, value_published: bool) {
        unsafe {
            if node.is_null() {
                if !value_published {
                    drop(Box::from_raw(value));
                }
            } else {
                if value_published {
                    (*node).clear_value_unpublished();
                }
                Node::dealloc_unpublished(node);
            }
        }
    }

    // =========================================================================
    // Traversal primitives (caller must be pinned)
    // =========================================================================

    #[inline]
    pub(crate) unsafe fn base_head(&self) -> NodePtr<K, V> {
        unsafe { (*self.head.load(AtomicOrdering::Acquire)).node }
    }

    /// Unlink index node `r` from behind `q` if `q.right` still points to it.
    ///
    /// Marks `r` first so nothing can be spliced in behind it. The thread whose
    /// CAS removes `r` from the level releases the reference `r` held.
    unsafe fn unlink_index(&self, q: IndexPtr<K, V>, r: IndexPtr<K, V>) {
        unsafe {
            let succ = (*r).mark_right();
            if (*q).cas_right(r, succ) {
                self.release_node((*r).node);
            }
        }
    }

    /// Finish deleting `n`, a logically deleted successor of `b`.
    ///
    /// Appends a marker if `n` has none yet, then swings `b.next` past both.
    unsafe fn unlink_node(&self, b: NodePtr<K, V>, n: NodePtr<K, V>) {
        unsafe {
            let mut spare: NodePtr<K, V> = ptr::null_mut();
            let succ = loop {
                let f = (*n).get_next();
                if !f.is_null() && (*f).is_marker() {
                    break (*f).get_next();
                }
                if spare.is_null() {
                    spare = Node::alloc_marker(f);
                } else {
                    (*spare).set_next(f);
                }
                if (*n).cas_next(f, spare) {
                    spare = ptr::null_mut();
                    break f;
                }
            };
            if !spare.is_null() {
                Node::dealloc_unpublished(spare);
            }
            if (*b).cas_next(n, succ) {
                self.release_node(n);
            }
        }
    }

    /// Descend the index towards `key`, unlinking index nodes of deleted
    /// entries on the way.
    ///
    /// Returns the head the descent started from, the base node reached (the
    /// header or a node seen live, with key below `key`) and the number of
    /// levels descended.
    unsafe fn descend(&self, key: K) -> (IndexPtr<K, V>, NodePtr<K, V>, usize) {
        unsafe {
            'restart: loop {
                let h = self.head.load(AtomicOrdering::Acquire);
                let mut q = h;
                let mut levels = 0;
                loop {
                    let r = (*q).right();
                    if r.is_marked() {
                        if !r.is_null() {
                            continue 'restart;
                        }
                    } else if !r.is_null() {
                        let r = r.as_ptr();
                        let p = (*r).node;
                        if (*p).is_deleted() {
                            self.unlink_index(q, r);
                            continue;
                        }
                        if self.cmp(key, (*p).key) == Ordering::Greater {
                            q = r;
                            continue;
                        }
                    }
                    let d = (*q).down;
                    if d.is_null() {
                        return (h, (*q).node, levels);
                    }
                    levels += 1;
                    q = d;
                }
            }
        }
    }

    /// A base node with key below `key`, reached through the index.
    pub(crate) unsafe fn find_predecessor(&self, key: K) -> NodePtr<K, V> {
        unsafe { self.descend(key).1 }
    }

    /// The live node holding `key`, or null. The caller must recheck the
    /// value: the node may be deleted right after it is returned.
    pub(crate) unsafe fn find_node(&self, key: K) -> NodePtr<K, V> {
        unsafe {
            'outer: loop {
                let mut b = self.find_predecessor(key);
                loop {
                    let n = (*b).get_next();
                    if n.is_null() {
                        return ptr::null_mut();
                    }
                    if (*n).is_marker() {
                        continue 'outer;
                    }
                    if (*n).is_deleted() {
                        self.unlink_node(b, n);
                        continue;
                    }
                    match self.cmp(key, (*n).key) {
                        Ordering::Greater => b = n,
                        Ordering::Equal => return n,
                        Ordering::Less => return ptr::null_mut(),
                    }
                }
            }
        }
    }

    /// Read-only lookup. Returns the first value witnessed for `key`.
    ///
    /// Only cleans stale index nodes; the base walk steps over deleted nodes
    /// and markers instead of unlinking them.
    pub(crate) unsafe fn do_get(&self, key: K) -> *mut V {
        unsafe {
            'restart: loop {
                let mut q = self.head.load(AtomicOrdering::Acquire);
                loop {
                    let r = (*q).right();
                    if r.is_marked() {
                        if !r.is_null() {
                            continue 'restart;
                        }
                    } else if !r.is_null() {
                        let r = r.as_ptr();
                        let p = (*r).node;
                        let v = (*p).value_ptr();
                        if v.is_null() {
                            self.unlink_index(q, r);
                            continue;
                        }
                        match self.cmp(key, (*p).key) {
                            Ordering::Greater => {
                                q = r;
                                continue;
                            }
                            Ordering::Equal => return v,
                            Ordering::Less => {}
                        }
                    }
                    let d = (*q).down;
                    if !d.is_null() {
                        q = d;
                        continue;
                    }

                    let mut b = (*q).node;
                    loop {
                        let n = (*b).get_next();
                        if n.is_null() {
                            return ptr::null_mut();
                        }
                        // Markers carry a null value too
                        let v = (*n).value_ptr();
                        if v.is_null() {
                            b = n;
                            continue;
                        }
                        match self.cmp(key, (*n).key) {
                            Ordering::Greater => b = n,
                            Ordering::Equal => return v,
                            Ordering::Less => return ptr::null_mut(),
                        }
                    }
                }
            }
        }
    }

    /// The node nearest to `key` in the direction given by `rel`
    /// (a combination of [`EQ`], [`LT`], [`GT`]), or null.
    ///
    /// The returned node may be deleted concurrently; callers recheck.
    pub(crate) unsafe fn find_near(&self, key: K, rel: u8) -> NodePtr<K, V> {
        unsafe {
            'outer: loop {
                let mut b = self.find_predecessor(key);
                loop {
                    let n = (*b).get_next();
                    if n.is_null() {
                        return if rel & LT != 0 && !(*b).is_header() {
                            b
                        } else {
                            ptr::null_mut()
                        };
                    }
                    if (*n).is_marker() {
                        continue 'outer;
                    }
                    if (*n).is_deleted() {
                        self.unlink_node(b, n);
                        continue;
                    }
                    let c = self.cmp(key, (*n).key);
                    if (c == Ordering::Equal && rel & EQ != 0)
                        || (c == Ordering::Less && rel & LT == 0)
                    {
                        return n;
                    }
                    if c != Ordering::Greater && rel & LT != 0 {
                        return if (*b).is_header() { ptr::null_mut() } else { b };
                    }
                    b = n;
                }
            }
        }
    }

    /// The first live node, or null.
    pub(crate) unsafe fn find_first(&self) -> NodePtr<K, V> {
        unsafe {
            let b = self.base_head();
            loop {
                let n = (*b).get_next();
                if n.is_null() {
                    return ptr::null_mut();
                }
                if (*n).is_deleted() {
                    self.unlink_node(b, n);
                } else {
                    return n;
                }
            }
        }
    }

    /// The last node, or null. May be deleted by the time it is returned.
    pub(crate) unsafe fn find_last(&self) -> NodePtr<K, V> {
        unsafe {
            'outer: loop {
                let mut q = self.head.load(AtomicOrdering::Acquire);
                loop {
                    let r = (*q).right();
                    if r.is_marked() {
                        if !r.is_null() {
                            continue 'outer;
                        }
                    } else if !r.is_null() {
                        let r = r.as_ptr();
                        if (*(*r).node).is_deleted() {
                            self.unlink_index(q, r);
                        } else {
                            q = r;
                        }
                        continue;
                    }
                    let d = (*q).down;
                    if d.is_null() {
                        break;
                    }
                    q = d;
                }

                let mut b = (*q).node;
                loop {
                    let n = (*b).get_next();
                    if n.is_null() {
                        return if (*b).is_header() { ptr::null_mut() } else { b };
                    }
                    if (*n).is_marker() {
                        continue 'outer;
                    }
                    if (*n).is_deleted() {
                        self.unlink_node(b, n);
                    } else {
                        b = n;
                    }
                }
            }
        }
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Insert or update `key`.
    ///
    /// Returns the value pointer that was in place (now retired unless
    /// `only_if_absent`), or null when a new node was inserted.
    unsafe fn do_put(&self, key: K, value: V, only_if_absent: bool) -> *mut V {
        assert!(
            !key.is_sentinel(),
            "the reserved sentinel key cannot be stored in a map"
        );
        let vbox = Box::into_raw(Box::new(value));
        let mut z: NodePtr<K, V> = ptr::null_mut();

        unsafe {
            let (h, levels) = 'insert: loop {
                let (h, mut b, levels) = self.descend(key);
                loop {
                    let n = (*b).get_next();
                    if !n.is_null() {
                        if (*n).is_marker() {
                            // b was deleted under us
                            continue 'insert;
                        }
                        let v = (*n).value_ptr();
                        if v.is_null() {
                            self.unlink_node(b, n);
                            continue;
                        }
                        match self.cmp(key, (*n).key) {
                            Ordering::Greater => {
                                b = n;
                                continue;
                            }
                            Ordering::Equal => {
                                if only_if_absent {
                                    Self::discard_unused(z, vbox, false);
                                    return v;
                                }
                                if (*n).cas_value(v, vbox) {
                                    Self::discard_unused(z, vbox, true);
                                    self.retire_value(v);
                                    return v;
                                }
                                continue;
                            }
                            Ordering::Less => {}
                        }
                    }

                    if z.is_null() {
                        z = Node::alloc(key, vbox, n);
                    } else {
                        (*z).set_next(n);
                    }
                    if (*b).cas_next(n, z) {
                        break 'insert (h, levels);
                    }
                }
            };

            self.build_tower(z, key, h, levels);
            self.counter.add(1);
            ptr::null_mut()
        }
    }

    /// Give a freshly inserted node an index tower with probability 1/4, then
    /// release the inserting thread's reference.
    ///
    /// Tower height is one plus the number of leading one bits of a random
    /// word, capped at one level above the current height. The splice runs
    /// bottom-up; a failed level abandons everything above it.
    unsafe fn build_tower(&self, z: NodePtr<K, V>, key: K, h: IndexPtr<K, V>, levels: usize) {
        unsafe {
            let bits = fastrand::u64(..);
            if bits & 0b11 == 0 {
                let mut rnd = bits as i64;
                let mut skips = levels as isize;
                let mut x: IndexPtr<K, V> = ptr::null_mut();
                loop {
                    x = Index::alloc(z, x, ptr::null_mut());
                    if rnd >= 0 {
                        break;
                    }
                    skips -= 1;
                    if skips < 0 {
                        break;
                    }
                    rnd <<= 1;
                }
                (*z).set_tower(x);

                if self.add_indices(h, skips, x, key)
                    && skips < 0
                    && self.head.load(AtomicOrdering::Acquire) == h
                {
                    self.try_grow(h, z, x);
                }
                if (*z).is_deleted() {
                    // Deleted while the tower went up: clear what we linked
                    self.find_predecessor(key);
                }
            }
            self.release_node(z);
        }
    }

    /// Splice tower `x` into the levels starting at `q`, after descending
    /// `skips` levels. Lower levels go first.
    unsafe fn add_indices(
        &self,
        mut q: IndexPtr<K, V>,
        mut skips: isize,
        x: IndexPtr<K, V>,
        key: K,
    ) -> bool {
        if x.is_null() || q.is_null() {
            return false;
        }
        unsafe {
            let mut retrying = false;
            loop {
                let r = (*q).right();
                if r.is_marked() {
                    // q is leaving this level
                    return false;
                }
                let r = r.as_ptr();
                if !r.is_null() {
                    let p = (*r).node;
                    if (*p).is_deleted() {
                        self.unlink_index(q, r);
                        continue;
                    }
                    match self.cmp(key, (*p).key) {
                        Ordering::Greater => {
                            q = r;
                            continue;
                        }
                        // Stale: the key was deleted and inserted again
                        Ordering::Equal => return false,
                        Ordering::Less => {}
                    }
                }

                let d = (*q).down;
                if !d.is_null() && skips > 0 {
                    skips -= 1;
                    q = d;
                } else if !d.is_null() && !retrying && !self.add_indices(d, 0, (*x).down, key) {
                    return false;
                } else {
                    let z = (*x).node;
                    (*x).set_right(r);
                    (*z).acquire_ref();
                    if (*q).cas_right(r, x) {
                        return true;
                    }
                    let last = (*z).release_ref();
                    debug_assert!(!last, "inserting thread still holds a reference");
                    retrying = true;
                }
            }
        }
    }

    /// Add a level on top of `h` whose only entry is `z`.
    unsafe fn try_grow(&self, h: IndexPtr<K, V>, z: NodePtr<K, V>, x: IndexPtr<K, V>) {
        unsafe {
            let hx = Index::alloc(z, x, ptr::null_mut());
            let nh = Index::alloc((*h).node, h, hx);
            (*z).set_tower(hx);
            (*z).acquire_ref();
            if self
                .head
                .compare_exchange(h, nh, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
                .is_ok()
            {
                trace_log!(key = ?(*z).key, "skip list grew a level");
            } else {
                let last = (*z).release_ref();
                debug_assert!(!last, "inserting thread still holds a reference");
                (*z).set_tower(x);
                Index::dealloc_ptr(nh);
                Index::dealloc_ptr(hx);
            }
        }
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Remove `key` if its current value satisfies `matches`.
    ///
    /// Returns the removed value pointer (retired, valid while the caller
    /// stays pinned) or null.
    pub(crate) unsafe fn do_remove<F>(&self, key: K, matches: F) -> *mut V
    where
        F: Fn(&V) -> bool,
    {
        if key.is_sentinel() {
            return ptr::null_mut();
        }
        unsafe {
            let mut result: *mut V = ptr::null_mut();
            'outer: loop {
                let mut b = self.find_predecessor(key);
                if !result.is_null() {
                    // The search above cleaned the removed node's index
                    break;
                }
                loop {
                    let n = (*b).get_next();
                    if n.is_null() {
                        break 'outer;
                    }
                    if (*n).is_marker() {
                        continue 'outer;
                    }
                    let v = (*n).value_ptr();
                    if v.is_null() {
                        self.unlink_node(b, n);
                        continue;
                    }
                    match self.cmp(key, (*n).key) {
                        Ordering::Greater => b = n,
                        Ordering::Less => break 'outer,
                        Ordering::Equal => {
                            if !matches(&*v) {
                                break 'outer;
                            }
                            if (*n).cas_value(v, ptr::null_mut()) {
                                result = v;
                                self.retire_value(v);
                                self.unlink_node(b, n);
                                continue 'outer;
                            }
                        }
                    }
                }
            }
            if !result.is_null() {
                self.try_reduce_level();
                self.counter.add(-1);
            }
            result
        }
    }

    /// Drop the top index level if the top three levels look empty.
    ///
    /// The top level is sealed (its null `right` marked) before the head is
    /// swapped, so nothing can be spliced into a level that is going away.
    /// If the head changed in between, the seal is lifted again. A level can
    /// still be lost while a concurrent insert is about to use it; that only
    /// costs search speed.
    unsafe fn try_reduce_level(&self) {
        unsafe {
            let h = self.head.load(AtomicOrdering::Acquire);
            let d = (*h).down;
            if d.is_null() {
                return;
            }
            let e = (*d).down;
            if e.is_null() {
                return;
            }
            if !(*d).right().as_raw().is_null() || !(*e).right().as_raw().is_null() {
                return;
            }
            if !(*h).try_seal_empty() {
                return;
            }
            if self
                .head
                .compare_exchange(h, d, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
                .is_ok()
            {
                trace_log!("skip list dropped a level");
                self.guard.defer_destroy(h, Index::<K, V>::dealloc_ptr);
            } else {
                debug_log!("level reduction backed out");
                (*h).unseal();
            }
        }
    }

    unsafe fn remove_first_node(&self) -> Option<(K, *mut V)> {
        unsafe {
            let b = self.base_head();
            loop {
                let n = (*b).get_next();
                if n.is_null() {
                    return None;
                }
                let v = (*n).value_ptr();
                if v.is_null() {
                    self.unlink_node(b, n);
                    continue;
                }
                if (*n).cas_value(v, ptr::null_mut()) {
                    let key = (*n).key;
                    self.retire_value(v);
                    self.unlink_node(b, n);
                    self.try_reduce_level();
                    self.find_predecessor(key);
                    self.counter.add(-1);
                    return Some((key, v));
                }
            }
        }
    }

    unsafe fn remove_last_node(&self) -> Option<(K, *mut V)> {
        unsafe {
            'outer: loop {
                let mut q = self.head.load(AtomicOrdering::Acquire);
                loop {
                    let r = (*q).right();
                    if r.is_marked() {
                        if !r.is_null() {
                            continue 'outer;
                        }
                    } else if !r.is_null() {
                        let r = r.as_ptr();
                        let p = (*r).node;
                        if (*p).is_deleted() {
                            self.unlink_index(q, r);
                            continue;
                        }
                        // Only move onto nodes that still have a successor
                        if !(*p).get_next().is_null() {
                            q = r;
                            continue;
                        }
                    }
                    let d = (*q).down;
                    if d.is_null() {
                        break;
                    }
                    q = d;
                }

                let mut b = (*q).node;
                loop {
                    let n = (*b).get_next();
                    if n.is_null() {
                        if (*b).is_header() {
                            return None;
                        }
                        continue 'outer;
                    }
                    if (*n).is_marker() {
                        continue 'outer;
                    }
                    let v = (*n).value_ptr();
                    if v.is_null() {
                        self.unlink_node(b, n);
                        continue;
                    }
                    if !(*n).get_next().is_null() {
                        b = n;
                        continue;
                    }
                    if (*n).cas_value(v, ptr::null_mut()) {
                        let key = (*n).key;
                        self.retire_value(v);
                        self.unlink_node(b, n);
                        self.try_reduce_level();
                        self.find_predecessor(key);
                        self.counter.add(-1);
                        return Some((key, v));
                    }
                }
            }
        }
    }

    // =========================================================================
    // Clear
    // =========================================================================

    /// Delete every base node present when the pass reaches it. Returns how
    /// many this pass removed.
    unsafe fn clear_base_list(&self) -> i64 {
        unsafe {
            let b = self.base_head();
            let mut removed = 0i64;
            loop {
                let n = (*b).get_next();
                if n.is_null() {
                    break;
                }
                let v = (*n).value_ptr();
                if !v.is_null() {
                    if !(*n).cas_value(v, ptr::null_mut()) {
                        continue;
                    }
                    removed += 1;
                    self.retire_value(v);
                }
                self.unlink_node(b, n);
            }
            if removed != 0 {
                self.counter.add(-removed);
            }
            removed
        }
    }

    /// Unlink index nodes of deleted entries on every level.
    unsafe fn purge_index_levels(&self) {
        unsafe {
            let mut level = self.head.load(AtomicOrdering::Acquire);
            while !level.is_null() {
                let mut q = level;
                loop {
                    let r = (*q).right();
                    if r.is_marked() {
                        if r.is_null() {
                            break;
                        }
                        // q is leaving the level; start it over
                        q = level;
                        continue;
                    }
                    let r = r.as_ptr();
                    if r.is_null() {
                        break;
                    }
                    if (*(*r).node).is_deleted() {
                        self.unlink_index(q, r);
                    } else {
                        q = r;
                    }
                }
                level = (*level).down;
            }
        }
    }

    /// Retire empty head levels down to a single level.
    unsafe fn drop_empty_levels(&self) {
        unsafe {
            loop {
                let h = self.head.load(AtomicOrdering::Acquire);
                let d = (*h).down;
                if d.is_null() || !(*h).try_seal_empty() {
                    return;
                }
                if self
                    .head
                    .compare_exchange(h, d, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
                    .is_ok()
                {
                    self.guard.defer_destroy(h, Index::<K, V>::dealloc_ptr);
                } else {
                    (*h).unseal();
                }
            }
        }
    }
}

impl<K: SentinelKey, V, G: Guard> SkipListMap<K, V, G> {
    // =========================================================================
    // Membership and size
    // =========================================================================

    pub fn contains_key(&self, key: K) -> bool {
        if key.is_sentinel() {
            return false;
        }
        let _pin = G::pin();
        unsafe { !self.do_get(key).is_null() }
    }

    /// Number of mappings.
    ///
    /// Not a snapshot: inserts and removes still in flight may or may not be
    /// counted.
    pub fn len(&self) -> usize {
        self.counter.sum()
    }

    pub fn is_empty(&self) -> bool {
        let _pin = G::pin();
        unsafe { self.find_first().is_null() }
    }
}

impl<K: SentinelKey, V: Clone, G: Guard> SkipListMap<K, V, G> {
    // =========================================================================
    // Single-key operations
    // =========================================================================

    /// The value mapped to `key`.
    pub fn get(&self, key: K) -> Option<V> {
        if key.is_sentinel() {
            return None;
        }
        let _pin = G::pin();
        unsafe {
            let v = self.do_get(key);
            if v.is_null() { None } else { Some((*v).clone()) }
        }
    }

    /// A guarded reference to the value mapped to `key`, without cloning it.
    ///
    /// The reference stays valid even if the mapping is replaced or removed
    /// while it is held; it then shows the old value.
    pub fn get_ref(&self, key: K) -> Option<G::GuardedRef<'_, V>> {
        if key.is_sentinel() {
            return None;
        }
        let _pin = G::pin();
        unsafe {
            let v = self.do_get(key);
            if v.is_null() { None } else { Some(G::make_ref(v)) }
        }
    }

    /// Map `key` to `value`, returning the previous value.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let _pin = G::pin();
        unsafe {
            let old = self.do_put(key, value, false);
            if old.is_null() { None } else { Some((*old).clone()) }
        }
    }

    /// Map `key` to `value` unless it is already mapped. Returns the existing
    /// value when there is one, in which case the map is unchanged.
    ///
    /// Of several threads racing to insert the same absent key exactly one
    /// sees `None`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        let _pin = G::pin();
        unsafe {
            let existing = self.do_put(key, value, true);
            if existing.is_null() { None } else { Some((*existing).clone()) }
        }
    }

    /// Remove `key`, returning its value. Removing an absent key is a no-op.
    pub fn remove(&self, key: K) -> Option<V> {
        let _pin = G::pin();
        unsafe {
            let v = self.do_remove(key, |_| true);
            if v.is_null() { None } else { Some((*v).clone()) }
        }
    }

    /// Remove `key` only while it still maps to the value at `expected`.
    pub(crate) unsafe fn remove_exact(&self, key: K, expected: *mut V) -> bool {
        unsafe { !self.do_remove(key, |current| ptr::eq(current, expected)).is_null() }
    }

    /// Replace the value of `key` only if it is mapped. Returns the previous
    /// value.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel.
    pub fn replace(&self, key: K, value: V) -> Option<V> {
        assert!(
            !key.is_sentinel(),
            "the reserved sentinel key cannot be stored in a map"
        );
        let _pin = G::pin();
        let vbox = Box::into_raw(Box::new(value));
        unsafe {
            loop {
                let n = self.find_node(key);
                if n.is_null() {
                    drop(Box::from_raw(vbox));
                    return None;
                }
                let v = (*n).value_ptr();
                if !v.is_null() && (*n).cas_value(v, vbox) {
                    self.retire_value(v);
                    return Some((*v).clone());
                }
            }
        }
    }

    /// The value for `key`, computing and inserting it first if absent.
    ///
    /// `mapping` runs at most once and may run even if another thread inserts
    /// the key first, in which case that thread's value is returned.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel.
    pub fn compute_if_absent<F>(&self, key: K, mapping: F) -> V
    where
        F: FnOnce(K) -> V,
    {
        if let Some(existing) = self.get(key) {
            return existing;
        }
        let value = mapping(key);
        match self.put_if_absent(key, value.clone()) {
            None => value,
            Some(existing) => existing,
        }
    }

    /// Insert `value` if `key` is absent, otherwise replace the current value
    /// with `remap(current, &value)`. A `None` from `remap` removes the
    /// mapping. Returns the new value, or `None` if the mapping was removed.
    ///
    /// `remap` may run more than once under contention.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel.
    pub fn merge<F>(&self, key: K, value: V, remap: F) -> Option<V>
    where
        F: Fn(&V, &V) -> Option<V>,
    {
        assert!(
            !key.is_sentinel(),
            "the reserved sentinel key cannot be stored in a map"
        );
        let _pin = G::pin();
        unsafe {
            loop {
                let n = self.find_node(key);
                if n.is_null() {
                    if self.do_put(key, value.clone(), true).is_null() {
                        return Some(value);
                    }
                    continue;
                }
                let v = (*n).value_ptr();
                if v.is_null() {
                    continue;
                }
                match remap(&*v, &value) {
                    Some(merged) => {
                        let result = merged.clone();
                        let rbox = Box::into_raw(Box::new(merged));
                        if (*n).cas_value(v, rbox) {
                            self.retire_value(v);
                            return Some(result);
                        }
                        drop(Box::from_raw(rbox));
                    }
                    None => {
                        if self.remove_exact(key, v) {
                            return None;
                        }
                    }
                }
            }
        }
    }

    // =========================================================================
    // Size and bulk operations
    // =========================================================================

    /// Remove every mapping.
    ///
    /// Not atomic: entries inserted while `clear` runs may survive it.
    pub fn clear(&self) {
        let _pin = G::pin();
        unsafe {
            loop {
                let removed = self.clear_base_list();
                self.purge_index_levels();
                self.drop_empty_levels();
                debug_log!(removed, "clear pass finished");
                if removed == 0 {
                    break;
                }
            }
        }
    }

    /// Call `action` with every mapping in ascending order.
    pub fn for_each<F>(&self, mut action: F)
    where
        F: FnMut(K, &V),
    {
        let _pin = G::pin();
        unsafe {
            let mut b = self.base_head();
            loop {
                let n = (*b).get_next();
                if n.is_null() {
                    break;
                }
                let v = (*n).value_ptr();
                if !v.is_null() {
                    action((*n).key, &*v);
                }
                b = n;
            }
        }
    }

    /// Replace every value with `function(key, value)`.
    ///
    /// Each replacement is atomic on its own; a value changed concurrently is
    /// recomputed from the new value.
    pub fn replace_all<F>(&self, mut function: F)
    where
        F: FnMut(K, &V) -> V,
    {
        let _pin = G::pin();
        unsafe {
            let mut b = self.base_head();
            loop {
                let n = (*b).get_next();
                if n.is_null() {
                    break;
                }
                loop {
                    let v = (*n).value_ptr();
                    if v.is_null() {
                        break;
                    }
                    let r = Box::into_raw(Box::new(function((*n).key, &*v)));
                    if (*n).cas_value(v, r) {
                        self.retire_value(v);
                        break;
                    }
                    drop(Box::from_raw(r));
                }
                b = n;
            }
        }
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    unsafe fn entry_at(&self, key: K, value: *mut V) -> Entry<K, V> {
        unsafe { Entry::new(key, (*value).clone()) }
    }

    /// The lowest key.
    pub fn first_key(&self) -> Result<K, MapError> {
        let _pin = G::pin();
        unsafe {
            let n = self.find_first();
            if n.is_null() {
                Err(MapError::NoSuchElement)
            } else {
                Ok((*n).key)
            }
        }
    }

    /// The highest key.
    pub fn last_key(&self) -> Result<K, MapError> {
        let _pin = G::pin();
        unsafe {
            let n = self.find_last();
            if n.is_null() {
                Err(MapError::NoSuchElement)
            } else {
                Ok((*n).key)
            }
        }
    }

    pub fn first_entry(&self) -> Option<Entry<K, V>> {
        let _pin = G::pin();
        unsafe {
            let b = self.base_head();
            loop {
                let n = (*b).get_next();
                if n.is_null() {
                    return None;
                }
                let v = (*n).value_ptr();
                if v.is_null() {
                    self.unlink_node(b, n);
                } else {
                    return Some(self.entry_at((*n).key, v));
                }
            }
        }
    }

    pub fn last_entry(&self) -> Option<Entry<K, V>> {
        let _pin = G::pin();
        unsafe {
            loop {
                let n = self.find_last();
                if n.is_null() {
                    return None;
                }
                let v = (*n).value_ptr();
                if !v.is_null() {
                    return Some(self.entry_at((*n).key, v));
                }
            }
        }
    }

    /// Remove and return the lowest mapping.
    pub fn poll_first_entry(&self) -> Option<Entry<K, V>> {
        let _pin = G::pin();
        unsafe {
            self.remove_first_node()
                .map(|(key, v)| self.entry_at(key, v))
        }
    }

    /// Remove and return the highest mapping.
    pub fn poll_last_entry(&self) -> Option<Entry<K, V>> {
        let _pin = G::pin();
        unsafe {
            self.remove_last_node()
                .map(|(key, v)| self.entry_at(key, v))
        }
    }

    fn near_key(&self, key: K, rel: u8) -> Result<K, MapError> {
        if key.is_sentinel() {
            return Err(MapError::ReservedKey);
        }
        let _pin = G::pin();
        unsafe {
            let n = self.find_near(key, rel);
            if n.is_null() {
                Err(MapError::NoSuchElement)
            } else {
                Ok((*n).key)
            }
        }
    }

    pub(crate) fn near_entry(&self, key: K, rel: u8) -> Option<Entry<K, V>> {
        if key.is_sentinel() {
            return None;
        }
        let _pin = G::pin();
        unsafe {
            loop {
                let n = self.find_near(key, rel);
                if n.is_null() {
                    return None;
                }
                let v = (*n).value_ptr();
                if !v.is_null() {
                    return Some(self.entry_at((*n).key, v));
                }
            }
        }
    }

    /// The greatest key strictly below `key`.
    pub fn lower_key(&self, key: K) -> Result<K, MapError> {
        self.near_key(key, LT)
    }

    /// The greatest key less than or equal to `key`.
    pub fn floor_key(&self, key: K) -> Result<K, MapError> {
        self.near_key(key, LT | EQ)
    }

    /// The least key greater than or equal to `key`.
    pub fn ceiling_key(&self, key: K) -> Result<K, MapError> {
        self.near_key(key, GT | EQ)
    }

    /// The least key strictly above `key`.
    pub fn higher_key(&self, key: K) -> Result<K, MapError> {
        self.near_key(key, GT)
    }

    pub fn lower_entry(&self, key: K) -> Option<Entry<K, V>> {
        self.near_entry(key, LT)
    }

    pub fn floor_entry(&self, key: K) -> Option<Entry<K, V>> {
        self.near_entry(key, LT | EQ)
    }

    pub fn ceiling_entry(&self, key: K) -> Option<Entry<K, V>> {
        self.near_entry(key, GT | EQ)
    }

    pub fn higher_entry(&self, key: K) -> Option<Entry<K, V>> {
        self.near_entry(key, GT)
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// A live view of the keys in `[from, to]`, with each end inclusive or
    /// exclusive as requested.
    pub fn sub_map(
        &self,
        from: K,
        from_inclusive: bool,
        to: K,
        to_inclusive: bool,
    ) -> Result<SubMap<'_, K, V, G>, MapError> {
        let bounds = Bounds::new(
            Some(from),
            from_inclusive,
            Some(to),
            to_inclusive,
            false,
            &self.comparator,
        )?;
        Ok(SubMap::new(self, bounds))
    }

    /// A live view of the keys in `[from, to)`.
    pub fn sub_map_range(&self, from: K, to: K) -> Result<SubMap<'_, K, V, G>, MapError> {
        self.sub_map(from, true, to, false)
    }

    /// A live view of the keys below (or up to) `to`.
    pub fn head_map(&self, to: K, inclusive: bool) -> Result<SubMap<'_, K, V, G>, MapError> {
        let bounds = Bounds::new(None, false, Some(to), inclusive, false, &self.comparator)?;
        Ok(SubMap::new(self, bounds))
    }

    /// A live view of the keys above (or from) `from`.
    pub fn tail_map(&self, from: K, inclusive: bool) -> Result<SubMap<'_, K, V, G>, MapError> {
        let bounds = Bounds::new(Some(from), inclusive, None, false, false, &self.comparator)?;
        Ok(SubMap::new(self, bounds))
    }

    /// A live view of the whole map in reverse order.
    pub fn descending_map(&self) -> SubMap<'_, K, V, G> {
        SubMap::new(self, Bounds::unbounded(true))
    }

    pub fn key_set(&self) -> KeySet<'_, K, V, G> {
        KeySet::new(self, Span::Full)
    }

    pub fn navigable_key_set(&self) -> KeySet<'_, K, V, G> {
        self.key_set()
    }

    pub fn descending_key_set(&self) -> KeySet<'_, K, V, G> {
        KeySet::new(self, Span::Bounded(Bounds::unbounded(true)))
    }

    pub fn values(&self) -> ValueCollection<'_, K, V, G> {
        ValueCollection::new(self, Span::Full)
    }

    pub fn entry_set(&self) -> EntrySet<'_, K, V, G> {
        EntrySet::new(self, Span::Full)
    }

    /// Ascending iterator over snapshot entries.
    pub fn iter(&self) -> Iter<'_, K, V, G> {
        Iter::new(self, Span::Full)
    }

    pub fn keys(&self) -> Keys<'_, K, V, G> {
        Keys::new(self, Span::Full)
    }
}

impl<K: SentinelKey, V: Clone + PartialEq, G: Guard> SkipListMap<K, V, G> {
    /// Whether any key maps to `value`. Walks the whole map.
    pub fn contains_value(&self, value: &V) -> bool {
        let _pin = G::pin();
        unsafe {
            let mut b = self.base_head();
            loop {
                let n = (*b).get_next();
                if n.is_null() {
                    return false;
                }
                let v = (*n).value_ptr();
                if !v.is_null() && *v == *value {
                    return true;
                }
                b = n;
            }
        }
    }

    /// Remove `key` only if it currently maps to `expected`.
    pub fn remove_if_equals(&self, key: K, expected: &V) -> bool {
        let _pin = G::pin();
        unsafe { !self.do_remove(key, |current| current == expected).is_null() }
    }

    /// Replace the value of `key` only if it currently maps to `expected`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel.
    pub fn replace_if_equals(&self, key: K, expected: &V, value: V) -> bool {
        assert!(
            !key.is_sentinel(),
            "the reserved sentinel key cannot be stored in a map"
        );
        let _pin = G::pin();
        let vbox = Box::into_raw(Box::new(value));
        unsafe {
            loop {
                let n = self.find_node(key);
                if n.is_null() {
                    drop(Box::from_raw(vbox));
                    return false;
                }
                let v = (*n).value_ptr();
                if v.is_null() {
                    continue;
                }
                if *v != *expected {
                    drop(Box::from_raw(vbox));
                    return false;
                }
                if (*n).cas_value(v, vbox) {
                    self.retire_value(v);
                    return true;
                }
            }
        }
    }
}

impl<K: SentinelKey, V, G: Guard> Default for SkipListMap<K, V, G> {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps are equal when they hold the same keys mapped to equal values.
///
/// With matching comparators both maps are walked in order; otherwise each
/// entry is looked up in the other map. Like every bulk operation this is
/// not atomic under concurrent modification.
impl<K: SentinelKey, V: Clone + PartialEq, G: Guard> PartialEq for SkipListMap<K, V, G> {
    fn eq(&self, other: &Self) -> bool {
        if ptr::eq(self, other) {
            return true;
        }
        if self.comparator.same_order(&other.comparator) {
            let mut theirs = other.iter();
            for mine in self.iter() {
                match theirs.next() {
                    Some(entry)
                        if self.cmp(mine.key(), entry.key()) == Ordering::Equal
                            && mine.value() == entry.value() => {}
                    _ => return false,
                }
            }
            theirs.next().is_none()
        } else {
            other
                .iter()
                .all(|entry| self.get(entry.key()).as_ref() == Some(entry.value()))
                && self
                    .iter()
                    .all(|entry| other.get(entry.key()).as_ref() == Some(entry.value()))
        }
    }
}

impl<K: SentinelKey, V: Clone + fmt::Debug, G: Guard> fmt::Debug for SkipListMap<K, V, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|entry| entry.into_parts()))
            .finish()
    }
}

impl<K: SentinelKey, V: Clone, G: Guard> FromIterator<(K, V)> for SkipListMap<K, V, G> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = Self::new();
        for (key, value) in iter {
            map.put(key, value);
        }
        map
    }
}

impl<'a, K: SentinelKey, V: Clone, G: Guard> IntoIterator for &'a SkipListMap<K, V, G> {
    type Item = Entry<K, V>;
    type IntoIter = Iter<'a, K, V, G>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: SentinelKey, V, G: Guard> Drop for SkipListMap<K, V, G> {
    fn drop(&mut self) {
        // No other thread can hold a reference, so everything still linked
        // is freed directly. Index links go first: a node whose last
        // reference is an index link must be freed before the base walk
        // frees its successor.
        unsafe {
            let head = *self.head.get_mut();
            let header = (*head).node;

            let mut level = head;
            while !level.is_null() {
                let mut r = (*level).right().as_ptr();
                while !r.is_null() {
                    let next = (*r).right().as_ptr();
                    let node = (*r).node;
                    if (*node).release_ref() {
                        Node::dealloc_ptr(node);
                    }
                    r = next;
                }
                level = (*level).down;
            }

            let mut n = (*header).get_next();
            while !n.is_null() {
                let mut next = (*n).get_next();
                if !next.is_null() && (*next).is_marker() {
                    next = (*next).get_next();
                }
                if (*n).release_ref() {
                    Node::dealloc_ptr(n);
                }
                n = next;
            }

            let mut h = head;
            while !h.is_null() {
                let down = (*h).down;
                Index::dealloc_ptr(h);
                h = down;
            }
            Node::dealloc_unpublished(header);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
