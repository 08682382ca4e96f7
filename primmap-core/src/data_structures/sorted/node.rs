use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::data_structures::internal::MarkedPtr;
use crate::data_structures::key::SentinelKey;

pub(crate) type NodePtr<K, V> = *mut Node<K, V>;
pub(crate) type IndexPtr<K, V> = *mut Index<K, V>;

/// Base list reference held by a freshly inserted node, plus the reference its
/// inserting thread holds while building the index tower.
const INITIAL_REFS: usize = 2;

// =============================================================================
// NODE LIFETIME
// =============================================================================
//
// A base node can be reached three ways: through its predecessor's `next`,
// through a marker's `next` (stale paths behind a deleted predecessor), and
// through `Index::node` of any of its index nodes that are still linked into
// an index level. Physical unlink from the base list therefore does not make
// the node unreachable. The node counts the paths that keep it alive:
//
//   refs = 1   while linked into the base list
//        + 1   while its inserting thread is still building the tower
//        + 1   per index node currently linked into an index level
//
// Each term is released by exactly one thread:
//
//   base link   - the thread whose CAS swings the predecessor past node+marker
//   build ref   - the inserting thread, after its last tower operation
//   index link  - the thread whose CAS unlinks that index node from its level
//
// The release that reaches zero retires the node through the map's guard,
// together with its marker and its whole tower.
//
//   node ──next──► marker ──next──► successor
//    ▲
//    └── tower: top ──down──► ... ──down──► bottom ──down──► null
//
// =============================================================================

/// A base-level list node.
///
/// Header and marker nodes carry the sentinel key. The header is never the
/// target of a `next` pointer, so a sentinel key reached through `next` always
/// identifies a marker.
pub(crate) struct Node<K, V> {
    pub(crate) key: K,
    value: AtomicPtr<V>,
    next: AtomicPtr<Node<K, V>>,
    refs: AtomicUsize,
    tower: AtomicPtr<Index<K, V>>,
}

impl<K: SentinelKey, V> Node<K, V> {
    // =========================================================================
    // Allocation
    // =========================================================================

    pub(crate) fn alloc(key: K, value: *mut V, next: NodePtr<K, V>) -> NodePtr<K, V> {
        Box::into_raw(Box::new(Node {
            key,
            value: AtomicPtr::new(value),
            next: AtomicPtr::new(next),
            refs: AtomicUsize::new(INITIAL_REFS),
            tower: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    pub(crate) fn alloc_header() -> NodePtr<K, V> {
        Self::alloc_sentinel(ptr::null_mut())
    }

    /// Marker appended behind a logically deleted node.
    pub(crate) fn alloc_marker(next: NodePtr<K, V>) -> NodePtr<K, V> {
        Self::alloc_sentinel(next)
    }

    fn alloc_sentinel(next: NodePtr<K, V>) -> NodePtr<K, V> {
        Box::into_raw(Box::new(Node {
            key: K::EMPTY,
            value: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(next),
            refs: AtomicUsize::new(1),
            tower: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    /// Free a node together with everything it owns: its tower, its marker and
    /// its value box if one is still attached.
    ///
    /// # Safety
    ///
    /// `ptr` must not be reachable by any thread, and its `next`, if not a
    /// marker, must still point to valid memory.
    pub(crate) unsafe fn dealloc_ptr(ptr: NodePtr<K, V>) {
        unsafe {
            let node = Box::from_raw(ptr);

            let mut index = node.tower.load(Ordering::Relaxed);
            while !index.is_null() {
                let down = (*index).down;
                drop(Box::from_raw(index));
                index = down;
            }

            let next = node.next.load(Ordering::Relaxed);
            if !next.is_null() && (*next).is_marker() {
                drop(Box::from_raw(next));
            }

            let value = node.value.load(Ordering::Relaxed);
            if !value.is_null() {
                drop(Box::from_raw(value));
            }
        }
    }

    /// Free a marker or a node that was never published.
    ///
    /// # Safety
    ///
    /// `ptr` must never have been visible to another thread.
    pub(crate) unsafe fn dealloc_unpublished(ptr: NodePtr<K, V>) {
        unsafe {
            let node = Box::from_raw(ptr);
            let value = node.value.load(Ordering::Relaxed);
            if !value.is_null() {
                drop(Box::from_raw(value));
            }
        }
    }

    // =========================================================================
    // Predicates
    // =========================================================================

    /// Only meaningful for nodes reached through a `next` pointer.
    #[inline]
    pub(crate) fn is_marker(&self) -> bool {
        self.key.is_sentinel()
    }

    /// Only meaningful for nodes used as a predecessor (never a marker).
    #[inline]
    pub(crate) fn is_header(&self) -> bool {
        self.key.is_sentinel()
    }

    #[inline]
    pub(crate) fn is_deleted(&self) -> bool {
        self.value.load(Ordering::Acquire).is_null()
    }

    // =========================================================================
    // Value
    // =========================================================================

    #[inline]
    pub(crate) fn value_ptr(&self) -> *mut V {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn cas_value(&self, current: *mut V, new: *mut V) -> bool {
        self.value
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Detach the value of a node that was never published.
    #[inline]
    pub(crate) fn clear_value_unpublished(&self) {
        self.value.store(ptr::null_mut(), Ordering::Relaxed);
    }

    // =========================================================================
    // Successor
    // =========================================================================

    #[inline]
    pub(crate) fn get_next(&self) -> NodePtr<K, V> {
        self.next.load(Ordering::Acquire)
    }

    /// Set the successor of a node that isn't published yet.
    #[inline]
    pub(crate) fn set_next(&self, next: NodePtr<K, V>) {
        self.next.store(next, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn cas_next(&self, current: NodePtr<K, V>, new: NodePtr<K, V>) -> bool {
        self.next
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // =========================================================================
    // Reference count and tower
    // =========================================================================

    /// Only called while the caller holds a reference already.
    #[inline]
    pub(crate) fn acquire_ref(&self) {
        self.refs.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns true when the last reference was released.
    #[inline]
    pub(crate) fn release_ref(&self) -> bool {
        self.refs.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Only the inserting thread sets the tower, while holding its build ref.
    #[inline]
    pub(crate) fn set_tower(&self, top: IndexPtr<K, V>) {
        self.tower.store(top, Ordering::Release);
    }
}

/// An index node: one level of a node's tower.
///
/// `node` and `down` are immutable after construction. `right` is the only
/// mutable link; see [`MarkedPtr`] for its removal mark.
pub(crate) struct Index<K, V> {
    pub(crate) node: NodePtr<K, V>,
    pub(crate) down: IndexPtr<K, V>,
    right: AtomicPtr<Index<K, V>>,
}

impl<K, V> Index<K, V> {
    pub(crate) fn alloc(
        node: NodePtr<K, V>,
        down: IndexPtr<K, V>,
        right: IndexPtr<K, V>,
    ) -> IndexPtr<K, V> {
        Box::into_raw(Box::new(Index {
            node,
            down,
            right: AtomicPtr::new(right),
        }))
    }

    /// Free a single index node (head levels and unpublished tower tops).
    ///
    /// # Safety
    ///
    /// `ptr` must not be reachable by any thread and must not belong to a
    /// tower that a node's `dealloc_ptr` will also free.
    pub(crate) unsafe fn dealloc_ptr(ptr: IndexPtr<K, V>) {
        unsafe { drop(Box::from_raw(ptr)) }
    }

    #[inline]
    pub(crate) fn right(&self) -> MarkedPtr<Index<K, V>> {
        MarkedPtr::new(self.right.load(Ordering::Acquire))
    }

    /// Set the successor of an index node that isn't linked yet.
    #[inline]
    pub(crate) fn set_right(&self, right: IndexPtr<K, V>) {
        self.right.store(right, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn cas_right(&self, current: IndexPtr<K, V>, new: IndexPtr<K, V>) -> bool {
        self.right
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Freeze `right` and return the unmasked successor.
    pub(crate) fn mark_right(&self) -> IndexPtr<K, V> {
        let mut current = self.right();
        while !current.is_marked() {
            let marked = current.with_mark(true);
            match self.right.compare_exchange(
                current.as_raw(),
                marked.as_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current.as_ptr(),
                Err(actual) => current = MarkedPtr::new(actual),
            }
        }
        current.as_ptr()
    }

    /// Mark an empty head level for retirement. Fails if the level gained an
    /// entry or is already being retired.
    pub(crate) fn try_seal_empty(&self) -> bool {
        self.cas_right(ptr::null_mut(), MarkedPtr::marked_null().as_raw())
    }

    /// Undo a seal whose level survived.
    pub(crate) fn unseal(&self) {
        self.right.store(ptr::null_mut(), Ordering::Release);
    }
}
