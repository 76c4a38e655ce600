//! Shared-ownership links between queue nodes.
//!
//! Queue nodes may be reached by threads other than their owner long after
//! the owner has moved on, through stale `prev`/`next` links or a snapshot of
//! the tail. Links are therefore reference counted through [`Slot`], which
//! keeps a node alive for as long as any thread can still observe it.
//! Identity comparisons, which the queue algorithms rely on, are pointer
//! comparisons.
//!
//! Outside of Loom a slot is an [`arc_swap::ArcSwapOption`]. Loom cannot see
//! through its reclamation scheme, so under Loom a slot is a Loom mutex over
//! a Loom `Arc`, which gives the model checker every link access and every
//! node release.

use core::ptr;

use crate::cfg::sync::Arc;

#[cfg(not(all(loom, test)))]
pub(crate) use arc_swap::ArcSwapOption as Slot;

/// An owned, possibly empty reference to a queue node.
pub(crate) type Link<T> = Option<Arc<T>>;

/// Returns the raw address of a link, null when empty.
#[inline]
pub(crate) fn as_ptr<T>(link: &Link<T>) -> *const T {
    link.as_ref().map_or(ptr::null(), Arc::as_ptr)
}

/// Returns `true` if both links refer to the same node, or are both empty.
#[inline]
pub(crate) fn same<T>(a: &Link<T>, b: &Link<T>) -> bool {
    ptr::eq(as_ptr(a), as_ptr(b))
}

/// Returns `true` if `link` refers to `node`.
#[inline]
pub(crate) fn is<T>(link: &Link<T>, node: &Arc<T>) -> bool {
    ptr::eq(as_ptr(link), Arc::as_ptr(node))
}

/// Atomically replaces the contents of `slot` with `new` if it still refers
/// to the same node as `current`. Returns whether the swap happened.
#[cfg(not(all(loom, test)))]
#[inline]
pub(crate) fn cas<T>(slot: &Slot<T>, current: &Link<T>, new: Link<T>) -> bool {
    let prev = slot.compare_and_swap(current, new);
    same(&*prev, current)
}

/// Atomically replaces the contents of `slot` with `new` if it still refers
/// to the same node as `current`. Returns whether the swap happened.
#[cfg(all(loom, test))]
pub(crate) fn cas<T>(slot: &Slot<T>, current: &Link<T>, new: Link<T>) -> bool {
    let mut link = slot.locked();
    if !same(&*link, current) {
        return false;
    }
    let old = core::mem::replace(&mut *link, new);
    drop(link);
    drop(old);
    true
}

/// A Loom visible stand-in for `ArcSwapOption`, with the subset of its API
/// the queues use.
#[cfg(all(loom, test))]
pub(crate) struct Slot<T>(loom::sync::Mutex<Link<T>>);

#[cfg(all(loom, test))]
impl<T> Slot<T> {
    pub(crate) fn empty() -> Self {
        Self(loom::sync::Mutex::new(None))
    }

    fn locked(&self) -> loom::sync::MutexGuard<'_, Link<T>> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn load(&self) -> Link<T> {
        self.locked().clone()
    }

    pub(crate) fn load_full(&self) -> Link<T> {
        self.load()
    }

    /// Replaces the link, releasing the previous node outside of the lock.
    pub(crate) fn store(&self, new: Link<T>) {
        drop(self.swap(new));
    }

    pub(crate) fn swap(&self, new: Link<T>) -> Link<T> {
        let mut link = self.locked();
        core::mem::replace(&mut *link, new)
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;

    use super::{cas, is, same, Slot};

    #[test]
    fn identity_is_by_address() {
        let a = Arc::new(1);
        let b = Arc::new(1);
        assert!(same(&Some(a.clone()), &Some(a.clone())));
        assert!(!same(&Some(a.clone()), &Some(b.clone())));
        assert!(same::<i32>(&None, &None));
        assert!(is(&Some(a.clone()), &a));
        assert!(!is(&None, &a));
    }

    #[test]
    fn cas_succeeds_only_on_match() {
        let a = Arc::new(1);
        let b = Arc::new(2);
        let slot = Slot::empty();
        assert!(cas(&slot, &None, Some(a.clone())));
        assert!(!cas(&slot, &None, Some(b.clone())));
        assert!(!cas(&slot, &Some(b.clone()), None));
        assert!(cas(&slot, &Some(a.clone()), Some(b.clone())));
        assert!(is(&slot.load_full(), &b));
    }
}
