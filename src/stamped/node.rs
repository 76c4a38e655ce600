use core::fmt::{self, Debug, Formatter};
use core::sync::atomic::Ordering::SeqCst;

use crate::cfg::atomic::{AtomicBool, AtomicI32};
use crate::cfg::sync::Arc;
use crate::cfg::thread::{self, Thread};
use crate::link::{self, Link, Slot};
use crate::park;

/// Status of a node whose successor parked and must be woken.
pub(super) const WAITING: i32 = -1;
/// Terminal status of a node whose thread gave up.
pub(super) const CANCELLED: i32 = 1;

/// The mode a stamped lock waiter waits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum WMode {
    Read,
    Write,
}

/// A waiter in the stamped lock queue.
///
/// Readers that arrive behind another queued reader do not take a queue
/// slot of their own: they push themselves onto that reader's `cowait`
/// stack and are released together with it.
pub(super) struct WNode {
    pub(super) prev: Slot<WNode>,
    pub(super) next: Slot<WNode>,
    pub(super) cowait: Slot<WNode>,
    status: AtomicI32,
    mode: WMode,
    thread: Option<Thread>,
    /// Set while the owning thread is about to park, or parked.
    waiting: AtomicBool,
}

impl WNode {
    /// A waiter for the calling thread, queued behind `prev`.
    pub(super) fn new(mode: WMode, prev: &Arc<WNode>) -> Arc<Self> {
        let node = Self::with(mode, Some(thread::current()));
        node.prev.store(Some(Arc::clone(prev)));
        node
    }

    /// The thread-less node installed as head when the queue is first used.
    pub(super) fn dummy() -> Arc<Self> {
        Self::with(WMode::Write, None)
    }

    fn with(mode: WMode, thread: Option<Thread>) -> Arc<Self> {
        Arc::new(Self {
            prev: Slot::empty(),
            next: Slot::empty(),
            cowait: Slot::empty(),
            status: AtomicI32::new(0),
            mode,
            thread,
            waiting: AtomicBool::new(false),
        })
    }

    pub(super) fn mode(&self) -> WMode {
        self.mode
    }

    pub(super) fn status(&self) -> i32 {
        self.status.load(SeqCst)
    }

    pub(super) fn is_cancelled(&self) -> bool {
        self.status() == CANCELLED
    }

    pub(super) fn cancel(&self) {
        self.status.store(CANCELLED, SeqCst);
    }

    pub(super) fn cas_status(&self, current: i32, new: i32) -> bool {
        self.status.compare_exchange(current, new, SeqCst, SeqCst).is_ok()
    }

    /// Announces that the owning thread is about to park.
    pub(super) fn set_waiting(&self, waiting: bool) {
        self.waiting.store(waiting, SeqCst);
    }

    /// Wakes the owning thread if it announced it would park.
    pub(super) fn unpark(&self) {
        if self.waiting.load(SeqCst) {
            if let Some(thread) = &self.thread {
                park::unpark(thread);
            }
        }
    }

    /// Like [`unpark`], but also withdraws the announcement so that only one
    /// waker unparks the thread.
    ///
    /// [`unpark`]: Self::unpark
    pub(super) fn take_and_unpark(&self) {
        if self.waiting.swap(false, SeqCst) {
            if let Some(thread) = &self.thread {
                park::unpark(thread);
            }
        }
    }

    /// Pops one reader off the cowait stack and wakes it. Returns `false` if
    /// the stack was empty.
    pub(super) fn wake_cowaiter(&self) -> bool {
        let Some(first) = self.cowait.load_full() else {
            return false;
        };
        let current = Some(Arc::clone(&first));
        if link::cas(&self.cowait, &current, first.cowait.load_full()) {
            first.unpark();
        }
        true
    }

    /// Drains the cowait stack, waking every reader on it.
    pub(super) fn wake_cowaiters(&self) {
        while self.wake_cowaiter() {}
    }
}

impl Debug for WNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("WNode")
            .field("mode", &self.mode)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Clears the links of every node reachable from `start` through `step`.
pub(super) fn unlink_chain(start: Link<WNode>, step: impl Fn(&WNode) -> Link<WNode>) {
    let mut cursor = start;
    while let Some(node) = cursor {
        cursor = step(&*node);
        node.prev.store(None);
        node.next.store(None);
        node.cowait.store(None);
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;

    use super::{WMode, WNode, CANCELLED, WAITING};

    #[test]
    fn cowaiters_pop_in_lifo_order() {
        let head = WNode::dummy();
        let first = WNode::new(WMode::Read, &head);
        let second = WNode::new(WMode::Read, &head);
        head.cowait.store(Some(Arc::clone(&first)));
        second.cowait.store(Some(Arc::clone(&first)));
        head.cowait.store(Some(Arc::clone(&second)));

        assert!(head.wake_cowaiter());
        assert!(Arc::ptr_eq(&head.cowait.load_full().unwrap(), &first));
        head.wake_cowaiters();
        assert!(head.cowait.load().is_none());
        assert!(!head.wake_cowaiter());
    }

    #[test]
    fn status_transitions() {
        let head = WNode::dummy();
        assert_eq!(head.status(), 0);
        assert!(head.cas_status(0, WAITING));
        assert!(!head.cas_status(0, WAITING));
        head.cancel();
        assert_eq!(head.status(), CANCELLED);
        assert!(head.is_cancelled());
    }
}
