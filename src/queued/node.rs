use core::fmt::{self, Debug, Formatter};
use core::sync::atomic::Ordering::{Acquire, Release, SeqCst};

use crate::cfg::atomic::{AtomicI32, AtomicUsize};
use crate::cfg::sync::Arc;
use crate::cfg::thread::{self, Thread};
use crate::link::{Link, Slot};
use crate::park;

/// Status of a queued node, as seen by its successor and by releasers.
///
/// Negative values mean the node owes its successor a signal (or is parked on
/// a condition), non-negative values mean no signal is owed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub(crate) enum WaitStatus {
    /// The waiter gave up. Terminal.
    Cancelled = 1,
    /// Default state, no signal owed yet.
    Idle = 0,
    /// The successor is, or soon will be, parked and must be woken on
    /// release.
    Signal = -1,
    /// The node waits on a condition list and is not on the main queue.
    Condition = -2,
    /// A shared release must keep cascading to the next waiter.
    Propagate = -3,
}

impl WaitStatus {
    const fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Cancelled,
            -1 => Self::Signal,
            -2 => Self::Condition,
            -3 => Self::Propagate,
            _ => Self::Idle,
        }
    }

    /// Returns `true` for statuses that still owe a wakeup downstream.
    pub(crate) const fn is_signalling(self) -> bool {
        (self as i32) < 0
    }
}

/// The acquisition mode a node waits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Waits for exclusive ownership.
    Exclusive,
    /// Waits for shared ownership.
    Shared,
}

/// One thread's presence in a wait queue or on a condition list.
///
/// The `prev` chain is authoritative: it is written before the node is
/// published as the tail. `next` is only a hint filled in after the append
/// succeeded, so a missing or cancelled `next` is resolved by scanning
/// backwards from the tail.
pub(crate) struct Node {
    pub(crate) prev: Slot<Node>,
    pub(crate) next: Slot<Node>,
    /// Link to the next node on a condition list.
    pub(crate) next_waiter: Slot<Node>,
    status: AtomicI32,
    mode: Mode,
    thread: Option<Thread>,
    /// Token of the waiting thread, zero once the node was dequeued or
    /// cancelled.
    waiter: AtomicUsize,
}

impl Node {
    fn with(mode: Mode, status: WaitStatus, thread: Option<Thread>) -> Arc<Self> {
        let waiter = if thread.is_some() { park::current_token() } else { 0 };
        Arc::new(Self {
            prev: Slot::empty(),
            next: Slot::empty(),
            next_waiter: Slot::empty(),
            status: AtomicI32::new(status as i32),
            mode,
            thread,
            waiter: AtomicUsize::new(waiter),
        })
    }

    /// The thread-less node installed as head on first contention.
    pub(crate) fn dummy() -> Arc<Self> {
        Self::with(Mode::Exclusive, WaitStatus::Idle, None)
    }

    /// A node for the calling thread, waiting on the main queue in `mode`.
    pub(crate) fn waiter(mode: Mode) -> Arc<Self> {
        Self::with(mode, WaitStatus::Idle, Some(thread::current()))
    }

    /// A node for the calling thread, parked on a condition list.
    pub(crate) fn condition_waiter() -> Arc<Self> {
        Self::with(Mode::Exclusive, WaitStatus::Condition, Some(thread::current()))
    }

    pub(crate) fn status(&self) -> WaitStatus {
        WaitStatus::from_raw(self.status.load(SeqCst))
    }

    pub(crate) fn set_status(&self, status: WaitStatus) {
        self.status.store(status as i32, SeqCst);
    }

    pub(crate) fn cas_status(&self, current: WaitStatus, new: WaitStatus) -> bool {
        self.status.compare_exchange(current as i32, new as i32, SeqCst, SeqCst).is_ok()
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn is_shared(&self) -> bool {
        self.mode == Mode::Shared
    }

    /// Returns the predecessor of a queued node.
    ///
    /// # Panics
    ///
    /// Panics if the node is the head or was never enqueued, both of which
    /// would be a broken queue invariant.
    pub(crate) fn predecessor(&self) -> Arc<Self> {
        self.prev.load_full().expect("queued node must have a predecessor")
    }

    /// The waiting thread, if the node still has one.
    pub(crate) fn thread(&self) -> Option<&Thread> {
        self.has_thread().then_some(self.thread.as_ref()).flatten()
    }

    pub(crate) fn has_thread(&self) -> bool {
        self.waiter.load(Acquire) != 0
    }

    /// Returns `true` if the node is still waited on by the thread with
    /// `token`.
    pub(crate) fn is_waited_by(&self, token: usize) -> bool {
        self.waiter.load(Acquire) == token
    }

    /// Detaches the node from its thread, once dequeued or cancelled.
    pub(crate) fn clear_thread(&self) {
        self.waiter.store(0, Release);
    }

    /// Wakes the waiting thread, if any.
    ///
    /// The thread may have moved on already, in which case it merely gets a
    /// stale permit and a spurious wakeup on its next park.
    pub(crate) fn unpark(&self) {
        if let Some(thread) = self.thread() {
            park::unpark(thread);
        }
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("status", &self.status())
            .field("mode", &self.mode)
            .field("has_thread", &self.has_thread())
            .finish_non_exhaustive()
    }
}

/// Clears every link reachable from `start` by following `step`, breaking the
/// reference cycles that `prev`/`next` pairs form.
pub(crate) fn unlink_chain(start: Link<Node>, step: impl Fn(&Node) -> Link<Node>) {
    let mut cursor = start;
    while let Some(node) = cursor {
        cursor = step(&*node);
        node.prev.store(None);
        node.next.store(None);
        node.next_waiter.store(None);
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{Mode, Node, WaitStatus};

    #[test]
    fn statuses_round_trip_through_raw() {
        for status in [
            WaitStatus::Cancelled,
            WaitStatus::Idle,
            WaitStatus::Signal,
            WaitStatus::Condition,
            WaitStatus::Propagate,
        ] {
            assert_eq!(WaitStatus::from_raw(status as i32), status);
        }
        assert!(WaitStatus::Signal.is_signalling());
        assert!(WaitStatus::Propagate.is_signalling());
        assert!(!WaitStatus::Idle.is_signalling());
        assert!(!WaitStatus::Cancelled.is_signalling());
    }

    #[test]
    fn waiter_owns_thread_until_cleared() {
        let node = Node::waiter(Mode::Shared);
        assert!(node.is_shared());
        assert!(node.has_thread());
        assert!(node.is_waited_by(crate::park::current_token()));
        node.clear_thread();
        assert!(node.thread().is_none());
        assert!(!node.is_waited_by(crate::park::current_token()));
    }

    #[test]
    fn dummy_has_no_thread() {
        let node = Node::dummy();
        assert!(node.thread().is_none());
        assert_eq!(node.status(), WaitStatus::Idle);
        assert!(node.cas_status(WaitStatus::Idle, WaitStatus::Signal));
        assert!(!node.cas_status(WaitStatus::Idle, WaitStatus::Propagate));
    }
}
