use core::fmt::{self, Debug, Formatter};
use core::sync::atomic::Ordering::{Acquire, Release, SeqCst};

use super::node::{unlink_chain, Mode, Node, WaitStatus};
use crate::cfg::atomic::{AtomicI32, AtomicUsize};
use crate::cfg::sync::Arc;
use crate::cfg::thread::Thread;
use crate::link::{self, Link, Slot};
use crate::park;

/// The state word and wait queue of a [`QueuedSynchronizer`].
///
/// This is what [`Policy`] hooks operate on: the hooks read and update the
/// opaque state word, record the exclusive owner, and consult the queue to
/// decide whether barging is allowed.
///
/// The queue is a variant of a CLH queue. It has a dummy head once any
/// contention occurred, and a node becomes head only by acquiring.
///
/// [`QueuedSynchronizer`]: super::QueuedSynchronizer
/// [`Policy`]: super::Policy
pub struct SyncState {
    // Sequentially consistent, so that a releaser reading the head status
    // and a waiter re-reading the state after requesting a signal cannot
    // both miss each other's write.
    state: AtomicI32,
    owner: AtomicUsize,
    pub(crate) head: Slot<Node>,
    pub(crate) tail: Slot<Node>,
}

impl SyncState {
    pub(crate) fn new(state: i32) -> Self {
        Self {
            state: AtomicI32::new(state),
            owner: AtomicUsize::new(0),
            head: Slot::empty(),
            tail: Slot::empty(),
        }
    }

    /// Returns the current value of the state word.
    #[must_use]
    pub fn state(&self) -> i32 {
        self.state.load(SeqCst)
    }

    /// Sets the state word.
    ///
    /// Only safe to use by the thread that owns the state transition, e.g.
    /// the exclusive owner releasing or re-entering.
    pub fn set_state(&self, state: i32) {
        self.state.store(state, SeqCst);
    }

    /// Atomically sets the state word to `update` if it currently equals
    /// `expect`.
    pub fn compare_and_set_state(&self, expect: i32, update: i32) -> bool {
        self.state.compare_exchange(expect, update, SeqCst, SeqCst).is_ok()
    }

    /// Returns the token of the thread recorded as exclusive owner, if any.
    #[must_use]
    pub fn exclusive_owner(&self) -> Option<usize> {
        match self.owner.load(Acquire) {
            0 => None,
            token => Some(token),
        }
    }

    /// Records the calling thread as exclusive owner, or clears the owner.
    pub fn set_exclusive_owner(&self, current: bool) {
        let token = if current { park::current_token() } else { 0 };
        self.owner.store(token, Release);
    }

    /// Returns `true` if the calling thread is recorded as exclusive owner.
    #[must_use]
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner.load(Acquire) == park::current_token()
    }

    /// Returns `true` if some other thread has been waiting longer than the
    /// calling thread.
    ///
    /// Fair policies refuse to acquire when this holds. A `true` answer may
    /// be stale by the time it is used, and a cancellation may race with it,
    /// so this only approximates FIFO.
    #[must_use]
    pub fn has_queued_predecessors(&self) -> bool {
        // Read the tail before the head: the head is initialized before the
        // tail, so a non-null tail implies a visible head.
        let tail = self.tail.load_full();
        let head = self.head.load_full();
        match head {
            Some(head) if !link::is(&tail, &head) => match head.next.load_full() {
                Some(first) => !first.is_waited_by(park::current_token()),
                None => true,
            },
            _ => false,
        }
    }

    /// Returns `true` if any thread may be waiting to acquire.
    #[must_use]
    pub fn has_queued_threads(&self) -> bool {
        !link::same(&self.head.load_full(), &self.tail.load_full())
    }

    /// Returns `true` if the first queued node looks like an exclusive
    /// waiter.
    ///
    /// This is a heuristic: the answer is only reliable when the first node
    /// is not concurrently acquiring or being cancelled. Readers use it to
    /// avoid starving a writer that is probably next in line.
    #[must_use]
    pub fn apparently_first_queued_is_exclusive(&self) -> bool {
        self.head
            .load_full()
            .and_then(|head| head.next.load_full())
            .is_some_and(|first| !first.is_shared() && first.has_thread())
    }

    pub(crate) fn is_head(&self, node: &Arc<Node>) -> bool {
        link::is(&self.head.load_full(), node)
    }

    /// Appends `node` to the queue, installing the dummy head first if the
    /// queue was never used. Returns the node's predecessor.
    pub(crate) fn enqueue(&self, node: &Arc<Node>) -> Arc<Node> {
        loop {
            match self.tail.load_full() {
                None => {
                    let dummy = Node::dummy();
                    if link::cas(&self.head, &None, Some(Arc::clone(&dummy))) {
                        self.tail.store(Some(dummy));
                    }
                }
                Some(tail) => {
                    node.prev.store(Some(Arc::clone(&tail)));
                    let current = Some(Arc::clone(&tail));
                    if link::cas(&self.tail, &current, Some(Arc::clone(node))) {
                        tail.next.store(Some(Arc::clone(node)));
                        return tail;
                    }
                }
            }
        }
    }

    /// Creates and enqueues a node for the calling thread.
    pub(crate) fn add_waiter(&self, mode: Mode) -> Arc<Node> {
        let node = Node::waiter(mode);
        self.enqueue(&node);
        node
    }

    /// Makes `node` the head after it acquired. Only the acquiring thread
    /// writes the head, so a plain store suffices.
    pub(crate) fn set_head(&self, node: &Arc<Node>) {
        self.head.store(Some(Arc::clone(node)));
        node.clear_thread();
        node.prev.store(None);
    }

    /// Wakes the nearest live successor of `node`.
    pub(crate) fn unpark_successor(&self, node: &Arc<Node>) {
        let status = node.status();
        if status.is_signalling() {
            node.cas_status(status, WaitStatus::Idle);
        }
        let mut successor = node.next.load_full();
        if successor.as_ref().map_or(true, |s| s.status() == WaitStatus::Cancelled) {
            // `next` is stale or cancelled, the `prev` chain from the tail is
            // always complete.
            successor = None;
            let mut cursor = self.tail.load_full();
            while let Some(current) = cursor {
                if Arc::ptr_eq(&current, node) {
                    break;
                }
                cursor = current.prev.load_full();
                if current.status() != WaitStatus::Cancelled {
                    successor = Some(current);
                }
            }
        }
        if let Some(successor) = successor {
            successor.unpark();
        }
    }

    /// Release action for shared mode: signals the successor and makes sure
    /// the release keeps propagating.
    ///
    /// Loops until the head is stable, since a new head may appear while we
    /// signal and it may need the same treatment.
    pub(crate) fn release_shared_cascade(&self) {
        loop {
            let head = self.head.load_full();
            if let Some(h) = &head {
                if !link::is(&self.tail.load_full(), h) {
                    match h.status() {
                        WaitStatus::Signal => {
                            if !h.cas_status(WaitStatus::Signal, WaitStatus::Idle) {
                                continue;
                            }
                            self.unpark_successor(h);
                        }
                        WaitStatus::Idle => {
                            if !h.cas_status(WaitStatus::Idle, WaitStatus::Propagate) {
                                continue;
                            }
                        }
                        _ => {}
                    }
                }
            }
            if link::same(&head, &self.head.load_full()) {
                break;
            }
        }
    }

    /// Installs `node` as head after a shared acquire and, if more shared
    /// acquires may succeed, continues the release cascade.
    ///
    /// The check is conservative on purpose: both the old and the new head
    /// are consulted, which may cause unnecessary wakeups but never a lost
    /// one.
    pub(crate) fn set_head_and_propagate(&self, node: &Arc<Node>, propagate: i32) {
        let old = self.head.load_full();
        self.set_head(node);
        let signalling = |head: &Link<Node>| head.as_ref().map_or(true, |h| h.status().is_signalling());
        if propagate > 0 || signalling(&old) || signalling(&self.head.load_full()) {
            match node.next.load_full() {
                Some(next) if !next.is_shared() => {}
                _ => self.release_shared_cascade(),
            }
        }
    }

    /// Decides whether a waiter whose acquire just failed should park.
    ///
    /// Parking is only safe once the predecessor promised a signal. If it has
    /// not yet, ask for one and retry instead: the releaser checks the status
    /// before deciding whether anyone needs waking, so we must try to acquire
    /// once more after the request.
    pub(crate) fn should_park_after_failed_acquire(&self, pred: &Arc<Node>, node: &Arc<Node>) -> bool {
        match pred.status() {
            WaitStatus::Signal => true,
            WaitStatus::Cancelled => {
                let mut pred = Arc::clone(pred);
                loop {
                    pred = pred.predecessor();
                    node.prev.store(Some(Arc::clone(&pred)));
                    if pred.status() != WaitStatus::Cancelled {
                        break;
                    }
                }
                pred.next.store(Some(Arc::clone(node)));
                false
            }
            status => {
                pred.cas_status(status, WaitStatus::Signal);
                false
            }
        }
    }

    /// Abandons an in-progress acquire: marks the node cancelled, splices it
    /// out, and hands its signalling duty to a live predecessor or wakes the
    /// successor directly.
    pub(crate) fn cancel_acquire(&self, node: &Arc<Node>) {
        node.clear_thread();

        let mut pred = node.predecessor();
        while pred.status() == WaitStatus::Cancelled {
            pred = pred.predecessor();
            node.prev.store(Some(Arc::clone(&pred)));
        }
        let pred_next = pred.next.load_full();

        // Plain write: from here on other threads may skip past the node.
        node.set_status(WaitStatus::Cancelled);
        tracing::trace!(mode = ?node.mode(), "queued acquire cancelled");

        let this = Some(Arc::clone(node));
        if link::same(&self.tail.load_full(), &this) && link::cas(&self.tail, &this, Some(Arc::clone(&pred))) {
            link::cas(&pred.next, &pred_next, None);
            return;
        }

        // If the predecessor needs a signal and is not the head, link it to
        // the successor so it inherits the duty. Otherwise wake the
        // successor, which will find its way to a live predecessor.
        let pred_signals = || match pred.status() {
            WaitStatus::Signal => true,
            WaitStatus::Cancelled => false,
            status => pred.cas_status(status, WaitStatus::Signal),
        };
        if !self.is_head(&pred) && pred_signals() && pred.has_thread() {
            if let Some(next) = node.next.load_full() {
                if next.status() != WaitStatus::Cancelled {
                    link::cas(&pred.next, &pred_next, Some(next));
                }
            }
        } else {
            self.unpark_successor(node);
        }
        node.next.store(None);
    }

    /// Returns `true` if a node that started on a condition list has been
    /// transferred onto the main queue.
    pub(crate) fn is_on_sync_queue(&self, node: &Arc<Node>) -> bool {
        if node.status() == WaitStatus::Condition || node.prev.load().is_none() {
            return false;
        }
        if node.next.load().is_some() {
            return true;
        }
        // `prev` may be set while the tail CAS failed, so confirm by
        // scanning from the tail. The node is almost always close to it.
        self.find_from_tail(node)
    }

    fn find_from_tail(&self, node: &Arc<Node>) -> bool {
        let mut cursor = self.tail.load_full();
        while let Some(current) = cursor {
            if Arc::ptr_eq(&current, node) {
                return true;
            }
            cursor = current.prev.load_full();
        }
        false
    }

    /// Moves a node from a condition list onto the main queue. Returns
    /// `false` if the node was cancelled before it could be signalled.
    pub(crate) fn transfer_for_signal(&self, node: &Arc<Node>) -> bool {
        if !node.cas_status(WaitStatus::Condition, WaitStatus::Idle) {
            return false;
        }
        // Ask the predecessor to signal the node. If that fails, or the
        // predecessor is cancelled, wake the node so it resyncs by itself.
        let pred = self.enqueue(node);
        let status = pred.status();
        if status == WaitStatus::Cancelled || !pred.cas_status(status, WaitStatus::Signal) {
            node.unpark();
        }
        true
    }

    /// Moves a condition node onto the main queue after its wait was cut
    /// short by a timeout or an interrupt.
    ///
    /// Returns `true` if the waiter won the race against a concurrent
    /// signal, `false` if a signal got there first.
    pub(crate) fn transfer_after_cancelled_wait(&self, node: &Arc<Node>) -> bool {
        if node.cas_status(WaitStatus::Condition, WaitStatus::Idle) {
            self.enqueue(node);
            tracing::trace!("condition wait cancelled before signal");
            return true;
        }
        // A signal won the status race, its enqueue is under way. Spinning
        // is fine, the window is tiny.
        while !self.is_on_sync_queue(node) {
            crate::cfg::thread::yield_now();
        }
        false
    }

    /// Collects threads waiting on the queue, from tail to head.
    pub(crate) fn queued_threads(&self, filter: impl Fn(&Node) -> bool) -> Vec<Thread> {
        let mut threads = Vec::new();
        let mut cursor = self.tail.load_full();
        while let Some(node) = cursor {
            if filter(&*node) {
                if let Some(thread) = node.thread() {
                    threads.push(thread.clone());
                }
            }
            cursor = node.prev.load_full();
        }
        threads
    }

    /// Returns the number of nodes with a waiting thread, a best-effort
    /// estimate under concurrent changes.
    pub(crate) fn queue_length(&self) -> usize {
        let mut len = 0;
        let mut cursor = self.tail.load_full();
        while let Some(node) = cursor {
            if node.has_thread() {
                len += 1;
            }
            cursor = node.prev.load_full();
        }
        len
    }

    /// Returns the longest-waiting thread, if any.
    pub(crate) fn first_queued_thread(&self) -> Option<Thread> {
        if link::same(&self.head.load_full(), &self.tail.load_full()) {
            return None;
        }
        // Fast path through head.next, which may be in flux; fall back to
        // the last thread found walking backwards from the tail.
        if let Some(first) = self.head.load_full().and_then(|h| h.next.load_full()) {
            let is_first = first.prev.load_full().is_some_and(|p| self.is_head(&p));
            if let (true, Some(thread)) = (is_first, first.thread()) {
                return Some(thread.clone());
            }
        }
        self.queued_threads(|_| true).pop()
    }
}

impl Drop for SyncState {
    fn drop(&mut self) {
        // Nobody can be queued anymore; break the prev/next cycles so the
        // remaining nodes are freed.
        unlink_chain(self.tail.swap(None), |node| node.prev.load_full());
        unlink_chain(self.head.swap(None), |node| node.next.load_full());
    }
}

impl Debug for SyncState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncState")
            .field("state", &self.state())
            .field("queued", &self.has_queued_threads())
            .finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;

    use super::SyncState;
    use crate::queued::node::{Mode, Node, WaitStatus};

    #[test]
    fn state_word_cas() {
        let state = SyncState::new(0);
        assert!(state.compare_and_set_state(0, 5));
        assert!(!state.compare_and_set_state(0, 6));
        assert_eq!(state.state(), 5);
        state.set_state(0);
        assert_eq!(state.state(), 0);
    }

    #[test]
    fn exclusive_owner_tracks_current_thread() {
        let state = SyncState::new(0);
        assert_eq!(state.exclusive_owner(), None);
        state.set_exclusive_owner(true);
        assert!(state.is_owned_by_current_thread());
        let other = std::thread::scope(|s| s.spawn(|| state.is_owned_by_current_thread()).join().unwrap());
        assert!(!other);
        state.set_exclusive_owner(false);
        assert_eq!(state.exclusive_owner(), None);
    }

    #[test]
    fn enqueue_installs_dummy_head() {
        let state = SyncState::new(0);
        assert!(!state.has_queued_threads());
        let node = state.add_waiter(Mode::Exclusive);
        let head = state.head.load_full().unwrap();
        assert!(Arc::ptr_eq(&node.predecessor(), &head));
        assert!(head.thread().is_none());
        assert!(state.has_queued_threads());
        assert_eq!(state.queue_length(), 1);
        assert!(state.apparently_first_queued_is_exclusive());
        // The calling thread is the first waiter, so it has no predecessor.
        assert!(!state.has_queued_predecessors());
    }

    #[test]
    fn set_head_dequeues() {
        let state = SyncState::new(0);
        let node = state.add_waiter(Mode::Shared);
        state.set_head(&node);
        assert!(!state.has_queued_threads());
        assert!(node.prev.load().is_none());
        assert!(node.thread().is_none());
        assert_eq!(state.queue_length(), 0);
    }

    #[test]
    fn cancel_tail_unlinks_it() {
        let state = SyncState::new(0);
        let first = state.add_waiter(Mode::Exclusive);
        let second = state.add_waiter(Mode::Shared);
        state.cancel_acquire(&second);
        assert_eq!(second.status(), WaitStatus::Cancelled);
        assert!(Arc::ptr_eq(&state.tail.load_full().unwrap(), &first));
        assert!(first.next.load().is_none());
        assert_eq!(state.queue_length(), 1);
    }

    #[test]
    fn cancel_middle_links_around_it() {
        let state = SyncState::new(0);
        let first = state.add_waiter(Mode::Exclusive);
        let middle = state.add_waiter(Mode::Exclusive);
        let last = state.add_waiter(Mode::Exclusive);
        // `first` is not the head and has a thread, so it inherits the
        // duty to signal `last`.
        state.cancel_acquire(&middle);
        assert_eq!(first.status(), WaitStatus::Signal);
        assert!(Arc::ptr_eq(&first.next.load_full().unwrap(), &last));
        // `last` still points at the cancelled node until it skips it.
        assert!(!state.should_park_after_failed_acquire(&last.predecessor(), &last));
        assert!(Arc::ptr_eq(&last.predecessor(), &first));
    }

    #[test]
    fn condition_transfer() {
        let state = SyncState::new(0);
        let node = Node::condition_waiter();
        assert!(!state.is_on_sync_queue(&node));
        assert!(state.transfer_for_signal(&node));
        assert!(state.is_on_sync_queue(&node));
        assert!(!state.transfer_for_signal(&node));
        // The signal already won, the cancelled wait must report it.
        assert!(!state.transfer_after_cancelled_wait(&node));
    }

    #[test]
    fn cancelled_wait_wins_before_signal() {
        let state = SyncState::new(0);
        let node = Node::condition_waiter();
        assert!(state.transfer_after_cancelled_wait(&node));
        assert!(state.is_on_sync_queue(&node));
        assert!(!state.transfer_for_signal(&node));
    }

    #[test]
    fn queued_threads_lists_waiters() {
        let state = SyncState::new(0);
        state.add_waiter(Mode::Exclusive);
        state.add_waiter(Mode::Shared);
        assert_eq!(state.queued_threads(|_| true).len(), 2);
        assert_eq!(state.queued_threads(Node::is_shared).len(), 1);
        let first = state.first_queued_thread().unwrap();
        assert_eq!(first.id(), std::thread::current().id());
    }
}
