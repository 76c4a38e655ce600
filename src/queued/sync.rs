use core::fmt::{self, Debug, Formatter};
use core::mem;
use std::time::Duration;

use super::condition::Condition;
use super::node::{Mode, Node, WaitStatus};
use super::state::SyncState;
use crate::cfg::sync::Arc;
use crate::cfg::thread::Thread;
use crate::error::{Result, SyncError};
use crate::park::{self, Wait};

/// Remaining time below which a timed waiter spins instead of parking.
pub(crate) const SPIN_FOR_TIMEOUT_THRESHOLD: Duration = Duration::from_micros(1);

/// The hooks a lock type implements to give meaning to the state word.
///
/// Hooks must be thread safe, non-blocking and fast. They are called both
/// on the barging fast path and by queued threads that reached the front of
/// the queue. A mode the lock type does not use may keep the default
/// implementation, which reports [`SyncError::Unsupported`].
///
/// Errors returned by a hook while its caller is queued cancel the caller's
/// node before they propagate, so the queue stays consistent.
///
/// # Example
///
/// A non-reentrant mutual exclusion lock, using `0` for unlocked and `1` for
/// locked:
///
/// ```
/// use queued_sync::queued::{Policy, QueuedSynchronizer, SyncState};
/// use queued_sync::{Result, SyncError};
///
/// struct Exclusive;
///
/// impl Policy for Exclusive {
///     fn try_acquire(&self, sync: &SyncState, _: i32) -> Result<bool> {
///         let acquired = sync.compare_and_set_state(0, 1);
///         if acquired {
///             sync.set_exclusive_owner(true);
///         }
///         Ok(acquired)
///     }
///
///     fn try_release(&self, sync: &SyncState, _: i32) -> Result<bool> {
///         if sync.state() == 0 {
///             return Err(SyncError::IllegalMonitorState);
///         }
///         sync.set_exclusive_owner(false);
///         sync.set_state(0);
///         Ok(true)
///     }
///
///     fn is_held_exclusively(&self, sync: &SyncState) -> Result<bool> {
///         Ok(sync.state() == 1)
///     }
/// }
///
/// let sync = QueuedSynchronizer::new(Exclusive);
/// sync.acquire(1)?;
/// assert!(sync.is_held_exclusively()?);
/// assert!(sync.release(1)?);
/// assert_eq!(sync.state(), 0);
/// # Ok::<(), SyncError>(())
/// ```
pub trait Policy {
    /// Attempts to acquire in exclusive mode. Returns `Ok(true)` if
    /// exclusive ownership was taken.
    fn try_acquire(&self, sync: &SyncState, arg: i32) -> Result<bool> {
        let _ = (sync, arg);
        Err(SyncError::Unsupported)
    }

    /// Attempts to release in exclusive mode. Returns `Ok(true)` if the
    /// synchronizer is now fully released and a waiter may acquire.
    fn try_release(&self, sync: &SyncState, arg: i32) -> Result<bool> {
        let _ = (sync, arg);
        Err(SyncError::Unsupported)
    }

    /// Attempts to acquire in shared mode.
    ///
    /// A negative value is a failure. Zero means the acquire succeeded but
    /// no later shared acquire can. A positive value means the next shared
    /// waiter may succeed as well, and the wakeup cascades to it.
    fn try_acquire_shared(&self, sync: &SyncState, arg: i32) -> Result<i32> {
        let _ = (sync, arg);
        Err(SyncError::Unsupported)
    }

    /// Attempts to release in shared mode. Returns `Ok(true)` if a waiting
    /// acquire, shared or exclusive, may now succeed.
    fn try_release_shared(&self, sync: &SyncState, arg: i32) -> Result<bool> {
        let _ = (sync, arg);
        Err(SyncError::Unsupported)
    }

    /// Returns `Ok(true)` if the calling thread holds the synchronizer
    /// exclusively. Only needed by lock types that hand out conditions.
    fn is_held_exclusively(&self, sync: &SyncState) -> Result<bool> {
        let _ = sync;
        Err(SyncError::Unsupported)
    }
}

impl Wait {
    /// Blocks once, if `should_park`, then polls the interrupt status.
    fn block(self, should_park: bool, interrupted: &mut bool) -> Result<()> {
        match self {
            Self::Uninterruptible => {
                if should_park {
                    park::park();
                    *interrupted |= park::interrupted();
                }
            }
            Self::Interruptible => {
                if should_park {
                    park::park();
                    if park::interrupted() {
                        return Err(SyncError::Interrupted);
                    }
                }
            }
            Self::Until(deadline) => {
                if should_park && deadline.remaining() > SPIN_FOR_TIMEOUT_THRESHOLD {
                    deadline.park();
                }
                if park::interrupted() {
                    return Err(SyncError::Interrupted);
                }
            }
        }
        Ok(())
    }
}

/// How a queued acquire ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The node acquired and is now the head. `interrupted` reports whether
    /// an interrupt was swallowed by an uninterruptible wait.
    Acquired { interrupted: bool },
    /// The deadline passed, the node was cancelled.
    TimedOut,
}

/// A blocking synchronizer built from a [`Policy`] over a [`SyncState`].
///
/// Acquires first try the policy hook directly, so newly arriving threads
/// may barge ahead of queued ones. Only when the hook fails is the calling
/// thread wrapped in a node, appended to the wait queue, and parked until a
/// release wakes it at the front of the queue. Policies that need FIFO
/// order refuse to barge by checking
/// [`SyncState::has_queued_predecessors`].
///
/// The `arg` passed to every operation is handed to the hooks untouched.
pub struct QueuedSynchronizer<P> {
    state: SyncState,
    policy: P,
}

impl<P: Policy> QueuedSynchronizer<P> {
    /// Creates a synchronizer with a zero state word.
    pub fn new(policy: P) -> Self {
        Self::with_state(policy, 0)
    }

    /// Creates a synchronizer with the given initial state word.
    pub fn with_state(policy: P, state: i32) -> Self {
        Self { state: SyncState::new(state), policy }
    }

    /// Returns the current value of the state word.
    #[must_use]
    pub fn state(&self) -> i32 {
        self.state.state()
    }

    /// Returns the policy.
    pub const fn policy(&self) -> &P {
        &self.policy
    }

    /// Returns the state and queue the policy hooks operate on.
    pub const fn sync_state(&self) -> &SyncState {
        &self.state
    }

    /// Acquires in exclusive mode, blocking until it succeeds.
    ///
    /// Interrupts do not abort the wait. If one arrives while queued, the
    /// interrupt status is re-asserted once acquired.
    ///
    /// # Errors
    ///
    /// Returns the error of a failing hook.
    pub fn acquire(&self, arg: i32) -> Result<()> {
        if !self.policy.try_acquire(&self.state, arg)? {
            let outcome = self.enqueue_and_acquire(Mode::Exclusive, arg, Wait::Uninterruptible)?;
            if outcome == (Outcome::Acquired { interrupted: true }) {
                park::self_interrupt();
            }
        }
        Ok(())
    }

    /// Acquires in exclusive mode, aborting if interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Interrupted`] if the thread was interrupted
    /// before or while waiting, or the error of a failing hook.
    pub fn acquire_interruptibly(&self, arg: i32) -> Result<()> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        if !self.policy.try_acquire(&self.state, arg)? {
            self.enqueue_and_acquire(Mode::Exclusive, arg, Wait::Interruptible)?;
        }
        Ok(())
    }

    /// Acquires in exclusive mode, giving up after `timeout`. Returns
    /// `Ok(false)` if the timeout elapsed first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Interrupted`] if the thread was interrupted
    /// before or while waiting, or the error of a failing hook.
    pub fn try_acquire_for(&self, arg: i32, timeout: Duration) -> Result<bool> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        if self.policy.try_acquire(&self.state, arg)? {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        let outcome = self.enqueue_and_acquire(Mode::Exclusive, arg, Wait::timeout(timeout))?;
        Ok(outcome != Outcome::TimedOut)
    }

    /// Releases in exclusive mode. Returns `Ok(true)` if the hook reported
    /// the synchronizer fully released, in which case the first live waiter
    /// is woken.
    ///
    /// # Errors
    ///
    /// Returns the error of the release hook.
    pub fn release(&self, arg: i32) -> Result<bool> {
        if !self.policy.try_release(&self.state, arg)? {
            return Ok(false);
        }
        if let Some(head) = self.state.head.load_full() {
            if head.status() != WaitStatus::Idle {
                self.state.unpark_successor(&head);
            }
        }
        Ok(true)
    }

    /// Acquires in shared mode, blocking until it succeeds. Interrupts are
    /// handled as in [`acquire`].
    ///
    /// # Errors
    ///
    /// Returns the error of a failing hook.
    ///
    /// [`acquire`]: Self::acquire
    pub fn acquire_shared(&self, arg: i32) -> Result<()> {
        if self.policy.try_acquire_shared(&self.state, arg)? < 0 {
            let outcome = self.enqueue_and_acquire(Mode::Shared, arg, Wait::Uninterruptible)?;
            if outcome == (Outcome::Acquired { interrupted: true }) {
                park::self_interrupt();
            }
        }
        Ok(())
    }

    /// Acquires in shared mode, aborting if interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Interrupted`] if the thread was interrupted
    /// before or while waiting, or the error of a failing hook.
    pub fn acquire_shared_interruptibly(&self, arg: i32) -> Result<()> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        if self.policy.try_acquire_shared(&self.state, arg)? < 0 {
            self.enqueue_and_acquire(Mode::Shared, arg, Wait::Interruptible)?;
        }
        Ok(())
    }

    /// Acquires in shared mode, giving up after `timeout`. Returns
    /// `Ok(false)` if the timeout elapsed first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Interrupted`] if the thread was interrupted
    /// before or while waiting, or the error of a failing hook.
    pub fn try_acquire_shared_for(&self, arg: i32, timeout: Duration) -> Result<bool> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        if self.policy.try_acquire_shared(&self.state, arg)? >= 0 {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        let outcome = self.enqueue_and_acquire(Mode::Shared, arg, Wait::timeout(timeout))?;
        Ok(outcome != Outcome::TimedOut)
    }

    /// Releases in shared mode. Returns `Ok(true)` if the hook allowed
    /// waiters to proceed, in which case the release cascades through the
    /// queue.
    ///
    /// # Errors
    ///
    /// Returns the error of the release hook.
    pub fn release_shared(&self, arg: i32) -> Result<bool> {
        if !self.policy.try_release_shared(&self.state, arg)? {
            return Ok(false);
        }
        self.state.release_shared_cascade();
        Ok(true)
    }

    /// Returns whether the calling thread holds the synchronizer
    /// exclusively, according to the policy.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unsupported`] if the policy does not track it.
    pub fn is_held_exclusively(&self) -> Result<bool> {
        self.policy.is_held_exclusively(&self.state)
    }

    /// Creates a condition bound to this synchronizer.
    ///
    /// Waiting on and signalling the condition requires holding the
    /// synchronizer exclusively.
    pub fn new_condition(&self) -> Condition<'_, P> {
        Condition::new(self)
    }

    /// Returns `true` if any thread may be waiting to acquire.
    #[must_use]
    pub fn has_queued_threads(&self) -> bool {
        self.state.has_queued_threads()
    }

    /// Returns `true` if any thread ever had to wait, i.e. the queue was
    /// ever initialized.
    #[must_use]
    pub fn has_contended(&self) -> bool {
        self.state.head.load().is_some()
    }

    /// Returns the thread that has been waiting the longest, if any.
    #[must_use]
    pub fn first_queued_thread(&self) -> Option<Thread> {
        self.state.first_queued_thread()
    }

    /// Returns `true` if `thread` is currently queued.
    #[must_use]
    pub fn is_queued(&self, thread: &Thread) -> bool {
        self.state.queued_threads(|_| true).iter().any(|queued| queued.id() == thread.id())
    }

    /// Returns an estimate of the number of waiting threads.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.state.queue_length()
    }

    /// Returns the waiting threads, most recently queued first.
    #[must_use]
    pub fn queued_threads(&self) -> Vec<Thread> {
        self.state.queued_threads(|_| true)
    }

    /// Returns the threads waiting in exclusive mode.
    #[must_use]
    pub fn exclusive_queued_threads(&self) -> Vec<Thread> {
        self.state.queued_threads(|node| !node.is_shared())
    }

    /// Returns the threads waiting in shared mode.
    #[must_use]
    pub fn shared_queued_threads(&self) -> Vec<Thread> {
        self.state.queued_threads(Node::is_shared)
    }

    /// See [`SyncState::has_queued_predecessors`].
    #[must_use]
    pub fn has_queued_predecessors(&self) -> bool {
        self.state.has_queued_predecessors()
    }

    fn enqueue_and_acquire(&self, mode: Mode, arg: i32, wait: Wait) -> Result<Outcome> {
        let node = self.state.add_waiter(mode);
        self.acquire_queued(&node, arg, wait)
    }

    /// Runs the acquire loop for a node already on the queue. The node is
    /// cancelled unless it acquired, including when a hook panics.
    pub(crate) fn acquire_queued(&self, node: &Arc<Node>, arg: i32, wait: Wait) -> Result<Outcome> {
        let cancel = CancelOnDrop { state: &self.state, node };
        let outcome = self.acquire_queued_loop(node, arg, wait);
        if matches!(outcome, Ok(Outcome::Acquired { .. })) {
            mem::forget(cancel);
        }
        outcome
    }

    fn acquire_queued_loop(&self, node: &Arc<Node>, arg: i32, wait: Wait) -> Result<Outcome> {
        let mut interrupted = false;
        loop {
            let pred = node.predecessor();
            if self.state.is_head(&pred) && self.try_acquire_at_head(node, arg)? {
                pred.next.store(None);
                return Ok(Outcome::Acquired { interrupted });
            }
            if wait.expired() {
                return Ok(Outcome::TimedOut);
            }
            let should_park = self.state.should_park_after_failed_acquire(&pred, node);
            wait.block(should_park, &mut interrupted)?;
        }
    }

    /// Retries the hook matching the node's mode and installs the node as
    /// head on success.
    fn try_acquire_at_head(&self, node: &Arc<Node>, arg: i32) -> Result<bool> {
        match node.mode() {
            Mode::Exclusive => {
                let acquired = self.policy.try_acquire(&self.state, arg)?;
                if acquired {
                    self.state.set_head(node);
                }
                Ok(acquired)
            }
            Mode::Shared => {
                let propagate = self.policy.try_acquire_shared(&self.state, arg)?;
                if propagate >= 0 {
                    self.state.set_head_and_propagate(node, propagate);
                }
                Ok(propagate >= 0)
            }
        }
    }

    /// Releases with the current state word as argument, returning it so it
    /// can be restored on reacquire. On failure the condition node is
    /// cancelled.
    pub(crate) fn fully_release(&self, node: &Node) -> Result<i32> {
        let saved = self.state();
        let released = self.release(saved).and_then(|released| {
            released.then_some(saved).ok_or(SyncError::IllegalMonitorState)
        });
        if released.is_err() {
            node.set_status(WaitStatus::Cancelled);
        }
        released
    }
}

/// Cancels a queued node on drop, so that a waiter leaving the queue without
/// acquiring never strands its successors.
struct CancelOnDrop<'a> {
    state: &'a SyncState,
    node: &'a Arc<Node>,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        self.state.cancel_acquire(self.node);
    }
}

impl<P: Policy + Default> Default for QueuedSynchronizer<P> {
    fn default() -> Self {
        Self::new(P::default())
    }
}

impl<P> Debug for QueuedSynchronizer<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedSynchronizer").field("state", &self.state).finish_non_exhaustive()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
    use std::sync::mpsc::channel;
    use std::thread;
    use std::time::Duration;

    use super::{Policy, QueuedSynchronizer};
    use crate::error::{Result, SyncError};
    use crate::park::{self, Interrupter};
    use crate::queued::SyncState;

    /// Non-reentrant exclusive lock: `0` free, `1` held.
    struct Exclusive;

    impl Policy for Exclusive {
        fn try_acquire(&self, sync: &SyncState, _: i32) -> Result<bool> {
            let acquired = sync.compare_and_set_state(0, 1);
            if acquired {
                sync.set_exclusive_owner(true);
            }
            Ok(acquired)
        }

        fn try_release(&self, sync: &SyncState, _: i32) -> Result<bool> {
            if !sync.is_owned_by_current_thread() {
                return Err(SyncError::IllegalMonitorState);
            }
            sync.set_exclusive_owner(false);
            sync.set_state(0);
            Ok(true)
        }

        fn is_held_exclusively(&self, sync: &SyncState) -> Result<bool> {
            Ok(sync.is_owned_by_current_thread())
        }
    }

    /// One-shot latch: shared acquires succeed once the state is non-zero.
    struct Latch;

    impl Policy for Latch {
        fn try_acquire_shared(&self, sync: &SyncState, _: i32) -> Result<i32> {
            Ok(if sync.state() != 0 { 1 } else { -1 })
        }

        fn try_release_shared(&self, sync: &SyncState, _: i32) -> Result<bool> {
            sync.set_state(1);
            Ok(true)
        }
    }

    fn wait_queued<P: Policy>(sync: &QueuedSynchronizer<P>, len: usize) {
        while sync.queue_length() < len {
            thread::yield_now();
        }
    }

    #[test]
    fn unsupported_hooks() {
        let sync = QueuedSynchronizer::new(Latch);
        assert_eq!(sync.acquire(1), Err(SyncError::Unsupported));
        assert_eq!(sync.release(1), Err(SyncError::Unsupported));
        assert_eq!(sync.is_held_exclusively(), Err(SyncError::Unsupported));
        assert!(!sync.has_contended());
    }

    #[test]
    fn exclusive_round_trip() {
        let sync = QueuedSynchronizer::new(Exclusive);
        sync.acquire(1).unwrap();
        assert_eq!(sync.state(), 1);
        assert!(sync.is_held_exclusively().unwrap());
        assert!(sync.release(1).unwrap());
        assert_eq!(sync.state(), 0);
        assert!(!sync.has_queued_threads());
    }

    #[test]
    fn release_wakes_queued_waiter() {
        let sync = QueuedSynchronizer::new(Exclusive);
        sync.acquire(1).unwrap();
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                sync.acquire(1).unwrap();
                sync.release(1).unwrap();
            });
            wait_queued(&sync, 1);
            assert!(sync.has_contended());
            assert!(sync.is_queued(waiter.thread()));
            assert_eq!(sync.exclusive_queued_threads().len(), 1);
            assert!(sync.shared_queued_threads().is_empty());
            sync.release(1).unwrap();
            waiter.join().unwrap();
        });
        assert_eq!(sync.state(), 0);
        assert_eq!(sync.queue_length(), 0);
    }

    #[test]
    fn mutual_exclusion() {
        const THREADS: usize = 8;
        const ITERS: usize = 500;
        let sync = QueuedSynchronizer::new(Exclusive);
        let inside = AtomicUsize::new(0);
        let total = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..ITERS {
                        sync.acquire(1).unwrap();
                        assert_eq!(inside.fetch_add(1, Relaxed), 0);
                        total.fetch_add(1, Relaxed);
                        inside.fetch_sub(1, Relaxed);
                        sync.release(1).unwrap();
                    }
                });
            }
        });
        assert_eq!(total.load(Relaxed), THREADS * ITERS);
        assert_eq!(sync.state(), 0);
    }

    #[test]
    fn latch_wakes_all_shared_waiters() {
        const WAITERS: usize = 4;
        let sync = QueuedSynchronizer::new(Latch);
        thread::scope(|s| {
            let handles: Vec<_> = (0..WAITERS).map(|_| s.spawn(|| sync.acquire_shared(1))).collect();
            wait_queued(&sync, WAITERS);
            assert_eq!(sync.shared_queued_threads().len(), WAITERS);
            assert!(sync.release_shared(1).unwrap());
            for handle in handles {
                handle.join().unwrap().unwrap();
            }
        });
        assert!(sync.try_acquire_shared_for(1, Duration::ZERO).unwrap());
    }

    #[test]
    fn timed_acquire_gives_up() {
        let sync = QueuedSynchronizer::new(Exclusive);
        sync.acquire(1).unwrap();
        thread::scope(|s| {
            let acquired = s.spawn(|| sync.try_acquire_for(1, Duration::from_millis(20))).join().unwrap();
            assert_eq!(acquired, Ok(false));
            let acquired = s.spawn(|| sync.try_acquire_for(1, Duration::ZERO)).join().unwrap();
            assert_eq!(acquired, Ok(false));
        });
        assert_eq!(sync.queue_length(), 0);
        assert!(!sync.has_queued_threads());
        sync.release(1).unwrap();

        let shared = QueuedSynchronizer::new(Latch);
        assert_eq!(shared.try_acquire_shared_for(1, Duration::from_millis(5)), Ok(false));
        assert_eq!(shared.queue_length(), 0);
    }

    #[test]
    fn cancelled_waiter_in_the_middle_is_skipped() {
        let sync = QueuedSynchronizer::new(Exclusive);
        let acquired = AtomicUsize::new(0);
        let untimed = || {
            sync.acquire(1).unwrap();
            acquired.fetch_add(1, Relaxed);
            sync.release(1).unwrap();
        };
        sync.acquire(1).unwrap();
        thread::scope(|s| {
            let first = s.spawn(untimed);
            wait_queued(&sync, 1);
            let timed = s.spawn(|| sync.try_acquire_for(1, Duration::from_millis(250)));
            wait_queued(&sync, 2);
            let last = s.spawn(untimed);
            wait_queued(&sync, 3);
            assert_eq!(timed.join().unwrap(), Ok(false));
            assert_eq!(sync.queue_length(), 2);
            sync.release(1).unwrap();
            first.join().unwrap();
            last.join().unwrap();
        });
        assert_eq!(acquired.load(Relaxed), 2);
        assert!(!sync.has_queued_threads());
    }

    #[test]
    fn interruptible_acquire_aborts() {
        let sync = &QueuedSynchronizer::new(Exclusive);
        sync.acquire(1).unwrap();
        thread::scope(|s| {
            let (tx, rx) = channel();
            let waiter = s.spawn(move || {
                tx.send(Interrupter::current()).unwrap();
                sync.acquire_interruptibly(1)
            });
            let interrupter = rx.recv().unwrap();
            wait_queued(sync, 1);
            interrupter.interrupt();
            assert_eq!(waiter.join().unwrap(), Err(SyncError::Interrupted));
        });
        assert_eq!(sync.queue_length(), 0);
        sync.release(1).unwrap();
    }

    #[test]
    fn interrupted_before_acquire() {
        let sync = QueuedSynchronizer::new(Exclusive);
        Interrupter::current().interrupt();
        assert_eq!(sync.acquire_interruptibly(1), Err(SyncError::Interrupted));
        assert!(!park::is_interrupted());
        Interrupter::current().interrupt();
        assert_eq!(sync.try_acquire_for(1, Duration::from_secs(1)), Err(SyncError::Interrupted));
        assert_eq!(sync.state(), 0);
    }

    #[test]
    fn uninterruptible_acquire_reasserts_interrupt() {
        let sync = &QueuedSynchronizer::new(Exclusive);
        sync.acquire(1).unwrap();
        thread::scope(|s| {
            let (tx, rx) = channel();
            let waiter = s.spawn(move || {
                tx.send(Interrupter::current()).unwrap();
                sync.acquire(1).unwrap();
                sync.release(1).unwrap();
                park::interrupted()
            });
            let interrupter = rx.recv().unwrap();
            wait_queued(sync, 1);
            interrupter.interrupt();
            sync.release(1).unwrap();
            assert!(waiter.join().unwrap());
        });
    }

    #[test]
    fn unlock_by_non_owner_fails() {
        let sync = QueuedSynchronizer::new(Exclusive);
        sync.acquire(1).unwrap();
        thread::scope(|s| {
            let released = s.spawn(|| sync.release(1)).join().unwrap();
            assert_eq!(released, Err(SyncError::IllegalMonitorState));
        });
        assert!(sync.release(1).unwrap());
    }
}
