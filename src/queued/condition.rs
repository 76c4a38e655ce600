use core::fmt::{self, Debug, Formatter};
use std::time::{Duration, SystemTime};

use super::node::{Node, WaitStatus};
use super::sync::{Outcome, Policy, QueuedSynchronizer, SPIN_FOR_TIMEOUT_THRESHOLD};
use crate::cfg::sync::Arc;
use crate::cfg::thread::Thread;
use crate::error::{Result, SyncError};
use crate::link::Slot;
use crate::park::{self, Deadline, Wait};

/// What to do about an interrupt observed during a condition wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptMode {
    None,
    /// The interrupt came after a signal, re-assert it on exit.
    Reassert,
    /// The interrupt came before any signal, fail the wait.
    Raise,
}

/// A condition variable bound to a [`QueuedSynchronizer`].
///
/// Waiting fully releases the synchronizer, whatever its hold count, and
/// reacquires it with the same state before returning, on every exit path.
/// All methods require the calling thread to hold the synchronizer
/// exclusively and fail with [`SyncError::IllegalMonitorState`] otherwise.
///
/// Waiters form a singly linked list owned by the condition. A signal moves
/// the oldest waiter onto the synchronizer's wait queue, where it competes
/// for the lock like any other queued thread.
pub struct Condition<'a, P> {
    sync: &'a QueuedSynchronizer<P>,
    first: Slot<Node>,
    last: Slot<Node>,
}

impl<'a, P: Policy> Condition<'a, P> {
    pub(crate) fn new(sync: &'a QueuedSynchronizer<P>) -> Self {
        Self { sync, first: Slot::empty(), last: Slot::empty() }
    }

    /// Waits until signalled, ignoring interrupts. An interrupt received
    /// while waiting is re-asserted on return.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IllegalMonitorState`] if the synchronizer is not
    /// held exclusively, or the error of a failing hook.
    pub fn wait_uninterruptibly(&self) -> Result<()> {
        self.wait_with(Wait::Uninterruptible).map(drop)
    }

    /// Waits until signalled or interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Interrupted`] if interrupted before a signal,
    /// [`SyncError::IllegalMonitorState`] if the synchronizer is not held
    /// exclusively, or the error of a failing hook. The synchronizer is held
    /// again whenever the wait itself started.
    pub fn wait(&self) -> Result<()> {
        self.wait_with(Wait::Interruptible).map(drop)
    }

    /// Waits until signalled, interrupted, or `timeout` elapsed. Returns the
    /// time left, zero if the timeout elapsed.
    ///
    /// # Errors
    ///
    /// See [`wait`].
    ///
    /// [`wait`]: Self::wait
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Duration> {
        match Deadline::after(timeout) {
            Some(deadline) => {
                self.wait_with(Wait::Until(deadline))?;
                Ok(deadline.remaining())
            }
            None => self.wait().map(|()| timeout),
        }
    }

    /// Waits until signalled, interrupted, or `timeout` elapsed. Returns
    /// `Ok(false)` if the timeout elapsed before a signal.
    ///
    /// # Errors
    ///
    /// See [`wait`].
    ///
    /// [`wait`]: Self::wait
    pub fn wait_for(&self, timeout: Duration) -> Result<bool> {
        self.wait_with(Wait::timeout(timeout))
    }

    /// Waits until signalled, interrupted, or the wall clock reaches
    /// `deadline`. Returns `Ok(false)` if the deadline passed before a
    /// signal.
    ///
    /// # Errors
    ///
    /// See [`wait`].
    ///
    /// [`wait`]: Self::wait
    pub fn wait_until(&self, deadline: SystemTime) -> Result<bool> {
        self.wait_with(Wait::Until(Deadline::Wall(deadline)))
    }

    /// Moves the longest-waiting thread, if any, to the synchronizer's wait
    /// queue.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IllegalMonitorState`] if the synchronizer is not
    /// held exclusively.
    pub fn signal(&self) -> Result<()> {
        self.check_held()?;
        let state = self.sync.sync_state();
        while let Some(first) = self.first.load_full() {
            let next = first.next_waiter.swap(None);
            if next.is_none() {
                self.last.store(None);
            }
            self.first.store(next);
            // A waiter that cancelled itself loses its turn to the next one.
            if state.transfer_for_signal(&first) {
                break;
            }
        }
        Ok(())
    }

    /// Moves every waiting thread to the synchronizer's wait queue, oldest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IllegalMonitorState`] if the synchronizer is not
    /// held exclusively.
    pub fn signal_all(&self) -> Result<()> {
        self.check_held()?;
        let state = self.sync.sync_state();
        self.last.store(None);
        let mut cursor = self.first.swap(None);
        while let Some(node) = cursor {
            cursor = node.next_waiter.swap(None);
            state.transfer_for_signal(&node);
        }
        Ok(())
    }

    /// Returns `true` if any thread is waiting on this condition.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IllegalMonitorState`] if the synchronizer is not
    /// held exclusively.
    pub fn has_waiters(&self) -> Result<bool> {
        self.check_held()?;
        Ok(self.waiters().next().is_some())
    }

    /// Returns an estimate of the number of threads waiting on this
    /// condition.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IllegalMonitorState`] if the synchronizer is not
    /// held exclusively.
    pub fn wait_queue_length(&self) -> Result<usize> {
        self.check_held()?;
        Ok(self.waiters().count())
    }

    /// Returns the threads waiting on this condition, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IllegalMonitorState`] if the synchronizer is not
    /// held exclusively.
    pub fn waiting_threads(&self) -> Result<Vec<Thread>> {
        self.check_held()?;
        Ok(self.waiters().filter_map(|node| node.thread().cloned()).collect())
    }

    fn check_held(&self) -> Result<()> {
        if self.sync.is_held_exclusively()? {
            Ok(())
        } else {
            tracing::debug!("condition used without holding its lock");
            Err(SyncError::IllegalMonitorState)
        }
    }

    /// Nodes on the list that still wait for a signal.
    fn waiters(&self) -> impl Iterator<Item = Arc<Node>> {
        let mut cursor = self.first.load_full();
        core::iter::from_fn(move || {
            while let Some(node) = cursor.take() {
                cursor = node.next_waiter.load_full();
                if node.status() == WaitStatus::Condition {
                    return Some(node);
                }
            }
            None
        })
    }

    /// Appends a node for the calling thread, first sweeping the list if
    /// its tail turned out to be dead.
    fn add_waiter(&self) -> Arc<Node> {
        let mut last = self.last.load_full();
        if last.as_ref().is_some_and(|last| last.status() != WaitStatus::Condition) {
            self.unlink_cancelled_waiters();
            last = self.last.load_full();
        }
        let node = Node::condition_waiter();
        match last {
            Some(last) => last.next_waiter.store(Some(Arc::clone(&node))),
            None => self.first.store(Some(Arc::clone(&node))),
        }
        self.last.store(Some(Arc::clone(&node)));
        node
    }

    /// Drops every node that is no longer waiting for a signal. Only called
    /// while holding the lock.
    fn unlink_cancelled_waiters(&self) {
        let mut trail: Option<Arc<Node>> = None;
        let mut cursor = self.first.load_full();
        while let Some(node) = cursor {
            let next = node.next_waiter.load_full();
            if node.status() == WaitStatus::Condition {
                trail = Some(node);
            } else {
                node.next_waiter.store(None);
                match &trail {
                    Some(trail) => trail.next_waiter.store(next.clone()),
                    None => self.first.store(next.clone()),
                }
                if next.is_none() {
                    self.last.store(trail.clone());
                }
            }
            cursor = next;
        }
    }

    /// Decides how an interrupt seen while parked on the list is reported.
    fn interrupt_mode(&self, node: &Arc<Node>) -> InterruptMode {
        if self.sync.sync_state().transfer_after_cancelled_wait(node) {
            InterruptMode::Raise
        } else {
            InterruptMode::Reassert
        }
    }

    /// Shared wait protocol. Returns `Ok(false)` if a deadline passed
    /// before the node was signalled.
    fn wait_with(&self, wait: Wait) -> Result<bool> {
        if !matches!(wait, Wait::Uninterruptible) && park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        self.check_held()?;
        let node = self.add_waiter();
        let saved = self.sync.fully_release(&node)?;
        let state = self.sync.sync_state();

        let mut interrupt = InterruptMode::None;
        let mut signalled = true;
        while !state.is_on_sync_queue(&node) {
            match wait {
                Wait::Uninterruptible => {
                    park::park();
                    if park::interrupted() {
                        interrupt = InterruptMode::Reassert;
                    }
                }
                Wait::Interruptible => {
                    park::park();
                    if park::interrupted() {
                        interrupt = self.interrupt_mode(&node);
                        break;
                    }
                }
                Wait::Until(deadline) => {
                    let remaining = deadline.remaining();
                    if remaining.is_zero() {
                        signalled = !state.transfer_after_cancelled_wait(&node);
                        break;
                    }
                    if remaining >= SPIN_FOR_TIMEOUT_THRESHOLD {
                        deadline.park();
                    }
                    if park::interrupted() {
                        interrupt = self.interrupt_mode(&node);
                        break;
                    }
                }
            }
        }

        // Reacquire with the saved state, whatever made us leave the list.
        let outcome = self.sync.acquire_queued(&node, saved, Wait::Uninterruptible)?;
        if outcome == (Outcome::Acquired { interrupted: true }) && interrupt != InterruptMode::Raise {
            interrupt = InterruptMode::Reassert;
        }
        if node.next_waiter.load().is_some() {
            self.unlink_cancelled_waiters();
        }
        match interrupt {
            InterruptMode::Raise => Err(SyncError::Interrupted),
            InterruptMode::Reassert => {
                park::self_interrupt();
                Ok(signalled)
            }
            InterruptMode::None => Ok(signalled),
        }
    }
}

impl<P> Debug for Condition<'_, P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition").field("sync", self.sync).finish_non_exhaustive()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
    use std::sync::mpsc::channel;
    use std::thread;
    use std::time::{Duration, SystemTime};

    use crate::error::{Result, SyncError};
    use crate::park::{self, Interrupter};
    use crate::queued::{Policy, QueuedSynchronizer, SyncState};

    /// Reentrant exclusive lock, the state word is the hold count.
    struct Reentrant;

    impl Policy for Reentrant {
        fn try_acquire(&self, sync: &SyncState, acquires: i32) -> Result<bool> {
            let count = sync.state();
            if count == 0 {
                let acquired = sync.compare_and_set_state(0, acquires);
                if acquired {
                    sync.set_exclusive_owner(true);
                }
                return Ok(acquired);
            }
            if sync.is_owned_by_current_thread() {
                sync.set_state(count + acquires);
                return Ok(true);
            }
            Ok(false)
        }

        fn try_release(&self, sync: &SyncState, releases: i32) -> Result<bool> {
            if !sync.is_owned_by_current_thread() {
                return Err(SyncError::IllegalMonitorState);
            }
            let count = sync.state() - releases;
            let free = count == 0;
            if free {
                sync.set_exclusive_owner(false);
            }
            sync.set_state(count);
            Ok(free)
        }

        fn is_held_exclusively(&self, sync: &SyncState) -> Result<bool> {
            Ok(sync.is_owned_by_current_thread())
        }
    }

    fn wait_condition<P: Policy>(sync: &QueuedSynchronizer<P>, cond: &super::Condition<'_, P>, len: usize) {
        loop {
            sync.acquire(1).unwrap();
            let waiting = cond.wait_queue_length().unwrap();
            sync.release(1).unwrap();
            if waiting >= len {
                break;
            }
            thread::yield_now();
        }
    }

    #[test]
    fn requires_exclusive_hold() {
        let sync = &QueuedSynchronizer::new(Reentrant);
        let cond = &sync.new_condition();
        assert_eq!(cond.signal(), Err(SyncError::IllegalMonitorState));
        assert_eq!(cond.signal_all(), Err(SyncError::IllegalMonitorState));
        assert_eq!(cond.wait(), Err(SyncError::IllegalMonitorState));
        assert_eq!(cond.has_waiters(), Err(SyncError::IllegalMonitorState));
        assert_eq!(sync.state(), 0);
    }

    #[test]
    fn signal_restores_hold_count() {
        let sync = &QueuedSynchronizer::new(Reentrant);
        let cond = &sync.new_condition();
        let ready = &AtomicBool::new(false);
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                sync.acquire(1).unwrap();
                sync.acquire(1).unwrap();
                while !ready.load(SeqCst) {
                    cond.wait().unwrap();
                }
                let held = sync.state();
                sync.release(2).unwrap();
                held
            });
            wait_condition(sync, cond, 1);
            sync.acquire(1).unwrap();
            assert!(cond.has_waiters().unwrap());
            assert_eq!(cond.waiting_threads().unwrap()[0].id(), waiter.thread().id());
            ready.store(true, SeqCst);
            cond.signal().unwrap();
            assert!(!cond.has_waiters().unwrap());
            sync.release(1).unwrap();
            assert_eq!(waiter.join().unwrap(), 2);
        });
        assert_eq!(sync.state(), 0);
    }

    #[test]
    fn signal_all_wakes_every_waiter() {
        const WAITERS: usize = 4;
        let sync = &QueuedSynchronizer::new(Reentrant);
        let cond = &sync.new_condition();
        let ready = &AtomicBool::new(false);
        let woken = &AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..WAITERS {
                s.spawn(|| {
                    sync.acquire(1).unwrap();
                    while !ready.load(SeqCst) {
                        cond.wait().unwrap();
                    }
                    woken.fetch_add(1, SeqCst);
                    sync.release(1).unwrap();
                });
            }
            wait_condition(sync, cond, WAITERS);
            sync.acquire(1).unwrap();
            assert_eq!(cond.wait_queue_length().unwrap(), WAITERS);
            ready.store(true, SeqCst);
            cond.signal_all().unwrap();
            assert_eq!(cond.wait_queue_length().unwrap(), 0);
            sync.release(1).unwrap();
        });
        assert_eq!(woken.load(SeqCst), WAITERS);
    }

    #[test]
    fn timed_wait_reacquires() {
        let sync = &QueuedSynchronizer::new(Reentrant);
        let cond = &sync.new_condition();
        sync.acquire(3).unwrap();
        assert!(!cond.wait_for(Duration::from_millis(5)).unwrap());
        assert_eq!(sync.state(), 3);
        assert_eq!(cond.wait_timeout(Duration::from_millis(5)).unwrap(), Duration::ZERO);
        assert!(!cond.wait_until(SystemTime::now()).unwrap());
        assert!(sync.is_held_exclusively().unwrap());
        // Timed out nodes are swept lazily on the next wait.
        assert!(!cond.has_waiters().unwrap());
        assert_eq!(cond.wait_queue_length().unwrap(), 0);
        sync.release(3).unwrap();
    }

    #[test]
    fn interrupt_before_signal_raises() {
        let sync = &QueuedSynchronizer::new(Reentrant);
        let cond = &sync.new_condition();
        thread::scope(|s| {
            let (tx, rx) = channel();
            let waiter = s.spawn(move || {
                tx.send(Interrupter::current()).unwrap();
                sync.acquire(1).unwrap();
                let result = cond.wait();
                let held = sync.is_held_exclusively().unwrap();
                sync.release(1).unwrap();
                (result, held)
            });
            let interrupter = rx.recv().unwrap();
            wait_condition(sync, cond, 1);
            interrupter.interrupt();
            let (result, held) = waiter.join().unwrap();
            assert_eq!(result, Err(SyncError::Interrupted));
            assert!(held);
        });
    }

    #[test]
    fn uninterruptible_wait_reasserts() {
        let sync = &QueuedSynchronizer::new(Reentrant);
        let cond = &sync.new_condition();
        let ready = &AtomicBool::new(false);
        thread::scope(|s| {
            let (tx, rx) = channel();
            let waiter = s.spawn(move || {
                tx.send(Interrupter::current()).unwrap();
                sync.acquire(1).unwrap();
                while !ready.load(SeqCst) {
                    cond.wait_uninterruptibly().unwrap();
                }
                sync.release(1).unwrap();
                park::interrupted()
            });
            let interrupter = rx.recv().unwrap();
            wait_condition(sync, cond, 1);
            interrupter.interrupt();
            sync.acquire(1).unwrap();
            ready.store(true, SeqCst);
            cond.signal().unwrap();
            sync.release(1).unwrap();
            assert!(waiter.join().unwrap());
        });
    }
}
