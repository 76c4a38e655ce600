use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use std::time::Duration;

use super::{count_overflow, infallible, not_held, Fairness, Lock, NonFair};
use crate::cfg::thread::Thread;
use crate::error::Result;
use crate::queued::{Condition, Policy, QueuedSynchronizer, SyncState};

/// Policy of [`ReentrantLock`]: the state word is the owner's hold count.
pub struct ReentrantPolicy<F> {
    fairness: PhantomData<fn() -> F>,
}

impl<F> ReentrantPolicy<F> {
    const fn new() -> Self {
        Self { fairness: PhantomData }
    }

    /// Acquires regardless of queued threads, or re-enters.
    fn barge(sync: &SyncState, acquires: i32) -> bool {
        match sync.state() {
            0 => {
                let acquired = sync.compare_and_set_state(0, acquires);
                if acquired {
                    sync.set_exclusive_owner(true);
                }
                acquired
            }
            holds => Self::reenter(sync, holds, acquires),
        }
    }

    fn reenter(sync: &SyncState, holds: i32, acquires: i32) -> bool {
        if !sync.is_owned_by_current_thread() {
            return false;
        }
        let Some(holds) = holds.checked_add(acquires) else { count_overflow() };
        sync.set_state(holds);
        true
    }
}

impl<F: Fairness> Policy for ReentrantPolicy<F> {
    fn try_acquire(&self, sync: &SyncState, acquires: i32) -> Result<bool> {
        Ok(match sync.state() {
            0 if F::writer_should_block(sync) => false,
            0 => Self::barge(sync, acquires),
            holds => Self::reenter(sync, holds, acquires),
        })
    }

    fn try_release(&self, sync: &SyncState, releases: i32) -> Result<bool> {
        if !sync.is_owned_by_current_thread() {
            return Err(not_held());
        }
        let holds = sync.state() - releases;
        let free = holds == 0;
        if free {
            sync.set_exclusive_owner(false);
        }
        sync.set_state(holds);
        Ok(free)
    }

    fn is_held_exclusively(&self, sync: &SyncState) -> Result<bool> {
        Ok(sync.is_owned_by_current_thread())
    }
}

/// A reentrant mutual exclusion lock.
///
/// The lock is owned by the thread that last locked it and has not yet
/// unlocked it. The owner may lock it again, each lock must be matched by an
/// unlock before the lock is free. A lock supports up to `i32::MAX` holds by
/// the same thread, one more panics.
///
/// `F` selects the [`Fairness`]. [`try_lock`] always barges, even on a
/// fair lock.
///
/// # Examples
///
/// ```
/// use queued_sync::locks::{Fair, Lock, ReentrantLock};
///
/// let lock: ReentrantLock<Fair> = ReentrantLock::new();
/// lock.lock();
/// lock.lock();
/// assert_eq!(lock.hold_count(), 2);
/// lock.unlock().unwrap();
/// assert!(lock.is_locked());
/// lock.unlock().unwrap();
/// assert!(!lock.is_locked());
/// assert!(lock.unlock().is_err());
/// ```
///
/// [`try_lock`]: Lock::try_lock
pub struct ReentrantLock<F = NonFair> {
    sync: QueuedSynchronizer<ReentrantPolicy<F>>,
}

impl<F: Fairness> ReentrantLock<F> {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self { sync: QueuedSynchronizer::new(ReentrantPolicy::new()) }
    }

    /// Returns the number of holds on this lock by the calling thread.
    #[must_use]
    pub fn hold_count(&self) -> u32 {
        if self.is_held_by_current_thread() {
            self.sync.state().unsigned_abs()
        } else {
            0
        }
    }

    /// Returns `true` if the calling thread holds this lock.
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.sync.sync_state().is_owned_by_current_thread()
    }

    /// Returns `true` if any thread holds this lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.sync.state() != 0
    }

    /// Returns `true` if this lock is fair.
    #[must_use]
    pub fn is_fair(&self) -> bool {
        F::is_fair()
    }

    /// Returns `true` if any thread may be waiting to acquire this lock.
    #[must_use]
    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }

    /// Returns `true` if `thread` may be waiting to acquire this lock.
    #[must_use]
    pub fn has_queued_thread(&self, thread: &Thread) -> bool {
        self.sync.is_queued(thread)
    }

    /// Returns an estimate of the number of threads waiting to acquire.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.sync.queue_length()
    }

    /// Returns the threads that may be waiting to acquire.
    #[must_use]
    pub fn queued_threads(&self) -> Vec<Thread> {
        self.sync.queued_threads()
    }
}

impl<F: Fairness> Lock for ReentrantLock<F> {
    type Policy = ReentrantPolicy<F>;

    fn lock(&self) {
        infallible(self.sync.acquire(1));
    }

    fn lock_interruptibly(&self) -> Result<()> {
        self.sync.acquire_interruptibly(1)
    }

    fn try_lock(&self) -> bool {
        ReentrantPolicy::<F>::barge(self.sync.sync_state(), 1)
    }

    fn try_lock_for(&self, timeout: Duration) -> Result<bool> {
        self.sync.try_acquire_for(1, timeout)
    }

    fn unlock(&self) -> Result<()> {
        self.sync.release(1).map(drop)
    }

    fn new_condition(&self) -> Result<Condition<'_, Self::Policy>> {
        Ok(self.sync.new_condition())
    }
}

impl<F: Fairness> Default for ReentrantLock<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Fairness> Debug for ReentrantLock<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("fair", &F::is_fair())
            .field("locked", &self.is_locked())
            .field("owner", &self.sync.sync_state().exclusive_owner())
            .finish()
    }
}

#[cfg(all(not(loom), test))]
impl<F: Fairness> crate::test::RawLock for ReentrantLock<F> {
    fn acquire(&self) {
        self.lock();
    }

    fn release(&self) {
        infallible(self.unlock());
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    use super::ReentrantLock;
    use crate::error::SyncError;
    use crate::locks::{Fair, Lock, NonFair};
    use crate::test::{tests, Guarded};

    fn wait_queued<F: crate::locks::Fairness>(lock: &ReentrantLock<F>, len: usize) {
        while lock.queue_length() < len {
            thread::yield_now();
        }
    }

    #[test]
    fn lots_and_lots_lock_fair() {
        tests::lots_and_lots_lock::<Guarded<ReentrantLock<Fair>, _>>();
    }

    #[test]
    fn lots_and_lots_lock_non_fair() {
        tests::lots_and_lots_lock::<Guarded<ReentrantLock<NonFair>, _>>();
    }

    #[test]
    fn test_lock_arc_access_in_unwind() {
        tests::test_lock_arc_access_in_unwind::<Guarded<ReentrantLock, _>>();
    }

    #[test]
    fn waiter_wakes_after_last_release() {
        let lock: ReentrantLock = ReentrantLock::new();
        let acquired = AtomicBool::new(false);
        lock.lock();
        lock.lock();
        assert_eq!(lock.hold_count(), 2);
        thread::scope(|s| {
            s.spawn(|| {
                lock.lock();
                acquired.store(true, SeqCst);
                lock.unlock().unwrap();
            });
            wait_queued(&lock, 1);
            lock.unlock().unwrap();
            assert!(lock.is_locked() && lock.is_held_by_current_thread());
            thread::sleep(Duration::from_millis(10));
            assert!(!acquired.load(SeqCst));
            lock.unlock().unwrap();
        });
        assert!(acquired.load(SeqCst));
        assert!(!lock.is_locked());
    }

    #[test]
    fn fair_lock_is_fifo() {
        const WAITERS: usize = 4;
        let lock: ReentrantLock<Fair> = ReentrantLock::new();
        let order = Mutex::new(Vec::new());
        lock.lock();
        thread::scope(|s| {
            for id in 0..WAITERS {
                let (lock, order) = (&lock, &order);
                s.spawn(move || {
                    lock.lock();
                    order.lock().unwrap().push(id);
                    lock.unlock().unwrap();
                });
                wait_queued(lock, id + 1);
            }
            lock.unlock().unwrap();
        });
        assert_eq!(*order.lock().unwrap(), [0, 1, 2, 3]);
    }

    #[test]
    fn try_lock_barges_and_reenters() {
        let lock: ReentrantLock<Fair> = ReentrantLock::new();
        assert!(lock.is_fair());
        assert!(lock.try_lock());
        assert!(lock.try_lock());
        assert_eq!(lock.hold_count(), 2);
        thread::scope(|s| {
            s.spawn(|| {
                assert!(!lock.try_lock());
                assert_eq!(lock.try_lock_for(Duration::from_millis(5)), Ok(false));
                assert_eq!(lock.hold_count(), 0);
                assert_eq!(lock.unlock(), Err(SyncError::IllegalMonitorState));
            });
        });
        lock.unlock().unwrap();
        lock.unlock().unwrap();
        assert_eq!(lock.unlock(), Err(SyncError::IllegalMonitorState));
    }

    #[test]
    fn condition_wait_keeps_hold_count() {
        let lock: ReentrantLock = ReentrantLock::new();
        let cond = lock.new_condition().unwrap();
        let ready = AtomicBool::new(false);
        thread::scope(|s| {
            s.spawn(|| {
                lock.lock();
                lock.lock();
                while !ready.load(SeqCst) {
                    cond.wait().unwrap();
                }
                assert_eq!(lock.hold_count(), 2);
                lock.unlock().unwrap();
                lock.unlock().unwrap();
            });
            loop {
                lock.lock();
                if cond.has_waiters().unwrap() {
                    ready.store(true, SeqCst);
                    cond.signal().unwrap();
                    lock.unlock().unwrap();
                    break;
                }
                lock.unlock().unwrap();
                thread::yield_now();
            }
        });
        assert!(!lock.is_locked());
    }

    #[test]
    fn debug() {
        let lock: ReentrantLock = ReentrantLock::default();
        assert_eq!(format!("{lock:?}"), "ReentrantLock { fair: false, locked: false, owner: None }");
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::locks::{Fair, NonFair};
    use crate::loom::models;

    #[test]
    fn reentrant_join_fair() {
        models::reentrant_join::<Fair>();
    }

    #[test]
    fn reentrant_join_non_fair() {
        models::reentrant_join::<NonFair>();
    }
}
