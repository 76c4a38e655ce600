//! Lock types built from [`QueuedSynchronizer`] policies.
//!
//! Each lock here is a thin [`Policy`] over a synchronizer: the policy
//! interprets the state word, the synchronizer does all queueing and
//! parking.
//!
//! - [`Mutex`]: a non-reentrant mutual exclusion lock guarding data.
//! - [`ReentrantLock`]: an exclusive lock the owner may acquire repeatedly.
//! - [`ReentrantRwLock`]: a reentrant read/write lock, used through its
//!   [`ReadLock`] and [`WriteLock`] views.
//!
//! The reentrant locks are generic over a [`Fairness`] strategy. [`NonFair`]
//! lets arriving threads barge ahead of queued ones, which is the faster
//! default. [`Fair`] refuses to barge while other threads are queued, giving
//! approximately FIFO acquisition.
//!
//! [`QueuedSynchronizer`]: crate::queued::QueuedSynchronizer

mod mutex;
mod reentrant;
mod rwlock;

use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::queued::{Condition, Policy, SyncState};

pub use mutex::{Mutex, MutexGuard, MutexPolicy};
pub use reentrant::{ReentrantLock, ReentrantPolicy};
pub use rwlock::{ReadLock, ReentrantRwLock, RwPolicy, WriteLock};

/// Common interface of the lock types that do not guard data themselves.
///
/// # Example
///
/// ```
/// use queued_sync::locks::{Lock, ReentrantLock};
///
/// fn with_lock<L: Lock>(lock: &L, f: impl FnOnce()) -> queued_sync::Result<()> {
///     lock.lock();
///     f();
///     lock.unlock()
/// }
///
/// let lock: ReentrantLock = ReentrantLock::new();
/// with_lock(&lock, || assert!(lock.is_held_by_current_thread())).unwrap();
/// assert!(!lock.is_locked());
/// ```
pub trait Lock {
    /// The policy of the synchronizer behind this lock.
    type Policy: Policy;

    /// Acquires the lock, blocking until it is available.
    ///
    /// Interrupts do not abort the wait, they are re-asserted once the lock
    /// is acquired.
    fn lock(&self);

    /// Acquires the lock unless the thread is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Interrupted`] if the thread was interrupted
    /// before or while waiting.
    fn lock_interruptibly(&self) -> Result<()>;

    /// Acquires the lock only if it is free at the time of the call.
    ///
    /// This barges ahead of queued threads even for fair locks.
    fn try_lock(&self) -> bool;

    /// Acquires the lock if it becomes available within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Interrupted`] if the thread was interrupted
    /// before or while waiting.
    fn try_lock_for(&self, timeout: Duration) -> Result<bool>;

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IllegalMonitorState`] if the calling thread does
    /// not hold the lock.
    fn unlock(&self) -> Result<()>;

    /// Returns a condition bound to this lock.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unsupported`] if the lock cannot be held
    /// exclusively.
    fn new_condition(&self) -> Result<Condition<'_, Self::Policy>>;
}

/// Decides whether an arriving thread may barge ahead of queued ones.
pub trait Fairness {
    /// Returns `true` if the lock is fair.
    fn is_fair() -> bool;

    /// Returns `true` if an arriving writer, or exclusive acquirer, must
    /// queue even though the lock looks free.
    fn writer_should_block(sync: &SyncState) -> bool;

    /// Returns `true` if an arriving reader must queue even though the lock
    /// is not write-locked.
    fn reader_should_block(sync: &SyncState) -> bool;
}

/// Threads acquire in approximately FIFO order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fair;

impl Fairness for Fair {
    fn is_fair() -> bool {
        true
    }

    fn writer_should_block(sync: &SyncState) -> bool {
        sync.has_queued_predecessors()
    }

    fn reader_should_block(sync: &SyncState) -> bool {
        sync.has_queued_predecessors()
    }
}

/// Arriving threads barge ahead of queued ones.
///
/// Readers still give way when the first queued thread appears to be a
/// writer, so that writers are not starved by a stream of readers. This is
/// only a heuristic: a writer queued behind other readers can still wait.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonFair;

impl Fairness for NonFair {
    fn is_fair() -> bool {
        false
    }

    fn writer_should_block(_: &SyncState) -> bool {
        false
    }

    fn reader_should_block(sync: &SyncState) -> bool {
        sync.apparently_first_queued_is_exclusive()
    }
}

/// Unwraps the result of an acquire whose policy hooks never fail.
fn infallible<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => unreachable!("lock policy hook failed: {err}"),
    }
}

/// Error for releasing a lock the calling thread does not hold.
fn not_held() -> SyncError {
    tracing::debug!("unlock by a thread that does not hold the lock");
    SyncError::IllegalMonitorState
}

/// Panics on a hold count overflow.
#[cold]
fn count_overflow() -> ! {
    panic!("maximum lock count exceeded")
}
