use core::fmt::{self, Debug, Display, Formatter};
use core::marker::PhantomData;
use std::time::Duration;

use super::{infallible, not_held};
use crate::cfg::cell::{UnsafeCell, UnsafeCellWith};
use crate::error::Result;
use crate::queued::{Condition, Policy, QueuedSynchronizer, SyncState};

#[cfg(test)]
use crate::test::{LockNew, LockWith};

/// Policy of [`Mutex`]: state `0` is unlocked, `1` is locked.
#[derive(Debug, Default)]
pub struct MutexPolicy;

impl Policy for MutexPolicy {
    fn try_acquire(&self, sync: &SyncState, _: i32) -> Result<bool> {
        let acquired = sync.compare_and_set_state(0, 1);
        if acquired {
            sync.set_exclusive_owner(true);
        }
        Ok(acquired)
    }

    fn try_release(&self, sync: &SyncState, _: i32) -> Result<bool> {
        if !sync.is_owned_by_current_thread() {
            return Err(not_held());
        }
        sync.set_exclusive_owner(false);
        sync.set_state(0);
        Ok(true)
    }

    fn is_held_exclusively(&self, sync: &SyncState) -> Result<bool> {
        Ok(sync.is_owned_by_current_thread())
    }
}

/// A mutual exclusion primitive useful for protecting shared data.
///
/// Threads that find the mutex locked are parked in the wait queue of a
/// [`QueuedSynchronizer`]. The data can only be accessed through the RAII
/// guards returned by the locking methods, which guarantees that it is only
/// ever accessed when the mutex is locked.
///
/// The mutex is not reentrant: locking it again from the thread that holds
/// it deadlocks.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// use std::sync::mpsc::channel;
///
/// use queued_sync::locks::Mutex;
///
/// const N: usize = 10;
///
/// let data = Arc::new(Mutex::new(0));
///
/// let (tx, rx) = channel();
/// for _ in 0..N {
///     let (data, tx) = (data.clone(), tx.clone());
///     thread::spawn(move || {
///         let mut data = data.lock();
///         *data += 1;
///         if *data == N {
///             tx.send(()).unwrap();
///         }
///     });
/// }
///
/// rx.recv().unwrap();
/// ```
pub struct Mutex<T: ?Sized> {
    sync: QueuedSynchronizer<MutexPolicy>,
    data: UnsafeCell<T>,
}

// Same unsafe impls as `std::sync::Mutex`.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    pub fn new(value: T) -> Self {
        let sync = QueuedSynchronizer::new(MutexPolicy);
        Self { sync, data: UnsafeCell::new(value) }
    }

    /// Consumes the mutex, returning the underlying data.
    #[cfg(not(all(loom, test)))]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires this mutex, blocking the current thread until it is able to
    /// do so.
    ///
    /// Interrupts do not abort the wait, they are re-asserted once the
    /// mutex is acquired.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        infallible(self.sync.acquire(1));
        MutexGuard::new(self)
    }

    /// Acquires this mutex unless the thread is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Interrupted`] if the thread was interrupted
    /// before or while waiting.
    ///
    /// [`SyncError::Interrupted`]: crate::SyncError::Interrupted
    pub fn lock_interruptibly(&self) -> Result<MutexGuard<'_, T>> {
        self.sync.acquire_interruptibly(1)?;
        Ok(MutexGuard::new(self))
    }

    /// Acquires this mutex if it is unlocked at the time of the call.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let acquired = infallible(self.sync.policy().try_acquire(self.sync.sync_state(), 1));
        acquired.then(|| MutexGuard::new(self))
    }

    /// Acquires this mutex if it becomes available within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Interrupted`] if the thread was interrupted
    /// before or while waiting.
    ///
    /// [`SyncError::Interrupted`]: crate::SyncError::Interrupted
    pub fn try_lock_for(&self, timeout: Duration) -> Result<Option<MutexGuard<'_, T>>> {
        let acquired = self.sync.try_acquire_for(1, timeout)?;
        Ok(acquired.then(|| MutexGuard::new(self)))
    }

    /// Acquires this mutex and then runs the closure against its guard.
    ///
    /// # Examples
    ///
    /// ```
    /// use queued_sync::locks::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// mutex.lock_with(|mut guard| *guard = 10);
    /// assert_eq!(mutex.lock_with(|guard| *guard), 10);
    /// ```
    pub fn lock_with<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(MutexGuard<'_, T>) -> Ret,
    {
        f(self.lock())
    }

    /// Returns a condition bound to this mutex.
    ///
    /// Every call creates a distinct condition, waiters and signallers must
    /// share the same one.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::thread;
    ///
    /// use queued_sync::locks::Mutex;
    ///
    /// let mutex = Mutex::new(false);
    /// let ready = mutex.new_condition();
    ///
    /// thread::scope(|s| {
    ///     s.spawn(|| {
    ///         let mut started = mutex.lock();
    ///         *started = true;
    ///         ready.signal_all().unwrap();
    ///     });
    ///
    ///     let started = mutex.lock();
    ///     while !*started {
    ///         ready.wait().unwrap();
    ///     }
    /// });
    /// ```
    pub fn new_condition(&self) -> Condition<'_, MutexPolicy> {
        self.sync.new_condition()
    }

    /// Returns `true` if the mutex is locked by some thread.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.sync.state() != 0
    }

    /// Returns `true` if any thread is waiting to lock the mutex.
    #[must_use]
    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the `Mutex` mutably, no actual locking needs
    /// to take place.
    #[cfg(not(all(loom, test)))]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for Mutex<T> {
    /// Creates a `Mutex<T>`, with the `Default` value for `T`.
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl<T> From<T> for Mutex<T> {
    /// Creates a `Mutex<T>` from a instance of `T`.
    fn from(data: T) -> Self {
        Self::new(data)
    }
}

impl<T: ?Sized + Debug> Debug for Mutex<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Mutex");
        match self.try_lock() {
            Some(guard) => guard.with(|data| d.field("data", &data)),
            None => d.field("data", &format_args!("<locked>")),
        };
        d.finish()
    }
}

#[cfg(test)]
impl<T: ?Sized> LockNew for Mutex<T> {
    type Target = T;

    fn new(value: Self::Target) -> Self
    where
        Self::Target: Sized,
    {
        Self::new(value)
    }
}

#[cfg(test)]
impl<T: ?Sized> LockWith for Mutex<T> {
    type Guard<'a> = MutexGuard<'a, Self::Target>
    where
        Self: 'a,
        Self::Target: 'a;

    fn lock_with<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(MutexGuard<'_, T>) -> Ret,
    {
        self.lock_with(f)
    }
}

#[cfg(all(not(loom), test))]
impl<T: ?Sized> crate::test::LockData for Mutex<T> {
    fn get_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
    }
}

/// An RAII implementation of a "scoped lock" of a mutex. When this structure
/// is dropped (falls out of scope), the lock will be unlocked.
///
/// The guard belongs to the thread that locked the mutex and cannot be sent
/// to another one, since the mutex records its owner.
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T: ?Sized> {
    lock: &'a Mutex<T>,
    owner: PhantomData<*const ()>,
}

// Same unsafe Sync impl as `std::sync::MutexGuard`.
unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    const fn new(lock: &'a Mutex<T>) -> Self {
        Self { lock, owner: PhantomData }
    }

    /// Runs `f` against a shared reference pointing to the underlying data.
    fn with<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&T) -> Ret,
    {
        // SAFETY: A guard instance holds the lock locked.
        unsafe { self.lock.data.with_unchecked(f) }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.sync.release(1) {
            tracing::debug!(%err, "mutex guard dropped by a thread that does not own the lock");
        }
    }
}

impl<T: ?Sized + Debug> Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.with(|data| data.fmt(f))
    }
}

impl<T: ?Sized + Display> Display for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.with(|data| data.fmt(f))
    }
}

#[cfg(not(all(loom, test)))]
impl<T: ?Sized> core::ops::Deref for MutexGuard<'_, T> {
    type Target = T;

    /// Dereferences the guard to access the underlying data.
    fn deref(&self) -> &T {
        // SAFETY: A guard instance holds the lock locked.
        unsafe { &*self.lock.data.get() }
    }
}

#[cfg(not(all(loom, test)))]
impl<T: ?Sized> core::ops::DerefMut for MutexGuard<'_, T> {
    /// Mutably dereferences the guard to access the underlying data.
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: A guard instance holds the lock locked.
        unsafe { &mut *self.lock.data.get() }
    }
}

/// SAFETY: A guard instance hold the lock locked, with exclusive access to the
/// underlying data.
#[cfg(all(loom, test))]
#[cfg(not(tarpaulin_include))]
unsafe impl<T: ?Sized> crate::loom::Guard for MutexGuard<'_, T> {
    type Target = T;

    fn get(&self) -> &loom::cell::UnsafeCell<Self::Target> {
        &self.lock.data
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
    use std::thread;
    use std::time::Duration;

    use super::{Mutex, MutexGuard};
    use crate::error::SyncError;
    use crate::park::Interrupter;
    use crate::test::tests;

    #[test]
    fn lots_and_lots_lock() {
        tests::lots_and_lots_lock::<Mutex<_>>();
    }

    #[test]
    fn guard_dropped_by_non_owner_keeps_lock_held() {
        let mutex = Mutex::new(0);
        let guard = mutex.lock();
        thread::scope(|s| {
            s.spawn(|| drop(MutexGuard::new(&mutex)));
        });
        assert!(mutex.is_locked());
        drop(guard);
        assert!(!mutex.is_locked());
    }

    #[test]
    fn smoke() {
        tests::smoke::<Mutex<_>>();
    }

    #[test]
    fn test_guard_debug_display() {
        tests::test_guard_debug_display::<Mutex<_>>();
    }

    #[test]
    fn test_mutex_debug() {
        tests::test_mutex_debug::<Mutex<_>>();
    }

    #[test]
    fn test_mutex_from() {
        tests::test_mutex_from::<Mutex<_>>();
    }

    #[test]
    fn test_mutex_default() {
        tests::test_mutex_default::<Mutex<_>>();
    }

    #[test]
    fn test_get_mut() {
        tests::test_get_mut::<Mutex<_>>();
    }

    #[test]
    fn test_lock_arc_nested() {
        tests::test_lock_arc_nested::<Mutex<_>, Mutex<_>>();
    }

    #[test]
    fn test_acquire_more_than_one_lock() {
        tests::test_acquire_more_than_one_lock::<Mutex<_>>();
    }

    #[test]
    fn test_lock_arc_access_in_unwind() {
        tests::test_lock_arc_access_in_unwind::<Mutex<_>>();
    }

    #[test]
    fn test_lock_unsized() {
        tests::test_lock_unsized::<Mutex<_>>();
    }

    #[test]
    fn debug_while_locked() {
        let mutex = Mutex::new(1);
        let guard = mutex.lock();
        assert_eq!(format!("{mutex:?}"), "Mutex { data: <locked> }");
        drop(guard);
        assert_eq!(format!("{mutex:?}"), "Mutex { data: 1 }");
    }

    #[test]
    fn try_lock_variants() {
        let mutex = Mutex::new(());
        let guard = mutex.try_lock().unwrap();
        assert!(mutex.is_locked());
        thread::scope(|s| {
            s.spawn(|| {
                assert!(mutex.try_lock().is_none());
                assert!(mutex.try_lock_for(Duration::from_millis(5)).unwrap().is_none());
            });
        });
        drop(guard);
        assert!(!mutex.is_locked());
        assert!(mutex.try_lock_for(Duration::from_millis(5)).unwrap().is_some());
    }

    #[test]
    fn lock_interruptibly_aborts() {
        let mutex = Mutex::new(0);
        let guard = mutex.lock();
        thread::scope(|s| {
            s.spawn(|| {
                Interrupter::current().interrupt();
                assert_eq!(mutex.lock_interruptibly().err(), Some(SyncError::Interrupted));
            });
        });
        drop(guard);
        assert!(!mutex.has_queued_threads());
        *mutex.lock_interruptibly().unwrap() += 1;
        assert_eq!(mutex.into_inner(), 1);
    }

    #[test]
    fn condition_hands_over_data() {
        let mutex = &Mutex::new(Vec::new());
        let cond = &mutex.new_condition();
        let consumed = AtomicBool::new(false);
        thread::scope(|s| {
            s.spawn(|| {
                let mut queue = mutex.lock();
                while queue.is_empty() {
                    cond.wait().unwrap();
                }
                assert_eq!(queue.pop(), Some(7));
                consumed.store(true, SeqCst);
            });
            loop {
                let mut queue = mutex.lock();
                if cond.has_waiters().unwrap() {
                    queue.push(7);
                    cond.signal().unwrap();
                    break;
                }
                drop(queue);
                thread::yield_now();
            }
        });
        assert!(consumed.load(SeqCst));
        assert!(mutex.lock().is_empty());
    }

    #[test]
    fn condition_requires_lock() {
        let mutex = Mutex::new(());
        let cond = mutex.new_condition();
        assert_eq!(cond.signal(), Err(SyncError::IllegalMonitorState));
        assert_eq!(cond.wait(), Err(SyncError::IllegalMonitorState));
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::locks::Mutex;
    use crate::loom::models;

    #[test]
    fn lock_join() {
        models::lock_join::<Mutex<_>>();
    }

    #[test]
    fn condition_signal() {
        models::condition_signal();
    }
}
