use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{count_overflow, infallible, not_held, Fairness, Lock, NonFair};
use crate::cfg::thread::Thread;
use crate::error::{Result, SyncError};
use crate::park;
use crate::queued::{Condition, Policy, QueuedSynchronizer, SyncState};

// The state word is split in two unsigned 16 bit counts: the lower half
// counts exclusive holds, the upper half counts shared holds.
const SHARED_SHIFT: u32 = 16;
const SHARED_UNIT: i32 = 1 << SHARED_SHIFT;
const MAX_COUNT: u32 = (1 << SHARED_SHIFT) - 1;
const EXCLUSIVE_MASK: u32 = MAX_COUNT;

#[allow(clippy::cast_sign_loss)]
const fn shared_count(state: i32) -> u32 {
    state as u32 >> SHARED_SHIFT
}

#[allow(clippy::cast_sign_loss)]
const fn exclusive_count(state: i32) -> u32 {
    state as u32 & EXCLUSIVE_MASK
}

/// Policy of [`ReentrantRwLock`].
///
/// Read holds of each thread are tracked by thread token, so that a thread
/// can be refused releasing read holds it does not have, and so that a
/// thread already holding the read lock is never made to queue behind a
/// writer (which would deadlock).
pub struct RwPolicy<F> {
    read_holds: DashMap<usize, u32>,
    fairness: PhantomData<fn() -> F>,
}

impl<F> RwPolicy<F> {
    fn new() -> Self {
        Self { read_holds: DashMap::new(), fairness: PhantomData }
    }

    /// Returns the read holds of the calling thread.
    fn read_hold_count(&self) -> u32 {
        self.read_holds.get(&park::current_token()).map_or(0, |holds| *holds)
    }

    fn record_read(&self) {
        *self.read_holds.entry(park::current_token()).or_insert(0) += 1;
    }

    /// Acquires the write lock regardless of queued threads.
    fn try_write_lock(sync: &SyncState) -> bool {
        let state = sync.state();
        if state != 0 {
            let writes = exclusive_count(state);
            if writes == 0 || !sync.is_owned_by_current_thread() {
                return false;
            }
            if writes == MAX_COUNT {
                count_overflow();
            }
        }
        let acquired = sync.compare_and_set_state(state, state + 1);
        if acquired {
            sync.set_exclusive_owner(true);
        }
        acquired
    }

    /// Acquires the read lock regardless of queued threads.
    fn try_read_lock(&self, sync: &SyncState) -> bool {
        loop {
            let state = sync.state();
            if exclusive_count(state) != 0 && !sync.is_owned_by_current_thread() {
                return false;
            }
            if shared_count(state) == MAX_COUNT {
                count_overflow();
            }
            if sync.compare_and_set_state(state, state.wrapping_add(SHARED_UNIT)) {
                self.record_read();
                return true;
            }
        }
    }
}

impl<F: Fairness> RwPolicy<F> {
    /// Slow path of a shared acquire: retries until the state settles,
    /// letting reentrant reads through even when readers should block.
    fn full_try_acquire_shared(&self, sync: &SyncState) -> i32 {
        loop {
            let state = sync.state();
            if exclusive_count(state) != 0 {
                if !sync.is_owned_by_current_thread() {
                    return -1;
                }
            } else if F::reader_should_block(sync) && self.read_hold_count() == 0 {
                return -1;
            }
            if shared_count(state) == MAX_COUNT {
                count_overflow();
            }
            if sync.compare_and_set_state(state, state.wrapping_add(SHARED_UNIT)) {
                self.record_read();
                return 1;
            }
        }
    }
}

impl<F: Fairness> Policy for RwPolicy<F> {
    fn try_acquire(&self, sync: &SyncState, acquires: i32) -> Result<bool> {
        let state = sync.state();
        if state != 0 {
            let writes = exclusive_count(state);
            // Readers present, or another thread writes.
            if writes == 0 || !sync.is_owned_by_current_thread() {
                return Ok(false);
            }
            if writes + acquires.unsigned_abs() > MAX_COUNT {
                count_overflow();
            }
            sync.set_state(state + acquires);
            return Ok(true);
        }
        if F::writer_should_block(sync) || !sync.compare_and_set_state(state, state + acquires) {
            return Ok(false);
        }
        sync.set_exclusive_owner(true);
        Ok(true)
    }

    fn try_release(&self, sync: &SyncState, releases: i32) -> Result<bool> {
        if !sync.is_owned_by_current_thread() {
            return Err(not_held());
        }
        let state = sync.state() - releases;
        let free = exclusive_count(state) == 0;
        if free {
            sync.set_exclusive_owner(false);
        }
        sync.set_state(state);
        Ok(free)
    }

    fn try_acquire_shared(&self, sync: &SyncState, _: i32) -> Result<i32> {
        let state = sync.state();
        if exclusive_count(state) != 0 && !sync.is_owned_by_current_thread() {
            return Ok(-1);
        }
        if !F::reader_should_block(sync)
            && shared_count(state) < MAX_COUNT
            && sync.compare_and_set_state(state, state.wrapping_add(SHARED_UNIT))
        {
            self.record_read();
            return Ok(1);
        }
        Ok(self.full_try_acquire_shared(sync))
    }

    fn try_release_shared(&self, sync: &SyncState, _: i32) -> Result<bool> {
        match self.read_holds.entry(park::current_token()) {
            Entry::Occupied(mut holds) if *holds.get() > 1 => *holds.get_mut() -= 1,
            Entry::Occupied(holds) => {
                holds.remove();
            }
            Entry::Vacant(_) => return Err(not_held()),
        }
        loop {
            let state = sync.state();
            let next = state.wrapping_sub(SHARED_UNIT);
            if sync.compare_and_set_state(state, next) {
                // Releasing the read lock has no effect on readers, but it
                // may let a waiting writer proceed once both are free.
                return Ok(next == 0);
            }
        }
    }

    fn is_held_exclusively(&self, sync: &SyncState) -> Result<bool> {
        Ok(sync.is_owned_by_current_thread())
    }
}

/// A reentrant read/write lock.
///
/// Any number of readers may hold the read lock at once, the write lock is
/// exclusive. Both can be re-entered by their holders. The writer may also
/// acquire the read lock, and then release the write lock to downgrade; a
/// reader cannot upgrade to the write lock.
///
/// Each of the read and write hold counts is limited to 65535, going beyond
/// panics.
///
/// The lock is used through the [`ReadLock`] and [`WriteLock`] views, both
/// implementing [`Lock`]. Only the write lock supports conditions.
///
/// # Examples
///
/// ```
/// use queued_sync::locks::{Lock, ReentrantRwLock};
///
/// let lock: ReentrantRwLock = ReentrantRwLock::new();
/// let (read, write) = (lock.read_lock(), lock.write_lock());
///
/// write.lock();
/// read.lock();
/// write.unlock().unwrap();
/// assert!(!lock.is_write_locked());
/// assert_eq!(lock.read_hold_count(), 1);
/// read.unlock().unwrap();
/// ```
pub struct ReentrantRwLock<F = NonFair> {
    sync: QueuedSynchronizer<RwPolicy<F>>,
}

impl<F: Fairness> ReentrantRwLock<F> {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self { sync: QueuedSynchronizer::new(RwPolicy::new()) }
    }

    /// Returns the read lock view.
    pub const fn read_lock(&self) -> ReadLock<'_, F> {
        ReadLock { sync: &self.sync }
    }

    /// Returns the write lock view.
    pub const fn write_lock(&self) -> WriteLock<'_, F> {
        WriteLock { sync: &self.sync }
    }

    /// Returns `true` if this lock is fair.
    #[must_use]
    pub fn is_fair(&self) -> bool {
        F::is_fair()
    }

    /// Returns the number of read holds across all threads.
    #[must_use]
    pub fn read_lock_count(&self) -> u32 {
        shared_count(self.sync.state())
    }

    /// Returns the number of read holds of the calling thread.
    #[must_use]
    pub fn read_hold_count(&self) -> u32 {
        self.sync.policy().read_hold_count()
    }

    /// Returns `true` if any thread holds the write lock.
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        exclusive_count(self.sync.state()) != 0
    }

    /// Returns `true` if the calling thread holds the write lock.
    #[must_use]
    pub fn is_write_locked_by_current_thread(&self) -> bool {
        self.sync.sync_state().is_owned_by_current_thread()
    }

    /// Returns the number of write holds of the calling thread.
    #[must_use]
    pub fn write_hold_count(&self) -> u32 {
        if self.is_write_locked_by_current_thread() {
            exclusive_count(self.sync.state())
        } else {
            0
        }
    }

    /// Returns `true` if any thread may be waiting for either lock.
    #[must_use]
    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }

    /// Returns `true` if `thread` may be waiting for either lock.
    #[must_use]
    pub fn has_queued_thread(&self, thread: &Thread) -> bool {
        self.sync.is_queued(thread)
    }

    /// Returns an estimate of the number of threads waiting.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.sync.queue_length()
    }

    /// Returns the threads that may be waiting for the write lock.
    #[must_use]
    pub fn queued_writer_threads(&self) -> Vec<Thread> {
        self.sync.exclusive_queued_threads()
    }

    /// Returns the threads that may be waiting for the read lock.
    #[must_use]
    pub fn queued_reader_threads(&self) -> Vec<Thread> {
        self.sync.shared_queued_threads()
    }
}

impl<F: Fairness> Default for ReentrantRwLock<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Fairness> Debug for ReentrantRwLock<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.sync.state();
        f.debug_struct("ReentrantRwLock")
            .field("fair", &F::is_fair())
            .field("writes", &exclusive_count(state))
            .field("reads", &shared_count(state))
            .finish()
    }
}

/// The read half of a [`ReentrantRwLock`].
pub struct ReadLock<'a, F> {
    sync: &'a QueuedSynchronizer<RwPolicy<F>>,
}

impl<F> Clone for ReadLock<'_, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for ReadLock<'_, F> {}

impl<F: Fairness> Lock for ReadLock<'_, F> {
    type Policy = RwPolicy<F>;

    fn lock(&self) {
        infallible(self.sync.acquire_shared(1));
    }

    fn lock_interruptibly(&self) -> Result<()> {
        self.sync.acquire_shared_interruptibly(1)
    }

    fn try_lock(&self) -> bool {
        self.sync.policy().try_read_lock(self.sync.sync_state())
    }

    fn try_lock_for(&self, timeout: Duration) -> Result<bool> {
        self.sync.try_acquire_shared_for(1, timeout)
    }

    fn unlock(&self) -> Result<()> {
        self.sync.release_shared(1).map(drop)
    }

    /// Read locks cannot be held exclusively, so they have no conditions.
    fn new_condition(&self) -> Result<Condition<'_, Self::Policy>> {
        Err(SyncError::Unsupported)
    }
}

impl<F: Fairness> Debug for ReadLock<'_, F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadLock").field("reads", &shared_count(self.sync.state())).finish()
    }
}

/// The write half of a [`ReentrantRwLock`].
pub struct WriteLock<'a, F> {
    sync: &'a QueuedSynchronizer<RwPolicy<F>>,
}

impl<F> Clone for WriteLock<'_, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for WriteLock<'_, F> {}

impl<F: Fairness> Lock for WriteLock<'_, F> {
    type Policy = RwPolicy<F>;

    fn lock(&self) {
        infallible(self.sync.acquire(1));
    }

    fn lock_interruptibly(&self) -> Result<()> {
        self.sync.acquire_interruptibly(1)
    }

    fn try_lock(&self) -> bool {
        RwPolicy::<F>::try_write_lock(self.sync.sync_state())
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

impl<F: Fairness> Debug for WriteLock<'_, F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteLock").field("writes", &exclusive_count(self.sync.state())).finish()
    }
}

#[cfg(all(not(loom), test))]
impl<F: Fairness> crate::test::RawLock for ReentrantRwLock<F> {
    fn acquire(&self) {
        self.write_lock().lock();
    }

    fn release(&self) {
        infallible(self.write_lock().unlock());
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    use super::{shared_count, ReentrantRwLock, MAX_COUNT};
    use crate::error::SyncError;
    use crate::locks::{Fair, Fairness, Lock, NonFair};
    use crate::test::{tests, Guarded};

    fn wait_queued<F: Fairness>(lock: &ReentrantRwLock<F>, len: usize) {
        while lock.queue_length() < len {
            thread::yield_now();
        }
    }

    #[test]
    fn lots_and_lots_lock() {
        tests::lots_and_lots_lock::<Guarded<ReentrantRwLock<NonFair>, _>>();
        tests::lots_and_lots_lock::<Guarded<ReentrantRwLock<Fair>, _>>();
    }

    #[test]
    fn shared_count_uses_upper_half() {
        assert_eq!(shared_count(-1), MAX_COUNT);
        assert_eq!(shared_count(1 << 16 | 3), 1);
    }

    #[test]
    fn readers_share_writers_exclude() {
        let lock: ReentrantRwLock = ReentrantRwLock::new();
        let (read, write) = (lock.read_lock(), lock.write_lock());
        read.lock();
        assert!(read.try_lock());
        assert_eq!(lock.read_hold_count(), 2);
        thread::scope(|s| {
            s.spawn(|| {
                assert!(read.try_lock());
                assert_eq!(lock.read_lock_count(), 3);
                assert!(!write.try_lock());
                assert_eq!(write.try_lock_for(Duration::from_millis(5)), Ok(false));
                read.unlock().unwrap();
                assert_eq!(read.unlock(), Err(SyncError::IllegalMonitorState));
            });
        });
        read.unlock().unwrap();
        read.unlock().unwrap();
        assert_eq!(lock.read_lock_count(), 0);
        assert!(write.try_lock());
        assert!(write.try_lock());
        assert_eq!(lock.write_hold_count(), 2);
        thread::scope(|s| {
            s.spawn(|| {
                assert!(!read.try_lock());
                assert_eq!(write.unlock(), Err(SyncError::IllegalMonitorState));
            });
        });
        write.unlock().unwrap();
        write.unlock().unwrap();
        assert!(!lock.is_write_locked());
    }

    #[test]
    fn write_lock_downgrades() {
        let lock: ReentrantRwLock<Fair> = ReentrantRwLock::new();
        let (read, write) = (lock.read_lock(), lock.write_lock());
        write.lock();
        read.lock();
        write.unlock().unwrap();
        assert!(!lock.is_write_locked());
        assert_eq!(lock.read_lock_count(), 1);
        thread::scope(|s| {
            s.spawn(|| assert!(!write.try_lock()));
        });
        read.unlock().unwrap();
        assert_eq!(format!("{lock:?}"), "ReentrantRwLock { fair: true, writes: 0, reads: 0 }");
    }

    fn reader_defers_to_queued_writer<F: Fairness>() {
        let lock: ReentrantRwLock<F> = ReentrantRwLock::new();
        let (read, write) = (lock.read_lock(), lock.write_lock());
        let order = Mutex::new(Vec::new());
        read.lock();
        thread::scope(|s| {
            s.spawn(|| {
                write.lock();
                order.lock().unwrap().push("writer");
                write.unlock().unwrap();
            });
            wait_queued(&lock, 1);
            s.spawn(|| {
                read.lock();
                order.lock().unwrap().push("reader");
                read.unlock().unwrap();
            });
            wait_queued(&lock, 2);
            // Still read-locked by this thread, which may re-enter.
            read.lock();
            read.unlock().unwrap();
            assert!(order.lock().unwrap().is_empty());
            read.unlock().unwrap();
        });
        assert_eq!(*order.lock().unwrap(), ["writer", "reader"]);
    }

    #[test]
    fn reader_defers_to_queued_writer_fair() {
        reader_defers_to_queued_writer::<Fair>();
    }

    #[test]
    fn reader_defers_to_queued_writer_non_fair() {
        reader_defers_to_queued_writer::<NonFair>();
    }

    #[test]
    fn queued_readers_are_released_together() {
        const READERS: usize = 3;
        let lock: ReentrantRwLock = ReentrantRwLock::new();
        let (read, write) = (lock.read_lock(), lock.write_lock());
        let inside = AtomicUsize::new(0);
        write.lock();
        thread::scope(|s| {
            for _ in 0..READERS {
                s.spawn(|| {
                    read.lock();
                    inside.fetch_add(1, SeqCst);
                    while inside.load(SeqCst) < READERS {
                        thread::yield_now();
                    }
                    read.unlock().unwrap();
                });
            }
            wait_queued(&lock, READERS);
            assert_eq!(lock.queued_reader_threads().len(), READERS);
            write.unlock().unwrap();
        });
        assert_eq!(lock.read_lock_count(), 0);
    }

    #[test]
    fn overflowing_queued_reader_hands_on_its_place() {
        let lock: ReentrantRwLock = ReentrantRwLock::new();
        let (read, write) = (lock.read_lock(), lock.write_lock());
        write.lock();
        thread::scope(|s| {
            let reader = s.spawn(|| read.lock());
            wait_queued(&lock, 1);
            // Saturate the read count, the queued reader overflows it once
            // the write lock is released.
            for _ in 0..MAX_COUNT {
                read.lock();
            }
            let writer = s.spawn(|| {
                let acquired = write.try_lock_for(Duration::from_secs(5));
                if acquired == Ok(true) {
                    write.unlock().unwrap();
                }
                acquired
            });
            wait_queued(&lock, 2);
            write.unlock().unwrap();
            assert!(reader.join().is_err());
            for _ in 0..MAX_COUNT {
                read.unlock().unwrap();
            }
            assert_eq!(writer.join().unwrap(), Ok(true));
        });
        assert!(!lock.is_write_locked());
        assert!(!lock.has_queued_threads());
    }

    #[test]
    fn conditions_only_on_write_lock() {
        let lock: ReentrantRwLock = ReentrantRwLock::new();
        assert_eq!(lock.read_lock().new_condition().err(), Some(SyncError::Unsupported));
        let write = lock.write_lock();
        let cond = write.new_condition().unwrap();
        assert_eq!(cond.signal(), Err(SyncError::IllegalMonitorState));
        write.lock();
        assert_eq!(cond.wait_for(Duration::from_millis(5)), Ok(false));
        assert!(lock.is_write_locked_by_current_thread());
        write.unlock().unwrap();
    }
}
