//! A capability-based lock with three modes for controlling read/write
//! access, and optimistic reads validated after the fact.
//!
//! The state of a [`StampedLock`] is a version and a mode. Lock acquisition
//! methods return a [`Stamp`] that represents and controls access with
//! respect to the lock state; the "try" variants return `None` instead of
//! blocking when access is not immediately available. Release and
//! conversion methods require stamps as arguments, and fail if they do not
//! match the state of the lock.
//!
//! - Writing: [`write_lock`] blocks until exclusive access is available.
//! - Reading: [`read_lock`] blocks until non-exclusive access is available.
//! - Optimistic reading: [`try_optimistic_read`] returns a stamp only if the
//!   lock is not currently held in write mode. [`validate`] then reports
//!   whether the lock has been acquired in write mode since the stamp was
//!   obtained. Data read optimistically must be read through atomics, since
//!   a writer may be changing it concurrently, and must not be used before
//!   validation succeeds.
//!
//! Queued writers and readers are served in roughly FIFO order. A reader
//! arriving while writers are queued waits behind them even if the lock is
//! only read-locked, so writers do not starve. Readers that queue up behind
//! other readers share a single queue slot and are released together.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
//!
//! use queued_sync::stamped::StampedLock;
//!
//! struct Point {
//!     x: AtomicU64,
//!     y: AtomicU64,
//!     lock: StampedLock,
//! }
//!
//! impl Point {
//!     fn shift(&self, dx: u64, dy: u64) {
//!         let stamp = self.lock.write_lock();
//!         self.x.fetch_add(dx, Relaxed);
//!         self.y.fetch_add(dy, Relaxed);
//!         self.lock.unlock_write(stamp).unwrap();
//!     }
//!
//!     fn sum(&self) -> u64 {
//!         if let Some(stamp) = self.lock.try_optimistic_read() {
//!             let (x, y) = (self.x.load(Relaxed), self.y.load(Relaxed));
//!             if self.lock.validate(stamp) {
//!                 return x + y;
//!             }
//!         }
//!         let stamp = self.lock.read_lock();
//!         let sum = self.x.load(Relaxed) + self.y.load(Relaxed);
//!         self.lock.unlock_read(stamp).unwrap();
//!         sum
//!     }
//! }
//!
//! let point = Point { x: AtomicU64::new(1), y: AtomicU64::new(2), lock: StampedLock::new() };
//! point.shift(3, 4);
//! assert_eq!(point.sum(), 10);
//! ```
//!
//! [`write_lock`]: StampedLock::write_lock
//! [`read_lock`]: StampedLock::read_lock
//! [`try_optimistic_read`]: StampedLock::try_optimistic_read
//! [`validate`]: StampedLock::validate

mod node;

use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, SeqCst};
use std::time::Duration;

use crate::cfg::atomic::{fence, AtomicU32, AtomicU64};
use crate::cfg::sync::Arc;
use crate::cfg::thread;
use crate::config::SpinConfig;
use crate::error::{Result, SyncError};
use crate::link::{self, Link, Slot};
use crate::park::{self, Wait};
use crate::relax::{Countdown, HeadSpin, Relax, Spin};
use node::{unlink_chain, WMode, WNode, CANCELLED, WAITING};

/// Number of bits of the reader count.
const LG_READERS: u32 = 7;

const RUNIT: u64 = 1;
const WBIT: u64 = 1 << LG_READERS;
const RBITS: u64 = WBIT - 1;
const RFULL: u64 = RBITS - 1;
const ABITS: u64 = RBITS | WBIT;
const SBITS: u64 = !RBITS;

/// Initial state. Also the state a wrapped version restarts from, so that
/// zero is never a valid stamp.
const ORIGIN: u64 = WBIT << 1;

/// A token describing a mode and version of a [`StampedLock`].
///
/// Stamps are plain values. They are only meaningful when handed back to
/// the lock that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stamp(u64);

impl Stamp {
    /// Returns the raw value of the stamp.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns `true` if the stamp was issued for a write lock.
    #[must_use]
    pub const fn is_write_lock(self) -> bool {
        self.0 & ABITS == WBIT
    }

    /// Returns `true` if the stamp was issued for a read lock.
    #[must_use]
    pub const fn is_read_lock(self) -> bool {
        self.0 & RBITS != 0
    }

    /// Returns `true` if the stamp represents holding a lock, either mode.
    #[must_use]
    pub const fn is_lock(self) -> bool {
        self.0 & ABITS != 0
    }

    /// Returns `true` if the stamp was issued for an optimistic read.
    #[must_use]
    pub const fn is_optimistic_read(self) -> bool {
        self.0 & ABITS == 0 && self.0 != 0
    }
}

impl From<Stamp> for u64 {
    fn from(stamp: Stamp) -> Self {
        stamp.0
    }
}

/// Result of a single acquire attempt in some mode.
enum Attempt {
    Acquired(u64),
    /// The lock is held in a conflicting mode.
    Blocked,
    /// The lock looked available but the state changed under us.
    Contended,
}

/// How a reader waiting on another reader's cowait stack left it.
enum Cowait {
    Acquired(u64),
    /// The reader it waited on moved on, queue again.
    Requeue,
    TimedOut,
}

/// A stamp-based lock with write, read and optimistic read modes.
///
/// `R` is the spin hint run by waiters that spin before parking, see
/// [`relax`]. Spin budgets come from the lock's [`SpinConfig`].
///
/// Stamped locks are not reentrant: a thread holding a write lock that
/// tries to acquire it again deadlocks.
///
/// [`relax`]: crate::relax
pub struct StampedLock<R = Spin> {
    state: AtomicU64,
    /// Readers beyond `RFULL`. Only accessed while the reader bits of the
    /// state hold the `RBITS` sentinel.
    reader_overflow: AtomicU32,
    whead: Slot<WNode>,
    wtail: Slot<WNode>,
    config: SpinConfig,
    relax: PhantomData<fn() -> R>,
}

impl<R: Relax> StampedLock<R> {
    /// Creates an unlocked lock with spin budgets for this machine.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SpinConfig::default())
    }

    /// Creates an unlocked lock with the given spin budgets.
    #[must_use]
    pub fn with_config(config: SpinConfig) -> Self {
        Self {
            state: AtomicU64::new(ORIGIN),
            reader_overflow: AtomicU32::new(0),
            whead: Slot::empty(),
            wtail: Slot::empty(),
            config,
            relax: PhantomData,
        }
    }

    /// Exclusively acquires the lock, blocking if necessary until
    /// available.
    ///
    /// Interrupts do not abort the wait, they are re-asserted once the lock
    /// is acquired.
    pub fn write_lock(&self) -> Stamp {
        if let Some(stamp) = self.try_write_lock() {
            return stamp;
        }
        match self.acquire_write(Wait::Uninterruptible) {
            Ok(Some(stamp)) => stamp,
            _ => unreachable!("uninterruptible waits are never cancelled"),
        }
    }

    /// Exclusively acquires the lock if it is immediately available.
    pub fn try_write_lock(&self) -> Option<Stamp> {
        let s = self.state.load(SeqCst);
        (s & ABITS == 0 && self.cas_state(s, s + WBIT)).then_some(Stamp(s + WBIT))
    }

    /// Exclusively acquires the lock if it is available within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Interrupted`] if the thread was interrupted
    /// before or while waiting.
    pub fn try_write_lock_for(&self, timeout: Duration) -> Result<Option<Stamp>> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        if let Some(stamp) = self.try_write_lock() {
            return Ok(Some(stamp));
        }
        if timeout.is_zero() {
            return Ok(None);
        }
        self.acquire_write(Wait::timeout(timeout))
    }

    /// Exclusively acquires the lock, blocking if necessary until available
    /// or the thread is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Interrupted`] if the thread was interrupted
    /// before or while waiting.
    pub fn write_lock_interruptibly(&self) -> Result<Stamp> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        self.acquire_write(Wait::Interruptible)?.ok_or(SyncError::Interrupted)
    }

    /// Non-exclusively acquires the lock, blocking if necessary until
    /// available.
    ///
    /// Barges only while no thread is queued: once a writer waits, new
    /// readers queue behind it.
    pub fn read_lock(&self) -> Stamp {
        let s = self.state.load(SeqCst);
        if self.queue_is_empty() && s & ABITS < RFULL && self.cas_state(s, s + RUNIT) {
            return Stamp(s + RUNIT);
        }
        match self.acquire_read(Wait::Uninterruptible) {
            Ok(Some(stamp)) => stamp,
            _ => unreachable!("uninterruptible waits are never cancelled"),
        }
    }

    /// Non-exclusively acquires the lock if it is immediately available.
    ///
    /// Unlike [`read_lock`], this barges ahead of queued writers.
    ///
    /// [`read_lock`]: Self::read_lock
    pub fn try_read_lock(&self) -> Option<Stamp> {
        loop {
            let s = self.state.load(SeqCst);
            if s & ABITS == WBIT {
                return None;
            }
            if let Some(next) = self.try_acquire_read_bits(s) {
                return Some(Stamp(next));
            }
        }
    }

    /// Non-exclusively acquires the lock if it is available within
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Interrupted`] if the thread was interrupted
    /// before or while waiting.
    pub fn try_read_lock_for(&self, timeout: Duration) -> Result<Option<Stamp>> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        let s = self.state.load(SeqCst);
        if s & ABITS != WBIT {
            if let Some(next) = self.try_acquire_read_bits(s) {
                return Ok(Some(Stamp(next)));
            }
        }
        if timeout.is_zero() {
            return Ok(None);
        }
        self.acquire_read(Wait::timeout(timeout))
    }

    /// Non-exclusively acquires the lock, blocking if necessary until
    /// available or the thread is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Interrupted`] if the thread was interrupted
    /// before or while waiting.
    pub fn read_lock_interruptibly(&self) -> Result<Stamp> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        self.acquire_read(Wait::Interruptible)?.ok_or(SyncError::Interrupted)
    }

    /// Returns a stamp that can later be validated, or `None` if the lock
    /// is exclusively held.
    pub fn try_optimistic_read(&self) -> Option<Stamp> {
        let s = self.state.load(SeqCst);
        (s & WBIT == 0).then_some(Stamp(s & SBITS))
    }

    /// Returns `true` if the lock has not been exclusively acquired since
    /// `stamp` was issued. Always `true` for the stamp of a lock that is
    /// currently held.
    ///
    /// Reads performed before the call are ordered before the validation.
    pub fn validate(&self, stamp: Stamp) -> bool {
        fence(Acquire);
        stamp.0 & SBITS == self.state.load(SeqCst) & SBITS
    }

    /// Releases the write lock if the lock state matches `stamp`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStamp`] if `stamp` does not match the
    /// current write lock.
    pub fn unlock_write(&self, stamp: Stamp) -> Result<()> {
        let s = self.state.load(SeqCst);
        if s != stamp.0 || stamp.0 & WBIT == 0 {
            return Err(invalid(stamp));
        }
        self.state.store(unlock_write_state(s), SeqCst);
        self.release_head();
        Ok(())
    }

    /// Releases one hold of the read lock if the lock state matches
    /// `stamp`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStamp`] if `stamp` does not match a
    /// currently held read lock.
    pub fn unlock_read(&self, stamp: Stamp) -> Result<()> {
        loop {
            let s = self.state.load(SeqCst);
            let m = s & ABITS;
            if s & SBITS != stamp.0 & SBITS || stamp.0 & ABITS == 0 || m == 0 || m == WBIT {
                return Err(invalid(stamp));
            }
            if self.try_release_read_bits(s) {
                return Ok(());
            }
        }
    }

    /// Releases the lock mode that `stamp` represents, if it matches the
    /// lock state.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStamp`] if `stamp` does not match a
    /// currently held lock.
    pub fn unlock(&self, stamp: Stamp) -> Result<()> {
        let a = stamp.0 & ABITS;
        loop {
            let s = self.state.load(SeqCst);
            let m = s & ABITS;
            if s & SBITS != stamp.0 & SBITS || m == 0 {
                break;
            }
            if m == WBIT {
                if a != m {
                    break;
                }
                self.state.store(unlock_write_state(s), SeqCst);
                self.release_head();
                return Ok(());
            }
            if a == 0 || a >= WBIT {
                break;
            }
            if self.try_release_read_bits(s) {
                return Ok(());
            }
        }
        Err(invalid(stamp))
    }

    /// Upgrades `stamp` to a write lock, if possible without blocking.
    ///
    /// Succeeds for a write stamp of the current lock, for the only read
    /// lock currently held, and for a still valid optimistic stamp while
    /// the lock is free.
    pub fn try_convert_to_write_lock(&self, stamp: Stamp) -> Option<Stamp> {
        let a = stamp.0 & ABITS;
        loop {
            let s = self.state.load(SeqCst);
            if s & SBITS != stamp.0 & SBITS {
                return None;
            }
            let m = s & ABITS;
            if m == 0 {
                if a != 0 {
                    return None;
                }
                if self.cas_state(s, s + WBIT) {
                    return Some(Stamp(s + WBIT));
                }
            } else if m == WBIT {
                return (a == m).then_some(stamp);
            } else if m == RUNIT && a != 0 {
                let next = s - RUNIT + WBIT;
                if self.cas_state(s, next) {
                    return Some(Stamp(next));
                }
            } else {
                return None;
            }
        }
    }

    /// Downgrades `stamp` to a read lock, or acquires a read lock for a
    /// still valid optimistic stamp.
    ///
    /// A read stamp is returned unchanged.
    pub fn try_convert_to_read_lock(&self, stamp: Stamp) -> Option<Stamp> {
        let a = stamp.0 & ABITS;
        loop {
            let s = self.state.load(SeqCst);
            if s & SBITS != stamp.0 & SBITS {
                return None;
            }
            let m = s & ABITS;
            if m == 0 {
                if a != 0 {
                    return None;
                }
                if self.cas_state(s, s + RUNIT) {
                    return Some(Stamp(s + RUNIT));
                }
            } else if m == WBIT {
                if a != m {
                    return None;
                }
                let next = s.wrapping_add(WBIT + RUNIT);
                self.state.store(next, SeqCst);
                self.release_head();
                return Some(Stamp(next));
            } else if a != 0 && a < WBIT {
                return Some(stamp);
            } else {
                return None;
            }
        }
    }

    /// Releases the lock mode `stamp` represents and returns an
    /// observation stamp, or validates an optimistic stamp.
    pub fn try_convert_to_optimistic_read(&self, stamp: Stamp) -> Option<Stamp> {
        let a = stamp.0 & ABITS;
        fence(Acquire);
        loop {
            let s = self.state.load(SeqCst);
            if s & SBITS != stamp.0 & SBITS {
                return None;
            }
            let m = s & ABITS;
            if m == 0 {
                return (a == 0).then_some(Stamp(s));
            }
            if m == WBIT {
                if a != m {
                    return None;
                }
                let next = unlock_write_state(s);
                self.state.store(next, SeqCst);
                self.release_head();
                return Some(Stamp(next));
            }
            if a == 0 || a >= WBIT {
                return None;
            }
            if m < RFULL {
                if self.cas_state(s, s - RUNIT) {
                    if m == RUNIT {
                        self.release_head();
                    }
                    return Some(Stamp((s - RUNIT) & SBITS));
                }
            } else if let Some(next) = self.try_dec_reader_overflow(s) {
                return Some(Stamp(next & SBITS));
            }
        }
    }

    /// Releases the write lock if held, without a stamp. Returns `true` if
    /// it was held.
    pub fn try_unlock_write(&self) -> bool {
        let s = self.state.load(SeqCst);
        if s & WBIT == 0 {
            return false;
        }
        self.state.store(unlock_write_state(s), SeqCst);
        self.release_head();
        true
    }

    /// Releases one hold of the read lock if held, without a stamp.
    /// Returns `true` if a read lock was held.
    pub fn try_unlock_read(&self) -> bool {
        loop {
            let s = self.state.load(SeqCst);
            let m = s & ABITS;
            if m == 0 || m >= WBIT {
                return false;
            }
            if self.try_release_read_bits(s) {
                return true;
            }
        }
    }

    /// Returns `true` if the lock is currently held exclusively.
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.state.load(SeqCst) & WBIT != 0
    }

    /// Returns `true` if the lock is currently held non-exclusively.
    #[must_use]
    pub fn is_read_locked(&self) -> bool {
        self.state.load(SeqCst) & RBITS != 0
    }

    /// Returns the number of read locks held.
    #[must_use]
    pub fn read_lock_count(&self) -> u64 {
        let readers = self.state.load(SeqCst) & RBITS;
        if readers >= RFULL {
            RFULL + u64::from(self.reader_overflow.load(Relaxed))
        } else {
            readers
        }
    }

    /// Returns `true` if any thread may be waiting to acquire.
    #[must_use]
    pub fn has_queued_threads(&self) -> bool {
        !self.queue_is_empty()
    }

    fn queue_is_empty(&self) -> bool {
        link::same(&self.whead.load_full(), &self.wtail.load_full())
    }

    fn cas_state(&self, current: u64, new: u64) -> bool {
        self.state.compare_exchange(current, new, SeqCst, SeqCst).is_ok()
    }

    /// Adds a reader to state `s`, spilling into the overflow counter once
    /// the reader bits are saturated.
    fn try_acquire_read_bits(&self, s: u64) -> Option<u64> {
        let m = s & ABITS;
        if m < RFULL {
            self.cas_state(s, s + RUNIT).then_some(s + RUNIT)
        } else if m < WBIT {
            self.try_inc_reader_overflow(s)
        } else {
            None
        }
    }

    /// Removes a reader from state `s`, waking the queue if it was the last
    /// one. Returns `false` if the state changed under us.
    fn try_release_read_bits(&self, s: u64) -> bool {
        let m = s & ABITS;
        if m < RFULL {
            if !self.cas_state(s, s - RUNIT) {
                return false;
            }
            if m == RUNIT {
                self.release_head();
            }
            true
        } else {
            self.try_dec_reader_overflow(s).is_some()
        }
    }

    /// Increments the overflow counter, using the `RBITS` reader value as a
    /// spinlock over it.
    ///
    /// A caller that finds the reader bits anywhere but at `RFULL` yields
    /// before returning, on every such attempt rather than a random subset
    /// of them.
    ///
    /// # Panics
    ///
    /// Panics if the overflow counter is exhausted.
    fn try_inc_reader_overflow(&self, s: u64) -> Option<u64> {
        if s & ABITS != RFULL {
            thread::yield_now();
            return None;
        }
        if !self.cas_state(s, s | RBITS) {
            return None;
        }
        let Some(overflow) = self.reader_overflow.load(Relaxed).checked_add(1) else {
            self.state.store(s, SeqCst);
            panic!("maximum lock count exceeded");
        };
        if overflow == 1 {
            tracing::trace!("reader count saturated, spilling into overflow counter");
        }
        self.reader_overflow.store(overflow, Relaxed);
        self.state.store(s, SeqCst);
        Some(s)
    }

    /// Decrements the overflow counter, or the reader bits once it is
    /// empty. Yields like [`try_inc_reader_overflow`] when the reader bits
    /// are not at `RFULL`.
    ///
    /// [`try_inc_reader_overflow`]: Self::try_inc_reader_overflow
    fn try_dec_reader_overflow(&self, s: u64) -> Option<u64> {
        if s & ABITS != RFULL {
            thread::yield_now();
            return None;
        }
        if !self.cas_state(s, s | RBITS) {
            return None;
        }
        let overflow = self.reader_overflow.load(Relaxed);
        let next = if overflow > 0 {
            self.reader_overflow.store(overflow - 1, Relaxed);
            s
        } else {
            s - RUNIT
        };
        self.state.store(next, SeqCst);
        Some(next)
    }

    fn init_queue(&self) {
        let head = WNode::dummy();
        if link::cas(&self.whead, &None, Some(Arc::clone(&head))) {
            self.wtail.store(Some(head));
        }
    }

    /// Wakes the successor of the head, if the head owes it a signal.
    fn release_head(&self) {
        if let Some(head) = self.whead.load_full() {
            if head.status() != 0 {
                self.release(&head);
            }
        }
    }

    /// Wakes the successor of `head`, normally `head.next`, but found by
    /// walking back from the tail if that link is stale.
    fn release(&self, head: &Arc<WNode>) {
        head.cas_status(WAITING, 0);
        let mut next = head.next.load_full();
        if next.as_ref().map_or(true, |next| next.is_cancelled()) {
            let mut cursor = self.wtail.load_full();
            while let Some(node) = cursor {
                if Arc::ptr_eq(&node, head) {
                    break;
                }
                cursor = node.prev.load_full();
                if node.status() <= 0 {
                    next = Some(node);
                }
            }
        }
        if let Some(next) = next {
            next.unpark();
        }
    }

    /// Returns `true` if state `s` keeps a `mode` waiter from acquiring.
    const fn conflicts(mode: WMode, s: u64) -> bool {
        match mode {
            WMode::Write => s & ABITS != 0,
            WMode::Read => s & ABITS >= WBIT,
        }
    }

    fn attempt(&self, mode: WMode) -> Attempt {
        let s = self.state.load(SeqCst);
        if Self::conflicts(mode, s) {
            return Attempt::Blocked;
        }
        let next = match mode {
            WMode::Write => self.cas_state(s, s + WBIT).then_some(s + WBIT),
            WMode::Read => self.try_acquire_read_bits(s),
        };
        next.map_or(Attempt::Contended, Attempt::Acquired)
    }

    fn acquire_write(&self, wait: Wait) -> Result<Option<Stamp>> {
        let mut relax = R::new();
        let mut spins = Countdown::Fresh;
        let mut queued: Link<WNode> = None;
        let (node, pred) = loop {
            let s = self.state.load(SeqCst);
            let m = s & ABITS;
            if m == 0 {
                if self.cas_state(s, s + WBIT) {
                    return Ok(Some(Stamp(s + WBIT)));
                }
            } else if spins == Countdown::Fresh {
                // Only worth spinning if a writer holds the lock and nobody
                // is queued ahead of us.
                let budget = if m == WBIT && self.queue_is_empty() { self.config.spins } else { 0 };
                spins = Countdown::arm(budget);
            } else if spins.tick(&mut relax) {
                continue;
            } else if let Some(tail) = self.wtail.load_full() {
                let Some(node) = queued.clone() else {
                    queued = Some(WNode::new(WMode::Write, &tail));
                    continue;
                };
                if !link::is(&node.prev.load_full(), &tail) {
                    node.prev.store(Some(tail));
                } else if link::cas(&self.wtail, &Some(Arc::clone(&tail)), Some(Arc::clone(&node))) {
                    tail.next.store(Some(Arc::clone(&node)));
                    break (node, tail);
                }
            } else {
                self.init_queue();
            }
        };
        self.acquire_queued(&node, pred, wait, false)
    }

    fn acquire_read(&self, wait: Wait) -> Result<Option<Stamp>> {
        let mut relax = R::new();
        let mut spins = Countdown::Fresh;
        let mut interrupted = false;
        let mut queued: Link<WNode> = None;
        let (node, pred) = loop {
            let mut head = self.whead.load_full();
            let mut tail = self.wtail.load_full();
            if link::same(&head, &tail) {
                // Nobody queued: spin while a writer holds the lock, until
                // the queue is seen unchanged or non-empty.
                loop {
                    let s = self.state.load(SeqCst);
                    if let Some(next) = self.try_acquire_read_bits(s) {
                        return Ok(Some(acquired(next, interrupted)));
                    }
                    if s & ABITS < WBIT {
                        continue;
                    }
                    match spins {
                        Countdown::Fresh => spins = Countdown::arm(self.config.spins),
                        Countdown::Spinning(_) => {
                            spins.tick(&mut relax);
                        }
                        Countdown::Exhausted => {
                            let (h, t) = (self.whead.load_full(), self.wtail.load_full());
                            let unchanged = link::same(&h, &head) && link::same(&t, &tail);
                            let formed = !link::same(&h, &t);
                            (head, tail) = (h, t);
                            if unchanged || formed {
                                break;
                            }
                            spins = Countdown::arm(self.config.spins);
                        }
                    }
                }
            }
            let Some(tail) = tail else {
                self.init_queue();
                continue;
            };
            let Some(node) = queued.clone() else {
                queued = Some(WNode::new(WMode::Read, &tail));
                continue;
            };
            if link::is(&head, &tail) || tail.mode() != WMode::Read {
                if !link::is(&node.prev.load_full(), &tail) {
                    node.prev.store(Some(tail));
                } else if link::cas(&self.wtail, &Some(Arc::clone(&tail)), Some(Arc::clone(&node))) {
                    tail.next.store(Some(Arc::clone(&node)));
                    break (node, tail);
                }
                continue;
            }
            // The tail is a queued reader: join its cowait stack instead of
            // taking a queue slot.
            let cowait = tail.cowait.load_full();
            node.prev.store(None);
            node.cowait.store(cowait.clone());
            if !link::cas(&tail.cowait, &cowait, Some(Arc::clone(&node))) {
                node.cowait.store(None);
                continue;
            }
            match self.cowait(&node, &tail, wait, &mut interrupted)? {
                Cowait::Acquired(next) => return Ok(Some(acquired(next, interrupted))),
                Cowait::TimedOut => return Ok(None),
                Cowait::Requeue => queued = None,
            }
        };
        self.acquire_queued(&node, pred, wait, interrupted)
    }

    /// Waits on the cowait stack of `group`, a reader queued ahead, until
    /// the group is released.
    fn cowait(&self, node: &Arc<WNode>, group: &Arc<WNode>, wait: Wait, interrupted: &mut bool) -> Result<Cowait> {
        loop {
            let head = self.whead.load_full();
            if let Some(head) = &head {
                head.wake_cowaiter();
            }
            let pp = group.prev.load_full();
            if link::same(&head, &pp) || link::is(&head, group) || pp.is_none() {
                loop {
                    let s = self.state.load(SeqCst);
                    if let Some(next) = self.try_acquire_read_bits(s) {
                        return Ok(Cowait::Acquired(next));
                    }
                    if s & ABITS >= WBIT {
                        break;
                    }
                }
            }
            if link::same(&self.whead.load_full(), &head) && link::same(&group.prev.load_full(), &pp) {
                if pp.is_none() || link::is(&head, group) || group.status() > 0 {
                    return Ok(Cowait::Requeue);
                }
                if wait.expired() {
                    self.cancel_waiter(node, group, false)?;
                    return Ok(Cowait::TimedOut);
                }
                node.set_waiting(true);
                let blocked = !link::same(&head, &pp) || self.state.load(SeqCst) & ABITS == WBIT;
                if blocked && link::same(&self.whead.load_full(), &head) && link::same(&group.prev.load_full(), &pp) {
                    wait.park();
                }
                node.set_waiting(false);
                if park::interrupted() {
                    if wait.is_interruptible() {
                        self.cancel_waiter(node, group, true)?;
                        return Ok(Cowait::TimedOut);
                    }
                    *interrupted = true;
                }
            }
        }
    }

    /// Waits for a queued node to reach the head and acquire, spinning
    /// with an escalating budget while first in line.
    fn acquire_queued(
        &self,
        node: &Arc<WNode>,
        mut pred: Arc<WNode>,
        wait: Wait,
        mut interrupted: bool,
    ) -> Result<Option<Stamp>> {
        let mode = node.mode();
        let mut relax = R::new();
        let mut head_spin = HeadSpin::new(self.config.head_spins, self.config.max_head_spins);
        loop {
            let head = self.whead.load_full();
            if link::is(&head, &pred) {
                let mut spins = Countdown::arm(head_spin.escalate());
                loop {
                    match self.attempt(mode) {
                        Attempt::Acquired(next) => {
                            self.whead.store(Some(Arc::clone(node)));
                            node.prev.store(None);
                            if mode == WMode::Read {
                                node.wake_cowaiters();
                            }
                            return Ok(Some(acquired(next, interrupted)));
                        }
                        Attempt::Blocked => {
                            if !spins.tick(&mut relax) {
                                break;
                            }
                        }
                        Attempt::Contended => {}
                    }
                }
            } else if let Some(head) = &head {
                // Help release readers of a group that already acquired.
                head.wake_cowaiters();
            }
            if !link::same(&self.whead.load_full(), &head) {
                continue;
            }
            let np = node.prev.load_full();
            if !link::is(&np, &pred) {
                if let Some(np) = np {
                    np.next.store(Some(Arc::clone(node)));
                    pred = np;
                }
                continue;
            }
            match pred.status() {
                0 => {
                    pred.cas_status(0, WAITING);
                }
                CANCELLED => {
                    if let Some(pp) = pred.prev.load_full() {
                        node.prev.store(Some(Arc::clone(&pp)));
                        pp.next.store(Some(Arc::clone(node)));
                    }
                }
                _ => {
                    if wait.expired() {
                        self.cancel_waiter(node, node, false)?;
                        return Ok(None);
                    }
                    node.set_waiting(true);
                    let blocked = !link::is(&head, &pred) || Self::conflicts(mode, self.state.load(SeqCst));
                    if pred.status() < 0
                        && blocked
                        && link::same(&self.whead.load_full(), &head)
                        && link::is(&node.prev.load_full(), &pred)
                    {
                        wait.park();
                    }
                    node.set_waiting(false);
                    if park::interrupted() {
                        if wait.is_interruptible() {
                            self.cancel_waiter(node, node, true)?;
                            return Ok(None);
                        }
                        interrupted = true;
                    }
                }
            }
        }
    }

    /// Cancels `node`, a member of `group` (which is `node` itself for
    /// queued nodes, or the reader whose cowait stack it joined).
    ///
    /// Returns [`SyncError::Interrupted`] if the cancellation was caused by
    /// an interrupt, or one arrived meanwhile.
    fn cancel_waiter(&self, node: &Arc<WNode>, group: &Arc<WNode>, interrupted: bool) -> Result<()> {
        node.cancel();
        tracing::trace!(mode = ?node.mode(), interrupted, "stamped lock waiter cancelled");

        // Unsplice cancelled nodes from the group's cowait stack.
        let mut p = Arc::clone(group);
        while let Some(q) = p.cowait.load_full() {
            if q.is_cancelled() {
                link::cas(&p.cowait, &Some(Arc::clone(&q)), q.cowait.load_full());
                p = Arc::clone(group);
            } else {
                p = q;
            }
        }

        if Arc::ptr_eq(group, node) {
            // Wake uncancelled cowaiters, they will requeue.
            let mut cowaiter = group.cowait.load_full();
            while let Some(c) = cowaiter {
                c.unpark();
                cowaiter = c.cowait.load_full();
            }
            let mut pred = node.prev.load_full();
            while let Some(pr) = pred {
                let succ = self.live_successor(node, &pr);
                if link::is(&pr.next.load_full(), node) {
                    link::cas(&pr.next, &Some(Arc::clone(node)), succ.clone());
                }
                if let Some(succ) = &succ {
                    // Wake the successor so it observes its new predecessor.
                    succ.take_and_unpark();
                }
                if !pr.is_cancelled() {
                    break;
                }
                let Some(pp) = pr.prev.load_full() else {
                    break;
                };
                node.prev.store(Some(Arc::clone(&pp)));
                link::cas(&pp.next, &Some(Arc::clone(&pr)), succ);
                pred = Some(pp);
            }
        }

        // The first waiter may be a reader that can proceed now.
        while let Some(head) = self.whead.load_full() {
            let mut first = head.next.load_full();
            if first.as_ref().map_or(true, |first| first.is_cancelled()) {
                let mut cursor = self.wtail.load_full();
                while let Some(t) = cursor {
                    if Arc::ptr_eq(&t, &head) {
                        break;
                    }
                    cursor = t.prev.load_full();
                    if t.status() <= 0 {
                        first = Some(t);
                    }
                }
            }
            if link::is(&self.whead.load_full(), &head) {
                let readable = self.state.load(SeqCst) & ABITS != WBIT;
                if first.is_some_and(|first| first.mode() == WMode::Read) && head.status() == 0 && readable {
                    self.release(&head);
                }
                break;
            }
        }

        if interrupted || park::interrupted() {
            Err(SyncError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Finds the first uncancelled successor of a cancelled `node`, fixing
    /// up its `next` link, and unlinks `node` as tail if it has none.
    fn live_successor(&self, node: &Arc<WNode>, pred: &Arc<WNode>) -> Link<WNode> {
        loop {
            let succ = node.next.load_full();
            if succ.as_ref().is_some_and(|succ| !succ.is_cancelled()) {
                return succ;
            }
            let mut found = None;
            let mut cursor = self.wtail.load_full();
            while let Some(t) = cursor {
                if Arc::ptr_eq(&t, node) {
                    break;
                }
                cursor = t.prev.load_full();
                if !t.is_cancelled() {
                    found = Some(t);
                }
            }
            if link::same(&succ, &found) || link::cas(&node.next, &succ, found.clone()) {
                if found.is_none() && link::is(&self.wtail.load_full(), node) {
                    link::cas(&self.wtail, &Some(Arc::clone(node)), Some(Arc::clone(pred)));
                }
                return found;
            }
        }
    }
}

/// State after releasing the write lock held in `s`, restarting the
/// version at `ORIGIN` if it wrapped.
const fn unlock_write_state(s: u64) -> u64 {
    match s.wrapping_add(WBIT) {
        0 => ORIGIN,
        next => next,
    }
}

/// Wraps a freshly acquired state into a stamp, re-asserting an interrupt
/// swallowed by an uninterruptible wait.
fn acquired(next: u64, interrupted: bool) -> Stamp {
    if interrupted {
        park::self_interrupt();
    }
    Stamp(next)
}

fn invalid(stamp: Stamp) -> SyncError {
    tracing::debug!(stamp = stamp.0, "stamp does not match the lock state");
    SyncError::InvalidStamp
}

impl<R: Relax> Default for StampedLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Drop for StampedLock<R> {
    fn drop(&mut self) {
        unlink_chain(self.wtail.swap(None), |node| node.prev.load_full());
        unlink_chain(self.whead.swap(None), |node| node.next.load_full());
    }
}

impl<R> Debug for StampedLock<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = self.state.load(SeqCst);
        let mut d = f.debug_struct("StampedLock");
        match s & ABITS {
            0 => d.field("mode", &"unlocked"),
            WBIT => d.field("mode", &"write-locked"),
            _ => d.field("mode", &"read-locked"),
        };
        d.field("version", &(s >> LG_READERS)).finish_non_exhaustive()
    }
}

#[cfg(all(not(loom), test))]
impl<R: Relax> crate::test::RawLock for StampedLock<R> {
    fn acquire(&self) {
        self.write_lock();
    }

    fn release(&self) {
        self.try_unlock_write();
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
    use std::sync::mpsc::channel;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    use super::{Stamp, StampedLock, ORIGIN, RFULL};
    use crate::config::SpinConfig;
    use crate::error::SyncError;
    use crate::link;
    use crate::park::Interrupter;
    use crate::relax::Yield;
    use crate::test::{tests, Guarded};

    fn wait_queued<R: crate::relax::Relax>(lock: &StampedLock<R>) {
        while !lock.has_queued_threads() {
            thread::yield_now();
        }
    }

    /// Waits for `len` queue slots behind the head, cowaiting readers not
    /// included.
    fn wait_queue_len<R>(lock: &StampedLock<R>, len: usize) {
        loop {
            let head = lock.whead.load_full();
            let mut cursor = lock.wtail.load_full();
            let mut queued = 0;
            while let Some(node) = cursor {
                if link::is(&head, &node) {
                    break;
                }
                queued += 1;
                cursor = node.prev.load_full();
            }
            if queued >= len {
                return;
            }
            thread::yield_now();
        }
    }

    #[test]
    fn lots_and_lots_lock() {
        tests::lots_and_lots_lock::<Guarded<StampedLock, _>>();
    }

    #[test]
    fn test_lock_arc_access_in_unwind() {
        tests::test_lock_arc_access_in_unwind::<Guarded<StampedLock, _>>();
    }

    #[test]
    fn optimistic_read_sees_write() {
        let lock: StampedLock = StampedLock::new();
        let stamp = lock.try_write_lock().unwrap();
        assert_ne!(stamp.value(), 0);
        assert!(stamp.is_write_lock());
        thread::scope(|s| {
            assert_eq!(s.spawn(|| lock.try_optimistic_read()).join().unwrap(), None);
        });
        lock.unlock_write(stamp).unwrap();
        thread::scope(|s| {
            let valid = s
                .spawn(|| {
                    let stamp = lock.try_optimistic_read().unwrap();
                    assert!(stamp.is_optimistic_read());
                    lock.validate(stamp)
                })
                .join()
                .unwrap();
            assert!(valid);
        });
    }

    #[test]
    fn validate_fails_after_write() {
        let lock: StampedLock = StampedLock::new();
        let optimistic = lock.try_optimistic_read().unwrap();
        let read = lock.read_lock();
        assert!(lock.validate(optimistic));
        assert!(lock.validate(read));
        lock.unlock_read(read).unwrap();

        let write = lock.write_lock();
        assert!(lock.validate(write));
        assert!(!lock.validate(optimistic));
        lock.unlock_write(write).unwrap();
        assert!(!lock.validate(optimistic));
        assert!(!lock.validate(write));
        assert!(lock.validate(lock.try_optimistic_read().unwrap()));
    }

    #[test]
    fn stamp_kinds() {
        let lock: StampedLock = StampedLock::new();
        let read = lock.read_lock();
        assert!(read.is_read_lock() && read.is_lock());
        assert!(!read.is_write_lock() && !read.is_optimistic_read());
        lock.unlock_read(read).unwrap();
        let write = lock.write_lock();
        assert!(write.is_write_lock() && write.is_lock());
        assert!(!write.is_read_lock());
        lock.unlock(write).unwrap();
        assert_eq!(u64::from(lock.try_optimistic_read().unwrap()) % 256, 0);
        assert!(!Stamp(0).is_optimistic_read());
    }

    #[test]
    fn modes_exclude_each_other() {
        let lock: StampedLock = StampedLock::new();
        let first = lock.try_read_lock().unwrap();
        let second = lock.try_read_lock().unwrap();
        assert!(lock.is_read_locked());
        assert_eq!(lock.read_lock_count(), 2);
        assert_eq!(lock.try_write_lock(), None);
        lock.unlock_read(first).unwrap();
        lock.unlock(second).unwrap();
        assert!(!lock.is_read_locked());

        let write = lock.try_write_lock().unwrap();
        assert!(lock.is_write_locked());
        assert_eq!(lock.try_read_lock(), None);
        assert_eq!(lock.try_write_lock(), None);
        assert_eq!(lock.try_write_lock_for(Duration::ZERO), Ok(None));
        assert_eq!(lock.try_read_lock_for(Duration::ZERO), Ok(None));
        lock.unlock_write(write).unwrap();
        assert!(!lock.is_write_locked());
    }

    #[test]
    fn mismatched_stamps_are_rejected() {
        let lock: StampedLock = StampedLock::new();
        let optimistic = lock.try_optimistic_read().unwrap();
        assert_eq!(lock.unlock(optimistic), Err(SyncError::InvalidStamp));
        assert_eq!(lock.unlock_read(optimistic), Err(SyncError::InvalidStamp));

        let read = lock.read_lock();
        assert_eq!(lock.unlock_write(read), Err(SyncError::InvalidStamp));
        lock.unlock_read(read).unwrap();
        assert_eq!(lock.unlock_read(read), Err(SyncError::InvalidStamp));

        let write = lock.write_lock();
        assert_eq!(lock.unlock_read(write), Err(SyncError::InvalidStamp));
        lock.unlock_write(write).unwrap();
        assert_eq!(lock.unlock_write(write), Err(SyncError::InvalidStamp));
        assert!(!lock.try_unlock_write());
        assert!(!lock.try_unlock_read());
    }

    #[test]
    fn conversions() {
        let lock: StampedLock = StampedLock::new();

        // Sole reader upgrades, a second reader blocks the upgrade.
        let read = lock.read_lock();
        let other = lock.read_lock();
        assert_eq!(lock.try_convert_to_write_lock(read), None);
        lock.unlock_read(other).unwrap();
        let write = lock.try_convert_to_write_lock(read).unwrap();
        assert!(lock.is_write_locked());
        assert_eq!(lock.try_convert_to_write_lock(write), Some(write));

        // Downgrade always succeeds from write mode.
        let read = lock.try_convert_to_read_lock(write).unwrap();
        assert!(lock.is_read_locked() && !lock.is_write_locked());
        assert_eq!(lock.try_convert_to_read_lock(read), Some(read));

        // Release into an observation stamp.
        let optimistic = lock.try_convert_to_optimistic_read(read).unwrap();
        assert!(!lock.is_read_locked());
        assert!(lock.validate(optimistic));

        // A valid optimistic stamp acquires while the lock is free.
        let write = lock.try_convert_to_write_lock(optimistic).unwrap();
        let optimistic = lock.try_convert_to_optimistic_read(write).unwrap();
        assert!(!lock.is_write_locked());
        let read = lock.try_convert_to_read_lock(optimistic).unwrap();
        assert!(lock.try_unlock_read());

        // Stale stamps convert to nothing.
        assert_eq!(lock.try_convert_to_write_lock(write), None);
        assert_eq!(lock.try_convert_to_optimistic_read(read), None);
    }

    #[test]
    fn reader_overflow() {
        const READERS: u64 = RFULL + 74;
        let lock: StampedLock = StampedLock::new();
        let stamps: Vec<_> = (0..READERS).map(|_| lock.try_read_lock().unwrap()).collect();
        assert_eq!(lock.read_lock_count(), READERS);
        assert_eq!(lock.try_write_lock(), None);
        for stamp in stamps.into_iter().rev() {
            lock.unlock_read(stamp).unwrap();
        }
        assert_eq!(lock.read_lock_count(), 0);
        assert!(lock.try_write_lock().is_some());
    }

    #[test]
    fn version_wraps_to_origin() {
        assert_eq!(super::unlock_write_state(u64::MAX & !127), ORIGIN);
        assert_eq!(super::unlock_write_state(ORIGIN + 128), ORIGIN + 256);
    }

    #[test]
    fn writer_waits_for_readers() {
        let lock: StampedLock = StampedLock::new();
        let read = lock.read_lock();
        thread::scope(|s| {
            let writer = s.spawn(|| {
                let stamp = lock.write_lock();
                lock.unlock_write(stamp).unwrap();
            });
            wait_queued(&lock);
            assert!(lock.is_read_locked());
            lock.unlock_read(read).unwrap();
            writer.join().unwrap();
        });
        assert!(!lock.is_read_locked() && !lock.is_write_locked());
    }

    #[test]
    fn reader_defers_to_queued_writer() {
        let lock: StampedLock = StampedLock::new();
        let order = Mutex::new(Vec::new());
        let read = lock.read_lock();
        thread::scope(|s| {
            s.spawn(|| {
                let stamp = lock.write_lock();
                order.lock().unwrap().push("writer");
                lock.unlock_write(stamp).unwrap();
            });
            wait_queued(&lock);
            // The lock is only read-locked, but a writer is queued.
            s.spawn(|| {
                let stamp = lock.read_lock();
                order.lock().unwrap().push("reader");
                lock.unlock_read(stamp).unwrap();
            });
            thread::sleep(Duration::from_millis(10));
            assert!(order.lock().unwrap().is_empty());
            lock.unlock_read(read).unwrap();
        });
        assert_eq!(*order.lock().unwrap(), ["writer", "reader"]);
    }

    #[test]
    fn queued_readers_are_released_together() {
        const READERS: usize = 4;
        let lock: StampedLock<Yield> = StampedLock::with_config(SpinConfig::uniprocessor());
        let write = lock.write_lock();
        let inside = AtomicUsize::new(0);
        let release = AtomicBool::new(false);
        thread::scope(|s| {
            for _ in 0..READERS {
                s.spawn(|| {
                    let stamp = lock.read_lock();
                    inside.fetch_add(1, SeqCst);
                    while !release.load(SeqCst) {
                        thread::yield_now();
                    }
                    lock.unlock_read(stamp).unwrap();
                });
            }
            wait_queued(&lock);
            lock.unlock_write(write).unwrap();
            while inside.load(SeqCst) < READERS {
                thread::yield_now();
            }
            assert_eq!(lock.read_lock_count(), READERS as u64);
            release.store(true, SeqCst);
        });
        assert!(!lock.is_read_locked());
    }

    #[test]
    fn timed_write_gives_up() {
        let lock: StampedLock = StampedLock::new();
        let write = lock.write_lock();
        thread::scope(|s| {
            let acquired = s.spawn(|| lock.try_write_lock_for(Duration::from_millis(10))).join().unwrap();
            assert_eq!(acquired, Ok(None));
            let acquired = s.spawn(|| lock.try_read_lock_for(Duration::from_millis(10))).join().unwrap();
            assert_eq!(acquired, Ok(None));
        });
        assert!(!lock.has_queued_threads());
        lock.unlock_write(write).unwrap();
        let read = lock.try_read_lock_for(Duration::from_millis(10)).unwrap().unwrap();
        lock.unlock_read(read).unwrap();
    }

    #[test]
    fn cancelled_writer_is_skipped_by_its_successor() {
        let lock: StampedLock = StampedLock::new();
        let write = lock.write_lock();
        thread::scope(|s| {
            let timed = s.spawn(|| lock.try_write_lock_for(Duration::from_millis(250)));
            wait_queue_len(&lock, 1);
            let untimed = s.spawn(|| {
                let stamp = lock.write_lock();
                lock.unlock_write(stamp).unwrap();
            });
            wait_queue_len(&lock, 2);
            assert_eq!(timed.join().unwrap(), Ok(None));
            lock.unlock_write(write).unwrap();
            untimed.join().unwrap();
        });
        assert!(!lock.is_write_locked());
        assert!(!lock.has_queued_threads());
    }

    #[test]
    fn timed_out_cowaiter_leaves_its_group_queued() {
        let lock: StampedLock = StampedLock::new();
        let write = lock.write_lock();
        thread::scope(|s| {
            let first = s.spawn(|| {
                let stamp = lock.read_lock();
                lock.unlock_read(stamp).unwrap();
            });
            wait_queue_len(&lock, 1);
            let cowaiter = s.spawn(|| lock.try_read_lock_for(Duration::from_millis(250)));
            let group = lock.wtail.load_full().unwrap();
            while group.cowait.load().is_none() {
                thread::yield_now();
            }
            assert_eq!(cowaiter.join().unwrap(), Ok(None));
            assert!(group.cowait.load().is_none());
            assert!(lock.has_queued_threads());
            lock.unlock_write(write).unwrap();
            first.join().unwrap();
        });
        assert_eq!(lock.read_lock_count(), 0);
        assert!(!lock.has_queued_threads());
    }

    #[test]
    fn interruptible_acquires_abort() {
        let lock = &StampedLock::<crate::relax::Spin>::new();
        let write = lock.write_lock();
        thread::scope(|s| {
            let (tx, rx) = channel();
            let reader = s.spawn(move || {
                tx.send(Interrupter::current()).unwrap();
                lock.read_lock_interruptibly()
            });
            let interrupter = rx.recv().unwrap();
            wait_queued(lock);
            interrupter.interrupt();
            assert_eq!(reader.join().unwrap(), Err(SyncError::Interrupted));
        });
        Interrupter::current().interrupt();
        assert_eq!(lock.write_lock_interruptibly(), Err(SyncError::Interrupted));
        lock.unlock_write(write).unwrap();
        assert!(lock.write_lock_interruptibly().is_ok());
    }

    #[test]
    fn readers_and_writers_exclude() {
        const THREADS: usize = 6;
        const ITERS: usize = 300;
        let lock: StampedLock = StampedLock::new();
        let writers = AtomicUsize::new(0);
        let readers = AtomicUsize::new(0);
        let total = AtomicUsize::new(0);
        thread::scope(|s| {
            for id in 0..THREADS {
                let (lock, writers, readers, total) = (&lock, &writers, &readers, &total);
                s.spawn(move || {
                    for i in 0..ITERS {
                        if (id + i) % 3 == 0 {
                            let stamp = lock.write_lock();
                            assert_eq!(writers.fetch_add(1, SeqCst), 0);
                            assert_eq!(readers.load(SeqCst), 0);
                            total.fetch_add(1, SeqCst);
                            writers.fetch_sub(1, SeqCst);
                            lock.unlock_write(stamp).unwrap();
                        } else {
                            let stamp = lock.read_lock();
                            readers.fetch_add(1, SeqCst);
                            assert_eq!(writers.load(SeqCst), 0);
                            readers.fetch_sub(1, SeqCst);
                            lock.unlock_read(stamp).unwrap();
                        }
                    }
                });
            }
        });
        assert_eq!(total.load(SeqCst), THREADS * ITERS / 3);
        assert!(!lock.is_read_locked() && !lock.is_write_locked());
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;

    #[test]
    fn stamped_read_write() {
        models::stamped_read_write();
    }
}
