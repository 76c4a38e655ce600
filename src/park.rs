//! Thread parking, identity and interruption.
//!
//! Waiting threads block through [`std::thread::park`], which gives every
//! thread at most one outstanding wake permit: an unpark delivered before the
//! matching park is not lost, and repeated unparks do not accumulate. Parking
//! may also return spuriously, so every caller re-tests its predicate in a
//! loop.
//!
//! Rust threads carry no interrupt status, so this module keeps one per
//! thread. An [`Interrupter`] captured by a thread can be handed to others,
//! which may then abort that thread's interruptible waits.
//!
//! # Example
//!
//! ```
//! use std::sync::mpsc::channel;
//! use std::thread;
//!
//! use queued_sync::park::{self, Interrupter};
//!
//! let (tx, rx) = channel();
//! let handle = thread::spawn(move || {
//!     tx.send(Interrupter::current()).unwrap();
//!     while !park::is_interrupted() {
//!         thread::park();
//!     }
//!     park::interrupted()
//! });
//! rx.recv().unwrap().interrupt();
//! assert!(handle.join().unwrap());
//! ```

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed, Ordering::SeqCst};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::cfg::thread::{self, Thread};

#[cfg(not(all(loom, test)))]
use std::thread_local;

#[cfg(all(loom, test))]
use loom::thread_local;

/// Source of thread tokens, zero is reserved for "no thread".
static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

struct ThreadSlot {
    token: NonZeroUsize,
    interrupted: Arc<AtomicBool>,
}

impl ThreadSlot {
    fn new() -> Self {
        let token = NEXT_TOKEN.fetch_add(1, Relaxed);
        // Token exhaustion would take more thread spawns than a process can
        // perform, but do not hand out zero if it ever wraps.
        let token = NonZeroUsize::new(token).unwrap_or(NonZeroUsize::MIN);
        Self { token, interrupted: Arc::new(AtomicBool::new(false)) }
    }
}

thread_local! {
    static SLOT: ThreadSlot = ThreadSlot::new();
}

/// Returns the crate-local token of the calling thread.
///
/// Tokens are never zero, which lets ownership be tracked in a single
/// atomic word where zero means "unowned".
pub(crate) fn current_token() -> usize {
    SLOT.with(|slot| slot.token.get())
}

/// A handle able to interrupt the thread it was captured on.
#[derive(Clone)]
pub struct Interrupter {
    thread: Thread,
    flag: Arc<AtomicBool>,
}

impl Interrupter {
    /// Captures an interrupter for the calling thread.
    #[must_use]
    pub fn current() -> Self {
        let flag = SLOT.with(|slot| Arc::clone(&slot.interrupted));
        Self { thread: thread::current(), flag }
    }

    /// Sets the target thread's interrupt status and wakes it if parked.
    pub fn interrupt(&self) {
        self.flag.store(true, SeqCst);
        self.thread.unpark();
    }

    /// Returns whether the target thread's interrupt status is set, without
    /// clearing it.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(SeqCst)
    }

    /// Returns the thread this handle interrupts.
    #[must_use]
    pub fn thread(&self) -> &Thread {
        &self.thread
    }
}

impl core::fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Interrupter").field("interrupted", &self.is_interrupted()).finish()
    }
}

/// Tests and clears the calling thread's interrupt status.
pub fn interrupted() -> bool {
    SLOT.with(|slot| slot.interrupted.swap(false, SeqCst))
}

/// Returns the calling thread's interrupt status without clearing it.
#[must_use]
pub fn is_interrupted() -> bool {
    SLOT.with(|slot| slot.interrupted.load(SeqCst))
}

/// Re-asserts the calling thread's interrupt status.
pub(crate) fn self_interrupt() {
    SLOT.with(|slot| slot.interrupted.store(true, SeqCst));
}

/// Blocks until unparked, interrupted, or spuriously woken.
///
/// Returns immediately while the interrupt status is set.
pub(crate) fn park() {
    if !is_interrupted() {
        thread::park();
    }
}

/// Blocks for at most `timeout`.
pub(crate) fn park_timeout(timeout: Duration) {
    if !is_interrupted() {
        thread::park_timeout(timeout);
    }
}

/// Wakes `thread`, or arms its permit if it is not parked yet.
#[inline]
pub(crate) fn unpark(thread: &Thread) {
    thread.unpark();
}

/// A point in time at which a timed wait gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deadline {
    /// Relative timeouts, measured on the monotonic clock.
    Monotonic(Instant),
    /// Absolute deadlines, measured on the wall clock.
    Wall(SystemTime),
}

impl Deadline {
    /// Builds a monotonic deadline `timeout` from now. Returns `None` if the
    /// deadline is not representable, which callers treat as "no deadline".
    pub(crate) fn after(timeout: Duration) -> Option<Self> {
        Instant::now().checked_add(timeout).map(Self::Monotonic)
    }

    /// Time left before the deadline, zero once it has passed.
    pub(crate) fn remaining(&self) -> Duration {
        match self {
            Self::Monotonic(at) => at.saturating_duration_since(Instant::now()),
            Self::Wall(at) => at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO),
        }
    }

    /// Parks until the deadline, an unpark, or a spurious wakeup.
    pub(crate) fn park(&self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            park_timeout(remaining);
        }
    }
}

/// How a waiting thread treats interrupts and time.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Wait {
    /// Interrupts are recorded and re-asserted once the wait is over.
    Uninterruptible,
    /// Interrupts abort the wait.
    Interruptible,
    /// Interrupts abort the wait, and so does the deadline passing.
    Until(Deadline),
}

impl Wait {
    /// Converts a relative timeout, falling back to an untimed wait when the
    /// deadline cannot be represented.
    pub(crate) fn timeout(timeout: Duration) -> Self {
        Deadline::after(timeout).map_or(Self::Interruptible, Self::Until)
    }

    pub(crate) fn is_interruptible(self) -> bool {
        !matches!(self, Self::Uninterruptible)
    }

    /// Returns `true` once the deadline of a timed wait has passed.
    pub(crate) fn expired(self) -> bool {
        matches!(self, Self::Until(deadline) if deadline.remaining().is_zero())
    }

    /// Parks once, bounded by the deadline if there is one.
    pub(crate) fn park(self) {
        match self {
            Self::Until(deadline) => deadline.park(),
            Self::Uninterruptible | Self::Interruptible => park(),
        }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::mpsc::channel;
    use std::thread;
    use std::time::{Duration, SystemTime};

    use super::{current_token, interrupted, is_interrupted, self_interrupt, Deadline, Interrupter, Wait};

    #[test]
    fn tokens_are_distinct_and_non_zero() {
        let here = current_token();
        let there = thread::spawn(current_token).join().unwrap();
        assert_ne!(here, 0);
        assert_ne!(there, 0);
        assert_ne!(here, there);
        assert_eq!(here, current_token());
    }

    #[test]
    fn interrupted_clears_status() {
        assert!(!interrupted());
        self_interrupt();
        assert!(is_interrupted());
        assert!(interrupted());
        assert!(!is_interrupted());
    }

    #[test]
    fn interrupter_wakes_parked_thread() {
        let (tx, rx) = channel();
        let handle = thread::spawn(move || {
            tx.send(Interrupter::current()).unwrap();
            while !is_interrupted() {
                super::park();
            }
            interrupted()
        });
        let interrupter = rx.recv().unwrap();
        interrupter.interrupt();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn park_returns_while_interrupted() {
        self_interrupt();
        super::park();
        super::park_timeout(Duration::from_secs(60));
        assert!(interrupted());
    }

    #[test]
    fn deadlines_expire() {
        let past = Deadline::Wall(SystemTime::now() - Duration::from_secs(1));
        assert_eq!(past.remaining(), Duration::ZERO);
        let soon = Deadline::after(Duration::from_millis(5)).unwrap();
        assert!(soon.remaining() <= Duration::from_millis(5));
        while !soon.remaining().is_zero() {
            soon.park();
        }
        assert!(Deadline::after(Duration::MAX).is_none());
    }

    #[test]
    fn waits_classify_interrupts_and_expiry() {
        assert!(!Wait::Uninterruptible.is_interruptible());
        assert!(Wait::Interruptible.is_interruptible());
        assert!(matches!(Wait::timeout(Duration::MAX), Wait::Interruptible));
        let expired = Wait::Until(Deadline::Wall(SystemTime::UNIX_EPOCH));
        assert!(expired.is_interruptible());
        assert!(expired.expired());
        expired.park();
        assert!(!Wait::timeout(Duration::from_secs(60)).expired());
    }
}
