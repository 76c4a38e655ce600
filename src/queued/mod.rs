//! A generic queued synchronizer and its condition variables.
//!
//! [`QueuedSynchronizer`] is a framework for blocking locks whose whole
//! state fits in a single atomic `i32`. A lock type supplies a [`Policy`]:
//! a handful of non-blocking hooks that interpret the state word. The
//! synchronizer does everything else: it queues threads whose hooks failed
//! in a lock-free FIFO wait queue, parks them, wakes them in order on
//! release, and unlinks them again when they time out or are interrupted.
//!
//! Both exclusive and shared acquisition are supported. A shared acquire
//! may report that later shared acquires can succeed too, in which case a
//! release cascades down the queue waking consecutive shared waiters.
//!
//! [`Condition`]s layer wait and signal on top of an exclusively held
//! synchronizer, moving waiters from their own list onto the wait queue
//! when signalled.
//!
//! # Example
//!
//! A one-shot latch that lets every waiter through once released:
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use queued_sync::queued::{Policy, QueuedSynchronizer, SyncState};
//! use queued_sync::Result;
//!
//! struct Latch;
//!
//! impl Policy for Latch {
//!     fn try_acquire_shared(&self, sync: &SyncState, _: i32) -> Result<i32> {
//!         Ok(if sync.state() != 0 { 1 } else { -1 })
//!     }
//!
//!     fn try_release_shared(&self, sync: &SyncState, _: i32) -> Result<bool> {
//!         sync.set_state(1);
//!         Ok(true)
//!     }
//! }
//!
//! let latch = Arc::new(QueuedSynchronizer::new(Latch));
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let latch = Arc::clone(&latch);
//!         thread::spawn(move || latch.acquire_shared(1))
//!     })
//!     .collect();
//!
//! latch.release_shared(1).unwrap();
//! for handle in handles {
//!     handle.join().unwrap().unwrap();
//! }
//! ```

mod condition;
mod node;
mod state;
mod sync;

pub use condition::Condition;
pub use state::SyncState;
pub use sync::{Policy, QueuedSynchronizer};
