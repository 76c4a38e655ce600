//! Blocking synchronizers built over a single atomic state word and a queue
//! of parked threads.
//!
//! The core of this crate is the [`QueuedSynchronizer`]: a framework that
//! owns a 32-bit state word and a CLH-style FIFO queue of waiting threads,
//! and delegates the meaning of the state to a user supplied [`Policy`].
//! A policy only answers "may this thread acquire or release right now?",
//! the synchronizer does the queueing, parking, timeouts, interruption and
//! the hand off of wake ups to successors. Exclusive and shared acquisition
//! are both supported, and exclusive policies can hand out [`Condition`]s.
//!
//! The [`locks`] module builds the usual locks out of it:
//!
//! - [`locks::Mutex`]: a non-reentrant, data guarding mutual exclusion lock;
//! - [`locks::ReentrantLock`]: an exclusive lock that counts holds per owner;
//! - [`locks::ReentrantRwLock`]: a reentrant readers-writer lock with write
//!   to read downgrading.
//!
//! The reentrant locks come in [`locks::Fair`] and [`locks::NonFair`]
//! flavors.
//!
//! The [`StampedLock`] is a separate capability based lock. Its 64-bit state
//! packs a version with the lock mode, so readers may proceed optimistically
//! and validate afterwards that no writer got in their way.
//!
//! ## Waiting and interruption
//!
//! Rust threads carry no interrupt status, the [`park`] module keeps one per
//! thread and exposes an [`park::Interrupter`] handle to set it. Interruptible
//! acquisitions and condition waits return [`SyncError::Interrupted`] when the
//! thread was interrupted. Uninterruptible ones keep waiting and re-assert the
//! interrupt status once they are done.
//!
//! ## Queue node allocations
//!
//! Queue nodes are heap allocated and reference counted, their links are
//! swapped atomically through [`arc_swap`]. A node may outlive the thread that
//! enqueued it, since cancelled and released nodes are unlinked lazily by
//! whichever thread comes across them.
//!
//! ## Locking with a reentrant lock
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use queued_sync::locks::{Lock, ReentrantLock};
//!
//! let lock: Arc<ReentrantLock> = Arc::default();
//! let c_lock = Arc::clone(&lock);
//!
//! thread::spawn(move || {
//!     c_lock.lock();
//!     c_lock.lock();
//!     assert_eq!(c_lock.hold_count(), 2);
//!     c_lock.unlock().unwrap();
//!     c_lock.unlock().unwrap();
//! })
//! .join().expect("thread::spawn failed");
//!
//! assert!(!lock.is_locked());
//! ```
//!
//! ## Optimistic reads
//!
//! ```
//! use queued_sync::StampedLock;
//!
//! let lock: StampedLock = StampedLock::new();
//! let stamp = lock.try_optimistic_read().unwrap();
//! // Reads happen here, then are checked.
//! assert!(lock.validate(stamp));
//!
//! let write = lock.write_lock();
//! lock.unlock_write(write).unwrap();
//! assert!(!lock.validate(stamp));
//! ```
//!
//! ## Logging
//!
//! Misuse that is reported back as an error, such as releasing a lock that
//! is not held or presenting a stale stamp, is also logged through
//! [`tracing`] at the `debug` level. Cancelled waits are logged at `trace`.
//! Nothing is logged unless a subscriber is installed.

#![allow(clippy::doc_markdown)]
#![allow(clippy::inline_always)]
#![allow(clippy::module_name_repetitions)]
#![warn(missing_docs)]
#![warn(rust_2024_compatibility)]
#![warn(clippy::undocumented_unsafe_blocks)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod error;
pub mod locks;
pub mod park;
pub mod queued;
pub mod relax;
pub mod stamped;

pub(crate) mod cfg;
pub(crate) mod link;

pub use config::SpinConfig;
pub use error::{Result, SyncError};
pub use queued::{Condition, Policy, QueuedSynchronizer, SyncState};
pub use stamped::{Stamp, StampedLock};

#[cfg(test)]
pub(crate) mod test;

#[cfg(all(loom, test))]
#[cfg(not(tarpaulin))]
pub(crate) mod loom;
