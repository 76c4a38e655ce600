//! Error type shared by the queued synchronizer, its lock types and the
//! stamped lock.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = SyncError> = core::result::Result<T, E>;

/// Failures surfaced by synchronizer operations.
///
/// Contention is never reported here, failed compare-and-swap attempts are
/// always retried internally. Timeouts are not errors either: timed
/// operations report them through their `Ok` value.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncError {
    /// The calling thread does not hold the lock it tried to release, or it
    /// used a condition without holding the associated lock exclusively.
    #[error("current thread does not hold the lock")]
    IllegalMonitorState,

    /// A stamp did not match the current state of a stamped lock.
    #[error("stamp does not match the lock state")]
    InvalidStamp,

    /// The lock type does not implement the requested mode.
    #[error("operation not supported by this synchronizer")]
    Unsupported,

    /// The thread was interrupted while waiting.
    #[error("thread was interrupted while waiting")]
    Interrupted,
}

impl SyncError {
    /// Returns `true` for errors caused by misuse of a lock, as opposed to
    /// unsupported modes or interruption.
    #[must_use]
    pub const fn is_usage_violation(self) -> bool {
        matches!(self, Self::IllegalMonitorState | Self::InvalidStamp)
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::SyncError;

    #[test]
    fn usage_violations() {
        assert!(SyncError::IllegalMonitorState.is_usage_violation());
        assert!(SyncError::InvalidStamp.is_usage_violation());
        assert!(!SyncError::Unsupported.is_usage_violation());
        assert!(!SyncError::Interrupted.is_usage_violation());
    }

    #[test]
    fn display() {
        let msg = SyncError::Unsupported.to_string();
        assert_eq!(msg, "operation not supported by this synchronizer");
    }
}
