//! Spin tuning for the stamped lock's wait queue.

use std::sync::OnceLock;

/// Spin budgets used before a waiter parks.
///
/// Spinning only pays off when the thread holding the lock can make
/// progress on another processor, so every budget is zero on a
/// uniprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinConfig {
    /// Iterations spent while enqueuing, before the waiter is linked in.
    pub spins: u32,
    /// Initial budget once the waiter is first in line.
    pub head_spins: u32,
    /// Cap for the head budget, which doubles each time the waiter is
    /// first in line and still fails to acquire.
    pub max_head_spins: u32,
}

impl Default for SpinConfig {
    fn default() -> Self {
        if processors() > 1 {
            Self::multiprocessor()
        } else {
            Self::uniprocessor()
        }
    }
}

impl SpinConfig {
    /// Budgets for machines where the lock holder may run concurrently.
    #[must_use]
    pub const fn multiprocessor() -> Self {
        Self { spins: 1 << 6, head_spins: 1 << 10, max_head_spins: 1 << 16 }
    }

    /// No spinning at all, waiters park as soon as they are queued.
    #[must_use]
    pub const fn uniprocessor() -> Self {
        Self { spins: 0, head_spins: 0, max_head_spins: 0 }
    }
}

/// Number of processors available to this process, detected once.
fn processors() -> usize {
    static PROCESSORS: OnceLock<usize> = OnceLock::new();
    *PROCESSORS.get_or_init(|| std::thread::available_parallelism().map_or(1, usize::from))
}

#[cfg(all(not(loom), test))]
mod test {
    use super::SpinConfig;

    #[test]
    fn default_matches_processor_count() {
        let config = SpinConfig::default();
        if super::processors() > 1 {
            assert_eq!(config, SpinConfig::multiprocessor());
        } else {
            assert_eq!(config, SpinConfig::uniprocessor());
        }
        assert!(config.head_spins <= config.max_head_spins);
    }
}
