// Modified version of relax.rs from spin-rs to support Loom yielding,
// exponential backoff and the spin-then-park budgets used by the queues.
//
// Original file at its most recent change (at the time of writing):
// https://github.com/mvdnes/spin-rs/blob/5860ee114094cf200b97348ff332155fbd7159b4/src/relax.rs
//
// Copyright (c) 2014 Mathijs van de Nes
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Strategies that determine the behaviour of waiters while they spin.
//!
//! Waiters in this crate never spin forever: they spin for a bounded budget
//! and then park. The [`Relax`] policy decides what a single spin iteration
//! does, the budgets themselves are internal state machines driven by
//! [`SpinConfig`].
//!
//! [`SpinConfig`]: crate::config::SpinConfig

use crate::cfg::{hint, thread};

/// A trait implemented by spinning relax strategies.
///
/// # Example
///
/// ```
/// use queued_sync::relax::Relax;
///
/// struct Spin;
///
/// impl Relax for Spin {
///     #[inline(always)]
///     fn new() -> Self {
///         Self
///     }
///
///     #[inline(always)]
///     fn relax(&mut self) {
///         core::hint::spin_loop();
///     }
/// }
/// ```
pub trait Relax {
    /// Returns the initial value for this relaxing strategy.
    fn new() -> Self;

    /// Performs the relaxing operation during a period of contention.
    fn relax(&mut self);
}

/// A strategy that rapidly spins while informing the CPU that it should power
/// down non-essential components via [`core::hint::spin_loop`].
///
/// Spinning waiters in this crate are always bounded, they park once their
/// budget runs out, so this is the default strategy.
pub struct Spin;

impl Relax for Spin {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {
        hint::spin_loop();
    }
}

/// A strategy that yields the current time slice to the scheduler in favour of
/// other threads or processes.
///
/// Useful on oversubscribed machines, where the thread a spinner waits on may
/// not be running at all.
pub struct Yield;

impl Relax for Yield {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {
        thread::yield_now();
    }
}

/// A strategy that rapidly spins, without telling the CPU to do any powering down.
///
/// You almost certainly do not want to use this. Use [`Spin`] instead. It exists
/// for completeness and for targets that, for some reason, miscompile or do not
/// support spin hint intrinsics despite attempting to generate code for them
/// (i.e: this is a workaround for possible compiler bugs).
pub struct Loop;

impl Relax for Loop {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {}
}

// Exponential backoff is based on the crossbeam-utils implementation.
// link to most recent change (as the time of writing):
// https://github.com/crossbeam-rs/crossbeam/blob/371de8c2d304db07662450995848f3dc9598ac99/crossbeam-utils/src/backoff.rs
//
// Copyright (c) 2019 The Crossbeam Project Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

/// An unsigned integer type use as the inner type for [`Backoff`].
type Uint = u32;

/// A strategy that, as [`Spin`], will run a busy-wait spin-loop, except this
/// implementation will perform exponential backoff.
pub struct SpinBackoff {
    inner: Backoff<{ Self::MAX }>,
}

impl SpinBackoff {
    /// The largest value the inner backoff counter can reach.
    const MAX: Uint = 6;
}

// The maximum inner value **must** be smaller than Uint::BITS, or else the
// bitshift operation will overflow, which is incorrect behavior.
const _: () = assert!(SpinBackoff::MAX < Uint::BITS);

impl Relax for SpinBackoff {
    #[inline(always)]
    fn new() -> Self {
        Self { inner: Backoff::default() }
    }

    #[inline(always)]
    fn relax(&mut self) {
        self.inner.spin();
        self.inner.step();
    }
}

/// Inner backoff counter that keeps track of the number of shifts applied.
#[derive(Default)]
struct Backoff<const MAX: Uint>(Uint);

impl<const MAX: Uint> Backoff<MAX> {
    /// Runs a bounded spin loop `1 << self.0` times, up to `1 << MAX` times.
    fn spin(&self) {
        for _ in 0..1 << self.0.min(MAX) {
            hint::spin_loop();
        }
    }

    /// Incremets one to the inner counter, saturating the counter at `MAX`.
    fn step(&mut self) {
        (self.0 < MAX).then(|| self.0 += 1);
    }
}

/// Spin budget of a waiter that has not reached the head of a queue yet.
///
/// A waiter starts `Fresh`, gets armed with a budget once it observes
/// contention worth spinning on, counts it down, and must then enqueue or
/// park.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Countdown {
    /// No budget assigned yet.
    Fresh,
    /// Iterations left before giving up.
    Spinning(u32),
    /// The budget ran out, or was never granted.
    Exhausted,
}

impl Countdown {
    /// Arms a fresh countdown with `budget` iterations.
    pub(crate) fn arm(budget: u32) -> Self {
        if budget == 0 {
            Self::Exhausted
        } else {
            Self::Spinning(budget)
        }
    }

    /// Consumes one iteration, running `relax` for it. Returns `false` once
    /// the budget is gone.
    pub(crate) fn tick<R: Relax>(&mut self, relax: &mut R) -> bool {
        match *self {
            Self::Spinning(n) => {
                relax.relax();
                *self = if n > 1 { Self::Spinning(n - 1) } else { Self::Exhausted };
                true
            }
            Self::Fresh | Self::Exhausted => false,
        }
    }
}

/// Escalating spin budget for a waiter sitting right behind the queue head.
///
/// Each time the waiter finds itself first in line it gets a larger budget
/// than the previous time, doubling from `initial` up to `max`, before it
/// falls back to parking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeadSpin {
    budget: Option<u32>,
    initial: u32,
    max: u32,
}

impl HeadSpin {
    pub(crate) const fn new(initial: u32, max: u32) -> Self {
        Self { budget: None, initial, max }
    }

    /// Returns the budget for the next round at the head of the queue.
    pub(crate) fn escalate(&mut self) -> u32 {
        let next = match self.budget {
            None => self.initial,
            Some(spins) if spins < self.max => spins.saturating_mul(2).min(self.max),
            Some(spins) => spins,
        };
        self.budget = Some(next);
        next
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{Countdown, HeadSpin, Relax, Uint};

    fn returns<R: Relax, const MAX: Uint>() {
        let mut relax = R::new();
        for _ in 0..=MAX.saturating_mul(10) {
            relax.relax();
        }
    }

    #[test]
    fn spins() {
        returns::<super::Spin, 10>();
    }

    #[test]
    fn spins_backoff() {
        use super::SpinBackoff;
        const MAX: Uint = SpinBackoff::MAX;
        returns::<SpinBackoff, MAX>();
    }

    #[test]
    fn yields() {
        returns::<super::Yield, 10>();
    }

    #[test]
    fn loops() {
        returns::<super::Loop, 10>();
    }

    #[test]
    fn countdown_runs_out() {
        let mut relax = super::Loop;
        let mut countdown = Countdown::arm(3);
        assert!(countdown.tick(&mut relax));
        assert!(countdown.tick(&mut relax));
        assert!(countdown.tick(&mut relax));
        assert_eq!(countdown, Countdown::Exhausted);
        assert!(!countdown.tick(&mut relax));
        assert_eq!(Countdown::arm(0), Countdown::Exhausted);
        assert!(!Countdown::Fresh.tick(&mut relax));
    }

    #[test]
    fn head_spin_escalates_to_cap() {
        let mut head = HeadSpin::new(4, 16);
        assert_eq!(head.escalate(), 4);
        assert_eq!(head.escalate(), 8);
        assert_eq!(head.escalate(), 16);
        assert_eq!(head.escalate(), 16);

        let mut none = HeadSpin::new(0, 0);
        assert_eq!(none.escalate(), 0);
        assert_eq!(none.escalate(), 0);
    }
}
