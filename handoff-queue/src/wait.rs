//! Idle and exit policies for the long-running `drain_with` / `fill_with`
//! loops, plus the contention backoff used by CAS retry loops.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_utils::Backoff;

/// Decides what to do when a drain or fill loop made no progress.
///
/// `idle` receives the number of consecutive idle rounds so far and returns
/// the new count. Any `FnMut(u32) -> u32` is a wait strategy.
pub trait WaitStrategy {
    /// Idles once and returns the updated idle counter.
    fn idle(&mut self, idle_count: u32) -> u32;
}

impl<F: FnMut(u32) -> u32> WaitStrategy for F {
    #[inline]
    fn idle(&mut self, idle_count: u32) -> u32 {
        self(idle_count)
    }
}

/// Tells a drain or fill loop whether to keep going.
pub trait ExitCondition {
    /// Returns `false` once the loop should stop.
    fn keep_running(&self) -> bool;
}

impl<F: Fn() -> bool> ExitCondition for F {
    #[inline]
    fn keep_running(&self) -> bool {
        self()
    }
}

/// Runs while the flag is `true`.
impl ExitCondition for AtomicBool {
    #[inline]
    fn keep_running(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

/// Spins, then yields, using [`crossbeam_utils::Backoff`].
///
/// The backoff restarts whenever the loop reports progress (idle count 0).
#[derive(Default)]
pub struct BackoffWait {
    backoff: Backoff,
}

impl BackoffWait {
    /// Creates a fresh strategy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitStrategy for BackoffWait {
    fn idle(&mut self, idle_count: u32) -> u32 {
        if idle_count == 0 {
            self.backoff.reset();
        }
        self.backoff.snooze();
        idle_count.saturating_add(1)
    }
}

impl fmt::Debug for BackoffWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffWait")
            .field("completed", &self.backoff.is_completed())
            .finish()
    }
}

/// Rounds of exponential spinning before [`Contention`] starts giving up the
/// processor.
const SPIN_ROUNDS: u32 = 7;

/// Backoff for a lost compare-and-swap.
///
/// Spins with exponential hints first. Once spinning stops paying off it
/// alternates a one-nanosecond park with a yield so the winner can finish.
pub(crate) struct Contention {
    backoff: Backoff,
    rounds: u32,
}

impl Contention {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            backoff: Backoff::new(),
            rounds: 0,
        }
    }

    #[cold]
    pub(crate) fn wait(&mut self) {
        if self.rounds < SPIN_ROUNDS {
            self.backoff.spin();
        } else if (self.rounds - SPIN_ROUNDS) % 2 == 0 {
            thread::park_timeout(Duration::from_nanos(1));
        } else {
            thread::yield_now();
        }
        self.rounds = self.rounds.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_strategies() {
        let mut calls = 0;
        let mut wait = |n: u32| {
            calls += 1;
            n + 1
        };
        assert_eq!(WaitStrategy::idle(&mut wait, 0), 1);
        assert_eq!(WaitStrategy::idle(&mut wait, 1), 2);
        assert_eq!(calls, 2);

        let exit = || false;
        assert!(!exit.keep_running());
    }

    #[test]
    fn atomic_flag_exit() {
        let running = AtomicBool::new(true);
        assert!(running.keep_running());
        running.store(false, Ordering::Release);
        assert!(!running.keep_running());
    }

    #[test]
    fn backoff_wait_counts_idle_rounds() {
        let mut wait = BackoffWait::new();
        let mut idle = 0;
        for _ in 0..20 {
            idle = wait.idle(idle);
        }
        assert_eq!(idle, 20);
        assert_eq!(wait.idle(0), 1);
    }

    #[test]
    fn contention_eventually_parks() {
        let mut contention = Contention::new();
        for _ in 0..64 {
            contention.wait();
        }
        assert!(contention.rounds > SPIN_ROUNDS);
    }
}
