//! Bounded retry with linear backoff.
//!
//! Sector reads, writes and the unit-ready probes all tolerate transient device
//! busy conditions the same way: a handful of attempts with a linearly growing
//! delay between them. The loop lives here once, parameterized by the policy and
//! the operation; delays go through the [`Clock`] seam so tests observe them
//! instead of sleeping.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Source of delay for retry backoff.
pub trait Clock {
    fn sleep(&mut self, duration: Duration);
}

/// Clock that really sleeps the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdClock;

impl Clock for StdClock {
    fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Clock that records requested delays instead of sleeping.
///
/// Clones share one record, so a test can keep a handle while the driver owns the
/// boxed original.
#[derive(Clone, Debug, Default)]
pub struct FakeClock {
    sleeps: Rc<RefCell<Vec<Duration>>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Clock for FakeClock {
    fn sleep(&mut self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
    }
}

/// Attempt budget and backoff slope for one operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of attempts; at least one is always made.
    pub attempts: u32,
    /// Delay before retry `n` is `n * backoff_step` (the first retry waits one step,
    /// none before the first attempt).
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff_step: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    /// A single attempt with no waiting, for operations defined as one-shot.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff_step: Duration::ZERO,
        }
    }
}

/// Runs `op` until it succeeds or the policy's attempts are exhausted, returning
/// the final error in the latter case. After the `n`-th failed attempt (counting
/// from zero) the clock waits `n * backoff_step` before the next one.
pub(crate) fn run_with_retry<T, E>(
    policy: RetryPolicy,
    clock: &mut dyn Clock,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut failed = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                failed += 1;
                if failed >= policy.attempts {
                    return Err(err);
                }
                clock.sleep(policy.backoff_step * (failed - 1));
            }
        }
    }
}
