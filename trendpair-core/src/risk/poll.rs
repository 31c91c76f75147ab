//! Timed retry with a monotonic deadline.
//!
//! `poll_until` knows nothing about async runtimes: it calls a predicate,
//! sleeps through a `Clock`, and gives up once the deadline passes. Tests use
//! `ManualClock`, whose sleeps advance virtual time instantly.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonic time source plus the ability to wait on it.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Real clock: `Instant::now` and `thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock. `sleep` returns immediately after advancing time and
/// recording the requested duration.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    now: Mutex<Instant>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        let start = Instant::now();
        Self {
            start,
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.now.lock().unwrap() += duration;
    }

    /// Virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        *self.now.lock().unwrap() - self.start
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

/// Call `check` until it returns `Ok(true)` or `timeout` elapses.
///
/// The first check happens immediately. Between checks the caller sleeps
/// `interval` (shortened only to land on the deadline), so checks are never
/// closer together than `interval`. Returns `Ok(false)` at the deadline;
/// errors from `check` are returned as-is.
pub fn poll_until<C, F, E>(
    clock: &C,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<bool, E>
where
    C: Clock + ?Sized,
    F: FnMut() -> Result<bool, E>,
{
    let deadline = clock.now() + timeout;
    loop {
        if check()? {
            return Ok(true);
        }
        let remaining = deadline.saturating_duration_since(clock.now());
        if remaining.is_zero() {
            return Ok(false);
        }
        clock.sleep(interval.min(remaining));
        if clock.now() >= deadline {
            return Ok(false);
        }
    }
}
