//! Blocking wait queue for thread-based waiters.
//!
//! The original wait queue registered async `Waker`s and resumed tasks by
//! calling `wake()` on them. This simulation runs one OS thread per
//! simulated CPU and blocks threads directly, so [`WaitQueue`] instead parks
//! callers on a `Condvar` and wakes them with `notify_one`/`notify_all`. The
//! FIFO-vs-broadcast API shape (`wake_one`, `wake_all`) is kept the same so
//! callers (pipes, scheduler sleep, capability elevation) port over without
//! a design change.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A queue of threads blocked waiting for an event.
///
/// Each call to [`wait`](WaitQueue::wait) increments a generation counter
/// while parked; [`wake_one`](WaitQueue::wake_one) and
/// [`wake_all`](WaitQueue::wake_all) bump a separate "wake" generation that
/// waiters compare against so that a notification sent before a waiter
/// parks is never missed.
pub struct WaitQueue {
    state: Mutex<u64>,
    condvar: Condvar,
}

impl WaitQueue {
    /// Creates an empty wait queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Blocks the calling thread until this queue is woken at least once
    /// after this call started.
    pub fn wait(&self) {
        let mut guard = self.state.lock().unwrap();
        let generation = *guard;
        while *guard == generation {
            guard = self.condvar.wait(guard).unwrap();
        }
    }

    /// Blocks until woken or `timeout` elapses, whichever comes first.
    ///
    /// Returns `true` if woken, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.state.lock().unwrap();
        let generation = *guard;
        let deadline = Instant::now() + timeout;
        while *guard == generation {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (next_guard, result) = self.condvar.wait_timeout(guard, remaining).unwrap();
            guard = next_guard;
            if result.timed_out() && *guard == generation {
                return false;
            }
        }
        true
    }

    /// Wakes a single waiting thread.
    ///
    /// With a condvar-backed implementation there is no addressable FIFO
    /// order among parked threads, so "one" means "the OS scheduler's
    /// choice of one" rather than strict arrival order; callers that need
    /// strict ordering (e.g. pipe readers) serialize through their own
    /// lock before calling `wait`.
    pub fn wake_one(&self) {
        *self.state.lock().unwrap() += 1;
        self.condvar.notify_one();
    }

    /// Wakes every waiting thread.
    pub fn wake_all(&self) {
        *self.state.lock().unwrap() += 1;
        self.condvar.notify_all();
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
