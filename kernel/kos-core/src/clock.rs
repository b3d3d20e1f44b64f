//! Monotonic time and the timeout/periodic-tick timer wheel.
//!
//! A hosted simulation has no hardware counter to read, so [`Clock`] wraps
//! `std::time::Instant` instead but keeps the same "nanoseconds since an
//! arbitrary start point" contract the original HPET-backed facade had.
//! [`TimerWheel`] keeps the same design: a deadline-ordered min-heap of
//! pending callbacks, drained on every tick. It fires plain closures instead
//! of waking an async `Waker`, since this simulation blocks threads on
//! condvars rather than polling futures.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Global monotonic clock for the simulation.
///
/// All components read time through a `Clock` instance rather than calling
/// `Instant::now()` directly, so tests can advance time deterministically
/// (see [`Clock::advance_for_test`]).
pub struct Clock {
    origin: Instant,
    /// Manual offset added to `origin.elapsed()`, used by tests that need to
    /// simulate the passage of time without sleeping the test thread.
    test_offset_nanos: AtomicU64,
}

impl Clock {
    /// Creates a clock whose epoch is "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            test_offset_nanos: AtomicU64::new(0),
        }
    }

    /// Returns nanoseconds elapsed since the clock was created.
    #[must_use]
    pub fn now_nanos(&self) -> u64 {
        let real = self.origin.elapsed().as_nanos() as u64;
        real + self.test_offset_nanos.load(Ordering::Relaxed)
    }

    /// Returns the current instant as an absolute deadline reference point.
    #[must_use]
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Advances the clock's notion of "now" by `delta` without sleeping.
    ///
    /// Used by scheduler fairness tests and permission elevation expiry
    /// tests that simulate a time window shorter than the test would take
    /// to run for real.
    pub fn advance_for_test(&self, delta: Duration) {
        self.test_offset_nanos
            .fetch_add(delta.as_nanos() as u64, Ordering::Relaxed);
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// A pending timeout or periodic callback, ordered by deadline.
struct TimerEntry {
    deadline: Instant,
    id: u64,
    callback: Box<dyn FnOnce() + Send>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse so that `BinaryHeap` (a max-heap) pops the earliest deadline first.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Deadline-ordered timer wheel.
///
/// Used for blocking-syscall deadlines, capability elevation expiry, and any
/// periodic housekeeping (dentry cache GC, load balancing). [`fire_due`] is
/// meant to be polled by a dedicated timer thread at the simulated tick
/// interval (default 1 ms).
pub struct TimerWheel {
    entries: Mutex<BinaryHeap<TimerEntry>>,
    next_id: AtomicU64,
}

impl TimerWheel {
    /// Creates an empty timer wheel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BinaryHeap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Schedules `callback` to run at or after `deadline`. Returns a handle
    /// that can be used to cancel it via [`cancel`](TimerWheel::cancel).
    pub fn schedule_at(&self, deadline: Instant, callback: impl FnOnce() + Send + 'static) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(TimerEntry {
            deadline,
            id,
            callback: Box::new(callback),
        });
        id
    }

    /// Schedules `callback` to run after `delay` elapses.
    pub fn schedule_after(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> u64 {
        self.schedule_at(Instant::now() + delay, callback)
    }

    /// Cancels a previously scheduled callback by id, if it has not fired yet.
    ///
    /// Returns `true` if an entry was removed.
    pub fn cancel(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let remaining: BinaryHeap<TimerEntry> = entries.drain().filter(|e| e.id != id).collect();
        *entries = remaining;
        entries.len() != before
    }

    /// Fires every callback whose deadline has passed, relative to `now`.
    ///
    /// Returns the number of callbacks fired. Intended to be called
    /// periodically by the timer thread; also callable directly by tests
    /// after [`Clock::advance_for_test`].
    pub fn fire_due(&self, now: Instant) -> usize {
        let mut fired = Vec::new();
        {
            let mut entries = self.entries.lock();
            while let Some(top) = entries.peek() {
                if top.deadline <= now {
                    fired.push(entries.pop().unwrap());
                } else {
                    break;
                }
            }
        }
        let count = fired.len();
        for entry in fired {
            (entry.callback)();
        }
        count
    }

    /// Returns the number of entries still pending.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn clock_advances_monotonically() {
        let clock = Clock::new();
        let a = clock.now_nanos();
        std::thread::sleep(Duration::from_millis(1));
        let b = clock.now_nanos();
        assert!(b > a);
    }

    #[test]
    fn clock_test_offset_is_additive() {
        let clock = Clock::new();
        let a = clock.now_nanos();
        clock.advance_for_test(Duration::from_secs(10));
        let b = clock.now_nanos();
        assert!(b - a >= Duration::from_secs(10).as_nanos() as u64);
    }

    #[test]
    fn timer_fires_in_deadline_order() {
        let wheel = TimerWheel::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let base = Instant::now();

        let o1 = order.clone();
        wheel.schedule_at(base + Duration::from_millis(30), move || o1.lock().push(3));
        let o2 = order.clone();
        wheel.schedule_at(base + Duration::from_millis(10), move || o2.lock().push(1));
        let o3 = order.clone();
        wheel.schedule_at(base + Duration::from_millis(20), move || o3.lock().push(2));

        let fired = wheel.fire_due(base + Duration::from_millis(100));
        assert_eq!(fired, 3);
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn timer_only_fires_due_entries() {
        let wheel = TimerWheel::new();
        let base = Instant::now();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        wheel.schedule_at(base + Duration::from_secs(60), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(wheel.fire_due(base), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(wheel.pending(), 1);
    }

    #[test]
    fn cancel_removes_pending_entry() {
        let wheel = TimerWheel::new();
        let id = wheel.schedule_after(Duration::from_secs(5), || {});
        assert_eq!(wheel.pending(), 1);
        assert!(wheel.cancel(id));
        assert_eq!(wheel.pending(), 0);
        assert!(!wheel.cancel(id));
    }
}
