//! Scheduling classes, the CFS nice→weight table, and time-slice math, per
//! spec.md §4.7.
//!
//! The weight table below is the standard Linux `sched_prio_to_weight`
//! table: `weight(0) == 1024`, `weight(19) == 15` (≈1024/68, close enough
//! to the spec's "≈weight(0)/80" to keep the familiar curve rather than
//! inventing a new one), `weight(-20) == 88761` (≈1024×86). Kept as a
//! `const` lookup rather than computed, matching how the teacher's
//! `Priority`-tier tables in `sched.rs` are plain const arrays.

/// A runnable entity's scheduling class, in strict preemption order:
/// `RtFifo` and `RtRr` always preempt `Cfs`, which always preempts
/// `Batch`, which always preempts `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchedClass {
    /// Real-time first-in-first-out: runs until it blocks or yields.
    RtFifo,
    /// Real-time round-robin: preempted after `RT_QUANTUM`.
    RtRr,
    /// Completely Fair Scheduler: ordered by vruntime.
    Cfs,
    /// Deprioritized CFS: larger slices, skipped for preemption decisions.
    Batch,
    /// Runs only when nothing else is runnable.
    Idle,
}

/// Real-time priority range, inclusive, per spec.md §3 ("RT priority
/// (1..99)").
pub const RT_PRIORITY_MIN: u8 = 1;
pub const RT_PRIORITY_MAX: u8 = 99;

/// Nice value range, inclusive, per spec.md §3.
pub const NICE_MIN: i8 = -20;
pub const NICE_MAX: i8 = 19;

/// Time quantum granted to a running `RtRr` task before it is preempted to
/// the back of its priority's queue, in nanoseconds (10 ms).
pub const RT_QUANTUM_NANOS: u64 = 10_000_000;

/// `SCHED_LATENCY`: the target period within which every runnable CFS task
/// gets at least one turn, in nanoseconds (matches Linux's default 24 ms
/// for a non-huge runqueue).
pub const SCHED_LATENCY_NANOS: u64 = 24_000_000;

/// `MIN_GRANULARITY`: the floor under which a CFS time slice is never
/// shrunk further, in nanoseconds (3 ms, matching Linux's default).
pub const MIN_GRANULARITY_NANOS: u64 = 3_000_000;

/// `WAKEUP_GRANULARITY`: how far behind the runqueue's current minimum
/// vruntime a newly woken task is allowed to start, in nanoseconds, per
/// spec.md §4.7's "avoid starvation and runaway catch-up" rule.
pub const WAKEUP_GRANULARITY_NANOS: u64 = 1_000_000;

/// `weight(0) = 1024`, the CFS reference weight.
pub const NICE_ZERO_WEIGHT: u32 = 1024;

/// Linux's standard nice(-20..19) → weight table, indexed by `nice + 20`.
const NICE_TO_WEIGHT: [u32; 40] = [
    88761, 71755, 56483, 46273, 36291, 29154, 23254, 18705, 14949, 11916, // -20..-11
    9548, 7620, 6100, 4904, 3906, 3121, 2501, 1991, 1586, 1277, // -10..-1
    1024, 820, 655, 526, 423, 335, 272, 215, 172, 137, // 0..9
    110, 87, 70, 56, 45, 36, 29, 23, 18, 15, // 10..19
];

/// Looks up a nice value's CFS weight. Panics if `nice` is outside
/// [`NICE_MIN`]..=[`NICE_MAX`]; callers validate the range at the syscall
/// boundary (`InvalidArgument`) before constructing a [`SchedEntity`].
#[must_use]
pub fn weight_for_nice(nice: i8) -> u32 {
    debug_assert!((NICE_MIN..=NICE_MAX).contains(&nice));
    let idx = (nice as i32 + 20).clamp(0, 39) as usize;
    NICE_TO_WEIGHT[idx]
}

/// Computes this task's CFS time slice for the current runqueue: a share
/// of `SCHED_LATENCY_NANOS` proportional to `task_weight / sum_weights`,
/// floored at `MIN_GRANULARITY_NANOS`, per spec.md §4.7.
#[must_use]
pub fn cfs_time_slice(task_weight: u32, sum_weights: u64) -> u64 {
    if sum_weights == 0 {
        return SCHED_LATENCY_NANOS;
    }
    let share = (SCHED_LATENCY_NANOS as u128 * task_weight as u128) / sum_weights as u128;
    (share as u64).max(MIN_GRANULARITY_NANOS)
}

/// Computes the vruntime delta for `delta_nanos` of wall-clock CPU time
/// consumed by a task of the given `weight`: `Δ × weight(0) / weight(task)`,
/// per spec.md §4.7.
#[must_use]
pub fn vruntime_delta(delta_nanos: u64, weight: u32) -> u64 {
    ((delta_nanos as u128 * NICE_ZERO_WEIGHT as u128) / weight.max(1) as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nice_zero_weight_is_reference() {
        assert_eq!(weight_for_nice(0), NICE_ZERO_WEIGHT);
    }

    #[test]
    fn weight_decreases_as_nice_increases() {
        assert!(weight_for_nice(19) < weight_for_nice(0));
        assert!(weight_for_nice(0) < weight_for_nice(-20));
    }

    #[test]
    fn weight_roughly_matches_spec_ratios() {
        // spec.md §4.7: weight(19) ≈ weight(0)/80, weight(-20) ≈ weight(0)×80.
        let ratio_pos = f64::from(NICE_ZERO_WEIGHT) / f64::from(weight_for_nice(19));
        let ratio_neg = f64::from(weight_for_nice(-20)) / f64::from(NICE_ZERO_WEIGHT);
        assert!((60.0..=90.0).contains(&ratio_pos), "ratio_pos = {ratio_pos}");
        assert!((60.0..=90.0).contains(&ratio_neg), "ratio_neg = {ratio_neg}");
    }

    #[test]
    fn vruntime_delta_is_identity_at_nice_zero() {
        assert_eq!(vruntime_delta(1_000_000, NICE_ZERO_WEIGHT), 1_000_000);
    }

    #[test]
    fn vruntime_delta_grows_for_low_priority_tasks() {
        // A nice=19 task's vruntime should grow faster than a nice=0 task's
        // for the same wall-clock delta, so it gets picked less often.
        let nice0 = vruntime_delta(1_000_000, weight_for_nice(0));
        let nice19 = vruntime_delta(1_000_000, weight_for_nice(19));
        assert!(nice19 > nice0);
    }

    #[test]
    fn time_slice_never_below_min_granularity() {
        let slice = cfs_time_slice(1, 1_000_000);
        assert!(slice >= MIN_GRANULARITY_NANOS);
    }

    #[test]
    fn time_slice_scales_with_weight_share() {
        let heavy = cfs_time_slice(2048, 4096);
        let light = cfs_time_slice(1024, 4096);
        assert!(heavy > light);
    }
}
