//! The scheduling metadata the scheduler tracks for one runnable task,
//! separate from the PCB that owns process-wide state (`kos-kernel` owns
//! that; `kos-sched` only needs enough to make scheduling decisions).

use kos_core::id::{CpuId, Pid};

use crate::class::{weight_for_nice, SchedClass};

/// A bitmask of permitted CPUs, one bit per [`CpuId`]. Mirrors the "cpu
/// affinity mask" field of spec.md §3's PCB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffinityMask(u64);

impl AffinityMask {
    /// A mask permitting every CPU up to 64.
    #[must_use]
    pub const fn all() -> Self {
        Self(u64::MAX)
    }

    /// A mask permitting only `cpu`.
    #[must_use]
    pub fn only(cpu: CpuId) -> Self {
        Self(1u64 << cpu.as_usize().min(63))
    }

    /// Builds a mask from a raw bitset.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// `true` if `cpu` is permitted.
    #[must_use]
    pub fn allows(self, cpu: CpuId) -> bool {
        self.0 & (1u64 << cpu.as_usize().min(63)) != 0
    }

    /// `true` if no CPU is permitted, which spec.md §8 says must fail
    /// `InvalidArgument` at scheduling time.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for AffinityMask {
    fn default() -> Self {
        Self::all()
    }
}

/// The scheduling-relevant parameters a caller provides for `spawn` or
/// `sched_setparam`, per spec.md §3's PCB fields.
#[derive(Debug, Clone, Copy)]
pub enum SchedPolicy {
    /// CFS, parameterized by nice (-20..19).
    Cfs { nice: i8 },
    /// Deprioritized CFS; nice is still honored for weighting among batch
    /// tasks but the class itself is always preempted by `Cfs`.
    Batch { nice: i8 },
    /// Real-time FIFO, priority 1..99.
    RtFifo { priority: u8 },
    /// Real-time round-robin, priority 1..99.
    RtRr { priority: u8 },
    /// Runs only when no other class has a runnable task.
    Idle,
}

impl SchedPolicy {
    #[must_use]
    pub fn class(self) -> SchedClass {
        match self {
            SchedPolicy::RtFifo { .. } => SchedClass::RtFifo,
            SchedPolicy::RtRr { .. } => SchedClass::RtRr,
            SchedPolicy::Cfs { .. } => SchedClass::Cfs,
            SchedPolicy::Batch { .. } => SchedClass::Batch,
            SchedPolicy::Idle => SchedClass::Idle,
        }
    }
}

/// One task's full scheduling state, owned by the [`crate::Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedEntity {
    pub pid: Pid,
    pub policy: SchedPolicy,
    /// Nanoseconds of weighted CPU time consumed so far (CFS/Batch only).
    pub vruntime: u64,
    /// Remaining quantum for the current run (`RtRr` only).
    pub rt_slice_remaining: u64,
    /// Nanoseconds consumed during the current run since the last
    /// `pick_next`/`requeue` boundary (`Cfs`/`Batch` only). Compared
    /// against the proportional time slice each `tick` to decide whether
    /// the running task has exhausted its slice, since a single tick's
    /// `delta_nanos` is ordinarily far smaller than the slice itself.
    pub slice_consumed: u64,
    pub affinity: AffinityMask,
    pub residence: CpuId,
}

impl SchedEntity {
    #[must_use]
    pub fn new(pid: Pid, policy: SchedPolicy, residence: CpuId) -> Self {
        Self {
            pid,
            policy,
            vruntime: 0,
            rt_slice_remaining: crate::class::RT_QUANTUM_NANOS,
            slice_consumed: 0,
            affinity: AffinityMask::all(),
            residence,
        }
    }

    #[must_use]
    pub fn class(&self) -> SchedClass {
        self.policy.class()
    }

    /// CFS weight for this entity's nice value; RT/Idle entities return the
    /// reference weight since it is unused for their class's ordering.
    #[must_use]
    pub fn weight(&self) -> u32 {
        match self.policy {
            SchedPolicy::Cfs { nice } | SchedPolicy::Batch { nice } => weight_for_nice(nice),
            _ => crate::class::NICE_ZERO_WEIGHT,
        }
    }

    /// RT priority, for `RtFifo`/`RtRr` entities only.
    #[must_use]
    pub fn rt_priority(&self) -> Option<u8> {
        match self.policy {
            SchedPolicy::RtFifo { priority } | SchedPolicy::RtRr { priority } => Some(priority),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_only_permits_named_cpu() {
        let mask = AffinityMask::only(CpuId::new(2));
        assert!(mask.allows(CpuId::new(2)));
        assert!(!mask.allows(CpuId::new(0)));
    }

    #[test]
    fn affinity_all_permits_everything_observed_in_tests() {
        let mask = AffinityMask::all();
        for cpu in 0..8 {
            assert!(mask.allows(CpuId::new(cpu)));
        }
    }

    #[test]
    fn empty_affinity_is_detected() {
        let mask = AffinityMask::from_bits(0);
        assert!(mask.is_empty());
    }

    #[test]
    fn entity_class_matches_policy() {
        let e = SchedEntity::new(Pid::new(1), SchedPolicy::RtFifo { priority: 50 }, CpuId::new(0));
        assert_eq!(e.class(), SchedClass::RtFifo);
        assert_eq!(e.rt_priority(), Some(50));
    }
}
