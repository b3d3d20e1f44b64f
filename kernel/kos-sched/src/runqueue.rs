//! Per-CPU runqueue: one FIFO per RT priority, a vruntime-ordered CFS tree,
//! a batch FIFO, and the implicit idle class, per spec.md §4.7.
//!
//! Shaped after the teacher's `ReadyQueues` (`crates/core/hadron-core/src/
//! sched.rs`): one queue per class, strict-priority `pop`, and a
//! `steal_one` used by load balancing that refuses to take a victim's last
//! runnable task so two CPUs can't bounce a lone task back and forth
//! forever.

use std::collections::{BTreeMap, HashMap, VecDeque};

use kos_core::id::Pid;

use crate::class::SchedClass;
use crate::entity::SchedPolicy;

/// A single CPU's ready tasks, ordered within each class per spec.md §4.7.
#[derive(Default)]
pub struct RunQueue {
    /// `priority -> FIFO of pids`, highest priority key served first.
    rt_fifo: BTreeMap<u8, VecDeque<Pid>>,
    rt_rr: BTreeMap<u8, VecDeque<Pid>>,
    /// `(vruntime, pid) -> ()`, lowest vruntime served first. Keying on pid
    /// as a tiebreaker keeps the set a true `BTreeMap` key even when two
    /// tasks share a vruntime.
    cfs: BTreeMap<(u64, Pid), ()>,
    batch: VecDeque<Pid>,
    /// Sum of CFS entity weights currently enqueued, used for time-slice
    /// math; the caller supplies per-entity weight since `RunQueue` itself
    /// doesn't own `SchedEntity` state.
    cfs_weight_sum: u64,
    /// Per-pid weight for every entry currently in `cfs`, so `pop`/`steal_one`
    /// can unwind `cfs_weight_sum` without the caller re-supplying the
    /// weight of whichever pid happened to be lowest-vruntime.
    cfs_weights: HashMap<Pid, u32>,
}

impl RunQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `pid` under the class/priority implied by `policy`.
    pub fn push(&mut self, policy: SchedPolicy, pid: Pid, vruntime: u64, weight: u32) {
        match policy {
            SchedPolicy::RtFifo { priority } => self.rt_fifo.entry(priority).or_default().push_back(pid),
            SchedPolicy::RtRr { priority } => self.rt_rr.entry(priority).or_default().push_back(pid),
            SchedPolicy::Cfs { .. } => {
                self.cfs.insert((vruntime, pid), ());
                self.cfs_weights.insert(pid, weight);
                self.cfs_weight_sum += u64::from(weight);
            }
            SchedPolicy::Batch { .. } => self.batch.push_back(pid),
            SchedPolicy::Idle => {}
        }
    }

    /// Removes `pid` from wherever it is queued, e.g. when it blocks. No-op
    /// if not present (e.g. already running).
    pub fn remove(&mut self, pid: Pid, vruntime_hint: Option<u64>, weight: u32) {
        for queue in self.rt_fifo.values_mut().chain(self.rt_rr.values_mut()) {
            queue.retain(|&p| p != pid);
        }
        if let Some(vr) = vruntime_hint {
            if self.cfs.remove(&(vr, pid)).is_some() {
                self.cfs_weights.remove(&pid);
                self.cfs_weight_sum = self.cfs_weight_sum.saturating_sub(u64::from(weight));
            }
        } else {
            let key = self.cfs.keys().find(|(_, p)| *p == pid).copied();
            if let Some(k) = key {
                self.cfs.remove(&k);
                self.cfs_weights.remove(&pid);
                self.cfs_weight_sum = self.cfs_weight_sum.saturating_sub(u64::from(weight));
            }
        }
        self.batch.retain(|&p| p != pid);
    }

    /// Picks the next task to run, in strict class priority order: RT-FIFO
    /// (highest numeric priority first), RT-RR, CFS (lowest vruntime
    /// first), Batch, then `None` (the caller runs its idle class).
    pub fn pop(&mut self) -> Option<(SchedClass, Pid)> {
        if let Some((&priority, queue)) = self.rt_fifo.iter_mut().next_back() {
            if let Some(pid) = queue.pop_front() {
                if queue.is_empty() {
                    self.rt_fifo.remove(&priority);
                }
                return Some((SchedClass::RtFifo, pid));
            }
        }
        if let Some((&priority, queue)) = self.rt_rr.iter_mut().next_back() {
            if let Some(pid) = queue.pop_front() {
                if queue.is_empty() {
                    self.rt_rr.remove(&priority);
                }
                return Some((SchedClass::RtRr, pid));
            }
        }
        if let Some((&(vruntime, pid), ())) = self.cfs.iter().next() {
            self.cfs.remove(&(vruntime, pid));
            self.cfs_weight_sum = self.cfs_weight_sum.saturating_sub(u64::from(
                self.cfs_weights.remove(&pid).unwrap_or(0),
            ));
            return Some((SchedClass::Cfs, pid));
        }
        if let Some(pid) = self.batch.pop_front() {
            return Some((SchedClass::Batch, pid));
        }
        None
    }

    /// `true` if any class has a runnable task.
    #[must_use]
    pub fn has_ready(&self) -> bool {
        !self.rt_fifo.is_empty() || !self.rt_rr.is_empty() || !self.cfs.is_empty() || !self.batch.is_empty()
    }

    /// The lowest vruntime among runnable CFS tasks, used to seed a newly
    /// woken task's vruntime per spec.md §4.7.
    #[must_use]
    pub fn min_cfs_vruntime(&self) -> Option<u64> {
        self.cfs.keys().next().map(|(vr, _)| *vr)
    }

    /// Sum of enqueued CFS task weights, used for time-slice math.
    #[must_use]
    pub fn cfs_weight_sum(&self) -> u64 {
        self.cfs_weight_sum
    }

    /// Total runnable task count across every class, used by load
    /// balancing to find the busiest/least-loaded CPU.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rt_fifo.values().map(VecDeque::len).sum::<usize>()
            + self.rt_rr.values().map(VecDeque::len).sum::<usize>()
            + self.cfs.len()
            + self.batch.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_ready()
    }

    /// Steals one task for load balancing, preferring the least-starved
    /// class (batch, then CFS with the highest vruntime — sending away the
    /// task closest to "done waiting" would hurt the donor's fairness the
    /// least). Never steals RT tasks (real-time affinity is intentional,
    /// not a load-balancing target) and never empties the donor entirely,
    /// mirroring the teacher's one-task rule that prevents two CPUs from
    /// bouncing a lone runnable task back and forth.
    pub fn steal_one(&mut self) -> Option<(SchedClass, Pid, u64, u32)> {
        if self.len() <= 1 {
            return None;
        }
        if let Some(pid) = self.batch.pop_back() {
            return Some((SchedClass::Batch, pid, 0, crate::class::NICE_ZERO_WEIGHT));
        }
        if let Some((&(vruntime, pid), ())) = self.cfs.iter().next_back() {
            self.cfs.remove(&(vruntime, pid));
            let weight = self.cfs_weights.remove(&pid).unwrap_or(0);
            self.cfs_weight_sum = self.cfs_weight_sum.saturating_sub(u64::from(weight));
            return Some((SchedClass::Cfs, pid, vruntime, weight));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: u32) -> Pid {
        Pid::new(n)
    }

    #[test]
    fn rt_fifo_outranks_everything() {
        let mut rq = RunQueue::new();
        rq.push(SchedPolicy::Cfs { nice: 0 }, pid(1), 0, 1024);
        rq.push(SchedPolicy::RtFifo { priority: 10 }, pid(2), 0, 0);
        assert_eq!(rq.pop(), Some((SchedClass::RtFifo, pid(2))));
        assert_eq!(rq.pop(), Some((SchedClass::Cfs, pid(1))));
    }

    #[test]
    fn higher_rt_priority_runs_first() {
        let mut rq = RunQueue::new();
        rq.push(SchedPolicy::RtFifo { priority: 10 }, pid(1), 0, 0);
        rq.push(SchedPolicy::RtFifo { priority: 99 }, pid(2), 0, 0);
        assert_eq!(rq.pop(), Some((SchedClass::RtFifo, pid(2))));
        assert_eq!(rq.pop(), Some((SchedClass::RtFifo, pid(1))));
    }

    #[test]
    fn cfs_picks_lowest_vruntime() {
        let mut rq = RunQueue::new();
        rq.push(SchedPolicy::Cfs { nice: 0 }, pid(1), 500, 1024);
        rq.push(SchedPolicy::Cfs { nice: 0 }, pid(2), 100, 1024);
        assert_eq!(rq.pop(), Some((SchedClass::Cfs, pid(2))));
        assert_eq!(rq.pop(), Some((SchedClass::Cfs, pid(1))));
    }

    #[test]
    fn batch_runs_only_after_cfs_drains() {
        let mut rq = RunQueue::new();
        rq.push(SchedPolicy::Batch { nice: 0 }, pid(1), 0, 1024);
        rq.push(SchedPolicy::Cfs { nice: 0 }, pid(2), 0, 1024);
        assert_eq!(rq.pop(), Some((SchedClass::Cfs, pid(2))));
        assert_eq!(rq.pop(), Some((SchedClass::Batch, pid(1))));
    }

    #[test]
    fn empty_queue_pops_none() {
        let mut rq = RunQueue::new();
        assert_eq!(rq.pop(), None);
        assert!(!rq.has_ready());
    }

    #[test]
    fn remove_drops_a_queued_cfs_task() {
        let mut rq = RunQueue::new();
        rq.push(SchedPolicy::Cfs { nice: 0 }, pid(1), 42, 1024);
        rq.remove(pid(1), Some(42), 1024);
        assert_eq!(rq.pop(), None);
    }

    #[test]
    fn steal_refuses_sole_task() {
        let mut rq = RunQueue::new();
        rq.push(SchedPolicy::Cfs { nice: 0 }, pid(1), 0, 1024);
        assert_eq!(rq.steal_one(), None);
    }

    #[test]
    fn steal_takes_from_multi_task_queue() {
        let mut rq = RunQueue::new();
        rq.push(SchedPolicy::Cfs { nice: 0 }, pid(1), 100, 1024);
        rq.push(SchedPolicy::Cfs { nice: 0 }, pid(2), 900, 1024);
        let stolen = rq.steal_one();
        assert_eq!(stolen.map(|(_, p, _, _)| p), Some(pid(2)));
        assert!(rq.has_ready());
    }

    #[test]
    fn steal_never_takes_rt_tasks() {
        let mut rq = RunQueue::new();
        rq.push(SchedPolicy::RtFifo { priority: 50 }, pid(1), 0, 0);
        rq.push(SchedPolicy::Cfs { nice: 0 }, pid(2), 0, 1024);
        // 2 total runnable but only the CFS one is stealable.
        let stolen = rq.steal_one();
        assert_eq!(stolen.map(|(_, p, _, _)| p), Some(pid(2)));
    }

    #[test]
    fn min_cfs_vruntime_tracks_lowest_entry() {
        let mut rq = RunQueue::new();
        assert_eq!(rq.min_cfs_vruntime(), None);
        rq.push(SchedPolicy::Cfs { nice: 0 }, pid(1), 500, 1024);
        rq.push(SchedPolicy::Cfs { nice: 0 }, pid(2), 100, 1024);
        assert_eq!(rq.min_cfs_vruntime(), Some(100));
    }
}
