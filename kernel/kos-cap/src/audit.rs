//! Append-only, capped audit ring for permission-manager events.

use std::collections::VecDeque;

use kos_core::id::Pid;
use parking_lot::Mutex;

use crate::flags::CapFlags;

/// The kind of event an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    /// `elevate` granted the requested flags.
    ElevateSuccess,
    /// `elevate` was refused (requester lacked `ROOT`/`SYSTEM`).
    ElevateDenied,
    /// An elevation's expiry passed and the flags were revoked.
    ElevationExpired,
    /// `drop` removed flags.
    DropSuccess,
    /// `drop` was refused (non-`ROOT` requester targeting another pid).
    DropDenied,
    /// `assign_role` replaced a pid's permanent set.
    AssignRoleSuccess,
    /// `assign_role` was refused (requester lacked `ROOT`).
    AssignRoleDenied,
}

/// One append-only audit record.
#[derive(Debug, Clone, Copy)]
pub struct AuditEvent {
    /// Simulation-clock nanoseconds at which the event was recorded.
    pub at_nanos: u64,
    /// What happened.
    pub kind: AuditKind,
    /// The process that requested the action (for `ElevationExpired`, the
    /// process the elevation was granted to).
    pub pid: Pid,
    /// The affected process, when different from `pid` (e.g. `elevate`'s
    /// target, `assign_role`'s target).
    pub target: Option<Pid>,
    /// The flags the event concerned.
    pub flags: CapFlags,
}

/// A fixed-capacity, oldest-evicted ring of [`AuditEvent`]s.
///
/// Appends are serialized behind a single lock, matching spec.md §5's
/// "Permission manager audit ring: single writer-serialized append".
pub struct AuditRing {
    capacity: usize,
    events: Mutex<VecDeque<AuditEvent>>,
}

impl AuditRing {
    /// Creates a ring holding at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Appends `event`, evicting the oldest entry if the ring is full.
    pub fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Returns every currently retained event, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().copied().collect()
    }

    /// Returns the number of events currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns `true` if no events are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(at: u64, kind: AuditKind) -> AuditEvent {
        AuditEvent {
            at_nanos: at,
            kind,
            pid: Pid::new(1),
            target: None,
            flags: CapFlags::NET,
        }
    }

    #[test]
    fn oldest_entry_is_evicted_past_capacity() {
        let ring = AuditRing::new(2);
        ring.record(event(1, AuditKind::ElevateSuccess));
        ring.record(event(2, AuditKind::DropSuccess));
        ring.record(event(3, AuditKind::AssignRoleSuccess));

        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].at_nanos, 2);
        assert_eq!(snapshot[1].at_nanos, 3);
    }

    #[test]
    fn append_only_preserves_order() {
        let ring = AuditRing::new(8);
        for i in 0..5 {
            ring.record(event(i, AuditKind::ElevateSuccess));
        }
        let snapshot = ring.snapshot();
        let timestamps: Vec<u64> = snapshot.iter().map(|e| e.at_nanos).collect();
        assert_eq!(timestamps, vec![0, 1, 2, 3, 4]);
    }
}
