//! The permission manager: per-pid capability sets, RBAC roles, elevation
//! with expiry, and the audit ring, per spec.md §4.4.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use kos_core::clock::Clock;
use kos_core::id::Pid;
use parking_lot::RwLock;

use crate::audit::{AuditEvent, AuditKind, AuditRing};
use crate::flags::CapFlags;

/// One process's capability state.
#[derive(Debug, Clone, Copy, Default)]
struct CapState {
    permanent: CapFlags,
    elevated: CapFlags,
    elevated_expiry: Option<Instant>,
}

impl CapState {
    /// The elevated set if still within its expiry, else empty.
    fn active_elevated(&self, now: Instant) -> CapFlags {
        match self.elevated_expiry {
            Some(expiry) if now < expiry => self.elevated,
            _ => CapFlags::empty(),
        }
    }
}

/// Default capacity of the audit ring, sized generously for a scenario run
/// without growing unbounded in a long-lived core.
pub const DEFAULT_AUDIT_CAPACITY: usize = 4096;

/// Owns every process's capability state, the RBAC role table, and the
/// audit ring. One `PermissionManager` instance lives inside each `Core`.
pub struct PermissionManager {
    states: RwLock<HashMap<Pid, CapState>>,
    roles: RwLock<HashMap<String, CapFlags>>,
    audit: AuditRing,
    clock: Clock,
}

impl PermissionManager {
    /// Creates a manager with no processes registered and the default
    /// audit ring capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_audit_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    /// Creates a manager whose audit ring holds at most `capacity` events.
    #[must_use]
    pub fn with_audit_capacity(capacity: usize) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            roles: RwLock::new(HashMap::new()),
            audit: AuditRing::new(capacity),
            clock: Clock::new(),
        }
    }

    /// Registers `pid` with an initial permanent capability set (e.g. at
    /// process spawn). A pid not yet registered is treated as having an
    /// empty set by [`check`](Self::check).
    pub fn register(&self, pid: Pid, permanent: CapFlags) {
        self.states.write().insert(
            pid,
            CapState {
                permanent,
                elevated: CapFlags::empty(),
                elevated_expiry: None,
            },
        );
    }

    /// Removes `pid`'s capability state, called when a zombie is reaped.
    pub fn deregister(&self, pid: Pid) {
        self.states.write().remove(&pid);
    }

    /// Defines (or replaces) an RBAC role's capability set.
    pub fn define_role(&self, role: impl Into<String>, flags: CapFlags) {
        self.roles.write().insert(role.into(), flags);
    }

    /// Returns `true` iff `pid` holds `flag`: either via `ROOT`, the
    /// permanent set, or a still-unexpired elevation.
    #[must_use]
    pub fn check(&self, pid: Pid, flag: CapFlags) -> bool {
        self.check_at(pid, flag, Instant::now())
    }

    /// Like [`check`](Self::check) but evaluated against an explicit
    /// `now`, so scheduler-fairness-style tests can advance time without
    /// sleeping.
    #[must_use]
    pub fn check_at(&self, pid: Pid, flag: CapFlags, now: Instant) -> bool {
        let states = self.states.read();
        let Some(state) = states.get(&pid) else {
            return false;
        };
        if state.permanent.contains(CapFlags::ROOT) {
            return true;
        }
        let active = state.permanent | state.active_elevated(now);
        active.contains(flag)
    }

    /// Grants `target` an elevated set of `flags` for `duration`, provided
    /// `requester` holds `ROOT` or `SYSTEM`. Logs `ElevateSuccess` or
    /// `ElevateDenied`.
    ///
    /// # Errors
    ///
    /// Returns `false` (and logs a denial) if `requester` lacks the
    /// required capability; the elevation is not applied.
    pub fn elevate(&self, requester: Pid, target: Pid, flags: CapFlags, duration: Duration) -> bool {
        self.elevate_at(requester, target, flags, duration, Instant::now())
    }

    /// Like [`elevate`](Self::elevate) but evaluated against an explicit
    /// `now`.
    pub fn elevate_at(
        &self,
        requester: Pid,
        target: Pid,
        flags: CapFlags,
        duration: Duration,
        now: Instant,
    ) -> bool {
        let authorized =
            self.check_at(requester, CapFlags::ROOT, now) || self.check_at(requester, CapFlags::SYSTEM, now);
        if !authorized {
            self.audit.record(AuditEvent {
                at_nanos: self.clock.now_nanos(),
                kind: AuditKind::ElevateDenied,
                pid: requester,
                target: Some(target),
                flags,
            });
            tracing::warn!(?requester, ?target, ?flags, "elevation denied: requester lacks ROOT/SYSTEM");
            return false;
        }

        let mut states = self.states.write();
        let state = states.entry(target).or_default();
        state.elevated |= flags;
        state.elevated_expiry = Some(now + duration);
        drop(states);

        self.audit.record(AuditEvent {
            at_nanos: self.clock.now_nanos(),
            kind: AuditKind::ElevateSuccess,
            pid: requester,
            target: Some(target),
            flags,
        });
        tracing::info!(?requester, ?target, ?flags, ?duration, "elevation granted");
        true
    }

    /// Drops `flags` from `pid`'s permanent set. A pid may always drop its
    /// own flags; dropping another pid's flags requires `requester` to
    /// hold `ROOT`.
    ///
    /// Returns `false` (and logs a denial) if `requester != pid` and
    /// `requester` lacks `ROOT`.
    pub fn drop_flags(&self, requester: Pid, pid: Pid, flags: CapFlags) -> bool {
        if requester != pid && !self.check(requester, CapFlags::ROOT) {
            self.audit.record(AuditEvent {
                at_nanos: self.clock.now_nanos(),
                kind: AuditKind::DropDenied,
                pid: requester,
                target: Some(pid),
                flags,
            });
            return false;
        }
        if let Some(state) = self.states.write().get_mut(&pid) {
            state.permanent.remove(flags);
            state.elevated.remove(flags);
        }
        self.audit.record(AuditEvent {
            at_nanos: self.clock.now_nanos(),
            kind: AuditKind::DropSuccess,
            pid: requester,
            target: Some(pid),
            flags,
        });
        true
    }

    /// Replaces `pid`'s permanent capability set with the set named by
    /// `role`, provided `requester` holds `ROOT`.
    ///
    /// Returns `false` if `requester` lacks `ROOT` or `role` is undefined.
    pub fn assign_role(&self, requester: Pid, pid: Pid, role: &str) -> bool {
        if !self.check(requester, CapFlags::ROOT) {
            self.audit.record(AuditEvent {
                at_nanos: self.clock.now_nanos(),
                kind: AuditKind::AssignRoleDenied,
                pid: requester,
                target: Some(pid),
                flags: CapFlags::empty(),
            });
            return false;
        }
        let Some(&flags) = self.roles.read().get(role) else {
            return false;
        };
        self.states.write().entry(pid).or_default().permanent = flags;
        self.audit.record(AuditEvent {
            at_nanos: self.clock.now_nanos(),
            kind: AuditKind::AssignRoleSuccess,
            pid: requester,
            target: Some(pid),
            flags,
        });
        true
    }

    /// Revokes any elevation on `pid` whose expiry has passed as of `now`,
    /// logging `ElevationExpired` if one was active. Meant to be driven by
    /// the timer wheel, though [`check`](Self::check) already treats an
    /// expired elevation as inactive even if this is never called.
    pub fn expire_if_due(&self, pid: Pid, now: Instant) {
        let mut states = self.states.write();
        let Some(state) = states.get_mut(&pid) else {
            return;
        };
        let Some(expiry) = state.elevated_expiry else {
            return;
        };
        if now < expiry || state.elevated.is_empty() {
            return;
        }
        let expired_flags = state.elevated;
        state.elevated = CapFlags::empty();
        state.elevated_expiry = None;
        drop(states);
        self.audit.record(AuditEvent {
            at_nanos: self.clock.now_nanos(),
            kind: AuditKind::ElevationExpired,
            pid,
            target: None,
            flags: expired_flags,
        });
    }

    /// Returns a snapshot of the audit ring, oldest first.
    #[must_use]
    pub fn audit_log(&self) -> Vec<AuditEvent> {
        self.audit.snapshot()
    }
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new()
    }
}
