//! The 18-flag capability bitset from spec.md §3/§4.4.

use bitflags::bitflags;

bitflags! {
    /// A process's capability set: the 18 named privilege flags.
    ///
    /// `ROOT` implies every other flag; `PermissionManager::check` special
    /// cases it rather than expanding it into the other bits at grant time,
    /// so `assign_role`/`elevate` always reflect exactly the flags that
    /// were granted when inspected directly (e.g. by an audit reader).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CapFlags: u32 {
        /// Implies every other flag.
        const ROOT    = 1 << 0;
        /// Core system management (boot-time configuration, shutdown).
        const SYSTEM  = 1 << 1;
        /// Ordinary unprivileged user operations.
        const USR     = 1 << 2;
        /// Account/identity management (`IdentityStore` mutations).
        const AM      = 1 << 3;
        /// Network configuration and socket creation.
        const NET     = 1 << 4;
        /// Device file access.
        const DEV     = 1 << 5;
        /// Process control of other processes (signal, kill, priority).
        const PROC    = 1 << 6;
        /// File read bypassing mode bits.
        const FILE_R  = 1 << 7;
        /// File write bypassing mode bits.
        const FILE_W  = 1 << 8;
        /// File execute bypassing mode bits.
        const FILE_X  = 1 << 9;
        /// Direct memory-management operations (mmap beyond own quota).
        const MEM     = 1 << 10;
        /// Log subsystem configuration.
        const LOG     = 1 << 11;
        /// Security policy administration.
        const SEC     = 1 << 12;
        /// Audit log read/administration.
        const AUD     = 1 << 13;
        /// Core configuration changes.
        const CFG     = 1 << 14;
        /// Live update / hot-reload operations.
        const UPD     = 1 << 15;
        /// Service (daemon) registration and control.
        const SRV     = 1 << 16;
        /// Debug/trace attach to another process.
        const DBG     = 1 << 17;
    }
}

impl CapFlags {
    /// All 18 flags, used by `ROOT`'s implicit-grants-everything semantics.
    #[must_use]
    pub fn all_named() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_distinct_bit_from_the_rest() {
        assert!(!(CapFlags::ROOT & CapFlags::NET).contains(CapFlags::NET));
    }

    #[test]
    fn all_named_covers_every_flag() {
        let all = CapFlags::all_named();
        for flag in [
            CapFlags::ROOT,
            CapFlags::SYSTEM,
            CapFlags::USR,
            CapFlags::AM,
            CapFlags::NET,
            CapFlags::DEV,
            CapFlags::PROC,
            CapFlags::FILE_R,
            CapFlags::FILE_W,
            CapFlags::FILE_X,
            CapFlags::MEM,
            CapFlags::LOG,
            CapFlags::SEC,
            CapFlags::AUD,
            CapFlags::CFG,
            CapFlags::UPD,
            CapFlags::SRV,
            CapFlags::DBG,
        ] {
            assert!(all.contains(flag));
        }
    }
}
