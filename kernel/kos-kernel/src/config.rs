//! Boot-time configuration for a [`crate::core::Core`], per SPEC_FULL.md's
//! ambient configuration section: a TOML document with CLI-flag overrides
//! layered on top by `kosctl`.

use serde::{Deserialize, Serialize};

use kos_core::error::{KError, KResult};

/// Default simulated physical memory, in 4 KiB frames (64 MiB total).
pub const DEFAULT_MEMORY_FRAMES: usize = 16_384;
/// Default simulated CPU count.
pub const DEFAULT_CPU_COUNT: usize = 4;

/// Everything needed to boot a [`crate::core::Core`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Total page frames in the shared buddy pool. Must be a power of two.
    pub memory_frames: usize,
    /// Number of simulated CPU worker threads.
    pub cpu_count: usize,
    /// Root filesystem driver name, looked up in the `FsDriverRegistry`.
    /// Only `"ramfs"` is wired up by default.
    pub root_fs: String,
    /// `tracing` filter directive passed to the subscriber at boot, e.g.
    /// `"info"` or `"kos_sched=debug,info"`.
    pub log_level: String,
    /// Capacity of the permission manager's audit ring.
    pub audit_capacity: usize,
    /// Path to the shadow (identity store) file, loaded at boot and saved
    /// on `add_user`/`change_password`. `None` keeps the identity store
    /// in-memory only, with no host-filesystem footprint.
    pub identity_store_path: Option<String>,
    /// Path to the append-only audit log file. `None` keeps the audit
    /// trail in the in-memory ring only.
    pub audit_log_path: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            memory_frames: DEFAULT_MEMORY_FRAMES,
            cpu_count: DEFAULT_CPU_COUNT,
            root_fs: "ramfs".to_string(),
            log_level: "info".to_string(),
            audit_capacity: kos_cap::DEFAULT_AUDIT_CAPACITY,
            identity_store_path: None,
            audit_log_path: None,
        }
    }
}

impl CoreConfig {
    /// Parses a `CoreConfig` from a TOML document, falling back to
    /// [`CoreConfig::default`] for any field the document omits.
    ///
    /// # Errors
    /// Returns [`KError::InvalidArgument`] if `text` is not valid TOML or
    /// does not match this shape.
    pub fn from_toml(text: &str) -> KResult<Self> {
        toml::from_str(text).map_err(|_| KError::InvalidArgument)
    }

    /// Serializes this configuration back to TOML, e.g. for `kosctl` to
    /// write out a starter config file.
    ///
    /// # Errors
    /// Returns [`KError::Corrupt`] if serialization somehow fails (it never
    /// should for this struct's field types).
    pub fn to_toml(&self) -> KResult<String> {
        toml::to_string_pretty(self).map_err(|_| KError::Corrupt)
    }
}
