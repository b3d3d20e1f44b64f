//! Reading and writing the two on-disk artifacts a [`crate::core::Core`]
//! carries across restarts: the identity shadow file and the capability
//! audit log, per spec.md §6 ("unreadable to all except the process owner")
//! and §9's mention of retaining an audit trail.
//!
//! `kos-cap` and `kos-kernel`'s other modules only ever see in-memory
//! `IdentityStore`/`AuditEvent` values; this module is the only place host
//! filesystem paths appear, mirroring how the teacher keeps host I/O out of
//! `hadron-kernel` proper and confined to `hadron-build`/`gluon`-adjacent
//! tooling.

use std::fs;
use std::io;
use std::path::Path;

use kos_cap::{AuditEvent, IdentityStore};
use kos_core::error::{KError, KResult};

/// Loads the shadow file at `path`, returning an empty store if it does not
/// exist yet (a fresh install has no users until `add_user` is called).
///
/// # Errors
/// Returns [`KError::InvalidArgument`] if the file exists but is not
/// well-formed shadow text, or [`KError::Corrupt`] on any other I/O failure.
pub fn load_identity_store(path: &Path) -> KResult<IdentityStore> {
    match fs::read_to_string(path) {
        Ok(text) => IdentityStore::load(&text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(IdentityStore::new()),
        Err(_) => Err(KError::Corrupt),
    }
}

/// Writes `store` to `path`, restricting it to owner-only access on unix
/// platforms once written (spec.md §6's "unreadable to all except the
/// process owner").
///
/// # Errors
/// Returns [`KError::Corrupt`] on any I/O failure.
pub fn save_identity_store(path: &Path, store: &IdentityStore) -> KResult<()> {
    fs::write(path, store.to_text()).map_err(|_| KError::Corrupt)?;
    restrict_to_owner(path)
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> KResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path).map_err(|_| KError::Corrupt)?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms).map_err(|_| KError::Corrupt)
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> KResult<()> {
    Ok(())
}

/// Appends `events` to the audit log at `path` as newline-delimited
/// `{at_nanos} {kind} pid={pid} target={target} flags={flags:#x}` lines, one
/// per event, in the order given. Append-only, matching the audit ring's
/// own "oldest evicted first" semantics: nothing already on disk is ever
/// rewritten.
///
/// # Errors
/// Returns [`KError::Corrupt`] on any I/O failure.
pub fn append_audit_log(path: &Path, events: &[AuditEvent]) -> KResult<()> {
    use std::io::Write;
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path).map_err(|_| KError::Corrupt)?;
    for event in events {
        let target = event.target.map_or_else(|| "-".to_string(), |p| p.as_u32().to_string());
        writeln!(
            file,
            "{} {:?} pid={} target={} flags={:#x}",
            event.at_nanos,
            event.kind,
            event.pid.as_u32(),
            target,
            event.flags.bits()
        )
        .map_err(|_| KError::Corrupt)?;
    }
    Ok(())
}
