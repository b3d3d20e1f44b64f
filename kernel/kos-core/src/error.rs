//! The component-agnostic error taxonomy shared by every KOS component.
//!
//! Every fallible operation in the core returns [`KResult<T>`]. Components
//! never panic on a recoverable condition; `Corrupt` is reserved for an
//! internal invariant violation, which dispatch turns into an audit entry
//! rather than a panic.

use std::fmt;

/// The uniform error kind returned by every syscall-reachable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KError {
    /// Path, pid, fd, or named object absent.
    #[error("not found")]
    NotFound,
    /// Creation with exclusivity against an existing entity.
    #[error("already exists")]
    AlreadyExists,
    /// Capability or mode check failed.
    #[error("permission denied")]
    PermissionDenied,
    /// Malformed input (null path, bad flags, misaligned address).
    #[error("invalid argument")]
    InvalidArgument,
    /// Allocator exhausted.
    #[error("out of memory")]
    OutOfMemory,
    /// Filesystem quota or device full.
    #[error("no space left")]
    NoSpace,
    /// Non-blocking op with no progress available.
    #[error("would block")]
    WouldBlock,
    /// Blocking op cancelled by signal.
    #[error("interrupted")]
    Interrupted,
    /// Blocking op exceeded its deadline.
    #[error("timed out")]
    Timeout,
    /// Write to a pipe whose read end is closed.
    #[error("broken pipe")]
    BrokenPipe,
    /// Expected a directory, found something else.
    #[error("not a directory")]
    NotDirectory,
    /// Expected a non-directory, found a directory.
    #[error("is a directory")]
    IsDirectory,
    /// `rmdir` on a non-empty directory.
    #[error("directory not empty")]
    NotEmpty,
    /// Symlink follow limit exceeded.
    #[error("too many levels of symbolic links")]
    SymlinkLoop,
    /// Path component or full path exceeds its bound.
    #[error("name too long")]
    NameTooLong,
    /// Mutation attempted on a read-only mount.
    #[error("read-only file system")]
    ReadOnly,
    /// An internal invariant was found violated. Should not occur externally.
    #[error("internal invariant violated")]
    Corrupt,
    /// Operation invalid for the current object state (e.g. read on a closed fd).
    #[error("bad file descriptor state")]
    BadState,
    /// A hint address could not be honored for a fixed mapping.
    #[error("invalid address")]
    InvalidAddress,
}

/// The result type returned by every core operation.
pub type KResult<T> = Result<T, KError>;

/// A counted observation of how many times each [`KError`] kind has fired.
///
/// The dispatch facade increments this for every syscall that returns an
/// error, so operators can see error rates without scraping logs.
#[derive(Debug, Default)]
pub struct ErrorCounters {
    counts: parking_lot::Mutex<std::collections::HashMap<&'static str, u64>>,
}

impl ErrorCounters {
    /// Creates an empty counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one occurrence of `err`.
    pub fn record(&self, err: KError) {
        let mut counts = self.counts.lock();
        *counts.entry(err.kind_name()).or_insert(0) += 1;
    }

    /// Returns the current count for `err`.
    #[must_use]
    pub fn count(&self, err: KError) -> u64 {
        self.counts
            .lock()
            .get(err.kind_name())
            .copied()
            .unwrap_or(0)
    }
}

impl KError {
    /// A stable, machine-readable name for this error kind, used for
    /// observability counters and audit log entries.
    #[must_use]
    pub fn kind_name(self) -> &'static str {
        match self {
            KError::NotFound => "not_found",
            KError::AlreadyExists => "already_exists",
            KError::PermissionDenied => "permission_denied",
            KError::InvalidArgument => "invalid_argument",
            KError::OutOfMemory => "out_of_memory",
            KError::NoSpace => "no_space",
            KError::WouldBlock => "would_block",
            KError::Interrupted => "interrupted",
            KError::Timeout => "timeout",
            KError::BrokenPipe => "broken_pipe",
            KError::NotDirectory => "not_directory",
            KError::IsDirectory => "is_directory",
            KError::NotEmpty => "not_empty",
            KError::SymlinkLoop => "symlink_loop",
            KError::NameTooLong => "name_too_long",
            KError::ReadOnly => "read_only",
            KError::Corrupt => "corrupt",
            KError::BadState => "bad_state",
            KError::InvalidAddress => "invalid_address",
        }
    }
}

impl fmt::Display for ErrorCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self.counts.lock();
        write!(f, "{counts:?}")
    }
}
