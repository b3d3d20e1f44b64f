//! `kos-kernel`: the top-level crate that wires every other KOS crate into
//! one running simulated machine, per spec.md §2's layering rule that only
//! this crate may depend on the scheduler, memory, filesystem, capability,
//! and IPC crates all at once.
//!
//! [`core::Core`] is the single entry point; everything else in this crate
//! (the process table, file descriptor table, signal set, boot config, and
//! on-disk persistence helpers) is state `Core` owns or a type its syscall
//! surface passes through.

pub mod config;
pub mod core;
pub mod fd;
pub mod pcb;
pub mod persistence;
pub mod signal;

pub use crate::core::Core;
pub use config::CoreConfig;
pub use fd::{FdTable, OpenFile, OpenFlags, Whence};
pub use pcb::{Pcb, PcbMutable, ProcState, ProcessTable};
pub use signal::{DefaultAction, Signal, SignalSet};
