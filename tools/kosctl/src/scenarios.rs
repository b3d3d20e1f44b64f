//! The canned end-to-end scenarios from spec.md §8, run directly against a
//! freshly booted [`kos_kernel::Core`] rather than through any wire
//! protocol — `kosctl demo`/`kosctl run` are a host-side harness, not a
//! client of the request channel.

use std::time::Duration;

use anyhow::{bail, ensure, Result};

use kos_cap::CapFlags;
use kos_core::error::KError;
use kos_core::id::{CpuId, Pid};
use kos_fs::Mode;
use kos_kernel::{Core, CoreConfig, OpenFlags, Whence};
use kos_sched::SchedPolicy;

/// One scenario's name and runner, for `kosctl demo`'s table.
pub struct Scenario {
    pub name: &'static str,
    pub run: fn() -> Result<()>,
}

pub const ALL: &[Scenario] = &[
    Scenario { name: "s1", run: s1_file_round_trip },
    Scenario { name: "s2", run: s2_symlink_loop },
    Scenario { name: "s3", run: s3_fair_scheduling },
    Scenario { name: "s4", run: s4_rt_preemption },
    Scenario { name: "s5", run: s5_pipe_semantics },
    Scenario { name: "s6", run: s6_permission_elevation },
];

pub fn by_name(name: &str) -> Option<&'static Scenario> {
    ALL.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

fn spawn_user(core: &Core, parent: Pid, uid: u32) -> Result<Pid> {
    Ok(core.spawn(parent, uid, uid, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::USR)?)
}

/// **S1 — File round-trip, RamFS**: create, write, seek, read, stat, unlink,
/// and confirm the path is gone.
pub fn s1_file_round_trip() -> Result<()> {
    let core = Core::new(CoreConfig::default())?;
    let root = core.spawn(Pid::KERNEL, 0, 0, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::ROOT)?;
    let pid = spawn_user(&core, root, 1000)?;

    let fd = core.open(pid, "/a.txt", OpenFlags::RDWR | OpenFlags::CREAT, Mode::from_octal(0o644))?;
    ensure!(core.write(pid, fd, b"hello")? == 5, "write must report 5 bytes");
    core.lseek(pid, fd, 0, Whence::Set)?;
    let mut buf = [0u8; 8];
    let n = core.read(pid, fd, &mut buf)?;
    ensure!(&buf[..n] == b"hello", "read must return what was written");

    let stat = core.stat(pid, "/a.txt")?;
    ensure!(stat.size == 5, "stat size must match written length");

    core.unlink(pid, "/a.txt")?;
    match core.open(pid, "/a.txt", OpenFlags::RDONLY, Mode::empty()) {
        Err(KError::NotFound) => Ok(()),
        other => bail!("expected NotFound after unlink, got {other:?}"),
    }
}

/// **S2 — Symlink loop detection**: two symlinks pointing at each other must
/// fail to resolve with `SymlinkLoop`, not recurse forever.
pub fn s2_symlink_loop() -> Result<()> {
    let core = Core::new(CoreConfig::default())?;
    let root = core.spawn(Pid::KERNEL, 0, 0, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::ROOT)?;

    core.symlink(root, "/b", "/a")?;
    core.symlink(root, "/a", "/b")?;
    match core.open(root, "/a", OpenFlags::RDONLY, Mode::empty()) {
        Err(KError::SymlinkLoop) => Ok(()),
        other => bail!("expected SymlinkLoop, got {other:?}"),
    }
}

/// **S3 — Fair scheduling**: two CFS tasks at the same nice level,
/// continuously runnable on one CPU for 1 simulated second, must each get
/// within [0.45s, 0.55s] of CPU time.
pub fn s3_fair_scheduling() -> Result<()> {
    const QUANTUM_NANOS: u64 = 1_000_000;
    const TOTAL_NANOS: u64 = 1_000_000_000;

    let mut config = CoreConfig::default();
    config.cpu_count = 1;
    let core = Core::new(config)?;
    let root = core.spawn(Pid::KERNEL, 0, 0, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::ROOT)?;
    let cpu = CpuId::new(0);
    let a = spawn_user(&core, root, 1000)?;
    let b = spawn_user(&core, root, 1001)?;

    let mut runtime = std::collections::HashMap::new();
    runtime.insert(a, 0u64);
    runtime.insert(b, 0u64);

    let mut elapsed = 0u64;
    let mut current = core.pick_next(cpu);
    while elapsed < TOTAL_NANOS {
        let Some(pid) = current else { break };
        *runtime.get_mut(&pid).unwrap() += QUANTUM_NANOS;
        elapsed += QUANTUM_NANOS;
        let outcome = core.tick(cpu, QUANTUM_NANOS);
        if outcome.reschedule {
            core.requeue(cpu, pid);
            current = core.pick_next(cpu);
        } else {
            current = Some(pid);
        }
    }

    for (pid, ns) in &runtime {
        let fraction = *ns as f64 / TOTAL_NANOS as f64;
        ensure!((0.45..=0.55).contains(&fraction), "pid {} got {:.3} of CPU time, want [0.45, 0.55]", pid, fraction);
    }
    Ok(())
}

/// **S4 — RT preemption**: a runnable RT-FIFO task must be the one `tick`
/// reports should keep running the instant it appears, never the CFS task
/// it preempted.
pub fn s4_rt_preemption() -> Result<()> {
    let mut config = CoreConfig::default();
    config.cpu_count = 1;
    let core = Core::new(config)?;
    let root = core.spawn(Pid::KERNEL, 0, 0, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::ROOT)?;
    let cpu = CpuId::new(0);
    let cfs_task = spawn_user(&core, root, 1000)?;

    let running = core.pick_next(cpu);
    ensure!(running == Some(cfs_task), "cfs task should be running before the RT task appears");
    core.tick(cpu, 1_000_000);

    let rt_task = core.spawn(root, 1001, 1001, Vec::new(), SchedPolicy::RtFifo { priority: 50 }, Some(cpu), CapFlags::USR)?;
    core.requeue(cpu, cfs_task);
    let next = core.pick_next(cpu);
    ensure!(next == Some(rt_task), "RT-FIFO task must preempt the CFS task within one tick");
    Ok(())
}

/// **S5 — Pipe semantics**: partial reads, then EOF once the writer closes
/// and the buffer drains.
pub fn s5_pipe_semantics() -> Result<()> {
    let core = Core::new(CoreConfig::default())?;
    let pid = core.spawn(Pid::KERNEL, 0, 0, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::ROOT)?;
    let (rfd, wfd) = core.pipe(pid)?;

    core.write(pid, wfd, &[7u8; 100])?;
    core.close(pid, wfd)?;

    let mut buf = [0u8; 50];
    ensure!(core.read(pid, rfd, &mut buf)? == 50, "first read must return 50 bytes");
    ensure!(core.read(pid, rfd, &mut buf)? == 50, "second read must return the remaining 50 bytes");
    ensure!(core.read(pid, rfd, &mut buf)? == 0, "read after drain and writer close must be EOF (0)");
    Ok(())
}

/// **S6 — Permission elevation with expiry**: a time-boxed `elevate` grant
/// must lapse on its own once the simulated clock passes its duration.
pub fn s6_permission_elevation() -> Result<()> {
    let core = Core::new(CoreConfig::default())?;
    let root = core.spawn(Pid::KERNEL, 0, 0, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::ROOT)?;
    let p = spawn_user(&core, root, 1000)?;

    ensure!(!core.check_permission(p, CapFlags::NET), "P must not start with NET");
    ensure!(core.elevate(root, p, CapFlags::NET, Duration::from_millis(50)), "elevate must succeed for a ROOT requester");
    ensure!(core.check_permission(p, CapFlags::NET), "P must hold NET immediately after elevation");

    std::thread::sleep(Duration::from_millis(80));
    ensure!(!core.check_permission(p, CapFlags::NET), "NET must lapse once the elevation's duration passes");

    let log = core.audit_log();
    ensure!(
        log.iter().any(|e| matches!(e.kind, kos_cap::AuditKind::ElevateSuccess)),
        "audit log must contain ElevateSuccess"
    );
    Ok(())
}
