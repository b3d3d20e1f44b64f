//! End-to-end tests for the concrete scenarios spec.md §8 enumerates,
//! driving a [`Core`] the same way `kosctl demo` does but asserting with
//! `#[test]` instead of printing pass/fail.

use std::collections::HashMap;
use std::time::Duration;

use kos_cap::{AuditKind, CapFlags};
use kos_core::error::KError;
use kos_core::id::{CpuId, Pid};
use kos_fs::Mode;
use kos_kernel::{Core, CoreConfig, OpenFlags, Whence};
use kos_sched::SchedPolicy;

fn root(core: &Core) -> Pid {
    core.spawn(Pid::KERNEL, 0, 0, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::ROOT).unwrap()
}

fn user(core: &Core, parent: Pid, uid: u32) -> Pid {
    core.spawn(parent, uid, uid, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::USR).unwrap()
}

#[test]
fn s1_file_round_trip_on_ramfs() {
    let core = Core::new(CoreConfig::default()).unwrap();
    let root = root(&core);
    let pid = user(&core, root, 1000);

    let fd = core.open(pid, "/a.txt", OpenFlags::RDWR | OpenFlags::CREAT, Mode::from_octal(0o644)).unwrap();
    assert_eq!(core.write(pid, fd, b"hello").unwrap(), 5);
    core.lseek(pid, fd, 0, Whence::Set).unwrap();
    let mut buf = [0u8; 8];
    let n = core.read(pid, fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");
    assert_eq!(core.stat(pid, "/a.txt").unwrap().size, 5);

    core.unlink(pid, "/a.txt").unwrap();
    assert_eq!(core.open(pid, "/a.txt", OpenFlags::RDONLY, Mode::empty()).unwrap_err(), KError::NotFound);
}

#[test]
fn s2_symlink_loop_is_detected() {
    let core = Core::new(CoreConfig::default()).unwrap();
    let root = root(&core);
    core.symlink(root, "/b", "/a").unwrap();
    core.symlink(root, "/a", "/b").unwrap();
    assert_eq!(core.open(root, "/a", OpenFlags::RDONLY, Mode::empty()).unwrap_err(), KError::SymlinkLoop);
}

#[test]
fn s3_two_equal_cfs_tasks_split_cpu_time_fairly() {
    const QUANTUM_NANOS: u64 = 1_000_000;
    const TOTAL_NANOS: u64 = 1_000_000_000;

    let mut config = CoreConfig::default();
    config.cpu_count = 1;
    let core = Core::new(config).unwrap();
    let root = root(&core);
    let cpu = CpuId::new(0);
    let a = user(&core, root, 1000);
    let b = user(&core, root, 1001);

    let mut runtime: HashMap<Pid, u64> = HashMap::new();
    runtime.insert(a, 0);
    runtime.insert(b, 0);

    let mut elapsed = 0u64;
    let mut current = core.pick_next(cpu);
    while elapsed < TOTAL_NANOS {
        let Some(pid) = current else { break };
        *runtime.get_mut(&pid).unwrap() += QUANTUM_NANOS;
        elapsed += QUANTUM_NANOS;
        let outcome = core.tick(cpu, QUANTUM_NANOS);
        current = if outcome.reschedule {
            core.requeue(cpu, pid);
            core.pick_next(cpu)
        } else {
            Some(pid)
        };
    }

    for (_, ns) in runtime {
        let fraction = ns as f64 / TOTAL_NANOS as f64;
        assert!((0.45..=0.55).contains(&fraction), "fraction {fraction} out of range");
    }
}

#[test]
fn s4_rt_fifo_preempts_running_cfs_task() {
    let mut config = CoreConfig::default();
    config.cpu_count = 1;
    let core = Core::new(config).unwrap();
    let root = root(&core);
    let cpu = CpuId::new(0);
    let cfs_task = user(&core, root, 1000);

    assert_eq!(core.pick_next(cpu), Some(cfs_task));
    core.tick(cpu, 1_000_000);

    let rt_task = core
        .spawn(root, 1001, 1001, Vec::new(), SchedPolicy::RtFifo { priority: 50 }, Some(cpu), CapFlags::USR)
        .unwrap();
    core.requeue(cpu, cfs_task);
    assert_eq!(core.pick_next(cpu), Some(rt_task));
}

#[test]
fn s5_pipe_partial_reads_then_eof() {
    let core = Core::new(CoreConfig::default()).unwrap();
    let pid = root(&core);
    let (rfd, wfd) = core.pipe(pid).unwrap();

    core.write(pid, wfd, &[7u8; 100]).unwrap();
    core.close(pid, wfd).unwrap();

    let mut buf = [0u8; 50];
    assert_eq!(core.read(pid, rfd, &mut buf).unwrap(), 50);
    assert_eq!(core.read(pid, rfd, &mut buf).unwrap(), 50);
    assert_eq!(core.read(pid, rfd, &mut buf).unwrap(), 0);
}

#[test]
fn s6_elevation_expires_and_is_audited() {
    let core = Core::new(CoreConfig::default()).unwrap();
    let admin = root(&core);
    let p = user(&core, admin, 1000);

    assert!(!core.check_permission(p, CapFlags::NET));
    assert!(core.elevate(admin, p, CapFlags::NET, Duration::from_millis(50)));
    assert!(core.check_permission(p, CapFlags::NET));

    std::thread::sleep(Duration::from_millis(80));
    assert!(!core.check_permission(p, CapFlags::NET));

    let log = core.audit_log();
    assert!(log.iter().any(|e| matches!(e.kind, AuditKind::ElevateSuccess)));
}
