//! One sampling pass over a process tree.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use sysinfo::{Networks, Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};

use super::usage::ResourceUsage;

pub(crate) struct Sampler {
    root: Pid,
    include_children: bool,
    system: System,
    networks: Networks,
    network_baseline: (u64, u64),
    io_baseline: HashMap<Pid, (u64, u64)>,
    started: Instant,
    peak_memory: u64,
}

impl Sampler {
    pub(crate) fn new(pid: u32, include_children: bool) -> Self {
        let networks = Networks::new_with_refreshed_list();
        let network_baseline = network_totals(&networks);
        Self {
            root: Pid::from_u32(pid),
            include_children,
            system: System::new(),
            networks,
            network_baseline,
            io_baseline: HashMap::new(),
            started: Instant::now(),
            peak_memory: 0,
        }
    }

    /// Refresh and aggregate. `None` once the root process is gone.
    pub(crate) fn sample(&mut self) -> Option<ResourceUsage> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cpu()
                .with_memory()
                .with_disk_usage()
                .with_tasks(),
        );
        let root = self.system.process(self.root)?;
        if matches!(root.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return None;
        }

        let tree = if self.include_children {
            process_tree(&self.system, self.root)
        } else {
            vec![self.root]
        };

        let mut usage = ResourceUsage::default();
        for pid in &tree {
            let Some(process) = self.system.process(*pid) else {
                continue;
            };
            usage.process_count += 1;
            usage.cpu_percent += f64::from(process.cpu_usage());
            usage.memory_bytes += process.memory();

            let disk = process.disk_usage();
            let baseline = *self.io_baseline.entry(*pid).or_insert((
                disk.total_read_bytes.saturating_sub(disk.read_bytes),
                disk.total_written_bytes.saturating_sub(disk.written_bytes),
            ));
            usage.io_read_bytes += disk.total_read_bytes.saturating_sub(baseline.0);
            usage.io_write_bytes += disk.total_written_bytes.saturating_sub(baseline.1);

            usage.thread_count += process
                .tasks()
                .map_or(1, |tasks| tasks.len().max(1) as u32);

            let sockets = procfs::socket_count(pid.as_u32());
            let descriptors = process
                .open_files()
                .map_or(0, |count| u32::try_from(count).unwrap_or(u32::MAX));
            usage.open_files_count += descriptors.saturating_sub(sockets);
            usage.network_connections += sockets;

            if let Some((reads, writes)) = procfs::syscall_counts(pid.as_u32()) {
                usage.io_read_count += reads;
                usage.io_write_count += writes;
            }
        }

        self.networks.refresh(true);
        let (received, transmitted) = network_totals(&self.networks);
        usage.network_recv_bytes = received.saturating_sub(self.network_baseline.0);
        usage.network_sent_bytes = transmitted.saturating_sub(self.network_baseline.1);

        self.peak_memory = self.peak_memory.max(usage.memory_bytes);
        usage.peak_memory_bytes = self.peak_memory;
        usage.elapsed_time = self.started.elapsed().as_secs_f64();
        Some(usage)
    }
}

/// `root` followed by every live descendant, parents before children.
/// Thread entries that sysinfo lists alongside processes are skipped.
pub(crate) fn process_tree(system: &System, root: Pid) -> Vec<Pid> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut ordered = vec![root];
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        for child in children.get(&pid).into_iter().flatten() {
            if seen.insert(*child) {
                ordered.push(*child);
                queue.push_back(*child);
            }
        }
    }
    ordered
}

fn network_totals(networks: &Networks) -> (u64, u64) {
    networks
        .list()
        .values()
        .fold((0, 0), |(rx, tx), data| {
            (rx + data.total_received(), tx + data.total_transmitted())
        })
}

#[cfg(target_os = "linux")]
mod procfs {
    use std::fs;

    /// Descriptors of `pid` that point at sockets.
    pub(crate) fn socket_count(pid: u32) -> u32 {
        let Ok(entries) = fs::read_dir(format!("/proc/{pid}/fd")) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| {
                fs::read_link(entry.path())
                    .is_ok_and(|target| target.to_string_lossy().starts_with("socket:"))
            })
            .count() as u32
    }

    /// `(syscr, syscw)` from `/proc/<pid>/io`.
    pub(crate) fn syscall_counts(pid: u32) -> Option<(u64, u64)> {
        let content = fs::read_to_string(format!("/proc/{pid}/io")).ok()?;
        let field = |name: &str| {
            content
                .lines()
                .find_map(|line| line.strip_prefix(name))
                .and_then(|rest| rest.trim().parse::<u64>().ok())
        };
        Some((field("syscr:")?, field("syscw:")?))
    }
}

#[cfg(not(target_os = "linux"))]
mod procfs {
    pub(crate) fn socket_count(_pid: u32) -> u32 {
        0
    }

    pub(crate) fn syscall_counts(_pid: u32) -> Option<(u64, u64)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_current_process() {
        let mut sampler = Sampler::new(std::process::id(), false);
        let usage = sampler.sample().expect("own process is alive");
        assert_eq!(usage.process_count, 1);
        assert!(usage.memory_bytes > 0);
        assert!(usage.thread_count >= 1);
        assert_eq!(usage.peak_memory_bytes, usage.memory_bytes);
    }

    #[test]
    fn missing_root_yields_none() {
        let mut sampler = Sampler::new(2_000_000_000, true);
        assert!(sampler.sample().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn tree_includes_spawned_child() {
        let mut child = std::process::Command::new("sleep")
            .arg("5")
            .spawn()
            .expect("spawn sleep");

        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );
        let tree = process_tree(&system, Pid::from_u32(std::process::id()));
        child.kill().expect("kill sleep");
        child.wait().expect("reap sleep");

        assert!(tree.contains(&Pid::from_u32(child.id())));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn open_files_counts_new_descriptors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sampler = Sampler::new(std::process::id(), false);
        let before = sampler.sample().expect("own process is alive").open_files_count;

        let held: Vec<_> = (0..64)
            .map(|i| std::fs::File::create(dir.path().join(format!("{i}.txt"))).expect("create"))
            .collect();
        let during = sampler.sample().expect("own process is alive").open_files_count;
        drop(held);

        assert!(before > 0);
        assert!(during >= before + 32, "before {before}, during {during}");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn procfs_reads_socket_and_syscall_counters() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        assert!(procfs::socket_count(std::process::id()) >= 1);
        drop(listener);
        assert!(procfs::syscall_counts(std::process::id()).is_some());
    }
}
