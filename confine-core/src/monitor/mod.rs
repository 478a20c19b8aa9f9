//! Background sampling of a process tree.
//!
//! `ResourceMonitor` owns a dedicated OS thread that refreshes process stats
//! every `interval`, re-resolving descendants on each tick so short-lived
//! children are picked up. Snapshots are published with an atomic pointer
//! swap; readers always get a complete copy. When a configured limit is
//! exceeded the violation callback runs on the sampler thread, once per limit
//! per run. The monitor never kills anything by itself.

mod sampler;
mod usage;

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use confine_config::MonitorConfig;
use confine_process::KillSignal;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::error::{Result, SandboxError};
use crate::limits::ResourceLimits;

pub use usage::{LimitViolation, ResourceUsage};

use sampler::{Sampler, process_tree};

pub type ViolationCallback = Arc<dyn Fn(&LimitViolation) + Send + Sync>;

const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

struct Worker {
    stop_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

pub struct ResourceMonitor {
    pid: u32,
    limits: Option<ResourceLimits>,
    include_children: bool,
    interval: Duration,
    stop_timeout: Duration,
    on_violation: Option<ViolationCallback>,
    usage: Arc<ArcSwap<ResourceUsage>>,
    worker: Option<Worker>,
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("pid", &self.pid)
            .field("limits", &self.limits)
            .field("include_children", &self.include_children)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ResourceMonitor {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            limits: None,
            include_children: true,
            interval: DEFAULT_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            on_violation: None,
            usage: Arc::new(ArcSwap::from_pointee(ResourceUsage::default())),
            worker: None,
        }
    }

    pub fn from_config(pid: u32, config: &MonitorConfig) -> Self {
        Self::new(pid)
            .include_children(config.include_children)
            .interval(Duration::from_millis(config.interval_ms))
            .stop_timeout(Duration::from_millis(config.stop_timeout_ms))
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn include_children(mut self, include: bool) -> Self {
        self.include_children = include;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn on_violation(mut self, callback: impl Fn(&LimitViolation) + Send + Sync + 'static) -> Self {
        self.on_violation = Some(Arc::new(callback));
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Start sampling. Fails if the target process does not exist; starting
    /// an already running monitor is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        if !confine_process::is_process_running(self.pid) {
            return Err(SandboxError::ProcessNotFound(self.pid));
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let mut run = SamplerRun {
            sampler: Sampler::new(self.pid, self.include_children),
            limits: self.limits,
            on_violation: self.on_violation.clone(),
            usage: Arc::clone(&self.usage),
            fired_time: false,
            fired_memory: false,
        };
        let interval = self.interval;
        let pid = self.pid;

        let handle = std::thread::Builder::new()
            .name(format!("confine-monitor-{pid}"))
            .spawn(move || {
                loop {
                    if !run.tick() {
                        debug!(pid, "monitored process exited");
                        break;
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                done_tx.send(()).ok();
            })
            .map_err(|err| SandboxError::Monitor(format!("failed to spawn sampler thread: {err}")))?;

        self.worker = Some(Worker {
            stop_tx,
            done_rx,
            handle,
        });
        debug!(pid, interval_ms = interval.as_millis() as u64, "resource monitor started");
        Ok(())
    }

    /// Stop sampling and return the last snapshot.
    ///
    /// Waits at most `stop_timeout` for the thread; a sampler stuck in a slow
    /// refresh is detached rather than blocking the caller.
    pub fn stop(&mut self) -> ResourceUsage {
        if let Some(worker) = self.worker.take() {
            worker.stop_tx.send(()).ok();
            match worker.done_rx.recv_timeout(self.stop_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.handle.join().is_err() {
                        warn!(pid = self.pid, "resource monitor thread panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(pid = self.pid, "resource monitor did not stop in time; detaching");
                }
            }
        }
        self.usage()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Copy of the latest snapshot.
    pub fn usage(&self) -> ResourceUsage {
        self.usage.load_full().as_ref().clone()
    }

    /// Kill the monitored process and its descendants, children first.
    pub fn kill_process(&self) -> Result<()> {
        kill_process_tree(self.pid)
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Kill `pid` and everything below it, deepest descendants first. Processes
/// that are already gone are ignored.
pub fn kill_process_tree(pid: u32) -> Result<()> {
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::nothing());
    let root = Pid::from_u32(pid);
    if system.process(root).is_none() {
        return Ok(());
    }

    let tree = process_tree(&system, root);
    for target in tree.iter().rev() {
        confine_process::kill_process(target.as_u32(), KillSignal::Kill)?;
    }
    debug!(pid, killed = tree.len(), "killed process tree");
    Ok(())
}

struct SamplerRun {
    sampler: Sampler,
    limits: Option<ResourceLimits>,
    on_violation: Option<ViolationCallback>,
    usage: Arc<ArcSwap<ResourceUsage>>,
    fired_time: bool,
    fired_memory: bool,
}

impl SamplerRun {
    /// One tick. Returns `false` when the target is gone.
    fn tick(&mut self) -> bool {
        let Some(usage) = self.sampler.sample() else {
            return false;
        };

        let mut violations = Vec::new();
        if let Some(limits) = self.limits {
            if let Some(deadline) = limits.deadline()
                && !self.fired_time
                && usage.elapsed_time > deadline.as_secs_f64()
            {
                self.fired_time = true;
                violations.push(LimitViolation {
                    limit_name: "max_cpu_time",
                    observed: usage.elapsed_time,
                    limit: limits.max_cpu_time,
                });
            }
            if limits.max_memory > 0 && !self.fired_memory && usage.memory_bytes > limits.max_memory {
                self.fired_memory = true;
                violations.push(LimitViolation {
                    limit_name: "max_memory",
                    observed: usage.memory_bytes as f64,
                    limit: limits.max_memory as f64,
                });
            }
        }

        self.usage.store(Arc::new(usage));

        for violation in &violations {
            warn!(limit = violation.limit_name, observed = violation.observed, limit_value = violation.limit, "resource limit exceeded");
            if let Some(callback) = &self.on_violation {
                callback(violation);
            }
        }
        true
    }
}
