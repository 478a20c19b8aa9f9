//! Child supervision shared by the platform backends.
//!
//! Output is drained by background tasks into shared buffers, so whatever a
//! child printed before it was killed still ends up in the result. The wait
//! races the child's exit against the deadline and the monitor's violation
//! channel; whichever wins first decides how the run is reported.

use std::collections::BTreeMap;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

use confine_config::MonitorConfig;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SandboxError};
use crate::limits::ResourceLimits;
use crate::monitor::{LimitViolation, ResourceMonitor};
use crate::result::SandboxResult;

const READ_CHUNK: usize = 8 * 1024;

/// Why a run was cut short.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Interruption {
    Deadline,
    Violation(LimitViolation),
}

/// Everything known about a child once it has been reaped.
#[derive(Debug)]
pub(crate) struct Supervised {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub interruption: Option<Interruption>,
    pub elapsed: Duration,
}

/// Platform reading of an exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExitSummary {
    pub code: i32,
    /// The OS CPU-time limit ended the process.
    pub cpu_limit_hit: bool,
}

pub(crate) struct Supervision {
    pub started: Instant,
    pub input: Option<String>,
    pub deadline: Option<Duration>,
    pub drain_timeout: Duration,
    pub violations: Option<mpsc::UnboundedReceiver<LimitViolation>>,
}

/// A monitor watching one child, plus the receiving end of its violations.
pub(crate) struct AttachedMonitor {
    monitor: Option<ResourceMonitor>,
    violations: Option<mpsc::UnboundedReceiver<LimitViolation>>,
}

impl AttachedMonitor {
    pub(crate) fn attach(pid: u32, limits: ResourceLimits, config: &MonitorConfig) -> Self {
        if !config.enabled {
            return Self::detached();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut monitor = ResourceMonitor::from_config(pid, config)
            .with_limits(limits)
            .on_violation(move |violation| {
                tx.send(violation.clone()).ok();
            });
        match monitor.start() {
            Ok(()) => Self {
                monitor: Some(monitor),
                violations: Some(rx),
            },
            Err(SandboxError::ProcessNotFound(_)) => {
                debug!(pid, "child exited before monitoring started");
                Self::detached()
            }
            Err(err) => {
                warn!(pid, error = %err, "running without resource monitor");
                Self::detached()
            }
        }
    }

    fn detached() -> Self {
        Self {
            monitor: None,
            violations: None,
        }
    }

    pub(crate) fn take_violations(&mut self) -> Option<mpsc::UnboundedReceiver<LimitViolation>> {
        self.violations.take()
    }

    /// Stop sampling and return the peak memory seen, 0 if none.
    pub(crate) async fn finish(self) -> u64 {
        let Some(mut monitor) = self.monitor else {
            return 0;
        };
        match tokio::task::spawn_blocking(move || monitor.stop()).await {
            Ok(usage) => usage.peak_memory_bytes,
            Err(err) => {
                warn!(error = %err, "resource monitor shutdown failed");
                0
            }
        }
    }
}

/// Feed stdin, drain output and wait for `child`, killing it with
/// `terminate` when the deadline passes or a limit is violated.
pub(crate) async fn supervise<F>(
    mut child: Child,
    supervision: Supervision,
    terminate: F,
) -> Result<Supervised>
where
    F: FnOnce() -> io::Result<()> + Send + 'static,
{
    let Supervision {
        started,
        input,
        deadline,
        drain_timeout,
        mut violations,
    } = supervision;
    let pid = child.id().unwrap_or_default();

    let stdin_task = match (child.stdin.take(), input) {
        (Some(mut stdin), Some(input)) => Some(tokio::spawn(async move {
            if let Err(err) = stdin.write_all(input.as_bytes()).await
                && err.kind() != io::ErrorKind::BrokenPipe
            {
                debug!(error = %err, "failed to write child stdin");
            }
        })),
        _ => None,
    };

    let stdout = Arc::new(Mutex::new(Vec::new()));
    let stderr = Arc::new(Mutex::new(Vec::new()));
    let mut readers = Vec::with_capacity(2);
    if let Some(pipe) = child.stdout.take() {
        readers.push(spawn_reader(pipe, Arc::clone(&stdout)));
    }
    if let Some(pipe) = child.stderr.take() {
        readers.push(spawn_reader(pipe, Arc::clone(&stderr)));
    }

    let expired = async {
        match deadline {
            Some(deadline) => tokio::time::sleep(deadline).await,
            None => std::future::pending().await,
        }
    };
    let violated = async {
        match violations.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    };

    let waited = tokio::select! {
        status = child.wait() => Ok(status),
        () = expired => Err(Interruption::Deadline),
        Some(violation) = violated => Err(Interruption::Violation(violation)),
    };

    let (status, interruption) = match waited {
        Ok(status) => (status?, None),
        Err(interruption) => {
            info!(pid, reason = ?interruption, "terminating sandboxed process");
            match tokio::task::spawn_blocking(terminate).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(pid, error = %err, "failed to terminate process"),
                Err(err) => warn!(pid, error = %err, "termination task failed"),
            }
            (child.wait().await?, Some(interruption))
        }
    };
    let elapsed = started.elapsed();

    let aborts: Vec<_> = readers.iter().map(JoinHandle::abort_handle).collect();
    let drained = tokio::time::timeout(drain_timeout, async {
        for reader in readers {
            reader.await.ok();
        }
    })
    .await;
    if drained.is_err() {
        warn!(pid, "output pipes still open after the process exited; truncating");
        for abort in aborts {
            abort.abort();
        }
    }
    if let Some(task) = stdin_task {
        task.abort();
    }

    let stdout = String::from_utf8_lossy(&stdout.lock()).into_owned();
    let stderr = String::from_utf8_lossy(&stderr.lock()).into_owned();
    Ok(Supervised {
        status,
        stdout,
        stderr,
        interruption,
        elapsed,
    })
}

fn spawn_reader<R>(mut pipe: R, buffer: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(read) => buffer.lock().extend_from_slice(&chunk[..read]),
                Err(err) => {
                    debug!(error = %err, "stopped reading child output");
                    break;
                }
            }
        }
    })
}

impl Supervised {
    /// Fold the run into the public result shape.
    pub(crate) fn into_result(
        self,
        exit: ExitSummary,
        limits: &ResourceLimits,
        memory_usage: u64,
        output_files: BTreeMap<String, String>,
    ) -> SandboxResult {
        let mut stderr = self.stderr;
        let timed_out = match &self.interruption {
            Some(Interruption::Deadline) => true,
            Some(Interruption::Violation(violation)) => violation.is_time_limit(),
            None => exit.cpu_limit_hit,
        };

        let error_message = if timed_out {
            let message = timeout_message(limits.max_cpu_time);
            stderr.push_str(&format!("\n{message}."));
            Some(message)
        } else if let Some(Interruption::Violation(violation)) = &self.interruption {
            let message = format!("Resource limit exceeded: {violation}");
            stderr.push_str(&format!("\n{message}"));
            Some(message)
        } else if exit.code != 0 {
            Some(format!("Execution failed with exit code {}", exit.code))
        } else {
            None
        };

        SandboxResult {
            success: error_message.is_none(),
            stdout: self.stdout,
            stderr,
            exit_code: exit.code,
            execution_time: self.elapsed.as_secs_f64(),
            memory_usage,
            error_message,
            output_files,
        }
    }
}

fn timeout_message(seconds: f64) -> String {
    format!("Process timed out after {seconds} seconds")
}
