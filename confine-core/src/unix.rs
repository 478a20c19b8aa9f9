//! POSIX sandbox: process groups, rlimits and two-step termination.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use async_trait::async_trait;
use confine_process::{RlimitPlan, set_parent_death_signal, set_process_group};
use tokio::process::Command;
use tracing::{debug, info};

use crate::backend::{CommandRequest, SandboxBackend};
use crate::capture::{AttachedMonitor, ExitSummary, Supervision, supervise};
use crate::error::{Result, SandboxError};
use crate::exec_dir::ExecutionDirectory;
use crate::limits::ResourceLimits;
use crate::result::SandboxResult;
use crate::settings::SandboxSettings;

#[derive(Debug, Clone, Default)]
pub struct UnixSandbox {
    settings: SandboxSettings,
}

impl UnixSandbox {
    pub fn new(settings: SandboxSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SandboxBackend for UnixSandbox {
    fn name(&self) -> &'static str {
        "unix"
    }

    fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    async fn execute_command(&self, request: CommandRequest) -> Result<SandboxResult> {
        let program = request.program().ok_or(SandboxError::EmptyCommand)?.to_string();
        let limits = request.limits.unwrap_or(self.settings.default_limits);
        let dir = match &request.working_dir {
            Some(path) => ExecutionDirectory::borrowed(path),
            None => ExecutionDirectory::create(&self.settings.root)?,
        };

        let mut command = Command::new(&program);
        command
            .args(&request.command[1..])
            .current_dir(dir.path())
            .stdin(if request.input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(environment) = &request.environment {
            command.env_clear().envs(environment);
        }

        let plan = rlimit_plan(&limits, request.relaxed_rlimits);
        let parent_pid = std::process::id();
        // SAFETY: the hook only calls setpgid, prctl and setrlimit, which are
        // async-signal-safe, and touches no heap state.
        #[allow(unsafe_code)]
        unsafe {
            command.pre_exec(move || {
                set_process_group()?;
                set_parent_death_signal(parent_pid)?;
                plan.apply()
            });
        }

        let started = Instant::now();
        let child = command
            .spawn()
            .map_err(|err| SandboxError::spawn(&program, err))?;
        let pid = child.id().unwrap_or_default();
        info!(
            pid,
            program = %program,
            exec_dir = %dir.path().display(),
            timeout_secs = limits.max_cpu_time,
            "spawned sandboxed process"
        );

        let mut monitor = AttachedMonitor::attach(pid, limits, &self.settings.monitor);
        let grace = self.settings.termination_grace;
        let supervision = Supervision {
            started,
            input: request.input,
            deadline: limits.deadline(),
            drain_timeout: self.settings.output_drain_timeout,
            violations: monitor.take_violations(),
        };
        let supervised = supervise(child, supervision, move || {
            confine_process::terminate_process_group(pid, grace).map(|outcome| {
                debug!(pid, ?outcome, "process group terminated");
            })
        })
        .await;
        let sampled_peak = monitor.finish().await;
        let supervised = supervised?;
        let peak_memory = if sampled_peak > 0 {
            sampled_peak
        } else {
            reaped_children_peak_rss()
        };

        let exit = summarize(&supervised.status);
        let outputs = dir.collect_outputs(&request.output_patterns);
        let result = supervised.into_result(exit, &limits, peak_memory, outputs);
        debug!(
            pid,
            success = result.success,
            exit_code = result.exit_code,
            execution_time = result.execution_time,
            "sandboxed process finished"
        );
        Ok(result)
    }
}

/// rlimits for one run. Relaxed plans keep only the CPU and file-size
/// ceilings.
fn rlimit_plan(limits: &ResourceLimits, relaxed: bool) -> RlimitPlan {
    let plan = RlimitPlan::new()
        .cpu_time(limits.max_cpu_time)
        .file_size(limits.max_file_size);
    if relaxed {
        return plan;
    }
    plan.address_space(limits.max_memory)
        .processes(u64::from(limits.max_processes))
        .open_files(u64::from(limits.max_open_files))
}

/// Largest resident set of any child this process has reaped, in bytes.
///
/// Only a fallback for runs without a monitor: the kernel keeps one maximum
/// for all waited-for children, not one per run.
fn reaped_children_peak_rss() -> u64 {
    use nix::sys::resource::{UsageWho, getrusage};

    match getrusage(UsageWho::RUSAGE_CHILDREN) {
        Ok(usage) => {
            let max_rss = u64::try_from(usage.max_rss()).unwrap_or(0);
            // Linux and the BSDs report KiB, macOS reports bytes.
            if cfg!(target_os = "macos") {
                max_rss
            } else {
                max_rss.saturating_mul(1024)
            }
        }
        Err(err) => {
            debug!(error = %err, "getrusage for children failed");
            0
        }
    }
}

/// Exit code, or the negated signal number for a signal death.
fn summarize(status: &ExitStatus) -> ExitSummary {
    match (status.code(), status.signal()) {
        (Some(code), _) => ExitSummary {
            code,
            cpu_limit_hit: false,
        },
        (None, Some(signal)) => ExitSummary {
            code: -signal,
            cpu_limit_hit: signal == libc::SIGXCPU,
        },
        (None, None) => ExitSummary {
            code: -1,
            cpu_limit_hit: false,
        },
    }
}
