//! Windows sandbox built on a Job Object.
//!
//! Every child is assigned to a fresh unnamed job that carries the memory,
//! CPU-time and process-count ceilings. `KILL_ON_JOB_CLOSE` ties the whole
//! tree to the job handle, so dropping the handle on any exit path takes the
//! tree down with it. All FFI for the backend lives in this file.
#![allow(unsafe_code)]

use std::ffi::c_void;
use std::io;
use std::mem;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::process::Stdio;
use std::ptr;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::Security::{
    GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation,
};
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JOB_OBJECT_LIMIT_ACTIVE_PROCESS,
    JOB_OBJECT_LIMIT_JOB_MEMORY, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
    JOB_OBJECT_LIMIT_PROCESS_MEMORY, JOB_OBJECT_LIMIT_PROCESS_TIME,
    JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JobObjectExtendedLimitInformation,
    SetInformationJobObject, TerminateJobObject,
};
use windows_sys::Win32::System::ProcessStatus::{GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS};
use windows_sys::Win32::System::Threading::{
    CREATE_NO_WINDOW, GetCurrentProcess, OpenProcess, OpenProcessToken,
    PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_VM_READ,
};

use crate::backend::{CommandRequest, SandboxBackend};
use crate::capture::{AttachedMonitor, ExitSummary, Supervision, supervise};
use crate::error::{Result, SandboxError};
use crate::exec_dir::ExecutionDirectory;
use crate::limits::ResourceLimits;
use crate::result::SandboxResult;
use crate::settings::SandboxSettings;

/// Exit code given to every process in a terminated job.
const TERMINATED_EXIT_CODE: u32 = 1;

/// 100-nanosecond ticks per second, the unit of job time limits.
const TICKS_PER_SECOND: f64 = 10_000_000.0;

#[derive(Debug, Clone, Default)]
pub struct WindowsSandbox {
    settings: SandboxSettings,
}

impl WindowsSandbox {
    pub fn new(settings: SandboxSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SandboxBackend for WindowsSandbox {
    fn name(&self) -> &'static str {
        "windows"
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

        let job = create_job(&limits, request.relaxed_rlimits)?;

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
            .creation_flags(CREATE_NO_WINDOW)
            .kill_on_drop(true);
        if let Some(environment) = &request.environment {
            command.env_clear().envs(environment);
        }

        let started = Instant::now();
        let child = command
            .spawn()
            .map_err(|err| SandboxError::spawn(&program, err))?;
        let pid = child.id().unwrap_or_default();
        let Some(raw_process) = child.raw_handle() else {
            return Err(SandboxError::Containment(format!(
                "process {pid} exited before it could be contained"
            )));
        };
        // SAFETY: both handles are valid for the duration of the call.
        if unsafe { AssignProcessToJobObject(job.as_raw_handle(), raw_process) } == 0 {
            return Err(SandboxError::Containment(format!(
                "AssignProcessToJobObject failed for process {pid}: {}",
                io::Error::last_os_error()
            )));
        }
        let process = open_process(pid);
        info!(
            pid,
            program = %program,
            exec_dir = %dir.path().display(),
            timeout_secs = limits.max_cpu_time,
            "spawned sandboxed process"
        );

        let mut monitor = AttachedMonitor::attach(pid, limits, &self.settings.monitor);
        let supervision = Supervision {
            started,
            input: request.input,
            deadline: limits.deadline(),
            drain_timeout: self.settings.output_drain_timeout,
            violations: monitor.take_violations(),
        };
        let terminator = job.try_clone().map_err(|err| {
            SandboxError::Containment(format!("failed to duplicate job handle: {err}"))
        })?;
        let supervised = supervise(child, supervision, move || terminate_job(&terminator)).await;
        let monitored_peak = monitor.finish().await;
        let supervised = supervised?;

        let peak_memory = process
            .as_ref()
            .and_then(peak_working_set)
            .unwrap_or(monitored_peak);
        let code = supervised.status.code().unwrap_or(-1);
        let exit = ExitSummary {
            code,
            cpu_limit_hit: false,
        };
        let outputs = dir.collect_outputs(&request.output_patterns);
        drop(job);

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

/// Create a job carrying `limits`. Zero values leave the matching limit off.
fn create_job(limits: &ResourceLimits, relaxed: bool) -> Result<OwnedHandle> {
    // SAFETY: null attributes and name create an unnamed job with default
    // security; the returned handle is checked before it is wrapped.
    let raw = unsafe { CreateJobObjectW(ptr::null(), ptr::null()) };
    if raw.is_null() {
        return Err(SandboxError::Containment(format!(
            "CreateJobObjectW failed: {}",
            io::Error::last_os_error()
        )));
    }
    // SAFETY: `raw` is a fresh, owned job handle.
    let job = unsafe { OwnedHandle::from_raw_handle(raw) };

    // SAFETY: the struct is plain data; all-zero is a valid empty limit set.
    let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { mem::zeroed() };
    let basic = &mut info.BasicLimitInformation;
    basic.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
    if limits.max_memory > 0 {
        let bytes = usize::try_from(limits.max_memory).unwrap_or(usize::MAX);
        basic.LimitFlags |= JOB_OBJECT_LIMIT_PROCESS_MEMORY | JOB_OBJECT_LIMIT_JOB_MEMORY;
        info.ProcessMemoryLimit = bytes;
        info.JobMemoryLimit = bytes;
    }
    if limits.max_cpu_time > 0.0 && limits.max_cpu_time.is_finite() {
        basic.LimitFlags |= JOB_OBJECT_LIMIT_PROCESS_TIME;
        basic.PerProcessUserTimeLimit = (limits.max_cpu_time.ceil() * TICKS_PER_SECOND) as i64;
    }
    if limits.max_processes > 0 && !relaxed {
        basic.LimitFlags |= JOB_OBJECT_LIMIT_ACTIVE_PROCESS;
        basic.ActiveProcessLimit = limits.max_processes;
    }

    // SAFETY: `info` outlives the call and the length matches its type.
    let applied = unsafe {
        SetInformationJobObject(
            job.as_raw_handle(),
            JobObjectExtendedLimitInformation,
            (&info as *const JOBOBJECT_EXTENDED_LIMIT_INFORMATION).cast::<c_void>(),
            mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
        )
    };
    if applied == 0 {
        return Err(SandboxError::Containment(format!(
            "SetInformationJobObject failed: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(job)
}

fn terminate_job(job: &OwnedHandle) -> io::Result<()> {
    // SAFETY: the handle is owned by the caller and open.
    if unsafe { TerminateJobObject(job.as_raw_handle(), TERMINATED_EXIT_CODE) } == 0 {
        return Err(io::Error::last_os_error());
    }
    debug!("job object terminated");
    Ok(())
}

/// A query handle kept open so the process can be inspected after exit.
fn open_process(pid: u32) -> Option<OwnedHandle> {
    // SAFETY: a null return is checked before wrapping.
    let raw = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_VM_READ, 0, pid) };
    if raw.is_null() {
        warn!(pid, error = %io::Error::last_os_error(), "cannot open process for memory stats");
        return None;
    }
    // SAFETY: `raw` is a fresh handle we own.
    Some(unsafe { OwnedHandle::from_raw_handle(raw) })
}

fn peak_working_set(process: &OwnedHandle) -> Option<u64> {
    // SAFETY: plain-data struct; `cb` tells the API its size.
    let mut counters: PROCESS_MEMORY_COUNTERS = unsafe { mem::zeroed() };
    let size = mem::size_of::<PROCESS_MEMORY_COUNTERS>() as u32;
    counters.cb = size;
    // SAFETY: the handle is open and `counters` is writable for `size` bytes.
    let ok = unsafe { GetProcessMemoryInfo(process.as_raw_handle(), &mut counters, size) };
    (ok != 0 && counters.PeakWorkingSetSize > 0).then(|| counters.PeakWorkingSetSize as u64)
}

/// Whether the current process token is elevated.
pub fn is_elevated() -> bool {
    let mut token: HANDLE = ptr::null_mut();
    // SAFETY: the pseudo handle from GetCurrentProcess needs no closing; the
    // token handle is closed below.
    unsafe {
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
            return false;
        }
        let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
        let mut returned = 0u32;
        let ok = GetTokenInformation(
            token,
            TokenElevation,
            (&mut elevation as *mut TOKEN_ELEVATION).cast::<c_void>(),
            mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        );
        CloseHandle(token);
        ok != 0 && elevation.TokenIsElevated != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_accepts_default_limits() {
        let job = create_job(&ResourceLimits::default(), false).expect("create job");
        terminate_job(&job).expect("terminate empty job");
    }

    #[test]
    fn job_accepts_unlimited() {
        assert!(create_job(&ResourceLimits::unlimited(), false).is_ok());
    }

    #[tokio::test]
    async fn echo_runs_inside_a_job() {
        let root = tempfile::tempdir().expect("tempdir");
        let sandbox = WindowsSandbox::new(SandboxSettings::default().with_root(root.path()));
        let result = sandbox
            .execute_command(CommandRequest::new(["cmd", "/C", "echo hello"]))
            .await
            .expect("run echo");
        assert!(result.success, "{result}");
        assert_eq!(result.stdout.trim(), "hello");
    }
}
