//! Process-group helpers used to tear down a sandboxed child and everything
//! it spawned.
//!
//! - `set_process_group` runs in `pre_exec` so the child leads its own group.
//! - `set_parent_death_signal` (Linux only) makes the child die with the
//!   sandbox host instead of lingering as an orphan.
//! - `kill_process_group` / `kill_process_group_by_pid` signal the whole group.
//! - `terminate_process_group` is the timeout path: SIGTERM, an optional
//!   caller-chosen grace period, then SIGKILL regardless of what the group
//!   did in between.
//!
//! "No such process" is never an error here; a group that is already gone has
//! been torn down successfully.

use std::io;
use std::time::Duration;

/// Grace period between SIGTERM and SIGKILL on the timeout path. SIGKILL
/// follows SIGTERM immediately unless a caller asks for more.
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::ZERO;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Signal sent to a process group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KillSignal {
    /// SIGTERM, lets well-behaved programs flush and exit.
    Term,
    /// SIGKILL, cannot be caught.
    #[default]
    Kill,
}

#[cfg(unix)]
impl KillSignal {
    fn as_nix(self) -> nix::sys::signal::Signal {
        match self {
            KillSignal::Term => nix::sys::signal::Signal::SIGTERM,
            KillSignal::Kill => nix::sys::signal::Signal::SIGKILL,
        }
    }
}

/// How a `terminate_process_group` call played out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The group was gone before anything was sent.
    AlreadyExited,
    /// SIGTERM was enough; SIGKILL still went out to catch stragglers.
    ExitedAfterTerm,
    /// The group ignored SIGTERM for the whole grace period.
    Killed,
}

/// Convert to a nix pid, rejecting 0 and values that would wrap negative.
/// Both would address process groups instead of a single process.
#[cfg(unix)]
fn target_pid(pid: u32) -> Option<nix::unistd::Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(nix::unistd::Pid::from_raw)
}

/// Put the calling process into a new process group it leads.
///
/// Must be called from a `pre_exec` hook.
#[cfg(unix)]
pub fn set_process_group() -> io::Result<()> {
    use nix::unistd::{Pid, setpgid};

    setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(io::Error::from)
}

#[cfg(not(unix))]
pub fn set_process_group() -> io::Result<()> {
    Ok(())
}

/// Deliver SIGKILL to the child when the sandbox host dies.
///
/// `parent_pid` is captured before `fork`; if the parent already changed by
/// the time the hook runs, the child kills itself immediately.
#[cfg(target_os = "linux")]
pub fn set_parent_death_signal(parent_pid: u32) -> io::Result<()> {
    use nix::sys::signal::{Signal, raise};

    nix::sys::prctl::set_pdeathsig(Signal::SIGKILL).map_err(io::Error::from)?;
    if nix::unistd::getppid().as_raw() as u32 != parent_pid {
        raise(Signal::SIGKILL).map_err(io::Error::from)?;
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_parent_death_signal(_parent_pid: u32) -> io::Result<()> {
    Ok(())
}

/// Signal a process group by its id.
#[cfg(unix)]
pub fn kill_process_group(process_group_id: u32, signal: KillSignal) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;

    let Some(pgid) = target_pid(process_group_id) else {
        return Ok(());
    };
    match killpg(pgid, signal.as_nix()) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(io::Error::from(err)),
    }
}

/// Signal the process group that `pid` belongs to.
#[cfg(unix)]
pub fn kill_process_group_by_pid(pid: u32, signal: KillSignal) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::unistd::getpgid;

    let Some(target) = target_pid(pid) else {
        return Ok(());
    };
    match getpgid(Some(target)) {
        Ok(pgid) => kill_process_group(pgid.as_raw() as u32, signal),
        Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(io::Error::from(err)),
    }
}

/// Signal a single process (not its group).
#[cfg(unix)]
pub fn kill_process(pid: u32, signal: KillSignal) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;

    let Some(target) = target_pid(pid) else {
        return Ok(());
    };
    match kill(target, signal.as_nix()) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(io::Error::from(err)),
    }
}

/// Terminate a single process. Windows has no signals, so `signal` is ignored.
#[cfg(windows)]
pub fn kill_process(pid: u32, _signal: KillSignal) -> io::Result<()> {
    use windows_sys::Win32::Foundation::{CloseHandle, ERROR_INVALID_PARAMETER, GetLastError};
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_TERMINATE, TerminateProcess};

    // SAFETY: the handle is checked for null and closed before returning.
    #[allow(unsafe_code)]
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if handle.is_null() {
            if GetLastError() == ERROR_INVALID_PARAMETER {
                return Ok(());
            }
            return Err(io::Error::last_os_error());
        }
        let terminated = TerminateProcess(handle, 1);
        let err = io::Error::last_os_error();
        CloseHandle(handle);
        if terminated == 0 { Err(err) } else { Ok(()) }
    }
}

/// Whether `pid` still refers to a live process.
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;

    let Some(target) = target_pid(pid) else {
        return false;
    };
    // EPERM means it exists but belongs to someone else.
    matches!(kill(target, None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(windows)]
pub fn is_process_running(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    // SAFETY: the handle is checked for null and closed before returning.
    #[allow(unsafe_code)]
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            return false;
        }
        let mut exit_code: u32 = 0;
        let queried = GetExitCodeProcess(handle, &mut exit_code);
        CloseHandle(handle);
        queried != 0 && exit_code == STILL_ACTIVE as u32
    }
}

/// SIGTERM the group of `pid`, wait up to `grace` for the leader to exit,
/// then SIGKILL the group unconditionally.
///
/// The group id is resolved up front, so descendants are still reached after
/// the leader itself has exited. The leader is never reaped here; its parent
/// still collects the exit status.
#[cfg(unix)]
pub fn terminate_process_group(pid: u32, grace: Duration) -> io::Result<TerminationOutcome> {
    use nix::errno::Errno;
    use nix::unistd::getpgid;

    let Some(target) = target_pid(pid) else {
        return Ok(TerminationOutcome::AlreadyExited);
    };
    let pgid = match getpgid(Some(target)) {
        Ok(pgid) => pgid.as_raw() as u32,
        Err(Errno::ESRCH) => {
            // Leader is gone; the group may still have members under its id.
            kill_process_group(pid, KillSignal::Kill)?;
            return Ok(TerminationOutcome::AlreadyExited);
        }
        Err(err) => return Err(io::Error::from(err)),
    };

    kill_process_group(pgid, KillSignal::Term)?;

    let mut exited = false;
    if !grace.is_zero() {
        let deadline = std::time::Instant::now() + grace;
        loop {
            if leader_exited(target) {
                exited = true;
                break;
            }
            if std::time::Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    kill_process_group(pgid, KillSignal::Kill)?;
    tracing::debug!(pid, pgid, exited_after_term = exited, "process group killed");

    Ok(if exited {
        TerminationOutcome::ExitedAfterTerm
    } else {
        TerminationOutcome::Killed
    })
}

/// Whether the leader has exited, zombie included. `WNOWAIT` leaves the
/// status for the real parent to collect.
#[cfg(target_os = "linux")]
fn leader_exited(leader: nix::unistd::Pid) -> bool {
    use nix::errno::Errno;
    use nix::sys::wait::{Id, WaitPidFlag, WaitStatus, waitid};

    match waitid(
        Id::Pid(leader),
        WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT,
    ) {
        Ok(WaitStatus::StillAlive) => false,
        Ok(_) => true,
        // Not our child: fall back to existence, which is accurate once
        // its own parent has reaped it.
        Err(Errno::ECHILD) => !is_process_running(leader.as_raw() as u32),
        Err(_) => false,
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn leader_exited(leader: nix::unistd::Pid) -> bool {
    !is_process_running(leader.as_raw() as u32)
}
