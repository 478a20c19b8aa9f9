//! POSIX resource limits applied to a child between `fork` and `exec`.
//!
//! A `RlimitPlan` is built in the parent (allocation is fine there) and only
//! copied into the `pre_exec` closure; `apply` makes nothing but `setrlimit`
//! calls so it stays async-signal-safe.

use std::io;

use nix::sys::resource::{Resource, setrlimit};

/// Limits to install in the child. `None` leaves the inherited limit alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RlimitPlan {
    cpu_seconds: Option<u64>,
    address_space_bytes: Option<u64>,
    processes: Option<u64>,
    file_size_bytes: Option<u64>,
    open_files: Option<u64>,
}

impl RlimitPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// CPU seconds. Fractions round up; zero means unlimited.
    pub fn cpu_time(mut self, seconds: f64) -> Self {
        self.cpu_seconds = (seconds > 0.0).then(|| seconds.ceil() as u64);
        self
    }

    pub fn address_space(mut self, bytes: u64) -> Self {
        self.address_space_bytes = nonzero(bytes);
        self
    }

    pub fn processes(mut self, count: u64) -> Self {
        self.processes = nonzero(count);
        self
    }

    pub fn file_size(mut self, bytes: u64) -> Self {
        self.file_size_bytes = nonzero(bytes);
        self
    }

    pub fn open_files(mut self, count: u64) -> Self {
        self.open_files = nonzero(count);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn cpu_seconds(&self) -> Option<u64> {
        self.cpu_seconds
    }

    /// Install the limits on the calling process.
    ///
    /// The CPU hard limit sits one second above the soft limit so the child
    /// receives SIGXCPU first and SIGKILL only if it ignores that. The process
    /// ceiling is best-effort: platforms without `RLIMIT_NPROC`, or kernels
    /// that reject it, are skipped silently.
    pub fn apply(&self) -> io::Result<()> {
        if let Some(seconds) = self.cpu_seconds {
            set(Resource::RLIMIT_CPU, seconds, seconds.saturating_add(1))?;
        }
        if let Some(bytes) = self.address_space_bytes {
            set(Resource::RLIMIT_AS, bytes, bytes)?;
        }
        if let Some(count) = self.processes {
            apply_process_limit(count);
        }
        if let Some(bytes) = self.file_size_bytes {
            set(Resource::RLIMIT_FSIZE, bytes, bytes)?;
        }
        if let Some(count) = self.open_files {
            set(Resource::RLIMIT_NOFILE, count, count)?;
        }
        Ok(())
    }
}

fn nonzero(value: u64) -> Option<u64> {
    (value > 0).then_some(value)
}

fn set(resource: Resource, soft: u64, hard: u64) -> io::Result<()> {
    setrlimit(resource, soft as libc::rlim_t, hard as libc::rlim_t).map_err(io::Error::from)
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
fn apply_process_limit(count: u64) {
    // Raising above an inherited hard limit fails for unprivileged callers.
    set(Resource::RLIMIT_NPROC, count, count).unwrap_or(());
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
)))]
fn apply_process_limit(_count: u64) {}
