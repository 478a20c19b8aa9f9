//! Sandboxed execution of code snippets and commands.
//!
//! A `SandboxBackend` runs one child per call inside a throwaway execution
//! directory, under CPU, memory, process, file-size and descriptor limits.
//! Unix hosts contain children with process groups and rlimits, Windows
//! hosts with a Job Object. A `ResourceMonitor` samples the child tree on a
//! background thread, and `GuardedSandbox` checks a `PermissionManager`
//! before anything runs.

pub mod backend;
mod capture;
pub mod error;
pub mod exec_dir;
pub mod guard;
pub mod language;
pub mod limits;
pub mod monitor;
pub mod permissions;
pub mod platform;
pub mod result;
pub mod settings;
#[cfg(unix)]
pub mod unix;
mod unsupported;
#[cfg(windows)]
pub mod windows;

pub use backend::{CodeRequest, CommandRequest, SandboxBackend};
pub use error::{Result, SandboxError};
pub use exec_dir::ExecutionDirectory;
pub use guard::GuardedSandbox;
pub use language::Language;
pub use limits::ResourceLimits;
pub use monitor::{LimitViolation, ResourceMonitor, ResourceUsage, kill_process_tree};
pub use permissions::{
    Permission, PermissionDenied, PermissionManager, PermissionSet, UnknownPermission,
};
pub use platform::{
    PlatformInfo, PlatformKind, create_sandbox, create_sandbox_for, default_sandbox,
    ensure_sandbox_root, is_admin, platform_info,
};
pub use result::SandboxResult;
pub use settings::SandboxSettings;
#[cfg(unix)]
pub use unix::UnixSandbox;
pub use unsupported::UnavailableSandbox;
#[cfg(windows)]
pub use windows::WindowsSandbox;
