//! Host detection and the backend factory.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{debug, info};

use crate::backend::SandboxBackend;
use crate::error::{Result, SandboxError};
use crate::settings::SandboxSettings;
use crate::unsupported::UnavailableSandbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Windows,
    Linux,
    MacOs,
    Unknown,
}

impl PlatformKind {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => Self::Windows,
            "linux" => Self::Linux,
            "macos" => Self::MacOs,
            _ => Self::Unknown,
        }
    }

    pub fn is_unix(self) -> bool {
        matches!(self, Self::Linux | Self::MacOs)
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::MacOs => "macos",
            Self::Unknown => "unknown",
        })
    }
}

/// Facts about the host, gathered once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub kind: PlatformKind,
    pub os_name: String,
    pub os_version: String,
    pub kernel_version: String,
    pub arch: String,
    pub hostname: String,
    pub cpu_count: usize,
    pub is_admin: bool,
}

impl PlatformInfo {
    pub fn detect() -> Self {
        let unknown = || "unknown".to_string();
        Self {
            kind: PlatformKind::current(),
            os_name: System::name().unwrap_or_else(unknown),
            os_version: System::os_version().unwrap_or_else(unknown),
            kernel_version: System::kernel_version().unwrap_or_else(unknown),
            arch: std::env::consts::ARCH.to_string(),
            hostname: System::host_name().unwrap_or_else(unknown),
            cpu_count: std::thread::available_parallelism().map_or(1, usize::from),
            is_admin: is_admin(),
        }
    }
}

/// Cached `PlatformInfo` for this process.
pub fn platform_info() -> &'static PlatformInfo {
    static INFO: OnceLock<PlatformInfo> = OnceLock::new();
    INFO.get_or_init(PlatformInfo::detect)
}

/// Root on Unix, an elevated token on Windows.
#[cfg(unix)]
pub fn is_admin() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(windows)]
pub fn is_admin() -> bool {
    crate::windows::is_elevated()
}

#[cfg(not(any(unix, windows)))]
pub fn is_admin() -> bool {
    false
}

/// Make sure `root` exists so execution directories can be created in it.
pub fn ensure_sandbox_root(root: &Path) -> Result<PathBuf> {
    fs::create_dir_all(root).map_err(|err| SandboxError::exec_dir(root, err))?;
    Ok(root.to_path_buf())
}

/// Backend for `kind`. Kinds that do not match the host, and `Unknown`, get
/// an `UnavailableSandbox`.
pub fn create_sandbox_for(
    kind: PlatformKind,
    settings: SandboxSettings,
) -> Result<Arc<dyn SandboxBackend>> {
    if kind != PlatformKind::current() || kind == PlatformKind::Unknown {
        debug!(requested = %kind, host = %PlatformKind::current(), "no sandbox for platform");
        return Ok(Arc::new(UnavailableSandbox::new(kind.to_string(), settings)));
    }
    ensure_sandbox_root(&settings.root)?;
    Ok(native_backend(settings))
}

/// Backend for the current host.
pub fn create_sandbox(settings: SandboxSettings) -> Result<Arc<dyn SandboxBackend>> {
    create_sandbox_for(PlatformKind::current(), settings)
}

#[cfg(unix)]
fn native_backend(settings: SandboxSettings) -> Arc<dyn SandboxBackend> {
    Arc::new(crate::unix::UnixSandbox::new(settings))
}

#[cfg(windows)]
fn native_backend(settings: SandboxSettings) -> Arc<dyn SandboxBackend> {
    Arc::new(crate::windows::WindowsSandbox::new(settings))
}

#[cfg(not(any(unix, windows)))]
fn native_backend(settings: SandboxSettings) -> Arc<dyn SandboxBackend> {
    Arc::new(UnavailableSandbox::new(std::env::consts::OS, settings))
}

/// Process-wide backend built from default settings on first use.
pub fn default_sandbox() -> Result<Arc<dyn SandboxBackend>> {
    static DEFAULT: OnceLock<Arc<dyn SandboxBackend>> = OnceLock::new();
    if let Some(sandbox) = DEFAULT.get() {
        return Ok(Arc::clone(sandbox));
    }
    let sandbox = create_sandbox(SandboxSettings::default())?;
    info!(backend = sandbox.name(), platform = %PlatformKind::current(), "default sandbox ready");
    Ok(Arc::clone(DEFAULT.get_or_init(|| sandbox)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_kind_matches_host() {
        let kind = PlatformKind::current();
        #[cfg(target_os = "linux")]
        assert_eq!(kind, PlatformKind::Linux);
        #[cfg(target_os = "macos")]
        assert_eq!(kind, PlatformKind::MacOs);
        #[cfg(windows)]
        assert_eq!(kind, PlatformKind::Windows);
        assert_eq!(kind.is_unix(), cfg!(any(target_os = "linux", target_os = "macos")));
    }

    #[test]
    fn info_is_cached_and_filled() {
        let info = platform_info();
        assert!(std::ptr::eq(info, platform_info()));
        assert_eq!(info.kind, PlatformKind::current());
        assert!(info.cpu_count >= 1);
        assert_eq!(info.arch, std::env::consts::ARCH);
        assert_eq!(info.is_admin, is_admin());
    }

    #[test]
    fn unknown_platform_gets_unavailable_backend() {
        let sandbox = create_sandbox_for(PlatformKind::Unknown, SandboxSettings::default())
            .expect("factory never fails for unknown");
        assert_eq!(sandbox.name(), "unavailable");
    }

    #[test]
    fn factory_creates_the_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("nested").join("root");
        let sandbox = create_sandbox(SandboxSettings::default().with_root(&root))
            .expect("create sandbox");
        assert!(root.is_dir());
        assert_eq!(sandbox.settings().root, root);
    }

    #[test]
    fn default_sandbox_is_shared() {
        let first = default_sandbox().expect("default sandbox");
        let second = default_sandbox().expect("default sandbox");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
