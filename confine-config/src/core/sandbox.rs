use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::sandbox as defaults;

/// Where executions run and how they are torn down.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Parent of every execution directory. Unset means
    /// `<temp>/confine_sandbox`.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Pause between SIGTERM and SIGKILL when a deadline expires. Zero sends
    /// SIGKILL right after SIGTERM.
    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,

    /// How long to keep reading output after the child is gone. Grandchildren
    /// that escaped the process group can hold the pipes open.
    #[serde(default = "default_output_drain_timeout_ms")]
    pub output_drain_timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: None,
            termination_grace_ms: default_termination_grace_ms(),
            output_drain_timeout_ms: default_output_drain_timeout_ms(),
        }
    }
}

impl SandboxConfig {
    pub fn resolved_root(&self) -> PathBuf {
        match &self.root {
            Some(root) if !root.as_os_str().is_empty() => root.clone(),
            _ => std::env::temp_dir().join(defaults::ROOT_DIR_NAME),
        }
    }
}

fn default_termination_grace_ms() -> u64 {
    defaults::TERMINATION_GRACE_MS
}

fn default_output_drain_timeout_ms() -> u64 {
    defaults::OUTPUT_DRAIN_TIMEOUT_MS
}
