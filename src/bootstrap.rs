//! Wiring a ready-to-use sandbox from `confine.toml`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use confine_config::{ConfigManager, ConfineConfig};
use confine_core::{
    GuardedSandbox, PermissionManager, SandboxBackend, SandboxSettings, create_sandbox,
};
use tracing::info;

/// A configured backend and the permission manager guarding it.
#[derive(Debug, Clone)]
pub struct Confine {
    config: ConfineConfig,
    sandbox: GuardedSandbox,
}

impl Confine {
    /// Load layered configuration (see `ConfigManager::load`) and build.
    pub fn load() -> Result<Self> {
        let manager = ConfigManager::load().context("Failed to load confine configuration")?;
        Self::from_config(manager.into_config())
    }

    /// Load with `workspace` as the project root.
    pub fn load_from_workspace(workspace: impl AsRef<Path>) -> Result<Self> {
        let manager = ConfigManager::load_from_workspace(workspace)
            .context("Failed to load confine configuration")?;
        Self::from_config(manager.into_config())
    }

    pub fn from_config(config: ConfineConfig) -> Result<Self> {
        config.validate().context("Invalid confine configuration")?;

        let settings = SandboxSettings::from_config(&config);
        let backend = create_sandbox(settings).context("Failed to create sandbox backend")?;
        let permissions = PermissionManager::from_config(&config.permissions)
            .context("Invalid permission table")?;
        info!(
            backend = backend.name(),
            root = %backend.settings().root.display(),
            policy = ?config.permissions.default_policy,
            "sandbox ready"
        );

        Ok(Self {
            sandbox: GuardedSandbox::new(backend, Arc::new(permissions)),
            config,
        })
    }

    pub fn config(&self) -> &ConfineConfig {
        &self.config
    }

    /// The guarded sandbox, judged with the default permission set.
    pub fn sandbox(&self) -> &GuardedSandbox {
        &self.sandbox
    }

    /// The guarded sandbox, judged as `tool`.
    pub fn sandbox_for(&self, tool: &str) -> GuardedSandbox {
        self.sandbox.for_tool(tool)
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        self.sandbox.permissions()
    }

    /// The unguarded backend, for callers doing their own gating.
    pub fn backend(&self) -> &Arc<dyn SandboxBackend> {
        self.sandbox.inner()
    }
}
