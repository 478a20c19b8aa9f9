//! Permission checks in front of a backend.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::backend::{CodeRequest, CommandRequest, SandboxBackend};
use crate::error::Result;
use crate::limits::ResourceLimits;
use crate::permissions::{Permission, PermissionManager};
use crate::result::SandboxResult;
use crate::settings::SandboxSettings;

/// A backend that refuses requests the acting tool is not allowed to make.
///
/// Checks run before any directory is created or process spawned.
#[derive(Clone)]
pub struct GuardedSandbox {
    inner: Arc<dyn SandboxBackend>,
    permissions: Arc<PermissionManager>,
    tool: Option<String>,
}

impl std::fmt::Debug for GuardedSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedSandbox")
            .field("backend", &self.inner.name())
            .field("tool", &self.tool)
            .finish()
    }
}

impl GuardedSandbox {
    pub fn new(inner: Arc<dyn SandboxBackend>, permissions: Arc<PermissionManager>) -> Self {
        Self {
            inner,
            permissions,
            tool: None,
        }
    }

    /// Same backend and manager, judged as `tool`.
    pub fn for_tool(&self, tool: impl Into<String>) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            permissions: Arc::clone(&self.permissions),
            tool: Some(tool.into()),
        }
    }

    pub fn tool(&self) -> Option<&str> {
        self.tool.as_deref()
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.permissions
    }

    pub fn inner(&self) -> &Arc<dyn SandboxBackend> {
        &self.inner
    }

    fn authorize(&self, required: &[Permission]) -> Result<()> {
        let tool = self.tool.as_deref();
        if let Err(denied) = self
            .permissions
            .require_all(required.iter().copied(), tool)
        {
            warn!(tool = tool.unwrap_or("<default>"), permission = %denied.permission, "sandbox request denied");
            return Err(denied.into());
        }
        debug!(tool = tool.unwrap_or("<default>"), ?required, "sandbox request authorized");
        Ok(())
    }

    fn effective_limits(&self, limits: Option<ResourceLimits>) -> ResourceLimits {
        limits.unwrap_or(self.inner.settings().default_limits)
    }
}

/// Permissions a run needs beyond spawning a process.
fn required_permissions(
    limits: &ResourceLimits,
    runs_code: bool,
    sets_environment: bool,
) -> Vec<Permission> {
    let mut required = vec![Permission::CreateProcesses];
    if runs_code {
        required.push(Permission::ExecuteFiles);
    }
    if limits.allow_file_write {
        required.push(Permission::WriteFiles);
    }
    if limits.network_access {
        required.push(Permission::NetworkAccess);
    }
    if sets_environment {
        required.push(Permission::ModifyEnvironment);
    }
    required
}

#[async_trait]
impl SandboxBackend for GuardedSandbox {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn settings(&self) -> &SandboxSettings {
        self.inner.settings()
    }

    async fn execute_command(&self, request: CommandRequest) -> Result<SandboxResult> {
        let limits = self.effective_limits(request.limits);
        self.authorize(&required_permissions(
            &limits,
            false,
            request.environment.is_some(),
        ))?;
        self.inner.execute_command(request).await
    }

    async fn execute_code(&self, request: CodeRequest) -> Result<SandboxResult> {
        let limits = self.effective_limits(request.limits);
        self.authorize(&required_permissions(&limits, true, false))?;
        self.inner.execute_code(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;
    use crate::permissions::PermissionSet;
    use crate::unsupported::UnavailableSandbox;

    fn guarded(manager: PermissionManager) -> GuardedSandbox {
        let backend = Arc::new(UnavailableSandbox::new("test", SandboxSettings::default()));
        GuardedSandbox::new(backend, Arc::new(manager))
    }

    #[test]
    fn requirements_follow_the_request() {
        let limits = ResourceLimits::default();
        assert_eq!(
            required_permissions(&limits, false, false),
            vec![Permission::CreateProcesses]
        );

        let open = limits.with_file_write(true).with_network_access(true);
        assert_eq!(
            required_permissions(&open, true, true),
            vec![
                Permission::CreateProcesses,
                Permission::ExecuteFiles,
                Permission::WriteFiles,
                Permission::NetworkAccess,
                Permission::ModifyEnvironment,
            ]
        );
    }

    #[tokio::test]
    async fn restricted_manager_blocks_process_creation() {
        let sandbox = guarded(PermissionManager::restricted());
        let err = sandbox
            .execute_command(CommandRequest::new(["echo", "hi"]))
            .await
            .expect_err("denied");
        match err {
            SandboxError::PermissionDenied(denied) => {
                assert_eq!(denied.permission, Permission::CreateProcesses);
                assert_eq!(denied.tool, None);
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn allowed_requests_reach_the_backend() {
        let sandbox = guarded(PermissionManager::standard());
        let err = sandbox
            .execute_code(CodeRequest::new("print(1)", "python"))
            .await
            .expect_err("backend is unavailable");
        assert!(matches!(err, SandboxError::Unavailable(_)));
    }

    #[tokio::test]
    async fn tool_overrides_apply() {
        let manager = PermissionManager::standard();
        let mut no_network = PermissionSet::standard();
        no_network.remove(Permission::NetworkAccess);
        manager.set_tool_permissions("fetcher", no_network);
        let sandbox = guarded(manager).for_tool("fetcher");

        let request = CommandRequest::new(["curl", "example.com"])
            .limits(ResourceLimits::default().with_network_access(true));
        let err = sandbox.execute_command(request).await.expect_err("denied");
        assert_eq!(
            err.to_string(),
            "Permission 'NETWORK_ACCESS' required for tool 'fetcher'"
        );
    }

    #[tokio::test]
    async fn environment_override_needs_modify_environment() {
        let sandbox = guarded(PermissionManager::standard());
        let err = sandbox
            .execute_command(CommandRequest::new(["env"]).env("A", "1"))
            .await
            .expect_err("denied");
        assert!(
            matches!(err, SandboxError::PermissionDenied(ref denied) if denied.permission == Permission::ModifyEnvironment)
        );
    }
}
