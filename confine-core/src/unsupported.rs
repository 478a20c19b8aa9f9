use async_trait::async_trait;
use tracing::warn;

use crate::backend::{CodeRequest, CommandRequest, SandboxBackend};
use crate::error::{Result, SandboxError};
use crate::result::SandboxResult;
use crate::settings::SandboxSettings;

/// Stand-in for hosts without a sandbox implementation. Every execution
/// fails with `SandboxError::Unavailable`.
#[derive(Debug, Clone)]
pub struct UnavailableSandbox {
    platform: String,
    settings: SandboxSettings,
}

impl UnavailableSandbox {
    pub fn new(platform: impl Into<String>, settings: SandboxSettings) -> Self {
        Self {
            platform: platform.into(),
            settings,
        }
    }

    fn refuse(&self) -> SandboxError {
        warn!(platform = %self.platform, "no sandbox available for this platform");
        SandboxError::Unavailable(self.platform.clone())
    }
}

#[async_trait]
impl SandboxBackend for UnavailableSandbox {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    async fn execute_command(&self, _request: CommandRequest) -> Result<SandboxResult> {
        Err(self.refuse())
    }

    async fn execute_code(&self, _request: CodeRequest) -> Result<SandboxResult> {
        Err(self.refuse())
    }
}
