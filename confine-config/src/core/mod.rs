pub mod limits;
pub mod logging;
pub mod monitor;
pub mod permissions;
pub mod sandbox;

pub use limits::{LimitsConfig, ResolvedLimits, ResourceLimitsPreset};
pub use logging::{LogLevel, LoggingConfig};
pub use monitor::MonitorConfig;
pub use permissions::{PermissionPolicy, PermissionsConfig, ToolPermissionsConfig};
pub use sandbox::SandboxConfig;
