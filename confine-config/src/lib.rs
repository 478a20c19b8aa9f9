//! Configuration for the confine sandbox.
//!
//! `ConfineConfig` is deserialized from layered `confine.toml` files (system,
//! user, workspace, runtime overrides) merged table by table. Every section
//! has serde defaults, so an empty file, or no file at all, yields the
//! built-in limits.

pub mod constants;
pub mod core;
pub mod loader;
mod root;

pub use crate::core::{
    LimitsConfig, LogLevel, LoggingConfig, MonitorConfig, PermissionPolicy, PermissionsConfig,
    ResolvedLimits, ResourceLimitsPreset, SandboxConfig, ToolPermissionsConfig,
};
pub use loader::{ConfigBuilder, ConfigManager, ConfigSearchPaths};
pub use root::ConfineConfig;
