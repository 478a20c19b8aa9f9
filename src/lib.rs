//! Confine runs untrusted code and commands under resource limits.
//!
//! This crate ties the pieces together: `Confine` loads `confine.toml`,
//! builds the platform backend and wraps it in the configured permission
//! gate; `init_tracing` installs logging from the same file. The engine
//! itself lives in `confine-core`, configuration in `confine-config`.

mod bootstrap;
mod logging;

pub use bootstrap::Confine;
pub use logging::{env_filter, init_tracing};

pub use confine_config as config;
pub use confine_core::{
    CodeRequest, CommandRequest, GuardedSandbox, Permission, PermissionManager, PermissionSet,
    ResourceLimits, SandboxBackend, SandboxError, SandboxResult,
};
