/// Configuration file name looked up in each layer.
pub const CONFIG_FILE_NAME: &str = "confine.toml";

/// Directory under the user's home holding the user layer.
pub const USER_CONFIG_DIR: &str = ".confine";

/// System-wide layer (Unix only).
pub const SYSTEM_CONFIG_PATH: &str = "/etc/confine/confine.toml";

/// Explicit configuration file, bypasses the workspace lookup.
pub const ENV_CONFIG_PATH: &str = "CONFINE_CONFIG_PATH";

/// Workspace directory to load `confine.toml` from.
pub const ENV_WORKSPACE: &str = "CONFINE_WORKSPACE";

pub mod limits {
    pub const MAX_CPU_TIME_SECS: f64 = 30.0;
    pub const MAX_MEMORY_MB: u64 = 512;
    pub const MAX_PROCESSES: u32 = 10;
    pub const MAX_FILE_SIZE_MB: u64 = 10;
    pub const MAX_OPEN_FILES: u32 = 20;
}

pub mod monitor {
    pub const INTERVAL_MS: u64 = 100;
    pub const STOP_TIMEOUT_MS: u64 = 1000;
}

pub mod sandbox {
    /// Directory created under the system temp dir when no root is configured.
    pub const ROOT_DIR_NAME: &str = "confine_sandbox";
    pub const TERMINATION_GRACE_MS: u64 = 0;
    pub const OUTPUT_DRAIN_TIMEOUT_MS: u64 = 2000;
}
