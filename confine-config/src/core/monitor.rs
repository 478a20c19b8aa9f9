use serde::{Deserialize, Serialize};

use crate::constants::monitor as defaults;

/// Live resource sampling attached to each execution.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sampling period in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Aggregate usage across the whole descendant tree
    #[serde(default = "default_true")]
    pub include_children: bool,

    /// Upper bound on waiting for the sampler thread to exit
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_ms: default_interval_ms(),
            include_children: default_true(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    defaults::INTERVAL_MS
}

fn default_stop_timeout_ms() -> u64 {
    defaults::STOP_TIMEOUT_MS
}
