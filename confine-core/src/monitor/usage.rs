use std::fmt;

use serde::{Deserialize, Serialize};

/// Aggregated usage of a monitored process tree at one sampling tick.
///
/// IO and network counters are cumulative since monitoring started.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    /// Running maximum of `memory_bytes`; never decreases.
    pub peak_memory_bytes: u64,
    pub io_read_bytes: u64,
    pub io_write_bytes: u64,
    pub io_read_count: u64,
    pub io_write_count: u64,
    pub thread_count: u32,
    pub process_count: u32,
    pub open_files_count: u32,
    /// Host-wide interface counters; processes have no per-pid equivalent.
    pub network_sent_bytes: u64,
    pub network_recv_bytes: u64,
    pub network_connections: u32,
    /// Seconds since monitoring started.
    pub elapsed_time: f64,
}

/// A limit the monitored tree went past.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitViolation {
    /// Field name on `ResourceLimits`, e.g. `max_memory`.
    pub limit_name: &'static str,
    pub observed: f64,
    pub limit: f64,
}

impl LimitViolation {
    pub fn is_time_limit(&self) -> bool {
        self.limit_name == "max_cpu_time"
    }
}

impl fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (observed {}, limit {})",
            self.limit_name, self.observed, self.limit
        )
    }
}
