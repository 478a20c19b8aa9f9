//! Resource ceilings for a single execution.

use confine_config::ResolvedLimits;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const MIB: u64 = 1024 * 1024;

/// Limits enforced on one execution. Zero means "unlimited" for every numeric
/// field.
///
/// `max_cpu_time` doubles as the wall-clock deadline for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Seconds.
    pub max_cpu_time: f64,
    /// Bytes.
    pub max_memory: u64,
    pub max_processes: u32,
    /// Bytes.
    pub max_file_size: u64,
    pub max_open_files: u32,
    /// Recorded and reported; never enforced at the OS level.
    pub network_access: bool,
    pub allow_file_write: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_cpu_time: 30.0,
            max_memory: 512 * MIB,
            max_processes: 10,
            max_file_size: 10 * MIB,
            max_open_files: 20,
            network_access: false,
            allow_file_write: false,
        }
    }
}

impl ResourceLimits {
    pub fn with_cpu_time(mut self, seconds: f64) -> Self {
        self.max_cpu_time = seconds;
        self
    }

    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.max_memory = bytes;
        self
    }

    pub fn with_processes(mut self, count: u32) -> Self {
        self.max_processes = count;
        self
    }

    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_open_files(mut self, count: u32) -> Self {
        self.max_open_files = count;
        self
    }

    pub fn with_network_access(mut self, allowed: bool) -> Self {
        self.network_access = allowed;
        self
    }

    pub fn with_file_write(mut self, allowed: bool) -> Self {
        self.allow_file_write = allowed;
        self
    }

    /// Limits with every ceiling removed.
    pub fn unlimited() -> Self {
        Self {
            max_cpu_time: 0.0,
            max_memory: 0,
            max_processes: 0,
            max_file_size: 0,
            max_open_files: 0,
            network_access: true,
            allow_file_write: true,
        }
    }

    /// Deadline for the run, if any. Values too large for a `Duration`
    /// mean no deadline.
    pub fn deadline(&self) -> Option<std::time::Duration> {
        if self.max_cpu_time > 0.0 {
            std::time::Duration::try_from_secs_f64(self.max_cpu_time).ok()
        } else {
            None
        }
    }

    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Build limits from a key-value map. Missing keys keep their defaults;
    /// unknown keys are ignored.
    pub fn from_map(map: &Map<String, Value>) -> serde_json::Result<Self> {
        serde_json::from_value(Value::Object(map.clone()))
    }
}

impl From<ResolvedLimits> for ResourceLimits {
    fn from(resolved: ResolvedLimits) -> Self {
        Self {
            max_cpu_time: resolved.max_cpu_time,
            max_memory: resolved.max_memory,
            max_processes: resolved.max_processes,
            max_file_size: resolved.max_file_size,
            max_open_files: resolved.max_open_files,
            network_access: resolved.network_access,
            allow_file_write: resolved.allow_file_write,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_values() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.max_cpu_time, 30.0);
        assert_eq!(limits.max_memory, 536_870_912);
        assert_eq!(limits.max_processes, 10);
        assert_eq!(limits.max_file_size, 10_485_760);
        assert_eq!(limits.max_open_files, 20);
        assert!(!limits.network_access);
        assert!(!limits.allow_file_write);
    }

    #[test]
    fn map_uses_field_names_as_keys() {
        let map = ResourceLimits::default().with_cpu_time(2.0).to_map();
        assert_eq!(map["max_cpu_time"], json!(2.0));
        assert_eq!(map["max_memory"], json!(536_870_912u64));
        assert_eq!(map.len(), 7);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let mut map = Map::new();
        map.insert("max_memory".into(), json!(1024));
        map.insert("network_access".into(), json!(true));
        map.insert("something_else".into(), json!("ignored"));

        let limits = ResourceLimits::from_map(&map).expect("valid map");
        assert_eq!(limits.max_memory, 1024);
        assert!(limits.network_access);
        assert_eq!(limits.max_cpu_time, 30.0);
        assert_eq!(limits.max_open_files, 20);
    }

    #[test]
    fn zero_cpu_time_has_no_deadline() {
        assert!(ResourceLimits::default().with_cpu_time(0.0).deadline().is_none());
        assert_eq!(
            ResourceLimits::default().with_cpu_time(1.5).deadline(),
            Some(std::time::Duration::from_millis(1500))
        );
    }

    #[test]
    fn oversized_cpu_time_has_no_deadline() {
        for seconds in [1e30, f64::MAX, f64::INFINITY, f64::NAN] {
            assert!(
                ResourceLimits::default().with_cpu_time(seconds).deadline().is_none(),
                "{seconds} should not produce a deadline"
            );
        }
    }
}
