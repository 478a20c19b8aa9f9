use serde::{Deserialize, Serialize};

use crate::constants::limits as defaults;

const MIB: u64 = 1024 * 1024;

/// Resource limits applied to every execution that does not bring its own.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LimitsConfig {
    /// Preset profile the individual values start from
    #[serde(default)]
    pub preset: ResourceLimitsPreset,

    /// CPU time / deadline in seconds (0 = use preset)
    #[serde(default)]
    pub max_cpu_time: f64,

    /// Memory ceiling in MiB (0 = use preset)
    #[serde(default)]
    pub max_memory_mb: u64,

    /// Process ceiling (0 = use preset)
    #[serde(default)]
    pub max_processes: u32,

    /// Largest file the child may write, in MiB (0 = use preset)
    #[serde(default)]
    pub max_file_size_mb: u64,

    /// Open file handles (0 = use preset)
    #[serde(default)]
    pub max_open_files: u32,

    #[serde(default)]
    pub network_access: bool,

    #[serde(default)]
    pub allow_file_write: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            preset: ResourceLimitsPreset::default(),
            max_cpu_time: 0.0,
            max_memory_mb: 0,
            max_processes: 0,
            max_file_size_mb: 0,
            max_open_files: 0,
            network_access: false,
            allow_file_write: false,
        }
    }
}

/// Resource limits preset
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLimitsPreset {
    /// Limits suitable for untrusted snippets
    #[default]
    Conservative,
    /// Room for test suites and small builds
    Moderate,
    /// Long-running trusted jobs
    Generous,
    /// No limits at all
    Unlimited,
    /// Only the individual settings apply; zero means unlimited
    Custom,
}

/// Concrete limit values after applying a preset and its overrides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedLimits {
    pub max_cpu_time: f64,
    pub max_memory: u64,
    pub max_processes: u32,
    pub max_file_size: u64,
    pub max_open_files: u32,
    pub network_access: bool,
    pub allow_file_write: bool,
}

impl ResourceLimitsPreset {
    /// `(cpu seconds, memory MiB, processes, file size MiB, open files)`
    fn values(self) -> (f64, u64, u32, u64, u32) {
        match self {
            Self::Conservative => (
                defaults::MAX_CPU_TIME_SECS,
                defaults::MAX_MEMORY_MB,
                defaults::MAX_PROCESSES,
                defaults::MAX_FILE_SIZE_MB,
                defaults::MAX_OPEN_FILES,
            ),
            Self::Moderate => (120.0, 1024, 32, 100, 64),
            Self::Generous => (600.0, 4096, 128, 1024, 256),
            Self::Unlimited | Self::Custom => (0.0, 0, 0, 0, 0),
        }
    }
}

impl LimitsConfig {
    pub fn resolve(&self) -> ResolvedLimits {
        let (cpu, memory_mb, processes, file_mb, open_files) = self.preset.values();
        let pick_f = |custom: f64, preset: f64| if custom > 0.0 { custom } else { preset };
        let pick = |custom: u64, preset: u64| if custom > 0 { custom } else { preset };

        ResolvedLimits {
            max_cpu_time: pick_f(self.max_cpu_time, cpu),
            max_memory: pick(self.max_memory_mb, memory_mb) * MIB,
            max_processes: pick(u64::from(self.max_processes), u64::from(processes)) as u32,
            max_file_size: pick(self.max_file_size_mb, file_mb) * MIB,
            max_open_files: pick(u64::from(self.max_open_files), u64::from(open_files)) as u32,
            network_access: self.network_access,
            allow_file_write: self.allow_file_write,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resolves_to_conservative_values() {
        let resolved = LimitsConfig::default().resolve();
        assert_eq!(resolved.max_cpu_time, 30.0);
        assert_eq!(resolved.max_memory, 512 * MIB);
        assert_eq!(resolved.max_processes, 10);
        assert_eq!(resolved.max_file_size, 10 * MIB);
        assert_eq!(resolved.max_open_files, 20);
        assert!(!resolved.network_access);
        assert!(!resolved.allow_file_write);
    }

    #[test]
    fn overrides_win_over_preset() {
        let config = LimitsConfig {
            preset: ResourceLimitsPreset::Moderate,
            max_memory_mb: 64,
            ..LimitsConfig::default()
        };
        let resolved = config.resolve();
        assert_eq!(resolved.max_memory, 64 * MIB);
        assert_eq!(resolved.max_cpu_time, 120.0);
    }

    #[test]
    fn unlimited_preset_is_all_zero() {
        let config = LimitsConfig {
            preset: ResourceLimitsPreset::Unlimited,
            ..LimitsConfig::default()
        };
        let resolved = config.resolve();
        assert_eq!(resolved.max_cpu_time, 0.0);
        assert_eq!(resolved.max_memory, 0);
        assert_eq!(resolved.max_open_files, 0);
    }
}
