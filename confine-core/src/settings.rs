use std::path::PathBuf;
use std::time::Duration;

use confine_config::{ConfineConfig, MonitorConfig, SandboxConfig};
use confine_process::DEFAULT_TERMINATION_GRACE;

use crate::limits::ResourceLimits;

const DEFAULT_OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runtime knobs shared by every backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSettings {
    /// Parent of every execution directory.
    pub root: PathBuf,
    /// Applied when a request carries no limits of its own.
    pub default_limits: ResourceLimits,
    pub monitor: MonitorConfig,
    pub termination_grace: Duration,
    /// How long to keep draining pipes after the child was reaped.
    pub output_drain_timeout: Duration,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            root: SandboxConfig::default().resolved_root(),
            default_limits: ResourceLimits::default(),
            monitor: MonitorConfig::default(),
            termination_grace: DEFAULT_TERMINATION_GRACE,
            output_drain_timeout: DEFAULT_OUTPUT_DRAIN_TIMEOUT,
        }
    }
}

impl SandboxSettings {
    pub fn from_config(config: &ConfineConfig) -> Self {
        Self {
            root: config.sandbox.resolved_root(),
            default_limits: config.limits.resolve().into(),
            monitor: config.monitor.clone(),
            termination_grace: Duration::from_millis(config.sandbox.termination_grace_ms),
            output_drain_timeout: Duration::from_millis(config.sandbox.output_drain_timeout_ms),
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_default_limits(mut self, limits: ResourceLimits) -> Self {
        self.default_limits = limits;
        self
    }

    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confine_config::ResourceLimitsPreset;

    #[test]
    fn config_drives_settings() {
        let mut config = ConfineConfig::default();
        config.limits.preset = ResourceLimitsPreset::Moderate;
        config.sandbox.root = Some(PathBuf::from("/srv/confine"));
        config.sandbox.termination_grace_ms = 50;
        config.monitor.enabled = false;

        let settings = SandboxSettings::from_config(&config);
        assert_eq!(settings.root, PathBuf::from("/srv/confine"));
        assert_eq!(settings.default_limits.max_cpu_time, 120.0);
        assert_eq!(settings.default_limits.max_memory, 1024 * 1024 * 1024);
        assert_eq!(settings.termination_grace, Duration::from_millis(50));
        assert!(!settings.monitor.enabled);
    }

    #[test]
    fn defaults_match_builtin_limits() {
        let settings = SandboxSettings::default();
        assert_eq!(settings.default_limits, ResourceLimits::default());
        assert!(settings.root.ends_with("confine_sandbox"));
        assert!(settings.termination_grace.is_zero());
        assert!(
            SandboxSettings::from_config(&ConfineConfig::default())
                .termination_grace
                .is_zero()
        );
    }
}
