use anyhow::{Result, bail, ensure};
use serde::{Deserialize, Serialize};

use crate::core::{LimitsConfig, LoggingConfig, MonitorConfig, PermissionsConfig, SandboxConfig};

/// Effective configuration after all layers are merged.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ConfineConfig {
    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub permissions: PermissionsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ConfineConfig {
    pub fn validate(&self) -> Result<()> {
        let cpu = self.limits.max_cpu_time;
        if !cpu.is_finite() || cpu < 0.0 {
            bail!("limits.max_cpu_time must be a non-negative number of seconds, got {cpu}");
        }
        ensure!(
            self.monitor.interval_ms > 0,
            "monitor.interval_ms must be greater than zero"
        );
        ensure!(
            self.monitor.stop_timeout_ms > 0,
            "monitor.stop_timeout_ms must be greater than zero"
        );
        for (tool, entry) in &self.permissions.tools {
            ensure!(!tool.trim().is_empty(), "permissions.tools has an empty tool name");
            if let Some(name) = entry
                .allow
                .iter()
                .chain(&entry.deny)
                .find(|name| name.trim().is_empty())
            {
                bail!("permissions.tools.{tool} contains a blank permission name {name:?}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ConfineConfig::default().validate().is_ok());
    }

    #[test]
    fn negative_cpu_time_is_rejected() {
        let mut config = ConfineConfig::default();
        config.limits.max_cpu_time = -1.0;
        let err = config.validate().expect_err("negative cpu time");
        assert!(err.to_string().contains("max_cpu_time"));
    }

    #[test]
    fn zero_monitor_interval_is_rejected() {
        let mut config = ConfineConfig::default();
        config.monitor.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config: ConfineConfig = toml::from_str("").expect("parse empty");
        assert_eq!(config, ConfineConfig::default());
    }
}
