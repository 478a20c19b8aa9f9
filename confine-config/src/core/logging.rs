use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Tracing output. `RUST_LOG`, when set, replaces `level` and `targets`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Crates to enable `level` for; empty means the confine crates
    #[serde(default)]
    pub targets: Vec<String>,

    /// Append logs to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directive string built from the configured targets.
    pub fn filter_directive(&self) -> String {
        let level = self.level.as_str();
        if self.targets.is_empty() {
            return format!(
                "confine={level},confine_core={level},confine_process={level},confine_config={level}"
            );
        }
        self.targets
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_covers_workspace_crates_by_default() {
        let directive = LoggingConfig::default().filter_directive();
        assert!(directive.contains("confine_core=info"));
        assert!(directive.contains("confine_process=info"));
    }

    #[test]
    fn directive_uses_explicit_targets() {
        let config = LoggingConfig {
            level: LogLevel::Debug,
            targets: vec!["confine_core".into(), "my_app".into()],
            file: None,
        };
        assert_eq!(config.filter_directive(), "confine_core=debug,my_app=debug");
    }
}
