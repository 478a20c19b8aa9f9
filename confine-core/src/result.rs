use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outcome of one sandboxed execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Negative values are the signal number that killed the process (Unix).
    pub exit_code: i32,
    /// Wall-clock seconds.
    pub execution_time: f64,
    /// Peak bytes observed; 0 when nothing could be measured.
    pub memory_usage: u64,
    pub error_message: Option<String>,
    /// Collected files keyed by path relative to the execution directory.
    pub output_files: BTreeMap<String, String>,
}

impl SandboxResult {
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> serde_json::Result<Self> {
        serde_json::from_value(Value::Object(map.clone()))
    }
}

impl fmt::Display for SandboxResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(
                f,
                "Success (exit code: {}, time: {:.2}s)",
                self.exit_code, self.execution_time
            )
        } else {
            write!(
                f,
                "Failure (exit code: {}, error: {})",
                self.exit_code,
                self.error_message.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_summarizes_success_and_failure() {
        let ok = SandboxResult {
            success: true,
            execution_time: 0.5,
            ..SandboxResult::default()
        };
        assert_eq!(ok.to_string(), "Success (exit code: 0, time: 0.50s)");

        let failed = SandboxResult {
            exit_code: 1,
            error_message: Some("Execution failed with exit code 1".into()),
            ..SandboxResult::default()
        };
        assert_eq!(
            failed.to_string(),
            "Failure (exit code: 1, error: Execution failed with exit code 1)"
        );
    }

    #[test]
    fn map_form_keeps_output_files_nested() {
        let mut result = SandboxResult {
            success: true,
            stdout: "hi\n".into(),
            ..SandboxResult::default()
        };
        result
            .output_files
            .insert("out/report.txt".into(), "done".into());

        let map = result.to_map();
        assert_eq!(map["output_files"], json!({"out/report.txt": "done"}));
        assert_eq!(map["error_message"], Value::Null);

        let back = SandboxResult::from_map(&map).expect("round trip");
        assert_eq!(back, result);
    }
}
