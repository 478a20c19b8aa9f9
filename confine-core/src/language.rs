//! Fixed table of languages `execute_code` understands.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, SandboxError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    Shell,
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Self::Python),
            "javascript" | "js" | "node" | "nodejs" => Ok(Self::JavaScript),
            "shell" | "bash" | "sh" | "batch" | "bat" | "cmd" => Ok(Self::Shell),
            _ => Err(SandboxError::UnsupportedLanguage(s.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Shell => "shell",
        })
    }
}

impl Language {
    /// Extension of the entry file written into the execution directory.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::JavaScript => "js",
            Self::Shell if cfg!(windows) => "bat",
            Self::Shell => "sh",
        }
    }

    pub fn entry_file_name(self) -> String {
        format!("main.{}", self.extension())
    }

    /// Interpreters to look for on `PATH`, in order of preference.
    pub fn interpreter_candidates(self) -> &'static [&'static str] {
        match self {
            Self::Python if cfg!(windows) => &["python", "python3", "py"],
            Self::Python => &["python3", "python"],
            Self::JavaScript => &["node", "nodejs"],
            Self::Shell if cfg!(windows) => &["cmd"],
            Self::Shell => &["bash", "sh"],
        }
    }

    /// Runtimes that reserve large virtual address ranges and spawn helper
    /// threads at startup. They do not survive `RLIMIT_AS` or a tight
    /// `RLIMIT_NPROC`/`RLIMIT_NOFILE`, so their memory is policed by the
    /// monitor and a heap flag instead.
    pub fn reserves_address_space(self) -> bool {
        matches!(self, Self::JavaScript)
    }

    pub fn resolve_interpreter(self) -> Result<PathBuf> {
        let candidates = self.interpreter_candidates();
        candidates
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| SandboxError::InterpreterNotFound {
                language: self.to_string(),
                candidates: candidates.iter().map(|c| c.to_string()).collect(),
            })
    }

    /// argv that runs `entry` with `interpreter`.
    ///
    /// `memory_limit` (bytes, 0 = none) becomes a V8 heap cap for JavaScript.
    pub fn command_line(self, interpreter: &Path, entry: &Path, memory_limit: u64) -> Vec<String> {
        let interpreter = interpreter.to_string_lossy().into_owned();
        let entry = entry.to_string_lossy().into_owned();
        match self {
            Self::Python => vec![interpreter, "-u".into(), entry],
            Self::JavaScript if memory_limit > 0 => {
                let heap_mb = (memory_limit / (1024 * 1024)).max(16);
                vec![interpreter, format!("--max-old-space-size={heap_mb}"), entry]
            }
            Self::JavaScript => vec![interpreter, entry],
            Self::Shell if cfg!(windows) => vec![interpreter, "/C".into(), entry],
            Self::Shell => vec![interpreter, entry],
        }
    }
}
