use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::permissions::PermissionDenied;

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Failures that prevent an execution from producing a `SandboxResult`.
///
/// Timeouts and limit violations are not errors: they come back as a
/// `SandboxResult` with `success == false`.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),

    #[error("no interpreter found for {language} (tried: {})", candidates.join(", "))]
    InterpreterNotFound {
        language: String,
        candidates: Vec<String>,
    },

    #[error("command is empty")]
    EmptyCommand,

    #[error("failed to prepare execution directory {}: {source}", path.display())]
    ExecutionDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("path '{0}' escapes the execution directory")]
    InvalidPath(String),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The OS refused to set up process containment (job object, limits).
    #[error("failed to contain process: {0}")]
    Containment(String),

    #[error("sandbox is not available on this platform ({0})")]
    Unavailable(String),

    #[error("process {0} does not exist")]
    ProcessNotFound(u32),

    #[error("resource monitor error: {0}")]
    Monitor(String),

    #[error(transparent)]
    PermissionDenied(#[from] PermissionDenied),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SandboxError {
    pub(crate) fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    pub(crate) fn exec_dir(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::ExecutionDirectory {
            path: path.into(),
            source,
        }
    }
}
