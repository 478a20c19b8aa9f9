//! The contract every platform sandbox implements.
//!
//! Backends only implement `execute_command`; `execute_code` and the
//! per-language helpers are shared and end up there too.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::exec_dir::ExecutionDirectory;
use crate::language::Language;
use crate::limits::ResourceLimits;
use crate::result::SandboxResult;
use crate::settings::SandboxSettings;

/// Source code to run in a fresh execution directory.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeRequest {
    pub code: String,
    /// Language name or alias, e.g. `python3` or `js`.
    pub language: String,
    pub input: Option<String>,
    /// `None` uses the backend's default limits.
    pub limits: Option<ResourceLimits>,
    /// Extra files written next to the entry file, keyed by relative path.
    pub files: BTreeMap<String, String>,
    pub output_patterns: Vec<String>,
}

impl CodeRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
            input: None,
            limits: None,
            files: BTreeMap::new(),
            output_patterns: Vec::new(),
        }
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    pub fn files<I, P, C>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        self.files
            .extend(files.into_iter().map(|(path, contents)| (path.into(), contents.into())));
        self
    }

    pub fn output_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.output_patterns.push(pattern.into());
        self
    }

    pub fn output_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }
}

/// An argv vector to run under limits.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub command: Vec<String>,
    pub input: Option<String>,
    pub limits: Option<ResourceLimits>,
    /// Run here instead of a fresh execution directory. Never deleted.
    pub working_dir: Option<PathBuf>,
    /// Replaces the inherited environment when set.
    pub environment: Option<BTreeMap<String, String>>,
    pub output_patterns: Vec<String>,
    /// Skip the address-space, process and descriptor rlimits. Set for
    /// runtimes that cannot start under them; memory is then left to the
    /// monitor.
    pub(crate) relaxed_rlimits: bool,
}

impl CommandRequest {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            input: None,
            limits: None,
            working_dir: None,
            environment: None,
            output_patterns: Vec::new(),
            relaxed_rlimits: false,
        }
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add one variable, starting from an empty environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn output_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }
}

#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Short backend name for logs, e.g. `unix`.
    fn name(&self) -> &'static str;

    fn settings(&self) -> &SandboxSettings;

    async fn execute_command(&self, request: CommandRequest) -> Result<SandboxResult>;

    /// Write `request.code` to `main.<ext>` plus any extra files, then run it
    /// with the language's interpreter inside that directory.
    async fn execute_code(&self, request: CodeRequest) -> Result<SandboxResult> {
        let language: Language = request.language.parse()?;
        let interpreter = language.resolve_interpreter()?;
        let limits = request.limits.unwrap_or(self.settings().default_limits);

        let dir = self.create_execution_directory()?;
        let entry_name = language.entry_file_name();
        let entry = if language == Language::Shell {
            dir.write_executable(&entry_name, &request.code)?
        } else {
            dir.write_file(&entry_name, &request.code)?
        };
        for (path, contents) in &request.files {
            if is_script(path) {
                dir.write_executable(path, contents)?;
            } else {
                dir.write_file(path, contents)?;
            }
        }

        debug!(
            backend = self.name(),
            %language,
            interpreter = %interpreter.display(),
            exec_dir = %dir.path().display(),
            "executing code"
        );

        let mut command =
            CommandRequest::new(language.command_line(&interpreter, &entry, limits.max_memory))
                .limits(limits)
                .working_dir(dir.path())
                .output_patterns(request.output_patterns);
        command.input = request.input;
        command.relaxed_rlimits = language.reserves_address_space();

        let result = self.execute_command(command).await;
        drop(dir);
        result
    }

    async fn execute_python(
        &self,
        code: &str,
        limits: Option<ResourceLimits>,
    ) -> Result<SandboxResult> {
        self.execute_code(with_limits(CodeRequest::new(code, "python"), limits))
            .await
    }

    async fn execute_javascript(
        &self,
        code: &str,
        limits: Option<ResourceLimits>,
    ) -> Result<SandboxResult> {
        self.execute_code(with_limits(CodeRequest::new(code, "javascript"), limits))
            .await
    }

    async fn execute_shell(
        &self,
        script: &str,
        limits: Option<ResourceLimits>,
    ) -> Result<SandboxResult> {
        self.execute_code(with_limits(CodeRequest::new(script, "shell"), limits))
            .await
    }

    /// A fresh directory under the sandbox root, removed when dropped.
    fn create_execution_directory(&self) -> Result<ExecutionDirectory> {
        ExecutionDirectory::create(&self.settings().root)
    }
}

fn with_limits(request: CodeRequest, limits: Option<ResourceLimits>) -> CodeRequest {
    match limits {
        Some(limits) => request.limits(limits),
        None => request,
    }
}

fn is_script(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    [".sh", ".bat", ".cmd"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
}
