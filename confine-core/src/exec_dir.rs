//! Per-execution scratch directories.
//!
//! An owned `ExecutionDirectory` is removed when it is dropped, on every exit
//! path including errors and panics. A borrowed one wraps a caller-supplied
//! working directory and is never deleted.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, SandboxError};

#[derive(Debug)]
pub struct ExecutionDirectory {
    path: PathBuf,
    owned: bool,
}

impl ExecutionDirectory {
    /// Create `<root>/<uuid-v4>`, creating `root` first if needed.
    pub fn create(root: &Path) -> Result<Self> {
        let path = root.join(Uuid::new_v4().to_string());
        fs::create_dir_all(&path).map_err(|err| SandboxError::exec_dir(&path, err))?;
        debug!(exec_dir = %path.display(), "created execution directory");
        Ok(Self { path, owned: true })
    }

    /// Wrap an existing directory without taking ownership of it.
    pub fn borrowed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owned: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Resolve `relative` inside the directory. Absolute paths and `..`
    /// components are rejected.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let clean = confined_relative(relative)
            .ok_or_else(|| SandboxError::InvalidPath(relative.to_string()))?;
        Ok(self.path.join(clean))
    }

    /// Write `contents` to `relative`, creating parent directories.
    pub fn write_file(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let target = self.resolve(relative)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| SandboxError::exec_dir(parent, err))?;
        }
        fs::write(&target, contents).map_err(|err| SandboxError::exec_dir(&target, err))?;
        Ok(target)
    }

    /// Like `write_file`, then mark the file executable on Unix.
    pub fn write_executable(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let target = self.write_file(relative, contents)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(0o755))
                .map_err(|err| SandboxError::exec_dir(&target, err))?;
        }
        Ok(target)
    }

    pub fn read_file(&self, relative: &str) -> Result<String> {
        let target = self.resolve(relative)?;
        let bytes = fs::read(&target).map_err(|err| SandboxError::exec_dir(&target, err))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Files matching any of the glob `patterns`, keyed by their path relative
    /// to the directory with `/` separators. Directories, symlinks, files
    /// resolving outside the directory and unreadable files are skipped;
    /// invalid or escaping patterns are logged and ignored.
    pub fn collect_outputs(&self, patterns: &[String]) -> BTreeMap<String, String> {
        let mut outputs = BTreeMap::new();
        if patterns.is_empty() {
            return outputs;
        }
        let canonical_root = match fs::canonicalize(&self.path) {
            Ok(root) => root,
            Err(err) => {
                warn!(exec_dir = %self.path.display(), error = %err, "cannot collect outputs");
                return outputs;
            }
        };
        let base = glob::Pattern::escape(&self.path.to_string_lossy());

        for pattern in patterns {
            let Some(clean) = confined_relative(pattern) else {
                warn!(pattern = %pattern, "ignoring output pattern outside the execution directory");
                continue;
            };
            let full = format!("{base}/{}", slash_joined(&clean));
            let entries = match glob::glob(&full) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(pattern = %pattern, error = %err, "ignoring invalid output pattern");
                    continue;
                }
            };
            for path in entries.flatten() {
                let Some(key) = self.output_key(&path, &canonical_root) else {
                    continue;
                };
                match fs::read(&path) {
                    Ok(bytes) => {
                        outputs.insert(key, String::from_utf8_lossy(&bytes).into_owned());
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping unreadable output file");
                    }
                }
            }
        }
        outputs
    }

    /// Key for a matched path, or `None` when it is not a regular file that
    /// really lives under the directory.
    fn output_key(&self, path: &Path, canonical_root: &Path) -> Option<String> {
        let metadata = fs::symlink_metadata(path).ok()?;
        if !metadata.file_type().is_file() {
            if metadata.file_type().is_symlink() {
                debug!(path = %path.display(), "skipping symlinked output");
            }
            return None;
        }
        let canonical = fs::canonicalize(path).ok()?;
        if !canonical.starts_with(canonical_root) {
            debug!(path = %path.display(), "skipping output outside the execution directory");
            return None;
        }
        Some(slash_joined(path.strip_prefix(&self.path).ok()?))
    }
}

fn slash_joined(path: &Path) -> String {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// `relative` with `.` components dropped, or `None` if it is empty,
/// absolute or climbs out with `..`.
fn confined_relative(relative: &str) -> Option<PathBuf> {
    if relative.trim().is_empty() {
        return None;
    }
    let mut clean = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!clean.as_os_str().is_empty()).then_some(clean)
}

impl Drop for ExecutionDirectory {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(exec_dir = %self.path.display(), "removed execution directory"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                exec_dir = %self.path.display(),
                error = %err,
                "failed to remove execution directory"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn owned_directory_is_removed_on_drop() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = ExecutionDirectory::create(root.path()).expect("create");
        let path = dir.path().to_path_buf();
        dir.write_file("nested/a.txt", "x").expect("write");
        assert!(path.join("nested/a.txt").is_file());

        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn borrowed_directory_survives_drop() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = ExecutionDirectory::borrowed(root.path());
        dir.write_file("keep.txt", "x").expect("write");
        drop(dir);
        assert!(root.path().join("keep.txt").is_file());
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = ExecutionDirectory::borrowed(root.path());
        for bad in ["../outside.txt", "a/../../b", "", "."] {
            assert!(
                matches!(dir.resolve(bad), Err(SandboxError::InvalidPath(_))),
                "{bad:?} should be rejected"
            );
        }
        #[cfg(unix)]
        assert!(dir.resolve("/etc/passwd").is_err());
        assert!(dir.resolve("./sub/ok.txt").is_ok());
    }

    #[test]
    fn outputs_are_keyed_relative_to_directory() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = ExecutionDirectory::create(root.path()).expect("create");
        dir.write_file("out.txt", "top").expect("write");
        dir.write_file("reports/summary.txt", "nested").expect("write");
        dir.write_file("data.csv", "1,2").expect("write");

        let outputs = dir.collect_outputs(&["*.txt".to_string(), "reports/*.txt".to_string()]);
        let keys: Vec<_> = outputs.keys().cloned().collect();
        assert_eq!(keys, vec!["out.txt".to_string(), "reports/summary.txt".to_string()]);
        assert_eq!(outputs["reports/summary.txt"], "nested");
    }

    #[test]
    fn invalid_pattern_is_skipped() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = ExecutionDirectory::create(root.path()).expect("create");
        dir.write_file("a.txt", "a").expect("write");
        let outputs = dir.collect_outputs(&["[".to_string(), "*.txt".to_string()]);
        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn escaping_patterns_collect_nothing() {
        let root = tempfile::tempdir().expect("tempdir");
        fs::write(root.path().join("sibling.log"), "SIBLING").expect("write sibling");
        let dir = ExecutionDirectory::create(root.path()).expect("create");
        dir.write_file("own.log", "mine").expect("write");

        let outputs = dir.collect_outputs(&[
            "../*.log".to_string(),
            "sub/../../*.log".to_string(),
            format!("{}/*.log", root.path().display()),
        ]);
        assert!(outputs.is_empty(), "{outputs:?}");

        let outputs = dir.collect_outputs(&["./*.log".to_string()]);
        assert_eq!(outputs.keys().collect::<Vec<_>>(), vec!["own.log"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_outputs_are_not_followed() {
        let host = tempfile::tempdir().expect("host dir");
        let secret = host.path().join("secret.txt");
        fs::write(&secret, "HOST-SECRET").expect("write secret");

        let root = tempfile::tempdir().expect("tempdir");
        let dir = ExecutionDirectory::create(root.path()).expect("create");
        dir.write_file("real.txt", "fine").expect("write");
        std::os::unix::fs::symlink(&secret, dir.path().join("leak.txt")).expect("symlink file");
        std::os::unix::fs::symlink(host.path(), dir.path().join("linked")).expect("symlink dir");

        let outputs = dir.collect_outputs(&["*.txt".to_string(), "linked/*.txt".to_string()]);
        assert_eq!(outputs.len(), 1, "{outputs:?}");
        assert_eq!(outputs["real.txt"], "fine");
    }

    #[cfg(unix)]
    #[test]
    fn executable_bit_is_set() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().expect("tempdir");
        let dir = ExecutionDirectory::create(root.path()).expect("create");
        let script = dir.write_executable("run.sh", "echo hi").expect("write");
        let mode = fs::metadata(script).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
