use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Keeps file patches inside the root directory of their target.
///
/// A `file` entry such as `../../.bashrc`, or a symlink pointing out of an
/// extension, is rejected before anything is read or written.
#[derive(Debug, Clone)]
pub struct TargetGuard {
    /// Canonical path to the target root
    root: PathBuf,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("path must be relative to the target root: {path}")]
    AbsolutePath { path: PathBuf },

    #[error("path is outside target root: {path} (root: {root})")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("failed to canonicalize {path}: {source}")]
    Canonicalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TargetGuard {
    /// Create a guard for `root`, which must exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .map_err(|source| SafetyError::Canonicalize {
                path: root.to_path_buf(),
                source,
            })?;
        Ok(Self { root })
    }

    /// Resolve a target-relative path and check it stays inside the root.
    ///
    /// The file itself does not need to exist (`fileCanBeMissing`); existing
    /// paths are canonicalized so symlinks cannot escape.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let relative = relative.as_ref();
        if relative.has_root() {
            return Err(SafetyError::AbsolutePath {
                path: relative.to_path_buf(),
            });
        }

        let mut joined = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => joined.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !joined.pop() || !joined.starts_with(&self.root) {
                        return Err(self.outside(relative));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SafetyError::AbsolutePath {
                        path: relative.to_path_buf(),
                    })
                }
            }
        }
        if !joined.starts_with(&self.root) {
            return Err(self.outside(relative));
        }

        if joined.exists() {
            let canonical = joined
                .canonicalize()
                .map_err(|source| SafetyError::Canonicalize {
                    path: joined.clone(),
                    source,
                })?;
            if !canonical.starts_with(&self.root) {
                return Err(SafetyError::OutsideRoot {
                    path: canonical,
                    root: self.root.clone(),
                });
            }
        }

        Ok(joined)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn outside(&self, path: &Path) -> SafetyError {
        SafetyError::OutsideRoot {
            path: path.to_path_buf(),
            root: self.root.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_inside_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = TargetGuard::new(temp_dir.path()).unwrap();

        let file = temp_dir.path().join("out/main.js");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"").unwrap();

        let resolved = guard.resolve("out/main.js").unwrap();
        assert_eq!(resolved, guard.root().join("out/main.js"));
    }

    #[test]
    fn test_resolve_missing_file_is_allowed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = TargetGuard::new(temp_dir.path()).unwrap();
        assert!(guard.resolve("dist/./missing.js").is_ok());
    }

    #[test]
    fn test_parent_dir_inside_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = TargetGuard::new(temp_dir.path()).unwrap();
        let resolved = guard.resolve("out/../package.json").unwrap();
        assert_eq!(resolved, guard.root().join("package.json"));
    }

    #[test]
    fn test_parent_dir_escape() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("ext");
        fs::create_dir_all(&root).unwrap();
        let guard = TargetGuard::new(&root).unwrap();

        let result = guard.resolve("../outside.js");
        assert!(matches!(result, Err(SafetyError::OutsideRoot { .. })));
    }

    #[test]
    fn test_absolute_path_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = TargetGuard::new(temp_dir.path()).unwrap();

        let result = guard.resolve("/etc/passwd");
        assert!(matches!(result, Err(SafetyError::AbsolutePath { .. })));
    }

    #[test]
    fn test_missing_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = TargetGuard::new(temp_dir.path().join("nope"));
        assert!(matches!(result, Err(SafetyError::Canonicalize { .. })));
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_escape() {
        use std::os::unix::fs::symlink;

        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("ext");
        fs::create_dir_all(&root).unwrap();

        let outside = temp_dir.path().join("outside.js");
        fs::write(&outside, b"").unwrap();
        symlink(&outside, root.join("escape.js")).unwrap();

        let guard = TargetGuard::new(&root).unwrap();
        let result = guard.resolve("escape.js");
        assert!(matches!(result, Err(SafetyError::OutsideRoot { .. })));
    }
}
