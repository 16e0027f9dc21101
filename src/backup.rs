//! Pristine copies of target files.
//!
//! A backup sits next to its file as `<file>.backup`. It is created before
//! the first mutation and never overwritten; restoring moves it back.

use log::debug;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const BACKUP_SUFFIX: &str = ".backup";

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("failed to back up {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to restore {path} from backup: {source}")]
    Restore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Write `original` as the backup of `path` unless one already exists.
/// Returns whether a backup was created.
pub fn ensure_backup(path: &Path, original: &[u8]) -> Result<bool, BackupError> {
    let backup = backup_path(path);
    if backup.exists() {
        return Ok(false);
    }

    fs::write(&backup, original).map_err(|source| BackupError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("created backup {}", backup.display());
    Ok(true)
}

/// Copy the live file to its backup unless one already exists.
pub fn ensure_backup_copy(path: &Path) -> Result<bool, BackupError> {
    let backup = backup_path(path);
    if backup.exists() {
        return Ok(false);
    }

    fs::copy(path, &backup).map_err(|source| BackupError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("created backup {}", backup.display());
    Ok(true)
}

/// Move the backup of `path` over it. A missing backup is not an error;
/// returns whether anything was restored.
pub fn restore_backup(path: &Path) -> Result<bool, BackupError> {
    let backup = backup_path(path);
    match fs::rename(&backup, path) {
        Ok(()) => {
            debug!("restored {} from backup", path.display());
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(BackupError::Restore {
            path: path.to_path_buf(),
            source,
        }),
    }
}
