//! Patch applicator - applies extension patch descriptors with idempotency
//!
//! This module provides the high-level apply/restore flow that:
//! - Groups descriptors by target extension
//! - Skips descriptors whose hash is already recorded in the target manifest
//! - Backs up every file before its first mutation
//! - Reports a result for each descriptor without stopping at failures

use crate::backup::{ensure_backup, restore_backup, BackupError};
use crate::config::schema::{FilePatch, PatchDescription, PatchSet};
use crate::edit::{apply_rules, atomic_write, EditError, RulePlan};
use crate::locator::ExtensionLocator;
use crate::record::{patch_hash, Manifest, PatchSource, RecordError};
use crate::safety::{SafetyError, TargetGuard};
use log::{debug, error, info};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Result of applying a single descriptor to one target
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchResult should be checked for success/failure"]
pub enum PatchResult {
    /// Descriptor was applied; `files` are the target-relative files written
    Applied { target: String, files: Vec<String> },
    /// Hash already recorded in the target's manifest
    AlreadyApplied { target: String },
    /// No installed extension matches the target id
    TargetNotInstalled { target: String },
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchResult::Applied { target, files } => {
                write!(f, "Applied to {} ({} file(s))", target, files.len())
            }
            PatchResult::AlreadyApplied { target } => {
                write!(f, "Already applied to {}", target)
            }
            PatchResult::TargetNotInstalled { target } => {
                write!(f, "Skipped: {} is not installed", target)
            }
        }
    }
}

/// Errors during patch application
#[derive(Debug)]
pub enum ApplicationError {
    /// File I/O error
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A patched file does not exist and is not allowed to be missing
    MissingFile { path: PathBuf },
    /// A file path escapes the target root
    Safety(SafetyError),
    /// Backup creation or restore failed
    Backup(BackupError),
    /// A rule failed to resolve or apply
    Edit { file: String, source: EditError },
    /// The applied-patch record could not be read or written
    Record(RecordError),
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            ApplicationError::MissingFile { path } => {
                write!(f, "file not found: {}", path.display())
            }
            ApplicationError::Safety(e) => write!(f, "unsafe path: {}", e),
            ApplicationError::Backup(e) => write!(f, "backup error: {}", e),
            ApplicationError::Edit { file, source } => {
                write!(f, "edit error in {}: {}", file, source)
            }
            ApplicationError::Record(e) => write!(f, "record error: {}", e),
        }
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplicationError::Io { source, .. } => Some(source),
            ApplicationError::Safety(e) => Some(e),
            ApplicationError::Backup(e) => Some(e),
            ApplicationError::Edit { source, .. } => Some(source),
            ApplicationError::Record(e) => Some(e),
            ApplicationError::MissingFile { .. } => None,
        }
    }
}

impl From<SafetyError> for ApplicationError {
    fn from(e: SafetyError) -> Self {
        ApplicationError::Safety(e)
    }
}

impl From<BackupError> for ApplicationError {
    fn from(e: BackupError) -> Self {
        ApplicationError::Backup(e)
    }
}

impl From<RecordError> for ApplicationError {
    fn from(e: RecordError) -> Self {
        ApplicationError::Record(e)
    }
}

/// Outcome of one descriptor against one target.
#[derive(Debug)]
pub struct PatchOutcome {
    /// Descriptor hash; empty if the descriptor could not be hashed
    pub hash: String,
    pub target: String,
    pub result: Result<PatchResult, ApplicationError>,
}

/// Everything one apply run did.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub outcomes: Vec<PatchOutcome>,
    /// Failures that concern a whole target rather than one descriptor
    pub target_errors: Vec<(String, ApplicationError)>,
    /// Some patched target is loaded by the running editor
    pub needs_restart: bool,
}

impl ApplyReport {
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, Ok(PatchResult::Applied { .. })))
            .count()
    }

    pub fn skipped_hashes(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, Ok(PatchResult::AlreadyApplied { .. })))
            .map(|o| o.hash.as_str())
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &PatchOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some() || !self.target_errors.is_empty()
    }

    pub fn merge(&mut self, other: ApplyReport) {
        self.outcomes.extend(other.outcomes);
        self.target_errors.extend(other.target_errors);
        self.needs_restart |= other.needs_restart;
    }
}

/// Summary of restoring one target.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Files moved back from their backup
    pub restored: Vec<String>,
    /// Files named by the record that had no backup
    pub missing_backups: Vec<String>,
    /// Number of hashes removed from the record
    pub cleared: usize,
}

/// Apply every extension descriptor of `set`.
///
/// Descriptors are grouped by extension id in first-seen order. A failure
/// aborts only the descriptor it happened in; files that descriptor already
/// wrote stay written and it is not recorded.
pub fn apply_extension_patches(
    set: &PatchSet,
    source: PatchSource,
    locator: &dyn ExtensionLocator,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    for (id, descriptors) in group_by_extension(set) {
        let Some(extension) = locator.find(id) else {
            info!("extension {id} is not installed, skipping its patches");
            for patch in descriptors {
                report.outcomes.push(PatchOutcome {
                    hash: patch_hash(source, patch).unwrap_or_default(),
                    target: id.to_string(),
                    result: Ok(PatchResult::TargetNotInstalled {
                        target: id.to_string(),
                    }),
                });
            }
            continue;
        };

        let target = match Target::open(&extension.root) {
            Ok(target) => target,
            Err(err) => {
                error!("cannot patch {id}: {err}");
                report.target_errors.push((id.to_string(), err));
                continue;
            }
        };

        let applied = apply_to_target(target, id, source, &descriptors, &mut report);
        if applied && extension.is_active {
            report.needs_restart = true;
        }
    }

    report
}

/// An opened extension root: its path guard and cached manifest.
struct Target {
    guard: TargetGuard,
    manifest: Manifest,
}

impl Target {
    fn open(root: &Path) -> Result<Self, ApplicationError> {
        let guard = TargetGuard::new(root)?;
        let manifest = Manifest::read(guard.root())?;
        Ok(Self { guard, manifest })
    }

    /// Check the cached manifest, then the one on disk in case another run
    /// recorded the hash meanwhile.
    fn is_applied(&self, hash: &str) -> bool {
        self.manifest.contains(hash)
            || Manifest::read(self.guard.root())
                .map(|fresh| fresh.contains(hash))
                .unwrap_or(false)
    }
}

/// Returns whether any descriptor was newly applied.
fn apply_to_target(
    mut target: Target,
    id: &str,
    source: PatchSource,
    descriptors: &[&PatchDescription],
    report: &mut ApplyReport,
) -> bool {
    let mut applied_any = false;

    for patch in descriptors {
        let hash = match patch_hash(source, patch) {
            Ok(hash) => hash,
            Err(err) => {
                report.outcomes.push(PatchOutcome {
                    hash: String::new(),
                    target: id.to_string(),
                    result: Err(err.into()),
                });
                continue;
            }
        };

        if target.is_applied(&hash) {
            debug!("{hash} already applied to {id}");
            report.outcomes.push(PatchOutcome {
                hash,
                target: id.to_string(),
                result: Ok(PatchResult::AlreadyApplied {
                    target: id.to_string(),
                }),
            });
            continue;
        }

        let result = apply_descriptor(&target.guard, patch).map(|files| {
            target.manifest.record(&hash, &files);
            applied_any = true;
            info!("applied {hash} to {id} ({} file(s))", files.len());
            PatchResult::Applied {
                target: id.to_string(),
                files,
            }
        });
        if let Err(err) = &result {
            debug!("failed to apply {hash} to {id}: {err}");
        }

        report.outcomes.push(PatchOutcome {
            hash,
            target: id.to_string(),
            result,
        });
    }

    if applied_any {
        if let Err(err) = target.manifest.write() {
            error!("failed to record applied patches for {id}: {err}");
            report.target_errors.push((id.to_string(), err.into()));
        }
    }

    applied_any
}

/// Apply every file patch of one descriptor. Returns the files written.
fn apply_descriptor(
    guard: &TargetGuard,
    patch: &PatchDescription,
) -> Result<Vec<String>, ApplicationError> {
    let mut written = Vec::new();
    for file_patch in &patch.patches {
        if apply_file_patch(guard, file_patch)? {
            written.push(file_patch.file.clone());
        }
    }
    Ok(written)
}

/// Returns `false` when the file patch was a no-op (missing optional file or
/// no rules).
fn apply_file_patch(guard: &TargetGuard, file_patch: &FilePatch) -> Result<bool, ApplicationError> {
    let path = guard.resolve(&file_patch.file)?;

    let original = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            if file_patch.can_be_missing() {
                debug!("{} is missing, skipping", path.display());
                return Ok(false);
            }
            return Err(ApplicationError::MissingFile { path });
        }
        Err(source) => return Err(ApplicationError::Io { path, source }),
    };

    if file_patch.patches.is_empty() {
        return Ok(false);
    }

    let edit_error = |source: EditError| ApplicationError::Edit {
        file: file_patch.file.clone(),
        source,
    };
    let plans = file_patch
        .patches
        .iter()
        .map(|rule| RulePlan::compile(rule, false).map_err(|e| edit_error(e.into())))
        .collect::<Result<Vec<_>, _>>()?;

    ensure_backup(&path, original.as_bytes())?;
    let patched = apply_rules(&file_patch.file, &original, &plans, None).map_err(edit_error)?;

    atomic_write(&path, patched.as_bytes())
        .map_err(|source| ApplicationError::Io { path, source })?;
    Ok(true)
}

/// Extension descriptors grouped by target id, both in first-seen order.
fn group_by_extension(set: &PatchSet) -> Vec<(&str, Vec<&PatchDescription>)> {
    let mut groups: Vec<(&str, Vec<&PatchDescription>)> = Vec::new();
    for patch in set.extension_patches() {
        for id in patch.target.extension_ids() {
            match groups.iter_mut().find(|(group, _)| *group == id.as_str()) {
                Some((_, patches)) => patches.push(patch),
                None => groups.push((id.as_str(), vec![patch])),
            }
        }
    }
    groups
}

/// Undo every recorded patch of the target at `root`.
///
/// Each recorded file is moved back from its backup; files without a backup
/// are left alone. The record is then cleared.
pub fn restore_extension(root: &Path) -> Result<RestoreReport, ApplicationError> {
    let guard = TargetGuard::new(root)?;
    let mut manifest = Manifest::read(guard.root())?;
    let mut report = RestoreReport {
        cleared: manifest.applied().len(),
        ..RestoreReport::default()
    };

    for file in manifest.applied_files() {
        let path = guard.resolve(&file)?;
        if restore_backup(&path)? {
            report.restored.push(file);
        } else {
            debug!("no backup for {}", path.display());
            report.missing_backups.push(file);
        }
    }

    manifest.clear_applied();
    manifest.write()?;
    info!(
        "restored {} file(s) in {}",
        report.restored.len(),
        root.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_path;
    use crate::config::load_from_str;
    use crate::locator::InstalledExtension;
    use crate::record::MANIFEST_FILE;

    struct OneExtension {
        id: &'static str,
        root: PathBuf,
        is_active: bool,
    }

    impl ExtensionLocator for OneExtension {
        fn find(&self, id: &str) -> Option<InstalledExtension> {
            (id == self.id).then(|| InstalledExtension {
                id: id.to_string(),
                root: self.root.clone(),
                is_active: self.is_active,
            })
        }
    }

    fn extension(dir: &Path) -> OneExtension {
        fs::write(
            dir.join(MANIFEST_FILE),
            r#"{"name": "ext", "publisher": "pub"}"#,
        )
        .unwrap();
        fs::write(dir.join("main.js"), "Hello world, testing world, ok?").unwrap();
        OneExtension {
            id: "pub.ext",
            root: dir.to_path_buf(),
            is_active: true,
        }
    }

    const PATCHES: &str = r#"[
        {"target": {"extension": "pub.ext"}, "patches": [
            {"file": "main.js", "patches": [
                {"search": "world", "searchMode": "multiple", "insertText": "universe", "insertMode": "replace"}
            ]}
        ]}
    ]"#;

    #[test]
    fn test_apply_then_reapply_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let locator = extension(dir.path());
        let set = load_from_str(PATCHES).unwrap();

        let report = apply_extension_patches(&set, PatchSource::Local, &locator);
        assert_eq!(report.applied_count(), 1);
        assert!(report.needs_restart);
        assert_eq!(
            fs::read_to_string(dir.path().join("main.js")).unwrap(),
            "Hello universe, testing universe, ok?"
        );
        assert_eq!(
            fs::read_to_string(backup_path(&dir.path().join("main.js"))).unwrap(),
            "Hello world, testing world, ok?"
        );

        let again = apply_extension_patches(&set, PatchSource::Local, &locator);
        assert_eq!(again.applied_count(), 0);
        assert_eq!(again.skipped_hashes().len(), 1);
        assert!(!again.needs_restart);
    }

    #[test]
    fn test_failure_isolated_to_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let locator = extension(dir.path());
        let set = load_from_str(
            r#"[
                {"target": {"extension": "pub.ext"}, "patches": [
                    {"file": "main.js", "patches": [{"search": "galaxy", "insertText": "x"}]}
                ]},
                {"target": {"extension": "pub.ext"}, "patches": [
                    {"file": "main.js", "patches": [{"search": "ok", "insertText": " then"}]}
                ]}
            ]"#,
        )
        .unwrap();

        let report = apply_extension_patches(&set, PatchSource::Remote, &locator);
        assert_eq!(report.applied_count(), 1);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].hash.starts_with("remote-"));
        assert_eq!(
            fs::read_to_string(dir.path().join("main.js")).unwrap(),
            "Hello world, testing world, ok then?"
        );

        let manifest = Manifest::read(dir.path()).unwrap();
        assert_eq!(manifest.applied().len(), 1);
    }

    #[test]
    fn test_missing_file_allowed_or_not() {
        let dir = tempfile::tempdir().unwrap();
        let locator = extension(dir.path());
        let set = load_from_str(
            r#"[
                {"target": {"extension": "pub.ext"}, "patches": [
                    {"file": "gone.js", "fileCanBeMissing": true, "patches": [{"search": "x"}]}
                ]},
                {"target": {"extension": "pub.ext"}, "patches": [
                    {"file": "gone.js", "patches": [{"search": "x"}]}
                ]}
            ]"#,
        )
        .unwrap();

        let report = apply_extension_patches(&set, PatchSource::Local, &locator);
        assert!(matches!(
            &report.outcomes[0].result,
            Ok(PatchResult::Applied { files, .. }) if files.is_empty()
        ));
        assert!(matches!(
            report.outcomes[1].result,
            Err(ApplicationError::MissingFile { .. })
        ));
    }

    #[test]
    fn test_escaping_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("ext");
        fs::create_dir_all(&root).unwrap();
        let locator = extension(&root);
        fs::write(dir.path().join("victim.js"), "world").unwrap();

        let set = load_from_str(
            r#"[{"target": {"extension": "pub.ext"}, "patches": [
                {"file": "../victim.js", "patches": [{"search": "world", "insertText": "!"}]}
            ]}]"#,
        )
        .unwrap();

        let report = apply_extension_patches(&set, PatchSource::Local, &locator);
        assert!(matches!(
            report.outcomes[0].result,
            Err(ApplicationError::Safety(_))
        ));
        assert_eq!(
            fs::read_to_string(dir.path().join("victim.js")).unwrap(),
            "world"
        );
    }

    #[test]
    fn test_unknown_extension_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let locator = extension(dir.path());
        let set = load_from_str(
            r#"[{"target": {"extension": ["other.ext", "pub.ext"]}, "patches": []}]"#,
        )
        .unwrap();

        let report = apply_extension_patches(&set, PatchSource::Local, &locator);
        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(
            report.outcomes[0].result,
            Ok(PatchResult::TargetNotInstalled { .. })
        ));
        assert_eq!(report.applied_count(), 1);
    }

    #[test]
    fn test_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let locator = extension(dir.path());
        let set = load_from_str(PATCHES).unwrap();

        let _ = apply_extension_patches(&set, PatchSource::Local, &locator);
        let restored = restore_extension(dir.path()).unwrap();

        assert_eq!(restored.restored, ["main.js"]);
        assert_eq!(restored.cleared, 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("main.js")).unwrap(),
            "Hello world, testing world, ok?"
        );
        assert!(Manifest::read(dir.path()).unwrap().applied().is_empty());

        let report = apply_extension_patches(&set, PatchSource::Local, &locator);
        assert_eq!(report.applied_count(), 1);
    }
}
