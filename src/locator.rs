//! Discovery of installed extensions.
//!
//! The applicator only needs to turn an extension id into a root directory;
//! [`ExtensionDirectory`] does that by scanning an editor's extensions folder.

use crate::record::{Manifest, MANIFEST_FILE};
use log::{debug, warn};
use semver::Version;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// An extension as seen on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledExtension {
    /// `publisher.name`, as written in the patch set
    pub id: String,
    pub root: PathBuf,
    /// Whether the running editor has it loaded (patching it needs a restart)
    pub is_active: bool,
}

pub trait ExtensionLocator {
    fn find(&self, id: &str) -> Option<InstalledExtension>;
}

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("failed to scan extensions directory: {0}")]
    Walk(#[from] walkdir::Error),
}

#[derive(Debug, Clone)]
struct ScannedExtension {
    id: String,
    version: String,
    root: PathBuf,
}

/// Extensions found under one directory, plus explicit id -> path overrides
/// that take precedence over the scan.
#[derive(Debug, Clone, Default)]
pub struct ExtensionDirectory {
    scanned: Vec<ScannedExtension>,
    overrides: BTreeMap<String, PathBuf>,
    active: Vec<String>,
}

impl ExtensionDirectory {
    /// Scan the immediate children of `dir` for extension manifests. A
    /// missing directory yields an empty scan.
    pub fn scan(dir: &Path) -> Result<Self, LocatorError> {
        let mut scanned = Vec::new();
        if !dir.is_dir() {
            warn!("extensions directory {} does not exist", dir.display());
            return Ok(Self::default());
        }

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_dir() || !entry.path().join(MANIFEST_FILE).is_file() {
                continue;
            }

            let manifest = match Manifest::read(entry.path()) {
                Ok(manifest) => manifest,
                Err(err) => {
                    debug!("skipping {}: {err}", entry.path().display());
                    continue;
                }
            };
            let (Some(publisher), Some(name)) = (
                manifest.string_field("publisher"),
                manifest.string_field("name"),
            ) else {
                continue;
            };

            scanned.push(ScannedExtension {
                id: format!("{publisher}.{name}"),
                version: manifest.string_field("version").unwrap_or("").to_string(),
                root: entry.path().to_path_buf(),
            });
        }

        debug!("found {} extension(s) in {}", scanned.len(), dir.display());
        Ok(Self {
            scanned,
            ..Self::default()
        })
    }

    pub fn with_overrides(mut self, overrides: BTreeMap<String, PathBuf>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Ids of extensions the running editor has loaded.
    pub fn with_active(mut self, active: Vec<String>) -> Self {
        self.active = active;
        self
    }

    /// Every known extension: overrides first, then the scan.
    pub fn installed(&self) -> Vec<InstalledExtension> {
        let mut ids: Vec<&str> = self.overrides.keys().map(String::as_str).collect();
        for ext in &self.scanned {
            if !ids.iter().any(|id| id.eq_ignore_ascii_case(&ext.id)) {
                ids.push(ext.id.as_str());
            }
        }
        ids.into_iter().filter_map(|id| self.find(id)).collect()
    }

    fn is_active(&self, id: &str) -> bool {
        self.active.iter().any(|active| active.eq_ignore_ascii_case(id))
    }
}

impl ExtensionLocator for ExtensionDirectory {
    /// Ids compare case-insensitively. With several installed versions the
    /// highest one wins.
    fn find(&self, id: &str) -> Option<InstalledExtension> {
        let root = match self.overrides.get(id) {
            Some(root) => root.clone(),
            None => self
                .scanned
                .iter()
                .filter(|ext| ext.id.eq_ignore_ascii_case(id))
                .max_by_key(|ext| VersionKey::parse(&ext.version))?
                .root
                .clone(),
        };

        Some(InstalledExtension {
            id: id.to_string(),
            root,
            is_active: self.is_active(id),
        })
    }
}

/// Sort key for installed versions. Any semver version outranks a string
/// that does not parse; unparsed strings compare lexically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum VersionKey {
    Raw(String),
    Semver(Version),
}

impl VersionKey {
    fn parse(version: &str) -> Self {
        match Version::parse(version) {
            Ok(version) => VersionKey::Semver(version),
            Err(_) => VersionKey::Raw(version.to_string()),
        }
    }
}
