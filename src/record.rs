//! Applied-patch bookkeeping.
//!
//! Each target root carries a `package.json`; the hashes of descriptors applied
//! to it, and the files each one touched, live under
//! [`APPLIED_PATCHES_KEY`] in that manifest.

use crate::config::schema::PatchDescription;
use crate::edit::atomic_write;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_128;

pub const APPLIED_PATCHES_KEY: &str = "customPatches-appliedPatches";
pub const MANIFEST_FILE: &str = "package.json";

/// Where a descriptor came from. Part of its hash, so the same descriptor
/// loaded from both places is tracked twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchSource {
    Local,
    Remote,
}

impl fmt::Display for PatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchSource::Local => write!(f, "local"),
            PatchSource::Remote => write!(f, "remote"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("failed to access manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("manifest {path} is not a JSON object")]
    NotAnObject { path: PathBuf },

    #[error("failed to serialize patch descriptor: {0}")]
    Hash(#[source] serde_json::Error),
}

/// Identity of a descriptor: `<source>-<xxh3-128 of its JSON form>`.
///
/// Any change to the target or to a rule yields a new hash.
pub fn patch_hash(source: PatchSource, patch: &PatchDescription) -> Result<String, RecordError> {
    let json = serde_json::to_vec(patch).map_err(RecordError::Hash)?;
    Ok(format!("{source}-{:032x}", xxh3_128(&json)))
}

/// A target's `package.json`, kept as a generic JSON document so unrelated
/// keys survive a rewrite in their original order.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    document: Map<String, Value>,
}

impl Manifest {
    /// Read the manifest of the target at `root`.
    pub fn read(root: &Path) -> Result<Self, RecordError> {
        let path = root.join(MANIFEST_FILE);
        let contents = fs::read_to_string(&path).map_err(|source| RecordError::Io {
            path: path.clone(),
            source,
        })?;
        let value: Value = serde_json::from_str(&contents).map_err(|source| RecordError::Json {
            path: path.clone(),
            source,
        })?;

        match value {
            Value::Object(document) => Ok(Self { path, document }),
            _ => Err(RecordError::NotAnObject { path }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value of a top-level string field such as `name` or `publisher`.
    pub fn string_field(&self, key: &str) -> Option<&str> {
        self.document.get(key).and_then(Value::as_str)
    }

    /// Applied hashes and their files, in record order.
    pub fn applied(&self) -> Vec<(String, Vec<String>)> {
        let Some(Value::Object(record)) = self.document.get(APPLIED_PATCHES_KEY) else {
            return Vec::new();
        };

        record
            .iter()
            .map(|(hash, files)| {
                let files = files
                    .as_array()
                    .map(|files| {
                        files
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                (hash.clone(), files)
            })
            .collect()
    }

    pub fn contains(&self, hash: &str) -> bool {
        matches!(
            self.document.get(APPLIED_PATCHES_KEY),
            Some(Value::Object(record)) if record.contains_key(hash)
        )
    }

    /// Every file named by any applied hash, deduplicated in first-seen order.
    pub fn applied_files(&self) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        for (_, touched) in self.applied() {
            for file in touched {
                if !files.contains(&file) {
                    files.push(file);
                }
            }
        }
        files
    }

    /// Record `hash` as applied to `files`.
    pub fn record(&mut self, hash: &str, files: &[String]) {
        let entry = self
            .document
            .entry(APPLIED_PATCHES_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(record) = entry {
            record.insert(
                hash.to_string(),
                Value::Array(files.iter().cloned().map(Value::String).collect()),
            );
        }
    }

    /// Reset the record to an empty object.
    pub fn clear_applied(&mut self) {
        self.document
            .insert(APPLIED_PATCHES_KEY.to_string(), Value::Object(Map::new()));
    }

    /// Write back with 4-space indentation.
    pub fn write(&self) -> Result<(), RecordError> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.document
            .serialize(&mut serializer)
            .map_err(|source| RecordError::Json {
                path: self.path.clone(),
                source,
            })?;

        atomic_write(&self.path, &out).map_err(|source| RecordError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
