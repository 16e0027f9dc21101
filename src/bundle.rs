//! Patching the bundled application script.
//!
//! Unlike extensions, the bundled script carries no manifest to record hashes
//! in. Every run instead starts again from the pristine backup and reapplies
//! the whole set, which makes reruns idempotent by construction.

use crate::applicator::ApplicationError;
use crate::backup::{backup_path, ensure_backup_copy, BackupError};
use crate::cache;
use crate::config::schema::{PatchDescription, PatchSet};
use crate::edit::{apply_rules, atomic_write, EditError, RulePlan};
use crate::position::offset_to_line_column;
use crate::srcmap::{
    locate_map, OriginalPosition, SourceLookup, SourceMapDocument, SourceMapError,
    SourceMapResolver,
};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

const EXCERPT_RADIUS: usize = 40;

/// Supplies the source map of a generated script.
pub trait SourceMapProvider {
    fn source_map(
        &self,
        script: &Path,
        generated: &str,
    ) -> Result<Rc<SourceMapDocument>, SourceMapError>;
}

/// Maps read from disk: an explicit path, or the script's
/// `sourceMappingURL` comment. Decoded maps are memoized per process.
#[derive(Debug, Clone, Default)]
pub struct LocalSourceMaps {
    explicit: Option<PathBuf>,
}

impl LocalSourceMaps {
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self { explicit }
    }
}

impl SourceMapProvider for LocalSourceMaps {
    fn source_map(
        &self,
        script: &Path,
        generated: &str,
    ) -> Result<Rc<SourceMapDocument>, SourceMapError> {
        let path = match &self.explicit {
            Some(path) => path.clone(),
            None => locate_map(script, generated)?,
        };
        cache::get_or_load(&path)
    }
}

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("failed to access bundled script {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Backup(#[from] BackupError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BundleOptions {
    /// Compute the result without touching the filesystem
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct BundleReport {
    pub applied: usize,
    /// Index of the failed descriptor among the bundled-script descriptors
    pub failures: Vec<(usize, ApplicationError)>,
    /// The script text the run started from
    pub pristine: String,
    /// The script text the run produced
    pub output: String,
}

impl BundleReport {
    pub fn changed(&self) -> bool {
        self.pristine != self.output
    }
}

/// Rebuild `script` from its pristine backup with every bundled-script
/// descriptor of `set` applied.
///
/// A failing descriptor is rolled back in memory and reported; the others
/// still apply. The source map is only loaded if some rule needs it.
pub fn apply_bundle_patches(
    script: &Path,
    set: &PatchSet,
    provider: &dyn SourceMapProvider,
    options: BundleOptions,
) -> Result<BundleReport, BundleError> {
    let pristine = read_pristine(script, !options.dry_run)?;
    let mut maps = LazySourceMap::new(script, &pristine, provider);
    let mut buffer = pristine.clone();
    let mut applied = 0;
    let mut failures = Vec::new();

    for (index, patch) in set.bundled_script_patches().enumerate() {
        match apply_bundle_descriptor(&buffer, patch, &mut maps) {
            Ok(patched) => {
                buffer = patched;
                applied += 1;
            }
            Err(err) => {
                debug!("bundled script patch #{index} failed: {err}");
                failures.push((index, err));
            }
        }
    }

    if !options.dry_run {
        atomic_write(script, buffer.as_bytes()).map_err(|source| BundleError::Io {
            path: script.to_path_buf(),
            source,
        })?;
        info!(
            "patched {} with {applied} descriptor(s), {} failed",
            script.display(),
            failures.len()
        );
    }

    Ok(BundleReport {
        applied,
        failures,
        pristine,
        output: buffer,
    })
}

/// Offset, line/column and surrounding text of a source-mapped location in
/// the pristine bundled script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub source: String,
    pub offset: usize,
    pub line: usize,
    /// UTF-16 code units from the start of the line
    pub column: usize,
    pub excerpt: String,
}

/// Translate `needles` in the original source `hint` into a location in the
/// bundled script.
pub fn inspect_location(
    script: &Path,
    hint: &str,
    needles: &[String],
    provider: &dyn SourceMapProvider,
) -> Result<Inspection, ApplicationError> {
    let generated = read_pristine(script, false).map_err(|err| match err {
        BundleError::Io { path, source } => ApplicationError::Io { path, source },
        BundleError::Backup(err) => ApplicationError::Backup(err),
    })?;
    let source_map_error = |source: SourceMapError| ApplicationError::Edit {
        file: hint.to_string(),
        source: EditError::SourceMap(source),
    };

    let document = provider
        .source_map(script, &generated)
        .map_err(source_map_error)?;
    let resolver = SourceMapResolver::new(&document, hint);
    let offset = resolver
        .generated_offset(&generated, OriginalPosition::Needles(needles))
        .map_err(source_map_error)?;
    let (line, column) = offset_to_line_column(&generated, offset);
    let source = document
        .find_source(hint)
        .map(|source| source.path.to_string())
        .map_err(source_map_error)?;

    Ok(Inspection {
        source,
        offset,
        line,
        column,
        excerpt: excerpt(&generated, offset),
    })
}

/// Apply one descriptor's file patches to `buffer`. Every file patch's `file`
/// names the original source its `{{...}}` needles are looked up in.
fn apply_bundle_descriptor(
    buffer: &str,
    patch: &PatchDescription,
    maps: &mut LazySourceMap<'_>,
) -> Result<String, ApplicationError> {
    let mut output = buffer.to_string();

    for file_patch in &patch.patches {
        let edit_error = |source: EditError| ApplicationError::Edit {
            file: file_patch.file.clone(),
            source,
        };

        let plans = file_patch
            .patches
            .iter()
            .map(|rule| RulePlan::compile(rule, true).map_err(|e| edit_error(e.into())))
            .collect::<Result<Vec<_>, _>>()?;

        let document = if plans.iter().any(RulePlan::uses_source_map) {
            Some(maps.get().map_err(|e| edit_error(e.into()))?)
        } else {
            None
        };
        let resolver = document
            .as_deref()
            .map(|document| SourceMapResolver::new(document, &file_patch.file));
        let lookup = resolver.as_ref().map(|r| r as &dyn SourceLookup);

        output = apply_rules(&file_patch.file, &output, &plans, lookup).map_err(edit_error)?;
    }

    Ok(output)
}

/// The script's source map, loaded on first use. A failed load is retried on
/// the next request so each descriptor reports it.
struct LazySourceMap<'a> {
    script: &'a Path,
    generated: &'a str,
    provider: &'a dyn SourceMapProvider,
    loaded: Option<Rc<SourceMapDocument>>,
}

impl<'a> LazySourceMap<'a> {
    fn new(script: &'a Path, generated: &'a str, provider: &'a dyn SourceMapProvider) -> Self {
        Self {
            script,
            generated,
            provider,
            loaded: None,
        }
    }

    fn get(&mut self) -> Result<Rc<SourceMapDocument>, SourceMapError> {
        if let Some(document) = &self.loaded {
            return Ok(Rc::clone(document));
        }
        let document = self.provider.source_map(self.script, self.generated)?;
        debug!("source map for {} loaded", self.script.display());
        self.loaded = Some(Rc::clone(&document));
        Ok(document)
    }
}

/// Text of the pristine script: the backup if one exists, else the live file.
/// With `create_backup` a missing backup is first copied from the live file.
fn read_pristine(script: &Path, create_backup: bool) -> Result<String, BundleError> {
    if create_backup {
        ensure_backup_copy(script)?;
    }

    let backup = backup_path(script);
    let source = if backup.exists() { backup } else { script.to_path_buf() };
    fs::read_to_string(&source).map_err(|source_err| BundleError::Io {
        path: source,
        source: source_err,
    })
}

fn excerpt(text: &str, offset: usize) -> String {
    let mut start = offset.saturating_sub(EXCERPT_RADIUS);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (offset + EXCERPT_RADIUS).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].replace('\n', "\\n")
}
