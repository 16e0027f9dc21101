//! Edit application
//!
//! Compiles [`EditRule`]s into [`RulePlan`]s and applies them to a text buffer
//! as byte-range splices, carrying the shift of each edit into the positions
//! of the matches after it.

use crate::config::schema::{EditRule, InsertMode};
use crate::needle::{NeedleError, SearchSpec};
use crate::srcmap::{SourceLookup, SourceMapError};
use regex::Regex;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

static INSERT_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(.*?)\}\}").expect("invalid regex"));

/// The edit primitive: byte-span replacement inside an in-memory buffer.
///
/// Every rule operation (removal, insertion, replacement) compiles down to a
/// splice. Intelligence lives in match resolution, not application.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Splice does nothing until apply() is called"]
pub struct Splice {
    /// Starting byte offset (inclusive)
    pub byte_start: usize,
    /// Ending byte offset (exclusive)
    pub byte_end: usize,
    /// Text written over [byte_start, byte_end)
    pub new_text: String,
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("invalid byte range: [{byte_start}, {byte_end}) in buffer of length {len}")]
    InvalidByteRange {
        byte_start: usize,
        byte_end: usize,
        len: usize,
    },

    #[error("offset {offset} is not on a UTF-8 character boundary")]
    NotCharBoundary { offset: usize },

    #[error("computed offset {offset} is before the start of the buffer")]
    NegativeOffset { offset: i64 },

    #[error(transparent)]
    Resolve(#[from] NeedleError),

    #[error("failed to resolve insert text reference: {0}")]
    SourceMap(#[from] SourceMapError),
}

impl Splice {
    pub fn new(byte_start: usize, byte_end: usize, new_text: impl Into<String>) -> Self {
        Self {
            byte_start,
            byte_end,
            new_text: new_text.into(),
        }
    }

    /// Pure deletion of [byte_start, byte_end).
    pub fn remove(byte_start: usize, byte_end: usize) -> Self {
        Self::new(byte_start, byte_end, String::new())
    }

    fn validate(&self, buffer: &str) -> Result<(), EditError> {
        if self.byte_start > self.byte_end || self.byte_end > buffer.len() {
            return Err(EditError::InvalidByteRange {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                len: buffer.len(),
            });
        }

        for offset in [self.byte_start, self.byte_end] {
            if !buffer.is_char_boundary(offset) {
                return Err(EditError::NotCharBoundary { offset });
            }
        }

        Ok(())
    }

    /// Apply to `buffer`, returning the signed change in buffer length.
    pub fn apply(&self, buffer: &mut String) -> Result<i64, EditError> {
        self.validate(buffer)?;
        buffer.replace_range(self.byte_start..self.byte_end, &self.new_text);
        Ok(self.new_text.len() as i64 - (self.byte_end - self.byte_start) as i64)
    }
}

/// An edit rule with defaults applied and its search compiled.
#[derive(Debug, Clone)]
pub struct RulePlan {
    pub search: SearchSpec,
    pub insert_text: Option<String>,
    pub insert_mode: InsertMode,
    pub insert_offset: i64,
    pub remove_range: Option<[i64; 2]>,
    pub remove_range_after: Option<[i64; 2]>,
}

impl RulePlan {
    /// Compile `rule`. `source_mapped` enables `{{...}}` needles, which only
    /// make sense for the bundled script.
    pub fn compile(rule: &EditRule, source_mapped: bool) -> Result<Self, NeedleError> {
        let search = SearchSpec::parse(
            &rule.search,
            rule.search_mode.unwrap_or_default(),
            rule.patch_optional.unwrap_or(false),
            source_mapped,
        )?;

        Ok(Self {
            search,
            insert_text: rule.insert_text.clone(),
            insert_mode: rule.insert_mode.unwrap_or_default(),
            insert_offset: rule.insert_offset.unwrap_or(0),
            remove_range: rule.remove_range,
            remove_range_after: rule.remove_range_after,
        })
    }

    pub fn uses_source_map(&self) -> bool {
        !self.search.source_needles().is_empty()
            || (self.search.accepts_source_needles()
                && self
                    .insert_text
                    .as_deref()
                    .is_some_and(|text| INSERT_REFERENCE.is_match(text)))
    }
}

/// Apply one compiled rule to `text`, returning the new buffer.
///
/// All matches are resolved against the incoming buffer first; each edit then
/// shifts the positions of the matches after it. A match's own start is not
/// moved by its removals, so every range is described against the unshifted
/// match. `file` is only used in error messages.
///
/// Exhaustive searches restart one byte after the previous match, so a
/// self-overlapping needle (`aa` in `aaaa`) resolves to overlapping
/// occurrences and the edit is applied at every one of them in turn.
pub fn apply_rule(
    file: &str,
    text: &str,
    plan: &RulePlan,
    lookup: Option<&dyn SourceLookup>,
) -> Result<String, EditError> {
    let resolution = plan.search.resolve(file, text, lookup)?;
    if resolution.matches.is_empty() {
        return Ok(text.to_string());
    }

    let insert_text = match &plan.insert_text {
        Some(raw) => Some(expand_insert_text(raw, &plan.search, text, lookup)?),
        None => None,
    };

    let mut buffer = text.to_string();
    let mut shift: i64 = 0;

    for found in &resolution.matches {
        let start = found.start as i64 + shift;
        let len = found.len as i64;

        if let Some([from, to]) = plan.remove_range {
            shift += Splice::remove(offset(start + from)?, offset(start + to)?).apply(&mut buffer)?;
        }

        if let Some([from, to]) = plan.remove_range_after {
            let end = start + len;
            shift += Splice::remove(offset(end + from)?, offset(end + to)?).apply(&mut buffer)?;
        }

        if let Some(insert) = &insert_text {
            let mut at = start + plan.insert_offset;
            if plan.insert_mode == InsertMode::After {
                at += len;
            }
            let replaced = if plan.insert_mode == InsertMode::Replace {
                len
            } else {
                0
            };
            let splice = Splice::new(offset(at)?, offset(at + replaced)?, insert.as_str());
            shift += splice.apply(&mut buffer)?;
        }
    }

    Ok(buffer)
}

/// Apply compiled rules one after another to the same evolving buffer.
pub fn apply_rules(
    file: &str,
    text: &str,
    plans: &[RulePlan],
    lookup: Option<&dyn SourceLookup>,
) -> Result<String, EditError> {
    let mut buffer = text.to_string();
    for plan in plans {
        buffer = apply_rule(file, &buffer, plan, lookup)?;
    }
    Ok(buffer)
}

/// Compile and apply a single rule to plain text with no source map.
pub fn apply_rule_to_text(text: &str, rule: &EditRule) -> Result<String, EditError> {
    let plan = RulePlan::compile(rule, false)?;
    apply_rule("", text, &plan, None)
}

/// Replace `{{needle}}` references in insert text with the identifier the
/// source map resolves them to. The rule's own source-mapped needles prefix
/// every reference. Without a lookup, or for rules not compiled for the
/// bundled script, the text is inserted unchanged.
fn expand_insert_text(
    raw: &str,
    search: &SearchSpec,
    generated: &str,
    lookup: Option<&dyn SourceLookup>,
) -> Result<String, EditError> {
    let lookup = match lookup {
        Some(lookup) if search.accepts_source_needles() => lookup,
        _ => return Ok(raw.to_string()),
    };

    let mut out = String::with_capacity(raw.len());
    let mut last = 0;
    for captures in INSERT_REFERENCE.captures_iter(raw) {
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let mut needles = search.source_needles().to_vec();
        needles.push(inner.as_str().to_string());

        let ident = lookup.identifier(generated, &needles)?;
        out.push_str(&raw[last..whole.start()]);
        out.push_str(&ident.name);
        last = whole.end();
    }
    out.push_str(&raw[last..]);
    Ok(out)
}

fn offset(value: i64) -> Result<usize, EditError> {
    usize::try_from(value).map_err(|_| EditError::NegativeOffset { offset: value })
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or the file is left untouched.
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
