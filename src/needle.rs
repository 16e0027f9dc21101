//! Needle resolution: turning a search specification into match positions.
//!
//! A search is an ordered list of needles. Each needle must be found strictly
//! after the start of the previous one, and the last needle's occurrence is the
//! match. Bundled-script rules may start with a run of `{{...}}` needles that
//! are resolved through the source map instead of by scanning the buffer.

use crate::config::schema::{Search, SearchMode};
use crate::srcmap::{ResolvedIdentifier, SourceLookup, SourceMapError};
use log::debug;
use regex::{Regex, RegexBuilder};
use thiserror::Error;

const SOURCE_NEEDLE_OPEN: &str = "{{";
const SOURCE_NEEDLE_CLOSE: &str = "}}";
const REGEX_FLAGS: &str = "gimsux";

#[derive(Error, Debug)]
pub enum NeedleError {
    #[error("patch must have at least one search string")]
    EmptySearch,

    #[error("empty needle in search query {search}")]
    EmptyNeedle { search: String },

    #[error("sourcemap needle must not follow a regular needle in search query {search}")]
    SourceNeedleAfterRegular { search: String },

    #[error("invalid regex needle {needle}: {source}")]
    InvalidRegex {
        needle: String,
        #[source]
        source: regex::Error,
    },

    #[error("unsupported regex flag '{flag}' in needle {needle}")]
    UnknownRegexFlag { needle: String, flag: char },

    #[error("failed to find patch string \"{needle}\" from search query {search} in file {file}")]
    NotFound {
        needle: String,
        search: String,
        file: String,
    },

    #[error("source map lookup failed: {0}")]
    SourceMap(#[from] SourceMapError),
}

/// A regular (non source-mapped) needle.
#[derive(Debug, Clone)]
pub enum Needle {
    Literal(String),
    Pattern {
        /// The `/pattern/flags` token as written
        token: String,
        regex: Regex,
        global: bool,
    },
}

impl Needle {
    /// Parse a `/pattern/flags` token. Returns `Ok(None)` when `token` is not
    /// shaped like a regex literal.
    fn parse_pattern(token: &str) -> Result<Option<Needle>, NeedleError> {
        let Some(body) = token.strip_prefix('/') else {
            return Ok(None);
        };
        let Some(close) = body.rfind('/') else {
            return Ok(None);
        };
        let (pattern, flags) = (&body[..close], &body[close + 1..]);
        if !flags.chars().all(|c| c.is_ascii_alphabetic()) {
            return Ok(None);
        }

        if let Some(flag) = flags.chars().find(|c| !REGEX_FLAGS.contains(*c)) {
            return Err(NeedleError::UnknownRegexFlag {
                needle: token.to_string(),
                flag,
            });
        }

        let regex = RegexBuilder::new(pattern)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .ignore_whitespace(flags.contains('x'))
            .build()
            .map_err(|source| NeedleError::InvalidRegex {
                needle: token.to_string(),
                source,
            })?;

        Ok(Some(Needle::Pattern {
            token: token.to_string(),
            regex,
            global: flags.contains('g'),
        }))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Needle::Literal(text) => text,
            Needle::Pattern { token, .. } => token,
        }
    }

    /// First occurrence starting at or after byte `start`, as (offset, length).
    fn find_from(&self, text: &str, start: usize) -> Option<(usize, usize)> {
        let start = ceil_char_boundary(text, start)?;
        match self {
            Needle::Literal(needle) => text[start..]
                .find(needle.as_str())
                .map(|idx| (start + idx, needle.len())),
            Needle::Pattern { regex, .. } => regex
                .find_at(text, start)
                .map(|found| (found.start(), found.len())),
        }
    }
}

/// A resolved occurrence: byte offset into the current buffer and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub start: usize,
    pub len: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Matches in ascending buffer order; empty when an optional search failed
    pub matches: Vec<Match>,
    /// Identifier resolved from the leading source-mapped needles
    pub source_identifier: Option<ResolvedIdentifier>,
}

/// A validated search specification.
#[derive(Debug, Clone)]
pub struct SearchSpec {
    source_needles: Vec<String>,
    needles: Vec<Needle>,
    exhaustive: bool,
    optional: bool,
    source_mapped: bool,
    display: String,
}

impl SearchSpec {
    /// Split and validate the needles of `search`.
    ///
    /// `source_mapped` enables `{{...}}` needles; without it they are plain
    /// literals. A `g` regex flag makes the search exhaustive regardless of
    /// `mode`.
    pub fn parse(
        search: &Search,
        mode: SearchMode,
        optional: bool,
        source_mapped: bool,
    ) -> Result<Self, NeedleError> {
        let raw = search.needles();
        if raw.is_empty() || matches!(search, Search::One(needle) if needle.is_empty()) {
            return Err(NeedleError::EmptySearch);
        }

        let display = search.to_string();
        let mut source_needles = Vec::new();
        let mut needles = Vec::new();
        let mut exhaustive = mode == SearchMode::Multiple;

        for item in raw {
            if source_mapped {
                if let Some(inner) = source_needle(item) {
                    if !needles.is_empty() {
                        return Err(NeedleError::SourceNeedleAfterRegular { search: display });
                    }
                    if inner.is_empty() {
                        return Err(NeedleError::EmptyNeedle { search: display });
                    }
                    source_needles.push(inner.to_string());
                    continue;
                }
            }

            if item.is_empty() {
                return Err(NeedleError::EmptyNeedle { search: display });
            }

            let pattern = if mode == SearchMode::Regex {
                Needle::parse_pattern(item)?
            } else {
                None
            };
            match pattern {
                Some(needle) => {
                    if let Needle::Pattern { global: true, .. } = needle {
                        exhaustive = true;
                    }
                    needles.push(needle);
                }
                None => needles.push(Needle::Literal(item.clone())),
            }
        }

        Ok(Self {
            source_needles,
            needles,
            exhaustive,
            optional,
            source_mapped,
            display,
        })
    }

    /// The leading `{{...}}` needles, without their brackets.
    pub fn source_needles(&self) -> &[String] {
        &self.source_needles
    }

    pub fn needles(&self) -> &[Needle] {
        &self.needles
    }

    pub fn is_exhaustive(&self) -> bool {
        self.exhaustive
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Whether this search was compiled with `{{...}}` needles enabled.
    pub fn accepts_source_needles(&self) -> bool {
        self.source_mapped
    }

    /// Resolve against `text`. `file` is only used in error messages.
    pub fn resolve(
        &self,
        file: &str,
        text: &str,
        lookup: Option<&dyn SourceLookup>,
    ) -> Result<Resolution, NeedleError> {
        let source_identifier = if self.source_needles.is_empty() {
            None
        } else {
            let lookup = lookup.ok_or(SourceMapError::Unavailable)?;
            Some(lookup.identifier(text, &self.source_needles)?)
        };

        if self.needles.is_empty() {
            // a pure source-mapped reference matches the identifier itself
            let matches = source_identifier
                .iter()
                .map(|ident| Match {
                    start: ident.offset,
                    len: ident.name.len(),
                })
                .collect();
            return Ok(Resolution {
                matches,
                source_identifier,
            });
        }

        let seed = source_identifier.as_ref().map(|ident| ident.offset);
        let first = match self.find_chain(text, seed) {
            Ok(found) => found,
            Err(needle) if self.optional => {
                debug!(
                    "optional search {} not found in {file} (needle {:?})",
                    self.display,
                    needle.as_str()
                );
                return Ok(Resolution {
                    matches: Vec::new(),
                    source_identifier,
                });
            }
            Err(needle) => {
                return Err(NeedleError::NotFound {
                    needle: needle.as_str().to_string(),
                    search: self.display.clone(),
                    file: file.to_string(),
                })
            }
        };

        let mut matches = vec![first];
        if self.exhaustive {
            let mut previous = first;
            while let Ok(found) = self.find_chain(text, Some(previous.start)) {
                matches.push(found);
                previous = found;
            }
        }

        debug!(
            "search {} resolved to {} match(es) in {file}",
            self.display,
            matches.len()
        );
        Ok(Resolution {
            matches,
            source_identifier,
        })
    }

    /// Find every needle in order, each strictly after the previous start.
    /// `cursor` of `None` allows the first needle to match at offset 0. On
    /// failure returns the needle that was not found.
    fn find_chain(&self, text: &str, mut cursor: Option<usize>) -> Result<Match, &Needle> {
        let mut found = Match { start: 0, len: 0 };
        for needle in &self.needles {
            let start = cursor.map_or(0, |c| c + 1);
            let (offset, len) = needle.find_from(text, start).ok_or(needle)?;
            found = Match { start: offset, len };
            cursor = Some(offset);
        }
        Ok(found)
    }
}

/// Inner text of a `{{...}}` needle.
pub fn source_needle(item: &str) -> Option<&str> {
    item.strip_prefix(SOURCE_NEEDLE_OPEN)?
        .strip_suffix(SOURCE_NEEDLE_CLOSE)
}

/// Smallest char boundary at or after `index`, or `None` past the end.
fn ceil_char_boundary(text: &str, mut index: usize) -> Option<usize> {
    while index <= text.len() {
        if text.is_char_boundary(index) {
            return Some(index);
        }
        index += 1;
    }
    None
}
