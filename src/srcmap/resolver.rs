use crate::position::{line_column_to_offset, offset_to_line_column};
use crate::srcmap::document::SourceMapDocument;
use crate::srcmap::errors::SourceMapError;
use log::debug;
use std::fmt;

/// A position inside an original source file.
#[derive(Debug, Clone, Copy)]
pub enum OriginalPosition<'a> {
    /// Byte offset into the original text
    Offset(usize),
    /// Needles located one after another in the original text; the last
    /// needle's start is the position
    Needles(&'a [String]),
}

impl fmt::Display for OriginalPosition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginalPosition::Offset(offset) => write!(f, "offset {offset}"),
            OriginalPosition::Needles(needles) => write!(f, "{needles:?}"),
        }
    }
}

/// An identifier found in generated text by translating an original position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentifier {
    pub offset: usize,
    pub name: String,
}

/// Capability used by needle resolution to look up source-mapped needles.
pub trait SourceLookup {
    /// Locate `needles` in the original source and return the identifier at the
    /// translated offset in `generated`.
    fn identifier(
        &self,
        generated: &str,
        needles: &[String],
    ) -> Result<ResolvedIdentifier, SourceMapError>;
}

/// Translates positions in one original source file into generated offsets.
#[derive(Debug, Clone, Copy)]
pub struct SourceMapResolver<'a> {
    document: &'a SourceMapDocument,
    source_hint: &'a str,
}

impl<'a> SourceMapResolver<'a> {
    /// `source_hint` is matched as a suffix of the map's source paths.
    pub fn new(document: &'a SourceMapDocument, source_hint: &'a str) -> Self {
        Self {
            document,
            source_hint,
        }
    }

    /// Offset in `generated` equivalent to `position` in the original source.
    pub fn generated_offset(
        &self,
        generated: &str,
        position: OriginalPosition<'_>,
    ) -> Result<usize, SourceMapError> {
        let source = self.document.find_source(self.source_hint)?;

        let original_offset = match position {
            OriginalPosition::Offset(offset) => offset,
            OriginalPosition::Needles(needles) => {
                find_original_offset(source.content, source.path, needles)?
            }
        };
        let (line, column) = offset_to_line_column(source.content, original_offset);

        // Several generated locations can map back to one original position;
        // the last entry of the table wins.
        let mapping = self
            .document
            .mappings()
            .iter()
            .rev()
            .find(|m| {
                m.source == source.index
                    && m.original_line as usize == line
                    && m.original_column as usize == column
            })
            .ok_or_else(|| SourceMapError::NoMapping {
                source_path: source.path.to_string(),
                position: position.to_string(),
                line,
                column,
            })?;

        let generated_line = mapping.generated_line as usize;
        let generated_column = mapping.generated_column as usize;
        let offset = line_column_to_offset(generated, generated_line, generated_column).ok_or(
            SourceMapError::GeneratedOutOfRange {
                line: generated_line,
                column: generated_column,
            },
        )?;

        debug!(
            "source map: {} {} ({line}:{column}) -> generated {generated_line}:{generated_column} (offset {offset})",
            source.path, position
        );
        Ok(offset)
    }

    /// Identifier starting at the generated offset of `needles`.
    pub fn identifier_at(
        &self,
        generated: &str,
        needles: &[String],
    ) -> Result<ResolvedIdentifier, SourceMapError> {
        let offset = self.generated_offset(generated, OriginalPosition::Needles(needles))?;
        let Some(rest) = generated.get(offset..) else {
            return Err(SourceMapError::NotAnIdentifier { offset });
        };
        let len = identifier_len(rest);
        if len == 0 {
            return Err(SourceMapError::NotAnIdentifier { offset });
        }

        Ok(ResolvedIdentifier {
            offset,
            name: generated[offset..offset + len].to_string(),
        })
    }
}

impl SourceLookup for SourceMapResolver<'_> {
    fn identifier(
        &self,
        generated: &str,
        needles: &[String],
    ) -> Result<ResolvedIdentifier, SourceMapError> {
        self.identifier_at(generated, needles)
    }
}

/// Chained search in original text. Each needle is searched from the previous
/// needle's start, so consecutive needles may match at the same position.
fn find_original_offset(
    content: &str,
    source_path: &str,
    needles: &[String],
) -> Result<usize, SourceMapError> {
    let mut cursor = 0;
    for needle in needles {
        cursor = content[cursor..]
            .find(needle.as_str())
            .map(|idx| cursor + idx)
            .ok_or_else(|| SourceMapError::NeedleNotFound {
                needle: needle.clone(),
                source_path: source_path.to_string(),
            })?;
    }
    Ok(cursor)
}

fn identifier_len(text: &str) -> usize {
    text.bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'$')
        .count()
}
