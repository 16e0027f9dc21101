use crate::srcmap::errors::SourceMapError;
use std::fs;
use std::path::{Path, PathBuf};

const MAPPING_URL_MARKER: &str = "//# sourceMappingURL=";

/// One entry of the mapping table. Lines and columns are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub generated_line: u32,
    pub generated_column: u32,
    /// Index into [`SourceMapDocument::sources`]
    pub source: u32,
    pub original_line: u32,
    pub original_column: u32,
}

/// An owned, decoded source map: original sources, their embedded text and
/// the flat mapping table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMapDocument {
    sources: Vec<String>,
    contents: Vec<Option<String>>,
    mappings: Vec<Mapping>,
}

/// An original source file located by name within a document.
#[derive(Debug, Clone, Copy)]
pub struct OriginalSource<'a> {
    pub index: u32,
    pub path: &'a str,
    pub content: &'a str,
}

impl SourceMapDocument {
    /// Build a document from already decoded parts.
    ///
    /// `contents` is aligned with `sources`; missing trailing entries are
    /// treated as sources without embedded text.
    pub fn new(
        sources: Vec<String>,
        mut contents: Vec<Option<String>>,
        mappings: Vec<Mapping>,
    ) -> Self {
        contents.resize(sources.len(), None);
        Self {
            sources,
            contents,
            mappings,
        }
    }

    /// Decode a v3 JSON source map.
    pub fn from_slice(path: &Path, bytes: &[u8]) -> Result<Self, SourceMapError> {
        let map = sourcemap::SourceMap::from_slice(bytes).map_err(|source| {
            SourceMapError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let count = map.get_source_count();
        let sources = (0..count)
            .map(|idx| map.get_source(idx).unwrap_or_default().to_string())
            .collect();
        let contents = (0..count)
            .map(|idx| map.get_source_contents(idx).map(str::to_string))
            .collect();
        let mappings = map
            .tokens()
            .filter(|token| token.get_src_id() < count)
            .map(|token| Mapping {
                generated_line: token.get_dst_line(),
                generated_column: token.get_dst_col(),
                source: token.get_src_id(),
                original_line: token.get_src_line(),
                original_column: token.get_src_col(),
            })
            .collect();

        Ok(Self::new(sources, contents, mappings))
    }

    /// Read and decode a source map file.
    pub fn from_path(path: &Path) -> Result<Self, SourceMapError> {
        let bytes = fs::read(path).map_err(|source| SourceMapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_slice(path, &bytes)
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// Find the first original source whose path ends with `hint`.
    pub fn find_source(&self, hint: &str) -> Result<OriginalSource<'_>, SourceMapError> {
        let (index, path) = self
            .sources
            .iter()
            .enumerate()
            .find(|(_, path)| path.ends_with(hint))
            .ok_or_else(|| SourceMapError::SourceNotFound {
                hint: hint.to_string(),
            })?;

        let content = self
            .contents
            .get(index)
            .and_then(Option::as_deref)
            .ok_or_else(|| SourceMapError::MissingContent {
                source_path: path.clone(),
            })?;

        Ok(OriginalSource {
            index: index as u32,
            path,
            content,
        })
    }
}

/// The URL from the last `//# sourceMappingURL=` comment of a generated script.
pub fn mapping_url(generated: &str) -> Option<&str> {
    let start = generated.rfind(MAPPING_URL_MARKER)? + MAPPING_URL_MARKER.len();
    let url = generated[start..].lines().next().unwrap_or("").trim();
    if url.is_empty() {
        None
    } else {
        Some(url)
    }
}

/// Resolve the on-disk location of the map referenced by a generated script.
///
/// Relative URLs resolve against the script's directory. Remote and inline
/// (`data:`) URLs are rejected.
pub fn locate_map(script: &Path, generated: &str) -> Result<PathBuf, SourceMapError> {
    let url = mapping_url(generated).ok_or(SourceMapError::NoMappingUrl)?;

    if let Some(path) = url.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if url.contains("://") || url.starts_with("data:") {
        return Err(SourceMapError::UnsupportedUrl {
            url: url.to_string(),
        });
    }

    let base = script.parent().unwrap_or_else(|| Path::new("."));
    Ok(base.join(url))
}
