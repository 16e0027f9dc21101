use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceMapError {
    #[error("source file not found in source map: {hint}")]
    SourceNotFound { hint: String },

    #[error("source map carries no embedded content for {source_path}")]
    MissingContent { source_path: String },

    #[error("cannot find {needle:?} in original source {source_path}")]
    NeedleNotFound { needle: String, source_path: String },

    #[error("couldn't find generated position in {source_path} for {position} (line {line}, column {column})")]
    NoMapping {
        source_path: String,
        position: String,
        line: usize,
        column: usize,
    },

    #[error("generated line {line}, column {column} lies outside the generated text")]
    GeneratedOutOfRange { line: usize, column: usize },

    #[error("generated offset {offset} is not a valid identifier")]
    NotAnIdentifier { offset: usize },

    #[error("generated script has no sourceMappingURL comment")]
    NoMappingUrl,

    #[error("source map URL {url} cannot be loaded locally; pass the map path explicitly")]
    UnsupportedUrl { url: String },

    #[error("no source map available for source-mapped needles")]
    Unavailable,

    #[error("I/O error reading source map {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse source map {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: sourcemap::Error,
    },
}
