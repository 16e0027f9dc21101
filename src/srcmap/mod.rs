//! Source map translation for bundled scripts.
//!
//! Minified bundles no longer contain the identifiers written in the original
//! sources. This module locates a position inside an original source file
//! (embedded in the map's `sourcesContent`) and translates it through the
//! map's mapping table into a byte offset in the generated script.

pub mod document;
pub mod errors;
pub mod resolver;

pub use document::{locate_map, mapping_url, Mapping, OriginalSource, SourceMapDocument};
pub use errors::SourceMapError;
pub use resolver::{OriginalPosition, ResolvedIdentifier, SourceLookup, SourceMapResolver};
