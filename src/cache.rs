//! Thread-local memo of decoded source maps.
//!
//! Bundled-script maps are large and every source-mapped needle consults one,
//! so each map is decoded once per process and shared afterwards.
//! Cache is capped at 16 entries; it is cleared when full.

use crate::srcmap::{SourceMapDocument, SourceMapError};
use log::debug;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

const MAX_CACHE_ENTRIES: usize = 16;

thread_local! {
    // Keyed by canonical path when the file exists, so `./a.map` and `a.map`
    // share an entry.
    static SOURCE_MAP_CACHE: RefCell<HashMap<PathBuf, Rc<SourceMapDocument>>> =
        RefCell::new(HashMap::new());
}

/// Get a decoded source map from cache, or load and cache it.
///
/// Failed loads are not cached.
pub fn get_or_load(path: &Path) -> Result<Rc<SourceMapDocument>, SourceMapError> {
    let cache_key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    if let Some(doc) = SOURCE_MAP_CACHE.with(|cache| cache.borrow().get(&cache_key).cloned()) {
        return Ok(doc);
    }

    let doc = Rc::new(SourceMapDocument::from_path(path)?);
    debug!(
        "loaded source map {} ({} sources, {} mappings)",
        path.display(),
        doc.sources().len(),
        doc.mappings().len()
    );

    SOURCE_MAP_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if cache.len() >= MAX_CACHE_ENTRIES {
            cache.clear();
        }
        cache.insert(cache_key, Rc::clone(&doc));
    });
    Ok(doc)
}

/// Clear the source map cache (mainly for testing).
pub fn clear_cache() {
    SOURCE_MAP_CACHE.with(|cache| {
        cache.borrow_mut().clear();
    });
}

/// Number of cached documents.
pub fn cache_size() -> usize {
    SOURCE_MAP_CACHE.with(|cache| cache.borrow().len())
}
