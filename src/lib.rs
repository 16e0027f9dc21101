//! Bundle Patcher: declarative text patches for installed extensions and
//! bundled application scripts
//!
//! Patches are described as data (needles to search for plus edits to make at
//! each match) and applied as plain byte-span edits, with no parser for the
//! patched language. Minified bundles are handled by resolving needles written
//! against the original sources through the bundle's source map.
//!
//! # Architecture
//!
//! - [`needle`] turns a search specification into match positions
//! - [`edit`] turns matches plus a rule's edits into a new buffer, compiling
//!   every operation down to a single [`Splice`] primitive
//! - [`srcmap`] translates original-source positions into generated offsets
//! - [`applicator`] and [`bundle`] orchestrate whole patch sets against
//!   extensions and the bundled script
//!
//! # Safety
//!
//! - A pristine `.backup` is kept next to every file before its first edit
//! - Atomic file writes (tempfile + fsync + rename)
//! - File patches cannot escape their target root
//! - Applied descriptors are recorded by content hash and never reapplied
//!
//! # Example
//!
//! ```
//! use bundle_patcher::{apply_rule_to_text, EditRule, InsertMode};
//!
//! let mut rule = EditRule::new("world");
//! rule.insert_text = Some("universe".to_string());
//! rule.insert_mode = Some(InsertMode::Replace);
//!
//! let patched = apply_rule_to_text("Hello world", &rule).unwrap();
//! assert_eq!(patched, "Hello universe");
//! ```

pub mod applicator;
pub mod backup;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod edit;
pub mod locator;
pub mod needle;
pub mod position;
pub mod record;
pub mod safety;
pub mod srcmap;

// Re-exports
pub use applicator::{
    apply_extension_patches, restore_extension, ApplicationError, ApplyReport, PatchOutcome,
    PatchResult, RestoreReport,
};
pub use bundle::{
    apply_bundle_patches, inspect_location, BundleError, BundleOptions, BundleReport,
    Inspection, LocalSourceMaps, SourceMapProvider,
};
pub use config::{
    load_from_path, load_from_str, load_settings_from_path, ConfigError, EditRule, InsertMode,
    PatchDescription, PatchSet, PatchTarget, Search, SearchMode, Settings,
};
pub use edit::{apply_rule, apply_rule_to_text, apply_rules, EditError, RulePlan, Splice};
pub use locator::{ExtensionDirectory, ExtensionLocator, InstalledExtension};
pub use needle::{Match, NeedleError, SearchSpec};
pub use record::{patch_hash, Manifest, PatchSource};
pub use safety::{SafetyError, TargetGuard};
pub use srcmap::{SourceMapDocument, SourceMapError, SourceMapResolver};
