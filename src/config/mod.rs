pub mod loader;
pub mod schema;
pub mod settings;

pub use loader::{
    load_from_path, load_from_str, load_settings_from_path, load_settings_from_str, ConfigError,
};
pub use schema::{
    EditRule, ExtensionIds, FilePatch, InsertMode, PatchDescription, PatchSet, PatchTarget,
    Search, SearchMode, ValidationError, ValidationIssue,
};
pub use settings::{expand_home, Settings, SETTINGS_FILE};
