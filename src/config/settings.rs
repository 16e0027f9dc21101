use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default settings file name looked up in the current directory.
pub const SETTINGS_FILE: &str = "bundle-patcher.toml";

/// Patcher settings, loaded from TOML.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Settings {
    /// Directory containing installed extensions
    #[serde(default)]
    pub extensions_dir: Option<PathBuf>,
    /// Local patch set files, applied after downloaded ones
    #[serde(default)]
    pub local_patches: Vec<PathBuf>,
    /// Store of previously downloaded remote patch sets
    #[serde(default)]
    pub downloaded_patches: Option<PathBuf>,
    /// Log patch failures at debug level instead of reporting them
    #[serde(default)]
    pub silent_patch_errors: bool,
    /// Extensions currently loaded by a running host
    #[serde(default)]
    pub active_extensions: Vec<String>,
    #[serde(default)]
    pub bundled_script: Option<PathBuf>,
    #[serde(default)]
    pub source_map: Option<PathBuf>,
    /// Extension id -> checkout directory, checked before `extensions_dir`
    #[serde(default)]
    pub extension_paths: BTreeMap<String, PathBuf>,
}

impl Settings {
    /// Extensions directory from settings, falling back to `~/.vscode/extensions`.
    pub fn resolved_extensions_dir(&self) -> Option<PathBuf> {
        match &self.extensions_dir {
            Some(dir) => Some(expand_home(dir)),
            None => home::home_dir().map(|home| home.join(".vscode").join("extensions")),
        }
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match home::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
