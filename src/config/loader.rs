use crate::config::schema::{PatchDescription, PatchSet, ValidationError};
use crate::config::settings::Settings;
use json_comments::CommentSettings;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Json {
        path: Option<PathBuf>,
        /// Store key (download URL) of the failing entry, if any
        entry: Option<String>,
        source: serde_json::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Io { .. } => self,
            ConfigError::Json {
                path: None,
                entry,
                source,
            } => ConfigError::Json {
                path: Some(path),
                entry,
                source,
            },
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            ConfigError::Json {
                path,
                entry,
                source,
            } => {
                write!(f, "failed to parse patch set JSON")?;
                if let Some(path) = path {
                    write!(f, " ({})", path.display())?;
                }
                if let Some(entry) = entry {
                    write!(f, " entry {entry}")?;
                }
                write!(f, ": {source}")
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse settings TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse settings TOML: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid patch set ({}): {}", path.display(), source),
                None => write!(f, "invalid patch set: {}", source),
            },
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Json { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
        }
    }
}

/// Parse a patch set document.
///
/// Accepts either an array of descriptors (local patches) or an object mapping
/// download URLs to descriptors (a downloaded remote store). `//` and `/* */`
/// comments are allowed.
pub fn load_from_str(input: &str) -> Result<PatchSet, ConfigError> {
    let json_error = |entry: Option<String>| {
        move |source| ConfigError::Json {
            path: None,
            entry,
            source,
        }
    };

    let stripped = CommentSettings::c_style().strip_comments(input.as_bytes());
    let value: serde_json::Value =
        serde_json::from_reader(stripped).map_err(json_error(None))?;

    let patches = match value {
        serde_json::Value::Object(store) => store
            .into_iter()
            .map(|(url, entry)| {
                serde_json::from_value::<PatchDescription>(entry).map_err(json_error(Some(url)))
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => serde_json::from_value::<Vec<PatchDescription>>(other)
            .map_err(json_error(None))?,
    };

    let set = PatchSet::new(patches);
    set.validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(set)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchSet, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

pub fn load_settings_from_str(input: &str) -> Result<Settings, ConfigError> {
    toml_edit::de::from_str(input).map_err(|source| ConfigError::Toml { path: None, source })
}

pub fn load_settings_from_path(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_settings_from_str(&contents).map_err(|error| error.with_path(path))
}
