use crate::edit::RulePlan;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered collection of patch descriptors, as loaded from a local patch
/// file or a downloaded store.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PatchSet {
    pub patches: Vec<PatchDescription>,
}

impl PatchSet {
    pub fn new(patches: Vec<PatchDescription>) -> Self {
        Self { patches }
    }

    /// Descriptors targeting installed extensions.
    pub fn extension_patches(&self) -> impl Iterator<Item = &PatchDescription> {
        self.patches
            .iter()
            .filter(|patch| matches!(patch.target, PatchTarget::Extension { .. }))
    }

    /// Descriptors targeting the bundled application script.
    pub fn bundled_script_patches(&self) -> impl Iterator<Item = &PatchDescription> {
        self.patches.iter().filter(|patch| patch.target.is_bundled_script())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        for (index, patch) in self.patches.iter().enumerate() {
            let label = format!("#{index} ({})", patch.target);

            match &patch.target {
                PatchTarget::Extension { extension } => {
                    if extension.ids().is_empty()
                        || extension.ids().iter().any(|id| id.trim().is_empty())
                    {
                        issues.push(ValidationIssue::MissingField {
                            patch: label.clone(),
                            field: "target.extension",
                        });
                    }
                }
                PatchTarget::BundledScript { bundled_script } => {
                    if !bundled_script {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch: label.clone(),
                            message: "workbenchJs target must be true".to_string(),
                        });
                    }
                }
            }

            let source_mapped = patch.target.is_bundled_script();
            for file_patch in &patch.patches {
                if file_patch.file.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        patch: label.clone(),
                        field: "patches.file",
                    });
                }

                for (rule_index, rule) in file_patch.patches.iter().enumerate() {
                    for (name, range) in [
                        ("removeRange", rule.remove_range),
                        ("removeRangeAfter", rule.remove_range_after),
                    ] {
                        if let Some([start, end]) = range {
                            if start > end {
                                issues.push(ValidationIssue::InvalidRule {
                                    patch: label.clone(),
                                    file: file_patch.file.clone(),
                                    rule: rule_index,
                                    message: format!("{name} start {start} is after end {end}"),
                                });
                            }
                        }
                    }

                    if let Err(err) = RulePlan::compile(rule, source_mapped) {
                        issues.push(ValidationIssue::InvalidRule {
                            patch: label.clone(),
                            file: file_patch.file.clone(),
                            rule: rule_index,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

/// One patch descriptor: a target plus the file patches to apply to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchDescription {
    pub target: PatchTarget,
    pub patches: Vec<FilePatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, deny_unknown_fields)]
pub enum PatchTarget {
    Extension {
        extension: ExtensionIds,
    },
    BundledScript {
        #[serde(rename = "workbenchJs", alias = "bundledScript")]
        bundled_script: bool,
    },
}

impl PatchTarget {
    pub fn is_bundled_script(&self) -> bool {
        matches!(
            self,
            PatchTarget::BundledScript {
                bundled_script: true
            }
        )
    }

    /// Extension identifiers this target names (empty for the bundled script).
    pub fn extension_ids(&self) -> &[String] {
        match self {
            PatchTarget::Extension { extension } => extension.ids(),
            PatchTarget::BundledScript { .. } => &[],
        }
    }
}

impl fmt::Display for PatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchTarget::Extension { extension } => write!(f, "{}", extension.ids().join(", ")),
            PatchTarget::BundledScript { .. } => write!(f, "bundled script"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtensionIds {
    One(String),
    Many(Vec<String>),
}

impl ExtensionIds {
    pub fn ids(&self) -> &[String] {
        match self {
            ExtensionIds::One(id) => std::slice::from_ref(id),
            ExtensionIds::Many(ids) => ids,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilePatch {
    /// Path relative to the target root. For the bundled script this is the
    /// original source file used to look up source-mapped needles.
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_can_be_missing: Option<bool>,
    #[serde(default)]
    pub patches: Vec<EditRule>,
}

impl FilePatch {
    pub fn can_be_missing(&self) -> bool {
        self.file_can_be_missing.unwrap_or(false)
    }
}

/// A single declarative edit. Unset fields keep their defaults when the rule
/// is compiled into a [`RulePlan`]:
///
/// | field           | default    |
/// |-----------------|------------|
/// | `searchMode`    | `single`   |
/// | `insertMode`    | `after`    |
/// | `insertOffset`  | `0`        |
/// | `patchOptional` | `false`    |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EditRule {
    pub search: Search,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_mode: Option<SearchMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_mode: Option<InsertMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_offset: Option<i64>,
    /// `[start, end]` relative to the match start, removed before inserting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_range: Option<[i64; 2]>,
    /// `[start, end]` relative to the match end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_range_after: Option<[i64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_optional: Option<bool>,
}

impl EditRule {
    /// A rule searching for `search` with every other field unset.
    pub fn new(search: impl Into<Search>) -> Self {
        Self {
            search: search.into(),
            search_mode: None,
            insert_text: None,
            insert_mode: None,
            insert_offset: None,
            remove_range: None,
            remove_range_after: None,
            patch_optional: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Search {
    One(String),
    Many(Vec<String>),
}

impl Search {
    pub fn needles(&self) -> &[String] {
        match self {
            Search::One(needle) => std::slice::from_ref(needle),
            Search::Many(needles) => needles,
        }
    }
}

impl fmt::Display for Search {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl From<&str> for Search {
    fn from(needle: &str) -> Self {
        Search::One(needle.to_string())
    }
}

impl From<String> for Search {
    fn from(needle: String) -> Self {
        Search::One(needle)
    }
}

impl<const N: usize> From<[&str; N]> for Search {
    fn from(needles: [&str; N]) -> Self {
        Search::Many(needles.iter().map(|n| n.to_string()).collect())
    }
}

impl From<Vec<String>> for Search {
    fn from(needles: Vec<String>) -> Self {
        Search::Many(needles)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Single,
    Multiple,
    Regex,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertMode {
    Before,
    #[default]
    After,
    Replace,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    MissingField {
        patch: String,
        field: &'static str,
    },
    InvalidCombo {
        patch: String,
        message: String,
    },
    InvalidRule {
        patch: String,
        file: String,
        rule: usize,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingField { patch, field } => {
                write!(f, "patch {patch} missing required field '{field}'")
            }
            ValidationIssue::InvalidCombo { patch, message } => {
                write!(f, "patch {patch} has invalid configuration: {message}")
            }
            ValidationIssue::InvalidRule {
                patch,
                file,
                rule,
                message,
            } => write!(f, "patch {patch}, file {file}, rule {rule}: {message}"),
        }
    }
}
