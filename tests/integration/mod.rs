//! End-to-end tests against on-disk extensions and bundled scripts.

mod bundled_script;
mod extension_patches;

use std::fs;
use std::path::{Path, PathBuf};

/// Install a fake extension under `extensions_dir` and return its root.
pub fn install_extension(
    extensions_dir: &Path,
    publisher: &str,
    name: &str,
    files: &[(&str, &str)],
) -> PathBuf {
    let root = extensions_dir.join(format!("{publisher}.{name}-1.0.0"));
    fs::create_dir_all(&root).unwrap();
    fs::write(
        root.join("package.json"),
        format!(
            "{{\n    \"name\": \"{name}\",\n    \"publisher\": \"{publisher}\",\n    \"version\": \"1.0.0\"\n}}"
        ),
    )
    .unwrap();

    for (file, content) in files {
        let path = root.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    root
}
