use bundle_patcher::cache::clear_cache;
use bundle_patcher::{
    apply_bundle_patches, inspect_location, load_from_str, BundleOptions, LocalSourceMaps,
};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const ORIGINAL: &str = "export function computeLayout(width) {\n    return width * 2;\n}\n";

const GENERATED: &str = "function c(n){return n*2}\n//# sourceMappingURL=main.js.map\n";

// function -> function, c -> computeLayout, n -> width (parameter),
// return -> return, n -> width (use)
const MAPPINGS: &str = "AAAO,SAAS,EAAc,GAC1B,OAAO";

const PATCHES: &str = r#"[
    {
        "target": {"workbenchJs": true},
        "patches": [
            {"file": "a.ts", "patches": [
                {"search": ["{{return}}", "{{width}}", "*2"], "insertText": "*3", "insertMode": "replace"},
                {"search": ["{{computeLayout}}", "}"], "insertText": ";globalThis.layout={{computeLayout}}"}
            ]}
        ]
    }
]"#;

fn setup() -> (TempDir, PathBuf) {
    clear_cache();
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("main.js");
    fs::write(&script, GENERATED).unwrap();

    let map = serde_json::json!({
        "version": 3,
        "file": "main.js",
        "sources": ["a.ts"],
        "sourcesContent": [ORIGINAL],
        "names": [],
        "mappings": MAPPINGS,
    });
    fs::write(dir.path().join("main.js.map"), map.to_string()).unwrap();
    (dir, script)
}

#[test]
fn test_source_mapped_rules_patch_minified_script() {
    let (_dir, script) = setup();
    let set = load_from_str(PATCHES).unwrap();

    let report = apply_bundle_patches(
        &script,
        &set,
        &LocalSourceMaps::default(),
        BundleOptions::default(),
    )
    .unwrap();

    assert_eq!(report.applied, 1);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(
        fs::read_to_string(&script).unwrap(),
        "function c(n){return n*3};globalThis.layout=c\n//# sourceMappingURL=main.js.map\n"
    );
    assert_eq!(
        fs::read_to_string(script.with_file_name("main.js.backup")).unwrap(),
        GENERATED
    );
}

#[test]
fn test_rerun_starts_from_pristine_backup() {
    let (_dir, script) = setup();
    let set = load_from_str(PATCHES).unwrap();
    let maps = LocalSourceMaps::default();

    apply_bundle_patches(&script, &set, &maps, BundleOptions::default()).unwrap();
    let first = fs::read_to_string(&script).unwrap();

    let report = apply_bundle_patches(&script, &set, &maps, BundleOptions::default()).unwrap();
    assert_eq!(report.pristine, GENERATED);
    assert_eq!(fs::read_to_string(&script).unwrap(), first);
}

#[test]
fn test_dry_run_leaves_disk_untouched() {
    let (_dir, script) = setup();
    let set = load_from_str(PATCHES).unwrap();

    let report = apply_bundle_patches(
        &script,
        &set,
        &LocalSourceMaps::default(),
        BundleOptions { dry_run: true },
    )
    .unwrap();

    assert!(report.changed());
    assert_eq!(fs::read_to_string(&script).unwrap(), GENERATED);
    assert!(!script.with_file_name("main.js.backup").exists());
}

#[test]
fn test_explicit_map_path_and_missing_needle() {
    let (dir, script) = setup();
    let renamed = dir.path().join("elsewhere.map");
    fs::rename(dir.path().join("main.js.map"), &renamed).unwrap();

    let set = load_from_str(
        r#"[
            {"target": {"workbenchJs": true}, "patches": [
                {"file": "a.ts", "patches": [{"search": "{{height}}", "insertText": "x"}]}
            ]},
            {"target": {"workbenchJs": true}, "patches": [
                {"file": "a.ts", "patches": [{"search": "{{return}}", "insertText": "(", "insertMode": "before", "insertOffset": 7}]}
            ]}
        ]"#,
    )
    .unwrap();

    let report = apply_bundle_patches(
        &script,
        &set,
        &LocalSourceMaps::new(Some(renamed)),
        BundleOptions::default(),
    )
    .unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, 0);
    assert!(fs::read_to_string(&script)
        .unwrap()
        .starts_with("function c(n){return (n*2}"));
}

#[test]
fn test_inspect_reports_generated_location() {
    let (_dir, script) = setup();

    let inspection = inspect_location(
        &script,
        "a.ts",
        &["return".to_string(), "width".to_string()],
        &LocalSourceMaps::default(),
    )
    .unwrap();

    assert_eq!(inspection.source, "a.ts");
    assert_eq!(inspection.offset, 21);
    assert_eq!((inspection.line, inspection.column), (0, 21));
    assert!(inspection.excerpt.contains("return n*2"));
}

#[test]
fn test_non_ascii_literal_before_mapped_identifier() {
    clear_cache();
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("label.js");
    fs::write(
        &script,
        "var l='é';callMe()\n//# sourceMappingURL=label.js.map\n",
    )
    .unwrap();

    // l -> label (column 4 both sides), callMe: generated column 10 ->
    // original column 17, in UTF-16 units
    let map = serde_json::json!({
        "version": 3,
        "sources": ["label.ts"],
        "sourcesContent": ["let label = 'é'; callMe();\n"],
        "names": [],
        "mappings": "IAAI,MAAa",
    });
    fs::write(dir.path().join("label.js.map"), map.to_string()).unwrap();

    let set = load_from_str(
        r#"[{"target": {"workbenchJs": true}, "patches": [
            {"file": "label.ts", "patches": [
                {"search": ["{{label}}", "callMe()"], "insertText": ";{{label}}.done=1"},
                {"search": "{{callMe}}", "insertText": "safe_", "insertMode": "before"}
            ]}
        ]}]"#,
    )
    .unwrap();

    let report = apply_bundle_patches(
        &script,
        &set,
        &LocalSourceMaps::default(),
        BundleOptions { dry_run: true },
    )
    .unwrap();

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert!(report.output.starts_with("var l='é';safe_callMe();l.done=1\n"));
}
