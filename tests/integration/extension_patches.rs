use super::install_extension;
use bundle_patcher::record::APPLIED_PATCHES_KEY;
use bundle_patcher::{
    apply_extension_patches, load_from_path, load_from_str, restore_extension,
    ExtensionDirectory, Manifest, PatchResult, PatchSource,
};
use std::fs;
use tempfile::TempDir;

const EXTENSION_JS: &str = r#""use strict";
function activate(context) {
    const telemetry = createTelemetry({ enabled: true });
    context.subscriptions.push(telemetry);
}
exports.activate = activate;
"#;

const LOCAL_PATCHES: &str = r#"[
    // turn telemetry off
    {
        "target": {"extension": "acme.tools"},
        "patches": [
            {"file": "dist/extension.js", "patches": [
                {"search": ["createTelemetry", "true"], "insertText": "false", "insertMode": "replace"},
                {"search": "context.subscriptions.push(telemetry);", "removeRange": [0, 39]}
            ]}
        ]
    }
]"#;

fn setup() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = install_extension(
        dir.path(),
        "acme",
        "tools",
        &[("dist/extension.js", EXTENSION_JS)],
    );
    (dir, root)
}

#[test]
fn test_apply_restore_round_trip() {
    let (dir, root) = setup();
    let locator = ExtensionDirectory::scan(dir.path()).unwrap();
    let set = load_from_str(LOCAL_PATCHES).unwrap();

    let report = apply_extension_patches(&set, PatchSource::Local, &locator);
    assert_eq!(report.applied_count(), 1, "{:?}", report.outcomes);

    let patched = fs::read_to_string(root.join("dist/extension.js")).unwrap();
    assert!(patched.contains("createTelemetry({ enabled: false })"));
    assert!(!patched.contains("subscriptions.push"));
    assert_eq!(
        fs::read_to_string(root.join("dist/extension.js.backup")).unwrap(),
        EXTENSION_JS
    );

    let manifest = fs::read_to_string(root.join("package.json")).unwrap();
    assert!(manifest.contains(APPLIED_PATCHES_KEY));
    assert!(manifest.contains("\"dist/extension.js\""));

    let restored = restore_extension(&root).unwrap();
    assert_eq!(restored.restored, ["dist/extension.js"]);
    assert_eq!(
        fs::read_to_string(root.join("dist/extension.js")).unwrap(),
        EXTENSION_JS
    );
    assert!(!root.join("dist/extension.js.backup").exists());
    assert!(Manifest::read(&root).unwrap().applied().is_empty());
}

#[test]
fn test_second_run_is_noop() {
    let (dir, root) = setup();
    let locator = ExtensionDirectory::scan(dir.path()).unwrap();
    let set = load_from_str(LOCAL_PATCHES).unwrap();

    let _ = apply_extension_patches(&set, PatchSource::Local, &locator);
    let after_first = fs::read_to_string(root.join("dist/extension.js")).unwrap();

    let report = apply_extension_patches(&set, PatchSource::Local, &locator);
    assert_eq!(report.applied_count(), 0);
    assert!(matches!(
        report.outcomes[0].result,
        Ok(PatchResult::AlreadyApplied { .. })
    ));
    assert_eq!(
        fs::read_to_string(root.join("dist/extension.js")).unwrap(),
        after_first
    );
}

#[test]
fn test_changed_rule_gets_new_hash() {
    let (dir, root) = setup();
    let locator = ExtensionDirectory::scan(dir.path()).unwrap();

    let first = load_from_str(LOCAL_PATCHES).unwrap();
    let _ = apply_extension_patches(&first, PatchSource::Local, &locator);

    let changed = load_from_str(&LOCAL_PATCHES.replace("\"false\"", "\"0\"")).unwrap();
    let report = apply_extension_patches(&changed, PatchSource::Local, &locator);

    // the new descriptor runs against the already patched file and no longer
    // finds `true`
    assert_eq!(report.applied_count(), 0);
    assert_eq!(report.failures().count(), 1);
    assert_eq!(Manifest::read(&root).unwrap().applied().len(), 1);
}

#[test]
fn test_downloaded_store_and_local_are_tracked_separately() {
    let (dir, root) = setup();
    let locator = ExtensionDirectory::scan(dir.path()).unwrap();

    let store_path = dir.path().join("downloaded.json");
    fs::write(
        &store_path,
        r#"{
            "https://patches.invalid/acme-tools.json": {
                "target": {"extension": ["acme.tools", "acme.missing"]},
                "patches": [
                    {"file": "dist/extension.js", "patches": [
                        {"search": "exports.activate = activate;", "insertText": "\nexports.patched = true;"}
                    ]}
                ]
            }
        }"#,
    )
    .unwrap();

    let remote = load_from_path(&store_path).unwrap();
    let local = load_from_str(LOCAL_PATCHES).unwrap();

    let mut report = apply_extension_patches(&remote, PatchSource::Remote, &locator);
    report.merge(apply_extension_patches(&local, PatchSource::Local, &locator));

    assert_eq!(report.applied_count(), 2);
    assert!(matches!(
        report.outcomes[1].result,
        Ok(PatchResult::TargetNotInstalled { .. })
    ));

    let hashes: Vec<String> = Manifest::read(&root)
        .unwrap()
        .applied()
        .into_iter()
        .map(|(hash, _)| hash)
        .collect();
    assert_eq!(hashes.len(), 2);
    assert!(hashes[0].starts_with("remote-"));
    assert!(hashes[1].starts_with("local-"));

    let patched = fs::read_to_string(root.join("dist/extension.js")).unwrap();
    assert!(patched.ends_with("exports.activate = activate;\nexports.patched = true;\n"));

    // restore undoes both descriptors in one go
    restore_extension(&root).unwrap();
    assert_eq!(
        fs::read_to_string(root.join("dist/extension.js")).unwrap(),
        EXTENSION_JS
    );
}

#[test]
fn test_hash_recorded_by_another_run_is_skipped() {
    let (dir, root) = setup();
    let locator = ExtensionDirectory::scan(dir.path()).unwrap();
    let set = load_from_str(LOCAL_PATCHES).unwrap();

    let hash = bundle_patcher::patch_hash(PatchSource::Local, &set.patches[0]).unwrap();
    let mut manifest = Manifest::read(&root).unwrap();
    manifest.record(&hash, &["dist/extension.js".to_string()]);
    manifest.write().unwrap();

    let report = apply_extension_patches(&set, PatchSource::Local, &locator);
    assert_eq!(report.skipped_hashes(), [hash.as_str()]);
    assert_eq!(
        fs::read_to_string(root.join("dist/extension.js")).unwrap(),
        EXTENSION_JS
    );
}

#[test]
fn test_override_directory_takes_precedence() {
    let (dir, installed_root) = setup();
    let checkout = dir.path().join("checkout");
    let checkout_root = install_extension(
        &checkout,
        "acme",
        "tools",
        &[("dist/extension.js", EXTENSION_JS)],
    );

    let locator = ExtensionDirectory::scan(dir.path())
        .unwrap()
        .with_overrides([("acme.tools".to_string(), checkout_root.clone())].into());
    let set = load_from_str(LOCAL_PATCHES).unwrap();

    let report = apply_extension_patches(&set, PatchSource::Local, &locator);
    assert_eq!(report.applied_count(), 1);
    assert_ne!(
        fs::read_to_string(checkout_root.join("dist/extension.js")).unwrap(),
        EXTENSION_JS
    );
    assert_eq!(
        fs::read_to_string(installed_root.join("dist/extension.js")).unwrap(),
        EXTENSION_JS
    );
}
