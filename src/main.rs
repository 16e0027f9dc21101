use anyhow::{Context, Result};
use bundle_patcher::config::{
    expand_home, load_from_path, load_settings_from_path, PatchSet, Settings, SETTINGS_FILE,
};
use bundle_patcher::{
    apply_bundle_patches, apply_extension_patches, inspect_location, restore_extension,
    ApplicationError, ApplyReport, BundleOptions, ExtensionDirectory, ExtensionLocator,
    LocalSourceMaps, Manifest, PatchResult, PatchSource,
};
use clap::{Parser, Subcommand};
use colored::Colorize;
use env_logger::Builder;
use log::{debug, Level, LevelFilter};
use similar::{ChangeTag, TextDiff};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "bundle-patcher")]
#[command(
    about = "Declarative text patches for installed extensions and bundled scripts",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Settings file (defaults to ./bundle-patcher.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity. -v for info, -vv for debug, -vvv for trace.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patch sets to installed extensions
    Apply {
        /// Local patch set file(s) (overrides `local_patches`)
        #[arg(short, long)]
        patches: Vec<PathBuf>,

        /// Downloaded remote patch store (overrides `downloaded_patches`)
        #[arg(long)]
        downloaded: Option<PathBuf>,

        /// Installed extensions directory
        #[arg(short, long)]
        extensions_dir: Option<PathBuf>,
    },

    /// Restore patched extensions from their backups
    Unpatch {
        /// Extension ids to restore (all patched extensions if omitted)
        ids: Vec<String>,

        /// Installed extensions directory
        #[arg(short, long)]
        extensions_dir: Option<PathBuf>,
    },

    /// Show the applied-patch record of installed extensions
    Status {
        /// Extension ids to show (all patched extensions if omitted)
        ids: Vec<String>,

        /// Installed extensions directory
        #[arg(short, long)]
        extensions_dir: Option<PathBuf>,
    },

    /// Rebuild the bundled application script with its patches applied
    Bundle {
        /// Bundled script (overrides `bundled_script`)
        #[arg(short, long)]
        script: Option<PathBuf>,

        /// Source map (defaults to the script's sourceMappingURL)
        #[arg(short = 'm', long)]
        source_map: Option<PathBuf>,

        /// Patch set file(s) (defaults to the configured sets)
        #[arg(short, long)]
        patches: Vec<PathBuf>,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Translate needles in an original source into a bundled script location
    Inspect {
        /// Original source path, or a suffix of it
        #[arg(long)]
        source: String,

        /// Needles located one after another in the original source
        #[arg(required = true)]
        needles: Vec<String>,

        /// Bundled script (overrides `bundled_script`)
        #[arg(short, long)]
        script: Option<PathBuf>,

        /// Source map (defaults to the script's sourceMappingURL)
        #[arg(short = 'm', long)]
        source_map: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Apply {
            patches,
            downloaded,
            extensions_dir,
        } => cmd_apply(&settings, patches, downloaded, extensions_dir),

        Commands::Unpatch {
            ids,
            extensions_dir,
        } => cmd_unpatch(&settings, ids, extensions_dir),

        Commands::Status {
            ids,
            extensions_dir,
        } => cmd_status(&settings, ids, extensions_dir),

        Commands::Bundle {
            script,
            source_map,
            patches,
            dry_run,
            diff,
        } => cmd_bundle(&settings, script, source_map, patches, dry_run, diff),

        Commands::Inspect {
            source,
            needles,
            script,
            source_map,
        } => cmd_inspect(&settings, &source, &needles, script, source_map),
    }
}

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| match record.level() {
            Level::Error => writeln!(buf, "{} {}", "error:".red().bold(), record.args()),
            Level::Warn => writeln!(buf, "{} {}", "warning:".yellow().bold(), record.args()),
            Level::Info => writeln!(buf, "{}", record.args()),
            Level::Debug => writeln!(buf, "{} {}", "debug:".blue().bold(), record.args()),
            Level::Trace => writeln!(buf, "{} {}", "trace:".cyan().bold(), record.args()),
        })
        .init();
}

/// Explicit `--config`, else `./bundle-patcher.toml` if it exists, else defaults.
fn load_settings(explicit: Option<&Path>) -> Result<Settings> {
    match explicit {
        Some(path) => Ok(load_settings_from_path(path)?),
        None if Path::new(SETTINGS_FILE).is_file() => Ok(load_settings_from_path(SETTINGS_FILE)?),
        None => Ok(Settings::default()),
    }
}

/// Patch sets to apply, downloaded store first, each tagged with its source.
fn load_patch_sets(
    settings: &Settings,
    local: Vec<PathBuf>,
    downloaded: Option<PathBuf>,
) -> Result<Vec<(PatchSource, PatchSet)>> {
    let local = if local.is_empty() {
        settings.local_patches.clone()
    } else {
        local
    };
    let downloaded = downloaded.or_else(|| settings.downloaded_patches.clone());

    let mut sets = Vec::new();
    if let Some(path) = downloaded {
        let path = expand_home(&path);
        let set = load_from_path(&path)
            .with_context(|| format!("failed to load downloaded patches {}", path.display()))?;
        sets.push((PatchSource::Remote, set));
    }
    for path in local {
        let path = expand_home(&path);
        let set = load_from_path(&path)
            .with_context(|| format!("failed to load patch set {}", path.display()))?;
        sets.push((PatchSource::Local, set));
    }

    if sets.is_empty() {
        anyhow::bail!(
            "No patch sets configured. Pass --patches or set local_patches in {}",
            SETTINGS_FILE
        );
    }
    Ok(sets)
}

fn locator(settings: &Settings, extensions_dir: Option<PathBuf>) -> Result<ExtensionDirectory> {
    let dir = extensions_dir
        .map(|dir| expand_home(&dir))
        .or_else(|| settings.resolved_extensions_dir())
        .context("Could not determine the extensions directory; pass --extensions-dir")?;

    let overrides = settings
        .extension_paths
        .iter()
        .map(|(id, path)| (id.clone(), expand_home(path)))
        .collect();

    Ok(ExtensionDirectory::scan(&dir)?
        .with_overrides(overrides)
        .with_active(settings.active_extensions.clone()))
}

/// Extensions named by `ids`, or every installed extension when empty.
fn selected_extensions(
    locator: &ExtensionDirectory,
    ids: &[String],
) -> Vec<bundle_patcher::InstalledExtension> {
    if ids.is_empty() {
        return locator.installed();
    }
    ids.iter()
        .filter_map(|id| {
            let found = locator.find(id);
            if found.is_none() {
                eprintln!("{} {}: not installed", "⊘".cyan(), id);
            }
            found
        })
        .collect()
}

fn cmd_apply(
    settings: &Settings,
    patches: Vec<PathBuf>,
    downloaded: Option<PathBuf>,
    extensions_dir: Option<PathBuf>,
) -> Result<()> {
    let sets = load_patch_sets(settings, patches, downloaded)?;
    let locator = locator(settings, extensions_dir)?;

    let mut report = ApplyReport::default();
    for (source, set) in &sets {
        report.merge(apply_extension_patches(set, *source, &locator));
    }

    print_apply_report(&report, settings.silent_patch_errors);

    if report.has_failures() && !settings.silent_patch_errors {
        std::process::exit(1);
    }
    Ok(())
}

fn print_apply_report(report: &ApplyReport, silent: bool) {
    let mut total_already_applied = 0;
    let mut total_skipped = 0;

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(PatchResult::Applied { target, files }) => {
                println!(
                    "{} {}: Applied to {}",
                    "✓".green(),
                    outcome.hash,
                    target
                );
                for file in files {
                    println!("  {}", file.dimmed());
                }
            }
            Ok(PatchResult::AlreadyApplied { target }) => {
                println!(
                    "{} {}: Already applied to {}",
                    "⊙".yellow(),
                    outcome.hash,
                    target
                );
                total_already_applied += 1;
            }
            Ok(PatchResult::TargetNotInstalled { target }) => {
                debug!("{}: {} is not installed", outcome.hash, target);
                total_skipped += 1;
            }
            Err(e) if silent => {
                debug!("{} on {}: {}", outcome.hash, outcome.target, e);
            }
            Err(e) => {
                eprintln!(
                    "{} {} on {}: Error - {}",
                    "✗".red(),
                    outcome.hash,
                    outcome.target,
                    e
                );
                print_error_hint(e);
            }
        }
    }

    for (target, e) in &report.target_errors {
        if silent {
            debug!("{}: {}", target, e);
        } else {
            eprintln!("{} {}: Error - {}", "✗".red(), target, e);
        }
    }

    let total_failed = report.failures().count() + report.target_errors.len();

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", report.applied_count()).green());
    println!(
        "  {} already applied",
        format!("{}", total_already_applied).yellow()
    );
    println!("  {} not installed", format!("{}", total_skipped).cyan());
    println!("  {} failed", format!("{}", total_failed).red());

    if report.needs_restart {
        println!();
        println!(
            "{}",
            "Patched extensions are active; restart the editor to load the changes.".yellow()
        );
    }
}

fn print_error_hint(e: &ApplicationError) {
    match e {
        ApplicationError::Edit { file, .. } => {
            eprintln!("  File: {}", file);
            eprintln!("  Possible causes:");
            eprintln!("    - The extension was updated and the needle text changed");
            eprintln!("    - The rule should be marked patchOptional");
        }
        ApplicationError::MissingFile { path } => {
            eprintln!("  File: {}", path.display());
            eprintln!("  Action: set fileCanBeMissing if the file is optional");
        }
        _ => {}
    }
}

fn cmd_unpatch(
    settings: &Settings,
    ids: Vec<String>,
    extensions_dir: Option<PathBuf>,
) -> Result<()> {
    let locator = locator(settings, extensions_dir)?;
    let mut restored_targets = 0;

    for extension in selected_extensions(&locator, &ids) {
        let patched = Manifest::read(&extension.root)
            .map(|manifest| !manifest.applied().is_empty())
            .unwrap_or(false);
        if !patched {
            continue;
        }

        match restore_extension(&extension.root) {
            Ok(report) => {
                println!(
                    "{} {}: restored {} file(s), cleared {} patch(es)",
                    "✓".green(),
                    extension.id,
                    report.restored.len(),
                    report.cleared
                );
                for file in &report.missing_backups {
                    println!("  {} no backup for {}", "⊙".yellow(), file);
                }
                restored_targets += 1;
            }
            Err(e) => eprintln!("{} {}: Error - {}", "✗".red(), extension.id, e),
        }
    }

    if restored_targets == 0 {
        println!("{}", "Nothing to restore".dimmed());
    }
    Ok(())
}

fn cmd_status(
    settings: &Settings,
    ids: Vec<String>,
    extensions_dir: Option<PathBuf>,
) -> Result<()> {
    let locator = locator(settings, extensions_dir)?;

    println!("{}", "Patch Status Report".bold());
    println!();

    for extension in selected_extensions(&locator, &ids) {
        let manifest = match Manifest::read(&extension.root) {
            Ok(manifest) => manifest,
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), extension.id, e);
                continue;
            }
        };
        let applied = manifest.applied();
        if applied.is_empty() && ids.is_empty() {
            continue;
        }

        println!(
            "{} {} ({} patches)",
            if applied.is_empty() {
                "⊘".cyan()
            } else {
                "✓".green()
            },
            extension.id.bold(),
            applied.len()
        );
        println!("  {}", extension.root.display().to_string().dimmed());
        for (hash, files) in &applied {
            println!("  - {} ({})", hash, files.join(", ").dimmed());
        }
        println!();
    }

    Ok(())
}

fn bundled_script(settings: &Settings, script: Option<PathBuf>) -> Result<PathBuf> {
    script
        .or_else(|| settings.bundled_script.clone())
        .map(|path| expand_home(&path))
        .context("No bundled script configured. Pass --script or set bundled_script")
}

fn cmd_bundle(
    settings: &Settings,
    script: Option<PathBuf>,
    source_map: Option<PathBuf>,
    patches: Vec<PathBuf>,
    dry_run: bool,
    show_diff: bool,
) -> Result<()> {
    let script = bundled_script(settings, script)?;
    let source_map = source_map
        .or_else(|| settings.source_map.clone())
        .map(|path| expand_home(&path));

    let mut combined = PatchSet::default();
    for (_, set) in load_patch_sets(settings, patches, None)? {
        combined.patches.extend(set.patches);
    }

    println!("Bundled script: {}", script.display());
    if dry_run {
        println!("{}", "  [DRY RUN - showing what would be applied]".cyan());
    }

    let report = apply_bundle_patches(
        &script,
        &combined,
        &LocalSourceMaps::new(source_map),
        BundleOptions { dry_run },
    )?;

    for (index, e) in &report.failures {
        if settings.silent_patch_errors {
            debug!("bundled script patch #{}: {}", index, e);
        } else {
            eprintln!("{} patch #{}: Error - {}", "✗".red(), index, e);
            print_error_hint(e);
        }
    }

    if show_diff && report.changed() {
        display_diff(&script, &report.pristine, &report.output);
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", report.applied).green());
    println!("  {} failed", format!("{}", report.failures.len()).red());

    if !report.failures.is_empty() && !settings.silent_patch_errors {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_inspect(
    settings: &Settings,
    source: &str,
    needles: &[String],
    script: Option<PathBuf>,
    source_map: Option<PathBuf>,
) -> Result<()> {
    let script = bundled_script(settings, script)?;
    let source_map = source_map
        .or_else(|| settings.source_map.clone())
        .map(|path| expand_home(&path));

    let found = inspect_location(&script, source, needles, &LocalSourceMaps::new(source_map))?;

    println!("Source: {}", found.source);
    println!(
        "Generated: offset {} (line {}, column {})",
        found.offset.to_string().green(),
        found.line,
        found.column
    );
    println!("  {}", found.excerpt.dimmed());
    Ok(())
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for hunk in diff.unified_diff().context_radius(2).iter_hunks() {
        println!("{}", hunk.header().to_string().cyan());
        for change in hunk.iter_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => format!("-{}", change).red(),
                ChangeTag::Insert => format!("+{}", change).green(),
                ChangeTag::Equal => format!(" {}", change).normal(),
            };
            print!("{}", sign);
            if change.missing_newline() {
                println!();
            }
        }
    }
}
