//! Build pipeline orchestration.
//!
//! Drives a build through its stages: acquire the build lock, copy the
//! base image, grow it, mount it, run the selected customization steps in
//! order, unmount, and finalize the output file. The mount session is
//! scoped, so loop devices and mount points are released on every exit
//! path; a step failure still detaches before the error propagates.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::BuildConfig;
use crate::lock::BuildLock;
use crate::mount::{MountPoints, MountSession};
use crate::resize;
use crate::steps::{self, Step, StepContext, StepSelection, CITRASCOPE_VERSION_KEY};
use crate::timing::{format_secs, Timer};

/// Pipeline stages, in order. `Failed` is implicit: any error carries the
/// stage it occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Downloaded,
    Resized,
    Mounted,
    Customizing(&'static str),
    Unmounted,
    Finalized,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Init => write!(f, "Init"),
            Stage::Downloaded => write!(f, "Downloaded"),
            Stage::Resized => write!(f, "Resized"),
            Stage::Mounted => write!(f, "Mounted"),
            Stage::Customizing(step) => write!(f, "Customizing({step})"),
            Stage::Unmounted => write!(f, "Unmounted"),
            Stage::Finalized => write!(f, "Finalized"),
        }
    }
}

/// Per-step record for the summary table and the build manifest.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    pub title: String,
    pub success: bool,
    pub elapsed_secs: f64,
}

/// Successful pipeline result.
#[derive(Debug)]
pub struct BuildOutcome {
    pub output_image: PathBuf,
    pub citrascope_version: Option<String>,
    pub steps: Vec<StepReport>,
}

#[derive(Serialize)]
struct BuildManifest<'a> {
    base_image: &'a Path,
    output_image: &'a Path,
    image_version: &'a str,
    citrascope_version: Option<&'a str>,
    steps: &'a [StepReport],
    finished_unix: u64,
}

/// Run the pipeline against `base_image`, producing `output` (derived from
/// the base name when not given).
pub fn run_build(
    base_image: &Path,
    output: Option<&Path>,
    selection: StepSelection,
    config: &BuildConfig,
) -> Result<BuildOutcome> {
    let mut stage = Stage::Init;
    let in_place = selection == StepSelection::CitrascopeOnly && output.is_none();

    let output_path = match output {
        Some(path) => path.to_path_buf(),
        None if in_place => base_image.to_path_buf(),
        None => default_output_path(base_image),
    };

    let _lock = BuildLock::acquire(&output_path)?;

    if !in_place {
        println!("Source: {}", base_image.display());
        println!("Output: {}", output_path.display());
        println!("\nCopying base image...");
        if output_path.exists() {
            fs::remove_file(&output_path)?;
        }
        fs::copy(base_image, &output_path)
            .with_context(|| format!("failed to copy base image ({stage})"))?;
        println!("✓ Image copied\n");
    }
    stage = Stage::Downloaded;

    // The application-only entry point expects an already-grown image
    if selection != StepSelection::CitrascopeOnly {
        println!("Expanding image to accommodate packages...");
        let current = fs::metadata(&output_path)?.len();
        resize::resize(&output_path, current + resize::DEFAULT_GROWTH_BYTES)
            .with_context(|| format!("build failed at stage {stage}"))?;
    }
    stage = Stage::Resized;

    let mounts = MountPoints::new(&config.boot_mount, &config.rootfs_mount);
    let session = MountSession::attach(&output_path, &mounts)
        .with_context(|| format!("build failed at stage {stage}"))?;
    stage = Stage::Mounted;

    println!("\n{}", "=".repeat(60));
    println!("Customizing image...");
    println!("{}\n", "=".repeat(60));

    let selected = steps::select(selection);
    let ctx = StepContext::new(session.boot(), session.rootfs(), config);
    steps::validate(&selected, &ctx)
        .with_context(|| format!("build failed at stage {stage}"))?;

    let mut reports: Vec<StepReport> = Vec::new();
    let mut metadata: BTreeMap<String, String> = BTreeMap::new();
    let mut failure: Option<anyhow::Error> = None;

    for step in &selected {
        stage = Stage::Customizing(step.name());
        println!("{}", "=".repeat(60));
        println!("STEP: {}", step.title());
        println!("{}", "=".repeat(60));

        let timer = Timer::start();
        match step.apply(&ctx) {
            Ok(outcome) => {
                let elapsed = timer.elapsed_secs();
                println!(
                    "✓ {} completed successfully (took {})\n",
                    step.title(),
                    format_secs(elapsed)
                );
                reports.push(StepReport {
                    name: step.name().to_string(),
                    title: step.title().to_string(),
                    success: true,
                    elapsed_secs: elapsed,
                });
                metadata.extend(outcome.metadata);
            }
            Err(e) => {
                let elapsed = timer.elapsed_secs();
                println!("✗ {} failed after {}\n", step.title(), format_secs(elapsed));
                reports.push(StepReport {
                    name: step.name().to_string(),
                    title: step.title().to_string(),
                    success: false,
                    elapsed_secs: elapsed,
                });
                failure = Some(e.context(format!("build failed at stage {stage}")));
                break;
            }
        }
    }

    // Teardown happens before any error propagates: never leave a
    // half-mounted image behind
    session.detach();

    if let Some(err) = failure {
        print_summary(&reports);
        return Err(err);
    }

    let citrascope_version = metadata.get(CITRASCOPE_VERSION_KEY).cloned();
    let output_image = finalize_output(&output_path, citrascope_version.as_deref(), config)?;

    let outcome = BuildOutcome {
        output_image,
        citrascope_version,
        steps: reports,
    };
    write_manifest(base_image, &outcome, config)?;

    println!("\n{}", "=".repeat(60));
    println!("✓ BUILD COMPLETE");
    println!("{}", "=".repeat(60));
    println!("Output image: {}", outcome.output_image.display());
    println!("Flash to SD card with:");
    println!(
        "  sudo dd if={} of=/dev/sdX bs=4M status=progress",
        outcome.output_image.display()
    );
    print_summary(&outcome.steps);

    Ok(outcome)
}

/// Default output path: `<base stem>-citrascope.img` next to the base.
pub fn default_output_path(base_image: &Path) -> PathBuf {
    let stem = base_image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    base_image.with_file_name(format!("{stem}-citrascope.img"))
}

/// Versioned output name once the application version is known:
/// `citrascope-pi-<image version>-cs<app version>.img`.
pub fn versioned_output_name(image_version: &str, citrascope_version: &str) -> String {
    format!("citrascope-pi-{image_version}-cs{citrascope_version}.img")
}

fn finalize_output(
    output_path: &Path,
    citrascope_version: Option<&str>,
    config: &BuildConfig,
) -> Result<PathBuf> {
    let Some(version) = citrascope_version else {
        return Ok(output_path.to_path_buf());
    };
    let renamed =
        output_path.with_file_name(versioned_output_name(&config.image_version, version));
    fs::rename(output_path, &renamed).with_context(|| {
        format!(
            "failed to rename {} to {}",
            output_path.display(),
            renamed.display()
        )
    })?;
    println!("\n✓ Image renamed to include Citrascope version: {version}");
    Ok(renamed)
}

fn write_manifest(base_image: &Path, outcome: &BuildOutcome, config: &BuildConfig) -> Result<()> {
    let manifest = BuildManifest {
        base_image,
        output_image: &outcome.output_image,
        image_version: &config.image_version,
        citrascope_version: outcome.citrascope_version.as_deref(),
        steps: &outcome.steps,
        finished_unix: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    };

    let mut name = outcome
        .output_image
        .file_name()
        .unwrap_or_default()
        .to_os_string();
    name.push(".manifest.json");
    let path = outcome.output_image.with_file_name(name);
    fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
    println!("Build manifest: {}", path.display());
    Ok(())
}

/// Summary table of all step results.
pub fn print_summary(reports: &[StepReport]) {
    if reports.is_empty() {
        return;
    }

    println!("\n{}", "=".repeat(60));
    println!("BUILD SUMMARY");
    println!("{}", "=".repeat(60));

    let width = reports
        .iter()
        .map(|r| r.title.len())
        .max()
        .unwrap_or(0)
        .max(20);

    println!("\n{:<width$}  {:<10}  Time", "Step", "Status");
    println!("{}  {}  {}", "-".repeat(width), "-".repeat(10), "-".repeat(15));

    let mut total = 0.0;
    for report in reports {
        let status = if report.success { "✓ SUCCESS" } else { "✗ FAILED" };
        total += report.elapsed_secs;
        println!(
            "{:<width$}  {:<10}  {}",
            report.title,
            status,
            format_secs(report.elapsed_secs)
        );
    }
    println!("{}  {}  {}", "-".repeat(width), "-".repeat(10), "-".repeat(15));
    println!("{:<width$}  {:<10}  {}", "Total", "", format_secs(total));
    println!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Init.to_string(), "Init");
        assert_eq!(Stage::Customizing("packages").to_string(), "Customizing(packages)");
        assert_eq!(Stage::Finalized.to_string(), "Finalized");
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("/work/raspios-lite.img")),
            Path::new("/work/raspios-lite-citrascope.img")
        );
    }

    #[test]
    fn test_versioned_output_name() {
        assert_eq!(
            versioned_output_name("1.4", "2.0.3"),
            "citrascope-pi-1.4-cs2.0.3.img"
        );
    }
}
