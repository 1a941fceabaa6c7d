//! Build command - runs the full image pipeline.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::config::BuildConfig;
use crate::download;
use crate::pipeline;
use crate::steps::StepSelection;

/// Execute the build command.
///
/// When no image path is given (or the given one is missing) the base
/// image is downloaded first.
pub fn cmd_build(
    base_dir: &Path,
    image: Option<PathBuf>,
    output: Option<PathBuf>,
    selection: StepSelection,
    config: &BuildConfig,
) -> Result<()> {
    if unsafe { libc::geteuid() } != 0 {
        bail!("this command must be run as root (use sudo)");
    }

    let image_path = match image {
        Some(path) if path.exists() => path,
        Some(path) if selection == StepSelection::CitrascopeOnly => {
            bail!("image file not found: {}", path.display());
        }
        other => {
            if let Some(path) = other {
                println!("Image file not found: {}", path.display());
            }
            if selection == StepSelection::CitrascopeOnly {
                bail!("--citrascope-only needs an existing, previously customized image");
            }
            download::fetch_base_image(
                &base_dir.join("downloads"),
                &config.base_image_url,
                config.base_image_sha256.as_deref(),
            )?
        }
    };

    println!("\n>>> Building CitraScope image\n");
    pipeline::run_build(&image_path, output.as_deref(), selection, config)?;
    Ok(())
}
