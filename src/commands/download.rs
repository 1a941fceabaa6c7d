//! Download command - fetches the base image (usually automatic).

use anyhow::Result;
use std::path::Path;

use crate::config::BuildConfig;
use crate::download;

/// Execute the download command.
pub fn cmd_download(base_dir: &Path, config: &BuildConfig) -> Result<()> {
    let path = download::fetch_base_image(
        &base_dir.join("downloads"),
        &config.base_image_url,
        config.base_image_sha256.as_deref(),
    )?;
    println!("Base image ready: {}", path.display());
    Ok(())
}
