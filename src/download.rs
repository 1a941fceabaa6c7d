//! Base image acquisition.
//!
//! Downloads the compressed Raspberry Pi OS image with a bounded retry
//! policy, verifies its checksum when one is configured, and decompresses
//! it. Already-present files are reused.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::process::Cmd;

/// Fetch the base image into `downloads_dir`, returning the path of the
/// decompressed `.img` file.
pub fn fetch_base_image(
    downloads_dir: &Path,
    url: &str,
    expected_sha256: Option<&str>,
) -> Result<PathBuf> {
    let filename = url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .with_context(|| format!("cannot derive a file name from URL '{url}'"))?;
    if !filename.ends_with(".img.xz") {
        bail!("expected an .img.xz download, got '{filename}'");
    }

    let xz_path = downloads_dir.join(filename);
    let img_path = downloads_dir.join(filename.trim_end_matches(".xz"));

    if img_path.exists() {
        println!("[SKIP] Base image already exists: {}", img_path.display());
        return Ok(img_path);
    }

    fs::create_dir_all(downloads_dir)?;

    if !xz_path.exists() {
        println!("Downloading base Raspberry Pi OS image...");
        println!("URL: {}", url);
        Cmd::new("curl")
            .args(["-L", "--fail", "--retry", "3", "--retry-delay", "5"])
            .args(["--connect-timeout", "30", "--progress-bar", "-o"])
            .arg_path(&xz_path)
            .arg(url)
            .error_msg("Base image download failed")
            .run()?;
        println!("✓ Download complete");
    }

    if let Some(expected) = expected_sha256 {
        verify_checksum(&xz_path, expected)?;
    }

    println!("Extracting {}...", xz_path.display());
    // xz -d removes the .xz file after successful extraction
    Cmd::new("xz")
        .arg("-d")
        .arg_path(&xz_path)
        .error_msg("Failed to extract base image")
        .run()?;
    println!("✓ Extraction complete");

    Ok(img_path)
}

/// Verify the SHA-256 checksum of a downloaded file, deleting it on
/// mismatch so a later run re-downloads.
pub fn verify_checksum(file_path: &Path, expected_sha256: &str) -> Result<()> {
    println!("Verifying SHA256 checksum...");

    let actual = sha256_file(file_path)?;
    if !actual.eq_ignore_ascii_case(expected_sha256.trim()) {
        fs::remove_file(file_path)?;
        bail!(
            "Checksum mismatch!\n  Expected: {}\n  Got: {}\n\
             The download may be corrupted. Deleted partial file.",
            expected_sha256,
            actual
        );
    }

    println!("Checksum verified OK");
    Ok(())
}

/// Streaming SHA-256 of a file, hex encoded.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
