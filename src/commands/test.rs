//! Test command - verifies a finished image without booting it.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::config::BuildConfig;
use crate::verify;

/// Execute the test command. Exit code 0 only when every check passes.
pub fn cmd_test(image: Option<PathBuf>, config: &BuildConfig) -> Result<()> {
    if unsafe { libc::geteuid() } != 0 {
        bail!("this command must be run as root (use sudo)");
    }

    let image = match image {
        Some(path) => {
            if !path.exists() {
                bail!("image file not found: {}", path.display());
            }
            path
        }
        None => find_latest_image(Path::new("."))?,
    };

    println!("Testing image: {}\n", image.display());

    let report = verify::verify_image(&image, config)?;
    report.print();

    if !report.all_passed() {
        bail!("{} verification check(s) failed", report.fail_count());
    }
    println!("\n✓ Test completed successfully!");
    Ok(())
}

/// Most recently modified `*-citrascope.img` or `citrascope-pi-*.img` in
/// `dir`.
fn find_latest_image(dir: &Path) -> Result<PathBuf> {
    let mut candidates: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let looks_built = name.ends_with("-citrascope.img")
            || (name.starts_with("citrascope-pi-") && name.ends_with(".img"));
        if looks_built {
            let modified = entry.metadata()?.modified()?;
            candidates.push((modified, path));
        }
    }
    candidates.sort();
    candidates
        .pop()
        .map(|(_, path)| path)
        .context("no built citrascope image found - build one first or pass a path")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_find_latest_image_prefers_newest() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("base-citrascope.img");
        let new = dir.path().join("citrascope-pi-1.0-cs2.0.img");
        fs::write(&old, b"old").unwrap();
        fs::write(&new, b"new").unwrap();

        let older = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        let file = fs::File::options().write(true).open(&old).unwrap();
        file.set_modified(older).unwrap();

        assert_eq!(find_latest_image(dir.path()).unwrap(), new);
    }

    #[test]
    fn test_find_latest_image_none() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("unrelated.img"), b"x").unwrap();
        assert!(find_latest_image(dir.path()).is_err());
    }
}
