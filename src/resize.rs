//! Image growth and root filesystem expansion.
//!
//! Customization installs a few gigabytes of packages, so the base image is
//! grown before mounting: extend the image file with zeros, push the root
//! partition to the end of the disk, then expand the ext4 filesystem to
//! fill it.

use anyhow::Result;
use std::fs::OpenOptions;
use std::path::Path;

use crate::error::ResizeError;
use crate::mount::PartitionMap;
use crate::process::Cmd;

/// Space added to the base image for package installation.
pub const DEFAULT_GROWTH_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Grow `image_path` to at least `target_size_bytes` and expand the root
/// partition and filesystem into the new space.
///
/// Idempotent: when the image is already at or above the target size this
/// is a no-op; the image is never shrunk.
pub fn resize(image_path: &Path, target_size_bytes: u64) -> Result<()> {
    let current = std::fs::metadata(image_path)
        .map_err(|e| ResizeError::Grow {
            image: image_path.to_path_buf(),
            detail: e.to_string(),
        })?
        .len();

    if current >= target_size_bytes {
        println!(
            "[SKIP] Image already at or above target size ({} bytes)",
            current
        );
        return Ok(());
    }

    println!(
        "Expanding image from {} to {} bytes...",
        current, target_size_bytes
    );

    // Extend the file with zeros
    let file = OpenOptions::new()
        .append(true)
        .open(image_path)
        .map_err(|e| grow_error(image_path, &e.to_string()))?;
    file.set_len(target_size_bytes)
        .map_err(|e| grow_error(image_path, &e.to_string()))?;
    drop(file);

    // Push the root partition to the end of the disk
    Cmd::new("parted")
        .arg("--script")
        .arg_path(image_path)
        .args(["resizepart", "2", "100%"])
        .error_msg("parted resizepart failed")
        .run()
        .map_err(|e| grow_error(image_path, &format!("{e:#}")))?;

    // Expand the filesystem through a scoped partition mapping
    let partitions = PartitionMap::attach(image_path)?;
    let root_device = partitions.root_device();

    // e2fsck exit code 1 means "errors corrected", which is fine here
    let fsck = Cmd::new("e2fsck")
        .args(["-f", "-y"])
        .arg(&root_device)
        .allow_fail()
        .run()
        .map_err(|e| grow_error(image_path, &format!("{e:#}")))?;
    if fsck.code() > 1 {
        return Err(grow_error(
            image_path,
            &format!(
                "e2fsck reported unrecoverable problems (exit code {}):\n{}",
                fsck.code(),
                fsck.stderr_trimmed()
            ),
        )
        .into());
    }

    Cmd::new("resize2fs")
        .arg(&root_device)
        .error_msg("resize2fs failed")
        .run()
        .map_err(|e| grow_error(image_path, &format!("{e:#}")))?;

    partitions.detach();

    println!("✓ Image expanded and filesystem resized");
    Ok(())
}

fn grow_error(image: &Path, detail: &str) -> ResizeError {
    ResizeError::Grow {
        image: image.to_path_buf(),
        detail: detail.to_string(),
    }
}
