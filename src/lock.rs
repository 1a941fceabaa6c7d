//! Advisory build locking.
//!
//! At most one pipeline run may operate on a given image path. The lock is
//! an exclusive advisory flock on `<image>.lock`; contention fails fast
//! rather than queueing a second multi-hour build behind the first.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive lock held for the duration of a build.
///
/// Released (and the lock file removed) on drop.
#[derive(Debug)]
pub struct BuildLock {
    file: File,
    path: PathBuf,
}

impl BuildLock {
    /// Acquire the lock guarding `image`. Fails immediately if another
    /// build holds it.
    pub fn acquire(image: &Path) -> Result<Self> {
        let path = lock_path(image);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open lock file {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            bail!(
                "another build is already running against '{}' (lock held on {})",
                image.display(),
                path.display()
            );
        }

        Ok(Self { file, path })
    }

    /// Path of the underlying lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_path(image: &Path) -> PathBuf {
    let mut name = image.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    image.with_file_name(name)
}
