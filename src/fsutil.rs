//! Filesystem helpers shared by steps and the verifier.

use anyhow::{Context, Result};
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Write a file, creating parent directories as needed.
pub fn write_file_with_dirs<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Write a file with specific Unix permissions, creating parent directories
/// as needed.
pub fn write_file_mode<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
    mode: u32,
) -> Result<()> {
    let path = path.as_ref();
    write_file_with_dirs(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Create a symlink, replacing whatever is already at `link`.
///
/// Idempotent: an existing link (or stale file) is removed first.
pub fn ensure_symlink(target: &Path, link: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    if link.symlink_metadata().is_ok() {
        fs::remove_file(link)?;
    }
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("failed to create symlink {}", link.display()))?;
    Ok(())
}

/// Copy a directory tree, preserving permissions and symlinks.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&from)?;
            ensure_symlink(&target, &to)?;
        } else {
            fs::copy(&from, &to)
                .with_context(|| format!("failed to copy {}", from.display()))?;
        }
    }
    Ok(())
}

/// Check whether `path` is currently a mount point, per /proc/mounts.
pub fn is_mount_point(path: &Path) -> bool {
    let Ok(mut file) = fs::File::open("/proc/mounts") else {
        return false;
    };
    let mut mounts = String::new();
    if file.read_to_string(&mut mounts).is_err() {
        return false;
    }
    let needle = path.to_string_lossy();
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mounted| mounted == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_file_with_dirs_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c.txt");
        write_file_with_dirs(&path, "hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn test_write_file_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sudoers");
        write_file_mode(&path, "x", 0o440).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o440);
    }

    #[test]
    fn test_ensure_symlink_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("link");
        ensure_symlink(Path::new("/old/target"), &link).unwrap();
        ensure_symlink(Path::new("/new/target"), &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("/new/target"));
    }

    #[test]
    fn test_copy_tree_preserves_symlinks() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/file"), "data").unwrap();
        std::os::unix::fs::symlink("/somewhere", src.join("ln")).unwrap();

        let dst = dir.path().join("dst");
        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("sub/file")).unwrap(), "data");
        assert_eq!(fs::read_link(dst.join("ln")).unwrap(), Path::new("/somewhere"));
    }

    #[test]
    fn test_is_mount_point_on_regular_dir() {
        let dir = TempDir::new().unwrap();
        assert!(!is_mount_point(dir.path()));
    }
}
