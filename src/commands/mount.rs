//! Mount command - attach or detach an image for manual inspection.
//!
//! Also the recovery path when a crashed build left loop devices attached:
//! `citrapi mount --cleanup <image>`.

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::config::BuildConfig;
use crate::mount::{self, MountPoints, MountSession};

/// Execute the mount command.
pub fn cmd_mount(image: PathBuf, readonly: bool, cleanup: bool, config: &BuildConfig) -> Result<()> {
    if unsafe { libc::geteuid() } != 0 {
        bail!("this command must be run as root (use sudo)");
    }

    let mounts = MountPoints::new(&config.boot_mount, &config.rootfs_mount);

    if cleanup {
        mount::cleanup(&image, &mounts);
        return Ok(());
    }

    if !image.exists() {
        bail!("image file not found: {}", image.display());
    }

    let session = if readonly {
        MountSession::attach_readonly(&image, &mounts)?
    } else {
        MountSession::attach(&image, &mounts)?
    };

    println!("\nMounting completed successfully!");
    println!("Boot partition:   {}", session.boot().display());
    println!("Root filesystem:  {}", session.rootfs().display());
    println!("\nTo unmount when finished, run:");
    println!("  sudo citrapi mount --cleanup {}", image.display());

    // Deliberately leave the session attached for inspection
    std::mem::forget(session);
    Ok(())
}
