//! Loop-device mapping and partition mounting.
//!
//! A Raspberry Pi OS image carries two partitions: the FAT boot partition
//! and the ext4 root partition. `kpartx` maps them onto device-mapper nodes
//! and `MountSession` mounts them at deterministic paths. Both layers are
//! scoped: dropping a session (or a bare `PartitionMap`) tears the host
//! state down again, so a failed step can never leak loop devices.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::MountError;
use crate::fsutil;
use crate::process::Cmd;

/// Mount points for the image partitions.
#[derive(Debug, Clone)]
pub struct MountPoints {
    pub boot: PathBuf,
    pub rootfs: PathBuf,
}

impl MountPoints {
    pub fn new(boot: impl Into<PathBuf>, rootfs: impl Into<PathBuf>) -> Self {
        Self {
            boot: boot.into(),
            rootfs: rootfs.into(),
        }
    }
}

/// Partitions of an image mapped onto /dev/mapper nodes via kpartx.
///
/// Unmapped on drop (best-effort).
pub struct PartitionMap {
    image_path: PathBuf,
    devices: Vec<String>,
    active: bool,
}

impl PartitionMap {
    /// Map the image's partitions. Requires root.
    pub fn attach(image_path: &Path) -> Result<Self, MountError> {
        let result = Cmd::new("kpartx")
            .arg("-av")
            .arg_path(image_path)
            .allow_fail()
            .run()
            .map_err(|e| MountError::PartitionMap {
                image: image_path.to_path_buf(),
                detail: format!("{e:#}"),
            })?;

        if !result.success() {
            return Err(MountError::PartitionMap {
                image: image_path.to_path_buf(),
                detail: result.stderr_trimmed().to_string(),
            });
        }

        let devices = parse_partition_maps(&result.stdout);
        if devices.len() < 2 {
            // Unmap whatever was created before reporting the bad image
            let _ = Cmd::new("kpartx").arg("-d").arg_path(image_path).allow_fail().run();
            return Err(MountError::NotPartitioned {
                image: image_path.to_path_buf(),
                found: devices.len(),
            });
        }

        println!("Created loop devices: {:?}", devices);
        Ok(Self {
            image_path: image_path.to_path_buf(),
            devices,
            active: true,
        })
    }

    /// Device path of the boot partition (first mapped partition).
    pub fn boot_device(&self) -> String {
        format!("/dev/mapper/{}", self.devices[0])
    }

    /// Device path of the root partition (second mapped partition).
    pub fn root_device(&self) -> String {
        format!("/dev/mapper/{}", self.devices[1])
    }

    /// Remove the partition mappings.
    ///
    /// Best-effort: the mappings may already have been removed.
    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        let result = Cmd::new("kpartx")
            .arg("-d")
            .arg_path(&self.image_path)
            .allow_fail()
            .run();
        match result {
            Ok(r) if r.success() => println!("Removed loop devices"),
            _ => println!("Loop devices cleanup complete (may have been auto-removed)"),
        }
    }
}

impl Drop for PartitionMap {
    fn drop(&mut self) {
        self.release();
    }
}

/// An active attachment of an image's partitions to mount points.
///
/// At most one session per image may be active; the boot and root
/// partitions are mounted at the configured paths for the lifetime of the
/// session. Teardown runs on `detach` and again (idempotently) on drop, so
/// the mounts are released on every exit path.
pub struct MountSession {
    partitions: Option<PartitionMap>,
    mounts: MountPoints,
    mounted: Vec<PathBuf>,
}

impl MountSession {
    /// Map the image and mount both partitions read-write.
    pub fn attach(image_path: &Path, mounts: &MountPoints) -> Result<Self, MountError> {
        Self::attach_inner(image_path, mounts, false)
    }

    /// Map the image and mount both partitions read-only (verification).
    pub fn attach_readonly(image_path: &Path, mounts: &MountPoints) -> Result<Self, MountError> {
        Self::attach_inner(image_path, mounts, true)
    }

    fn attach_inner(
        image_path: &Path,
        mounts: &MountPoints,
        readonly: bool,
    ) -> Result<Self, MountError> {
        for mount_point in [&mounts.boot, &mounts.rootfs] {
            if fsutil::is_mount_point(mount_point) {
                return Err(MountError::MountPointBusy(mount_point.clone()));
            }
        }

        let partitions = PartitionMap::attach(image_path)?;
        let plan = [
            (partitions.boot_device(), mounts.boot.clone()),
            (partitions.root_device(), mounts.rootfs.clone()),
        ];

        let mut session = Self {
            mounts: mounts.clone(),
            partitions: Some(partitions),
            mounted: Vec::new(),
        };

        for (device, mount_point) in plan {
            fs::create_dir_all(&mount_point).map_err(|e| MountError::Mount {
                device: device.clone(),
                mount_point: mount_point.clone(),
                detail: e.to_string(),
            })?;

            let mut cmd = Cmd::new("mount");
            if readonly {
                cmd = cmd.arg("-r");
            }
            let result = cmd
                .arg(&device)
                .arg_path(&mount_point)
                .allow_fail()
                .run()
                .map_err(|e| MountError::Mount {
                    device: device.clone(),
                    mount_point: mount_point.clone(),
                    detail: format!("{e:#}"),
                })?;

            if !result.success() {
                // Drop runs the teardown for anything mounted so far
                return Err(MountError::Mount {
                    device,
                    mount_point,
                    detail: result.stderr_trimmed().to_string(),
                });
            }

            println!("Mounted {} at {}", device, mount_point.display());
            session.mounted.push(mount_point);
        }

        Ok(session)
    }

    /// Boot partition mount path.
    pub fn boot(&self) -> &Path {
        &self.mounts.boot
    }

    /// Root partition mount path.
    pub fn rootfs(&self) -> &Path {
        &self.mounts.rootfs
    }

    /// Unmount both partitions and remove the loop mappings.
    ///
    /// Best-effort: components that are already gone are not errors, so this
    /// is safe to call during error recovery.
    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        // Unmount in reverse order
        for mount_point in self.mounted.drain(..).rev() {
            if !fsutil::is_mount_point(&mount_point) {
                continue;
            }
            let result = Cmd::new("umount").arg_path(&mount_point).allow_fail().run();
            match result {
                Ok(r) if r.success() => println!("Unmounted {}", mount_point.display()),
                Ok(r) => println!(
                    "[WARN] Failed to unmount {}: {}",
                    mount_point.display(),
                    r.stderr_trimmed()
                ),
                Err(e) => println!("[WARN] Failed to unmount {}: {e:#}", mount_point.display()),
            }
        }
        if let Some(partitions) = self.partitions.take() {
            partitions.detach();
        }
    }
}

impl Drop for MountSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Best-effort cleanup for a crashed or interrupted session: unmount the
/// configured mount points and drop any partition mappings for the image.
pub fn cleanup(image_path: &Path, mounts: &MountPoints) {
    for mount_point in [&mounts.rootfs, &mounts.boot] {
        if fsutil::is_mount_point(mount_point) {
            let result = Cmd::new("umount").arg_path(mount_point).allow_fail().run();
            match result {
                Ok(r) if r.success() => println!("Unmounted {}", mount_point.display()),
                _ => println!("[WARN] Could not unmount {}", mount_point.display()),
            }
        }
    }
    let _ = Cmd::new("kpartx").arg("-d").arg_path(image_path).allow_fail().run();
    println!("Loop devices cleanup complete (may have been auto-removed)");
}

/// Parse kpartx -av output into device-mapper names.
///
/// Lines look like: `add map loop0p1 (254:0): 0 1048576 linear 7:0 8192`.
pub fn parse_partition_maps(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            match (tokens.next(), tokens.next(), tokens.next()) {
                (Some("add"), Some("map"), Some(name)) => Some(name.to_string()),
                _ => None,
            }
        })
        .collect()
}
