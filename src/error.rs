//! Error taxonomy for the image build pipeline.
//!
//! Low-level OS command failures are never silently retried; they surface
//! through these types (or plain `anyhow` context) to the orchestrator,
//! which tears down mounts before re-raising.

use std::path::PathBuf;
use thiserror::Error;

/// Loop-device mapping or partition mount failures.
///
/// Usually retryable after manual cleanup (`citrapi mount --cleanup`).
#[derive(Debug, Error)]
pub enum MountError {
    /// kpartx mapped fewer partitions than a Raspberry Pi OS image has.
    #[error(
        "'{image}' is not a valid partitioned disk image: expected at least 2 partitions, kpartx mapped {found}"
    )]
    NotPartitioned { image: PathBuf, found: usize },

    /// kpartx itself failed (bad image, loop devices exhausted, no privilege).
    #[error("failed to map partitions of '{image}': {detail}")]
    PartitionMap { image: PathBuf, detail: String },

    /// A previous session on the same mount points was not released.
    #[error(
        "mount point {0} is already occupied; release the previous session first (citrapi mount --cleanup <image>)"
    )]
    MountPointBusy(PathBuf),

    /// mount(8) failed for one of the partitions.
    #[error("failed to mount {device} at {mount_point}: {detail}")]
    Mount {
        device: String,
        mount_point: PathBuf,
        detail: String,
    },
}

/// Image growth / filesystem expansion failures.
///
/// Fatal: a failed resize means the image needs to be rebuilt from a fresh
/// base.
#[derive(Debug, Error)]
pub enum ResizeError {
    /// Growing the file, the partition table, or the filesystem failed.
    #[error("failed to resize '{image}': {detail}")]
    Grow { image: PathBuf, detail: String },
}

/// A command run inside the chroot exited non-zero.
///
/// Fatal to the step that issued it; the captured output is carried so the
/// CLI can print what the target system said.
#[derive(Debug, Error)]
#[error("command '{command}' failed inside chroot {root} (exit code {code}):\n{output}")]
pub struct ChrootExecutionError {
    pub command: String,
    pub root: PathBuf,
    pub code: i32,
    pub output: String,
}

/// A customization step was selected without its prerequisites.
///
/// Indicates a bad step subset (or an image that never had the prerequisite
/// applied), not an environment problem.
#[derive(Debug, Error)]
#[error(
    "step '{step}' requires '{requires}', which is neither in the selected step list nor already applied to the image"
)]
pub struct StepPreconditionError {
    pub step: &'static str,
    pub requires: &'static str,
}
