//! SSH service enablement.
//!
//! Pure filesystem work: the symlink systemd would create for
//! `systemctl enable ssh` is written directly into the mounted tree.

use anyhow::{bail, Result};
use std::path::Path;

use crate::fsutil::ensure_symlink;

use super::{Step, StepContext, StepOutcome};

const WANTS_LINK: &str = "/etc/systemd/system/multi-user.target.wants/ssh.service";

pub struct EnableSsh;

impl Step for EnableSsh {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn title(&self) -> &'static str {
        "Enable SSH"
    }

    fn applied(&self, ctx: &StepContext) -> bool {
        ctx.rootfs_path(WANTS_LINK).symlink_metadata().is_ok()
    }

    fn apply(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let unit = ctx.rootfs_path("/lib/systemd/system/ssh.service");
        if !unit.exists() {
            bail!(
                "ssh.service unit not found at {} - is this a Raspberry Pi OS image?",
                unit.display()
            );
        }

        ensure_symlink(
            Path::new("/lib/systemd/system/ssh.service"),
            &ctx.rootfs_path(WANTS_LINK),
        )?;
        println!("Enabled SSH service");

        Ok(StepOutcome::default())
    }
}
