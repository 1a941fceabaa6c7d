//! System package installation inside the chroot.
//!
//! Writes a policy-rc.d so apt cannot start services inside the chroot,
//! then runs update/upgrade/install/clean with the target's own apt. The
//! retry count bounds apt's network fetches so a flaky connection fails
//! the step instead of hanging the build.

use anyhow::Result;

use crate::chroot::ChrootSession;
use crate::fsutil::write_file_mode;

use super::{Step, StepContext, StepOutcome};

const APT_RETRIES: &str = "-o Acquire::Retries=3";

pub struct InstallPackages;

impl Step for InstallPackages {
    fn name(&self) -> &'static str {
        "packages"
    }

    fn title(&self) -> &'static str {
        "Update packages"
    }

    fn applied(&self, ctx: &StepContext) -> bool {
        ctx.rootfs_path("/usr/sbin/policy-rc.d").exists()
    }

    fn apply(&self, ctx: &StepContext) -> Result<StepOutcome> {
        // Prevent apt from starting services inside the chroot
        write_file_mode(
            ctx.rootfs_path("/usr/sbin/policy-rc.d"),
            "#!/bin/sh\nexit 101\n",
            0o755,
        )?;
        println!("Created policy-rc.d");

        println!("Updating system packages in {}", ctx.rootfs.display());
        let chroot = ChrootSession::enter(&ctx.rootfs)?;

        println!("Running apt update...");
        apt(&chroot, &["update"])?;

        println!("Running apt upgrade...");
        apt(&chroot, &["upgrade", "-y"])?;

        println!("Installing {} packages...", ctx.config.packages.len());
        let mut install: Vec<&str> = vec!["install", "-y"];
        install.extend(ctx.config.packages.iter().map(|s| s.as_str()));
        apt(&chroot, &install)?;

        println!("Cleaning up...");
        apt(&chroot, &["clean"])?;

        chroot.close();
        println!("System update completed successfully");

        Ok(StepOutcome::default())
    }
}

fn apt(chroot: &ChrootSession, args: &[&str]) -> Result<()> {
    let mut argv = vec!["apt-get", APT_RETRIES];
    argv.extend_from_slice(args);
    chroot.run_env(argv, "DEBIAN_FRONTEND", "noninteractive")?;
    Ok(())
}
