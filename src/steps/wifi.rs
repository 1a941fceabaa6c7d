//! WiFi hardware enablement.
//!
//! With no regulatory domain set at boot, the radio comes up RF-killed.
//! A oneshot service turns it back on once NetworkManager is up.

use anyhow::Result;
use std::path::Path;

use crate::fsutil::{ensure_symlink, write_file_with_dirs};

use super::{Step, StepContext, StepOutcome};

const UNIT_PATH: &str = "/etc/systemd/system/wifi-on.service";

pub struct EnableWifiHardware;

impl Step for EnableWifiHardware {
    fn name(&self) -> &'static str {
        "wifi"
    }

    fn title(&self) -> &'static str {
        "Enable WiFi hardware"
    }

    fn applied(&self, ctx: &StepContext) -> bool {
        ctx.rootfs_path(UNIT_PATH).exists()
    }

    fn apply(&self, ctx: &StepContext) -> Result<StepOutcome> {
        println!("Enabling WiFi hardware...");

        write_file_with_dirs(ctx.rootfs_path(UNIT_PATH), wifi_on_unit())?;
        ensure_symlink(
            Path::new(UNIT_PATH),
            &ctx.rootfs_path("/etc/systemd/system/NetworkManager.service.wants/wifi-on.service"),
        )?;

        println!("  ✓ Created wifi-on.service");
        Ok(StepOutcome::default())
    }
}

fn wifi_on_unit() -> &'static str {
    "[Unit]\n\
     Description=Turn wifi on, regardless of regulatory domain\n\
     After=network.target network-online.target\n\
     Wants=network-online.target\n\
     \n\
     [Service]\n\
     Type=oneshot\n\
     ExecStart=/usr/bin/nmcli radio wifi on\n\
     \n\
     [Install]\n\
     WantedBy=NetworkManager.service\n"
}
