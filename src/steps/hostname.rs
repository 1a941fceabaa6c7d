//! Hostname and first-boot device identity.
//!
//! The image boots with the configured hostname prefix. On first boot a
//! oneshot service picks a device name from the configured pool, rewrites
//! the hostname, `/etc/hosts` and the WiFi AP name, then drops a marker so
//! it never runs again.

use anyhow::Result;

use crate::fsutil::{ensure_symlink, write_file_mode, write_file_with_dirs};

use super::{Step, StepContext, StepOutcome};

const IDENTITY_SCRIPT_PATH: &str = "/usr/local/bin/generate-citrascope-identity";
const IDENTITY_SERVICE: &str = "citrascope-identity.service";

pub struct ConfigureHostname;

impl Step for ConfigureHostname {
    fn name(&self) -> &'static str {
        "hostname"
    }

    fn title(&self) -> &'static str {
        "Configure hostname/identity"
    }

    fn applied(&self, ctx: &StepContext) -> bool {
        ctx.rootfs_path("/etc/citrascope-prefix").exists()
    }

    fn apply(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let prefix = &ctx.config.hostname_prefix;

        println!("Installing dynamic identity system...");

        write_file_with_dirs(ctx.rootfs_path("/etc/hostname"), format!("{prefix}\n"))?;
        println!("  ✓ Set initial hostname to '{prefix}'");

        let hosts_path = ctx.rootfs_path("/etc/hosts");
        if hosts_path.exists() {
            let content = std::fs::read_to_string(&hosts_path)?;
            std::fs::write(&hosts_path, rewrite_hosts(&content, prefix))?;
        }
        println!("  ✓ Updated /etc/hosts");

        write_file_with_dirs(ctx.rootfs_path("/etc/citrascope-prefix"), prefix)?;
        println!("  ✓ Set hostname prefix: '{prefix}'");

        write_file_mode(
            ctx.rootfs_path(IDENTITY_SCRIPT_PATH),
            identity_script(&ctx.config.device_name_pool),
            0o755,
        )?;
        println!("  ✓ Installed identity script to /usr/local/bin/");

        let unit_path = format!("/etc/systemd/system/{IDENTITY_SERVICE}");
        write_file_with_dirs(ctx.rootfs_path(&unit_path), identity_service_unit())?;
        ensure_symlink(
            unit_path.as_ref(),
            &ctx.rootfs_path(&format!(
                "/etc/systemd/system/multi-user.target.wants/{IDENTITY_SERVICE}"
            )),
        )?;
        println!("  ✓ Enabled {IDENTITY_SERVICE}");

        Ok(StepOutcome::default())
    }
}

/// Replace the 127.0.1.1 line of /etc/hosts with the given name, appending
/// one if the file has none.
pub fn rewrite_hosts(content: &str, name: &str) -> String {
    let mut replaced = false;
    let mut out: Vec<String> = content
        .lines()
        .map(|line| {
            if line.starts_with("127.0.1.1") {
                replaced = true;
                format!("127.0.1.1\t{name}")
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        out.push(format!("127.0.1.1\t{name}"));
    }
    let mut result = out.join("\n");
    result.push('\n');
    result
}

/// First-boot identity generation script, with the device-name pool baked
/// in as a shell array.
pub fn identity_script(pool: &[String]) -> String {
    let names = pool
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        r#"#!/bin/bash
# Generate unique device identity with a name from the device pool.
# Runs once on first boot to set hostname and WiFi AP name.

set -e

MARKER_FILE="/var/lib/citrascope-identity-set"
NAME_FILE="/etc/citrascope-name"
PREFIX_FILE="/etc/citrascope-prefix"

# Exit if already run
if [ -f "$MARKER_FILE" ]; then
    exit 0
fi

DEVICE_NAMES=({names})

# Pick a random device name
PICK="${{DEVICE_NAMES[$RANDOM % ${{#DEVICE_NAMES[@]}}]}}"

# Read prefix from config (set at build time)
PREFIX=""
if [ -f "$PREFIX_FILE" ]; then
    PREFIX=$(cat "$PREFIX_FILE")
fi

if [ -n "$PREFIX" ]; then
    DEVICE_NAME="${{PREFIX}}-${{PICK}}"
else
    DEVICE_NAME="${{PICK}}"
fi

echo "Generating device identity: $DEVICE_NAME"

echo "$DEVICE_NAME" > /etc/hostname

sed -i "s/^127\.0\.1\.1.*/127.0.1.1\t${{DEVICE_NAME}}/" /etc/hosts

# Update the WiFi AP name
if [ -f /etc/comitup.conf ]; then
    sed -i "s/^ap_name:.*/ap_name: ${{DEVICE_NAME}}/" /etc/comitup.conf
fi

echo "$DEVICE_NAME" > "$NAME_FILE"

# Set hostname immediately (log if it fails)
if ! hostnamectl set-hostname "$DEVICE_NAME" 2>&1; then
    echo "hostnamectl failed (dbus not ready?), hostname set via files" | logger -t citrascope-identity
fi

mkdir -p "$(dirname "$MARKER_FILE")"
echo "$(date)" > "$MARKER_FILE"

echo "Device identity set to: $DEVICE_NAME"
"#
    )
}

fn identity_service_unit() -> &'static str {
    r#"[Unit]
Description=Generate CitraScope device identity
DefaultDependencies=no
After=local-fs.target dbus.service
Before=avahi-daemon.service NetworkManager.service comitup.service
Requires=dbus.service
ConditionPathExists=!/var/lib/citrascope-identity-set

[Service]
Type=oneshot
ExecStart=/usr/local/bin/generate-citrascope-identity
RemainAfterExit=yes

[Install]
WantedBy=multi-user.target
"#
}
