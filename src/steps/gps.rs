//! GPS time synchronization configuration.
//!
//! Wires gpsd and chrony together so the appliance can discipline its
//! clock from a GPS (NMEA over UART or USB) with optional PPS for
//! microsecond accuracy, falling back to network NTP when no GPS is
//! connected. This step only writes configuration; the daemons themselves
//! come from the package installation step's package list.

use anyhow::{bail, Result};
use std::fs;

use crate::config::BuildConfig;
use crate::fsutil::write_file_with_dirs;

use super::{Step, StepContext, StepOutcome};

const BOOT_SECTION_MARKER: &str = "GPS Time Synchronization";

pub struct ConfigureGpsTiming;

impl Step for ConfigureGpsTiming {
    fn name(&self) -> &'static str {
        "gps"
    }

    fn title(&self) -> &'static str {
        "Configure GPS timing"
    }

    fn applied(&self, ctx: &StepContext) -> bool {
        fs::read_to_string(ctx.boot.join("config.txt"))
            .map(|content| content.contains(BOOT_SECTION_MARKER))
            .unwrap_or(false)
    }

    fn apply(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let config = ctx.config;

        // UART + PPS overlays in the boot partition
        println!("Configuring GPS hardware in boot config...");
        let config_txt = ctx.boot.join("config.txt");
        if !config_txt.exists() {
            bail!("config.txt not found at {}", config_txt.display());
        }
        let content = fs::read_to_string(&config_txt)?;
        match with_gps_boot_config(&content, config) {
            Some(updated) => {
                fs::write(&config_txt, updated)?;
                println!("  ✓ Added GPS hardware configuration to config.txt");
            }
            None => println!("  ✓ GPS configuration already present in config.txt"),
        }

        // The serial console would fight the GPS for the primary UART
        if config.gps_enable_primary_uart {
            println!("Configuring serial console...");
            let cmdline_txt = ctx.boot.join("cmdline.txt");
            if !cmdline_txt.exists() {
                bail!("cmdline.txt not found at {}", cmdline_txt.display());
            }
            let cmdline = fs::read_to_string(&cmdline_txt)?;
            let stripped = without_serial_console(cmdline.trim());
            if stripped != cmdline.trim() {
                fs::write(&cmdline_txt, format!("{stripped}\n"))?;
                println!("  ✓ Disabled serial console in cmdline.txt");
            } else {
                println!("  ✓ Serial console already disabled");
            }
        }

        println!("Configuring gpsd...");
        write_file_with_dirs(ctx.rootfs_path("/etc/default/gpsd"), gpsd_config(config))?;
        println!("  ✓ Configured gpsd devices");

        println!("Configuring chrony for GPS time sources...");
        let chrony_conf = ctx.rootfs_path("/etc/chrony/chrony.conf");
        if !chrony_conf.exists() {
            bail!("chrony.conf not found at {}", chrony_conf.display());
        }
        let chrony = fs::read_to_string(&chrony_conf)?;
        if chrony.contains(BOOT_SECTION_MARKER) {
            println!("  ✓ GPS configuration already present in chrony.conf");
        } else {
            fs::write(&chrony_conf, format!("{chrony}{}", chrony_refclocks()))?;
            println!("  ✓ Added GPS reference clocks to chrony.conf");
        }

        println!("GPS timing configuration completed");
        println!("  - PPS: GPIO {}", config.gps_pps_gpio_pin);
        if config.gps_enable_primary_uart {
            println!("  - UART GPS: {}", config.gps_uart_device);
        }

        Ok(StepOutcome::default())
    }
}

/// config.txt content with the GPS section appended, or `None` when it is
/// already present.
pub fn with_gps_boot_config(content: &str, config: &BuildConfig) -> Option<String> {
    if content.contains(BOOT_SECTION_MARKER) {
        return None;
    }
    let mut section = format!("\n# {BOOT_SECTION_MARKER}\n");
    if config.gps_enable_primary_uart {
        section.push_str("# Enable hardware UART for GPS\nenable_uart=1\n");
    }
    section.push_str(&format!(
        "# Enable PPS (Pulse Per Second) on GPIO {pin}\ndtoverlay=pps-gpio,gpiopin={pin}\n",
        pin = config.gps_pps_gpio_pin
    ));
    Some(format!("{content}{section}"))
}

/// Kernel cmdline without the serial console parameters.
pub fn without_serial_console(cmdline: &str) -> String {
    cmdline
        .split_whitespace()
        .filter(|param| {
            !param.starts_with("console=serial0") && !param.starts_with("console=ttyAMA0")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// /etc/default/gpsd content. Non-existent devices are harmless: gpsd
/// monitors them and picks up hardware the moment it appears.
pub fn gpsd_config(config: &BuildConfig) -> String {
    let mut devices = vec!["/dev/ttyUSB0".to_string(), "/dev/ttyACM0".to_string()];
    if config.gps_enable_primary_uart {
        devices.push(config.gps_uart_device.clone());
    }
    devices.push("/dev/pps0".to_string());
    let devices = devices.join(" ");

    format!(
        "# Automatically start gpsd; it idles cheaply without GPS hardware\n\
         START_DAEMON=\"true\"\n\
         \n\
         # Auto-detect USB GPS devices (via udev rules)\n\
         USBAUTO=\"true\"\n\
         \n\
         # Monitored devices (USB, UART GPS, and PPS)\n\
         DEVICES=\"{devices}\"\n\
         \n\
         # Start immediately, don't wait for clients\n\
         GPSD_OPTIONS=\"-n\"\n"
    )
}

fn chrony_refclocks() -> &'static str {
    "\n# GPS Time Synchronization\n\
     # GPS via GPSD shared memory (SHM 0)\n\
     # noselect: don't use for sync until PPS is available\n\
     refclock SHM 0 refid NMEA offset 0.5 delay 0.2 noselect\n\
     \n\
     # PPS via GPSD shared memory (SHM 1)\n\
     # lock NMEA: only use PPS when GPS time is valid\n\
     refclock SHM 1 refid PPS lock NMEA prefer\n\
     \n\
     # Serve local time even without network; stratum 10 keeps internet NTP preferred\n\
     local stratum 10\n\
     \n\
     # Hardware timestamping where the NIC supports it\n\
     hwtimestamp *\n"
}
