//! Headless first-boot configuration.
//!
//! Locale, keyboard, timezone and WiFi regulatory country are fixed at
//! build time, the interactive first-boot wizard is removed, and the setup
//! marker file is dropped so the image never prompts for anything.

use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::chroot::ChrootSession;
use crate::fsutil::{ensure_symlink, write_file_with_dirs};

use super::{Step, StepContext, StepOutcome};

/// Marker indicating first-boot setup has been completed at build time.
pub const SETUP_MARKER: &str = "/etc/rpi-initial-setup";

pub struct ConfigureHeadless;

impl Step for ConfigureHeadless {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn title(&self) -> &'static str {
        "Configure headless settings"
    }

    fn applied(&self, ctx: &StepContext) -> bool {
        ctx.rootfs_path(SETUP_MARKER).exists()
    }

    fn apply(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let config = ctx.config;

        configure_locale_files(ctx)?;
        configure_keyboard_files(ctx)?;
        configure_timezone(ctx)?;
        configure_wifi_country(ctx)?;

        // locale generation and keyboard reconfiguration need the target's
        // own tools
        {
            let chroot = ChrootSession::enter(&ctx.rootfs)?;
            chroot.run(["locale-gen"])?;
            println!("  ✓ Locale configured: {}", config.locale);

            for selection in [
                format!(
                    "keyboard-configuration keyboard-configuration/layoutcode string {}",
                    config.keyboard_layout
                ),
                "keyboard-configuration keyboard-configuration/variantcode string".to_string(),
                "keyboard-configuration keyboard-configuration/modelcode string pc105".to_string(),
            ] {
                // debconf may be absent on minimal images; not fatal
                let shell = format!("echo \"{selection}\" | debconf-set-selections");
                let _ = chroot.run(["sh", "-c", shell.as_str()]);
            }
            chroot.run_env(
                ["dpkg-reconfigure", "-f", "noninteractive", "keyboard-configuration"],
                "DEBIAN_FRONTEND",
                "noninteractive",
            )?;
            println!("  ✓ Keyboard configured: {}", config.keyboard_layout);
            chroot.close();
        }

        fs::File::create(ctx.rootfs_path(SETUP_MARKER))?;
        println!("  ✓ Created {SETUP_MARKER}");

        remove_wizard(ctx)?;

        Ok(StepOutcome::default())
    }
}

fn configure_locale_files(ctx: &StepContext) -> Result<()> {
    let locale = &ctx.config.locale;
    println!("Configuring locale: {locale}...");

    let locale_gen = ctx.rootfs_path("/etc/locale.gen");
    if locale_gen.exists() {
        let content = fs::read_to_string(&locale_gen)?;
        fs::write(&locale_gen, enable_locale(&content, locale))?;
    }

    write_file_with_dirs(
        ctx.rootfs_path("/etc/default/locale"),
        format!("LANG={locale}\nLC_ALL={locale}\n"),
    )
}

fn configure_keyboard_files(ctx: &StepContext) -> Result<()> {
    let layout = &ctx.config.keyboard_layout;
    println!("Configuring keyboard layout: {layout}...");

    write_file_with_dirs(
        ctx.rootfs_path("/etc/default/keyboard"),
        format!(
            "XKBLAYOUT=\"{layout}\"\nXKBMODEL=\"pc105\"\nXKBVARIANT=\"\"\nXKBOPTIONS=\"\"\nBACKSPACE=\"guess\"\n"
        ),
    )
}

fn configure_timezone(ctx: &StepContext) -> Result<()> {
    let timezone = &ctx.config.timezone;
    println!("Configuring timezone: {timezone}...");

    write_file_with_dirs(ctx.rootfs_path("/etc/timezone"), format!("{timezone}\n"))?;
    ensure_symlink(
        Path::new(&format!("/usr/share/zoneinfo/{timezone}")),
        &ctx.rootfs_path("/etc/localtime"),
    )?;
    println!("  ✓ Timezone configured: {timezone}");
    Ok(())
}

fn configure_wifi_country(ctx: &StepContext) -> Result<()> {
    let country = &ctx.config.wifi_country;
    println!("Configuring WiFi country code: {country}...");

    let config_txt = ctx.boot.join("config.txt");
    if !config_txt.exists() {
        anyhow::bail!("config.txt not found at {}", config_txt.display());
    }

    let content = fs::read_to_string(&config_txt)?;
    match with_wifi_country(&content, country) {
        Some(updated) => {
            fs::write(&config_txt, updated)?;
            println!("  ✓ Added WiFi country to config.txt: {country}");
        }
        None => println!("  ✓ WiFi country already configured in config.txt"),
    }
    Ok(())
}

fn remove_wizard(ctx: &StepContext) -> Result<()> {
    println!("Disabling first-boot setup...");

    let piwiz = ctx.rootfs_path("/etc/xdg/autostart/piwiz.desktop");
    if piwiz.exists() {
        fs::remove_file(&piwiz)?;
        println!("  ✓ Removed piwiz.desktop");
    }

    // userconfig handles the interactive first-boot user rename
    let userconfig =
        ctx.rootfs_path("/etc/systemd/system/multi-user.target.wants/userconfig.service");
    if userconfig.symlink_metadata().is_ok() {
        fs::remove_file(&userconfig)?;
        println!("  ✓ Disabled userconfig.service");
    }

    let userconf_script = ctx.rootfs_path("/usr/lib/userconf-pi/userconf");
    if userconf_script.exists() {
        fs::remove_file(&userconf_script)?;
        println!("  ✓ Removed userconfig script");
    }

    Ok(())
}

/// Uncomment the requested locale in locale.gen content.
pub fn enable_locale(content: &str, locale: &str) -> String {
    let wanted = locale_gen_line(locale);
    let mut out: Vec<String> = Vec::new();
    for line in content.lines() {
        let stripped = line.trim();
        if stripped == format!("# {wanted}") || stripped == format!("#{wanted}") {
            out.push(wanted.clone());
        } else {
            out.push(line.to_string());
        }
    }
    let mut result = out.join("\n");
    result.push('\n');
    result
}

fn locale_gen_line(locale: &str) -> String {
    let (base, encoding) = match locale.split_once('.') {
        Some((base, encoding)) => (base, encoding),
        None => (locale, "UTF-8"),
    };
    format!("{base}.{encoding} {encoding}")
}

/// Returns updated config.txt content with the WiFi country appended, or
/// `None` when a country is already present.
pub fn with_wifi_country(content: &str, country: &str) -> Option<String> {
    if content.to_lowercase().contains("country=") {
        return None;
    }
    Some(format!("{content}\n# WiFi Country Code\ncountry={country}\n"))
}
