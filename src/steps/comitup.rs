//! Comitup WiFi provisioning configuration.
//!
//! Comitup (installed by the package step) raises a captive-portal access
//! point when the device has no known WiFi network. This step writes its
//! configuration and branding template and enables the service.

use anyhow::Result;

use crate::config::BuildConfig;
use crate::fsutil::{ensure_symlink, write_file_with_dirs};

use super::{Step, StepContext, StepOutcome};

const SERVICE_NAME: &str = "comitup.service";

pub struct ConfigureComitup;

impl Step for ConfigureComitup {
    fn name(&self) -> &'static str {
        "comitup"
    }

    fn title(&self) -> &'static str {
        "Configure Comitup WiFi"
    }

    fn deps(&self) -> &'static [&'static str] {
        &["packages"]
    }

    fn applied(&self, ctx: &StepContext) -> bool {
        ctx.rootfs_path("/etc/comitup.conf").exists()
    }

    fn apply(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let config = ctx.config;

        println!("Creating custom Comitup template...");
        write_file_with_dirs(
            ctx.rootfs_path("/usr/share/comitup/web/templates/index.html"),
            portal_template(config),
        )?;
        println!("  ✓ Created custom template");

        println!("Configuring Comitup...");
        write_file_with_dirs(ctx.rootfs_path("/etc/comitup.conf"), comitup_conf(config))?;
        println!(
            "  ✓ Created /etc/comitup.conf (SSID: {}-<nnnn>)",
            config.wifi_ssid
        );

        println!("Enabling Comitup service...");
        // The comitup package installs the unit under /lib
        ensure_symlink(
            format!("/lib/systemd/system/{SERVICE_NAME}").as_ref(),
            &ctx.rootfs_path(&format!(
                "/etc/systemd/system/multi-user.target.wants/{SERVICE_NAME}"
            )),
        )?;
        println!("  ✓ Enabled {SERVICE_NAME}");

        Ok(StepOutcome::default())
    }
}

/// comitup.conf content. `<nnnn>` is replaced by comitup itself with a
/// persistent random 4-digit number.
pub fn comitup_conf(config: &BuildConfig) -> String {
    format!(
        "# Comitup configuration for Citrascope\n\
         \n\
         # Access point name (SSID)\n\
         ap_name: {ssid}-<nnnn>\n\
         \n\
         # Access point password\n\
         ap_password: {password}\n\
         \n\
         # Service comitup verifies after a WiFi connection is made\n\
         web_service: citrascope.service\n\
         \n\
         # Enable the web interface\n\
         enable_appliance_mode: true\n\
         \n\
         # Seconds without a WiFi connection before falling back to AP mode\n\
         timeout: 30\n",
        ssid = config.wifi_ssid,
        password = config.wifi_password,
    )
}

/// Captive-portal page with Citrascope branding.
fn portal_template(config: &BuildConfig) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Citrascope WiFi Setup</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            max-width: 600px;
            margin: 0 auto;
            padding: 20px;
            background: #f5f5f5;
        }}
        .header {{ text-align: center; padding: 20px 0; }}
        .header h1 {{ color: #333; margin: 10px 0; }}
        .card {{
            background: white;
            border-radius: 8px;
            padding: 20px;
            margin: 20px 0;
            box-shadow: 0 2px 4px rgba(0,0,0,0.1);
        }}
        .info {{ color: #666; font-size: 0.9em; text-align: center; margin-top: 20px; }}
    </style>
</head>
<body>
    <div class="header">
        <h1>Citrascope WiFi Setup</h1>
        <p>Configure your telescope controller to connect to WiFi</p>
    </div>

    <div class="card">
        {{{{ content }}}}
    </div>

    <div class="info">
        <p>After connecting, access Citrascope at <strong>{host}.local:{port}</strong></p>
    </div>
</body>
</html>
"#,
        host = config.hostname_prefix,
        port = config.web_port,
    )
}
