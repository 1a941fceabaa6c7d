//! Login banner.
//!
//! Drops a profile.d script that greets interactive logins with the
//! device's current hostname and web UI address.

use anyhow::Result;

use crate::config::BuildConfig;
use crate::fsutil::write_file_mode;

use super::{Step, StepContext, StepOutcome};

const BANNER_PATH: &str = "/etc/profile.d/citrascope-banner.sh";

pub struct ConfigureBanner;

impl Step for ConfigureBanner {
    fn name(&self) -> &'static str {
        "banner"
    }

    fn title(&self) -> &'static str {
        "Configure login banner"
    }

    fn applied(&self, ctx: &StepContext) -> bool {
        ctx.rootfs_path(BANNER_PATH).exists()
    }

    fn apply(&self, ctx: &StepContext) -> Result<StepOutcome> {
        write_file_mode(
            ctx.rootfs_path(BANNER_PATH),
            banner_script(ctx.config),
            0o755,
        )?;
        println!("✓ Created login banner: {BANNER_PATH}");
        println!("  Banner will display on every interactive login");
        Ok(StepOutcome::default())
    }
}

/// Banner script; the hostname is read at login time because the identity
/// service may rename the device on first boot.
pub fn banner_script(config: &BuildConfig) -> String {
    format!(
        r#"#!/bin/bash
# CitraScope login banner
# Displays on every interactive login

YELLOW='\033[1;33m'
GREEN='\033[1;32m'
CYAN='\033[1;36m'
RESET='\033[0m'
BOLD='\033[1m'

HOSTNAME=$(hostname)

echo ""
echo -e "${{CYAN}}━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━${{RESET}}"
echo -e "  ${{BOLD}}${{YELLOW}}CitraScope${{RESET}}"
echo -e "  ${{GREEN}}Hostname:${{RESET}} ${{BOLD}}$HOSTNAME${{RESET}}"
echo -e "  ${{GREEN}}Web UI:${{RESET}}   http://$HOSTNAME.local:{port}"
echo -e "${{CYAN}}━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━${{RESET}}"
echo ""
"#,
        port = config.web_port
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_banner_script_reads_hostname_at_login() {
        let config = BuildConfig::load(Path::new("/nonexistent"));
        let script = banner_script(&config);
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("HOSTNAME=$(hostname)"));
        assert!(script.contains(":24872"));
    }
}
