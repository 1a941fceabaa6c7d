//! Preflight checks for the image build.
//!
//! Validates host tools and privileges before a build touches the kernel's
//! device-mapper state. Run with `citrapi preflight`.

use anyhow::{bail, Result};
use std::path::Path;

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed.
    Pass,
    /// Check failed - the build will fail.
    Fail,
    /// Check passed but with a warning.
    Warn,
}

impl CheckResult {
    fn pass_with(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: Some(details.to_string()),
        }
    }

    fn fail(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details.to_string()),
        }
    }

    fn warn(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            details: Some(details.to_string()),
        }
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if all checks passed (no failures).
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    /// Count of failed checks.
    pub fn fail_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count()
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let (icon, status) = match check.status {
                CheckStatus::Pass => ("✓", "PASS"),
                CheckStatus::Fail => ("✗", "FAIL"),
                CheckStatus::Warn => ("⚠", "WARN"),
            };
            print!("  {} [{}] {}", icon, status, check.name);
            match &check.details {
                Some(details) => println!(": {}", details),
                None => println!(),
            }
        }

        println!();
        println!(
            "{} checks, {} failed",
            self.checks.len(),
            self.fail_count()
        );
    }
}

/// Tools the build shells out to, with package hints.
const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("kpartx", "kpartx", "Maps image partitions onto loop devices"),
    ("parted", "parted", "Grows the root partition"),
    ("e2fsck", "e2fsprogs", "Checks the root filesystem before resize"),
    ("resize2fs", "e2fsprogs", "Expands the root filesystem"),
    ("mount", "util-linux", "Mounts image partitions and chroot binds"),
    ("umount", "util-linux", "Unmounts image partitions"),
    ("chroot", "coreutils", "Runs commands inside the image"),
    ("curl", "curl", "Downloads the base image"),
    ("xz", "xz-utils", "Decompresses the base image"),
    ("openssl", "openssl", "Hashes the appliance user password"),
];

/// Run all preflight checks.
pub fn run_preflight() -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    println!("Checking privileges...");
    // kpartx and mount modify kernel state; nothing works without root
    if unsafe { libc::geteuid() } == 0 {
        checks.push(CheckResult::pass_with("root privileges", "running as root"));
    } else {
        checks.push(CheckResult::fail(
            "root privileges",
            "Not running as root. Re-run with sudo.",
        ));
    }

    println!("Checking host tools...");
    for (tool, package, purpose) in REQUIRED_TOOLS {
        checks.push(check_tool(tool, package, purpose));
    }

    // Cross-building ARM images on x86 needs user-mode emulation for the
    // chrooted package steps
    if std::env::consts::ARCH != "aarch64" {
        if Path::new("/usr/bin/qemu-aarch64-static").exists() {
            checks.push(CheckResult::pass_with(
                "qemu-aarch64-static",
                "/usr/bin/qemu-aarch64-static",
            ));
        } else {
            checks.push(CheckResult::warn(
                "qemu-aarch64-static",
                "Not found. Install 'qemu-user-static'; chrooted ARM commands will fail without it.",
            ));
        }
    }

    println!();
    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail() -> Result<()> {
    let report = run_preflight();
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}

fn check_tool(tool: &str, package: &str, purpose: &str) -> CheckResult {
    match which::which(tool) {
        Ok(path) => CheckResult::pass_with(tool, &path.to_string_lossy()),
        Err(_) => CheckResult::fail(
            tool,
            &format!("Not found. Install '{}' package. {}", package, purpose),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_all_passed() {
        let report = PreflightReport {
            checks: vec![
                CheckResult::pass_with("a", "x"),
                CheckResult::warn("b", "warning only"),
            ],
        };
        assert!(report.all_passed());
        assert_eq!(report.fail_count(), 0);
    }

    #[test]
    fn test_report_with_failure() {
        let report = PreflightReport {
            checks: vec![
                CheckResult::pass_with("a", "x"),
                CheckResult::fail("b", "missing"),
            ],
        };
        assert!(!report.all_passed());
        assert_eq!(report.fail_count(), 1);
    }

    #[test]
    fn test_check_tool_found() {
        // `sh` exists on any Unix system
        let result = check_tool("sh", "dash", "shell");
        assert_eq!(result.status, CheckStatus::Pass);
    }

    #[test]
    fn test_check_tool_missing() {
        let result = check_tool("nonexistent_tool_12345", "pkg", "nothing");
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.details.unwrap().contains("pkg"));
    }
}
