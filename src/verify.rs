//! Image verification.
//!
//! Mounts a finished image read-only and asserts the filesystem state the
//! customization steps promise: user, groups, hostname, enabled services,
//! application artifacts, WiFi provisioning config. Every check runs
//! independently; failures are collected, not short-circuited.

use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::config::BuildConfig;
use crate::mount::{MountPoints, MountSession};
use crate::steps::SETUP_MARKER;

/// Result of a single verification check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub details: Option<String>,
}

impl CheckResult {
    fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            details: None,
        }
    }

    fn fail(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            details: Some(details.to_string()),
        }
    }

    fn of(name: &str, passed: bool, details: &str) -> Self {
        if passed {
            Self::pass(name)
        } else {
            Self::fail(name, details)
        }
    }
}

/// Results of the full verification checklist.
pub struct VerificationReport {
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    /// Overall pass: every check passed.
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn fail_count(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }

    /// Print one line per check plus an overall verdict.
    pub fn print(&self) {
        for check in &self.checks {
            if check.passed {
                println!("  ✓ {}", check.name);
            } else {
                match &check.details {
                    Some(details) => println!("  ✗ {}: {}", check.name, details),
                    None => println!("  ✗ {}", check.name),
                }
            }
        }

        println!();
        let passed = self.checks.len() - self.fail_count();
        if self.all_passed() {
            println!("{}", "=".repeat(40));
            println!("✓ All {} tests passed!", passed);
            println!("{}", "=".repeat(40));
            println!("\nImage is ready to flash to SD card.");
        } else {
            println!("{}", "=".repeat(40));
            println!("✗ {} test(s) failed", self.fail_count());
            println!("✓ {} test(s) passed", passed);
            println!("{}", "=".repeat(40));
        }
    }
}

/// Mount `image_path` read-only, run the checklist and unmount.
pub fn verify_image(image_path: &Path, config: &BuildConfig) -> Result<VerificationReport> {
    let mounts = MountPoints::new(&config.boot_mount, &config.rootfs_mount);
    let session = MountSession::attach_readonly(image_path, &mounts)?;
    let report = run_checklist(session.rootfs(), config);
    session.detach();
    Ok(report)
}

/// The verification checklist, run against a mounted (or mock) root tree.
pub fn run_checklist(rootfs: &Path, config: &BuildConfig) -> VerificationReport {
    let user = &config.username;
    let at = |p: &str| rootfs.join(p.trim_start_matches('/'));
    let mut checks = Vec::new();

    let passwd = fs::read_to_string(at("/etc/passwd")).unwrap_or_default();
    let passwd_line = passwd
        .lines()
        .find(|line| line.starts_with(&format!("{user}:")));

    checks.push(CheckResult::of(
        &format!("User '{user}' exists"),
        passwd_line.is_some(),
        "no passwd entry",
    ));

    let uid_ok = passwd_line
        .and_then(|line| line.split(':').nth(2))
        .map(|uid| uid == config.user_uid.to_string())
        .unwrap_or(false);
    checks.push(CheckResult::of(
        &format!("User has correct UID ({})", config.user_uid),
        uid_ok,
        "UID mismatch or user missing",
    ));

    let group = fs::read_to_string(at("/etc/group")).unwrap_or_default();
    let in_group = |name: &str| {
        group
            .lines()
            .find(|line| line.starts_with(&format!("{name}:")))
            .map(|line| {
                line.rsplit(':')
                    .next()
                    .unwrap_or("")
                    .split(',')
                    .any(|member| member == user.as_str())
            })
            .unwrap_or(false)
    };
    for name in ["sudo", "video", "plugdev", "netdev"] {
        checks.push(CheckResult::of(
            &format!("User in {name} group"),
            in_group(name),
            "membership missing",
        ));
    }

    checks.push(CheckResult::of(
        "SSH service enabled",
        at("/etc/systemd/system/multi-user.target.wants/ssh.service")
            .symlink_metadata()
            .is_ok(),
        "wants symlink missing",
    ));

    let hostname = fs::read_to_string(at("/etc/hostname")).unwrap_or_default();
    checks.push(CheckResult::of(
        "Hostname set",
        hostname.trim() == config.hostname_prefix,
        &format!(
            "expected '{}', found '{}'",
            config.hostname_prefix,
            hostname.trim()
        ),
    ));

    checks.push(CheckResult::of(
        "Setup marker present",
        at(SETUP_MARKER).exists(),
        "first-boot setup marker missing",
    ));

    let venv = config.venv_path();
    checks.push(CheckResult::of(
        "Citrascope venv exists",
        at(&venv).is_dir(),
        "virtual environment directory missing",
    ));
    checks.push(CheckResult::of(
        "Citrascope binary exists",
        at(&format!("{venv}/bin/citrascope")).is_file(),
        "entry point missing from venv",
    ));
    checks.push(CheckResult::of(
        "Citrascope service exists",
        at("/etc/systemd/system/citrascope.service").is_file(),
        "unit file missing",
    ));
    checks.push(CheckResult::of(
        "Citrascope service enabled",
        at("/etc/systemd/system/multi-user.target.wants/citrascope.service")
            .symlink_metadata()
            .is_ok(),
        "wants symlink missing",
    ));

    checks.push(CheckResult::of(
        "Comitup config exists",
        at("/etc/comitup.conf").is_file(),
        "/etc/comitup.conf missing",
    ));
    checks.push(CheckResult::of(
        "Comitup service enabled",
        at("/etc/systemd/system/multi-user.target.wants/comitup.service")
            .symlink_metadata()
            .is_ok(),
        "wants symlink missing",
    ));

    checks.push(CheckResult::of(
        "Identity service enabled",
        at("/etc/systemd/system/multi-user.target.wants/citrascope-identity.service")
            .symlink_metadata()
            .is_ok(),
        "wants symlink missing",
    ));

    checks.push(CheckResult::of(
        "Login banner installed",
        at("/etc/profile.d/citrascope-banner.sh").is_file(),
        "banner script missing",
    ));

    VerificationReport { checks }
}
