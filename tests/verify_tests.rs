//! Integration tests for the image verification checklist.

mod helpers;

use std::fs;

use helpers::TestEnv;

use citrapi::steps::{self, Step, StepContext, StepSelection};
use citrapi::verify;

/// Build a mock tree that looks like a fully customized image: run the
/// directly-testable steps and fabricate the artifacts the chrooted steps
/// would have produced.
fn customized_env() -> TestEnv {
    let env = TestEnv::new();
    let config = TestEnv::config();
    let ctx = StepContext::new(&env.boot, &env.rootfs, &config);

    for step in steps::select(StepSelection::Full) {
        match step.name() {
            "hostname" | "ssh" | "gps" | "comitup" | "wifi" | "banner" => {
                step.apply(&ctx).unwrap()
            }
            _ => continue,
        };
    }

    // user step artifacts
    let passwd = env.rootfs.join("etc/passwd");
    let mut content = fs::read_to_string(&passwd).unwrap();
    content.push_str("citra:x:1001:1001::/home/citra:/bin/bash\n");
    fs::write(&passwd, content).unwrap();

    let group = env.rootfs.join("etc/group");
    let mut content = fs::read_to_string(&group).unwrap();
    content = content
        .replace("sudo:x:27:", "sudo:x:27:citra")
        .replace("video:x:44:pi", "video:x:44:pi,citra")
        .replace("plugdev:x:46:", "plugdev:x:46:citra")
        .replace("netdev:x:108:", "netdev:x:108:citra");
    content.push_str("citra:x:1001:\n");
    fs::write(&group, content).unwrap();

    // headless marker
    fs::write(env.rootfs.join("etc/rpi-initial-setup"), "").unwrap();

    // application artifacts (normally created inside the chroot)
    let venv_bin = env.rootfs.join("home/citra/.citrascope_venv/bin");
    fs::create_dir_all(&venv_bin).unwrap();
    fs::write(venv_bin.join("citrascope"), "#!/usr/bin/env python3\n").unwrap();
    citrapi::steps::install_citrascope_service(&ctx).unwrap();

    env
}

#[test]
fn test_verifier_passes_on_customized_image() {
    let env = customized_env();
    let config = TestEnv::config();

    let report = verify::run_checklist(&env.rootfs, &config);
    let failures: Vec<_> = report.checks.iter().filter(|c| !c.passed).collect();
    assert!(failures.is_empty(), "unexpected failures: {failures:?}");
    assert!(report.all_passed());
    assert_eq!(report.fail_count(), 0);
}

#[test]
fn test_verifier_fails_everything_on_pristine_image() {
    let env = TestEnv::new();
    let config = TestEnv::config();

    let report = verify::run_checklist(&env.rootfs, &config);
    assert!(!report.all_passed());
    // A bare image passes none of the customization checks
    assert_eq!(report.fail_count(), report.checks.len());
}

#[test]
fn test_missing_service_unit_fails_exactly_that_check() {
    let env = customized_env();
    let config = TestEnv::config();

    fs::remove_file(
        env.rootfs
            .join("etc/systemd/system/multi-user.target.wants/citrascope.service"),
    )
    .unwrap();

    let report = verify::run_checklist(&env.rootfs, &config);
    assert!(!report.all_passed());
    assert_eq!(report.fail_count(), 1);

    let failed: Vec<_> = report
        .checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(failed, vec!["Citrascope service enabled"]);
}

#[test]
fn test_wrong_uid_fails_uid_check_only() {
    let env = customized_env();
    let config = TestEnv::config();

    let passwd = env.rootfs.join("etc/passwd");
    let content = fs::read_to_string(&passwd)
        .unwrap()
        .replace("citra:x:1001:1001:", "citra:x:1000:1001:");
    fs::write(&passwd, content).unwrap();

    let report = verify::run_checklist(&env.rootfs, &config);
    let failed: Vec<_> = report
        .checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(failed, vec!["User has correct UID (1001)"]);
}

#[test]
fn test_checklist_covers_expected_surface() {
    let env = TestEnv::new();
    let config = TestEnv::config();
    let report = verify::run_checklist(&env.rootfs, &config);

    for expected in [
        "User 'citra' exists",
        "SSH service enabled",
        "Hostname set",
        "Citrascope venv exists",
        "Citrascope binary exists",
        "Comitup config exists",
        "Login banner installed",
    ] {
        assert!(
            report.checks.iter().any(|c| c.name == expected),
            "missing check '{expected}'"
        );
    }
}

#[test]
fn test_checklist_on_missing_tree_reports_failures() {
    // Verifying a nonexistent directory must not panic or consult the host
    let dir = tempfile::TempDir::new().unwrap();
    let config = TestEnv::config();
    let report = verify::run_checklist(&dir.path().join("nothing"), &config);
    assert!(!report.all_passed());
    assert_eq!(report.fail_count(), report.checks.len());
}
