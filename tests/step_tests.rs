//! Integration tests for customization steps.
//!
//! These exercise the steps that mutate the mounted tree directly against
//! a mock rootfs; steps that shell into a chroot (packages, the
//! application install) are covered by their pure helpers' unit tests.

mod helpers;

use std::fs;
use std::os::unix::fs::PermissionsExt;

use helpers::{assert_file_contains, assert_file_exists, assert_symlink, TestEnv};

use citrapi::steps::{self, Step, StepContext, StepSelection};

fn apply(env: &TestEnv, name: &str) {
    let config = TestEnv::config();
    let ctx = StepContext::new(&env.boot, &env.rootfs, &config);
    let step = find(name);
    step.apply(&ctx)
        .unwrap_or_else(|e| panic!("step '{name}' failed: {e:#}"));
}

fn find(name: &str) -> Box<dyn Step> {
    steps::select(StepSelection::Full)
        .into_iter()
        .find(|s| s.name() == name)
        .unwrap_or_else(|| panic!("unknown step '{name}'"))
}

// =============================================================================
// hostname step
// =============================================================================

#[test]
fn test_hostname_writes_identity_files() {
    let env = TestEnv::new();
    apply(&env, "hostname");

    assert_file_contains(&env.rootfs.join("etc/hostname"), "citrascope");
    assert_file_contains(&env.rootfs.join("etc/hosts"), "127.0.1.1\tcitrascope");
    assert_file_contains(&env.rootfs.join("etc/citrascope-prefix"), "citrascope");

    let script = env.rootfs.join("usr/local/bin/generate-citrascope-identity");
    assert_file_exists(&script);
    let mode = fs::metadata(&script).unwrap().permissions().mode();
    assert_eq!(mode & 0o111, 0o111, "identity script must be executable");

    assert_file_exists(&env.rootfs.join("etc/systemd/system/citrascope-identity.service"));
    assert_symlink(
        &env.rootfs
            .join("etc/systemd/system/multi-user.target.wants/citrascope-identity.service"),
        "/etc/systemd/system/citrascope-identity.service",
    );
}

#[test]
fn test_hostname_script_embeds_device_pool() {
    let env = TestEnv::new();
    apply(&env, "hostname");
    assert_file_contains(
        &env.rootfs.join("usr/local/bin/generate-citrascope-identity"),
        "\"voyager\"",
    );
}

#[test]
fn test_hostname_applied_after_apply() {
    let env = TestEnv::new();
    let config = TestEnv::config();
    let ctx = StepContext::new(&env.boot, &env.rootfs, &config);
    let step = find("hostname");

    assert!(!step.applied(&ctx));
    step.apply(&ctx).unwrap();
    assert!(step.applied(&ctx));
}

// =============================================================================
// ssh step
// =============================================================================

#[test]
fn test_ssh_creates_wants_symlink() {
    let env = TestEnv::new();
    apply(&env, "ssh");
    assert_symlink(
        &env.rootfs.join("etc/systemd/system/multi-user.target.wants/ssh.service"),
        "/lib/systemd/system/ssh.service",
    );
}

#[test]
fn test_ssh_fails_without_unit() {
    let env = TestEnv::new();
    fs::remove_file(env.rootfs.join("lib/systemd/system/ssh.service")).unwrap();

    let config = TestEnv::config();
    let ctx = StepContext::new(&env.boot, &env.rootfs, &config);
    let err = find("ssh").apply(&ctx).unwrap_err();
    assert!(err.to_string().contains("ssh.service"));
}

// =============================================================================
// gps step
// =============================================================================

#[test]
fn test_gps_configures_boot_and_daemons() {
    let env = TestEnv::new();
    apply(&env, "gps");

    assert_file_contains(&env.boot.join("config.txt"), "dtoverlay=pps-gpio,gpiopin=18");
    assert_file_contains(&env.boot.join("config.txt"), "enable_uart=1");

    let cmdline = fs::read_to_string(env.boot.join("cmdline.txt")).unwrap();
    assert!(!cmdline.contains("console=serial0"));
    assert!(cmdline.contains("console=tty1"));

    assert_file_contains(&env.rootfs.join("etc/default/gpsd"), "/dev/pps0");
    assert_file_contains(&env.rootfs.join("etc/chrony/chrony.conf"), "refclock SHM 1 refid PPS");
    // the stock pool line survives as the NTP fallback
    assert_file_contains(&env.rootfs.join("etc/chrony/chrony.conf"), "pool 2.debian.pool.ntp.org");
}

#[test]
fn test_gps_is_idempotent() {
    let env = TestEnv::new();
    apply(&env, "gps");
    let config_txt = fs::read_to_string(env.boot.join("config.txt")).unwrap();
    let chrony = fs::read_to_string(env.rootfs.join("etc/chrony/chrony.conf")).unwrap();

    apply(&env, "gps");
    assert_eq!(fs::read_to_string(env.boot.join("config.txt")).unwrap(), config_txt);
    assert_eq!(
        fs::read_to_string(env.rootfs.join("etc/chrony/chrony.conf")).unwrap(),
        chrony
    );
}

// =============================================================================
// comitup step
// =============================================================================

#[test]
fn test_comitup_writes_config_and_enables_service() {
    let env = TestEnv::new();
    apply(&env, "comitup");

    assert_file_contains(&env.rootfs.join("etc/comitup.conf"), "ap_name: citrascope-<nnnn>");
    assert_file_contains(&env.rootfs.join("etc/comitup.conf"), "web_service: citrascope.service");
    assert_file_exists(&env.rootfs.join("usr/share/comitup/web/templates/index.html"));
    assert_symlink(
        &env.rootfs.join("etc/systemd/system/multi-user.target.wants/comitup.service"),
        "/lib/systemd/system/comitup.service",
    );
}

// =============================================================================
// wifi step
// =============================================================================

#[test]
fn test_wifi_installs_radio_unit() {
    let env = TestEnv::new();
    apply(&env, "wifi");

    assert_file_contains(
        &env.rootfs.join("etc/systemd/system/wifi-on.service"),
        "nmcli radio wifi on",
    );
    assert_symlink(
        &env.rootfs.join("etc/systemd/system/NetworkManager.service.wants/wifi-on.service"),
        "/etc/systemd/system/wifi-on.service",
    );
}

// =============================================================================
// banner step
// =============================================================================

#[test]
fn test_banner_is_executable_profile_script() {
    let env = TestEnv::new();
    apply(&env, "banner");

    let banner = env.rootfs.join("etc/profile.d/citrascope-banner.sh");
    assert_file_exists(&banner);
    let mode = fs::metadata(&banner).unwrap().permissions().mode();
    assert_eq!(mode & 0o755, 0o755);
    assert_file_contains(&banner, "HOSTNAME=$(hostname)");
}

// =============================================================================
// user step (idempotence path; creation needs a chroot-capable host)
// =============================================================================

#[test]
fn test_user_skips_when_already_present() {
    let env = TestEnv::new();
    let config = TestEnv::config();

    // Simulate a previous run
    let passwd = env.rootfs.join("etc/passwd");
    let mut content = fs::read_to_string(&passwd).unwrap();
    content.push_str("citra:x:1001:1001::/home/citra:/bin/bash\n");
    fs::write(&passwd, &content).unwrap();

    let ctx = StepContext::new(&env.boot, &env.rootfs, &config);
    let step = find("user");
    assert!(step.applied(&ctx));
    step.apply(&ctx).expect("re-running the user step must succeed");

    // No duplicate entry was appended
    let after = fs::read_to_string(&passwd).unwrap();
    assert_eq!(after.matches("citra:x:1001").count(), 1);
}

// =============================================================================
// running the mutating steps twice converges
// =============================================================================

#[test]
fn test_step_list_is_idempotent() {
    let env = TestEnv::new();
    let file_steps = ["hostname", "ssh", "gps", "comitup", "wifi", "banner"];

    for name in file_steps {
        apply(&env, name);
    }
    let hostname = fs::read_to_string(env.rootfs.join("etc/hostname")).unwrap();
    let comitup = fs::read_to_string(env.rootfs.join("etc/comitup.conf")).unwrap();
    let config_txt = fs::read_to_string(env.boot.join("config.txt")).unwrap();

    for name in file_steps {
        apply(&env, name);
    }
    assert_eq!(fs::read_to_string(env.rootfs.join("etc/hostname")).unwrap(), hostname);
    assert_eq!(fs::read_to_string(env.rootfs.join("etc/comitup.conf")).unwrap(), comitup);
    assert_eq!(fs::read_to_string(env.boot.join("config.txt")).unwrap(), config_txt);
}

// =============================================================================
// generated unit files are well-formed
// =============================================================================

#[test]
fn test_generated_units_have_install_sections() {
    let env = TestEnv::new();
    apply(&env, "hostname");
    apply(&env, "wifi");

    let unit_re = regex::Regex::new(r"(?s)\[Unit\].*\[Service\].*\[Install\]").unwrap();
    for unit in [
        "etc/systemd/system/citrascope-identity.service",
        "etc/systemd/system/wifi-on.service",
    ] {
        let content = fs::read_to_string(env.rootfs.join(unit)).unwrap();
        assert!(unit_re.is_match(&content), "{unit} is missing a section");
    }
}
