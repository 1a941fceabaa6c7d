//! Shared test utilities for citrapi tests.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use citrapi::config::BuildConfig;

/// Test environment with a mock boot partition and root filesystem tree.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Mock boot partition mount
    pub boot: PathBuf,
    /// Mock root filesystem mount
    pub rootfs: PathBuf,
}

impl TestEnv {
    /// Create a new test environment with a populated mock image tree.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let boot = temp_dir.path().join("boot");
        let rootfs = temp_dir.path().join("rootfs");

        create_mock_boot(&boot);
        create_mock_rootfs(&rootfs);

        Self {
            _temp_dir: temp_dir,
            boot,
            rootfs,
        }
    }

    /// Default configuration (no .env, ignores nothing from the process
    /// environment beyond what `BuildConfig::load` always reads).
    pub fn config() -> BuildConfig {
        BuildConfig::load(Path::new("/nonexistent"))
    }
}

/// Create a minimal mock Raspberry Pi OS boot partition.
pub fn create_mock_boot(boot: &Path) {
    fs::create_dir_all(boot).expect("Failed to create mock boot dir");
    fs::write(boot.join("config.txt"), "arm_64bit=1\ndtparam=audio=on\n")
        .expect("Failed to create config.txt");
    fs::write(
        boot.join("cmdline.txt"),
        "console=serial0,115200 console=tty1 root=PARTUUID=abcd-02 rootwait\n",
    )
    .expect("Failed to create cmdline.txt");
}

/// Create a minimal mock Raspberry Pi OS root filesystem.
pub fn create_mock_rootfs(rootfs: &Path) {
    let dirs = [
        "etc/skel",
        "etc/default",
        "etc/chrony",
        "etc/systemd/system",
        "lib/systemd/system",
        "usr/sbin",
        "usr/local/bin",
        "home",
        "var/lib",
    ];
    for dir in dirs {
        fs::create_dir_all(rootfs.join(dir)).expect("Failed to create mock rootfs dir");
    }

    fs::write(
        rootfs.join("etc/passwd"),
        "root:x:0:0:root:/root:/bin/bash\ndaemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n",
    )
    .expect("Failed to create passwd");
    fs::write(
        rootfs.join("etc/shadow"),
        "root:*:19000:0:99999:7:::\n",
    )
    .expect("Failed to create shadow");
    fs::write(
        rootfs.join("etc/group"),
        "root:x:0:\nsudo:x:27:\nvideo:x:44:pi\nplugdev:x:46:\nnetdev:x:108:\ngpio:x:997:\ni2c:x:998:\nspi:x:999:\n",
    )
    .expect("Failed to create group");
    fs::write(
        rootfs.join("etc/hosts"),
        "127.0.0.1\tlocalhost\n127.0.1.1\traspberrypi\n",
    )
    .expect("Failed to create hosts");
    fs::write(
        rootfs.join("etc/locale.gen"),
        "# en_GB.UTF-8 UTF-8\n# en_US.UTF-8 UTF-8\n",
    )
    .expect("Failed to create locale.gen");
    fs::write(
        rootfs.join("etc/chrony/chrony.conf"),
        "pool 2.debian.pool.ntp.org iburst\n",
    )
    .expect("Failed to create chrony.conf");
    fs::write(
        rootfs.join("lib/systemd/system/ssh.service"),
        "[Unit]\nDescription=OpenBSD Secure Shell server\n[Service]\nExecStart=/usr/sbin/sshd -D\n",
    )
    .expect("Failed to create ssh.service");
    fs::write(rootfs.join("etc/skel/.bashrc"), "# ~/.bashrc\n").expect("Failed to create skel");
}

/// Assert a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.is_file(), "Expected file to exist: {}", path.display());
}

/// Assert a file contains the given needle.
pub fn assert_file_contains(path: &Path, needle: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()));
    assert!(
        content.contains(needle),
        "Expected {} to contain '{}', got:\n{}",
        path.display(),
        needle,
        content
    );
}

/// Assert a symlink exists and points at the given target.
pub fn assert_symlink(link: &Path, target: &str) {
    assert!(
        link.symlink_metadata().map(|m| m.is_symlink()).unwrap_or(false),
        "Expected symlink at {}",
        link.display()
    );
    let actual = fs::read_link(link).expect("Failed to read symlink");
    assert_eq!(
        actual,
        Path::new(target),
        "Symlink {} points at the wrong target",
        link.display()
    );
}
