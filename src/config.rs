//! Configuration management for citrapi.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the .env file. The resulting
//! `BuildConfig` is immutable: it is loaded once in `main` and passed by
//! reference into every build step.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Download URL for the base Raspberry Pi OS Lite (ARM64) image.
///
/// Check https://www.raspberrypi.com/software/operating-systems/ for the
/// current release.
pub const DEFAULT_BASE_IMAGE_URL: &str = "https://downloads.raspberrypi.com/raspios_lite_arm64/images/raspios_lite_arm64-2025-12-04/2025-12-04-raspios-trixie-arm64-lite.img.xz";

/// Fixed UID/GID for the appliance user (asserted by the image verifier).
pub const DEFAULT_USER_UID: u32 = 1001;
pub const DEFAULT_USER_GID: u32 = 1001;

const DEFAULT_PACKAGES: &[&str] = &[
    "python3-pip",
    "python3-venv",
    "cmake",
    "build-essential",
    "avahi-daemon",
    "avahi-utils",
    "indi-bin",
    "gpsd",
    "gpsd-clients",
    "chrony",
    "comitup",
    "curl",
    "git",
    // pyenv needs a full toolchain to compile Python 3.12
    "libssl-dev",
    "zlib1g-dev",
    "libbz2-dev",
    "libreadline-dev",
    "libsqlite3-dev",
    "libncurses5-dev",
    "libncursesw5-dev",
    "libffi-dev",
    "liblzma-dev",
    "tk-dev",
    "xz-utils",
    // build deps for Python packages (dbus-python, Pillow)
    "libdbus-1-dev",
    "libglib2.0-dev",
    "libjpeg-dev",
    "liblcms2-dev",
    "libwebp-dev",
    "libharfbuzz-dev",
    "libfribidi-dev",
    "libxcb1-dev",
];

/// First-boot device names; one is picked at random on the Pi itself.
const DEFAULT_DEVICE_NAMES: &[&str] = &[
    "voyager",
    "hubble",
    "galileo",
    "juno",
    "kepler",
    "pioneer",
    "viking",
    "luna",
    "apollo",
    "gemini",
    "mercury",
    "atlas",
    "titan",
    "orion",
    "phoenix",
    "spirit",
    "curiosity",
];

/// Supplementary groups the appliance user joins.
pub const USER_GROUPS: &[&str] = &["sudo", "video", "plugdev", "netdev", "gpio", "i2c", "spi"];

/// Immutable build configuration.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Appliance user name (default: citra).
    pub username: String,
    /// Appliance user password.
    pub password: String,
    /// Fixed UID of the appliance user.
    pub user_uid: u32,
    /// Fixed GID of the appliance user's primary group.
    pub user_gid: u32,
    /// Initial hostname and prefix for first-boot device names.
    pub hostname_prefix: String,
    /// WiFi access point SSID prefix (the provisioning daemon appends a number).
    pub wifi_ssid: String,
    /// WiFi access point password.
    pub wifi_password: String,
    /// System packages installed inside the image.
    pub packages: Vec<String>,
    /// Pool of device names for first-boot identity generation.
    pub device_name_pool: Vec<String>,
    /// GPIO pin carrying the GPS PPS signal.
    pub gps_pps_gpio_pin: u32,
    /// UART device the GPS is wired to.
    pub gps_uart_device: String,
    /// Whether the primary UART is enabled in the boot config.
    pub gps_enable_primary_uart: bool,
    /// Web UI port the application listens on.
    pub web_port: u16,
    /// Locale written into the image.
    pub locale: String,
    /// Timezone written into the image.
    pub timezone: String,
    /// Keyboard layout written into the image.
    pub keyboard_layout: String,
    /// WiFi regulatory country code.
    pub wifi_country: String,
    /// Boot partition mount point.
    pub boot_mount: PathBuf,
    /// Root partition mount point.
    pub rootfs_mount: PathBuf,
    /// Base image download URL.
    pub base_image_url: String,
    /// Optional SHA-256 of the compressed base image download.
    pub base_image_sha256: Option<String>,
    /// Image release version stamped into the output file name.
    pub image_version: String,
}

impl BuildConfig {
    /// Load configuration from a .env file in `base_dir` and the process
    /// environment, with environment variables taking precedence.
    pub fn load(base_dir: &Path) -> Self {
        let mut vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            if let Ok(content) = fs::read_to_string(&env_path) {
                for line in content.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((key, value)) = line.split_once('=') {
                        let value = value.trim().trim_matches('"').trim_matches('\'');
                        vars.insert(key.trim().to_string(), value.to_string());
                    }
                }
            }
        }

        for (key, value) in std::env::vars() {
            vars.insert(key, value);
        }

        Self::from_vars(&vars)
    }

    fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| vars.get(key).map(|s| s.trim().to_string());

        let username = get("CITRAPI_USERNAME").unwrap_or_else(|| "citra".to_string());
        let hostname_prefix =
            get("CITRAPI_HOSTNAME_PREFIX").unwrap_or_else(|| "citrascope".to_string());

        Self {
            password: get("CITRAPI_PASSWORD").unwrap_or_else(|| "citra".to_string()),
            user_uid: parse_or(get("CITRAPI_USER_UID"), DEFAULT_USER_UID),
            user_gid: parse_or(get("CITRAPI_USER_GID"), DEFAULT_USER_GID),
            wifi_ssid: get("CITRAPI_WIFI_SSID").unwrap_or_else(|| hostname_prefix.clone()),
            wifi_password: get("CITRAPI_WIFI_PASSWORD").unwrap_or_else(|| "citrascope".to_string()),
            packages: list_or(get("CITRAPI_PACKAGES"), DEFAULT_PACKAGES),
            device_name_pool: list_or(get("CITRAPI_DEVICE_NAMES"), DEFAULT_DEVICE_NAMES),
            gps_pps_gpio_pin: parse_or(get("CITRAPI_GPS_PPS_GPIO"), 18),
            gps_uart_device: get("CITRAPI_GPS_UART_DEVICE")
                .unwrap_or_else(|| "/dev/ttyAMA0".to_string()),
            gps_enable_primary_uart: parse_or(get("CITRAPI_GPS_PRIMARY_UART"), true),
            web_port: parse_or(get("CITRAPI_WEB_PORT"), 24872),
            locale: get("CITRAPI_LOCALE").unwrap_or_else(|| "en_US.UTF-8".to_string()),
            timezone: get("CITRAPI_TIMEZONE").unwrap_or_else(|| "Etc/UTC".to_string()),
            keyboard_layout: get("CITRAPI_KEYBOARD").unwrap_or_else(|| "us".to_string()),
            wifi_country: get("CITRAPI_WIFI_COUNTRY").unwrap_or_else(|| "US".to_string()),
            boot_mount: get("CITRAPI_BOOT_MOUNT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/mnt/part1")),
            rootfs_mount: get("CITRAPI_ROOTFS_MOUNT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/mnt/part2")),
            base_image_url: get("CITRAPI_BASE_IMAGE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_IMAGE_URL.to_string()),
            base_image_sha256: get("CITRAPI_BASE_IMAGE_SHA256").filter(|s| !s.is_empty()),
            image_version: get("IMAGE_VERSION").unwrap_or_else(|| "dev".to_string()),
            username,
            hostname_prefix,
        }
    }

    /// Path of the application virtual environment inside the image.
    pub fn venv_path(&self) -> String {
        format!("/home/{}/.citrascope_venv", self.username)
    }

    /// Home directory of the appliance user inside the image.
    pub fn home_dir(&self) -> String {
        format!("/home/{}", self.username)
    }

    /// Print configuration for `citrapi show config`.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  CITRAPI_USERNAME: {}", self.username);
        println!("  CITRAPI_USER_UID: {}", self.user_uid);
        println!("  CITRAPI_USER_GID: {}", self.user_gid);
        println!("  CITRAPI_HOSTNAME_PREFIX: {}", self.hostname_prefix);
        println!("  CITRAPI_WIFI_SSID: {}", self.wifi_ssid);
        println!("  CITRAPI_WIFI_COUNTRY: {}", self.wifi_country);
        println!("  CITRAPI_GPS_PPS_GPIO: {}", self.gps_pps_gpio_pin);
        println!("  CITRAPI_GPS_UART_DEVICE: {}", self.gps_uart_device);
        println!("  CITRAPI_WEB_PORT: {}", self.web_port);
        println!("  CITRAPI_LOCALE: {}", self.locale);
        println!("  CITRAPI_TIMEZONE: {}", self.timezone);
        println!("  CITRAPI_BOOT_MOUNT: {}", self.boot_mount.display());
        println!("  CITRAPI_ROOTFS_MOUNT: {}", self.rootfs_mount.display());
        println!("  CITRAPI_BASE_IMAGE_URL: {}", self.base_image_url);
        println!("  IMAGE_VERSION: {}", self.image_version);
        println!("  Packages: {}", self.packages.len());
        println!("  Device names: {}", self.device_name_pool.len());
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn list_or(value: Option<String>, default: &[&str]) -> Vec<String> {
    match value {
        Some(s) if !s.trim().is_empty() => s
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}
