//! Appliance user creation.
//!
//! Writes the passwd/shadow/group entries directly into the mounted tree
//! (no chroot needed), populates the home directory from /etc/skel and
//! grants passwordless sudo. The UID/GID are fixed so the verifier and the
//! application service unit can rely on them.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

use crate::config::USER_GROUPS;
use crate::fsutil::{copy_tree, write_file_mode};
use crate::process::Cmd;

use super::{Step, StepContext, StepOutcome};

pub struct AddUser;

impl Step for AddUser {
    fn name(&self) -> &'static str {
        "user"
    }

    fn title(&self) -> &'static str {
        "Add user"
    }

    fn applied(&self, ctx: &StepContext) -> bool {
        let Ok(passwd) = fs::read_to_string(ctx.rootfs_path("/etc/passwd")) else {
            return false;
        };
        has_user(&passwd, &ctx.config.username)
    }

    fn apply(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let config = ctx.config;
        let rootfs = &ctx.rootfs;
        if !rootfs.is_dir() {
            bail!("root filesystem path {} does not exist", rootfs.display());
        }

        if self.applied(ctx) {
            println!("[SKIP] User '{}' already exists", config.username);
            return Ok(StepOutcome::default());
        }

        println!("Creating user {}", config.username);

        let hash = crypt_sha512(&config.password)?;

        append_line(
            &ctx.rootfs_path("/etc/passwd"),
            &passwd_entry(&config.username, config.user_uid, config.user_gid),
        )?;
        println!("Added user to passwd file");

        append_line(
            &ctx.rootfs_path("/etc/shadow"),
            &shadow_entry(&config.username, &hash, days_since_epoch()),
        )?;
        println!("Added user to shadow file");

        let group_path = ctx.rootfs_path("/etc/group");
        append_line(
            &group_path,
            &format!("{}:x:{}:", config.username, config.user_gid),
        )?;
        println!("Created primary group");

        let groups = fs::read_to_string(&group_path)?;
        let mut updated = groups;
        for group in USER_GROUPS {
            updated = add_group_member(&updated, group, &config.username);
        }
        fs::write(&group_path, updated)?;
        println!("Added user to supplementary groups");

        create_home_directory(ctx)?;
        println!("Created home directory");

        write_file_mode(
            ctx.rootfs_path(&format!("/etc/sudoers.d/010_{}-nopasswd", config.username)),
            format!("{} ALL=(ALL) NOPASSWD: ALL\n", config.username),
            0o440,
        )?;
        println!("Configured sudo access");

        Ok(StepOutcome::default())
    }
}

/// SHA-512 crypt hash of the password, via the host's openssl.
fn crypt_sha512(password: &str) -> Result<String> {
    let result = Cmd::new("openssl")
        .args(["passwd", "-6", "-stdin"])
        .stdin_bytes(format!("{password}\n"))
        .error_msg("Failed to hash user password")
        .run()?;
    let hash = result.stdout_trimmed().to_string();
    if !hash.starts_with("$6$") {
        bail!("unexpected password hash format from openssl: {hash}");
    }
    Ok(hash)
}

fn create_home_directory(ctx: &StepContext) -> Result<()> {
    let config = ctx.config;
    let home = ctx.rootfs_path(&config.home_dir());
    let skel = ctx.rootfs_path("/etc/skel");

    fs::create_dir_all(&home)?;
    if skel.is_dir() {
        copy_tree(&skel, &home)?;
    }
    chown_tree(&home, config.user_uid, config.user_gid)
}

/// Recursively chown a tree (symlinks included, without following them).
pub fn chown_tree(path: &Path, uid: u32, gid: u32) -> Result<()> {
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", path.display()))?;
        std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid))
            .with_context(|| format!("failed to chown {}", entry.path().display()))?;
    }
    Ok(())
}

/// /etc/passwd line for the appliance user.
pub fn passwd_entry(username: &str, uid: u32, gid: u32) -> String {
    format!("{username}:x:{uid}:{gid}::/home/{username}:/bin/bash")
}

/// /etc/shadow line. `lastchange` is days since the epoch.
pub fn shadow_entry(username: &str, hash: &str, lastchange: u64) -> String {
    format!("{username}:{hash}:{lastchange}:0:99999:7:::")
}

/// Whether the passwd content already has an entry for `username`.
pub fn has_user(passwd: &str, username: &str) -> bool {
    passwd
        .lines()
        .any(|line| line.starts_with(&format!("{username}:")))
}

/// Add `username` to the members list of `group` in /etc/group content.
///
/// Idempotent: an existing membership is left untouched; unknown groups are
/// left alone.
pub fn add_group_member(content: &str, group: &str, username: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in content.lines() {
        if line.starts_with(&format!("{group}:")) {
            let members = line.rsplit(':').next().unwrap_or("");
            let already = members.split(',').any(|m| m == username);
            if already {
                out.push(line.to_string());
            } else if members.is_empty() {
                out.push(format!("{line}{username}"));
            } else {
                out.push(format!("{line},{username}"));
            }
        } else {
            out.push(line.to_string());
        }
    }
    let mut result = out.join("\n");
    result.push('\n');
    result
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    use std::io::Write;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writeln!(file, "{line}")?;
    Ok(())
}

fn days_since_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() / 86400)
        .unwrap_or(0)
}
