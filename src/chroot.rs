//! Chroot execution environment for the mounted root filesystem.
//!
//! Package installation and anything else that needs the target's own
//! binaries runs through a `ChrootSession`: host `/proc`, `/sys`, `/dev`
//! and `/run` are bound into the mounted tree, the host resolver config is
//! swapped in so DNS works, and (when cross-building on a non-ARM host) a
//! user-mode emulation binary is installed. Teardown runs exactly once, on
//! `close` or on drop, whichever comes first.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ChrootExecutionError;
use crate::process::{Cmd, CommandResult};

/// Emulator installed into the image when the host is not aarch64.
const QEMU_STATIC: &str = "/usr/bin/qemu-aarch64-static";

/// An entered chroot environment with host filesystems bound in.
pub struct ChrootSession {
    root: PathBuf,
    mounted: Vec<PathBuf>,
    resolv_backup: Option<PathBuf>,
    qemu_copy: Option<PathBuf>,
    released: bool,
}

impl ChrootSession {
    /// Bind host filesystems into `root` and prepare it for command
    /// execution.
    pub fn enter(root: &Path) -> Result<Self> {
        let mut session = Self {
            root: root.to_path_buf(),
            mounted: Vec::new(),
            resolv_backup: None,
            qemu_copy: None,
            released: false,
        };

        session.swap_resolv_conf()?;
        session.install_emulator()?;

        // (kind, mount arguments, make-rslave afterwards)
        let binds: [(&str, &[&str], bool); 4] = [
            ("proc", &["-t", "proc", "proc"], false),
            ("sys", &["--rbind", "/sys"], true),
            ("dev", &["--rbind", "/dev"], true),
            ("run", &["--rbind", "/run"], true),
        ];

        for (name, options, make_rslave) in binds {
            let dest = root.join(name);
            fs::create_dir_all(&dest)?;
            // On failure, dropping the partial session unwinds the binds
            // made so far
            Cmd::new("mount")
                .args(options.iter().copied())
                .arg_path(&dest)
                .error_msg(format!("Failed to bind {} into chroot", name))
                .run()?;
            if make_rslave {
                Cmd::new("mount")
                    .arg("--make-rslave")
                    .arg_path(&dest)
                    .error_msg(format!("Failed to make {} rslave", name))
                    .run()?;
            }
            session.mounted.push(dest);
            println!("Mounted {} at {}/{}", name, root.display(), name);
        }

        Ok(session)
    }

    /// Run a command inside the chroot. Non-zero exit surfaces as
    /// `ChrootExecutionError` with the captured output.
    pub fn run<I, S>(&self, args: I) -> Result<CommandResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run_cmd(Cmd::new("chroot").arg_path(&self.root).args(args))
    }

    /// Run a command inside the chroot with an extra environment variable.
    pub fn run_env<I, S>(&self, args: I, key: &str, value: &str) -> Result<CommandResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run_cmd(
            Cmd::new("chroot")
                .arg_path(&self.root)
                .args(args)
                .env(key, value),
        )
    }

    /// Run a shell command inside the chroot as the given user
    /// (`su - <user> -c <command>`).
    pub fn run_as(&self, user: &str, command: &str) -> Result<CommandResult> {
        self.run_cmd(
            Cmd::new("chroot")
                .arg_path(&self.root)
                .args(["su", "-", user, "-c", command]),
        )
    }

    fn run_cmd(&self, cmd: Cmd) -> Result<CommandResult> {
        let result = cmd.allow_fail().run()?;
        if !result.success() {
            let mut output = result.stdout_trimmed().to_string();
            let stderr = result.stderr_trimmed();
            if !stderr.is_empty() {
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(stderr);
            }
            return Err(ChrootExecutionError {
                command: "chroot".to_string(),
                root: self.root.clone(),
                code: result.code(),
                output,
            }
            .into());
        }
        Ok(result)
    }

    /// Release the bind mounts, restore resolv.conf and remove the
    /// emulator copy. Subsequent calls (and the drop) are no-ops.
    pub fn close(mut self) {
        self.release();
    }

    fn swap_resolv_conf(&mut self) -> Result<()> {
        let resolv = self.root.join("etc/resolv.conf");
        let backup = self.root.join("etc/resolv.conf.bak");
        if resolv.symlink_metadata().is_ok() {
            fs::rename(&resolv, &backup).context("failed to back up resolv.conf")?;
            self.resolv_backup = Some(backup);
        }
        let host_resolv = fs::read("/etc/resolv.conf").context("failed to read host resolv.conf")?;
        fs::write(&resolv, host_resolv).context("failed to install host resolv.conf")?;
        Ok(())
    }

    fn install_emulator(&mut self) -> Result<()> {
        if std::env::consts::ARCH == "aarch64" {
            return Ok(());
        }
        let host_qemu = Path::new(QEMU_STATIC);
        if !host_qemu.exists() {
            println!("[WARN] {} not found on host; chrooted ARM binaries may fail", QEMU_STATIC);
            return Ok(());
        }
        let dest = self.root.join("usr/bin/qemu-aarch64-static");
        if !dest.exists() {
            fs::copy(host_qemu, &dest).context("failed to install qemu-aarch64-static")?;
            self.qemu_copy = Some(dest);
        }
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // Unmount in reverse order
        for path in self.mounted.drain(..).rev() {
            let result = Cmd::new("umount").arg("-R").arg_path(&path).allow_fail().run();
            match result {
                Ok(r) if r.success() => println!("Unmounted {}", path.display()),
                _ => println!("[WARN] Failed to unmount {}", path.display()),
            }
        }

        if let Some(backup) = self.resolv_backup.take() {
            let resolv = self.root.join("etc/resolv.conf");
            let _ = fs::remove_file(&resolv);
            if fs::rename(&backup, &resolv).is_err() {
                println!("[WARN] Failed to restore {}", resolv.display());
            }
        }

        if let Some(qemu) = self.qemu_copy.take() {
            let _ = fs::remove_file(qemu);
        }
    }
}

impl Drop for ChrootSession {
    fn drop(&mut self) {
        self.release();
    }
}
