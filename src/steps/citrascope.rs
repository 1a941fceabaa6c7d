//! Citrascope application installation.
//!
//! The heaviest step: bootstraps pyenv for the appliance user inside the
//! chroot, compiles Python 3.12, creates the application virtual
//! environment at its fixed home path, installs `citrascope[indi]` and
//! captures the installed version, then writes and enables the systemd
//! service unit.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Write;

use crate::chroot::ChrootSession;
use crate::config::BuildConfig;
use crate::fsutil::{ensure_symlink, write_file_mode, write_file_with_dirs};

use super::user::chown_tree;
use super::{Step, StepContext, StepOutcome};

/// Metadata key under which the installed version is reported.
pub const CITRASCOPE_VERSION_KEY: &str = "citrascope_version";

const SERVICE_NAME: &str = "citrascope.service";

pub struct InstallCitrascope;

impl Step for InstallCitrascope {
    fn name(&self) -> &'static str {
        "citrascope"
    }

    fn title(&self) -> &'static str {
        "Install Citrascope"
    }

    fn deps(&self) -> &'static [&'static str] {
        &["user", "packages"]
    }

    fn applied(&self, ctx: &StepContext) -> bool {
        ctx.rootfs_path(&ctx.config.venv_path())
            .join("bin/citrascope")
            .exists()
    }

    fn apply(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let config = ctx.config;
        let home = ctx.rootfs_path(&config.home_dir());
        if !home.exists() {
            bail!(
                "home directory {} does not exist - the user step must run first",
                home.display()
            );
        }

        let chroot = ChrootSession::enter(&ctx.rootfs)?;

        println!("Installing pyenv and Python 3.12...");
        chroot.run_as(&config.username, "curl https://pyenv.run | bash")?;

        // pyenv into the login shell profile
        let bashrc = home.join(".bashrc");
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&bashrc)?;
        file.write_all(
            b"\n# pyenv configuration\n\
              export PYENV_ROOT=\"$HOME/.pyenv\"\n\
              export PATH=\"$PYENV_ROOT/bin:$PATH\"\n\
              eval \"$(pyenv init -)\"\n",
        )?;
        drop(file);

        // Complex commands go through a script file rather than an inline
        // shell string built from config values
        let install_script = home.join(".pyenv_install.sh");
        write_file_mode(
            &install_script,
            "#!/bin/bash\n\
             set -e\n\
             export PYENV_ROOT=\"$HOME/.pyenv\"\n\
             export PATH=\"$PYENV_ROOT/bin:$PATH\"\n\
             pyenv install 3.12\n\
             pyenv global 3.12\n",
            0o755,
        )?;
        chroot.run_as(
            &config.username,
            &format!("{}/.pyenv_install.sh", config.home_dir()),
        )?;
        fs::remove_file(&install_script)?;

        println!("Creating Citrascope virtual environment...");
        let python = find_pyenv_python(ctx)
            .context("Python 3.12 not found in pyenv versions after install")?;
        chroot.run_as(
            &config.username,
            &format!("{python} -m venv {}", config.venv_path()),
        )?;

        println!("Installing Citrascope with INDI support...");
        let pip = format!("{}/bin/pip", config.venv_path());
        chroot.run([pip.as_str(), "install", "--upgrade", "pip"])?;
        chroot.run([pip.as_str(), "install", "citrascope[indi]"])?;

        let show = chroot.run([pip.as_str(), "show", "citrascope"])?;
        let version = parse_pip_show_version(&show.stdout);
        match &version {
            Some(v) => println!("  ✓ Citrascope v{v} installed successfully"),
            None => println!("  ✓ Citrascope installed successfully"),
        }

        chroot.close();

        install_service(ctx)?;

        println!("Setting file ownership...");
        chown_tree(&home, config.user_uid, config.user_gid)?;
        println!("File ownership set");

        Ok(match version {
            Some(v) => StepOutcome::with(CITRASCOPE_VERSION_KEY, v),
            None => StepOutcome::default(),
        })
    }
}

/// Write and enable the citrascope systemd service.
pub fn install_service(ctx: &StepContext) -> Result<()> {
    let unit_path = format!("/etc/systemd/system/{SERVICE_NAME}");
    write_file_with_dirs(ctx.rootfs_path(&unit_path), service_unit(ctx.config))?;
    println!("Created {SERVICE_NAME}");

    ensure_symlink(
        unit_path.as_ref(),
        &ctx.rootfs_path(&format!(
            "/etc/systemd/system/multi-user.target.wants/{SERVICE_NAME}"
        )),
    )?;
    println!("Enabled {SERVICE_NAME}");
    Ok(())
}

/// Systemd unit for the telescope-control daemon.
pub fn service_unit(config: &BuildConfig) -> String {
    format!(
        "[Unit]\n\
         Description=Citrascope Telescope Control Daemon\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         User={user}\n\
         WorkingDirectory={home}\n\
         ExecStart={venv}/bin/citrascope --web-port 80\n\
         Restart=on-failure\n\
         # Allow binding to privileged port 80 without running as root\n\
         AmbientCapabilities=CAP_NET_BIND_SERVICE\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        user = config.username,
        home = config.home_dir(),
        venv = config.venv_path(),
    )
}

/// In-image path of the pyenv-built Python 3.12, found by scanning the
/// versions directory through the mounted tree.
fn find_pyenv_python(ctx: &StepContext) -> Option<String> {
    let versions_dir = ctx
        .rootfs_path(&ctx.config.home_dir())
        .join(".pyenv/versions");
    let entries = fs::read_dir(versions_dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("3.12") {
            return Some(format!(
                "{}/.pyenv/versions/{}/bin/python3",
                ctx.config.home_dir(),
                name
            ));
        }
    }
    None
}

/// Extract the `Version:` field from `pip show` output.
pub fn parse_pip_show_version(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.strip_prefix("Version:")
            .map(|rest| rest.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}
