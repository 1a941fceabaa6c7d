//! citrapi - CitraScope Raspberry Pi image builder CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use citrapi::commands::{self, show::ShowTarget};
use citrapi::config::BuildConfig;
use citrapi::steps::StepSelection;

#[derive(Parser)]
#[command(name = "citrapi")]
#[command(about = "CitraScope Raspberry Pi image builder")]
#[command(
    after_help = "QUICK START:\n  citrapi preflight       Check all host tools\n  sudo citrapi build      Build an image (downloads the base if needed)\n  sudo citrapi test       Verify the built image\n  sudo citrapi mount IMG  Inspect an image manually"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a customized image (downloads the base image automatically)
    Build {
        /// Path to a Raspberry Pi OS image file (auto-downloads if not provided)
        image: Option<PathBuf>,

        /// Output image path (default: adds a -citrascope suffix)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Run only the base customization steps, skip the application install
        #[arg(long)]
        customize_only: bool,

        /// Run only the application install on a previously customized image
        #[arg(long, conflicts_with = "customize_only")]
        citrascope_only: bool,
    },

    /// Mount an image read-only and run the verification checklist
    Test {
        /// Image to verify (default: newest built image in the current directory)
        image: Option<PathBuf>,
    },

    /// Attach an image's partitions for manual inspection
    Mount {
        /// Image file to mount
        image: PathBuf,

        /// Mount read-only
        #[arg(long)]
        readonly: bool,

        /// Detach a previously mounted (or crashed) session instead
        #[arg(long)]
        cleanup: bool,
    },

    /// Run preflight checks (verify host tools before a build)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowWhat,
    },

    /// Download the base image (usually automatic)
    Download,
}

#[derive(Subcommand)]
enum ShowWhat {
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let base_dir = std::env::current_dir()?;

    // Load .env if present
    dotenvy::dotenv().ok();
    let config = BuildConfig::load(&base_dir);

    match cli.command {
        Commands::Build {
            image,
            output,
            customize_only,
            citrascope_only,
        } => {
            let selection = if customize_only {
                StepSelection::CustomizeOnly
            } else if citrascope_only {
                StepSelection::CitrascopeOnly
            } else {
                StepSelection::Full
            };
            commands::cmd_build(&base_dir, image, output, selection, &config)?;
        }

        Commands::Test { image } => {
            commands::cmd_test(image, &config)?;
        }

        Commands::Mount {
            image,
            readonly,
            cleanup,
        } => {
            commands::cmd_mount(image, readonly, cleanup, &config)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(strict)?;
        }

        Commands::Show { what } => {
            let target = match what {
                ShowWhat::Config => ShowTarget::Config,
            };
            commands::cmd_show(target, &config)?;
        }

        Commands::Download => {
            commands::cmd_download(&base_dir, &config)?;
        }
    }

    Ok(())
}
