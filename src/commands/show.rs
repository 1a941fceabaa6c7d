//! Show command - displays information.

use anyhow::Result;

use crate::config::BuildConfig;

/// What to show.
pub enum ShowTarget {
    /// Current configuration.
    Config,
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &BuildConfig) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
    }
    Ok(())
}
