//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Build a customized image
//! - `test` - Verify a finished image
//! - `mount` - Attach/detach an image for manual inspection
//! - `download` - Fetch the base image
//! - `preflight` - Check host tools and privileges
//! - `show` - Display information

pub mod build;
pub mod download;
pub mod mount;
pub mod preflight;
pub mod show;
pub mod test;

pub use build::cmd_build;
pub use download::cmd_download;
pub use mount::cmd_mount;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
pub use test::cmd_test;
