//! citrapi - CitraScope Raspberry Pi image builder.
//!
//! Builds a telescope-control appliance image from a base Raspberry Pi OS
//! release: map the image's partitions onto loop devices, mount them, run
//! an ordered list of idempotent customization steps (user, hostname,
//! SSH, WiFi provisioning, packages, GPS timing, application install),
//! then unmount and finalize the output file.
//!
//! The library surface exists for the binary and for integration tests.

pub mod chroot;
pub mod commands;
pub mod config;
pub mod download;
pub mod error;
pub mod fsutil;
pub mod lock;
pub mod mount;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod resize;
pub mod steps;
pub mod timing;
pub mod verify;
