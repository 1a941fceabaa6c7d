//! Customization steps applied to the mounted image.
//!
//! Each step is an independent, idempotent unit of work: it reads the
//! immutable `BuildConfig`, mutates the mounted filesystem tree directly
//! or runs commands inside the chroot, and declares which other steps it
//! depends on. The orchestrator runs steps in registry order and validates
//! that a selected subset is dependency-closed before touching the image.

mod banner;
mod citrascope;
mod comitup;
mod gps;
mod headless;
mod hostname;
mod packages;
mod ssh;
mod user;
mod wifi;

pub use citrascope::{install_service as install_citrascope_service, CITRASCOPE_VERSION_KEY};
pub use headless::SETUP_MARKER;

use anyhow::Result;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::config::BuildConfig;
use crate::error::StepPreconditionError;

/// Paths and configuration handed to every step.
pub struct StepContext<'a> {
    /// Boot partition mount path.
    pub boot: PathBuf,
    /// Root partition mount path.
    pub rootfs: PathBuf,
    /// Immutable build configuration.
    pub config: &'a BuildConfig,
}

impl<'a> StepContext<'a> {
    pub fn new(boot: &Path, rootfs: &Path, config: &'a BuildConfig) -> Self {
        Self {
            boot: boot.to_path_buf(),
            rootfs: rootfs.to_path_buf(),
            config,
        }
    }

    /// Resolve an absolute in-image path against the mounted root.
    pub fn rootfs_path(&self, image_path: &str) -> PathBuf {
        self.rootfs.join(image_path.trim_start_matches('/'))
    }
}

/// Data a step reports back to the orchestrator.
#[derive(Debug, Default)]
pub struct StepOutcome {
    /// Free-form metadata (e.g. the installed application version).
    pub metadata: BTreeMap<String, String>,
}

impl StepOutcome {
    pub fn with(key: &str, value: impl Into<String>) -> Self {
        let mut outcome = Self::default();
        outcome.metadata.insert(key.to_string(), value.into());
        outcome
    }
}

/// A named customization unit with declared prerequisites.
pub trait Step {
    /// Stable machine name used in dependency declarations.
    fn name(&self) -> &'static str;

    /// Human-readable title shown in build output.
    fn title(&self) -> &'static str;

    /// Names of steps that must have run (now or in a previous build)
    /// before this one.
    fn deps(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether this step's postcondition already holds on the image.
    ///
    /// Used both for idempotence reporting and to satisfy dependencies of
    /// partial runs against an already-customized image.
    fn applied(&self, ctx: &StepContext) -> bool;

    /// Apply the step to the mounted image.
    fn apply(&self, ctx: &StepContext) -> Result<StepOutcome>;
}

/// Which part of the step list a build runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSelection {
    /// Everything.
    Full,
    /// Base customization without the application install.
    CustomizeOnly,
    /// Only the application install (expects a previously customized image).
    CitrascopeOnly,
}

/// All steps in execution order.
pub fn all() -> Vec<Box<dyn Step>> {
    vec![
        Box::new(hostname::ConfigureHostname),
        Box::new(user::AddUser),
        Box::new(ssh::EnableSsh),
        Box::new(headless::ConfigureHeadless),
        Box::new(packages::InstallPackages),
        Box::new(gps::ConfigureGpsTiming),
        Box::new(citrascope::InstallCitrascope),
        Box::new(comitup::ConfigureComitup),
        Box::new(wifi::EnableWifiHardware),
        Box::new(banner::ConfigureBanner),
    ]
}

/// Steps selected by the CLI flags, in execution order.
pub fn select(selection: StepSelection) -> Vec<Box<dyn Step>> {
    all()
        .into_iter()
        .filter(|step| match selection {
            StepSelection::Full => true,
            StepSelection::CustomizeOnly => step.name() != "citrascope",
            StepSelection::CitrascopeOnly => step.name() == "citrascope",
        })
        .collect()
}

/// Validate that every dependency of every selected step is either earlier
/// in the list or already applied to the mounted image.
pub fn validate(steps: &[Box<dyn Step>], ctx: &StepContext) -> Result<(), StepPreconditionError> {
    let registry = all();
    let mut scheduled: HashSet<&'static str> = HashSet::new();

    for step in steps {
        for &dep in step.deps() {
            if scheduled.contains(dep) {
                continue;
            }
            let satisfied = registry
                .iter()
                .find(|s| s.name() == dep)
                .map(|s| s.applied(ctx))
                .unwrap_or(false);
            if !satisfied {
                return Err(StepPreconditionError {
                    step: step.name(),
                    requires: dep,
                });
            }
        }
        scheduled.insert(step.name());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn test_config() -> BuildConfig {
        // Defaults only; avoids touching the process environment
        BuildConfig::load(Path::new("/nonexistent"))
    }

    #[test]
    fn test_full_selection_contains_all_steps_in_order() {
        let names: Vec<_> = select(StepSelection::Full)
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(
            names,
            vec![
                "hostname",
                "user",
                "ssh",
                "headless",
                "packages",
                "gps",
                "citrascope",
                "comitup",
                "wifi",
                "banner"
            ]
        );
    }

    #[test]
    fn test_customize_only_excludes_application() {
        let names: Vec<_> = select(StepSelection::CustomizeOnly)
            .iter()
            .map(|s| s.name())
            .collect();
        assert!(!names.contains(&"citrascope"));
        assert!(names.contains(&"user"));
        assert!(names.contains(&"packages"));
    }

    #[test]
    fn test_citrascope_only_is_just_the_application() {
        let names: Vec<_> = select(StepSelection::CitrascopeOnly)
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(names, vec!["citrascope"]);
    }

    #[test]
    fn test_full_selection_is_dependency_closed_on_empty_image() {
        let dir = TempDir::new().unwrap();
        let config = test_config();
        let ctx = StepContext::new(&dir.path().join("boot"), &dir.path().join("root"), &config);
        validate(&select(StepSelection::Full), &ctx).unwrap();
    }

    #[test]
    fn test_citrascope_only_rejected_on_pristine_image() {
        let dir = TempDir::new().unwrap();
        let config = test_config();
        let ctx = StepContext::new(&dir.path().join("boot"), &dir.path().join("root"), &config);

        let err = validate(&select(StepSelection::CitrascopeOnly), &ctx).unwrap_err();
        assert_eq!(err.step, "citrascope");
    }

    #[test]
    fn test_citrascope_only_accepted_on_customized_image() {
        let dir = TempDir::new().unwrap();
        let config = test_config();
        let boot = dir.path().join("boot");
        let rootfs = dir.path().join("root");
        std::fs::create_dir_all(rootfs.join("etc")).unwrap();
        std::fs::create_dir_all(rootfs.join("usr/sbin")).unwrap();

        // Simulate a previous customize-only run: user + packages applied
        std::fs::write(
            rootfs.join("etc/passwd"),
            format!("root:x:0:0:root:/root:/bin/bash\n{}:x:1001:1001::/home/{}:/bin/bash\n",
                config.username, config.username),
        )
        .unwrap();
        std::fs::write(rootfs.join("usr/sbin/policy-rc.d"), "#!/bin/sh\nexit 101\n").unwrap();

        let ctx = StepContext::new(&boot, &rootfs, &config);
        validate(&select(StepSelection::CitrascopeOnly), &ctx).unwrap();
    }

    #[test]
    fn test_outcome_metadata() {
        let outcome = StepOutcome::with("version", "1.2.3");
        assert_eq!(outcome.metadata.get("version").unwrap(), "1.2.3");
    }

    #[test]
    fn test_step_names_are_unique() {
        let steps = all();
        let names: HashMap<_, _> = steps.iter().map(|s| (s.name(), ())).collect();
        assert_eq!(names.len(), steps.len());
    }

    #[test]
    fn test_deps_reference_known_steps() {
        let steps = all();
        let names: HashSet<_> = steps.iter().map(|s| s.name()).collect();
        for step in &steps {
            for dep in step.deps() {
                assert!(names.contains(dep), "unknown dep '{dep}' of '{}'", step.name());
            }
        }
    }
}
