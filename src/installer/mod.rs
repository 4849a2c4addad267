//! Feature-gated extension installer
//!
//! Drives the install-or-uninstall transition for the optional acceleration
//! extension. The installer holds no state between runs: every invocation
//! starts from `Unknown` and recomputes its actions from the capability
//! flag and the current filesystem, because the package manager and the
//! runtime's package directory are the actual source of truth.
//!
//! Sub-step failures are recorded as [`InstallOutcome`]s and never abort
//! the surrounding build. The extension is an optimization; a worker image
//! without it is still a correct image.

mod pip;

pub use pip::PipPackageManager;

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::capability::CapabilityFlag;
use crate::config::FeatureConfig;
use crate::error::ProvisionError;
use crate::runtime::RuntimeTarget;

/// Package-manager surface the installer drives.
///
/// `install` must apply an upgrade-or-reinstall policy so repeated runs
/// converge on a stale partial install instead of no-opping. `uninstall`
/// must treat "not installed" as success.
pub trait PackageManager {
    fn install(&self, spec: &str) -> Result<(), ProvisionError>;
    fn uninstall(&self, name: &str) -> Result<(), ProvisionError>;
}

/// Installer state. `Enabled`, `Disabled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Unknown,
    Enabling,
    Enabled,
    Disabling,
    Disabled,
    Failed,
}

impl InstallState {
    /// Stable lowercase name, used in the build manifest and status output.
    pub fn as_str(self) -> &'static str {
        match self {
            InstallState::Unknown => "unknown",
            InstallState::Enabling => "enabling",
            InstallState::Enabled => "enabled",
            InstallState::Disabling => "disabling",
            InstallState::Disabled => "disabled",
            InstallState::Failed => "failed",
        }
    }
}

/// The individual actions a transition may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    PackageInstall,
    PackageUninstall,
    ArtifactCopy,
    ArtifactRemove,
}

/// Per-action result record. Consumed for logging and for deciding whether
/// the next sub-step runs; never persisted.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub action: ActionKind,
    pub succeeded: bool,
    pub detail: String,
}

/// Result of one full transition run.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub state: InstallState,
    pub outcomes: Vec<InstallOutcome>,
}

impl InstallReport {
    pub fn is_failed(&self) -> bool {
        self.state == InstallState::Failed
    }
}

/// The feature installer. Borrows its collaborators; owns nothing durable.
pub struct FeatureInstaller<'a, M: PackageManager> {
    manager: &'a M,
    feature: &'a FeatureConfig,
    /// Absolute path the artifact is copied from on the enable path.
    artifact_source: PathBuf,
}

impl<'a, M: PackageManager> FeatureInstaller<'a, M> {
    pub fn new(manager: &'a M, feature: &'a FeatureConfig, artifact_source: PathBuf) -> Self {
        FeatureInstaller { manager, feature, artifact_source }
    }

    /// Run one transition against `target`, driven by `flag`.
    ///
    /// Never returns an error: non-fatal sub-step failures end in the
    /// `Failed` terminal state with diagnostics in the outcome list.
    /// Fatal environment problems are the caller's to raise before this
    /// point (see [`crate::runtime::locate`]).
    pub fn apply(&self, flag: CapabilityFlag, target: &RuntimeTarget) -> InstallReport {
        let entry = if flag.is_enabled() {
            InstallState::Enabling
        } else {
            InstallState::Disabling
        };
        info!("feature transition: {:?} -> {:?}", InstallState::Unknown, entry);
        match entry {
            InstallState::Enabling => self.enable(target),
            _ => self.disable(target),
        }
    }

    fn enable(&self, target: &RuntimeTarget) -> InstallReport {
        info!("capability flag enabled, installing {}", self.feature.package_name);
        let mut outcomes = Vec::new();

        match self.manager.install(&self.feature.install_spec) {
            Ok(()) => outcomes.push(InstallOutcome {
                action: ActionKind::PackageInstall,
                succeeded: true,
                detail: format!("installed {}", self.feature.install_spec),
            }),
            Err(e) => {
                warn!("installation attempt failed: {e}");
                outcomes.push(InstallOutcome {
                    action: ActionKind::PackageInstall,
                    succeeded: false,
                    detail: e.to_string(),
                });
                // The artifact depends on the package; do not copy it.
                return InstallReport { state: InstallState::Failed, outcomes };
            }
        }

        let dest = target.artifact_dest(&self.feature.artifact_name);
        match place_artifact(&self.artifact_source, &dest) {
            Ok(()) => {
                outcomes.push(InstallOutcome {
                    action: ActionKind::ArtifactCopy,
                    succeeded: true,
                    detail: format!("placed {}", dest.display()),
                });
                info!("acceleration extension enabled at {}", dest.display());
                InstallReport { state: InstallState::Enabled, outcomes }
            }
            Err(e) => {
                // The package from the previous step stays installed: inert
                // without its artifact, and a re-run self-heals via the
                // reinstall policy.
                warn!("artifact placement failed: {e}");
                outcomes.push(InstallOutcome {
                    action: ActionKind::ArtifactCopy,
                    succeeded: false,
                    detail: e.to_string(),
                });
                InstallReport { state: InstallState::Failed, outcomes }
            }
        }
    }

    fn disable(&self, target: &RuntimeTarget) -> InstallReport {
        info!("capability flag disabled, removing {}", self.feature.package_name);
        let mut outcomes = Vec::new();

        // Uninstall diagnostics never block convergence to Disabled.
        match self.manager.uninstall(&self.feature.package_name) {
            Ok(()) => outcomes.push(InstallOutcome {
                action: ActionKind::PackageUninstall,
                succeeded: true,
                detail: format!("removed {}", self.feature.package_name),
            }),
            Err(e) => {
                warn!("uninstall reported an error, continuing: {e}");
                outcomes.push(InstallOutcome {
                    action: ActionKind::PackageUninstall,
                    succeeded: false,
                    detail: e.to_string(),
                });
            }
        }

        let dest = target.artifact_dest(&self.feature.artifact_name);
        match remove_artifact(&dest) {
            Ok(()) => {
                outcomes.push(InstallOutcome {
                    action: ActionKind::ArtifactRemove,
                    succeeded: true,
                    detail: format!("absent {}", dest.display()),
                });
                InstallReport { state: InstallState::Disabled, outcomes }
            }
            Err(e) => {
                // Artifact still present: claiming Disabled here would be
                // silent drift.
                warn!("artifact removal failed: {e}");
                outcomes.push(InstallOutcome {
                    action: ActionKind::ArtifactRemove,
                    succeeded: false,
                    detail: e.to_string(),
                });
                InstallReport { state: InstallState::Failed, outcomes }
            }
        }
    }
}

/// Copy the artifact into place, overwriting any existing copy. Creates the
/// vendor directory on demand.
fn place_artifact(source: &Path, dest: &Path) -> Result<(), ProvisionError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ProvisionError::ArtifactPlacement(format!(
                "failed to create {}: {e}",
                parent.display()
            ))
        })?;
    }
    fs::copy(source, dest).map_err(|e| {
        ProvisionError::ArtifactPlacement(format!(
            "failed to copy {} to {}: {e}",
            source.display(),
            dest.display()
        ))
    })?;
    Ok(())
}

/// Delete the artifact if present; absence is success.
fn remove_artifact(dest: &Path) -> Result<(), ProvisionError> {
    match fs::remove_file(dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProvisionError::ArtifactPlacement(format!(
            "failed to remove {}: {e}",
            dest.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Scripted package manager recording every call it receives.
    struct FakeManager {
        install_ok: bool,
        uninstall_ok: bool,
        calls: RefCell<Vec<&'static str>>,
    }

    impl FakeManager {
        fn new(install_ok: bool, uninstall_ok: bool) -> Self {
            FakeManager { install_ok, uninstall_ok, calls: RefCell::new(Vec::new()) }
        }
    }

    impl PackageManager for FakeManager {
        fn install(&self, _spec: &str) -> Result<(), ProvisionError> {
            self.calls.borrow_mut().push("install");
            if self.install_ok {
                Ok(())
            } else {
                Err(ProvisionError::DependencyInstall("pip exited with status 1".into()))
            }
        }

        fn uninstall(&self, _name: &str) -> Result<(), ProvisionError> {
            self.calls.borrow_mut().push("uninstall");
            if self.uninstall_ok {
                Ok(())
            } else {
                Err(ProvisionError::DependencyInstall("pip uninstall exited 2".into()))
            }
        }
    }

    struct Fixture {
        _site: TempDir,
        _src: TempDir,
        target: RuntimeTarget,
        feature: FeatureConfig,
        artifact_source: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let site = TempDir::new().expect("site-packages tempdir");
        let src = TempDir::new().expect("source tempdir");
        let artifact_source = src.path().join("flash_attention_bridge.py");
        std::fs::write(&artifact_source, b"# accelerated attention shim\n").expect("write src");

        let feature = FeatureConfig::default();
        let target =
            RuntimeTarget::resolve(site.path(), &feature.vendor_subdir).expect("resolve target");

        Fixture { _site: site, _src: src, target, feature, artifact_source }
    }

    fn installer<'a>(mgr: &'a FakeManager, fx: &'a Fixture) -> FeatureInstaller<'a, FakeManager> {
        FeatureInstaller::new(mgr, &fx.feature, fx.artifact_source.clone())
    }

    #[test]
    fn enable_on_clean_runtime_ends_enabled_with_artifact() {
        let fx = fixture();
        let mgr = FakeManager::new(true, true);
        let report = installer(&mgr, &fx).apply(CapabilityFlag::Enabled, &fx.target);

        assert_eq!(report.state, InstallState::Enabled);
        assert!(fx.target.artifact_dest(&fx.feature.artifact_name).is_file());
        assert!(report.outcomes.iter().all(|o| o.succeeded));
        assert_eq!(*mgr.calls.borrow(), vec!["install"]);
    }

    #[test]
    fn enable_twice_is_idempotent() {
        let fx = fixture();
        let mgr = FakeManager::new(true, true);
        let inst = installer(&mgr, &fx);

        let first = inst.apply(CapabilityFlag::Enabled, &fx.target);
        let second = inst.apply(CapabilityFlag::Enabled, &fx.target);

        assert_eq!(first.state, InstallState::Enabled);
        assert_eq!(second.state, InstallState::Enabled);
        // Exactly one artifact at the destination, overwritten not duplicated.
        let dest = fx.target.artifact_dest(&fx.feature.artifact_name);
        assert!(dest.is_file());
        let entries: Vec<_> = std::fs::read_dir(&fx.target.vendor_dir)
            .expect("read vendor dir")
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn disable_when_already_disabled_converges() {
        let fx = fixture();
        let mgr = FakeManager::new(true, true);
        let report = installer(&mgr, &fx).apply(CapabilityFlag::Disabled, &fx.target);

        assert_eq!(report.state, InstallState::Disabled);
        assert!(!fx.target.artifact_dest(&fx.feature.artifact_name).exists());
        assert_eq!(*mgr.calls.borrow(), vec!["uninstall"]);
    }

    #[test]
    fn enable_then_disable_leaves_no_artifact() {
        let fx = fixture();
        let mgr = FakeManager::new(true, true);
        let inst = installer(&mgr, &fx);

        assert_eq!(inst.apply(CapabilityFlag::Enabled, &fx.target).state, InstallState::Enabled);
        assert_eq!(inst.apply(CapabilityFlag::Disabled, &fx.target).state, InstallState::Disabled);
        assert!(!fx.target.artifact_dest(&fx.feature.artifact_name).exists());
    }

    #[test]
    fn failed_install_skips_artifact_copy() {
        let fx = fixture();
        let mgr = FakeManager::new(false, true);
        let report = installer(&mgr, &fx).apply(CapabilityFlag::Enabled, &fx.target);

        assert_eq!(report.state, InstallState::Failed);
        assert!(!fx.target.artifact_dest(&fx.feature.artifact_name).exists());
        assert_eq!(report.outcomes.len(), 1);
        assert!(!report.outcomes[0].succeeded);
        assert_eq!(report.outcomes[0].action, ActionKind::PackageInstall);
    }

    #[test]
    fn copy_failure_leaves_package_installed_and_reports_failed() {
        let mut fx = fixture();
        // Point the artifact source at a missing file to make the copy fail.
        fx.artifact_source = fx.artifact_source.with_file_name("missing.py");
        let mgr = FakeManager::new(true, true);
        let report = installer(&mgr, &fx).apply(CapabilityFlag::Enabled, &fx.target);

        assert_eq!(report.state, InstallState::Failed);
        assert_eq!(*mgr.calls.borrow(), vec!["install"]);
        let copy = report.outcomes.iter().find(|o| o.action == ActionKind::ArtifactCopy);
        assert!(copy.is_some_and(|o| !o.succeeded));
        // Install outcome is still recorded as succeeded: no rollback.
        let install = report.outcomes.iter().find(|o| o.action == ActionKind::PackageInstall);
        assert!(install.is_some_and(|o| o.succeeded));
    }

    #[test]
    fn disable_with_stale_artifact_removes_it() {
        let fx = fixture();
        let dest = fx.target.artifact_dest(&fx.feature.artifact_name);
        std::fs::create_dir_all(dest.parent().expect("parent")).expect("mkdir");
        std::fs::write(&dest, b"stale").expect("write stale artifact");

        let mgr = FakeManager::new(true, true);
        let report = installer(&mgr, &fx).apply(CapabilityFlag::Disabled, &fx.target);

        assert_eq!(report.state, InstallState::Disabled);
        assert!(!dest.exists());
    }

    #[test]
    fn uninstall_error_still_converges_to_disabled() {
        let fx = fixture();
        let mgr = FakeManager::new(true, false);
        let report = installer(&mgr, &fx).apply(CapabilityFlag::Disabled, &fx.target);

        assert_eq!(report.state, InstallState::Disabled);
        let uninstall =
            report.outcomes.iter().find(|o| o.action == ActionKind::PackageUninstall);
        assert!(uninstall.is_some_and(|o| !o.succeeded));
    }

    #[test]
    fn unset_flag_takes_the_disable_path() {
        let fx = fixture();
        let mgr = FakeManager::new(true, true);
        let report = installer(&mgr, &fx).apply(CapabilityFlag::Unset, &fx.target);
        assert_eq!(report.state, InstallState::Disabled);
        assert_eq!(*mgr.calls.borrow(), vec!["uninstall"]);
    }
}
