//! pip-backed implementation of the package-manager surface
//!
//! Invokes the runtime's own interpreter (`python -s -m pip ...`) so the
//! install lands in the same environment the locator resolved. Install uses
//! an upgrade + force-reinstall policy so repeated runs converge instead of
//! no-opping on a stale partial install.

use std::path::PathBuf;
use std::process::Command;

use log::{debug, info};

use super::PackageManager;
use crate::error::ProvisionError;

/// Drives pip through a specific interpreter.
pub struct PipPackageManager {
    python: PathBuf,
}

impl PipPackageManager {
    pub fn new(python: PathBuf) -> Self {
        PipPackageManager { python }
    }

    fn run_pip(&self, args: &[&str]) -> Result<std::process::Output, ProvisionError> {
        debug!("running {} -s -m pip {}", self.python.display(), args.join(" "));
        Command::new(&self.python)
            .args(["-s", "-m", "pip"])
            .args(args)
            .output()
            .map_err(|e| {
                ProvisionError::DependencyInstall(format!(
                    "failed to invoke pip via {}: {e}",
                    self.python.display()
                ))
            })
    }
}

impl PackageManager for PipPackageManager {
    fn install(&self, spec: &str) -> Result<(), ProvisionError> {
        info!("pip install -U --force-reinstall {spec}");
        let output = self.run_pip(&["install", "-U", "--force-reinstall", spec])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisionError::DependencyInstall(format!(
                "pip install {spec} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn uninstall(&self, name: &str) -> Result<(), ProvisionError> {
        info!("pip uninstall -y {name}");
        let output = self.run_pip(&["uninstall", "-y", name])?;
        if output.status.success() {
            return Ok(());
        }

        // pip reports a missing distribution as a warning; either stream
        // may carry it depending on the pip version. Not being installed
        // is exactly the state we want.
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stderr.contains("not installed") || stdout.contains("not installed") {
            debug!("{name} was not installed, treating uninstall as success");
            return Ok(());
        }

        Err(ProvisionError::DependencyInstall(format!(
            "pip uninstall {name} exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }
}
