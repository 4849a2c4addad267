//! Runtime target resolution
//!
//! Asks the active Python interpreter where it installs packages
//! (`sysconfig`'s `purelib` path) and validates that the directory is a
//! usable destination for the extension artifact. Resolution failure is
//! fatal to the provisioning stage: nothing downstream is meaningful
//! without a destination.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use crate::error::ProvisionError;

/// One-liner handed to the interpreter to report its package directory.
const PURELIB_QUERY: &str = "import sysconfig; print(sysconfig.get_paths()['purelib'])";

/// Resolved destination for the conditionally-installed extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeTarget {
    /// The interpreter's package-install directory (site-packages).
    pub site_packages: PathBuf,
    /// Directory under site-packages where the extension artifact lives.
    pub vendor_dir: PathBuf,
}

impl RuntimeTarget {
    /// Build a target from an already-known package directory.
    ///
    /// Validates that the package directory exists, is a directory, and is
    /// not read-only. The vendor subdirectory itself may be absent; it is
    /// created on demand during installation.
    pub fn resolve(site_packages: &Path, vendor_subdir: &str) -> Result<Self, ProvisionError> {
        let meta = fs::metadata(site_packages).map_err(|e| {
            ProvisionError::EnvironmentResolution(format!(
                "package directory {} is not accessible: {e}",
                site_packages.display()
            ))
        })?;
        if !meta.is_dir() {
            return Err(ProvisionError::EnvironmentResolution(format!(
                "package path {} is not a directory",
                site_packages.display()
            )));
        }
        if meta.permissions().readonly() {
            return Err(ProvisionError::EnvironmentResolution(format!(
                "package directory {} is not writable",
                site_packages.display()
            )));
        }
        Ok(RuntimeTarget {
            vendor_dir: site_packages.join(vendor_subdir),
            site_packages: site_packages.to_path_buf(),
        })
    }

    /// Destination path for the named extension artifact.
    pub fn artifact_dest(&self, artifact_name: &str) -> PathBuf {
        self.vendor_dir.join(artifact_name)
    }
}

/// Resolve the package-install directory of `python` by running its
/// `sysconfig` query, then validate it as a [`RuntimeTarget`].
pub fn locate(python: &Path, vendor_subdir: &str) -> Result<RuntimeTarget, ProvisionError> {
    let output = Command::new(python)
        .args(["-s", "-c", PURELIB_QUERY])
        .output()
        .map_err(|e| {
            ProvisionError::EnvironmentResolution(format!(
                "failed to invoke interpreter {}: {e}",
                python.display()
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProvisionError::EnvironmentResolution(format!(
            "interpreter {} could not report its package directory: {}",
            python.display(),
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let purelib = stdout.trim();
    if purelib.is_empty() {
        return Err(ProvisionError::EnvironmentResolution(format!(
            "interpreter {} reported an empty package directory",
            python.display()
        )));
    }

    debug!("resolved purelib for {}: {purelib}", python.display());
    RuntimeTarget::resolve(Path::new(purelib), vendor_subdir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn resolve_accepts_writable_directory() {
        let dir = TempDir::new().expect("tempdir");
        let target = RuntimeTarget::resolve(dir.path(), "hordelib").expect("resolve");
        assert_eq!(target.site_packages, dir.path());
        assert_eq!(target.vendor_dir, dir.path().join("hordelib"));
        assert_eq!(
            target.artifact_dest("attention.py"),
            dir.path().join("hordelib").join("attention.py")
        );
    }

    #[test]
    fn resolve_rejects_missing_directory() {
        let dir = TempDir::new().expect("tempdir");
        let missing = dir.path().join("no-such-purelib");
        let err = RuntimeTarget::resolve(&missing, "hordelib").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn resolve_rejects_file_as_package_dir() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("site-packages");
        std::fs::write(&file, b"not a dir").expect("write");
        let err = RuntimeTarget::resolve(&file, "hordelib").unwrap_err();
        assert!(matches!(err, ProvisionError::EnvironmentResolution(_)));
    }

    #[test]
    fn locate_fails_for_missing_interpreter() {
        let err = locate(Path::new("/no/such/python3"), "hordelib").unwrap_err();
        assert!(err.is_fatal());
    }
}
