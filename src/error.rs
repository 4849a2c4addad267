//! Error taxonomy for the provisioner
//!
//! Only environment resolution is fatal to a pipeline stage. Dependency and
//! artifact errors are absorbed into per-step outcomes and surfaced as
//! diagnostics: the acceleration extension is an optimization, and the image
//! must still be producible without it.

use thiserror::Error;

/// Errors raised while provisioning the worker runtime.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The active runtime's package directory could not be resolved.
    /// Fatal: no further action is meaningful without a destination.
    #[error("failed to resolve runtime environment: {0}")]
    EnvironmentResolution(String),

    /// A package-manager install/uninstall step failed. Non-fatal.
    #[error("dependency install step failed: {0}")]
    DependencyInstall(String),

    /// Copying or deleting the extension artifact failed. Non-fatal.
    #[error("artifact placement step failed: {0}")]
    ArtifactPlacement(String),
}

impl ProvisionError {
    /// Whether this error must abort the enclosing pipeline stage.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProvisionError::EnvironmentResolution(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_resolution_errors_are_fatal() {
        assert!(ProvisionError::EnvironmentResolution("no purelib".into()).is_fatal());
        assert!(!ProvisionError::DependencyInstall("pip exited 1".into()).is_fatal());
        assert!(!ProvisionError::ArtifactPlacement("copy failed".into()).is_fatal());
    }
}
