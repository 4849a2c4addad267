//! horde-provision library
//!
//! Provisions GPU-accelerated worker node images. The crate splits into a
//! feature-gated installer for the optional acceleration extension
//! (capability detection, runtime location, the install/uninstall state
//! machine) and a multi-stage build pipeline that assembles the runtime
//! image and invokes the installer as a late conditional step.

pub mod capability;
pub mod config;
pub mod error;
pub mod installer;
pub mod pip_cache;
pub mod pipeline;
pub mod report;
pub mod runtime;

pub use capability::{detect, CapabilityFlag};
pub use config::ProvisionConfig;
pub use error::ProvisionError;
pub use installer::{FeatureInstaller, InstallReport, InstallState, PackageManager};
pub use pipeline::BuildPipeline;
pub use runtime::{locate, RuntimeTarget};
