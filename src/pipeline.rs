//! Multi-stage image build pipeline
//!
//! Strictly ordered stages that assemble the worker runtime image:
//! fetch the worker source tree, provision an isolated interpreter,
//! install pinned dependencies against the configured accelerator toolkit,
//! run the feature-gated acceleration installer, then write the build
//! manifest. A stage's fatal error aborts the build; the acceleration
//! installer's `Failed` terminal state does not.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde::Serialize;

use crate::capability;
use crate::config::ProvisionConfig;
use crate::installer::{FeatureInstaller, InstallReport, PipPackageManager};
use crate::pip_cache::CacheLock;
use crate::runtime;

/// Name of the manifest written into the runtime by final assembly.
pub const MANIFEST_NAME: &str = "provision-manifest.toml";

/// Metadata record describing what a finished build contains.
#[derive(Debug, Serialize)]
pub struct BuildManifest {
    pub repo: String,
    pub branch: String,
    pub python_version: String,
    pub cuda_version: String,
    pub acceleration_state: String,
    pub artifact_present: bool,
}

/// What `BuildPipeline::run` hands back to the caller.
pub struct BuildSummary {
    pub runtime_python: PathBuf,
    pub manifest_path: PathBuf,
    pub feature: InstallReport,
}

/// Sequencing shell over the build stages. Holds no state of its own.
pub struct BuildPipeline<'a> {
    cfg: &'a ProvisionConfig,
}

impl<'a> BuildPipeline<'a> {
    pub fn new(cfg: &'a ProvisionConfig) -> Self {
        BuildPipeline { cfg }
    }

    /// Directory the worker source tree is checked out into.
    pub fn checkout_dir(&self) -> PathBuf {
        self.cfg.pipeline.workdir.join(&self.cfg.pipeline.repo_name)
    }

    /// Interpreter of the provisioned runtime environment.
    pub fn venv_python(&self) -> PathBuf {
        let venv = self.cfg.pipeline.workdir.join("runtime");
        if cfg!(windows) {
            venv.join("Scripts").join("python.exe")
        } else {
            venv.join("bin").join("python")
        }
    }

    /// Execute all stages in order.
    pub fn run(&self) -> Result<BuildSummary> {
        let checkout = self.checkout_dir();
        self.fetch_source(&checkout)?;
        let python = self.provision_runtime()?;
        self.install_dependencies(&python, &checkout)?;
        let (feature, artifact_present) = self.acceleration_feature(&python, &checkout)?;
        let manifest_path = self.final_assembly(&feature, artifact_present)?;
        Ok(BuildSummary { runtime_python: python, manifest_path, feature })
    }

    /// Stage 1: clone or update the worker source tree.
    fn fetch_source(&self, checkout: &Path) -> Result<()> {
        let p = &self.cfg.pipeline;
        fs::create_dir_all(&p.workdir)
            .with_context(|| format!("failed to create workdir {}", p.workdir.display()))?;

        if checkout.join(".git").exists() {
            run_step(
                &format!("updating {} to origin/{}", checkout.display(), p.branch),
                Command::new("git")
                    .arg("-C")
                    .arg(checkout)
                    .args(["fetch", "--depth", "1", "origin", &p.branch]),
            )?;
            run_step(
                "resetting checkout to fetched branch head",
                Command::new("git")
                    .arg("-C")
                    .arg(checkout)
                    .args(["reset", "--hard", &format!("origin/{}", p.branch)]),
            )
        } else {
            run_step(
                &format!("cloning {} (branch {})", p.repo_url(), p.branch),
                Command::new("git")
                    .args(["clone", "--depth", "1", "--branch", &p.branch])
                    .arg(p.repo_url())
                    .arg(checkout),
            )
        }
    }

    /// Stage 2: provision the isolated interpreter environment.
    fn provision_runtime(&self) -> Result<PathBuf> {
        let python = self.venv_python();
        if python.exists() {
            info!("runtime environment already provisioned at {}", python.display());
            return Ok(python);
        }

        let p = &self.cfg.pipeline;
        let versioned = format!("python{}", p.python_version);
        let base = which::which(&versioned)
            .or_else(|_| which::which("python3"))
            .with_context(|| format!("no {versioned} or python3 interpreter on PATH"))?;

        let venv_dir = p.workdir.join("runtime");
        run_step(
            &format!("creating runtime environment at {}", venv_dir.display()),
            Command::new(&base).args(["-m", "venv"]).arg(&venv_dir),
        )?;
        Ok(python)
    }

    /// Stage 3: install pinned dependencies against the accelerator wheel
    /// index, holding the shared pip cache lock while pip runs.
    fn install_dependencies(&self, python: &Path, checkout: &Path) -> Result<()> {
        let p = &self.cfg.pipeline;
        let requirements = checkout.join(&p.requirements_file);
        if !requirements.is_file() {
            bail!("pinned requirements file not found: {}", requirements.display());
        }

        let mut cmd = Command::new(python);
        cmd.args(["-s", "-m", "pip", "install", "-r"])
            .arg(&requirements)
            .args(["--extra-index-url", &p.wheel_index_url()]);

        // Held for the duration of the pip invocation.
        let _cache_lock = if p.pip_cache {
            let cache_dir = p.effective_cache_dir();
            cmd.env("PIP_CACHE_DIR", &cache_dir);
            Some(CacheLock::acquire(&cache_dir)?)
        } else {
            cmd.arg("--no-cache-dir");
            None
        };

        run_step(
            &format!("installing pinned dependencies for cu{}", p.cuda_version),
            &mut cmd,
        )
    }

    /// Stage 4: feature-gated acceleration extension.
    ///
    /// Only runtime resolution failures propagate. A `Failed` install
    /// report is logged and carried into the manifest; the image is still
    /// produced with the extension effectively disabled.
    fn acceleration_feature(
        &self,
        python: &Path,
        checkout: &Path,
    ) -> Result<(InstallReport, bool)> {
        let feature = &self.cfg.feature;
        let flag = capability::detect(&feature.flag_var);
        info!("capability flag {} = {:?}", feature.flag_var, flag);

        let target = runtime::locate(python, &feature.vendor_subdir)
            .context("cannot resolve runtime package directory for the acceleration feature")?;

        let manager = PipPackageManager::new(python.to_path_buf());
        let artifact_source = checkout.join(&feature.artifact_source);
        let installer = FeatureInstaller::new(&manager, feature, artifact_source);
        let report = installer.apply(flag, &target);

        for outcome in &report.outcomes {
            if outcome.succeeded {
                info!("{:?}: {}", outcome.action, outcome.detail);
            } else {
                warn!("{:?} failed: {}", outcome.action, outcome.detail);
            }
        }
        if report.is_failed() {
            warn!("acceleration extension not installed; image proceeds without it");
        }

        let artifact_present = target.artifact_dest(&feature.artifact_name).is_file();
        Ok((report, artifact_present))
    }

    /// Stage 5: write the build manifest into the runtime environment.
    fn final_assembly(&self, feature: &InstallReport, artifact_present: bool) -> Result<PathBuf> {
        let p = &self.cfg.pipeline;
        let manifest = BuildManifest {
            repo: format!("{}/{}", p.repo_owner, p.repo_name),
            branch: p.branch.clone(),
            python_version: p.python_version.clone(),
            cuda_version: p.cuda_version.clone(),
            acceleration_state: feature.state.as_str().to_string(),
            artifact_present,
        };

        let manifest_path = p.workdir.join("runtime").join(MANIFEST_NAME);
        let toml =
            toml::to_string_pretty(&manifest).context("failed to serialize build manifest")?;
        fs::write(&manifest_path, toml)
            .with_context(|| format!("failed to write {}", manifest_path.display()))?;
        info!("build manifest written to {}", manifest_path.display());
        Ok(manifest_path)
    }
}

/// Run one external build step, surfacing stderr on failure.
fn run_step(desc: &str, cmd: &mut Command) -> Result<()> {
    info!("{desc}");
    let output = cmd.output().with_context(|| format!("failed to spawn step: {desc}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("step '{desc}' exited with {}: {}", output.status, stderr.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(workdir: &Path) -> ProvisionConfig {
        let mut cfg = ProvisionConfig::default();
        cfg.pipeline.workdir = workdir.to_path_buf();
        cfg
    }

    #[test]
    fn checkout_and_venv_paths_derive_from_workdir() {
        let cfg = config_in(Path::new("/tmp/build"));
        let pipeline = BuildPipeline::new(&cfg);
        assert_eq!(
            pipeline.checkout_dir(),
            Path::new("/tmp/build").join("horde-worker-reGen")
        );
        assert!(pipeline.venv_python().starts_with("/tmp/build/runtime"));
    }

    #[test]
    fn missing_requirements_file_is_fatal() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let cfg = config_in(dir.path());
        let pipeline = BuildPipeline::new(&cfg);
        let checkout = dir.path().join("checkout");
        std::fs::create_dir_all(&checkout).expect("mkdir");

        let err = pipeline
            .install_dependencies(Path::new("/no/such/python"), &checkout)
            .unwrap_err();
        assert!(err.to_string().contains("requirements"));
    }

    #[test]
    fn manifest_serializes_to_toml() {
        let manifest = BuildManifest {
            repo: "Haidra-Org/horde-worker-reGen".to_string(),
            branch: "main".to_string(),
            python_version: "3.11".to_string(),
            cuda_version: "12.4".to_string(),
            acceleration_state: "enabled".to_string(),
            artifact_present: true,
        };
        let toml = toml::to_string_pretty(&manifest).expect("serialize");
        assert!(toml.contains("acceleration_state = \"enabled\""));
        assert!(toml.contains("artifact_present = true"));
    }
}
