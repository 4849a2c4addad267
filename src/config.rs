//! Provisioner configuration
//!
//! TOML-backed settings for the feature installer and the build pipeline.
//! Every field has a sensible default so a missing config file is not an
//! error; `load_or_create` writes the defaults out on first run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Top-level provisioner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionConfig {
    #[serde(default)]
    pub feature: FeatureConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Settings for the feature-gated acceleration extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Environment variable carrying the capability flag.
    pub flag_var: String,
    /// Distribution name used for `pip uninstall`.
    pub package_name: String,
    /// Source-control install specifier used for `pip install`.
    pub install_spec: String,
    /// Subdirectory of site-packages that holds the extension artifact.
    pub vendor_subdir: String,
    /// File name of the extension artifact at its destination.
    pub artifact_name: String,
    /// Artifact source path, relative to the worker source checkout.
    pub artifact_source: PathBuf,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            flag_var: crate::capability::DEFAULT_FLAG_VAR.to_string(),
            package_name: "flash-attn".to_string(),
            install_spec: "git+https://github.com/Dao-AILab/flash-attention.git".to_string(),
            vendor_subdir: "hordelib".to_string(),
            artifact_name: "flash_attention_bridge.py".to_string(),
            artifact_source: PathBuf::from("extras/flash_attention_bridge.py"),
        }
    }
}

/// Settings for the multi-stage image build pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// GitHub owner of the worker source repository.
    pub repo_owner: String,
    /// Worker source repository name.
    pub repo_name: String,
    /// Branch to check out.
    pub branch: String,
    /// Interpreter version for the isolated runtime, e.g. "3.11".
    pub python_version: String,
    /// Accelerator toolkit version, e.g. "12.4". Selects the wheel index.
    pub cuda_version: String,
    /// Pinned requirements file within the source checkout.
    pub requirements_file: PathBuf,
    /// Working directory for checkouts and the runtime environment.
    pub workdir: PathBuf,
    /// Whether to use a shared pip cache across builds.
    pub pip_cache: bool,
    /// Shared pip cache directory; defaults under the user cache dir.
    pub pip_cache_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            repo_owner: "Haidra-Org".to_string(),
            repo_name: "horde-worker-reGen".to_string(),
            branch: "main".to_string(),
            python_version: "3.11".to_string(),
            cuda_version: "12.4".to_string(),
            requirements_file: PathBuf::from("requirements.txt"),
            workdir: PathBuf::from("/worker"),
            pip_cache: true,
            pip_cache_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Clone URL of the worker source repository.
    pub fn repo_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.repo_owner, self.repo_name)
    }

    /// Wheel index for the configured accelerator toolkit, in the
    /// `cuXYZ` form the upstream wheel index uses ("12.4" -> "cu124").
    pub fn wheel_index_url(&self) -> String {
        let tag: String = self.cuda_version.chars().filter(|c| c.is_ascii_digit()).collect();
        format!("https://download.pytorch.org/whl/cu{tag}")
    }

    /// Effective pip cache directory.
    pub fn effective_cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.pip_cache_dir {
            return dir.clone();
        }
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("horde-provision")
            .join("pip")
    }
}

impl ProvisionConfig {
    /// Default on-disk location of the config file.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
        Ok(dir.join("horde-provision").join("provision.toml"))
    }

    /// Load the config from `path`, writing defaults there first if the
    /// file does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("config not found at {}, creating defaults", path.display());
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("failed to create config directory")?;
            }
            let default_toml = toml::to_string_pretty(&ProvisionConfig::default())
                .context("failed to serialize default config")?;
            fs::write(path, default_toml).context("failed to write config file")?;
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let cfg: ProvisionConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }
}
