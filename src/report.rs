//! Status reporting and pinned-dependency verification
//!
//! Read-only conveniences layered over the core: `status` answers "what
//! state is this runtime in right now", and `verify_pins` cross-checks the
//! worker's pinned requirements files the way the worker's own release
//! checks do (all variant files must agree on every pin except the
//! accelerator framework itself, which legitimately differs per backend).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::warn;

use crate::capability::{self, CapabilityFlag};
use crate::config::ProvisionConfig;
use crate::runtime::{self, RuntimeTarget};

/// Dependency whose pin is allowed to differ between backend variants.
const BACKEND_SPECIFIC_DEP: &str = "torch";

/// Snapshot of the feature state on a live runtime.
#[derive(Debug)]
pub struct StatusReport {
    pub flag: CapabilityFlag,
    pub target: Option<RuntimeTarget>,
    pub artifact_present: bool,
    pub resolution_error: Option<String>,
}

/// Inspect the current runtime without mutating anything.
///
/// An unresolvable runtime is reported, not raised: status is diagnostics,
/// not provisioning.
pub fn status(cfg: &ProvisionConfig, python: &Path) -> StatusReport {
    let flag = capability::detect(&cfg.feature.flag_var);
    match runtime::locate(python, &cfg.feature.vendor_subdir) {
        Ok(target) => {
            let artifact_present = target.artifact_dest(&cfg.feature.artifact_name).is_file();
            StatusReport { flag, target: Some(target), artifact_present, resolution_error: None }
        }
        Err(e) => {
            warn!("runtime not resolvable for status: {e}");
            StatusReport {
                flag,
                target: None,
                artifact_present: false,
                resolution_error: Some(e.to_string()),
            }
        }
    }
}

/// Parse a pinned requirements file into name -> version.
///
/// Only exact-style pins (`==`, `~=`) are collected; comments, blank
/// lines, pip options and source-control specifiers carry no version pin
/// to compare.
pub fn parse_requirements(text: &str) -> BTreeMap<String, String> {
    let mut pins = BTreeMap::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() || line.starts_with('-') || line.contains("git+") {
            continue;
        }
        // Environment markers carry their own `==` comparisons; only the
        // requirement part before `;` can hold a version pin.
        let spec = line.split(';').next().unwrap_or(line).trim();
        let Some(idx) = spec.find("==").or_else(|| spec.find("~=")) else {
            continue;
        };
        let name = spec[..idx].trim();
        let name = name.split('[').next().unwrap_or(name).trim();
        let version = spec[idx + 2..].trim();
        if !name.is_empty() && !version.is_empty() {
            pins.insert(name.to_ascii_lowercase(), version.to_string());
        }
    }
    pins
}

/// Compare two requirement pin sets, both directions, skipping the
/// backend-specific framework pin. Returns human-readable mismatches.
pub fn compare_pins(
    main: &BTreeMap<String, String>,
    other: &BTreeMap<String, String>,
    other_name: &str,
) -> Vec<String> {
    let mut problems = Vec::new();
    for (dep, version) in main {
        if dep == BACKEND_SPECIFIC_DEP {
            continue;
        }
        match other.get(dep) {
            None => problems.push(format!("{dep} missing from {other_name}")),
            Some(v) if v != version => problems.push(format!(
                "{dep} pinned to {version} in main but {v} in {other_name}"
            )),
            Some(_) => {}
        }
    }
    for dep in other.keys() {
        if dep != BACKEND_SPECIFIC_DEP && !main.contains_key(dep) {
            problems.push(format!("{dep} present in {other_name} but not in main"));
        }
    }
    problems
}

/// Verify pin consistency across the requirements files of a source
/// checkout. The main file must pin the accelerator framework; every
/// variant file present must agree with the main file on all other pins.
pub fn verify_pins(cfg: &ProvisionConfig, checkout: &Path) -> Result<Vec<String>> {
    let main_path = checkout.join(&cfg.pipeline.requirements_file);
    let main_text = fs::read_to_string(&main_path)
        .with_context(|| format!("failed to read {}", main_path.display()))?;
    let main = parse_requirements(&main_text);

    if !main.contains_key(BACKEND_SPECIFIC_DEP) {
        bail!(
            "{} has no {BACKEND_SPECIFIC_DEP} pin; cannot target cu{}",
            main_path.display(),
            cfg.pipeline.cuda_version
        );
    }

    let mut problems = Vec::new();
    for variant in ["requirements.rocm.txt", "requirements.directml.txt"] {
        let path = checkout.join(variant);
        if !path.is_file() {
            continue;
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        problems.extend(compare_pins(&main, &parse_requirements(&text), variant));
    }
    Ok(problems)
}
