mod cli;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::error;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use horde_provision::config::ProvisionConfig;
use horde_provision::installer::{FeatureInstaller, PipPackageManager};
use horde_provision::pipeline::BuildPipeline;
use horde_provision::{capability, report, runtime};

fn main() {
    // Build logs interleave with git/pip output; timestamps keep them sortable.
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .init();

    if let Err(e) = real_main() {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let args = cli::Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => ProvisionConfig::default_path()?,
    };
    let cfg = ProvisionConfig::load_or_create(&config_path)?;

    match args.sub.unwrap_or(cli::Cmd::Build { no_pip_cache: false }) {
        cli::Cmd::Build { no_pip_cache } => handle_build(cfg, no_pip_cache),
        cli::Cmd::Feature { python } => handle_feature(&cfg, python),
        cli::Cmd::Status { python } => handle_status(&cfg, python),
        cli::Cmd::Verify { checkout } => handle_verify(&cfg, checkout),
    }
}

/// Run the full image build pipeline.
fn handle_build(mut cfg: ProvisionConfig, no_pip_cache: bool) -> Result<()> {
    if no_pip_cache {
        cfg.pipeline.pip_cache = false;
    }

    let pipeline = BuildPipeline::new(&cfg);
    let summary = pipeline.run()?;

    let mut stdout = StandardStream::stdout(ColorChoice::Always);
    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)).set_bold(true));
    let _ = writeln!(stdout, "\n✅ Worker image build complete");
    let _ = stdout.reset();
    let _ = writeln!(stdout, "   Runtime: {}", summary.runtime_python.display());
    let _ = writeln!(stdout, "   Manifest: {}", summary.manifest_path.display());

    if summary.feature.is_failed() {
        let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)));
        let _ = writeln!(
            stdout,
            "   ⚠ Acceleration extension failed to install; image runs without it"
        );
        let _ = stdout.reset();
    } else {
        let _ = writeln!(stdout, "   Acceleration: {}", summary.feature.state.as_str());
    }

    Ok(())
}

/// Apply the feature transition to an existing runtime.
///
/// Sub-step failures end in the `Failed` state but never in a process
/// error: the extension is optional and the runtime stays deployable.
fn handle_feature(cfg: &ProvisionConfig, python: Option<PathBuf>) -> Result<()> {
    let python = resolve_python(python)?;
    let flag = capability::detect(&cfg.feature.flag_var);
    let target = runtime::locate(&python, &cfg.feature.vendor_subdir)
        .context("cannot resolve runtime package directory")?;

    let manager = PipPackageManager::new(python);
    let artifact_source = cfg
        .pipeline
        .workdir
        .join(&cfg.pipeline.repo_name)
        .join(&cfg.feature.artifact_source);
    let installer = FeatureInstaller::new(&manager, &cfg.feature, artifact_source);
    let report = installer.apply(flag, &target);

    let mut stdout = StandardStream::stdout(ColorChoice::Always);
    for outcome in &report.outcomes {
        let (color, mark) = if outcome.succeeded {
            (Color::Green, "✓")
        } else {
            (Color::Yellow, "⚠")
        };
        let _ = stdout.set_color(ColorSpec::new().set_fg(Some(color)));
        let _ = writeln!(stdout, "{mark} {:?}: {}", outcome.action, outcome.detail);
        let _ = stdout.reset();
    }
    let _ = writeln!(stdout, "feature state: {}", report.state.as_str());

    Ok(())
}

/// Report the current feature state without mutating anything.
fn handle_status(cfg: &ProvisionConfig, python: Option<PathBuf>) -> Result<()> {
    let python = resolve_python(python)?;
    let status = report::status(cfg, &python);

    println!("capability flag ({}): {:?}", cfg.feature.flag_var, status.flag);
    match &status.target {
        Some(target) => println!("runtime target: {}", target.site_packages.display()),
        None => println!(
            "runtime target: unresolved ({})",
            status.resolution_error.as_deref().unwrap_or("unknown")
        ),
    }
    println!(
        "extension artifact: {}",
        if status.artifact_present { "present" } else { "absent" }
    );

    // Script-friendly: 0 = artifact present, 1 = absent.
    std::process::exit(if status.artifact_present { 0 } else { 1 });
}

/// Cross-check the pinned requirements files of a source checkout.
fn handle_verify(cfg: &ProvisionConfig, checkout: Option<PathBuf>) -> Result<()> {
    let checkout =
        checkout.unwrap_or_else(|| cfg.pipeline.workdir.join(&cfg.pipeline.repo_name));
    let problems = report::verify_pins(cfg, &checkout)?;

    let mut stdout = StandardStream::stdout(ColorChoice::Always);
    if problems.is_empty() {
        let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)));
        let _ = writeln!(stdout, "✓ pinned dependencies are consistent");
        let _ = stdout.reset();
        return Ok(());
    }

    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
    for problem in &problems {
        let _ = writeln!(stdout, "✗ {problem}");
    }
    let _ = stdout.reset();
    anyhow::bail!("{} pin mismatch(es) found", problems.len())
}

fn resolve_python(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => which::which("python3").context("no python3 interpreter on PATH"),
    }
}
