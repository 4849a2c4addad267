use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "GPU worker node image provisioner")]
pub struct Args {
    /// Path to configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Sub-commands (build, feature, etc.)
    #[command(subcommand)]
    pub sub: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Run the full image build pipeline (default if no sub-command)
    Build {
        /// Disable the shared pip cache for this build
        #[arg(long)]
        no_pip_cache: bool,
    },
    /// Apply the feature-gated acceleration transition to a runtime
    Feature {
        /// Interpreter whose environment is mutated (defaults to python3 on PATH)
        #[arg(long)]
        python: Option<PathBuf>,
    },
    /// Report capability flag, runtime target and artifact presence
    Status {
        /// Interpreter to inspect (defaults to python3 on PATH)
        #[arg(long)]
        python: Option<PathBuf>,
    },
    /// Check pinned-dependency consistency in a source checkout
    Verify {
        /// Source checkout to verify (defaults to the pipeline checkout)
        #[arg(long)]
        checkout: Option<PathBuf>,
    },
}
