//! pcapost - per-class posterior compression tools.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    AccumulateCountsCommand, ApplyClassTransformCommand, CollectClassSamplesCommand,
    EstimateClassPcaCommand, SparsifyPosteriorsCommand,
};

/// pcapost - per-class posterior compression tools.
///
/// Typical pipeline:
///   - collect-class-samples: gather classifier outputs aligned to one class
///   - estimate-class-pca: estimate per-class bases, means and energy tables
///   - apply-class-transform: compress and reconstruct posteriors per frame
///   - sparsify-posteriors: truncate dense posteriors to sparse form
///   - accumulate-counts: sum sparse posterior mass into smoothed class priors
///
/// Records are JSON lines of the form {"key": ..., "value": ...}.
#[derive(Parser)]
#[command(name = "pcapost")]
#[command(about = "Per-class posterior compression tools")]
#[command(version)]
pub struct Cli {
    /// Options file (YAML or JSON); replaces the command's option flags
    #[arg(short = 'f', long = "file", global = true)]
    pub input: Option<String>,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Accumulate smoothed class counts from sparse posteriors
    AccumulateCounts(AccumulateCountsCommand),
    /// Collect classifier output frames aligned to one class
    CollectClassSamples(CollectClassSamplesCommand),
    /// Estimate per-class PCA transforms from samples
    EstimateClassPca(EstimateClassPcaCommand),
    /// Compress and reconstruct posteriors through their class transform
    ApplyClassTransform(ApplyClassTransformCommand),
    /// Convert dense posteriors to truncated sparse posteriors
    SparsifyPosteriors(SparsifyPosteriorsCommand),
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Commands::AccumulateCounts(cmd) => cmd.run(&cli),
        Commands::CollectClassSamples(cmd) => cmd.run(&cli),
        Commands::EstimateClassPca(cmd) => cmd.run(&cli),
        Commands::ApplyClassTransform(cmd) => cmd.run(&cli),
        Commands::SparsifyPosteriors(cmd) => cmd.run(&cli),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
