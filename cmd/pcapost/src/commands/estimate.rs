//! estimate-class-pca: per-class bases, means and energy tables.

use clap::Args;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::info;

use pcapost_posterior::{
    estimate_transform, floor_log_in_place, parse_class_id, EstimateOptions, FrameMatrix,
    RunSummary, StatsAccumulator,
};
use pcapost_records::{JsonLinesReader, JsonLinesWriter, RecordWriter};

use super::{for_each_record, resolve_options};
use crate::Cli;

/// Estimate per-class PCA transforms.
///
/// With --class-id every input record feeds that one class. Without it each
/// record key must be a class id. Writes three JSON-lines files keyed by
/// class id: bases, means and energy tables.
#[derive(Args)]
pub struct EstimateClassPcaCommand {
    /// Samples (JSON lines of matrices, or vectors with --read-vectors)
    samples: String,
    /// Output bases
    bases: String,
    /// Output means
    means: String,
    /// Output energy tables
    energy: String,

    #[command(flatten)]
    options: EstimateFlags,
}

#[derive(Args, Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct EstimateFlags {
    /// Class id for all input records
    #[arg(long)]
    class_id: Option<usize>,
    /// Input records are single vectors instead of matrices
    #[arg(long)]
    read_vectors: bool,
    /// Floored log of the input before accumulation
    #[arg(long)]
    apply_log: bool,
    /// Maximum number of stored components (default: full dimension)
    #[arg(long)]
    dim: Option<usize>,
    /// Scale each component's code to unit variance
    #[arg(long)]
    normalize_variance: bool,
    /// Store the offset that centers the code
    #[arg(long)]
    normalize_mean: bool,
}

impl EstimateClassPcaCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let opts = resolve_options(cli, &self.options)?;

        let mut acc = StatsAccumulator::new();
        let mut summary = RunSummary::new();
        if opts.read_vectors {
            accumulate::<Vec<f32>>(&self.samples, &opts, &mut acc, &mut summary, |v| {
                vec![v.clone()]
            })?;
        } else {
            accumulate::<FrameMatrix>(&self.samples, &opts, &mut acc, &mut summary, Clone::clone)?;
        }
        summary.finish("estimate-class-pca")?;

        let estimate = EstimateOptions {
            dim: opts.dim,
            normalize_variance: opts.normalize_variance,
        };
        let mut bases = JsonLinesWriter::create(&self.bases)?;
        let mut means = JsonLinesWriter::create(&self.means)?;
        let mut energies = JsonLinesWriter::create(&self.energy)?;
        let mut written = 0usize;
        for class in acc.classes().collect::<Vec<_>>() {
            let moments = acc.finalize(class)?;
            let transform = estimate_transform(class, &moments, &estimate)?;
            let key = class.to_string();
            bases.write(&key, &transform.to_basis_record(opts.normalize_mean))?;
            means.write(&key, &transform.mean().iter().copied().collect::<Vec<f64>>())?;
            energies.write(&key, transform.energy())?;
            written += 1;
        }
        bases.finish()?;
        means.finish()?;
        energies.finish()?;
        info!(classes = written, "wrote class transforms");
        Ok(())
    }
}

fn accumulate<V: DeserializeOwned>(
    path: &str,
    opts: &EstimateFlags,
    acc: &mut StatsAccumulator,
    summary: &mut RunSummary,
    to_rows: impl Fn(&V) -> FrameMatrix,
) -> anyhow::Result<()> {
    let mut reader = JsonLinesReader::<V>::open(path)?;
    for_each_record(&mut reader, summary, |key, value| {
        let class = match opts.class_id {
            Some(class) => class,
            None => parse_class_id(key)?,
        };
        let mut rows = to_rows(value);
        if opts.apply_log {
            rows.iter_mut().for_each(|row| floor_log_in_place(row));
        }
        acc.add_rows(class, &rows).map(|_| ())
    })
}
