//! sparsify-posteriors: dense posterior matrices to sparse posteriors.

use clap::Args;
use serde::Deserialize;

use pcapost_posterior::{FrameMatrix, RunSummary, Sparsifier, SparsifyConfig};
use pcapost_records::{JsonLinesReader, JsonLinesWriter, RecordWriter};

use super::{for_each_record, resolve_options};
use crate::Cli;

/// Convert dense posteriors to sparse posteriors.
///
/// At most one of --precision, --percentile and --top-n may be given. With
/// none, values are rounded to two decimals.
#[derive(Args)]
pub struct SparsifyPosteriorsCommand {
    /// Dense posteriors (JSON lines of matrices)
    posteriors: String,
    /// Output sparse posteriors (JSON lines)
    output: String,

    #[command(flatten)]
    options: SparsifyOptions,
}

#[derive(Args, Clone, Debug, Deserialize)]
#[serde(default)]
struct SparsifyOptions {
    /// Round to this many decimal places
    #[arg(long)]
    precision: Option<u32>,
    /// Keep the largest entries up to this percent of probability mass
    #[arg(long)]
    percentile: Option<u32>,
    /// Keep the N largest entries
    #[arg(long)]
    top_n: Option<usize>,
    /// Truncate and renormalize; when false every entry is copied
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    round_off: bool,
    /// Exponentiate the input first (log-posterior input)
    #[arg(long)]
    apply_exp: bool,
}

impl Default for SparsifyOptions {
    fn default() -> Self {
        Self {
            precision: None,
            percentile: None,
            top_n: None,
            round_off: true,
            apply_exp: false,
        }
    }
}

impl From<&SparsifyOptions> for SparsifyConfig {
    fn from(opts: &SparsifyOptions) -> Self {
        SparsifyConfig {
            precision: opts.precision,
            percentile: opts.percentile,
            top_n: opts.top_n,
            round_off: opts.round_off,
            apply_exp: opts.apply_exp,
        }
    }
}

impl SparsifyPosteriorsCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let opts = resolve_options(cli, &self.options)?;
        let sparsifier = Sparsifier::from_config(&SparsifyConfig::from(&opts))?;
        tracing::debug!(policy = ?sparsifier.policy(), "sparsifying posteriors");

        let mut reader = JsonLinesReader::<FrameMatrix>::open(&self.posteriors)?;
        let mut writer = JsonLinesWriter::create(&self.output)?;
        let mut summary = RunSummary::new();
        for_each_record(&mut reader, &mut summary, |key, matrix| {
            let sparse = sparsifier.sparsify(key, matrix)?;
            writer.write(key, &sparse)?;
            Ok(())
        })?;
        writer.finish()?;
        summary.finish("sparsify-posteriors")?;
        Ok(())
    }
}
