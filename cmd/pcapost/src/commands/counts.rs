//! accumulate-counts: sums sparse posterior mass into smoothed class counts.

use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::Context;
use clap::Args;
use serde::Deserialize;
use tracing::info;

use pcapost_posterior::{PriorCounts, RunSummary, SparseFrame, SymbolTable};
use pcapost_records::{load_table, JsonLinesReader, MemoryTable};

use super::{for_each_record, resolve_options};
use crate::Cli;

/// Accumulate class counts from sparse posteriors.
///
/// Writes the smoothed counts as a JSON array, usable as `--class-counts`
/// for apply-class-transform.
#[derive(Args)]
pub struct AccumulateCountsCommand {
    /// Sparse posteriors (JSON lines, one utterance per record)
    posteriors: String,
    /// Output counts file (JSON array)
    counts: String,

    #[command(flatten)]
    options: CountsOptions,
}

#[derive(Args, Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct CountsOptions {
    /// Per-frame weights (JSON lines of float vectors)
    #[arg(long)]
    frame_weights: Option<String>,
    /// Per-utterance weights (JSON lines of floats)
    #[arg(long)]
    utt_weights: Option<String>,
    /// Pre-size the count vector to this many classes
    #[arg(long, default_value_t = 0)]
    counts_dim: usize,
    /// Symbol table (`symbol id` lines) used to annotate the report
    #[arg(long)]
    symbol_table: Option<String>,
}

impl AccumulateCountsCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let opts = resolve_options(cli, &self.options)?;

        let frame_weights: Option<MemoryTable<Vec<f32>>> =
            opts.frame_weights.as_deref().map(load_table).transpose()?;
        let utt_weights: Option<MemoryTable<f32>> =
            opts.utt_weights.as_deref().map(load_table).transpose()?;
        let symbols = match &opts.symbol_table {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading symbol table {path}"))?;
                Some(SymbolTable::parse(&text)?)
            }
            None => None,
        };

        let mut counts = PriorCounts::with_dim(opts.counts_dim);
        let mut summary = RunSummary::new();
        let mut reader = JsonLinesReader::<Vec<SparseFrame>>::open(&self.posteriors)?;
        for_each_record(&mut reader, &mut summary, |key, frames| {
            counts.add_keyed(key, frames, frame_weights.as_ref(), utt_weights.as_ref())
        })?;
        summary.finish("accumulate-counts")?;

        if symbols.is_some() || cli.verbose {
            eprint!("{}", counts.report(symbols.as_ref()));
        }

        let smoothed = counts.finalize();
        let file = File::create(&self.counts)
            .with_context(|| format!("creating counts file {}", self.counts))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &smoothed.counts)?;
        writer.flush()?;
        info!(
            classes = smoothed.counts.len(),
            zero_classes = smoothed.zero_classes.len(),
            "wrote class counts"
        );
        Ok(())
    }
}
