//! collect-class-samples: classifier outputs aligned to one class.

use clap::Args;
use serde::Deserialize;
use tracing::info;

use pcapost_posterior::{
    check_output_options, CollectConfig, FrameMatrix, PrecomputedOutputs, RunSummary,
    SampleCollector,
};
use pcapost_records::{
    load_table, JsonLinesReader, JsonLinesWriter, MemoryTable, RecordWriter, SequentialReader,
};

use super::{require, resolve_options};
use crate::Cli;

/// Collect classifier outputs for frames aligned to one class.
///
/// Input rows are network activations; a softmax is applied unless
/// --no-softmax is given. The output holds a single record keyed by the
/// class id.
#[derive(Args)]
pub struct CollectClassSamplesCommand {
    /// Network activations (JSON lines of matrices)
    activations: String,
    /// Frame alignments (JSON lines of class-id vectors)
    alignments: String,
    /// Output samples (JSON lines)
    output: String,

    #[command(flatten)]
    options: CollectOptions,
}

#[derive(Args, Clone, Debug, Deserialize)]
#[serde(default)]
struct CollectOptions {
    /// Class whose frames are collected
    #[arg(long, default_value_t = 0)]
    class: usize,
    /// Number of frames to collect
    #[arg(long, default_value_t = 5000)]
    data_size: usize,
    /// Keep only frames whose arg-max is the class
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    correct_class: bool,
    /// Remove the final softmax
    #[arg(long)]
    no_softmax: bool,
    /// Log of the collected posteriors
    #[arg(long)]
    apply_log: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            class: 0,
            data_size: 5000,
            correct_class: true,
            no_softmax: false,
            apply_log: false,
        }
    }
}

impl CollectClassSamplesCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let opts = resolve_options(cli, &self.options)?;
        let classifier = if opts.no_softmax {
            PrecomputedOutputs::without_softmax()
        } else {
            PrecomputedOutputs::new()
        };
        check_output_options(&classifier, opts.apply_log, opts.no_softmax, false)?;

        let config = CollectConfig {
            class: opts.class,
            data_size: opts.data_size,
            correct_class: opts.correct_class,
            apply_log: opts.apply_log,
        };
        let mut collector = SampleCollector::new(&classifier, config)?;
        let alignments: MemoryTable<Vec<usize>> = load_table(&self.alignments)?;

        let mut reader = JsonLinesReader::<FrameMatrix>::open(&self.activations)?;
        let mut summary = RunSummary::new();
        while reader.has_more() && !collector.is_full() {
            let key = reader.key()?.to_string();
            let activations = reader.value()?;
            let result = require(&alignments, &key, "alignment")
                .and_then(|ali| collector.add_utterance(&key, activations, ali));
            summary.absorb(&key, result)?;
            reader.advance()?;
        }
        summary.finish("collect-class-samples")?;

        let frames = collector.len();
        let samples = collector.finish()?;
        let mut writer = JsonLinesWriter::create(&self.output)?;
        writer.write(&opts.class.to_string(), &samples)?;
        writer.finish()?;
        info!(class = opts.class, frames, "wrote class samples");
        Ok(())
    }
}
