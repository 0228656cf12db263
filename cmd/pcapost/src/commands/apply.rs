//! apply-class-transform: compress and reconstruct posteriors per frame.

use anyhow::Context;
use clap::Args;
use serde::Deserialize;

use pcapost_posterior::{
    check_output_options, BasisRecord, ClassTransformRegistry, Classifier, EnergyTable,
    FrameMatrix, LogPrior, PrecomputedOutputs, PriorOptions, ReconstructConfig, Reconstructor,
    RunSummary,
};
use pcapost_records::{load_table, JsonLinesReader, JsonLinesWriter, MemoryTable, RecordWriter};

use super::{for_each_record, require, resolve_options};
use crate::Cli;

/// Compress and reconstruct classifier outputs through the transform of
/// each frame's aligned class.
///
/// Frames aligned to a class without a transform become one-hot on that
/// class.
#[derive(Args)]
pub struct ApplyClassTransformCommand {
    /// Network activations (JSON lines of matrices)
    activations: String,
    /// Frame alignments (JSON lines of class-id vectors)
    alignments: String,
    /// Class bases written by estimate-class-pca
    bases: String,
    /// Class means written by estimate-class-pca
    means: String,
    /// Class energy tables written by estimate-class-pca
    energies: String,
    /// Output reconstructed posteriors (JSON lines)
    output: String,

    #[command(flatten)]
    options: ApplyOptions,
}

#[derive(Args, Clone, Debug, Deserialize)]
#[serde(default)]
struct ApplyOptions {
    /// Energy percentile selecting the number of components (0-100)
    #[arg(long, default_value_t = 100)]
    energy: u8,
    /// Log of the posteriors before projection
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    apply_log: bool,
    /// Exponentiate the reconstruction
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    apply_exp: bool,
    /// Remove the final softmax (activations are used as log-domain scores)
    #[arg(long)]
    no_softmax: bool,
    /// Class counts (JSON array) for prior correction
    #[arg(long)]
    class_counts: Option<String>,
    /// Scale on the log-prior
    #[arg(long, default_value_t = 1.0)]
    prior_scale: f64,
    /// Relative counts below this disable the class
    #[arg(long, default_value_t = 1e-10)]
    prior_floor: f64,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            energy: 100,
            apply_log: true,
            apply_exp: true,
            no_softmax: false,
            class_counts: None,
            prior_scale: 1.0,
            prior_floor: 1e-10,
        }
    }
}

impl ApplyClassTransformCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let opts = resolve_options(cli, &self.options)?;
        let classifier = if opts.no_softmax {
            PrecomputedOutputs::without_softmax()
        } else {
            PrecomputedOutputs::new()
        };
        check_output_options(
            &classifier,
            opts.apply_log,
            opts.no_softmax,
            opts.class_counts.is_some(),
        )?;

        let prior = match &opts.class_counts {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading class counts {path}"))?;
                let counts: Vec<f64> = serde_json::from_str(&text)
                    .with_context(|| format!("parsing class counts {path}"))?;
                let prior_opts = PriorOptions {
                    scale: opts.prior_scale,
                    floor: opts.prior_floor,
                };
                Some(LogPrior::from_counts(&counts, &prior_opts)?)
            }
            None => None,
        };

        let bases: MemoryTable<BasisRecord> = load_table(&self.bases)?;
        let means: MemoryTable<Vec<f64>> = load_table(&self.means)?;
        let mut energies = JsonLinesReader::<EnergyTable>::open(&self.energies)?;
        let registry = ClassTransformRegistry::load(&bases, &means, &mut energies)?;

        let config = ReconstructConfig {
            energy: opts.energy,
            apply_log: opts.apply_log,
            log_input: opts.no_softmax,
            apply_exp: opts.apply_exp,
        };
        let mut reconstructor = Reconstructor::new(&registry, config)?;
        if let Some(prior) = &prior {
            reconstructor = reconstructor.with_prior(prior)?;
        }

        let alignments: MemoryTable<Vec<usize>> = load_table(&self.alignments)?;
        let mut reader = JsonLinesReader::<FrameMatrix>::open(&self.activations)?;
        let mut writer = JsonLinesWriter::create(&self.output)?;
        let mut summary = RunSummary::new();
        for_each_record(&mut reader, &mut summary, |key, activations| {
            let labels = require(&alignments, key, "alignment")?;
            let outputs = classifier.forward(key, activations)?;
            let reconstructed = reconstructor.reconstruct_utterance(key, &outputs, labels)?;
            writer.write(key, &reconstructed)?;
            Ok(())
        })?;
        writer.finish()?;
        summary.finish("apply-class-transform")?;
        Ok(())
    }
}
