use nalgebra::DVector;
use tracing::debug;

use crate::domain::{exp_in_place, floor_log, EPSILON};
use crate::error::{check_finite, PosteriorError, Result};
use crate::registry::{ClassTransformRegistry, PcaTransform};

/// Log-prior given to classes whose relative count falls below the floor.
/// Subtracting it drives their quasi-likelihood to effectively zero.
const DISABLED_LOG_PRIOR: f64 = 1.0e10;

/// Configures [`Reconstructor`].
#[derive(Debug, Clone)]
pub struct ReconstructConfig {
    /// Energy percentile (0..=100) selecting how many components to keep
    /// (default: 100).
    pub energy: u8,
    /// Take the floored log of each input frame (default: true).
    pub apply_log: bool,
    /// Input frames are already in the log domain, e.g. pre-softmax
    /// activations (default: false).
    pub log_input: bool,
    /// Exponentiate the output back to the probability domain
    /// (default: true).
    pub apply_exp: bool,
}

impl Default for ReconstructConfig {
    fn default() -> Self {
        Self {
            energy: 100,
            apply_log: true,
            log_input: false,
            apply_exp: true,
        }
    }
}

impl ReconstructConfig {
    /// True when frames are processed in the log domain.
    pub fn log_domain(&self) -> bool {
        self.apply_log || self.log_input
    }

    pub fn validate(&self) -> Result<()> {
        if self.energy > 100 {
            return Err(PosteriorError::Config(format!(
                "energy percentile {} is above 100",
                self.energy
            )));
        }
        if self.apply_log && self.log_input {
            return Err(PosteriorError::Config(
                "apply-log on input that is already in the log domain (no-softmax)".into(),
            ));
        }
        Ok(())
    }
}

/// Options for turning class counts into log-priors.
#[derive(Debug, Clone)]
pub struct PriorOptions {
    /// Multiplier on the log-prior before subtraction (default: 1.0).
    pub scale: f64,
    /// Relative counts below this are disabled (default: 1e-10).
    pub floor: f64,
}

impl Default for PriorOptions {
    fn default() -> Self {
        Self {
            scale: 1.0,
            floor: 1.0e-10,
        }
    }
}

/// Class-independent log-prior vector subtracted from log-posteriors to
/// obtain quasi-likelihoods.
#[derive(Debug, Clone)]
pub struct LogPrior {
    /// Already multiplied by the prior scale.
    scaled: Vec<f64>,
}

impl LogPrior {
    /// Builds `scale · ln(count / Σcount)` from (smoothed) class counts.
    pub fn from_counts(counts: &[f64], opts: &PriorOptions) -> Result<Self> {
        let sum: f64 = counts.iter().sum();
        if counts.is_empty() || !(sum > 0.0) || !sum.is_finite() {
            return Err(PosteriorError::Config(format!(
                "class counts must have a positive finite sum, got {sum}"
            )));
        }
        let mut disabled = 0usize;
        let scaled = counts
            .iter()
            .map(|&c| {
                let rel = c / sum;
                let log_prior = if rel < opts.floor {
                    disabled += 1;
                    DISABLED_LOG_PRIOR
                } else {
                    rel.ln()
                };
                opts.scale * log_prior
            })
            .collect();
        if disabled > 0 {
            debug!(disabled, floor = opts.floor, "classes disabled by prior floor");
        }
        Ok(Self { scaled })
    }

    pub fn dim(&self) -> usize {
        self.scaled.len()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.scaled
    }
}

/// Projects posterior frames through their aligned class's transform and
/// reconstructs them.
///
/// # Steps per frame
///
/// 1. Reject NaN/Inf input.
/// 2. Optional floored log.
/// 3. Optional log-prior subtraction.
/// 4. With a registered transform: center, project on `k` components,
///    map back, re-add the mean. Without one: certainty on the label,
///    `ε` (or `ln ε`) elsewhere.
/// 5. Optional exp.
pub struct Reconstructor<'a> {
    registry: &'a ClassTransformRegistry,
    config: ReconstructConfig,
    prior: Option<&'a LogPrior>,
}

impl<'a> Reconstructor<'a> {
    pub fn new(registry: &'a ClassTransformRegistry, config: ReconstructConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            config,
            prior: None,
        })
    }

    /// Enables prior correction. Requires log-domain processing.
    pub fn with_prior(mut self, prior: &'a LogPrior) -> Result<Self> {
        if !self.config.log_domain() {
            return Err(PosteriorError::Config(
                "prior correction needs apply-log or no-softmax".into(),
            ));
        }
        self.prior = Some(prior);
        Ok(self)
    }

    pub fn config(&self) -> &ReconstructConfig {
        &self.config
    }

    /// Reconstructs one frame whose ground-truth class is `label`.
    ///
    /// `key` and `row` only label errors.
    pub fn reconstruct(
        &self,
        key: &str,
        row: usize,
        frame: &[f32],
        label: usize,
    ) -> Result<Vec<f32>> {
        check_finite(key, row, frame)?;
        let dim = frame.len();
        if label >= dim {
            return Err(PosteriorError::LabelOutOfRange {
                key: key.to_string(),
                label,
                dim,
            });
        }

        let mut x = DVector::from_iterator(dim, frame.iter().map(|&v| v as f64));
        if self.config.apply_log {
            x.apply(|v| *v = floor_log(*v));
        }
        if let Some(prior) = self.prior {
            if prior.dim() != dim {
                return Err(PosteriorError::DimensionMismatch {
                    key: key.to_string(),
                    expected: prior.dim(),
                    got: dim,
                });
            }
            for (v, p) in x.iter_mut().zip(prior.as_slice()) {
                *v -= p;
            }
        }

        let mut out: Vec<f32> = match self.registry.lookup(label) {
            Some(transform) => self.project(key, transform, &x)?,
            None => self.fallback(dim, label),
        };

        if self.config.apply_exp {
            exp_in_place(&mut out);
        }
        Ok(out)
    }

    /// Reconstructs every frame of an utterance against its alignment.
    pub fn reconstruct_utterance(
        &self,
        key: &str,
        frames: &[Vec<f32>],
        labels: &[usize],
    ) -> Result<Vec<Vec<f32>>> {
        if frames.len() != labels.len() {
            return Err(PosteriorError::DimensionMismatch {
                key: format!("{key} alignment"),
                expected: frames.len(),
                got: labels.len(),
            });
        }
        let mut fallback = 0usize;
        let out = frames
            .iter()
            .zip(labels)
            .enumerate()
            .map(|(row, (frame, &label))| {
                if self.registry.lookup(label).is_none() {
                    fallback += 1;
                }
                self.reconstruct(key, row, frame, label)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(key, frames = frames.len(), fallback, "reconstructed utterance");
        Ok(out)
    }

    fn project(&self, key: &str, transform: &PcaTransform, x: &DVector<f64>) -> Result<Vec<f32>> {
        if transform.dim() != x.len() {
            return Err(PosteriorError::DimensionMismatch {
                key: format!("{key} class {}", transform.class()),
                expected: transform.dim(),
                got: x.len(),
            });
        }
        let k = transform.components_for(self.config.energy);
        let code = transform.project(x, k);
        let back = transform.reconstruct_code(&code);
        Ok(back.iter().map(|&v| v as f32).collect())
    }

    fn fallback(&self, dim: usize, label: usize) -> Vec<f32> {
        let (floor, certain) = if self.config.log_domain() {
            (EPSILON.ln(), 0.0)
        } else {
            (EPSILON, 1.0)
        };
        let mut out = vec![floor as f32; dim];
        out[label] = certain;
        out
    }
}
