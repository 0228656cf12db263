use crate::error::{check_finite, PosteriorError, Result};

/// Dense matrix with one row per frame.
pub type FrameMatrix = Vec<Vec<f32>>;

/// Trait for frame classifiers that turn feature rows into class scores.
///
/// Implementations must be thread-safe (`Send + Sync`).
pub trait Classifier: Send + Sync {
    /// Runs the classifier over every frame of one utterance.
    fn forward(&self, key: &str, input: &[Vec<f32>]) -> Result<FrameMatrix>;

    /// Number of classes produced per frame, if fixed in advance.
    fn output_dim(&self) -> Option<usize>;

    /// True if outputs are softmax posteriors rather than raw activations.
    fn ends_with_softmax(&self) -> bool;
}

/// Classifier over stored network outputs.
///
/// Each input row is taken as the network's pre-softmax activations. A
/// row-wise softmax turns them into posteriors unless the softmax has been
/// removed.
#[derive(Debug, Clone)]
pub struct PrecomputedOutputs {
    softmax: bool,
    dim: Option<usize>,
}

impl PrecomputedOutputs {
    pub fn new() -> Self {
        Self {
            softmax: true,
            dim: None,
        }
    }

    /// Passes activations through unchanged.
    pub fn without_softmax() -> Self {
        Self {
            softmax: false,
            dim: None,
        }
    }

    /// Requires every row to have `dim` entries.
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }
}

impl Default for PrecomputedOutputs {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for PrecomputedOutputs {
    fn forward(&self, key: &str, input: &[Vec<f32>]) -> Result<FrameMatrix> {
        let mut out = Vec::with_capacity(input.len());
        for (row, frame) in input.iter().enumerate() {
            check_finite(key, row, frame)?;
            if let Some(dim) = self.dim {
                if frame.len() != dim {
                    return Err(PosteriorError::DimensionMismatch {
                        key: key.to_string(),
                        expected: dim,
                        got: frame.len(),
                    });
                }
            }
            let mut frame = frame.clone();
            if self.softmax {
                softmax_in_place(&mut frame);
            }
            check_finite(key, row, &frame)?;
            out.push(frame);
        }
        Ok(out)
    }

    fn output_dim(&self) -> Option<usize> {
        self.dim
    }

    fn ends_with_softmax(&self) -> bool {
        self.softmax
    }
}

/// Numerically stable softmax over one row.
pub fn softmax_in_place(row: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f64;
    for v in row.iter_mut() {
        *v = (*v - max).exp();
        sum += *v as f64;
    }
    if sum > 0.0 {
        for v in row.iter_mut() {
            *v = (*v as f64 / sum) as f32;
        }
    }
}

/// Checks the log-domain flags against a classifier.
///
/// `no_softmax` means the classifier was built without its final softmax.
pub fn check_output_options(
    classifier: &dyn Classifier,
    apply_log: bool,
    no_softmax: bool,
    prior_correction: bool,
) -> Result<()> {
    if apply_log && no_softmax {
        return Err(PosteriorError::Config(
            "apply-log and no-softmax together make no sense".into(),
        ));
    }
    if apply_log && !classifier.ends_with_softmax() {
        return Err(PosteriorError::Config(
            "apply-log needs a classifier that ends with softmax".into(),
        ));
    }
    if prior_correction && !(apply_log || no_softmax) {
        return Err(PosteriorError::Config(
            "prior correction needs apply-log or no-softmax".into(),
        ));
    }
    Ok(())
}
