use std::cmp::Ordering;

use serde::Deserialize;

use crate::domain::EPSILON;
use crate::error::{check_finite, PosteriorError, Result};

/// One sparse posterior frame: `(class index, probability)` pairs in
/// ascending class order.
pub type SparseFrame = Vec<(usize, f32)>;

/// Rule deciding which entries of a dense frame survive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TruncationPolicy {
    /// Keep every entry unchanged.
    Copy,
    /// Round to this many decimal places, drop zeros, renormalize.
    FixedDecimal(u32),
    /// Keep the largest entries until their mass reaches this fraction,
    /// then renormalize.
    PercentileMass(f64),
    /// Keep the `K` largest entries, then renormalize.
    TopK(usize),
}

/// Flag-style sparsification options as they arrive from the command line
/// or an options file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SparsifyConfig {
    /// Decimal places kept by rounding.
    pub precision: Option<u32>,
    /// Percent of probability mass to keep (1..=100).
    pub percentile: Option<u32>,
    /// Number of largest entries to keep.
    pub top_n: Option<usize>,
    /// Enables truncation. When off every entry is copied (default: true).
    pub round_off: bool,
    /// Exponentiate the input before truncating (default: false).
    pub apply_exp: bool,
}

impl Default for SparsifyConfig {
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

/// Decimal places used when rounding is on and no rule was chosen.
pub const DEFAULT_PRECISION: u32 = 2;

impl SparsifyConfig {
    /// Resolves the options to a single policy.
    ///
    /// At most one of `precision`, `percentile` and `top_n` may be set.
    pub fn policy(&self) -> Result<TruncationPolicy> {
        let chosen = [
            self.precision.is_some(),
            self.percentile.is_some(),
            self.top_n.is_some(),
        ]
        .iter()
        .filter(|&&b| b)
        .count();
        if chosen > 1 {
            return Err(PosteriorError::Config(
                "precision, percentile and top-n are mutually exclusive".into(),
            ));
        }
        if !self.round_off {
            if chosen > 0 {
                return Err(PosteriorError::Config(
                    "a truncation rule was given with round-off disabled".into(),
                ));
            }
            return Ok(TruncationPolicy::Copy);
        }
        let policy = if let Some(p) = self.percentile {
            TruncationPolicy::PercentileMass(p as f64 / 100.0)
        } else if let Some(k) = self.top_n {
            TruncationPolicy::TopK(k)
        } else {
            TruncationPolicy::FixedDecimal(self.precision.unwrap_or(DEFAULT_PRECISION))
        };
        Ok(policy)
    }
}

/// Converts dense posterior frames into sparse ones under a
/// [`TruncationPolicy`].
#[derive(Debug, Clone)]
pub struct Sparsifier {
    policy: TruncationPolicy,
    apply_exp: bool,
}

impl Sparsifier {
    pub fn new(policy: TruncationPolicy, apply_exp: bool) -> Result<Self> {
        match policy {
            TruncationPolicy::FixedDecimal(p) if p > 9 => {
                return Err(PosteriorError::Config(format!(
                    "precision {p} exceeds single-precision resolution"
                )));
            }
            TruncationPolicy::PercentileMass(f) if !(f > 0.0 && f <= 1.0) => {
                return Err(PosteriorError::Config(format!(
                    "mass fraction {f} is outside (0, 1]"
                )));
            }
            TruncationPolicy::TopK(0) => {
                return Err(PosteriorError::Config("top-n must be at least 1".into()));
            }
            _ => {}
        }
        Ok(Self { policy, apply_exp })
    }

    /// Builds a sparsifier from flag-style options.
    pub fn from_config(config: &SparsifyConfig) -> Result<Self> {
        Self::new(config.policy()?, config.apply_exp)
    }

    pub fn policy(&self) -> TruncationPolicy {
        self.policy
    }

    /// Sparsifies every row of an utterance.
    pub fn sparsify(&self, key: &str, rows: &[Vec<f32>]) -> Result<Vec<SparseFrame>> {
        rows.iter()
            .enumerate()
            .map(|(row, frame)| self.sparsify_frame(key, row, frame))
            .collect()
    }

    /// Sparsifies one frame.
    ///
    /// Only strictly positive entries are emitted, so an all-zero or empty
    /// frame becomes an empty one. An emitted weight above 1 is rejected
    /// with [`PosteriorError::NotProbability`].
    pub fn sparsify_frame(&self, key: &str, row: usize, frame: &[f32]) -> Result<SparseFrame> {
        check_finite(key, row, frame)?;
        let values: Vec<f32> = if self.apply_exp {
            let values: Vec<f32> = frame.iter().map(|v| v.exp()).collect();
            check_finite(key, row, &values)?;
            values
        } else {
            frame.to_vec()
        };

        let mut kept: Vec<(usize, f32)> = match self.policy {
            TruncationPolicy::Copy => {
                let copied = positive(values.into_iter().enumerate());
                check_probabilities(key, row, &copied)?;
                return Ok(copied);
            }
            TruncationPolicy::FixedDecimal(places) => {
                let scale = 10f64.powi(places as i32);
                values
                    .iter()
                    .enumerate()
                    .map(|(i, &v)| (i, ((v as f64 * scale).round() / scale) as f32))
                    .collect()
            }
            TruncationPolicy::PercentileMass(fraction) => {
                // Single precision on both sides so that e.g. 0.35 + 0.35
                // reaches 0.7.
                let fraction = fraction as f32;
                let mut mass = 0.0f32;
                let mut kept = Vec::new();
                for i in descending(&values) {
                    if mass >= fraction {
                        break;
                    }
                    mass += values[i];
                    kept.push((i, values[i]));
                }
                kept
            }
            TruncationPolicy::TopK(k) => descending(&values)
                .into_iter()
                .take(k)
                .map(|i| (i, values[i]))
                .collect(),
        };

        kept.retain(|&(_, v)| v > 0.0);
        let sum: f64 = kept.iter().map(|&(_, v)| v as f64).sum();
        kept.sort_by_key(|&(i, _)| i);
        let sparse = positive(
            kept.into_iter()
                .map(|(i, v)| (i, (v as f64 / (sum + EPSILON)) as f32)),
        );
        check_probabilities(key, row, &sparse)?;
        Ok(sparse)
    }
}

/// Expands a sparse frame back to `dim` dense entries.
pub fn densify(frame: &SparseFrame, dim: usize) -> Vec<f32> {
    let mut dense = vec![0.0; dim];
    for &(i, v) in frame {
        if i < dim {
            dense[i] = v;
        }
    }
    dense
}

/// Indices ordered by descending value, lower index first among equals.
fn descending(values: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    order
}

fn positive(entries: impl Iterator<Item = (usize, f32)>) -> SparseFrame {
    entries.filter(|&(_, v)| v > 0.0).collect()
}

/// Rejects emitted weights outside `[0, 1]`.
fn check_probabilities(key: &str, row: usize, frame: &SparseFrame) -> Result<()> {
    match frame.iter().find(|&&(_, v)| !(0.0..=1.0).contains(&v)) {
        Some(&(col, value)) => Err(PosteriorError::NotProbability {
            key: key.to_string(),
            row,
            col,
            value: value as f64,
        }),
        None => Ok(()),
    }
}
