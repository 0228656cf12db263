use std::cmp::Ordering;

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PosteriorError, Result};
use crate::registry::PcaTransform;
use crate::stats::Moments;

/// Number of entries in an [`EnergyTable`]: percentiles 0 through 100.
pub const ENERGY_BINS: usize = 101;

/// Percentile whose component count decides how many basis columns are
/// persisted.
pub const STORED_PERCENTILE: u8 = 99;

/// Smallest variance used when normalizing component variance.
const MIN_VARIANCE: f64 = 1.0e-15;

/// Maps an energy percentile to the number of leading principal components
/// needed to retain that share of the total variance.
///
/// Entry `p` is the smallest `k >= 1` whose top-`k` eigenvalue mass reaches
/// `p` percent of the total. Entries never decrease and entry 100 is the
/// full rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>", into = "Vec<u32>")]
pub struct EnergyTable(Vec<u32>);

impl EnergyTable {
    /// Builds the table from eigenvalues sorted in descending order.
    ///
    /// Small negative eigenvalues from rounding are treated as zero. Fails
    /// with [`PosteriorError::DegenerateCovariance`] when the total mass is
    /// not positive.
    pub fn from_eigenvalues(eigenvalues: &[f64]) -> Result<Self> {
        let rank = eigenvalues.len();
        let clamped: Vec<f64> = eigenvalues.iter().map(|&v| v.max(0.0)).collect();
        let total: f64 = clamped.iter().sum();
        if !(total > 0.0) || !total.is_finite() {
            return Err(PosteriorError::DegenerateCovariance { total });
        }

        let mut cumulative = Vec::with_capacity(rank);
        let mut acc = 0.0;
        for v in &clamped {
            acc += v;
            cumulative.push(100.0 * acc / total);
        }

        let mut table = vec![0u32; ENERGY_BINS];
        let mut k = 1;
        for (p, slot) in table.iter_mut().enumerate().take(ENERGY_BINS - 1) {
            while k < rank && cumulative[k - 1] < p as f64 {
                k += 1;
            }
            *slot = k as u32;
        }
        table[ENERGY_BINS - 1] = rank as u32;
        Ok(Self(table))
    }

    /// Number of components for `percentile`. Values above 100 clamp to 100.
    pub fn components(&self, percentile: u8) -> usize {
        self.0[percentile.min(100) as usize] as usize
    }

    /// Rank of the decomposition the table was built from.
    pub fn full_rank(&self) -> usize {
        self.components(100)
    }

    /// Number of basis columns persisted with a transform.
    pub fn stored_rank(&self) -> usize {
        self.components(STORED_PERCENTILE)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }
}

impl TryFrom<Vec<u32>> for EnergyTable {
    type Error = PosteriorError;

    fn try_from(entries: Vec<u32>) -> Result<Self> {
        if entries.len() != ENERGY_BINS {
            return Err(PosteriorError::InvalidEnergyTable(format!(
                "expected {ENERGY_BINS} entries, got {}",
                entries.len()
            )));
        }
        if let Some(p) = entries.windows(2).position(|w| w[0] > w[1]) {
            return Err(PosteriorError::InvalidEnergyTable(format!(
                "entry {} ({}) exceeds entry {} ({})",
                p,
                entries[p],
                p + 1,
                entries[p + 1]
            )));
        }
        Ok(Self(entries))
    }
}

impl From<EnergyTable> for Vec<u32> {
    fn from(table: EnergyTable) -> Self {
        table.0
    }
}

/// Eigen-decomposition of a symmetric matrix, ordered by descending
/// eigenvalue.
#[derive(Debug, Clone)]
pub struct Eigen {
    pub values: DVector<f64>,
    /// Orthonormal eigenvectors as columns, in the order of `values`.
    pub vectors: DMatrix<f64>,
}

/// Decomposes a symmetric covariance matrix into sorted eigenpairs.
pub fn decompose(covariance: &DMatrix<f64>) -> Result<Eigen> {
    let n = covariance.nrows();
    if n != covariance.ncols() {
        return Err(PosteriorError::DimensionMismatch {
            key: "covariance".into(),
            expected: n,
            got: covariance.ncols(),
        });
    }
    if n == 0 {
        return Err(PosteriorError::Empty {
            key: "covariance".into(),
        });
    }

    let eigen = SymmetricEigen::new(covariance.clone());
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap_or(Ordering::Equal)
    });

    let values = DVector::from_iterator(n, order.iter().map(|&i| eigen.eigenvalues[i]));
    let mut vectors = DMatrix::zeros(n, n);
    for (dst, &src) in order.iter().enumerate() {
        vectors.set_column(dst, &eigen.eigenvectors.column(src));
    }
    Ok(Eigen { values, vectors })
}

/// Options for [`estimate_transform`].
#[derive(Debug, Clone, Default)]
pub struct EstimateOptions {
    /// Upper bound on stored components (default: full dimension).
    pub dim: Option<usize>,
    /// Scale each component's code to unit variance (default: false).
    pub normalize_variance: bool,
}

/// Estimates one class's transform from its finalized moments.
///
/// Keeps `min(EnergyTable[99], dim)` leading eigenvectors as the basis.
pub fn estimate_transform(
    class: usize,
    moments: &Moments,
    opts: &EstimateOptions,
) -> Result<PcaTransform> {
    let full_dim = moments.mean.len();
    let dim = opts.dim.unwrap_or(full_dim);
    if dim == 0 || dim > full_dim {
        return Err(PosteriorError::Config(format!(
            "requested dimension {dim} is outside 1..={full_dim}"
        )));
    }

    let eigen = decompose(&moments.covariance)?;
    let table = EnergyTable::from_eigenvalues(eigen.values.as_slice())?;
    let stored = table.stored_rank().min(dim);

    let total: f64 = eigen.values.iter().sum();
    let kept: f64 = eigen.values.rows(0, stored).iter().sum();
    info!(
        class,
        total_eigenvalue_mass = total,
        kept_eigenvalue_mass = kept,
        stored,
        full_dim,
        "estimated class transform"
    );

    let basis = eigen.vectors.columns(0, stored).into_owned();
    let transform = PcaTransform::new(class, moments.mean.clone(), basis, table)?;
    if !opts.normalize_variance {
        return Ok(transform);
    }

    let scales = DVector::from_iterator(
        stored,
        eigen.values.iter().take(stored).map(|&var| {
            let var = if var < MIN_VARIANCE {
                warn!(class, variance = var, "tiny component variance, using floor");
                MIN_VARIANCE
            } else {
                var
            };
            1.0 / var.sqrt()
        }),
    );
    transform.with_scales(scales)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn table_for_known_spectrum() {
        // Shares: 50%, 30%, 20%.
        let table = EnergyTable::from_eigenvalues(&[5.0, 3.0, 2.0]).unwrap();
        assert_eq!(table.components(0), 1);
        assert_eq!(table.components(50), 1);
        assert_eq!(table.components(51), 2);
        assert_eq!(table.components(80), 2);
        assert_eq!(table.components(81), 3);
        assert_eq!(table.components(99), 3);
        assert_eq!(table.full_rank(), 3);
        assert_eq!(table.components(250), 3);
    }

    #[test]
    fn table_is_monotone_and_full_rank_at_100() {
        let eigs = [9.0, 4.0, 1.0, 0.5, 0.25, 0.0, -1e-12];
        let table = EnergyTable::from_eigenvalues(&eigs).unwrap();
        let t = table.as_slice();
        assert_eq!(t.len(), ENERGY_BINS);
        for p in 0..100 {
            assert!(t[p] <= t[p + 1], "entry {p} decreases");
        }
        assert_eq!(t[100] as usize, eigs.len());
        // Trailing zero-variance components are never needed below 100%.
        assert!(table.stored_rank() <= 5);
    }

    #[test]
    fn degenerate_spectrum_is_numeric_error() {
        let err = EnergyTable::from_eigenvalues(&[0.0, 0.0]).unwrap_err();
        assert!(matches!(err, PosteriorError::DegenerateCovariance { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn table_deserialization_validates() {
        let ok: Vec<u32> = (0..101).map(|p| if p < 50 { 1 } else { 2 }).collect();
        assert!(EnergyTable::try_from(ok).is_ok());

        assert!(EnergyTable::try_from(vec![1, 2, 3]).is_err());

        let mut bad: Vec<u32> = vec![2; 101];
        bad[10] = 1;
        assert!(EnergyTable::try_from(bad).is_err());

        let json = serde_json::to_string(&EnergyTable::from_eigenvalues(&[1.0]).unwrap()).unwrap();
        let back: EnergyTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back.full_rank(), 1);
    }

    #[test]
    fn decompose_sorts_descending_with_orthonormal_vectors() {
        let cov = DMatrix::from_row_slice(3, 3, &[2.0, 0.0, 0.0, 0.0, 5.0, 1.0, 0.0, 1.0, 3.0]);
        let eig = decompose(&cov).unwrap();
        for i in 0..2 {
            assert!(eig.values[i] >= eig.values[i + 1]);
        }
        let gram = eig.vectors.transpose() * &eig.vectors;
        assert_relative_eq!(gram, DMatrix::identity(3, 3), epsilon = 1e-10);

        // A v = λ v for the leading pair.
        let v = eig.vectors.column(0);
        assert_relative_eq!(&cov * v, v * eig.values[0], epsilon = 1e-10);
    }

    #[test]
    fn estimate_respects_dim_limit() {
        let moments = Moments {
            mean: DVector::from_vec(vec![0.1, 0.2, 0.3]),
            covariance: DMatrix::from_diagonal(&DVector::from_vec(vec![3.0, 2.0, 1.0])),
            count: 10,
        };
        let full = estimate_transform(0, &moments, &EstimateOptions::default()).unwrap();
        assert_eq!(full.stored_rank(), 3);

        let opts = EstimateOptions {
            dim: Some(2),
            ..Default::default()
        };
        let limited = estimate_transform(0, &moments, &opts).unwrap();
        assert_eq!(limited.stored_rank(), 2);

        let opts = EstimateOptions {
            dim: Some(4),
            ..Default::default()
        };
        let err = estimate_transform(0, &moments, &opts).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
    }

    #[test]
    fn normalized_variance_codes_are_unit_scale() {
        let moments = Moments {
            mean: DVector::zeros(2),
            covariance: DMatrix::from_diagonal(&DVector::from_vec(vec![4.0, 1.0])),
            count: 4,
        };
        let opts = EstimateOptions {
            normalize_variance: true,
            ..Default::default()
        };
        let t = estimate_transform(3, &moments, &opts).unwrap();
        // One standard deviation along the leading axis maps to code ±1.
        let code = t.project(&DVector::from_vec(vec![2.0, 0.0]), 2);
        assert_relative_eq!(code[0].abs(), 1.0, epsilon = 1e-10);
    }
}
