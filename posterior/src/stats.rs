use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::error::{PosteriorError, Result};

/// Streaming first and second moments of a set of vectors.
///
/// Accumulates `sum = Σ w·x` and `sum_outer = Σ w·x·xᵀ` in f64. The
/// dimension is fixed by the first observation (or by [`with_dim`]); later
/// vectors of another dimension are rejected with
/// [`PosteriorError::DimensionMismatch`] and leave the statistics untouched.
///
/// [`with_dim`]: ClassStatistics::with_dim
#[derive(Debug, Clone)]
pub struct ClassStatistics {
    sum: DVector<f64>,
    sum_outer: DMatrix<f64>,
    count: u64,
    weight: f64,
}

/// Mean and covariance of a finalized [`ClassStatistics`].
#[derive(Debug, Clone)]
pub struct Moments {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
    /// Number of vectors accumulated.
    pub count: u64,
}

impl ClassStatistics {
    /// Creates empty statistics whose dimension is set by the first vector.
    pub fn new() -> Self {
        Self::with_dim(0)
    }

    /// Creates zeroed statistics pre-sized for `dim`-dimensional vectors.
    pub fn with_dim(dim: usize) -> Self {
        Self {
            sum: DVector::zeros(dim),
            sum_outer: DMatrix::zeros(dim, dim),
            count: 0,
            weight: 0.0,
        }
    }

    pub fn dim(&self) -> usize {
        self.sum.len()
    }

    /// Number of vectors accumulated so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Adds `weight·x` to the sum and `weight·x·xᵀ` to the outer-product sum.
    ///
    /// `key` only labels errors.
    pub fn add(&mut self, key: &str, x: &[f32], weight: f64) -> Result<()> {
        self.ensure_dim(key, x.len())?;
        let v = DVector::from_iterator(x.len(), x.iter().map(|&e| e as f64));
        self.sum.axpy(weight, &v, 1.0);
        self.sum_outer.ger(weight, &v, &v, 1.0);
        self.count += 1;
        self.weight += weight;
        Ok(())
    }

    /// Adds every row of `rows` with unit weight.
    ///
    /// All rows are checked before any is added, so a mismatching matrix is
    /// skipped as a whole.
    pub fn add_rows(&mut self, key: &str, rows: &[Vec<f32>]) -> Result<usize> {
        let Some(first) = rows.first() else {
            return Err(PosteriorError::Empty {
                key: key.to_string(),
            });
        };
        if let Some(bad) = rows.iter().find(|r| r.len() != first.len()) {
            return Err(PosteriorError::DimensionMismatch {
                key: key.to_string(),
                expected: first.len(),
                got: bad.len(),
            });
        }
        self.ensure_dim(key, first.len())?;
        for row in rows {
            self.add(key, row, 1.0)?;
        }
        Ok(rows.len())
    }

    /// Sums another partial accumulator into this one.
    pub fn merge(&mut self, other: &ClassStatistics) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        self.ensure_dim("merge", other.dim())?;
        self.sum += &other.sum;
        self.sum_outer += &other.sum_outer;
        self.count += other.count;
        self.weight += other.weight;
        Ok(())
    }

    /// Computes `mean = sum/w` and `covariance = sum_outer/w − mean·meanᵀ`.
    ///
    /// `w` is the total accumulated weight, not the vector count. The two
    /// agree when every vector was added with unit weight, as
    /// [`add_rows`](Self::add_rows) does.
    pub fn finalize(&self, key: &str) -> Result<Moments> {
        if self.count == 0 || self.weight <= 0.0 {
            return Err(PosteriorError::Exhausted(key.to_string()));
        }
        let mean = &self.sum / self.weight;
        let mut covariance = &self.sum_outer / self.weight;
        covariance.ger(-1.0, &mean, &mean, 1.0);

        for (idx, &value) in covariance.iter().enumerate() {
            if !value.is_finite() {
                let n = covariance.nrows();
                return Err(PosteriorError::NonFinite {
                    key: key.to_string(),
                    row: idx % n,
                    col: idx / n,
                    value,
                });
            }
        }
        debug!(key, count = self.count, dim = self.dim(), "finalized statistics");
        Ok(Moments {
            mean,
            covariance,
            count: self.count,
        })
    }

    // Empty statistics may be re-dimensioned freely; the new storage is zero.
    fn ensure_dim(&mut self, key: &str, dim: usize) -> Result<()> {
        if dim == self.dim() {
            return Ok(());
        }
        if self.count == 0 {
            self.sum = DVector::zeros(dim);
            self.sum_outer = DMatrix::zeros(dim, dim);
            return Ok(());
        }
        Err(PosteriorError::DimensionMismatch {
            key: key.to_string(),
            expected: self.dim(),
            got: dim,
        })
    }
}

impl Default for ClassStatistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-class statistics indexed by class id.
///
/// Storage grows on demand when a larger class id is seen; a capacity hint
/// pre-sizes it (and the vector dimension) up front.
#[derive(Debug, Clone, Default)]
pub struct StatsAccumulator {
    classes: Vec<ClassStatistics>,
    dim_hint: usize,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-sizes storage for `num_classes` classes of `dim`-dimensional vectors.
    pub fn with_capacity(num_classes: usize, dim: usize) -> Self {
        Self {
            classes: (0..num_classes).map(|_| ClassStatistics::with_dim(dim)).collect(),
            dim_hint: dim,
        }
    }

    /// Number of class slots currently allocated.
    pub fn capacity(&self) -> usize {
        self.classes.len()
    }

    /// Adds `weight·x` to the statistics of `class`.
    pub fn add(&mut self, class: usize, x: &[f32], weight: f64) -> Result<()> {
        self.slot(class).add(&class_key(class), x, weight)
    }

    /// Adds every row of `rows` to the statistics of `class`.
    pub fn add_rows(&mut self, class: usize, rows: &[Vec<f32>]) -> Result<usize> {
        self.slot(class).add_rows(&class_key(class), rows)
    }

    /// Statistics for `class`, if a slot exists.
    pub fn get(&self, class: usize) -> Option<&ClassStatistics> {
        self.classes.get(class)
    }

    /// Class ids with at least one accumulated vector, ascending.
    pub fn classes(&self) -> impl Iterator<Item = usize> + '_ {
        self.classes
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_empty())
            .map(|(c, _)| c)
    }

    /// Finalizes one class. Fails with [`PosteriorError::Exhausted`] if the
    /// class has no data.
    pub fn finalize(&self, class: usize) -> Result<Moments> {
        let key = class_key(class);
        match self.classes.get(class) {
            Some(stats) => stats.finalize(&key),
            None => Err(PosteriorError::Exhausted(key)),
        }
    }

    /// Sums a per-thread partial accumulator into this one.
    pub fn merge(&mut self, other: &StatsAccumulator) -> Result<()> {
        for (class, stats) in other.classes.iter().enumerate() {
            if !stats.is_empty() {
                self.slot(class).merge(stats)?;
            }
        }
        Ok(())
    }

    fn slot(&mut self, class: usize) -> &mut ClassStatistics {
        if class >= self.classes.len() {
            let dim = self.dim_hint;
            self.classes
                .resize_with(class + 1, || ClassStatistics::with_dim(dim));
        }
        &mut self.classes[class]
    }
}

fn class_key(class: usize) -> String {
    format!("class {class}")
}
