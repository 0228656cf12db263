use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use pcapost_records::{RandomAccess, SequentialReader};

use crate::energy::EnergyTable;
use crate::error::{PosteriorError, Result};

/// Tolerance for the orthonormality check on loaded bases. Bases are
/// persisted as f32.
const ORTHONORMAL_TOLERANCE: f64 = 1.0e-3;

/// A class's reduced-rank transform: mean, leading principal directions and
/// the energy table that picks how many of them to use.
#[derive(Debug, Clone)]
pub struct PcaTransform {
    class: usize,
    mean: DVector<f64>,
    /// `dim x stored_rank`, orthonormal columns.
    basis: DMatrix<f64>,
    energy: EnergyTable,
    /// Per-component code scale; `None` means unit scale.
    scales: Option<DVector<f64>>,
}

impl PcaTransform {
    /// Validates and assembles a transform.
    pub fn new(
        class: usize,
        mean: DVector<f64>,
        basis: DMatrix<f64>,
        energy: EnergyTable,
    ) -> Result<Self> {
        let invalid = |reason: String| PosteriorError::InvalidTransform { class, reason };

        if basis.nrows() != mean.len() {
            return Err(invalid(format!(
                "basis has {} rows but mean has dimension {}",
                basis.nrows(),
                mean.len()
            )));
        }
        if basis.ncols() == 0 {
            return Err(invalid("basis has no columns".into()));
        }
        if basis.ncols() > energy.full_rank() || energy.full_rank() > mean.len() {
            return Err(invalid(format!(
                "{} stored columns, energy rank {}, dimension {}",
                basis.ncols(),
                energy.full_rank(),
                mean.len()
            )));
        }
        let gram = basis.transpose() * &basis;
        let off = (gram - DMatrix::<f64>::identity(basis.ncols(), basis.ncols())).amax();
        if off > ORTHONORMAL_TOLERANCE {
            return Err(invalid(format!(
                "basis columns are not orthonormal (max deviation {off:.3e})"
            )));
        }

        Ok(Self {
            class,
            mean,
            basis,
            energy,
            scales: None,
        })
    }

    /// Attaches per-component code scales, one per stored column.
    pub fn with_scales(mut self, scales: DVector<f64>) -> Result<Self> {
        if scales.len() != self.basis.ncols() {
            return Err(PosteriorError::InvalidTransform {
                class: self.class,
                reason: format!(
                    "{} scales for {} stored columns",
                    scales.len(),
                    self.basis.ncols()
                ),
            });
        }
        if scales.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(PosteriorError::InvalidTransform {
                class: self.class,
                reason: "scales must be positive and finite".into(),
            });
        }
        self.scales = Some(scales);
        Ok(self)
    }

    pub fn class(&self) -> usize {
        self.class
    }

    /// Feature dimension.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Number of basis columns available.
    pub fn stored_rank(&self) -> usize {
        self.basis.ncols()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn energy(&self) -> &EnergyTable {
        &self.energy
    }

    /// Components used for `percentile`: the table entry, capped at the
    /// stored rank.
    pub fn components_for(&self, percentile: u8) -> usize {
        self.energy.components(percentile).min(self.stored_rank())
    }

    /// Compresses `x` to a `k`-dimensional code: `scale ⊙ B_kᵀ (x − mean)`.
    pub fn project(&self, x: &DVector<f64>, k: usize) -> DVector<f64> {
        let k = k.min(self.stored_rank());
        let centered = x - &self.mean;
        let mut code = self.basis.columns(0, k).tr_mul(&centered);
        if let Some(scales) = &self.scales {
            code.component_mul_assign(&scales.rows(0, k));
        }
        code
    }

    /// Maps a code from [`project`](Self::project) back to feature space:
    /// `mean + B_k (code ⊘ scale)`.
    pub fn reconstruct_code(&self, code: &DVector<f64>) -> DVector<f64> {
        let k = code.len().min(self.stored_rank());
        let mut code = code.rows(0, k).into_owned();
        if let Some(scales) = &self.scales {
            code.component_div_assign(&scales.rows(0, k));
        }
        &self.mean + self.basis.columns(0, k) * code
    }

    /// Affine offset `−scale ⊙ Bᵀ mean`, so that a full code equals
    /// `scale ⊙ Bᵀ x + offset`.
    pub fn offset(&self) -> DVector<f64> {
        let mut offset = -self.basis.tr_mul(&self.mean);
        if let Some(scales) = &self.scales {
            offset.component_mul_assign(scales);
        }
        offset
    }

    /// Basis part of the persisted form.
    pub fn to_basis_record(&self, with_offset: bool) -> BasisRecord {
        BasisRecord {
            rows: self
                .basis
                .row_iter()
                .map(|r| r.iter().map(|&v| v as f32).collect())
                .collect(),
            scales: self.scales.as_ref().map(|s| s.iter().copied().collect()),
            offset: with_offset.then(|| self.offset().iter().copied().collect()),
        }
    }

    /// Rebuilds a transform from its three persisted parts.
    pub fn from_records(
        class: usize,
        basis: &BasisRecord,
        mean: &[f64],
        energy: EnergyTable,
    ) -> Result<Self> {
        let nrows = basis.rows.len();
        let ncols = basis.rows.first().map_or(0, |r| r.len());
        if let Some(bad) = basis.rows.iter().find(|r| r.len() != ncols) {
            return Err(PosteriorError::InvalidTransform {
                class,
                reason: format!("ragged basis: row of {} vs {ncols} columns", bad.len()),
            });
        }
        let matrix = DMatrix::from_fn(nrows, ncols, |r, c| basis.rows[r][c] as f64);
        let transform = Self::new(class, DVector::from_column_slice(mean), matrix, energy)?;
        match &basis.scales {
            Some(scales) => transform.with_scales(DVector::from_column_slice(scales)),
            None => Ok(transform),
        }
    }
}

/// Persisted basis matrix: `rows[i][j]` is feature `i` of component `j`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasisRecord {
    pub rows: Vec<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scales: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<Vec<f64>>,
}

/// Collects transforms before freezing them into a
/// [`ClassTransformRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    transforms: HashMap<usize, PcaTransform>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembles and inserts the transform for `class`.
    pub fn build(
        &mut self,
        class: usize,
        mean: DVector<f64>,
        basis: DMatrix<f64>,
        energy: EnergyTable,
    ) -> Result<()> {
        let transform = PcaTransform::new(class, mean, basis, energy)?;
        self.insert(transform)
    }

    /// Inserts a transform. Each class may be inserted once.
    pub fn insert(&mut self, transform: PcaTransform) -> Result<()> {
        let class = transform.class();
        if self.transforms.contains_key(&class) {
            return Err(PosteriorError::DuplicateClass(class));
        }
        self.transforms.insert(class, transform);
        Ok(())
    }

    pub fn finish(self) -> ClassTransformRegistry {
        ClassTransformRegistry {
            transforms: self.transforms,
        }
    }
}

/// Immutable map from class id to its [`PcaTransform`].
///
/// A class without a transform is a normal condition; callers dispatch on
/// the `Option` returned by [`lookup`](Self::lookup). The registry is never
/// mutated after [`RegistryBuilder::finish`], so shared references may be
/// read from many threads without locking.
#[derive(Debug, Clone, Default)]
pub struct ClassTransformRegistry {
    transforms: HashMap<usize, PcaTransform>,
}

impl ClassTransformRegistry {
    pub fn lookup(&self, class: usize) -> Option<&PcaTransform> {
        self.transforms.get(&class)
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Registered class ids, ascending.
    pub fn classes(&self) -> Vec<usize> {
        let mut classes: Vec<usize> = self.transforms.keys().copied().collect();
        classes.sort_unstable();
        classes
    }

    /// Loads every class listed in `energies` that also has a basis and a
    /// mean. Classes missing either are left unregistered.
    pub fn load<B, M, E>(bases: &B, means: &M, energies: &mut E) -> Result<Self>
    where
        B: RandomAccess<BasisRecord> + ?Sized,
        M: RandomAccess<Vec<f64>> + ?Sized,
        E: SequentialReader<EnergyTable> + ?Sized,
    {
        let mut builder = RegistryBuilder::new();
        let mut skipped = 0usize;
        while energies.has_more() {
            let key = energies.key()?.to_string();
            let class = parse_class_id(&key)?;
            if bases.contains(&key) && means.contains(&key) {
                let transform = PcaTransform::from_records(
                    class,
                    bases.get(&key)?,
                    means.get(&key)?,
                    energies.value()?.clone(),
                )?;
                builder.insert(transform)?;
            } else {
                debug!(class, "no basis or mean for class, leaving it unregistered");
                skipped += 1;
            }
            energies.advance()?;
        }
        let registry = builder.finish();
        info!(
            registered = registry.len(),
            skipped, "loaded class transform registry"
        );
        Ok(registry)
    }
}

/// Parses a record key that names a class id.
pub fn parse_class_id(key: &str) -> Result<usize> {
    key.trim()
        .parse()
        .map_err(|_| PosteriorError::Config(format!("record key {key:?} is not a class id")))
}
