//! Per-class compression and reconstruction of frame posteriors.
//!
//! # Architecture
//!
//! Offline, per class:
//!
//! 1. [`StatsAccumulator`]: posterior frames aligned to a class -> mean and covariance
//! 2. [`estimate_transform`]: covariance -> sorted eigenbasis + [`EnergyTable`]
//! 3. [`ClassTransformRegistry`]: immutable class id -> [`PcaTransform`] lookup
//!
//! Online, per frame:
//!
//! - [`Reconstructor`]: project a frame on its aligned class's leading
//!   components and map it back, with an optional log-prior correction
//! - [`Sparsifier`]: truncate a dense frame to a renormalized sparse one
//! - [`PriorCounts`]: accumulate sparse posterior mass into smoothed class counts
//!
//! # Energy Percentiles
//!
//! The number of components used at reconstruction time is chosen by energy
//! percentile, not by a fixed rank:
//!
//! ```text
//! eigenvalues  5.0  3.0  2.0
//! cumulative   50%  80%  100%
//! table[50] = 1, table[80] = 2, table[81] = 3, table[100] = 3
//! ```
//!
//! # Errors
//!
//! Every [`PosteriorError`] has an [`ErrorKind`]. Data errors skip one
//! utterance; the rest abort the run. [`RunSummary`] applies that rule.

mod classifier;
mod collect;
mod counts;
mod domain;
mod energy;
mod error;
mod reconstruct;
mod registry;
mod sparsify;
mod stats;
mod summary;

pub use classifier::{
    check_output_options, softmax_in_place, Classifier, FrameMatrix, PrecomputedOutputs,
};
pub use collect::{CollectConfig, SampleCollector};
pub use counts::{
    CountEntry, CountReport, PriorCounts, SmoothedCounts, SymbolTable, FRAMES_PER_SECOND, SMOOTHING,
};
pub use domain::{argmax, exp_in_place, floor_log, floor_log_in_place, EPSILON};
pub use energy::{
    decompose, estimate_transform, Eigen, EnergyTable, EstimateOptions, ENERGY_BINS,
    STORED_PERCENTILE,
};
pub use error::{ErrorKind, PosteriorError, Result};
pub use reconstruct::{LogPrior, PriorOptions, ReconstructConfig, Reconstructor};
pub use registry::{
    parse_class_id, BasisRecord, ClassTransformRegistry, PcaTransform, RegistryBuilder,
};
pub use sparsify::{
    densify, SparseFrame, Sparsifier, SparsifyConfig, TruncationPolicy, DEFAULT_PRECISION,
};
pub use stats::{ClassStatistics, Moments, StatsAccumulator};
pub use summary::RunSummary;
