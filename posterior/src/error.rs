use thiserror::Error;

use pcapost_records::RecordError;

/// How a [`PosteriorError`] affects the surrounding run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or contradictory options. Reported before any work starts.
    Config,
    /// One item is unusable. The item is skipped and counted.
    Data,
    /// NaN/Inf or a degenerate statistic. Aborts the run.
    Numeric,
    /// Nothing was accumulated by the end of a pass. Aborts the run.
    Exhaustion,
}

/// Errors returned by posterior pipeline operations.
#[derive(Debug, Error)]
pub enum PosteriorError {
    #[error("posterior: invalid configuration: {0}")]
    Config(String),

    #[error("posterior: {key}: dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        key: String,
        expected: usize,
        got: usize,
    },

    #[error("posterior: {key}: missing {what}")]
    Missing { key: String, what: String },

    #[error("posterior: {key}: empty input")]
    Empty { key: String },

    #[error("posterior: {key}: label {label} out of range for dimension {dim}")]
    LabelOutOfRange { key: String, label: usize, dim: usize },

    #[error("posterior: invalid energy table: {0}")]
    InvalidEnergyTable(String),

    #[error("posterior: duplicate transform for class {0}")]
    DuplicateClass(usize),

    #[error("posterior: class {class}: invalid transform: {reason}")]
    InvalidTransform { class: usize, reason: String },

    #[error("posterior: {key}: non-finite value {value} at row {row}, column {col}")]
    NonFinite {
        key: String,
        row: usize,
        col: usize,
        value: f64,
    },

    #[error("posterior: {key}: value {value} at row {row}, column {col} is not a probability")]
    NotProbability {
        key: String,
        row: usize,
        col: usize,
        value: f64,
    },

    #[error("posterior: degenerate covariance: total eigenvalue mass {total}")]
    DegenerateCovariance { total: f64 },

    #[error("posterior: no data accumulated for {0}")]
    Exhausted(String),

    #[error("posterior: record error: {0}")]
    Records(#[from] RecordError),
}

impl PosteriorError {
    /// Classifies the error into the pipeline's error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::DimensionMismatch { .. }
            | Self::Missing { .. }
            | Self::Empty { .. }
            | Self::LabelOutOfRange { .. }
            | Self::Records(RecordError::NotFound(_)) => ErrorKind::Data,
            // A malformed transform set or unreadable input stream leaves
            // nothing trustworthy to continue with.
            Self::DuplicateClass(_)
            | Self::InvalidTransform { .. }
            | Self::InvalidEnergyTable(_)
            | Self::Records(_) => ErrorKind::Config,
            Self::NonFinite { .. }
            | Self::NotProbability { .. }
            | Self::DegenerateCovariance { .. } => ErrorKind::Numeric,
            Self::Exhausted(_) => ErrorKind::Exhaustion,
        }
    }

    /// True if the error must halt the run instead of skipping one item.
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::Data
    }
}

/// Result type for posterior operations.
pub type Result<T> = std::result::Result<T, PosteriorError>;

/// Returns a [`PosteriorError::NonFinite`] for the first NaN/Inf entry.
pub(crate) fn check_finite(key: &str, row: usize, values: &[f32]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(col) => Err(PosteriorError::NonFinite {
            key: key.to_string(),
            row,
            col,
            value: values[col] as f64,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_errors_are_recoverable() {
        let err = PosteriorError::Missing {
            key: "utt1".into(),
            what: "per-utterance weight".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "posterior: utt1: missing per-utterance weight");

        let err: PosteriorError = RecordError::NotFound("utt9".into()).into();
        assert!(!err.is_fatal());
    }

    #[test]
    fn numeric_and_exhaustion_are_fatal() {
        let nan = PosteriorError::NonFinite {
            key: "utt2".into(),
            row: 3,
            col: 1,
            value: f64::NAN,
        };
        assert_eq!(nan.kind(), ErrorKind::Numeric);
        assert!(nan.is_fatal());

        let empty = PosteriorError::Exhausted("class 7".into());
        assert_eq!(empty.kind(), ErrorKind::Exhaustion);
        assert!(empty.is_fatal());
    }

    #[test]
    fn check_finite_reports_position() {
        assert!(check_finite("u", 0, &[0.1, 0.9]).is_ok());
        match check_finite("u", 4, &[0.1, f32::INFINITY]) {
            Err(PosteriorError::NonFinite { row, col, .. }) => {
                assert_eq!((row, col), (4, 1));
            }
            other => panic!("expected NonFinite, got {other:?}"),
        }
    }
}
