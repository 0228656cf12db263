use std::collections::HashMap;
use std::fmt;

use pcapost_records::RandomAccess;
use tracing::warn;

use crate::error::{PosteriorError, Result};
use crate::sparsify::SparseFrame;

/// Added to every class count on finalization so downstream division and
/// logs never see zero.
pub const SMOOTHING: f64 = 0.5;

/// Frames per second assumed when reporting total mass as a duration.
pub const FRAMES_PER_SECOND: f64 = 100.0;

/// Weighted running sum of posterior mass per class.
///
/// The count vector grows (zero-filled) whenever a frame names a class
/// beyond its current length.
#[derive(Debug, Clone, Default)]
pub struct PriorCounts {
    counts: Vec<f64>,
}

/// Finalized, smoothed counts.
#[derive(Debug, Clone)]
pub struct SmoothedCounts {
    pub counts: Vec<f64>,
    /// Classes that received no mass before smoothing.
    pub zero_classes: Vec<usize>,
}

impl PriorCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-sizes the count vector to `dim` classes.
    pub fn with_dim(dim: usize) -> Self {
        Self {
            counts: vec![0.0; dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.counts.len()
    }

    /// Raw (unsmoothed) counts.
    pub fn as_slice(&self) -> &[f64] {
        &self.counts
    }

    /// Total accumulated mass.
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Adds `weight · frame_weight · utt_weight` for every entry of `frame`.
    pub fn add_frame(&mut self, frame: &SparseFrame, frame_weight: f64, utt_weight: f64) {
        for &(class, weight) in frame {
            if class >= self.counts.len() {
                self.counts.resize(class + 1, 0.0);
            }
            self.counts[class] += weight as f64 * frame_weight * utt_weight;
        }
    }

    /// Adds every frame of one utterance.
    ///
    /// `frame_weights`, when given, must cover every frame; otherwise nothing
    /// is added and a data error is returned.
    pub fn add_utterance(
        &mut self,
        key: &str,
        frames: &[SparseFrame],
        frame_weights: Option<&[f32]>,
        utt_weight: f64,
    ) -> Result<()> {
        if let Some(w) = frame_weights {
            if w.len() != frames.len() {
                return Err(PosteriorError::DimensionMismatch {
                    key: format!("{key} frame weights"),
                    expected: frames.len(),
                    got: w.len(),
                });
            }
        }
        for (i, frame) in frames.iter().enumerate() {
            let fw = frame_weights.map_or(1.0, |w| w[i] as f64);
            self.add_frame(frame, fw, utt_weight);
        }
        Ok(())
    }

    /// Adds one utterance, looking up its weights by key.
    ///
    /// A key absent from either weight table is a data error and leaves the
    /// counts unchanged.
    pub fn add_keyed<F, U>(
        &mut self,
        key: &str,
        frames: &[SparseFrame],
        frame_weights: Option<&F>,
        utt_weights: Option<&U>,
    ) -> Result<()>
    where
        F: RandomAccess<Vec<f32>> + ?Sized,
        U: RandomAccess<f32> + ?Sized,
    {
        let fw = match frame_weights {
            Some(table) if !table.contains(key) => return Err(missing(key, "per-frame weights")),
            Some(table) => Some(table.get(key)?.as_slice()),
            None => None,
        };
        let uw = match utt_weights {
            Some(table) if !table.contains(key) => return Err(missing(key, "per-utterance weight")),
            Some(table) => *table.get(key)? as f64,
            None => 1.0,
        };
        self.add_utterance(key, frames, fw, uw)
    }

    /// Sums another accumulator into this one.
    pub fn merge(&mut self, other: &PriorCounts) {
        if other.counts.len() > self.counts.len() {
            self.counts.resize(other.counts.len(), 0.0);
        }
        for (dst, src) in self.counts.iter_mut().zip(&other.counts) {
            *dst += src;
        }
    }

    /// Classes whose accumulated mass is exactly zero.
    pub fn zero_classes(&self) -> Vec<usize> {
        self.counts
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == 0.0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Reports zero-mass classes and adds [`SMOOTHING`] to every entry.
    pub fn finalize(&self) -> SmoothedCounts {
        let zero_classes = self.zero_classes();
        for &class in &zero_classes {
            warn!(class, "class has zero count, its prior will be dominated by smoothing");
        }
        SmoothedCounts {
            counts: self.counts.iter().map(|c| c + SMOOTHING).collect(),
            zero_classes,
        }
    }

    /// Builds a diagnostic report over the raw counts.
    pub fn report(&self, symbols: Option<&SymbolTable>) -> CountReport {
        CountReport::new(&self.counts, symbols)
    }
}

fn missing(key: &str, what: &str) -> PosteriorError {
    PosteriorError::Missing {
        key: key.to_string(),
        what: what.to_string(),
    }
}

/// Class id to name mapping read from `symbol id` lines.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    names: HashMap<usize, String>,
}

impl SymbolTable {
    pub fn parse(text: &str) -> Result<Self> {
        let mut names = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let (Some(symbol), Some(id)) = (fields.next(), fields.next()) else {
                if line.trim().is_empty() {
                    continue;
                }
                return Err(PosteriorError::Config(format!(
                    "symbol table line {}: expected `symbol id`",
                    lineno + 1
                )));
            };
            let id: usize = id.parse().map_err(|_| {
                PosteriorError::Config(format!(
                    "symbol table line {}: bad id {id:?}",
                    lineno + 1
                ))
            })?;
            names.insert(id, symbol.to_string());
        }
        Ok(Self { names })
    }

    pub fn name(&self, id: usize) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One row of a [`CountReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct CountEntry {
    pub class: usize,
    pub count: f64,
    /// Share of the total mass.
    pub fraction: f64,
    pub symbol: Option<String>,
}

/// Classes sorted ascending by count, with the total mass as a duration.
#[derive(Debug, Clone)]
pub struct CountReport {
    pub entries: Vec<CountEntry>,
    pub total: f64,
}

impl CountReport {
    pub fn new(counts: &[f64], symbols: Option<&SymbolTable>) -> Self {
        let total: f64 = counts.iter().sum();
        let mut entries: Vec<CountEntry> = counts
            .iter()
            .enumerate()
            .map(|(class, &count)| CountEntry {
                class,
                count,
                fraction: if total > 0.0 { count / total } else { 0.0 },
                symbol: symbols.and_then(|s| s.name(class)).map(str::to_string),
            })
            .collect();
        entries.sort_by(|a, b| a.count.total_cmp(&b.count).then(a.class.cmp(&b.class)));
        Self { entries, total }
    }

    /// Total mass in hours at [`FRAMES_PER_SECOND`].
    pub fn hours(&self) -> f64 {
        self.total / FRAMES_PER_SECOND / 3600.0
    }
}

impl fmt::Display for CountReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.entries {
            write!(f, "{} ({:.6}) {}", e.count, e.fraction, e.class)?;
            if let Some(sym) = &e.symbol {
                write!(f, " ({sym})")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "#total {} ({:.2}h)", self.total, self.hours())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pcapost_records::MemoryTable;

    #[test]
    fn smoothing_and_zero_detection() {
        let mut counts = PriorCounts::new();
        counts.add_frame(&vec![(0, 1.0)], 10.0, 1.0);
        counts.add_frame(&vec![(2, 1.0)], 5.0, 1.0);
        counts.add_frame(&vec![(1, 0.0)], 1.0, 1.0);

        let smoothed = counts.finalize();
        assert_eq!(smoothed.counts, vec![10.5, 0.5, 5.5]);
        assert_eq!(smoothed.zero_classes, vec![1]);
        assert!(smoothed.counts.iter().all(|&c| c > 0.0));
    }

    #[test]
    fn grows_on_demand_and_respects_presize() {
        let mut counts = PriorCounts::with_dim(4);
        assert_eq!(counts.dim(), 4);
        counts.add_frame(&vec![(1, 0.5), (6, 0.5)], 1.0, 1.0);
        assert_eq!(counts.dim(), 7);
        assert_eq!(counts.as_slice()[6], 0.5);
        assert_eq!(counts.as_slice()[5], 0.0);
    }

    #[test]
    fn weights_multiply() {
        let mut counts = PriorCounts::new();
        let frames = vec![vec![(0, 0.5), (1, 0.5)], vec![(1, 1.0)]];
        counts
            .add_utterance("u", &frames, Some(&[2.0, 0.5][..]), 3.0)
            .unwrap();
        assert_relative_eq!(counts.as_slice()[0], 3.0);
        assert_relative_eq!(counts.as_slice()[1], 0.5 * 2.0 * 3.0 + 0.5 * 3.0);
        assert_relative_eq!(counts.total(), 7.5);
    }

    #[test]
    fn short_frame_weights_rejected() {
        let mut counts = PriorCounts::new();
        let frames = vec![vec![(0, 1.0)], vec![(0, 1.0)]];
        let err = counts
            .add_utterance("u", &frames, Some(&[1.0][..]), 1.0)
            .unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(counts.dim(), 0);
    }

    #[test]
    fn keyed_weights_lookup() {
        let mut fw: MemoryTable<Vec<f32>> = MemoryTable::default();
        fw.insert("a", vec![2.0]);
        let mut uw: MemoryTable<f32> = MemoryTable::default();
        uw.insert("a", 0.5);

        let mut counts = PriorCounts::new();
        let frames = vec![vec![(0, 1.0)]];
        counts
            .add_keyed("a", &frames, Some(&fw), Some(&uw))
            .unwrap();
        assert_relative_eq!(counts.as_slice()[0], 1.0);

        let err = counts
            .add_keyed("b", &frames, Some(&fw), None::<&MemoryTable<f32>>)
            .unwrap_err();
        assert!(matches!(err, PosteriorError::Missing { .. }));
        assert!(!err.is_fatal());
        assert_relative_eq!(counts.total(), 1.0);
    }

    #[test]
    fn merge_matches_single_pass() {
        let frames = [vec![(0, 0.3), (2, 0.7)], vec![(1, 1.0)], vec![(3, 1.0)]];
        let mut single = PriorCounts::new();
        for f in &frames {
            single.add_frame(f, 1.0, 1.0);
        }
        let mut a = PriorCounts::new();
        a.add_frame(&frames[0], 1.0, 1.0);
        let mut b = PriorCounts::new();
        b.add_frame(&frames[1], 1.0, 1.0);
        b.add_frame(&frames[2], 1.0, 1.0);
        a.merge(&b);
        assert_eq!(a.as_slice(), single.as_slice());
    }

    #[test]
    fn report_sorted_with_symbols() {
        let symbols = SymbolTable::parse("sil 0\nAA 1\n\nB 2\n").unwrap();
        assert_eq!(symbols.len(), 3);
        let report = CountReport::new(&[300.0, 60.0, 360000.0 - 360.0], Some(&symbols));
        assert_eq!(
            report.entries.iter().map(|e| e.class).collect::<Vec<_>>(),
            vec![1, 0, 2]
        );
        assert_eq!(report.entries[0].symbol.as_deref(), Some("AA"));
        assert_relative_eq!(report.hours(), 1.0);

        let text = report.to_string();
        assert!(text.starts_with("60 (0.000167) 1 (AA)\n"));
        assert!(text.ends_with("#total 360000 (1.00h)\n"));

        assert!(SymbolTable::parse("only-one-field\n").is_err());
        assert!(SymbolTable::parse("x notanumber\n").is_err());
    }
}
