use tracing::debug;

use crate::classifier::{Classifier, FrameMatrix};
use crate::domain::{argmax, floor_log_in_place};
use crate::error::{PosteriorError, Result};

/// Configures [`SampleCollector`].
#[derive(Debug, Clone)]
pub struct CollectConfig {
    /// Class whose frames are collected.
    pub class: usize,
    /// Number of frames to collect before stopping (default: 5000).
    pub data_size: usize,
    /// Keep only frames the classifier assigns to `class` (default: true).
    pub correct_class: bool,
    /// Floored log of the collected frames (default: false).
    pub apply_log: bool,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            class: 0,
            data_size: 5000,
            correct_class: true,
            apply_log: false,
        }
    }
}

impl CollectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.data_size == 0 {
            return Err(PosteriorError::Config("data size must be positive".into()));
        }
        Ok(())
    }
}

/// Gathers classifier output frames aligned to one class, as training
/// samples for that class's transform.
pub struct SampleCollector<'a> {
    classifier: &'a dyn Classifier,
    config: CollectConfig,
    samples: FrameMatrix,
}

impl<'a> SampleCollector<'a> {
    pub fn new(classifier: &'a dyn Classifier, config: CollectConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            classifier,
            config,
            samples: Vec::new(),
        })
    }

    /// True once `data_size` frames have been collected.
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.config.data_size
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Runs the classifier on one utterance and keeps its frames aligned to
    /// the target class. Returns how many frames were kept.
    ///
    /// Utterances that never visit the class are not forwarded.
    pub fn add_utterance(
        &mut self,
        key: &str,
        features: &[Vec<f32>],
        alignment: &[usize],
    ) -> Result<usize> {
        let class = self.config.class;
        if self.is_full() || !alignment.contains(&class) {
            return Ok(0);
        }
        let outputs = self.classifier.forward(key, features)?;
        if outputs.len() != alignment.len() {
            return Err(PosteriorError::DimensionMismatch {
                key: format!("{key} alignment"),
                expected: outputs.len(),
                got: alignment.len(),
            });
        }

        let before = self.samples.len();
        for (frame, &label) in outputs.into_iter().zip(alignment) {
            if self.is_full() {
                break;
            }
            if label != class {
                continue;
            }
            if self.config.correct_class && argmax(&frame) != Some(class) {
                continue;
            }
            self.samples.push(frame);
        }
        let kept = self.samples.len() - before;
        debug!(key, kept, total = self.samples.len(), "collected class frames");
        Ok(kept)
    }

    /// Returns the collected frames, logged when configured.
    pub fn finish(self) -> Result<FrameMatrix> {
        if self.samples.is_empty() {
            return Err(PosteriorError::Exhausted(format!("class {}", self.config.class)));
        }
        let mut samples = self.samples;
        if self.config.apply_log {
            for row in samples.iter_mut() {
                floor_log_in_place(row);
            }
        }
        Ok(samples)
    }
}
