use tracing::{info, warn};

use crate::error::{PosteriorError, Result};

/// Per-run counters of processed and skipped items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub done: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one item's result into the counters.
    ///
    /// Data errors are logged and counted as skipped, yielding `Ok(None)`.
    /// Every other error is returned for the caller to abort on.
    pub fn absorb<T>(&mut self, key: &str, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => {
                self.done += 1;
                Ok(Some(value))
            }
            Err(err) if !err.is_fatal() => {
                warn!(key, error = %err, "skipping");
                self.skipped += 1;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Logs the totals and fails if nothing was processed.
    pub fn finish(&self, what: &str) -> Result<()> {
        info!(done = self.done, skipped = self.skipped, "{what} finished");
        if self.done == 0 {
            return Err(PosteriorError::Exhausted(what.to_string()));
        }
        Ok(())
    }
}
