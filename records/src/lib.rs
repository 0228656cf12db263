//! Keyed record collaborators.
//!
//! Three small interfaces bound the posterior pipeline's I/O:
//!
//! - [`SequentialReader`]: `(key, value)` pairs in a fixed order
//!   (classifier outputs, alignments, energy tables).
//! - [`RandomAccess`]: lookup by key (utterance weights, per-class
//!   transforms and means, alignment by utterance).
//! - [`RecordWriter`]: one `write` per key.
//!
//! [`MemoryTable`] implements all of them in memory and is what tests use.
//! [`jsonl`] persists records as JSON lines: `{"key": "...", "value": ...}`.

pub mod jsonl;
pub mod memory;

use thiserror::Error;

/// Errors that can occur in record operations.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("records: key not found: {0}")]
    NotFound(String),

    #[error("records: no current record")]
    Exhausted,

    #[error("records: io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("records: malformed record at {path}:{line}: {message}")]
    Format {
        path: String,
        line: usize,
        message: String,
    },

    #[error("records: serialization error: {0}")]
    Serialization(String),
}

/// Result type for record operations.
pub type RecordResult<T> = Result<T, RecordError>;

/// Sequential stream of keyed records.
///
/// The stream is positioned on its first record right after it is opened.
/// `key` and `value` describe the current record and return
/// [`RecordError::Exhausted`] once `has_more` is false.
pub trait SequentialReader<V> {
    /// Returns true while a current record is available.
    fn has_more(&self) -> bool;

    /// Moves to the next record.
    fn advance(&mut self) -> RecordResult<()>;

    /// Key of the current record.
    fn key(&self) -> RecordResult<&str>;

    /// Value of the current record.
    fn value(&self) -> RecordResult<&V>;
}

/// Keyed random-access store.
pub trait RandomAccess<V>: Send + Sync {
    /// Returns true if a record exists for `key`.
    fn contains(&self, key: &str) -> bool;

    /// Returns the record for `key`, or [`RecordError::NotFound`].
    fn get(&self, key: &str) -> RecordResult<&V>;
}

/// Keyed record sink.
pub trait RecordWriter<V> {
    /// Writes one record. Order is not significant.
    fn write(&mut self, key: &str, value: &V) -> RecordResult<()>;

    /// Flushes buffered records.
    fn flush(&mut self) -> RecordResult<()> {
        Ok(())
    }
}

/// Drains a sequential reader into owned `(key, value)` pairs.
pub fn collect_all<V: Clone, R: SequentialReader<V>>(
    reader: &mut R,
) -> RecordResult<Vec<(String, V)>> {
    let mut out = Vec::new();
    while reader.has_more() {
        out.push((reader.key()?.to_string(), reader.value()?.clone()));
        reader.advance()?;
    }
    Ok(out)
}

pub use jsonl::{load_table, JsonLinesReader, JsonLinesWriter};
pub use memory::{MemoryReader, MemoryTable, MemoryWriter};
