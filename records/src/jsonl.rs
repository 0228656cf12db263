//! JSON-lines record files.
//!
//! Each non-empty line holds one record:
//!
//! ```text
//! {"key":"utt-001","value":[[0.1,0.9],[0.7,0.3]]}
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{MemoryTable, RecordError, RecordResult, RecordWriter, SequentialReader};

#[derive(Serialize)]
struct RecordOut<'a, V> {
    key: &'a str,
    value: &'a V,
}

#[derive(Deserialize)]
struct RecordIn<V> {
    key: String,
    value: V,
}

/// Streams records from a JSON-lines file, one line at a time.
pub struct JsonLinesReader<V> {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line: usize,
    current: Option<(String, V)>,
}

impl<V: DeserializeOwned> JsonLinesReader<V> {
    /// Opens `path` and positions the reader on its first record.
    pub fn open(path: impl AsRef<Path>) -> RecordResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| RecordError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut reader = Self {
            path,
            lines: BufReader::new(file).lines(),
            line: 0,
            current: None,
        };
        reader.read_next()?;
        Ok(reader)
    }

    fn read_next(&mut self) -> RecordResult<()> {
        self.current = None;
        for line in self.lines.by_ref() {
            self.line += 1;
            let line = line.map_err(|source| RecordError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let rec: RecordIn<V> =
                serde_json::from_str(&line).map_err(|e| RecordError::Format {
                    path: self.path.display().to_string(),
                    line: self.line,
                    message: e.to_string(),
                })?;
            self.current = Some((rec.key, rec.value));
            break;
        }
        Ok(())
    }
}

impl<V: DeserializeOwned> SequentialReader<V> for JsonLinesReader<V> {
    fn has_more(&self) -> bool {
        self.current.is_some()
    }

    fn advance(&mut self) -> RecordResult<()> {
        if self.current.is_none() {
            return Err(RecordError::Exhausted);
        }
        self.read_next()
    }

    fn key(&self) -> RecordResult<&str> {
        match &self.current {
            Some((k, _)) => Ok(k),
            None => Err(RecordError::Exhausted),
        }
    }

    fn value(&self) -> RecordResult<&V> {
        match &self.current {
            Some((_, v)) => Ok(v),
            None => Err(RecordError::Exhausted),
        }
    }
}

/// Loads a whole JSON-lines file into a random-access table.
pub fn load_table<V: DeserializeOwned>(path: impl AsRef<Path>) -> RecordResult<MemoryTable<V>> {
    let mut reader = JsonLinesReader::<V>::open(path)?;
    let mut table = MemoryTable::new();
    while let Some((key, value)) = reader.current.take() {
        table.insert(key, value);
        reader.read_next()?;
    }
    Ok(table)
}

/// Writes records to a JSON-lines file.
pub struct JsonLinesWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl JsonLinesWriter {
    /// Creates (or truncates) `path`.
    pub fn create(path: impl AsRef<Path>) -> RecordResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| RecordError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    /// Flushes and closes the file, reporting any write error.
    pub fn finish(mut self) -> RecordResult<()> {
        self.out.flush().map_err(|e| self.io_err(e))
    }

    fn io_err(&self, source: std::io::Error) -> RecordError {
        RecordError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl<V: Serialize> RecordWriter<V> for JsonLinesWriter {
    fn write(&mut self, key: &str, value: &V) -> RecordResult<()> {
        let line = serde_json::to_string(&RecordOut { key, value })
            .map_err(|e| RecordError::Serialization(e.to_string()))?;
        self.out
            .write_all(line.as_bytes())
            .and_then(|_| self.out.write_all(b"\n"))
            .map_err(|e| self.io_err(e))
    }

    fn flush(&mut self) -> RecordResult<()> {
        self.out.flush().map_err(|e| self.io_err(e))
    }
}

impl Drop for JsonLinesWriter {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{collect_all, RandomAccess};

    #[test]
    fn test_write_then_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("post.jsonl");

        {
            let mut w = JsonLinesWriter::create(&path).unwrap();
            w.write("utt1", &vec![vec![0.25f32, 0.75]]).unwrap();
            w.write("utt2", &vec![vec![1.0f32, 0.0]]).unwrap();
            RecordWriter::<Vec<Vec<f32>>>::flush(&mut w).unwrap();
        }

        let mut r = JsonLinesReader::<Vec<Vec<f32>>>::open(&path).unwrap();
        assert!(r.has_more());
        assert_eq!(r.key().unwrap(), "utt1");
        assert_eq!(r.value().unwrap()[0], vec![0.25, 0.75]);

        let all = collect_all(&mut r).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].0, "utt2");
        assert!(!r.has_more());
        assert!(matches!(r.value(), Err(RecordError::Exhausted)));
        assert!(matches!(r.key(), Err(RecordError::Exhausted)));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.jsonl");
        std::fs::write(
            &path,
            "{\"key\":\"a\",\"value\":1.5}\n\n{\"key\":\"b\",\"value\":2.0}\n",
        )
        .unwrap();

        let table = load_table::<f32>(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(*table.get("b").unwrap(), 2.0);
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"key\":\"a\",\"value\":1}\nnot json\n").unwrap();

        let mut r = JsonLinesReader::<u32>::open(&path).unwrap();
        match r.advance() {
            Err(RecordError::Format { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file() {
        let err = JsonLinesReader::<u32>::open("/nonexistent/records.jsonl").err();
        assert!(matches!(err, Some(RecordError::Io { .. })));
    }
}
