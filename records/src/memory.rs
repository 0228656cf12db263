//! In-memory record table, reader and writer.

use std::collections::HashMap;

use crate::{RandomAccess, RecordError, RecordResult, RecordWriter, SequentialReader};

/// An in-memory keyed table that preserves insertion order.
///
/// Inserting an existing key replaces its value in place.
#[derive(Debug, Clone)]
pub struct MemoryTable<V> {
    entries: Vec<(String, V)>,
    index: HashMap<String, usize>,
}

impl<V> MemoryTable<V> {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Insert or replace a record.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Convert into a sequential reader over the records in insertion order.
    pub fn into_reader(self) -> MemoryReader<V> {
        MemoryReader {
            entries: self.entries,
            pos: 0,
        }
    }
}

impl<V> Default for MemoryTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for MemoryTable<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

impl<V: Send + Sync> RandomAccess<V> for MemoryTable<V> {
    fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    fn get(&self, key: &str) -> RecordResult<&V> {
        self.index
            .get(key)
            .map(|&i| &self.entries[i].1)
            .ok_or_else(|| RecordError::NotFound(key.to_string()))
    }
}

/// Sequential reader over records held in memory.
#[derive(Debug)]
pub struct MemoryReader<V> {
    entries: Vec<(String, V)>,
    pos: usize,
}

impl<V> MemoryReader<V> {
    pub fn new(entries: Vec<(String, V)>) -> Self {
        Self { entries, pos: 0 }
    }
}

impl<V> SequentialReader<V> for MemoryReader<V> {
    fn has_more(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn advance(&mut self) -> RecordResult<()> {
        if !self.has_more() {
            return Err(RecordError::Exhausted);
        }
        self.pos += 1;
        Ok(())
    }

    fn key(&self) -> RecordResult<&str> {
        self.entries
            .get(self.pos)
            .map(|(k, _)| k.as_str())
            .ok_or(RecordError::Exhausted)
    }

    fn value(&self) -> RecordResult<&V> {
        self.entries
            .get(self.pos)
            .map(|(_, v)| v)
            .ok_or(RecordError::Exhausted)
    }
}

/// Writer that keeps every record in memory.
#[derive(Debug)]
pub struct MemoryWriter<V> {
    records: Vec<(String, V)>,
}

impl<V> MemoryWriter<V> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Records written so far, in write order.
    pub fn records(&self) -> &[(String, V)] {
        &self.records
    }

    pub fn into_table(self) -> MemoryTable<V> {
        self.records.into_iter().collect()
    }
}

impl<V> Default for MemoryWriter<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> RecordWriter<V> for MemoryWriter<V> {
    fn write(&mut self, key: &str, value: &V) -> RecordResult<()> {
        self.records.push((key.to_string(), value.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect_all;

    #[test]
    fn test_table_lookup() {
        let mut table = MemoryTable::new();
        table.insert("utt1", vec![1.0f32, 2.0]);
        table.insert("utt2", vec![3.0f32]);

        assert!(table.contains("utt1"));
        assert!(!table.contains("utt3"));
        assert_eq!(table.get("utt2").unwrap(), &vec![3.0f32]);
        assert!(matches!(table.get("utt3"), Err(RecordError::NotFound(k)) if k == "utt3"));
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut table = MemoryTable::new();
        table.insert("a", 1);
        table.insert("b", 2);
        table.insert("a", 3);

        assert_eq!(table.len(), 2);
        let keys: Vec<&str> = table.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(*table.get("a").unwrap(), 3);
    }

    #[test]
    fn test_reader_order() {
        let table: MemoryTable<i32> = vec![("x", 1), ("y", 2), ("z", 3)].into_iter().collect();
        let mut reader = table.into_reader();

        assert!(reader.has_more());
        assert_eq!(reader.key().unwrap(), "x");
        reader.advance().unwrap();
        assert_eq!(*reader.value().unwrap(), 2);

        let rest = collect_all(&mut reader).unwrap();
        assert_eq!(rest, vec![("y".to_string(), 2), ("z".to_string(), 3)]);
        assert!(!reader.has_more());
        assert!(matches!(reader.advance(), Err(RecordError::Exhausted)));
        assert!(matches!(reader.key(), Err(RecordError::Exhausted)));
        assert!(matches!(reader.value(), Err(RecordError::Exhausted)));
    }

    #[test]
    fn test_writer_roundtrip_into_table() {
        let mut writer = MemoryWriter::new();
        writer.write("k1", &10u32).unwrap();
        writer.write("k2", &20u32).unwrap();
        assert_eq!(writer.records().len(), 2);

        let table = writer.into_table();
        assert_eq!(*table.get("k2").unwrap(), 20);
    }
}
