//! Utility functions for CLI commands.

use std::path::Path;

use anyhow::Context;
use pcapost_posterior::{PosteriorError, RunSummary};
use pcapost_records::{MemoryTable, RandomAccess, SequentialReader};

use crate::Cli;

/// Loads options from a YAML or JSON file.
pub fn load_request<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)?;
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("yaml");

    let result = match ext.to_lowercase().as_str() {
        "json" => serde_json::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };

    Ok(result)
}

/// Returns the options from `-f` when given, otherwise the parsed flags.
pub fn resolve_options<T>(cli: &Cli, flags: &T) -> anyhow::Result<T>
where
    T: Clone + serde::de::DeserializeOwned,
{
    match &cli.input {
        Some(path) => load_request(path).with_context(|| format!("loading options from {path}")),
        None => Ok(flags.clone()),
    }
}

/// Drives `f` over every record of `reader`, skipping items that fail with a
/// data error and aborting on anything else.
pub fn for_each_record<V, R, F>(
    reader: &mut R,
    summary: &mut RunSummary,
    mut f: F,
) -> anyhow::Result<()>
where
    R: SequentialReader<V>,
    F: FnMut(&str, &V) -> pcapost_posterior::Result<()>,
{
    while reader.has_more() {
        let key = reader.key()?.to_string();
        let result = f(&key, reader.value()?);
        summary.absorb(&key, result)?;
        reader.advance()?;
    }
    Ok(())
}

/// Looks up `key`, reporting absence as a skippable data error.
pub fn require<'a, V: Send + Sync>(
    table: &'a MemoryTable<V>,
    key: &str,
    what: &str,
) -> pcapost_posterior::Result<&'a V> {
    if !table.contains(key) {
        return Err(PosteriorError::Missing {
            key: key.to_string(),
            what: what.to_string(),
        });
    }
    Ok(table.get(key)?)
}
