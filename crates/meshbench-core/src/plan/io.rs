use std::path::Path;

use crate::error::BenchError;
use crate::plan::model::BenchConfig;

/// Read a benchmark configuration file from disk.
///
/// The file format is JSON serialized [`BenchConfig`].
pub async fn read_config(path: impl AsRef<Path>) -> Result<BenchConfig, BenchError> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    let config: BenchConfig = serde_json::from_str(&content)?;
    Ok(config)
}

/// Write a [`BenchConfig`] to disk as pretty-printed JSON.
pub async fn write_config(config: &BenchConfig, path: impl AsRef<Path>) -> Result<(), BenchError> {
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path.as_ref(), content).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
