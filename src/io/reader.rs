use std::path::Path;

use crate::data::Document;

/// Unified reader trait for different data sources.
/// Returns documents one by one (generator-like API).
pub trait Reader: Iterator<Item = crate::Result<Document>> {
    fn path(&self) -> &Path;
}

pub mod jsonl;
pub mod parquet;
