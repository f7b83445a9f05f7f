use std::path::Path;

use crate::data::Document;

/// Unified writer trait for different data sinks.
/// Writers manage their own buffer and flush when it reaches partition size.
pub trait Writer {
    fn write_document(&mut self, doc: Document) -> crate::Result<()>;

    /// Flush remaining documents and finalize the output.
    /// Returns true if any data was written; empty outputs are removed.
    fn close(self: Box<Self>) -> crate::Result<bool>;

    fn path(&self) -> &Path;
}

pub mod jsonl;
pub mod parquet;
