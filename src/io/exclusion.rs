use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::data::Document;
use crate::io::{create_writer, DocumentAdapter, ExclusionSink, Format, Writer};
use crate::Result;

/// Persists dropped documents under a directory, one file per rank
/// (`{rank:05}.jsonl` / `{rank:05}.parquet`). Files are created lazily.
pub struct ExclusionWriter {
    dir: PathBuf,
    format: Format,
    adapter: DocumentAdapter,
    writers: HashMap<usize, Box<dyn Writer>>,
}

impl ExclusionWriter {
    pub fn new(dir: impl Into<PathBuf>, format: Format, adapter: DocumentAdapter) -> Self {
        Self {
            dir: dir.into(),
            format,
            adapter,
            writers: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, rank: usize) -> PathBuf {
        self.dir
            .join(format!("{:05}.{}", rank, self.format.extension()))
    }
}

impl ExclusionSink for ExclusionWriter {
    fn write(&mut self, doc: Document, rank: usize) -> Result<()> {
        if !self.writers.contains_key(&rank) {
            let writer = create_writer(&self.file_for(rank), self.format, &self.adapter)?;
            self.writers.insert(rank, writer);
        }
        if let Some(writer) = self.writers.get_mut(&rank) {
            writer.write_document(doc)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        for (rank, writer) in self.writers.drain() {
            let path = writer.path().to_path_buf();
            if writer.close()? {
                tracing::debug!(rank, path = %path.display(), "closed exclusion file");
            }
        }
        Ok(())
    }
}
