use super::Writer;
use crate::data::Document;
use crate::io::DocumentAdapter;
use crate::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const PARTITION_SIZE: usize = 50_000;

pub struct JsonlWriter {
    writer: BufWriter<File>,
    adapter: DocumentAdapter,
    buffer: Vec<Document>,
    partition_size: usize,
    path: PathBuf,
    documents_written: usize,
}

impl JsonlWriter {
    pub fn new(path: &Path, adapter: DocumentAdapter) -> Result<Self> {
        let output_file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(output_file),
            adapter,
            buffer: Vec::new(),
            partition_size: PARTITION_SIZE,
            path: path.to_path_buf(),
            documents_written: 0,
        })
    }

    /// Serialize the buffer into one string so each flush is a single write call.
    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let mut output = String::with_capacity(self.buffer.len() * 200);
        for doc in self.buffer.drain(..) {
            let record = doc.into_record(&self.adapter.text_key, &self.adapter.id_key);
            output.push_str(&serde_json::to_string(&record)?);
            output.push('\n');
            self.documents_written += 1;
        }
        self.writer.write_all(output.as_bytes())?;
        Ok(())
    }
}

impl Writer for JsonlWriter {
    fn write_document(&mut self, doc: Document) -> Result<()> {
        self.buffer.push(doc);
        if self.buffer.len() >= self.partition_size {
            self.flush()?;
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<bool> {
        self.flush()?;
        self.writer.flush()?;
        let has_data = self.documents_written > 0;

        if !has_data {
            let JsonlWriter { writer, path, .. } = *self;
            drop(writer); // close the file before deleting it
            let _ = std::fs::remove_file(&path);
        }
        Ok(has_data)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::JsonlReader;

    #[test]
    fn written_documents_read_back_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");

        let mut writer = Box::new(JsonlWriter::new(&path, DocumentAdapter::default()).unwrap());
        writer
            .write_document(Document::new("hello").with_id("1").with_metadata("score", 0.5))
            .unwrap();
        assert!(writer.close().unwrap());

        let docs: Vec<Document> = JsonlReader::new(&path, DocumentAdapter::default())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(docs, vec![Document::new("hello").with_id("1").with_metadata("score", 0.5)]);
    }

    #[test]
    fn empty_output_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jsonl");
        let writer = Box::new(JsonlWriter::new(&path, DocumentAdapter::default()).unwrap());
        assert!(!writer.close().unwrap());
        assert!(!path.exists());
    }
}
