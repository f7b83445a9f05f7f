use super::Writer;
use crate::data::Document;
use crate::io::DocumentAdapter;
use crate::Result;
use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PARTITION_SIZE: usize = 10_000;

/// Writes documents as `(text, id, metadata)` rows, metadata serialized as JSON.
pub struct ParquetWriter {
    writer: ArrowWriter<File>,
    schema: Arc<Schema>,
    buffer: Vec<Document>,
    partition_size: usize,
    path: PathBuf,
    documents_written: usize,
}

impl ParquetWriter {
    pub fn new(path: &Path, adapter: DocumentAdapter) -> Result<Self> {
        let schema = Arc::new(Schema::new(vec![
            Field::new(&adapter.text_key, DataType::Utf8, false),
            Field::new(&adapter.id_key, DataType::Utf8, true),
            Field::new("metadata", DataType::Utf8, false),
        ]));
        let file = File::create(path)?;
        let props = WriterProperties::builder().build();
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

        Ok(Self {
            writer,
            schema,
            buffer: Vec::new(),
            partition_size: PARTITION_SIZE,
            path: path.to_path_buf(),
            documents_written: 0,
        })
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let texts: StringArray = self.buffer.iter().map(|d| Some(d.text.as_str())).collect();
        let ids: StringArray = self.buffer.iter().map(|d| d.id.as_deref()).collect();
        let metadata = self
            .buffer
            .iter()
            .map(|d| serde_json::to_string(&d.metadata))
            .collect::<std::result::Result<Vec<String>, _>>()?;
        let metadata: StringArray = metadata.iter().map(|m| Some(m.as_str())).collect();

        let columns = vec![
            Arc::new(texts) as ArrayRef,
            Arc::new(ids) as ArrayRef,
            Arc::new(metadata) as ArrayRef,
        ];
        let batch = RecordBatch::try_new(self.schema.clone(), columns)?;
        self.writer.write(&batch)?;

        self.documents_written += self.buffer.len();
        self.buffer.clear();
        Ok(())
    }
}

impl Writer for ParquetWriter {
    fn write_document(&mut self, doc: Document) -> Result<()> {
        self.buffer.push(doc);
        if self.buffer.len() >= self.partition_size {
            self.flush()?;
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<bool> {
        self.flush()?;
        let ParquetWriter {
            writer,
            path,
            documents_written,
            ..
        } = *self;
        writer.close()?;

        let has_data = documents_written > 0;
        if !has_data {
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
    use crate::io::ParquetReader;

    #[test]
    fn written_documents_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");

        let mut writer = Box::new(ParquetWriter::new(&path, DocumentAdapter::default()).unwrap());
        writer
            .write_document(
                Document::new("first")
                    .with_id("a")
                    .with_metadata("minhash_cluster_id", 3)
                    .with_metadata("quality_score", 0.75),
            )
            .unwrap();
        writer.write_document(Document::new("second")).unwrap();
        assert!(writer.close().unwrap());

        let docs: Vec<Document> = ParquetReader::new(&path, DocumentAdapter::default())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "first");
        assert_eq!(docs[0].id.as_deref(), Some("a"));
        assert_eq!(docs[0].get_i64("minhash_cluster_id"), Some(3));
        assert_eq!(docs[0].get_f64("quality_score"), Some(0.75));
        assert_eq!(docs[1].id, None);
    }
}
