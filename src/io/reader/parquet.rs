use super::Reader;
use crate::data::Document;
use crate::io::DocumentAdapter;
use crate::{Error, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    LargeStringArray, StringArray,
};
use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::{ArrowReader, ParquetFileArrowReader};
use parquet::file::reader::SerializedFileReader;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const READ_BATCH_SIZE: usize = 1024;

type BatchIter = Box<dyn Iterator<Item = std::result::Result<RecordBatch, ArrowError>>>;

/// Reads documents out of a Parquet file, one record batch at a time.
pub struct ParquetReader {
    batches: BatchIter,
    pending: VecDeque<Document>,
    path: PathBuf,
    adapter: DocumentAdapter,
}

impl ParquetReader {
    pub fn new(path: &Path, adapter: DocumentAdapter) -> Result<Self> {
        let file = File::open(path)?;
        let file_reader = Arc::new(SerializedFileReader::new(file)?);
        let mut arrow_reader = ParquetFileArrowReader::new(file_reader);
        let batches = arrow_reader.get_record_reader(READ_BATCH_SIZE)?;

        Ok(Self {
            batches: Box::new(batches),
            pending: VecDeque::new(),
            path: path.to_path_buf(),
            adapter,
        })
    }
}

impl Iterator for ParquetReader {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(doc) = self.pending.pop_front() {
                return Some(Ok(doc));
            }
            let batch = match self.batches.next()? {
                Ok(batch) => batch,
                Err(e) => return Some(Err(e.into())),
            };
            match batch_to_documents(&batch, &self.adapter) {
                Ok(docs) => self.pending.extend(docs),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl Reader for ParquetReader {
    fn path(&self) -> &Path {
        &self.path
    }
}

/// Convert a RecordBatch into documents.
/// The text and id columns are lifted out, a Utf8 `metadata` column holding JSON
/// objects is flattened, every other column becomes a metadata field.
pub fn batch_to_documents(batch: &RecordBatch, adapter: &DocumentAdapter) -> Result<Vec<Document>> {
    let schema = batch.schema();
    let mut docs: Vec<Document> = (0..batch.num_rows()).map(|_| Document::default()).collect();

    for (col_idx, field) in schema.fields().iter().enumerate() {
        let column = batch.column(col_idx);
        for (row_idx, doc) in docs.iter_mut().enumerate() {
            let value = extract_value(column, row_idx)?;
            let name = field.name().as_str();
            if name == adapter.text_key {
                doc.text = match value {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
            } else if name == adapter.id_key {
                doc.id = match value {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    other => Some(other.to_string()),
                };
            } else if name == "metadata" {
                merge_metadata_column(doc, value)?;
            } else {
                doc.metadata.insert(name.to_string(), value);
            }
        }
    }
    Ok(docs)
}

fn merge_metadata_column(doc: &mut Document, value: Value) -> Result<()> {
    match value {
        Value::String(json) => {
            let nested: Map<String, Value> = serde_json::from_str(&json)?;
            doc.metadata.extend(nested);
        }
        Value::Null => {}
        other => {
            doc.metadata.insert("metadata".to_string(), other);
        }
    }
    Ok(())
}

/// Extract a value from an Arrow array at a specific row index.
fn extract_value(array: &ArrayRef, row_idx: usize) -> Result<Value> {
    if !array.is_valid(row_idx) {
        return Ok(Value::Null);
    }

    let value = match array.data_type() {
        DataType::Utf8 => Value::String(downcast::<StringArray>(array)?.value(row_idx).to_string()),
        DataType::LargeUtf8 => {
            Value::String(downcast::<LargeStringArray>(array)?.value(row_idx).to_string())
        }
        DataType::Float64 => float_value(downcast::<Float64Array>(array)?.value(row_idx)),
        DataType::Float32 => float_value(downcast::<Float32Array>(array)?.value(row_idx) as f64),
        DataType::Int64 => Value::from(downcast::<Int64Array>(array)?.value(row_idx)),
        DataType::Int32 => Value::from(downcast::<Int32Array>(array)?.value(row_idx)),
        DataType::Boolean => Value::Bool(downcast::<BooleanArray>(array)?.value(row_idx)),
        // unsupported column types are carried as null
        _ => Value::Null,
    };
    Ok(value)
}

fn downcast<T: 'static>(array: &ArrayRef) -> Result<&T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Config(format!("unexpected array type {:?}", array.data_type())))
}

fn float_value(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
