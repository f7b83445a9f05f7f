use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data::Document;
use crate::{Error, Result};

mod exclusion;
mod memory;
pub mod reader;
pub mod writer;

pub use exclusion::ExclusionWriter;
pub use memory::MemorySink;
pub use reader::{jsonl::JsonlReader, parquet::ParquetReader, Reader};
pub use writer::{jsonl::JsonlWriter, parquet::ParquetWriter, Writer};

/// Destination for dropped documents, kept for audit and recovery.
///
/// A sink is opened for one run of a step and closed exactly once when that
/// run ends, whichever way it ends.
pub trait ExclusionSink {
    fn write(&mut self, doc: Document, rank: usize) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Jsonl,
    Parquet,
}

impl Format {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "jsonl" | "json" | "ndjson" => Some(Format::Jsonl),
            "parquet" => Some(Format::Parquet),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Format::Jsonl => "jsonl",
            Format::Parquet => "parquet",
        }
    }
}

/// Which record fields hold the document text and id. Everything else is metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAdapter {
    #[serde(default = "default_text_key")]
    pub text_key: String,
    #[serde(default = "default_id_key")]
    pub id_key: String,
}

fn default_text_key() -> String {
    "text".to_string()
}

fn default_id_key() -> String {
    "id".to_string()
}

impl Default for DocumentAdapter {
    fn default() -> Self {
        Self {
            text_key: default_text_key(),
            id_key: default_id_key(),
        }
    }
}

/// Open a reader for `path`; the format is taken from the extension unless given.
pub fn open_reader(
    path: &Path,
    format: Option<Format>,
    adapter: &DocumentAdapter,
) -> Result<Box<dyn Reader>> {
    let reader: Box<dyn Reader> = match resolve_format(path, format)? {
        Format::Jsonl => Box::new(JsonlReader::new(path, adapter.clone())?),
        Format::Parquet => Box::new(ParquetReader::new(path, adapter.clone())?),
    };
    Ok(reader)
}

pub fn create_writer(
    path: &Path,
    format: Format,
    adapter: &DocumentAdapter,
) -> Result<Box<dyn Writer>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let writer: Box<dyn Writer> = match format {
        Format::Jsonl => Box::new(JsonlWriter::new(path, adapter.clone())?),
        Format::Parquet => Box::new(ParquetWriter::new(path, adapter.clone())?),
    };
    Ok(writer)
}

fn resolve_format(path: &Path, format: Option<Format>) -> Result<Format> {
    format
        .or_else(|| Format::from_path(path))
        .ok_or_else(|| Error::Config(format!("cannot infer input format of {}", path.display())))
}

/// Expand input patterns into a sorted list of files.
/// Each pattern may be a file, a directory (walked recursively) or a glob.
pub fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let path = Path::new(pattern);
        let mut matched: Vec<PathBuf> = if path.is_dir() {
            walkdir::WalkDir::new(path)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|p| Format::from_path(p).is_some())
                .collect()
        } else if pattern.contains(['*', '?', '[']) {
            glob::glob(pattern)
                .map_err(|e| Error::Config(format!("invalid glob '{pattern}': {e}")))?
                .filter_map(|entry| entry.ok())
                .filter(|p| p.is_file())
                .collect()
        } else {
            vec![path.to_path_buf()]
        };
        matched.sort();
        files.extend(matched);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn format_from_extension() {
        assert_eq!(Format::from_path(Path::new("a/b.jsonl")), Some(Format::Jsonl));
        assert_eq!(Format::from_path(Path::new("b.parquet")), Some(Format::Parquet));
        assert_eq!(Format::from_path(Path::new("b.txt")), None);
    }

    #[test]
    fn expand_inputs_walks_dirs_and_globs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("b.jsonl"), "").unwrap();
        fs::write(dir.path().join("a.jsonl"), "").unwrap();
        fs::write(nested.join("c.parquet"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let walked = expand_inputs(&[dir.path().to_string_lossy().to_string()]).unwrap();
        assert_eq!(walked.len(), 3);
        assert!(walked[0].ends_with("a.jsonl"));

        let pattern = format!("{}/*.jsonl", dir.path().display());
        let globbed = expand_inputs(&[pattern]).unwrap();
        assert_eq!(globbed.len(), 2);
        assert!(globbed[1].ends_with("b.jsonl"));
    }
}
