use super::Reader;
use crate::data::Document;
use crate::io::DocumentAdapter;
use crate::{Error, Result};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

pub struct JsonlReader {
    reader: BufReader<File>,
    path: PathBuf,
    adapter: DocumentAdapter,
    line_no: usize,
}

impl JsonlReader {
    pub fn new(path: &Path, adapter: DocumentAdapter) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            adapter,
            line_no: 0,
        })
    }

    fn parse_line(&self, line: &str) -> Result<Document> {
        let value: Value = serde_json::from_str(line)?;
        Document::from_record(value, &self.adapter.text_key, &self.adapter.id_key).ok_or_else(
            || {
                Error::Config(format!(
                    "{}:{}: record is not a JSON object",
                    self.path.display(),
                    self.line_no
                ))
            },
        )
    }
}

impl Iterator for JsonlReader {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None, // EOF
                Ok(_) => {
                    self.line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(self.parse_line(&line));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

impl Reader for JsonlReader {
    fn path(&self) -> &Path {
        &self.path
    }
}
