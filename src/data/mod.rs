mod document;

pub use document::{Document, FILTER_REASON_KEY, FILTER_VALUES_KEY};

use crate::Result;

/// A lazily pulled, single-pass stream of documents.
pub type DocumentStream<'a> = Box<dyn Iterator<Item = Result<Document>> + 'a>;
