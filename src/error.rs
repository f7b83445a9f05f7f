use thiserror::Error;

/// Errors raised by filters, resolvers and the document I/O layer.
#[derive(Debug, Error)]
pub enum Error {
    /// A document is missing (or carries an unusable) metadata field that a step requires.
    #[error("malformed document{}: field '{field}' {problem}", doc_label(.doc_id))]
    MalformedDocument {
        field: String,
        problem: String,
        doc_id: Option<String>,
    },
    #[error("filter '{filter}' failed: {reason}")]
    Filter { filter: String, reason: String },
    #[error("buffer limit exceeded: more than {limit} documents buffered by '{step}'")]
    BufferLimitExceeded { step: String, limit: usize },
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
}

fn doc_label(doc_id: &Option<String>) -> String {
    match doc_id {
        Some(id) => format!(" '{id}'"),
        None => String::new(),
    }
}

impl Error {
    pub fn missing_field(field: impl Into<String>, doc_id: Option<&str>) -> Self {
        Error::MalformedDocument {
            field: field.into(),
            problem: "is missing".to_string(),
            doc_id: doc_id.map(str::to_string),
        }
    }

    pub fn invalid_field(
        field: impl Into<String>,
        problem: impl Into<String>,
        doc_id: Option<&str>,
    ) -> Self {
        Error::MalformedDocument {
            field: field.into(),
            problem: problem.into(),
            doc_id: doc_id.map(str::to_string),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_document_message_names_field_and_doc() {
        let err = Error::missing_field("quality_score", Some("doc-7"));
        assert_eq!(
            err.to_string(),
            "malformed document 'doc-7': field 'quality_score' is missing"
        );

        let err = Error::missing_field("url", None);
        assert_eq!(err.to_string(), "malformed document: field 'url' is missing");
    }
}
