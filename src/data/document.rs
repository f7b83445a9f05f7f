use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key holding the threshold map merged in by filters.
pub const FILTER_VALUES_KEY: &str = "filter_values";
/// Metadata key holding the reason a filter dropped the document.
pub const FILTER_REASON_KEY: &str = "filter_reason";

/// Document is one unit of text flowing through the pipeline.
/// Metadata is a JSON object that steps enrich as the document moves along.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            id: None,
            metadata: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build a document from one flat JSON record.
    /// `text_key` and `id_key` are lifted out, every other field becomes metadata.
    /// A nested `metadata` object is flattened into the metadata map.
    pub fn from_record(value: Value, text_key: &str, id_key: &str) -> Option<Self> {
        let Value::Object(mut record) = value else {
            return None;
        };

        let text = match record.remove(text_key) {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let id = match record.remove(id_key) {
            Some(Value::String(s)) => Some(s),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        let mut metadata = match record.remove("metadata") {
            Some(Value::Object(nested)) => nested,
            Some(other) => {
                let mut m = Map::new();
                m.insert("metadata".to_string(), other);
                m
            }
            None => Map::new(),
        };
        metadata.extend(record);

        Some(Self { text, id, metadata })
    }

    /// Inverse of [`Document::from_record`]: a flat record with text, id and a nested metadata object.
    pub fn into_record(self, text_key: &str, id_key: &str) -> Value {
        let mut record = Map::new();
        record.insert(text_key.to_string(), Value::String(self.text));
        if let Some(id) = self.id {
            record.insert(id_key.to_string(), Value::String(id));
        }
        record.insert("metadata".to_string(), Value::Object(self.metadata));
        Value::Object(record)
    }

    // --- getters ---
    pub fn get(&self, k: &str) -> Option<&Value> {
        self.metadata.get(k)
    }

    pub fn get_str(&self, k: &str) -> Option<&str> {
        self.metadata.get(k)?.as_str()
    }

    pub fn get_i64(&self, k: &str) -> Option<i64> {
        self.metadata.get(k)?.as_i64()
    }

    pub fn get_f64(&self, k: &str) -> Option<f64> {
        self.metadata.get(k)?.as_f64()
    }

    pub fn get_object(&self, k: &str) -> Option<&Map<String, Value>> {
        self.metadata.get(k)?.as_object()
    }

    // --- setters ---
    pub fn set_str(&mut self, k: impl Into<String>, v: impl Into<String>) {
        self.metadata.insert(k.into(), Value::String(v.into()));
    }

    pub fn set_value(&mut self, k: impl Into<String>, v: Value) {
        self.metadata.insert(k.into(), v);
    }

    /// Merge `values` into the `filter_values` sub-map.
    /// Existing keys are overwritten, unrelated keys are left alone.
    pub fn merge_filter_values<'a, I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (&'a String, &'a f64)>,
    {
        let entry = self
            .metadata
            .entry(FILTER_VALUES_KEY.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(map) = entry {
            for (key, value) in values {
                map.insert(key.clone(), f64_value(*value));
            }
        }
    }

    /// Read one entry of the `filter_values` sub-map.
    pub fn filter_value(&self, key: &str) -> Option<f64> {
        self.get_object(FILTER_VALUES_KEY)?.get(key)?.as_f64()
    }

    pub fn filter_reason(&self) -> Option<&str> {
        self.get_str(FILTER_REASON_KEY)
    }

    /// Number of characters (Unicode scalar values) in the text.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

fn f64_value(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn from_record_lifts_text_and_id() {
        let record = json!({"text": "hello", "id": "d1", "url": "https://x", "metadata": {"lang": "en"}});
        let doc = Document::from_record(record, "text", "id").unwrap();

        assert_eq!(doc.text, "hello");
        assert_eq!(doc.id.as_deref(), Some("d1"));
        assert_eq!(doc.get_str("url"), Some("https://x"));
        assert_eq!(doc.get_str("lang"), Some("en"));
        assert!(doc.get("text").is_none());
    }

    #[test]
    fn from_record_rejects_non_objects() {
        assert!(Document::from_record(json!([1, 2]), "text", "id").is_none());
    }

    #[test]
    fn into_record_nests_metadata() {
        let doc = Document::new("body").with_id("x").with_metadata("score", 0.5);
        let record = doc.into_record("content", "doc_id");
        assert_eq!(
            record,
            json!({"content": "body", "doc_id": "x", "metadata": {"score": 0.5}})
        );
    }

    #[test]
    fn merge_filter_values_overwrites_and_preserves() {
        let mut doc = Document::new("t");
        let mut first = BTreeMap::new();
        first.insert("a".to_string(), 0.1);
        first.insert("b".to_string(), 0.2);
        doc.merge_filter_values(&first);

        let mut second = BTreeMap::new();
        second.insert("b".to_string(), 0.9);
        doc.merge_filter_values(&second);

        assert_eq!(doc.filter_value("a"), Some(0.1));
        assert_eq!(doc.filter_value("b"), Some(0.9));
    }
}
