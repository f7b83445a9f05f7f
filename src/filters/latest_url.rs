use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::data::Document;
use crate::filters::{Filter, FilterResult};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LatestUrlConfig {
    /// Filtered CDXJ index listing the URLs to keep.
    pub cdxj_path: Option<PathBuf>,
    #[serde(default = "default_url_key")]
    pub url_key: String,
    #[serde(default = "default_date_key")]
    pub date_key: String,
}

impl Default for LatestUrlConfig {
    fn default() -> Self {
        Self {
            cdxj_path: None,
            url_key: default_url_key(),
            date_key: default_date_key(),
        }
    }
}

fn default_url_key() -> String {
    "url".to_string()
}

fn default_date_key() -> String {
    "date".to_string()
}

/// Keeps a document only if its URL is listed in a filtered CDXJ index and its
/// date is not older than the latest capture the index records for that URL.
pub struct LatestUrlFilter {
    url_key: String,
    date_key: String,
    /// URL → latest capture date. `None` when no index is configured.
    latest: Option<HashMap<String, String>>,
}

impl LatestUrlFilter {
    pub fn new(config: LatestUrlConfig) -> Result<Self> {
        let latest = match &config.cdxj_path {
            Some(path) if path.exists() => {
                let latest = load_cdxj(path)?;
                tracing::info!(urls = latest.len(), path = %path.display(), "loaded CDXJ index");
                Some(latest)
            }
            Some(path) => {
                tracing::warn!(path = %path.display(), "CDXJ index not found, URL filtering disabled");
                None
            }
            None => {
                tracing::warn!("no CDXJ index configured, URL filtering disabled");
                None
            }
        };
        Ok(Self {
            url_key: config.url_key,
            date_key: config.date_key,
            latest,
        })
    }

    pub fn from_index(latest: HashMap<String, String>) -> Self {
        Self {
            url_key: default_url_key(),
            date_key: default_date_key(),
            latest: Some(latest),
        }
    }
}

impl Filter for LatestUrlFilter {
    fn name(&self) -> &str {
        "latest_url"
    }

    fn filter(&self, doc: &mut Document) -> Result<FilterResult> {
        let url = required_str(doc, &self.url_key)?;
        let date = required_str(doc, &self.date_key)?;

        let latest = match &self.latest {
            Some(latest) if !latest.is_empty() => latest,
            _ => return Ok(FilterResult::keep()),
        };

        Ok(match latest.get(url) {
            None => FilterResult::reject("url_not_in_cdxj"),
            Some(latest_date) if date < latest_date.as_str() => {
                FilterResult::reject("url_older_than_cdxj")
            }
            Some(_) => FilterResult::keep(),
        })
    }
}

fn required_str<'d>(doc: &'d Document, key: &str) -> Result<&'d str> {
    match doc.get(key) {
        None | Some(serde_json::Value::Null) => Err(Error::missing_field(key, doc.id.as_deref())),
        Some(serde_json::Value::String(value)) if !value.is_empty() => Ok(value.as_str()),
        Some(serde_json::Value::String(_)) => Err(Error::invalid_field(
            key,
            "is empty",
            doc.id.as_deref(),
        )),
        Some(other) => Err(Error::invalid_field(
            key,
            format!("must be a string, got {other}"),
            doc.id.as_deref(),
        )),
    }
}

/// Parse `<surt> <date> <json>` lines, keeping the latest date per URL.
fn load_cdxj(path: &Path) -> Result<HashMap<String, String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut latest: HashMap<String, String> = HashMap::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, ' ');
        let (Some(_surt), Some(date), Some(json)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Config(format!(
                "{}:{}: expected '<surt> <date> <json>'",
                path.display(),
                line_no + 1
            )));
        };
        let record: serde_json::Value = serde_json::from_str(json)?;
        let Some(url) = record.get("url").and_then(|u| u.as_str()) else {
            return Err(Error::Config(format!(
                "{}:{}: record has no url",
                path.display(),
                line_no + 1
            )));
        };

        match latest.get_mut(url) {
            Some(existing) if date > existing.as_str() => *existing = date.to_string(),
            Some(_) => {}
            None => {
                latest.insert(url.to_string(), date.to_string());
            }
        }
    }
    Ok(latest)
}
