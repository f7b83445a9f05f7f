use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::dedup::{KeepHigherQuality, KeepHigherQualityConfig};
use crate::filters::{
    GopherRepetitionConfig, GopherRepetitionFilter, LatestUrlConfig, LatestUrlFilter,
};
use crate::io::{DocumentAdapter, ExclusionWriter, Format};
use crate::pipeline::{FilterStep, PipelineStep};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub name: String,
    pub input: InputConfig,
    pub output: OutputConfig,
    pub steps: Vec<StepConfig>,
    /// Where merged step stats are written. Defaults to `<output.path>/stats.json`.
    #[serde(default)]
    pub stats_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Files, directories or glob patterns. Every matched file is one shard.
    pub paths: Vec<String>,
    /// Inferred from each file's extension when unset.
    #[serde(default)]
    pub format: Option<Format>,
    /// Maximum number of documents read per shard.
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(flatten)]
    pub adapter: DocumentAdapter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub format: Format,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExclusionConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub format: Format,
}

/// Options every step accepts next to its own parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusion: Option<ExclusionConfig>,
}

const OPTION_KEYS: [&str; 3] = ["id", "batch_size", "exclusion"];

/// One entry of `steps`, written as a single-key mapping:
///
/// ```yaml
/// - gopher_repetition:
///     dup_line_frac: 0.3
///     batch_size: 8
///     exclusion: { path: removed/repetition }
/// ```
#[derive(Debug, Clone)]
pub struct StepConfig {
    pub name: String,
    pub options: StepOptions,
    pub params: serde_yaml::Mapping,
}

/// A step's parameters, parsed into the config of the step they build.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    GopherRepetition(GopherRepetitionConfig),
    LatestUrl(LatestUrlConfig),
    KeepHigherQuality(KeepHigherQualityConfig),
}

impl Serialize for StepConfig {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::{Error, SerializeMap};

        let mut body = self.params.clone();
        if let serde_yaml::Value::Mapping(options) =
            serde_yaml::to_value(&self.options).map_err(S::Error::custom)?
        {
            body.extend(options);
        }
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &body)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for StepConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let value: serde_yaml::Value = Deserialize::deserialize(deserializer)?;
        let serde_yaml::Value::Mapping(map) = value else {
            return Err(D::Error::custom("step must be a mapping"));
        };
        if map.len() != 1 {
            return Err(D::Error::custom(
                "step must have exactly one key (the step name)",
            ));
        }
        let Some((name, body)) = map.into_iter().next() else {
            return Err(D::Error::custom("empty step"));
        };
        let name = name
            .as_str()
            .ok_or_else(|| D::Error::custom("step name must be a string"))?
            .to_string();

        let body = match body {
            serde_yaml::Value::Null => serde_yaml::Mapping::new(),
            serde_yaml::Value::Mapping(body) => body,
            _ => {
                return Err(D::Error::custom(format!(
                    "parameters of step '{name}' must be a mapping"
                )))
            }
        };

        let mut params = serde_yaml::Mapping::new();
        let mut options = serde_yaml::Mapping::new();
        for (key, value) in body {
            if key.as_str().is_some_and(|k| OPTION_KEYS.contains(&k)) {
                options.insert(key, value);
            } else {
                params.insert(key, value);
            }
        }
        let options: StepOptions = serde_yaml::from_value(serde_yaml::Value::Mapping(options))
            .map_err(|e| D::Error::custom(format!("step '{name}': {e}")))?;

        Ok(StepConfig {
            name,
            options,
            params,
        })
    }
}

impl StepConfig {
    /// Id used in logs and stats: the explicit `id`, else the step name.
    pub fn label(&self) -> &str {
        self.options.id.as_deref().unwrap_or(&self.name)
    }

    pub fn kind(&self) -> Result<StepKind> {
        let params = serde_yaml::Value::Mapping(self.params.clone());
        let kind = match self.name.as_str() {
            "gopher_repetition" => StepKind::GopherRepetition(parse_params(&self.name, params)?),
            "latest_url" => StepKind::LatestUrl(parse_params(&self.name, params)?),
            "keep_higher_quality" => StepKind::KeepHigherQuality(parse_params(&self.name, params)?),
            other => anyhow::bail!("Unknown step: {}", other),
        };
        Ok(kind)
    }

    fn validate(&self) -> Result<()> {
        if self.options.batch_size == Some(0) {
            anyhow::bail!("step '{}': batch_size must be >= 1", self.label());
        }
        match self.kind()? {
            StepKind::GopherRepetition(config) => config
                .validate()
                .with_context(|| format!("step '{}'", self.label()))?,
            StepKind::LatestUrl(_) => {}
            StepKind::KeepHigherQuality(config) => {
                if self.options.batch_size.is_some() {
                    anyhow::bail!(
                        "step '{}': batch_size does not apply to keep_higher_quality",
                        self.label()
                    );
                }
                if config.max_buffered_documents == Some(0) {
                    anyhow::bail!(
                        "step '{}': max_buffered_documents must be >= 1",
                        self.label()
                    );
                }
            }
        }
        Ok(())
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(name: &str, params: serde_yaml::Value) -> Result<T> {
    serde_yaml::from_value(params).with_context(|| format!("Invalid parameters for step '{}'", name))
}

impl PipelineConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.paths.is_empty() {
            anyhow::bail!("input.paths must list at least one file, directory or glob");
        }
        if self.steps.is_empty() {
            anyhow::bail!("Pipeline '{}' has no steps", self.name);
        }

        let mut ids = HashSet::new();
        let mut exclusion_dirs = HashSet::new();
        for step in &self.steps {
            if let Some(id) = &step.options.id {
                if !ids.insert(id) {
                    anyhow::bail!("Duplicate step id: {}", id);
                }
            }
            // Exclusion files are named by rank only, so a shared directory would clobber them.
            if let Some(exclusion) = &step.options.exclusion {
                if exclusion.path == self.output.path {
                    anyhow::bail!(
                        "step '{}': exclusion path {} is the output path",
                        step.label(),
                        exclusion.path.display()
                    );
                }
                if !exclusion_dirs.insert(&exclusion.path) {
                    anyhow::bail!(
                        "step '{}': exclusion path {} is already used by another step",
                        step.label(),
                        exclusion.path.display()
                    );
                }
            }
            step.validate()?;
        }
        Ok(())
    }

    pub fn stats_path(&self) -> PathBuf {
        self.stats_path
            .clone()
            .unwrap_or_else(|| self.output.path.join("stats.json"))
    }
}

/// Build a fresh, runnable step from its configuration.
///
/// Exclusion writers are created here, so every call opens its own set of
/// exclusion files.
pub fn create_step(step: &StepConfig, adapter: &DocumentAdapter) -> Result<Box<dyn PipelineStep>> {
    let exclusion = step
        .options
        .exclusion
        .as_ref()
        .map(|ex| Box::new(ExclusionWriter::new(&ex.path, ex.format, adapter.clone())));

    let built: Box<dyn PipelineStep> = match step.kind()? {
        StepKind::GopherRepetition(config) => {
            let filter = GopherRepetitionFilter::new(config)?;
            filter_step(FilterStep::new(filter), step, exclusion)?
        }
        StepKind::LatestUrl(config) => {
            let filter = LatestUrlFilter::new(config)
                .with_context(|| format!("Failed to create step: {}", step.label()))?;
            filter_step(FilterStep::new(filter), step, exclusion)?
        }
        StepKind::KeepHigherQuality(config) => {
            let mut resolver = KeepHigherQuality::new(config);
            if let Some(sink) = exclusion {
                resolver = resolver.with_exclusion(sink);
            }
            Box::new(resolver)
        }
    };
    Ok(built)
}

fn filter_step(
    mut built: FilterStep,
    step: &StepConfig,
    exclusion: Option<Box<ExclusionWriter>>,
) -> Result<Box<dyn PipelineStep>> {
    if let Some(batch_size) = step.options.batch_size {
        built = built.with_batch_size(batch_size)?;
    }
    if let Some(sink) = exclusion {
        built = built.with_exclusion(sink);
    }
    Ok(Box::new(built))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = r#"
name: curate
input:
  paths: ["data/*.jsonl"]
  limit: 100
  text_key: content
output:
  path: out
  format: parquet
steps:
  - gopher_repetition:
      dup_line_frac: 0.25
      dup_para_frac: null
      batch_size: 4
      exclusion:
        path: removed/repetition
  - latest_url:
      cdxj_path: index.cdxj
  - keep_higher_quality:
      id: dedup
      default_quality_score: 0.0
"#;

    #[test]
    fn parses_full_pipeline() {
        let config = PipelineConfig::from_yaml_str(PIPELINE).unwrap();

        assert_eq!(config.name, "curate");
        assert_eq!(config.input.limit, Some(100));
        assert_eq!(config.input.adapter.text_key, "content");
        assert_eq!(config.input.adapter.id_key, "id");
        assert_eq!(config.output.format, Format::Parquet);
        assert_eq!(config.stats_path(), PathBuf::from("out/stats.json"));
        assert_eq!(config.steps.len(), 3);

        let gopher = &config.steps[0];
        assert_eq!(gopher.options.batch_size, Some(4));
        assert_eq!(
            gopher.options.exclusion,
            Some(ExclusionConfig {
                path: PathBuf::from("removed/repetition"),
                format: Format::Jsonl,
            })
        );
        match gopher.kind().unwrap() {
            StepKind::GopherRepetition(c) => {
                assert_eq!(c.dup_line_frac, Some(0.25));
                assert_eq!(c.dup_para_frac, None);
                assert_eq!(c.dup_line_char_frac, Some(0.2));
            }
            other => panic!("unexpected kind {other:?}"),
        }

        assert_eq!(config.steps[2].label(), "dedup");
        match config.steps[2].kind().unwrap() {
            StepKind::KeepHigherQuality(c) => assert_eq!(c.default_quality_score, Some(0.0)),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn step_without_parameters() {
        let yaml = "name: p\ninput: {paths: [a.jsonl]}\noutput: {path: out}\nsteps:\n  - keep_higher_quality:\n";
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        assert!(config.steps[0].params.is_empty());
    }

    fn with_steps(steps: &str) -> String {
        format!("name: p\ninput: {{paths: [a.jsonl]}}\noutput: {{path: out}}\nsteps:\n{steps}")
    }

    #[test]
    fn rejects_invalid_pipelines() {
        let cases = [
            "steps: []",
            "  - unknown_step: {}\n",
            "  - gopher_repetition: {batch_size: 0}\n",
            "  - gopher_repetition: {dup_line_frac: 1.5}\n",
            "  - gopher_repetition: {top_n_grams: [[0, 0.2]]}\n",
            "  - gopher_repetition: {not_a_field: 1}\n",
            "  - keep_higher_quality: {batch_size: 2}\n",
            "  - keep_higher_quality: {max_buffered_documents: 0}\n",
            "  - gopher_repetition: {id: x}\n  - latest_url: {id: x}\n",
            "  - gopher_repetition: {}\n    latest_url: {}\n",
            "  - gopher_repetition: {exclusion: {path: out}}\n",
        ];
        for case in cases {
            let yaml = if case.starts_with("steps") {
                "name: p\ninput: {paths: [a.jsonl]}\noutput: {path: out}\nsteps: []\n".to_string()
            } else {
                with_steps(case)
            };
            assert!(
                PipelineConfig::from_yaml_str(&yaml).is_err(),
                "accepted invalid pipeline:\n{yaml}"
            );
        }
    }

    #[test]
    fn exclusion_paths_must_be_distinct() {
        let shared = with_steps(
            "  - gopher_repetition: {exclusion: {path: removed}}\n  - keep_higher_quality: {exclusion: {path: removed}}\n",
        );
        let err = PipelineConfig::from_yaml_str(&shared).unwrap_err();
        assert!(err.to_string().contains("already used by another step"));

        let distinct = with_steps(
            "  - gopher_repetition: {exclusion: {path: removed/repetition}}\n  - keep_higher_quality: {exclusion: {path: removed/dedup}}\n",
        );
        assert!(PipelineConfig::from_yaml_str(&distinct).is_ok());
    }

    #[test]
    fn creates_steps_by_name() {
        let config = PipelineConfig::from_yaml_str(&with_steps(
            "  - gopher_repetition: {batch_size: 2}\n  - keep_higher_quality: {}\n",
        ))
        .unwrap();
        let adapter = DocumentAdapter::default();

        let steps: Vec<_> = config
            .steps
            .iter()
            .map(|s| create_step(s, &adapter).unwrap())
            .collect();
        assert_eq!(steps[0].name(), "gopher_repetition");
        assert_eq!(steps[1].name(), "keep_higher_quality");
    }

    #[test]
    fn serializes_back_to_single_key_form() {
        let config = PipelineConfig::from_yaml_str(PIPELINE).unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let again = PipelineConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(again.steps[0].options, config.steps[0].options);
        assert_eq!(again.steps[2].label(), "dedup");
    }
}
