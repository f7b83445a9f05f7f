use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::data::{Document, DocumentStream, FILTER_REASON_KEY};
use crate::io::ExclusionSink;
use crate::pipeline::stats::hints;
use crate::pipeline::{PipelineStep, Stats};
use crate::{Error, Result};

/// Cluster id meaning "not part of any duplicate cluster".
pub const SINGLETON_CLUSTER: i64 = -1;

const LOWER_QUALITY: &str = "lower_quality";
const CLUSTER_ALREADY_KEPT: &str = "cluster_already_kept";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeepHigherQualityConfig {
    /// Metadata key holding the duplicate cluster id.
    pub cluster_key: String,
    /// Metadata key holding the quality score.
    pub score_key: String,
    /// Score used for clustered documents without one. Unset means such documents are malformed.
    pub default_quality_score: Option<f64>,
    /// Upper bound on buffered documents. Unset means unbounded.
    pub max_buffered_documents: Option<usize>,
}

impl Default for KeepHigherQualityConfig {
    fn default() -> Self {
        Self {
            cluster_key: "minhash_cluster_id".to_string(),
            score_key: "quality_score".to_string(),
            default_quality_score: None,
            max_buffered_documents: None,
        }
    }
}

/// Keeps the highest-quality document of every duplicate cluster plus all singletons.
///
/// This is not a streaming filter: the whole input is buffered before anything
/// is emitted, because a cluster's maximum is only known once every member has
/// been seen. Memory grows linearly with the input, so it is meant for bounded
/// shards; set `max_buffered_documents` to turn overflow into an error.
///
/// Within a cluster the survivor is the first document, in input order, whose
/// score equals the cluster maximum. Later documents of that cluster are dropped
/// even when they tie. Emitted documents keep their relative input order.
pub struct KeepHigherQuality {
    config: KeepHigherQualityConfig,
    exclusion: Option<Box<dyn ExclusionSink>>,
    stats: Stats,
}

/// A buffered document with its cluster assignment resolved during the scan.
struct Buffered {
    doc: Document,
    cluster: i64,
    score: f64,
}

/// Result of the first pass: the buffered stream and the best score per cluster.
struct Scan {
    buffer: Vec<Buffered>,
    best: HashMap<i64, f64>,
    /// Time spent on buffered bookkeeping, not counting upstream pulls.
    elapsed: Duration,
}

impl KeepHigherQuality {
    pub fn new(config: KeepHigherQualityConfig) -> Self {
        Self {
            config,
            exclusion: None,
            stats: Stats::new("keep_higher_quality"),
        }
    }

    pub fn with_exclusion(mut self, sink: Box<dyn ExclusionSink>) -> Self {
        self.exclusion = Some(sink);
        self
    }

    fn cluster_id(&self, doc: &Document) -> Result<i64> {
        match doc.get(&self.config.cluster_key) {
            None | Some(serde_json::Value::Null) => Ok(SINGLETON_CLUSTER),
            Some(value) => value.as_i64().ok_or_else(|| {
                Error::invalid_field(
                    &self.config.cluster_key,
                    format!("must be an integer, got {value}"),
                    doc.id.as_deref(),
                )
            }),
        }
    }

    fn quality_score(&self, doc: &Document) -> Result<f64> {
        let score = match doc.get(&self.config.score_key) {
            None | Some(serde_json::Value::Null) => self
                .config
                .default_quality_score
                .ok_or_else(|| Error::missing_field(&self.config.score_key, doc.id.as_deref()))?,
            Some(value) => value.as_f64().ok_or_else(|| {
                Error::invalid_field(
                    &self.config.score_key,
                    format!("must be a number, got {value}"),
                    doc.id.as_deref(),
                )
            })?,
        };
        if score.is_nan() {
            return Err(Error::invalid_field(
                &self.config.score_key,
                "is NaN",
                doc.id.as_deref(),
            ));
        }
        Ok(score)
    }

    /// First pass: drain the input, remembering the best score of every cluster.
    fn scan(&self, data: DocumentStream<'_>) -> Result<Scan> {
        let mut buffer = Vec::new();
        let mut best: HashMap<i64, f64> = HashMap::new();
        let mut elapsed = Duration::ZERO;

        for doc in data {
            let doc = doc?;
            let start = Instant::now();
            if let Some(limit) = self.config.max_buffered_documents {
                if buffer.len() >= limit {
                    return Err(Error::BufferLimitExceeded {
                        step: self.stats.name.clone(),
                        limit,
                    });
                }
            }

            let cluster = self.cluster_id(&doc)?;
            let score = if cluster == SINGLETON_CLUSTER {
                0.0
            } else {
                let score = self.quality_score(&doc)?;
                best.entry(cluster)
                    .and_modify(|max| {
                        if score > *max {
                            *max = score;
                        }
                    })
                    .or_insert(score);
                score
            };
            buffer.push(Buffered {
                doc,
                cluster,
                score,
            });
            elapsed += start.elapsed();
        }

        tracing::debug!(
            documents = buffer.len(),
            clusters = best.len(),
            "buffered input for cluster resolution"
        );
        Ok(Scan {
            buffer,
            best,
            elapsed,
        })
    }
}

impl PipelineStep for KeepHigherQuality {
    fn name(&self) -> &str {
        &self.stats.name
    }

    fn run<'a>(&'a mut self, data: DocumentStream<'a>, rank: usize) -> DocumentStream<'a> {
        Box::new(ResolverRun {
            state: State::Pending(data),
            resolver: self,
            rank,
        })
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}

enum State<'a> {
    Pending(DocumentStream<'a>),
    Emitting {
        docs: std::vec::IntoIter<Buffered>,
        best: HashMap<i64, f64>,
        yielded: HashSet<i64>,
    },
    Done,
}

struct ResolverRun<'a> {
    state: State<'a>,
    resolver: &'a mut KeepHigherQuality,
    rank: usize,
}

impl ResolverRun<'_> {
    fn drop_document(&mut self, mut doc: Document, reason: &str) -> Result<()> {
        let stats = &mut self.resolver.stats;
        stats.update(hints::DROPPED);
        stats.update(&format!("dropped_{reason}"));
        doc.set_str(FILTER_REASON_KEY, reason);
        if let Some(sink) = self.resolver.exclusion.as_deref_mut() {
            sink.write(doc, self.rank)?;
        }
        Ok(())
    }

    /// Second pass: the next document to emit, routing skipped ones to the sink.
    fn next_survivor(&mut self) -> Result<Option<Document>> {
        loop {
            let State::Emitting {
                docs,
                best,
                yielded,
            } = &mut self.state
            else {
                return Ok(None);
            };
            let Some(Buffered {
                doc,
                cluster,
                score,
            }) = docs.next()
            else {
                return Ok(None);
            };

            self.resolver.stats.update(hints::TOTAL);

            let keep = if cluster == SINGLETON_CLUSTER {
                true
            } else if yielded.contains(&cluster) {
                false
            } else if best.get(&cluster) == Some(&score) {
                yielded.insert(cluster);
                true
            } else {
                false
            };

            if keep {
                self.resolver.stats.update(hints::FORWARDED);
                self.resolver.stats.update_doc(&doc);
                return Ok(Some(doc));
            }

            let reason = if best.get(&cluster) == Some(&score) {
                CLUSTER_ALREADY_KEPT
            } else {
                LOWER_QUALITY
            };
            self.drop_document(doc, reason)?;
        }
    }

    fn close_exclusion(&mut self) -> Result<()> {
        match self.resolver.exclusion.take() {
            Some(mut sink) => sink.close(),
            None => Ok(()),
        }
    }

    fn fail(&mut self, e: Error) -> Option<Result<Document>> {
        self.state = State::Done;
        if let Err(close_err) = self.close_exclusion() {
            tracing::warn!(error = %close_err, "failed to close exclusion sink");
        }
        Some(Err(e))
    }
}

impl Iterator for ResolverRun<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if let State::Pending(_) = self.state {
            let State::Pending(data) = std::mem::replace(&mut self.state, State::Done) else {
                return None;
            };
            match self.resolver.scan(data) {
                Ok(Scan {
                    buffer,
                    best,
                    elapsed,
                }) => {
                    self.resolver.stats.add_time(elapsed);
                    self.resolver.stats.update_by("clusters", best.len() as u64);
                    self.state = State::Emitting {
                        docs: buffer.into_iter(),
                        best,
                        yielded: HashSet::new(),
                    };
                }
                Err(e) => return self.fail(e),
            }
        }

        let start = Instant::now();
        let next = self.next_survivor();
        self.resolver.stats.add_time(start.elapsed());
        match next {
            Ok(Some(doc)) => Some(Ok(doc)),
            Ok(None) => {
                if matches!(self.state, State::Done) {
                    return None;
                }
                self.state = State::Done;
                tracing::debug!(stats = %self.resolver.stats, "cluster resolution finished");
                self.close_exclusion().err().map(Err)
            }
            Err(e) => self.fail(e),
        }
    }
}

impl Drop for ResolverRun<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close_exclusion() {
            tracing::warn!(error = %e, "failed to close exclusion sink");
        }
    }
}
