use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::data::Document;

/// Well known counter names shared by every step.
pub mod hints {
    pub const TOTAL: &str = "total";
    pub const FORWARDED: &str = "forwarded";
    pub const DROPPED: &str = "dropped";
    pub const BATCHES: &str = "batches";
}

/// Running summary of a numeric per-document metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub total: f64,
    pub n: u64,
    pub min: f64,
    pub max: f64,
}

impl MetricSummary {
    pub fn update(&mut self, value: f64) {
        if self.n == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.total += value;
        self.n += 1;
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.total / self.n as f64
        }
    }

    pub fn merge(&mut self, other: &MetricSummary) {
        if other.n == 0 {
            return;
        }
        if self.n == 0 {
            *self = *other;
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.total += other.total;
        self.n += other.n;
    }
}

/// Statistics owned by one step for the lifetime of its run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub name: String,
    pub counters: BTreeMap<String, u64>,
    pub doc_len: MetricSummary,
    /// Time spent inside the step, in nanoseconds.
    pub time_ns: u64,
}

impl Stats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn update(&mut self, key: &str) {
        self.update_by(key, 1);
    }

    pub fn update_by(&mut self, key: &str, by: u64) {
        *self.counters.entry(key.to_string()).or_insert(0) += by;
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    /// Per-document hook for documents leaving the step.
    pub fn update_doc(&mut self, doc: &Document) {
        self.doc_len.update(doc.char_len() as f64);
    }

    pub fn add_time(&mut self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.time_ns = self.time_ns.saturating_add(nanos);
    }

    pub fn time(&self) -> Duration {
        Duration::from_nanos(self.time_ns)
    }

    pub fn time_ms(&self) -> f64 {
        self.time_ns as f64 / 1e6
    }

    /// Fold the stats of the same step run on another shard into this one.
    pub fn merge(&mut self, other: &Stats) {
        for (key, value) in &other.counters {
            self.update_by(key, *value);
        }
        self.doc_len.merge(&other.doc_len);
        self.time_ns = self.time_ns.saturating_add(other.time_ns);
    }
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.name)?;
        for (key, value) in &self.counters {
            write!(f, " {}={}", key, value)?;
        }
        if self.doc_len.n > 0 {
            write!(f, " doc_len.mean={:.1}", self.doc_len.mean())?;
        }
        write!(f, " time={:.3}ms", self.time_ms())?;
        Ok(())
    }
}

/// Stats for a whole pipeline, one entry per step, in step order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub pipeline_name: String,
    pub steps: Vec<Stats>,
}

impl PipelineStats {
    pub fn new(pipeline_name: impl Into<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            steps: Vec::new(),
        }
    }

    /// Merge one shard's per-step stats; steps are matched by position.
    pub fn merge_shard(&mut self, shard: Vec<Stats>) {
        if self.steps.is_empty() {
            self.steps = shard;
            return;
        }
        for (acc, stats) in self.steps.iter_mut().zip(shard.iter()) {
            acc.merge(stats);
        }
    }

    pub fn write_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> crate::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut stats = Stats::new("f");
        stats.update(hints::TOTAL);
        stats.update(hints::TOTAL);
        stats.update_by("dropped_x", 3);
        assert_eq!(stats.get(hints::TOTAL), 2);
        assert_eq!(stats.get("dropped_x"), 3);
        assert_eq!(stats.get("missing"), 0);
    }

    #[test]
    fn doc_len_summary_tracks_min_max_mean() {
        let mut stats = Stats::new("f");
        stats.update_doc(&Document::new("abcd"));
        stats.update_doc(&Document::new("ab"));
        assert_eq!(stats.doc_len.n, 2);
        assert_eq!(stats.doc_len.min, 2.0);
        assert_eq!(stats.doc_len.max, 4.0);
        assert_eq!(stats.doc_len.mean(), 3.0);
    }

    #[test]
    fn sub_millisecond_timings_accumulate() {
        let mut stats = Stats::new("f");
        for _ in 0..1000 {
            stats.add_time(Duration::from_micros(900));
        }
        assert_eq!(stats.time(), Duration::from_millis(900));
        assert_eq!(stats.time_ms(), 900.0);

        let mut other = Stats::new("f");
        other.add_time(Duration::from_nanos(1500));
        stats.merge(&other);
        assert_eq!(stats.time_ns, 900_000_000 + 1500);
    }

    #[test]
    fn merge_shards_by_position() {
        let mut a = Stats::new("f");
        a.update_by(hints::TOTAL, 4);
        a.update_doc(&Document::new("xyz"));
        let mut b = Stats::new("f");
        b.update_by(hints::TOTAL, 6);
        b.update_by(hints::DROPPED, 1);

        let mut pipeline = PipelineStats::new("p");
        pipeline.merge_shard(vec![a]);
        pipeline.merge_shard(vec![b]);

        let merged = &pipeline.steps[0];
        assert_eq!(merged.get(hints::TOTAL), 10);
        assert_eq!(merged.get(hints::DROPPED), 1);
        assert_eq!(merged.doc_len.n, 1);
    }
}
