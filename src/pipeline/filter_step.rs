use std::collections::VecDeque;
use std::time::Instant;

use crate::data::{Document, DocumentStream, FILTER_REASON_KEY};
use crate::filters::Filter;
use crate::io::ExclusionSink;
use crate::pipeline::stats::hints;
use crate::pipeline::{PipelineStep, Stats};
use crate::{Error, Result};

/// Drives a [`Filter`] over a document stream.
///
/// Documents are pulled in contiguous batches of `batch_size`, decided, annotated
/// with the filter's threshold map, counted, and either forwarded (in input order)
/// or routed to the exclusion sink.
pub struct FilterStep {
    filter: Box<dyn Filter>,
    batch_size: usize,
    exclusion: Option<Box<dyn ExclusionSink>>,
    stats: Stats,
}

impl FilterStep {
    pub fn new(filter: impl Filter + 'static) -> Self {
        Self::from_boxed(Box::new(filter))
    }

    pub fn from_boxed(filter: Box<dyn Filter>) -> Self {
        let stats = Stats::new(filter.name());
        Self {
            filter,
            batch_size: 1,
            exclusion: None,
            stats,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config(format!(
                "batch_size for '{}' must be >= 1",
                self.filter.name()
            )));
        }
        if batch_size > 1 && !self.filter.is_batch_native() {
            tracing::warn!(
                filter = self.filter.name(),
                batch_size,
                "batch_size > 1 but filter does not implement a batch-native decision"
            );
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn with_exclusion(mut self, sink: Box<dyn ExclusionSink>) -> Self {
        self.exclusion = Some(sink);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl PipelineStep for FilterStep {
    fn name(&self) -> &str {
        self.filter.name()
    }

    fn run<'a>(&'a mut self, data: DocumentStream<'a>, rank: usize) -> DocumentStream<'a> {
        let FilterStep {
            filter,
            batch_size,
            exclusion,
            stats,
        } = self;

        Box::new(FilterRun {
            upstream: data,
            filter: &**filter,
            batch_size: *batch_size,
            exclusion: exclusion.as_deref_mut(),
            stats,
            rank,
            ready: VecDeque::new(),
            failed: None,
            done: false,
        })
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}

struct FilterRun<'a> {
    upstream: DocumentStream<'a>,
    filter: &'a dyn Filter,
    batch_size: usize,
    exclusion: Option<&'a mut (dyn ExclusionSink + 'static)>,
    stats: &'a mut Stats,
    rank: usize,
    ready: VecDeque<Document>,
    /// Failure to yield once the documents queued ahead of it are drained.
    failed: Option<Error>,
    done: bool,
}

impl FilterRun<'_> {
    /// Pull and route one batch. Returns `false` once upstream is exhausted.
    ///
    /// Errors are stashed in `failed` rather than returned, so that documents
    /// kept before the failing point still come out ahead of the error.
    fn process_next_batch(&mut self) -> bool {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.upstream.next() {
                Some(Ok(doc)) => batch.push(doc),
                Some(Err(e)) => {
                    self.failed = Some(e);
                    break;
                }
                None => break,
            }
        }
        if batch.is_empty() {
            return self.failed.is_some();
        }
        if let Err(e) = self.route_batch(batch) {
            // Routing covers documents that precede any upstream failure.
            self.failed = Some(e);
        }
        true
    }

    /// Decide one batch, queue kept documents and hand dropped ones to the sink.
    /// On error the rest of the batch is discarded.
    fn route_batch(&mut self, mut batch: Vec<Document>) -> Result<()> {
        if self.batch_size > 1 {
            self.stats.update(hints::BATCHES);
        }
        let start = Instant::now();
        let results = self.filter.filter_batch(&mut batch)?;
        self.stats.add_time(start.elapsed());

        if results.len() != batch.len() {
            return Err(Error::Filter {
                filter: self.filter.name().to_string(),
                reason: format!(
                    "returned {} results for a batch of {} documents",
                    results.len(),
                    batch.len()
                ),
            });
        }

        for (mut doc, result) in batch.into_iter().zip(results) {
            self.stats.update(hints::TOTAL);
            let (keep, reason, thresholds) = result.into_parts();

            if let Some(thresholds) = &thresholds {
                doc.merge_filter_values(thresholds);
            }

            if keep {
                self.stats.update(hints::FORWARDED);
                self.stats.update_doc(&doc);
                self.ready.push_back(doc);
            } else {
                self.stats.update(hints::DROPPED);
                if let Some(reason) = reason {
                    self.stats.update(&format!("dropped_{reason}"));
                    doc.set_str(FILTER_REASON_KEY, reason);
                }
                if let Some(sink) = self.exclusion.as_deref_mut() {
                    sink.write(doc, self.rank)?;
                }
            }
        }
        Ok(())
    }

    fn close_exclusion(&mut self) -> Result<()> {
        match self.exclusion.take() {
            Some(sink) => sink.close(),
            None => Ok(()),
        }
    }
}

impl Iterator for FilterRun<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(doc) = self.ready.pop_front() {
                return Some(Ok(doc));
            }
            if let Some(e) = self.failed.take() {
                self.done = true;
                if let Err(close_err) = self.close_exclusion() {
                    tracing::warn!(error = %close_err, "failed to close exclusion sink");
                }
                return Some(Err(e));
            }
            if self.done {
                return None;
            }
            if !self.process_next_batch() {
                self.done = true;
                tracing::debug!(stats = %self.stats, "filter finished");
                return self.close_exclusion().err().map(Err);
            }
        }
    }
}

impl Drop for FilterRun<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close_exclusion() {
            tracing::warn!(error = %e, "failed to close exclusion sink");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{FilterResult, ThresholdMap};
    use crate::io::MemorySink;

    /// Keeps documents whose text length is even, dropping odd ones with a reason.
    struct EvenLength;

    impl Filter for EvenLength {
        fn name(&self) -> &str {
            "even_length"
        }

        fn filter(&self, doc: &mut Document) -> Result<FilterResult> {
            let len = doc.char_len();
            let mut values = ThresholdMap::new();
            values.insert("len".to_string(), len as f64);
            let reason = (len % 2 == 1).then(|| "odd".to_string());
            Ok((len % 2 == 0, values, reason).into())
        }
    }

    struct Failing;

    impl Filter for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn filter(&self, doc: &mut Document) -> Result<FilterResult> {
            if doc.text == "boom" {
                return Err(Error::Filter {
                    filter: "failing".to_string(),
                    reason: "boom".to_string(),
                });
            }
            Ok(true.into())
        }
    }

    /// Batch-native filter that keeps only the first document of each batch.
    struct FirstOfBatch;

    impl Filter for FirstOfBatch {
        fn name(&self) -> &str {
            "first_of_batch"
        }

        fn filter(&self, _doc: &mut Document) -> Result<FilterResult> {
            Ok(true.into())
        }

        fn filter_batch(&self, batch: &mut [Document]) -> Result<Vec<FilterResult>> {
            Ok((0..batch.len()).map(|i| FilterResult::from(i == 0)).collect())
        }

        fn is_batch_native(&self) -> bool {
            true
        }
    }

    /// Exclusion sink whose storage is always full.
    #[derive(Default)]
    struct FullDisk;

    impl ExclusionSink for FullDisk {
        fn write(&mut self, _doc: Document, _rank: usize) -> Result<()> {
            Err(Error::Config("disk full".to_string()))
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn stream<'a>(texts: &[&str]) -> DocumentStream<'a> {
        let docs: Vec<Result<Document>> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Ok(Document::new(*t).with_id(i.to_string())))
            .collect();
        Box::new(docs.into_iter())
    }

    #[test]
    fn keeps_order_and_routes_drops_to_sink() {
        let sink = MemorySink::new();
        let mut step = FilterStep::new(EvenLength).with_exclusion(Box::new(sink.clone()));

        let kept: Vec<Document> = step
            .run(stream(&["ab", "abc", "abcd", "a"]), 3)
            .collect::<Result<_>>()
            .unwrap();

        let texts: Vec<&str> = kept.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["ab", "abcd"]);
        assert_eq!(kept[1].filter_value("len"), Some(4.0));

        let excluded = sink.documents();
        assert_eq!(excluded.len(), 2);
        assert_eq!(excluded[0].0.text, "abc");
        assert_eq!(excluded[0].0.filter_reason(), Some("odd"));
        assert_eq!(excluded[0].0.filter_value("len"), Some(3.0));
        assert_eq!(excluded[0].1, 3);
        assert!(sink.is_closed());

        let stats = step.stats();
        assert_eq!(stats.get(hints::TOTAL), 4);
        assert_eq!(stats.get(hints::FORWARDED), 2);
        assert_eq!(stats.get(hints::DROPPED), 2);
        assert_eq!(stats.get("dropped_odd"), 2);
        assert_eq!(stats.get(hints::BATCHES), 0);
        assert_eq!(stats.doc_len.n, 2);
    }

    #[test]
    fn batch_size_three_over_seven_documents() {
        let mut step = FilterStep::new(EvenLength).with_batch_size(3).unwrap();
        let texts = ["aa", "bb", "cc", "dd", "ee", "ff", "gg"];

        let kept: Vec<Document> = step.run(stream(&texts), 0).collect::<Result<_>>().unwrap();

        assert_eq!(kept.len(), 7);
        assert_eq!(step.stats().get(hints::BATCHES), 3);
        assert_eq!(step.stats().get(hints::TOTAL), 7);
    }

    #[test]
    fn total_is_independent_of_batch_size() {
        for batch_size in 1..=8 {
            let mut step = FilterStep::new(EvenLength)
                .with_batch_size(batch_size)
                .unwrap();
            let count = step
                .run(stream(&["a", "bb", "ccc", "dddd", "eeeee"]), 0)
                .count();
            assert_eq!(count, 2);
            assert_eq!(step.stats().get(hints::TOTAL), 5);
        }
    }

    #[test]
    fn batch_native_filter_sees_whole_batches() {
        let mut step = FilterStep::new(FirstOfBatch).with_batch_size(2).unwrap();
        let kept: Vec<Document> = step
            .run(stream(&["a", "b", "c", "d", "e"]), 0)
            .collect::<Result<_>>()
            .unwrap();
        let texts: Vec<&str> = kept.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "c", "e"]);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(matches!(
            FilterStep::new(EvenLength).with_batch_size(0),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn decision_error_aborts_stream_and_closes_sink() {
        let sink = MemorySink::new();
        let mut step = FilterStep::new(Failing).with_exclusion(Box::new(sink.clone()));

        let mut out = step.run(stream(&["ok", "boom", "after"]), 0);
        assert_eq!(out.next().unwrap().unwrap().text, "ok");
        assert!(matches!(out.next(), Some(Err(Error::Filter { .. }))));
        assert!(out.next().is_none());
        drop(out);

        assert!(sink.is_closed());
        assert_eq!(step.stats().get(hints::TOTAL), 1);
    }

    #[test]
    fn dropping_stream_early_still_closes_sink() {
        let sink = MemorySink::new();
        let mut step = FilterStep::new(EvenLength).with_exclusion(Box::new(sink.clone()));

        let mut out = step.run(stream(&["a", "bb", "ccc", "dddd"]), 0);
        assert_eq!(out.next().unwrap().unwrap().text, "bb");
        drop(out);

        assert!(sink.is_closed());
    }

    #[test]
    fn upstream_error_propagates() {
        let docs: Vec<Result<Document>> = vec![
            Ok(Document::new("aa")),
            Err(Error::Config("bad input".to_string())),
        ];
        let mut step = FilterStep::new(EvenLength);
        let results: Vec<Result<Document>> = step.run(Box::new(docs.into_iter()), 0).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn sink_failure_comes_after_earlier_documents_of_the_batch() {
        let mut step = FilterStep::new(EvenLength)
            .with_batch_size(3)
            .unwrap()
            .with_exclusion(Box::<FullDisk>::default());

        let results: Vec<Result<Document>> = step.run(stream(&["aa", "a", "bb", "cc"]), 0).collect();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().text, "aa");
        assert!(matches!(&results[1], Err(Error::Config(msg)) if msg == "disk full"));
    }

    #[test]
    fn no_document_follows_an_error() {
        let mut step = FilterStep::new(EvenLength).with_exclusion(Box::<FullDisk>::default());

        let mut out = step.run(stream(&["aa", "bb", "a", "cc", "dd"]), 0);
        assert_eq!(out.next().unwrap().unwrap().text, "aa");
        assert_eq!(out.next().unwrap().unwrap().text, "bb");
        assert!(out.next().unwrap().is_err());
        assert!(out.next().is_none());
        assert!(out.next().is_none());
    }

    #[test]
    fn upstream_error_inside_a_batch_follows_the_documents_before_it() {
        let docs: Vec<Result<Document>> = vec![
            Ok(Document::new("aa")),
            Ok(Document::new("bb")),
            Err(Error::Config("bad input".to_string())),
            Ok(Document::new("cc")),
        ];
        let mut step = FilterStep::new(EvenLength).with_batch_size(3).unwrap();

        let results: Vec<Result<Document>> = step.run(Box::new(docs.into_iter()), 0).collect();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().text, "aa");
        assert_eq!(results[1].as_ref().unwrap().text, "bb");
        assert!(matches!(&results[2], Err(Error::Config(_))));
        assert_eq!(step.stats().get(hints::TOTAL), 2);
    }
}
