mod filter_step;
pub mod stats;
mod step;

pub use filter_step::FilterStep;
pub use stats::{hints, PipelineStats, Stats};
pub use step::PipelineStep;

use crate::data::DocumentStream;

/// An ordered chain of steps; each step consumes the stream of the one before it.
pub struct Pipeline {
    name: String,
    steps: Vec<Box<dyn PipelineStep>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: impl PipelineStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn push(&mut self, step: Box<dyn PipelineStep>) {
        self.steps.push(step);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Chain every step over `data`. Nothing is pulled until the returned stream is.
    pub fn run<'a>(&'a mut self, data: DocumentStream<'a>, rank: usize) -> DocumentStream<'a> {
        let mut stream = data;
        for step in self.steps.iter_mut() {
            stream = step.run(stream, rank);
        }
        stream
    }

    /// Per-step stats in step order.
    pub fn stats(&self) -> Vec<Stats> {
        self.steps.iter().map(|step| step.stats().clone()).collect()
    }
}
