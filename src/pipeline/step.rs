use crate::data::DocumentStream;
use crate::pipeline::Stats;

/// A stage of the pipeline: consumes a document stream, produces a document stream.
///
/// The returned stream borrows the step, so stats can be read once the stream
/// has been consumed (or dropped). Streams are single pass.
pub trait PipelineStep {
    fn name(&self) -> &str;

    fn run<'a>(&'a mut self, data: DocumentStream<'a>, rank: usize) -> DocumentStream<'a>;

    fn stats(&self) -> &Stats;
}
