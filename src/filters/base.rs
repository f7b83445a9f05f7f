use crate::data::Document;
use crate::filters::FilterResult;
use crate::Result;

/// A keep/drop decision over documents.
/// Filters decide per document whether it is kept (forwarded) or dropped.
///
/// Every filter is driven one batch at a time through [`Filter::filter_batch`].
/// The default implementation maps [`Filter::filter`] over the batch; filters
/// that genuinely process a batch at once override it and return `true`
/// from [`Filter::is_batch_native`].
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    /// Decide for a single document. The document may be rewritten in place.
    fn filter(&self, doc: &mut Document) -> Result<FilterResult>;

    /// Decide for a batch. Must return exactly one result per document, in order.
    fn filter_batch(&self, batch: &mut [Document]) -> Result<Vec<FilterResult>> {
        batch.iter_mut().map(|doc| self.filter(doc)).collect()
    }

    fn is_batch_native(&self) -> bool {
        false
    }
}
