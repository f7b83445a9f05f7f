use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::data::Document;
use crate::io::ExclusionSink;
use crate::Result;

/// In-memory exclusion sink. Clones share the same storage, so a caller can
/// hand one clone to a step and inspect the dropped documents through another.
#[derive(Clone, Default)]
pub struct MemorySink {
    documents: Arc<Mutex<Vec<(Document, usize)>>>,
    closed: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of `(document, rank)` pairs written so far.
    pub fn documents(&self) -> Vec<(Document, usize)> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(Document, usize)>> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ExclusionSink for MemorySink {
    fn write(&mut self, doc: Document, rank: usize) -> Result<()> {
        self.lock().push((doc, rank));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
