// src/cursor.rs
// Interfaces to the external storage engine: scan cursors and output sinks

use crate::dependency::Projection;
use crate::document::Document;
use crate::error::{DocFlowError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A forward iterator over stored documents, supplied by the storage engine
///
/// A cursor may *yield* internally between pulls (release and reacquire its
/// lock to let writers through). If the underlying data is invalidated
/// during a yield, the next pull fails with `CursorInvalidated` and the
/// pipeline terminates.
pub trait DocumentCursor {
    /// Fetch the next stored document; None when the scan is exhausted
    fn next(&mut self) -> Result<Option<Document>>;

    /// Restrict the cursor to the given fields
    ///
    /// Installed once by dependency pushdown before iteration starts, so
    /// the store materializes only what the pipeline will read.
    fn push_projection(&mut self, projection: Projection);
}

/// A named output collection, supplied by the storage engine for `$out`
pub trait DocumentSink {
    fn write(&mut self, document: &Document) -> Result<()>;
}

/// An in-memory cursor over a fixed set of documents
///
/// Stands in for a real collection scan in tests and embedded use. Supports
/// the same observable behaviors: it honors a pushed projection and reports
/// invalidation through a shared flag that a "writer" can raise between
/// pulls.
pub struct MemoryCursor {
    documents: std::vec::IntoIter<Document>,
    projection: Option<Projection>,
    invalidated: Option<Arc<AtomicBool>>,
}

impl MemoryCursor {
    pub fn new(documents: Vec<Document>) -> MemoryCursor {
        MemoryCursor {
            documents: documents.into_iter(),
            projection: None,
            invalidated: None,
        }
    }

    /// Share an invalidation flag; raising it makes the next pull fail
    pub fn with_invalidation_flag(mut self, flag: Arc<AtomicBool>) -> MemoryCursor {
        self.invalidated = Some(flag);
        self
    }

    /// The projection installed by pushdown, if any
    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }
}

impl DocumentCursor for MemoryCursor {
    fn next(&mut self) -> Result<Option<Document>> {
        if let Some(flag) = &self.invalidated {
            if flag.load(Ordering::Relaxed) {
                return Err(DocFlowError::CursorInvalidated);
            }
        }
        let document = match self.documents.next() {
            Some(d) => d,
            None => return Ok(None),
        };
        match &self.projection {
            Some(projection) => Ok(Some(projection.apply(&document))),
            None => Ok(Some(document)),
        }
    }

    fn push_projection(&mut self, projection: Projection) {
        self.projection = Some(projection);
    }
}

/// A sink that collects written documents in memory
pub struct MemorySink {
    documents: Arc<parking_lot::Mutex<Vec<Document>>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink {
            documents: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    /// Handle for inspecting what was written after the pipeline ran
    pub fn contents(&self) -> Arc<parking_lot::Mutex<Vec<Document>>> {
        Arc::clone(&self.documents)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentSink for MemorySink {
    fn write(&mut self, document: &Document) -> Result<()> {
        self.documents.lock().push(document.clone());
        Ok(())
    }
}
