// src/aggregation/source.rs
//! Source stages: where documents enter a pipeline
//!
//! `ArraySource` wraps an in-memory array, `CursorSource` wraps a storage
//! cursor (holding its read lock), and `ShardsSource` flattens the per-shard
//! outputs a coordinator collected.

use crate::cursor::DocumentCursor;
use crate::dependency::{DependencyTracker, Projection};
use crate::document::Document;
use crate::error::{DocFlowError, Result};
use crate::value::Value;
use crate::{log_debug, log_trace, log_warn};
use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{RawRwLock, RwLock};
use std::fmt;
use std::sync::Arc;

/// Source over a literal array of documents
pub struct ArraySource {
    documents: Vec<Arc<Document>>,
    position: usize,
}

impl ArraySource {
    pub fn from_documents(documents: Vec<Arc<Document>>) -> ArraySource {
        ArraySource {
            documents,
            position: 0,
        }
    }

    /// Wrap an array value; every element must itself be a document
    pub fn from_value(value: &Value) -> Result<ArraySource> {
        let items = value.as_array().ok_or_else(|| {
            DocFlowError::TypeMismatch(format!(
                "array source requires an array, got {}",
                value.type_name()
            ))
        })?;
        let mut documents = Vec::with_capacity(items.len());
        for item in items.iter() {
            match item {
                Value::Document(doc) => documents.push(Arc::clone(doc)),
                other => {
                    return Err(DocFlowError::TypeMismatch(format!(
                        "array source elements must be documents, got {}",
                        other.type_name()
                    )))
                }
            }
        }
        Ok(ArraySource::from_documents(documents))
    }

    pub(crate) fn pull(&mut self) -> Result<Option<Arc<Document>>> {
        match self.documents.get(self.position) {
            Some(doc) => {
                self.position += 1;
                Ok(Some(Arc::clone(doc)))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn serialize(&self) -> serde_json::Value {
        serde_json::json!({ "count": self.documents.len() })
    }
}

impl fmt::Debug for ArraySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArraySource")
            .field("count", &self.documents.len())
            .field("position", &self.position)
            .finish()
    }
}

/// A read lock over the scanned collection, held for a cursor's lifetime
pub type CollectionReadGuard = ArcRwLockReadGuard<RawRwLock, ()>;

/// Source over an external storage cursor
///
/// Holds the collection read lock until disposed; `dispose()` is the only
/// way to release it early. Query and sort descriptions are recorded for
/// explain only. At most one projection may be pushed in by dependency
/// analysis.
pub struct CursorSource {
    cursor: Option<Box<dyn DocumentCursor>>,
    lock: Option<CollectionReadGuard>,
    query: Option<serde_json::Value>,
    sort: Option<serde_json::Value>,
    projection: Option<Projection>,
}

impl CursorSource {
    pub fn new(cursor: Box<dyn DocumentCursor>, lock: &Arc<RwLock<()>>) -> CursorSource {
        CursorSource {
            cursor: Some(cursor),
            lock: Some(RwLock::read_arc(lock)),
            query: None,
            sort: None,
            projection: None,
        }
    }

    /// Record the originating query, for explain
    pub fn set_query(&mut self, query: serde_json::Value) {
        self.query = Some(query);
    }

    /// Record the originating sort, for explain
    pub fn set_sort(&mut self, sort: serde_json::Value) {
        self.sort = Some(sort);
    }

    /// Install the dependency-derived projection; a second installation is
    /// a programming error
    pub fn push_projection(&mut self, projection: Projection) -> Result<()> {
        if self.projection.is_some() {
            return Err(DocFlowError::AlreadyBound("cursor projection"));
        }
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.push_projection(projection.clone());
        }
        self.projection = Some(projection);
        Ok(())
    }

    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    pub(crate) fn pull(&mut self) -> Result<Option<Arc<Document>>> {
        let cursor = match self.cursor.as_mut() {
            Some(c) => c,
            // Disposed: nothing more to produce
            None => return Ok(None),
        };
        match cursor.next() {
            Ok(Some(doc)) => Ok(Some(Arc::new(doc))),
            Ok(None) => Ok(None),
            Err(e) => {
                if e == DocFlowError::CursorInvalidated {
                    log_warn!("storage cursor invalidated during yield");
                }
                Err(e)
            }
        }
    }

    pub(crate) fn manage_dependencies(&mut self, tracker: &mut DependencyTracker) {
        if let Some(projection) = tracker.to_projection() {
            match self.push_projection(projection) {
                Ok(()) => log_debug!("pushed dependency projection into cursor"),
                Err(_) => log_warn!("cursor already carries a projection; pushdown skipped"),
            }
        }
    }

    /// Release the cursor and the read lock; iteration afterwards is eof
    pub(crate) fn dispose(&mut self) {
        self.cursor = None;
        self.lock = None;
    }

    pub(crate) fn serialize(&self) -> serde_json::Value {
        let mut view = serde_json::Map::new();
        if let Some(query) = &self.query {
            view.insert("query".to_string(), query.clone());
        }
        if let Some(sort) = &self.sort {
            view.insert("sort".to_string(), sort.clone());
        }
        if let Some(projection) = &self.projection {
            view.insert("projection".to_string(), projection.to_json());
        }
        serde_json::Value::Object(view)
    }
}

impl fmt::Debug for CursorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorSource")
            .field("live", &self.cursor.is_some())
            .field("query", &self.query)
            .field("projection", &self.projection)
            .finish()
    }
}

/// Source over the per-shard result arrays a coordinator gathered
///
/// Iterates shard by shard in the given order, flattening each shard's
/// output through an inner [`ArraySource`].
#[derive(Debug)]
pub struct ShardsSource {
    shards: std::vec::IntoIter<(String, Vec<Arc<Document>>)>,
    shard_count: usize,
    inner: Option<ArraySource>,
}

impl ShardsSource {
    pub fn new(shards: Vec<(String, Vec<Arc<Document>>)>) -> ShardsSource {
        ShardsSource {
            shard_count: shards.len(),
            shards: shards.into_iter(),
            inner: None,
        }
    }

    pub(crate) fn pull(&mut self) -> Result<Option<Arc<Document>>> {
        loop {
            if let Some(inner) = self.inner.as_mut() {
                if let Some(doc) = inner.pull()? {
                    return Ok(Some(doc));
                }
            }
            match self.shards.next() {
                Some((shard_id, documents)) => {
                    log_trace!("draining results from shard {}", shard_id);
                    self.inner = Some(ArraySource::from_documents(documents));
                }
                None => return Ok(None),
            }
        }
    }

    pub(crate) fn serialize(&self) -> serde_json::Value {
        serde_json::json!({ "shards": self.shard_count })
    }
}
