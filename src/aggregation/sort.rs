// src/aggregation/sort.rs
//! $sort: in-memory sort over the whole input stream
//!
//! Buffers the predecessor on first pull, then emits in order. The
//! comparator applies the cross-type total value order key by key, with
//! missing fields ranking below null; the underlying sort is stable, so
//! ties keep their input order.

use crate::aggregation::stage::Stage;
use crate::dependency::DependencyTracker;
use crate::document::Document;
use crate::error::{DocFlowError, Result};
use crate::field_path::FieldPath;
use std::cmp::Ordering;
use std::sync::Arc;

/// $sort stage state
#[derive(Debug)]
pub struct SortStage {
    /// (key path, ascending) in precedence order
    keys: Vec<(FieldPath, bool)>,
    buffered: Option<Vec<Arc<Document>>>,
    position: usize,
}

impl SortStage {
    /// Parse the `{path: 1|-1, ...}` document of a sort stage; key order is
    /// the sort precedence
    pub fn parse(spec: &serde_json::Value) -> Result<SortStage> {
        let object = spec.as_object().ok_or_else(|| {
            DocFlowError::InvalidPipeline("$sort requires an object".to_string())
        })?;
        if object.is_empty() {
            return Err(DocFlowError::InvalidPipeline(
                "$sort requires at least one key".to_string(),
            ));
        }
        let mut keys = Vec::with_capacity(object.len());
        for (path, direction) in object {
            let ascending = match direction.as_i64() {
                Some(1) => true,
                Some(-1) => false,
                _ => {
                    return Err(DocFlowError::InvalidPipeline(format!(
                        "sort direction for {} must be 1 or -1",
                        path
                    )))
                }
            };
            keys.push((FieldPath::parse(path)?, ascending));
        }
        Ok(SortStage {
            keys,
            buffered: None,
            position: 0,
        })
    }

    pub(crate) fn pull(&mut self, source: &mut Stage) -> Result<Option<Arc<Document>>> {
        if self.buffered.is_none() {
            self.populate(source)?;
        }
        let buffered = self.buffered.as_ref().unwrap();
        match buffered.get(self.position) {
            Some(doc) => {
                self.position += 1;
                Ok(Some(Arc::clone(doc)))
            }
            None => Ok(None),
        }
    }

    fn populate(&mut self, source: &mut Stage) -> Result<()> {
        let mut documents = Vec::new();
        while let Some(doc) = source.next_document()? {
            documents.push(doc);
        }
        let keys = &self.keys;
        // Vec::sort_by is stable: equal keys keep their input order
        documents.sort_by(|a, b| compare_documents(a, b, keys));
        self.buffered = Some(documents);
        Ok(())
    }

    pub(crate) fn manage_dependencies(&self, tracker: &mut DependencyTracker) {
        for (path, _) in &self.keys {
            tracker.add_path(path);
        }
    }

    pub(crate) fn dispose(&mut self) {
        self.buffered = None;
    }

    pub(crate) fn serialize(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (path, ascending) in &self.keys {
            object.insert(
                path.to_string(),
                serde_json::json!(if *ascending { 1 } else { -1 }),
            );
        }
        serde_json::Value::Object(object)
    }
}

fn compare_documents(a: &Document, b: &Document, keys: &[(FieldPath, bool)]) -> Ordering {
    for (path, ascending) in keys {
        let left = a.get_path(path);
        let right = b.get_path(path);
        let ord = match (left, right) {
            // Missing ranks below every present value, like null below all
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x.cmp_total(y),
        };
        let ord = if *ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
