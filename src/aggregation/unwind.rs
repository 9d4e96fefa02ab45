// src/aggregation/unwind.rs
//! $unwind: flatten one array field into one output per element
//!
//! For each input document, the configured path is evaluated: missing,
//! null and empty arrays drop the document; a non-array value is a type
//! error; otherwise one output is emitted per element, in array order.
//! Each output is a partial deep clone of the input: every sub-document
//! along the path is cloned fresh so the clones stay independent, while
//! untouched subtrees are shared with the input.

use crate::aggregation::stage::Stage;
use crate::dependency::DependencyTracker;
use crate::document::Document;
use crate::error::{DocFlowError, Result};
use crate::field_path::FieldPath;
use crate::value::Value;
use std::sync::Arc;

/// Iteration state: the input being unwound and the next element index
#[derive(Debug)]
struct Unwinding {
    input: Arc<Document>,
    array: Arc<Vec<Value>>,
    index: usize,
}

/// $unwind stage state
#[derive(Debug)]
pub struct UnwindStage {
    path: FieldPath,
    active: Option<Unwinding>,
}

impl UnwindStage {
    pub fn new(path: FieldPath) -> UnwindStage {
        UnwindStage { path, active: None }
    }

    /// Parse the `"$path"` string of an `{$unwind: ...}` stage
    pub fn parse(spec: &serde_json::Value) -> Result<UnwindStage> {
        let reference = spec.as_str().ok_or_else(|| {
            DocFlowError::InvalidPipeline(
                "$unwind requires a $-prefixed field path string".to_string(),
            )
        })?;
        let path = FieldPath::parse_ref(reference)
            .map_err(|e| DocFlowError::InvalidPipeline(e.to_string()))?;
        Ok(UnwindStage::new(path))
    }

    pub(crate) fn pull(&mut self, source: &mut Stage) -> Result<Option<Arc<Document>>> {
        loop {
            // Keep emitting elements of the array being unwound
            if let Some(active) = self.active.as_mut() {
                if let Some(element) = active.array.get(active.index) {
                    active.index += 1;
                    let clone = active
                        .input
                        .replace_at_path(&self.path, Some(element.clone()));
                    return Ok(Some(Arc::new(clone)));
                }
                self.active = None;
            }

            // Need the next input document
            let input = match source.next_document()? {
                Some(doc) => doc,
                None => return Ok(None),
            };
            match input.get_path(&self.path) {
                // Missing and null drop the document
                None | Some(Value::Null) => continue,
                Some(Value::Array(items)) => {
                    // An empty array also drops the document
                    let array = Arc::clone(items);
                    self.active = Some(Unwinding {
                        input,
                        array,
                        index: 0,
                    });
                }
                Some(other) => {
                    return Err(DocFlowError::TypeMismatch(format!(
                        "$unwind of {} requires an array, got {}",
                        self.path,
                        other.type_name()
                    )))
                }
            }
        }
    }

    pub(crate) fn manage_dependencies(&self, tracker: &mut DependencyTracker) {
        tracker.add_path(&self.path);
    }

    pub(crate) fn serialize(&self) -> serde_json::Value {
        serde_json::Value::String(format!("${}", self.path))
    }
}
