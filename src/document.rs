// src/document.rs
// Ordered named-field container: the unit of flow between stages

use crate::error::{DocFlowError, Result};
use crate::field_path::FieldPath;
use crate::value::Value;
use serde::ser::{Serialize, Serializer};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An ordered map of field name to value
///
/// Field insertion order is preserved and duplicate names are rejected on
/// construction. Documents are shared between stages behind `Arc`s and must
/// be treated as immutable once emitted; stages that reshape a document
/// build a new one, reusing subtrees where possible.
#[derive(Debug, Clone, Default)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Document {
        Document { fields: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Document {
        Document {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Build a document from (name, value) pairs, rejecting duplicates
    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Result<Document> {
        let mut doc = Document::with_capacity(pairs.len());
        for (name, value) in pairs {
            doc.push_field(name, value)?;
        }
        Ok(doc)
    }

    /// Append a field; fails with DuplicateField if the name exists
    pub fn push_field(&mut self, name: impl Into<String>, value: Value) -> Result<()> {
        let name = name.into();
        if self.fields.iter().any(|(n, _)| n == &name) {
            return Err(DocFlowError::DuplicateField(name));
        }
        self.fields.push((name, value));
        Ok(())
    }

    /// Replace a field in place, or append it if absent
    ///
    /// Used by computed projections, which overwrite by contract.
    pub fn set_field(&mut self, name: &str, value: Value) {
        for (n, v) in self.fields.iter_mut() {
            if n == name {
                *v = value;
                return;
            }
        }
        self.fields.push((name.to_string(), value));
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Top-level field lookup; None means the field is missing
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Navigate a dotted path; None means missing
    ///
    /// Intermediate segments navigate sub-documents; a numeric segment
    /// indexes into an array ("items.0.name").
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        let mut value = self.get(path.head())?;
        for segment in &path.segments()[1..] {
            value = match value {
                Value::Document(doc) => doc.get(segment)?,
                Value::Array(items) => {
                    let index: usize = segment.parse().ok()?;
                    items.get(index)?
                }
                _ => return None,
            };
        }
        Some(value)
    }

    /// Iterate fields in insertion order
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter().map(|(n, v)| (n, v))
    }

    /// Partial deep clone along `path`
    ///
    /// Every sub-document on the path is cloned fresh so the result can
    /// diverge from the input; all untouched subtrees are shared. The final
    /// field is set to `value`, or removed when `value` is None. Segments
    /// that don't navigate to a sub-document leave the field untouched.
    pub fn replace_at_path(&self, path: &FieldPath, value: Option<Value>) -> Document {
        self.replace_segments(path.segments(), value.as_ref())
    }

    fn replace_segments(&self, segments: &[String], value: Option<&Value>) -> Document {
        let mut out = Document::with_capacity(self.fields.len());
        for (name, field_value) in &self.fields {
            if name != &segments[0] {
                out.fields.push((name.clone(), field_value.clone()));
                continue;
            }
            if segments.len() == 1 {
                if let Some(v) = value {
                    out.fields.push((name.clone(), v.clone()));
                }
                // None removes the field
            } else if let Value::Document(sub) = field_value {
                let replaced = sub.replace_segments(&segments[1..], value);
                out.fields
                    .push((name.clone(), Value::Document(Arc::new(replaced))));
            } else {
                out.fields.push((name.clone(), field_value.clone()));
            }
        }
        out
    }

    /// Apply a pure-include path set, preserving nested structure
    ///
    /// Used for the dependency-derived projection a cursor source applies.
    /// Output field order follows this document's field order; `_id` is
    /// carried iff `include_id`.
    pub fn project_paths(&self, paths: &[FieldPath], include_id: bool) -> Document {
        let mut out = Document::new();
        for (name, value) in &self.fields {
            if name == "_id" {
                if include_id {
                    out.fields.push((name.clone(), value.clone()));
                }
                continue;
            }
            // Paths that select this field exactly, and sub-paths under it
            let mut whole = false;
            let mut sub_paths: Vec<FieldPath> = Vec::new();
            for path in paths {
                if path.head() == name {
                    match path.tail() {
                        None => whole = true,
                        Some(tail) => sub_paths.push(tail),
                    }
                }
            }
            if whole {
                out.fields.push((name.clone(), value.clone()));
            } else if !sub_paths.is_empty() {
                if let Value::Document(sub) = value {
                    let projected = sub.project_paths(&sub_paths, true);
                    if !projected.is_empty() {
                        out.fields
                            .push((name.clone(), Value::Document(Arc::new(projected))));
                    }
                }
            }
        }
        out
    }

    /// Parse a JSON object into a document
    pub fn from_json(json: &serde_json::Value) -> Result<Document> {
        let object = json.as_object().ok_or_else(|| {
            DocFlowError::TypeMismatch(format!("expected an object, got {}", json))
        })?;
        let mut doc = Document::with_capacity(object.len());
        for (name, value) in object {
            doc.push_field(name.clone(), Value::from_json(value)?)?;
        }
        Ok(doc)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Document) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|((an, av), (bn, bv))| an == bn && av == bv)
    }
}

impl Eq for Document {}

impl Hash for Document {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (name, value) in &self.fields {
            name.hash(state);
            value.hash(state);
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
