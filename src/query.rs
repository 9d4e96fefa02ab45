// src/query.rs
//! Match predicates over documents
//!
//! A [`Query`] wraps a find-style predicate. The actual matching lives in
//! the `operators` submodule, where each `$`-operator is registered
//! separately; this type keeps the raw specification alongside the compiled
//! form so predicates can be serialized back out (for explain, for fusing
//! two `$match` stages, and for handing the predicate to a cursor natively).

pub mod operators;

use crate::dependency::DependencyTracker;
use crate::document::Document;
use crate::error::{DocFlowError, Result};
use crate::field_path::FieldPath;

pub use operators::matches_filter;

/// A compiled match predicate
#[derive(Debug, Clone)]
pub struct Query {
    /// The predicate as specified (find-predicate grammar)
    raw: serde_json::Value,
    /// The predicate converted to the document model
    filter: Document,
}

impl Query {
    /// An empty query matching every document
    pub fn new() -> Query {
        Query {
            raw: serde_json::json!({}),
            filter: Document::new(),
        }
    }

    /// Compile a predicate from its JSON form
    ///
    /// Any `$regex` patterns are compiled here, once, into the shared
    /// pattern cache; matching only takes cache hits. A malformed pattern
    /// is therefore reported before the pipeline starts.
    pub fn from_json(json: &serde_json::Value) -> Result<Query> {
        let filter = Document::from_json(json)
            .map_err(|e| DocFlowError::InvalidQuery(e.to_string()))?;
        precompile_patterns(json)?;
        Ok(Query {
            raw: json.clone(),
            filter,
        })
    }

    /// Test one document against the predicate
    pub fn matches(&self, document: &Document) -> Result<bool> {
        operators::matches_filter(document, &self.filter)
    }

    /// The predicate in its original JSON form
    pub fn to_json(&self) -> &serde_json::Value {
        &self.raw
    }

    /// Fuse with another predicate into a logical and
    pub fn and(&self, other: &Query) -> Result<Query> {
        Query::from_json(&serde_json::json!({
            "$and": [self.raw.clone(), other.raw.clone()]
        }))
    }

    /// Report the field paths the predicate reads
    ///
    /// Walks the raw predicate: plain keys are paths, the logical operators
    /// recurse. A top-level operator this walk doesn't understand poisons
    /// the tracker, since the predicate's reads can no longer be enumerated.
    pub fn add_dependencies(&self, tracker: &mut DependencyTracker) {
        add_filter_dependencies(&self.raw, tracker);
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile every `$regex` pattern in the predicate into the shared cache
fn precompile_patterns(filter: &serde_json::Value) -> Result<()> {
    match filter {
        serde_json::Value::Object(object) => {
            for (key, value) in object {
                if key == "$regex" {
                    if let Some(pattern) = value.as_str() {
                        operators::compiled_regex(pattern)?;
                    }
                } else {
                    precompile_patterns(value)?;
                }
            }
            Ok(())
        }
        serde_json::Value::Array(items) => {
            for item in items {
                precompile_patterns(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn add_filter_dependencies(filter: &serde_json::Value, tracker: &mut DependencyTracker) {
    let object = match filter.as_object() {
        Some(o) => o,
        None => {
            tracker.poison();
            return;
        }
    };
    for (key, value) in object {
        if key.starts_with('$') {
            match key.as_str() {
                "$and" | "$or" | "$nor" => {
                    if let Some(conditions) = value.as_array() {
                        for condition in conditions {
                            add_filter_dependencies(condition, tracker);
                        }
                    } else {
                        tracker.poison();
                    }
                }
                _ => tracker.poison(),
            }
        } else {
            match FieldPath::parse(key) {
                // Operator arguments are relative to the path's value, so
                // the path itself covers every read under this key
                Ok(path) => tracker.add_path(&path),
                Err(_) => tracker.poison(),
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
