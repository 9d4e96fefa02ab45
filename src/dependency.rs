// src/dependency.rs
// Field dependency tracking for cursor projection pushdown

use crate::document::Document;
use crate::field_path::FieldPath;
use std::collections::BTreeSet;

/// Tracks the set of field paths the remainder of a pipeline needs
///
/// The pipeline walks its stages tail to head, letting each report the paths
/// it consumes. The tracker has three states:
///
/// - **Unbounded** (initial): the final output flows through unmodified, so
///   every field is needed and no projection can be derived.
/// - **Bounded**: some stage downstream fully produces its output (an
///   inclusion projection, a group), so only the recorded paths are needed.
/// - **Poisoned**: a stage could not enumerate its dependencies; no
///   projection may ever be derived.
///
/// A projection is synthesized only from the Bounded state.
#[derive(Debug, Clone)]
pub struct DependencyTracker {
    state: TrackerState,
}

#[derive(Debug, Clone)]
enum TrackerState {
    Unbounded,
    Bounded {
        paths: BTreeSet<String>,
        need_id: bool,
    },
    Poisoned,
}

impl DependencyTracker {
    pub fn new() -> DependencyTracker {
        DependencyTracker {
            state: TrackerState::Unbounded,
        }
    }

    /// Record a required path
    ///
    /// Only meaningful in the Bounded state; a stage upstream of the last
    /// output-bounding stage feeds it, one downstream was already replaced.
    /// Subsumed paths are pruned ("a" swallows "a.b").
    pub fn add_path(&mut self, path: &FieldPath) {
        if let TrackerState::Bounded { paths, need_id } = &mut self.state {
            if path.head() == "_id" {
                *need_id = true;
                if path.len() == 1 {
                    return;
                }
            }
            let dotted = path.to_string();
            // Already covered by an ancestor?
            if paths
                .iter()
                .any(|p| dotted == *p || dotted.starts_with(&format!("{}.", p)))
            {
                return;
            }
            // Drop descendants the new path covers
            let prefix = format!("{}.", dotted);
            paths.retain(|p| !p.starts_with(&prefix));
            paths.insert(dotted);
        }
    }

    /// A stage that fully produces its output resets the tracker: whatever
    /// was needed downstream is satisfied by that stage, and only its own
    /// inputs matter from here up. No-op once poisoned.
    pub fn begin_bounded(&mut self) {
        if !matches!(self.state, TrackerState::Poisoned) {
            self.state = TrackerState::Bounded {
                paths: BTreeSet::new(),
                need_id: false,
            };
        }
    }

    /// A stage refused to declare its dependencies; pushdown is off for good
    pub fn poison(&mut self) {
        self.state = TrackerState::Poisoned;
    }

    pub fn is_authoritative(&self) -> bool {
        matches!(self.state, TrackerState::Bounded { .. })
    }

    /// Synthesize the projection for the leading cursor; None unless Bounded
    pub fn to_projection(&self) -> Option<Projection> {
        match &self.state {
            TrackerState::Bounded { paths, need_id } => {
                let parsed = paths
                    .iter()
                    .map(|p| FieldPath::parse(p).expect("tracked paths are valid"))
                    .collect();
                Some(Projection {
                    paths: parsed,
                    include_id: *need_id,
                })
            }
            _ => None,
        }
    }
}

impl Default for DependencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A pure-include projection pushed into a cursor source
#[derive(Debug, Clone)]
pub struct Projection {
    pub paths: Vec<FieldPath>,
    pub include_id: bool,
}

impl Projection {
    /// Trim a stored document down to the projected paths
    pub fn apply(&self, doc: &Document) -> Document {
        doc.project_paths(&self.paths, self.include_id)
    }

    /// The find-style projection document, for explain output
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for path in &self.paths {
            map.insert(path.to_string(), serde_json::json!(1));
        }
        if !self.include_id {
            map.insert("_id".to_string(), serde_json::json!(0));
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn test_unbounded_yields_no_projection() {
        let mut tracker = DependencyTracker::new();
        tracker.add_path(&path("a"));
        assert!(!tracker.is_authoritative());
        assert!(tracker.to_projection().is_none());
    }

    #[test]
    fn test_bounded_collects_paths() {
        let mut tracker = DependencyTracker::new();
        tracker.begin_bounded();
        tracker.add_path(&path("a.b"));
        tracker.add_path(&path("c"));
        let projection = tracker.to_projection().unwrap();
        assert_eq!(projection.to_json(), json!({"a.b": 1, "c": 1, "_id": 0}));
    }

    #[test]
    fn test_path_subsumption() {
        let mut tracker = DependencyTracker::new();
        tracker.begin_bounded();
        tracker.add_path(&path("a.b"));
        tracker.add_path(&path("a"));
        tracker.add_path(&path("a.c"));
        let projection = tracker.to_projection().unwrap();
        assert_eq!(projection.to_json(), json!({"a": 1, "_id": 0}));
    }

    #[test]
    fn test_id_tracking() {
        let mut tracker = DependencyTracker::new();
        tracker.begin_bounded();
        tracker.add_path(&path("_id"));
        tracker.add_path(&path("x"));
        let projection = tracker.to_projection().unwrap();
        assert_eq!(projection.to_json(), json!({"x": 1}));
        assert!(projection.include_id);
    }

    #[test]
    fn test_poison_is_permanent() {
        let mut tracker = DependencyTracker::new();
        tracker.begin_bounded();
        tracker.poison();
        tracker.begin_bounded();
        assert!(!tracker.is_authoritative());
        assert!(tracker.to_projection().is_none());
    }

    #[test]
    fn test_projection_apply() {
        let doc = Document::from_json(&json!({"_id": 9, "a": {"b": 1, "z": 2}, "x": 3})).unwrap();
        let mut tracker = DependencyTracker::new();
        tracker.begin_bounded();
        tracker.add_path(&path("a.b"));
        let projection = tracker.to_projection().unwrap();
        assert_eq!(projection.apply(&doc).to_json(), json!({"a": {"b": 1}}));
    }
}
