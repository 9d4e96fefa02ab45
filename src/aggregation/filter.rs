// src/aggregation/filter.rs
//! The filter family: $match and $filter
//!
//! Both share one skeleton: pull the next input, test it, emit on success,
//! loop otherwise. They differ in the predicate: `$match` evaluates the
//! same compiled predicate the storage layer uses (so a match can be handed
//! back to a cursor natively), `$filter` evaluates a full expression tree
//! under truthiness coercion.

use crate::aggregation::stage::Stage;
use crate::dependency::DependencyTracker;
use crate::document::Document;
use crate::error::Result;
use crate::expression::{Expression, OperatorKind};
use crate::query::Query;
use std::sync::Arc;

/// Shared filter skeleton: emit the next input that satisfies `accept`
fn next_accepted(
    source: &mut Stage,
    mut accept: impl FnMut(&Document) -> Result<bool>,
) -> Result<Option<Arc<Document>>> {
    while let Some(doc) = source.next_document()? {
        if accept(&doc)? {
            return Ok(Some(doc));
        }
    }
    Ok(None)
}

/// $match: filter by a find-style predicate
#[derive(Debug)]
pub struct MatchStage {
    query: Query,
}

impl MatchStage {
    pub fn new(query: Query) -> MatchStage {
        MatchStage { query }
    }

    /// Parse the predicate document of a `{$match: ...}` stage
    pub fn parse(spec: &serde_json::Value) -> Result<MatchStage> {
        Ok(MatchStage {
            query: Query::from_json(spec)?,
        })
    }

    pub(crate) fn pull(&mut self, source: &mut Stage) -> Result<Option<Arc<Document>>> {
        let query = &self.query;
        next_accepted(source, |doc| query.matches(doc))
    }

    /// Fuse a following match into `self and next`
    pub(crate) fn fuse(&mut self, next: &MatchStage) -> bool {
        match self.query.and(&next.query) {
            Ok(fused) => {
                self.query = fused;
                true
            }
            Err(_) => false,
        }
    }

    /// The predicate in cursor form, for native application by the store
    pub fn to_matcher_json(&self) -> serde_json::Value {
        self.query.to_json().clone()
    }

    /// Paths the predicate reads; used both for dependency tracking and for
    /// deciding whether the stage may move upstream
    pub(crate) fn manage_dependencies(&self, tracker: &mut DependencyTracker) {
        self.query.add_dependencies(tracker);
    }

    pub(crate) fn serialize(&self) -> serde_json::Value {
        self.query.to_json().clone()
    }
}

/// $filter: filter by an expression coerced to a boolean
#[derive(Debug)]
pub struct FilterStage {
    predicate: Expression,
}

impl FilterStage {
    pub fn new(predicate: Expression) -> FilterStage {
        FilterStage { predicate }
    }

    pub fn parse(spec: &serde_json::Value) -> Result<FilterStage> {
        Ok(FilterStage {
            predicate: Expression::parse(spec)?,
        })
    }

    pub(crate) fn pull(&mut self, source: &mut Stage) -> Result<Option<Arc<Document>>> {
        let predicate = &self.predicate;
        next_accepted(source, |doc| {
            Ok(predicate.evaluate(doc)?.map_or(false, |v| v.to_bool()))
        })
    }

    /// Fuse a following filter into `$and: [self, next]`
    pub(crate) fn fuse(&mut self, next: &FilterStage) -> bool {
        let combined = Expression::Operator(
            OperatorKind::And,
            vec![self.predicate.clone(), next.predicate.clone()],
        );
        self.predicate = combined;
        true
    }

    pub(crate) fn optimize(&mut self) {
        let predicate = std::mem::replace(&mut self.predicate, Expression::Constant(
            crate::value::Value::Null,
        ));
        self.predicate = predicate.optimize();
    }

    pub(crate) fn manage_dependencies(&self, tracker: &mut DependencyTracker) {
        self.predicate.add_dependencies(tracker);
    }

    pub(crate) fn serialize(&self) -> serde_json::Value {
        self.predicate.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::source::ArraySource;
    use crate::aggregation::stage::{PipelineContext, Stage, StageKind};
    use serde_json::json;

    fn source_stage(docs: Vec<serde_json::Value>) -> Stage {
        let docs = docs
            .into_iter()
            .map(|j| Arc::new(Document::from_json(&j).unwrap()))
            .collect();
        Stage::new(
            StageKind::Array(ArraySource::from_documents(docs)),
            PipelineContext::new(),
        )
    }

    fn drain(stage: &mut dyn FnMut(&mut Stage) -> Result<Option<Arc<Document>>>, source: &mut Stage) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Some(doc) = stage(source).unwrap() {
            out.push(doc.to_json());
        }
        out
    }

    #[test]
    fn test_match_emits_only_matching() {
        let mut stage = MatchStage::parse(&json!({"a": {"$gt": 1}})).unwrap();
        let mut source = source_stage(vec![
            json!({"a": 0}),
            json!({"a": 2}),
            json!({"a": 1}),
            json!({"a": 3}),
        ]);
        let out = drain(&mut |s| stage.pull(s), &mut source);
        assert_eq!(out, vec![json!({"a": 2}), json!({"a": 3})]);
    }

    #[test]
    fn test_match_fuse_is_logical_and() {
        let mut first = MatchStage::parse(&json!({"a": {"$gt": 1}})).unwrap();
        let second = MatchStage::parse(&json!({"a": {"$lt": 10}})).unwrap();
        assert!(first.fuse(&second));

        let mut source = source_stage(vec![json!({"a": 0}), json!({"a": 5}), json!({"a": 20})]);
        let out = drain(&mut |s| first.pull(s), &mut source);
        assert_eq!(out, vec![json!({"a": 5})]);
        assert_eq!(
            first.to_matcher_json(),
            json!({"$and": [{"a": {"$gt": 1}}, {"a": {"$lt": 10}}]})
        );
    }

    #[test]
    fn test_filter_truthiness() {
        let mut stage = FilterStage::parse(&json!("$flag")).unwrap();
        let mut source = source_stage(vec![
            json!({"flag": 1, "n": 1}),
            json!({"flag": 0, "n": 2}),
            json!({"flag": "", "n": 3}),
            json!({"flag": null, "n": 4}),
            json!({"n": 5}),
            json!({"flag": "yes", "n": 6}),
        ]);
        let out = drain(&mut |s| stage.pull(s), &mut source);
        assert_eq!(
            out,
            vec![json!({"flag": 1, "n": 1}), json!({"flag": "yes", "n": 6})]
        );
    }

    #[test]
    fn test_filter_fuse_and_optimize() {
        let mut first = FilterStage::parse(&json!({"$gt": ["$a", 1]})).unwrap();
        let second = FilterStage::parse(&json!({"$lt": ["$a", 3]})).unwrap();
        assert!(first.fuse(&second));
        first.optimize();

        let mut source = source_stage(vec![json!({"a": 0}), json!({"a": 2}), json!({"a": 4})]);
        let out = drain(&mut |s| first.pull(s), &mut source);
        assert_eq!(out, vec![json!({"a": 2})]);
    }

    #[test]
    fn test_match_dependencies() {
        let stage = MatchStage::parse(&json!({"a.b": 1, "c": {"$exists": true}})).unwrap();
        let mut tracker = DependencyTracker::new();
        tracker.begin_bounded();
        stage.manage_dependencies(&mut tracker);
        assert_eq!(
            tracker.to_projection().unwrap().to_json(),
            json!({"a.b": 1, "c": 1, "_id": 0})
        );
    }
}
