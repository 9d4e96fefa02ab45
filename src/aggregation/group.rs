// src/aggregation/group.rs
//! $group: bucket documents by a key expression and accumulate
//!
//! Grouping is eager but lazy-started: the first `eof()`/`advance()` pulls
//! the predecessor to completion, feeding one accumulator instance per
//! configured field per group. Output order follows the internal hash map
//! and is deliberately unspecified; follow with `$sort` if order matters.
//!
//! For sharded execution the stage splits in two: the shard part keeps the
//! id expression and runs the partial accumulator forms (selected through
//! the pipeline context), the coordinator part regroups the partials by
//! their `_id` field with the merge forms.

use crate::aggregation::accumulator::{Accumulator, AccumulatorOp};
use crate::aggregation::stage::{PipelineContext, Stage};
use crate::dependency::DependencyTracker;
use crate::document::Document;
use crate::error::{DocFlowError, Result};
use crate::expression::Expression;
use crate::field_path::FieldPath;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One accumulated output field: `name: {$op: <expression>}`
pub struct GroupField {
    name: String,
    op: AccumulatorOp,
    expression: Expression,
}

/// $group stage state
pub struct GroupStage {
    id_expression: Expression,
    fields: Vec<GroupField>,
    /// Coordinator side of a split: accumulators run in merge form
    merging: bool,
    results: Option<Vec<Arc<Document>>>,
    position: usize,
}

impl GroupStage {
    /// Parse the `{_id: ..., field: {op: ...}}` document of a group stage
    pub fn parse(spec: &serde_json::Value) -> Result<GroupStage> {
        let object = spec.as_object().ok_or_else(|| {
            DocFlowError::InvalidPipeline("$group requires an object".to_string())
        })?;
        let id_spec = object.get("_id").ok_or_else(|| {
            DocFlowError::InvalidPipeline("$group requires an _id expression".to_string())
        })?;
        let id_expression = Expression::parse(id_spec)?;

        let mut fields = Vec::new();
        for (name, value) in object {
            if name == "_id" {
                continue;
            }
            if name.contains('.') {
                return Err(DocFlowError::InvalidPipeline(format!(
                    "group output field {} must not be dotted",
                    name
                )));
            }
            let accumulator = value.as_object().ok_or_else(|| {
                DocFlowError::InvalidPipeline(format!(
                    "group field {} must be an accumulator object",
                    name
                ))
            })?;
            if accumulator.len() != 1 {
                return Err(DocFlowError::InvalidPipeline(format!(
                    "group field {} must have exactly one accumulator",
                    name
                )));
            }
            let (op_name, expr_spec) = accumulator.iter().next().unwrap();
            let op = AccumulatorOp::parse(op_name).ok_or_else(|| {
                DocFlowError::InvalidPipeline(format!("unknown accumulator: {}", op_name))
            })?;
            fields.push(GroupField {
                name: name.clone(),
                op,
                expression: Expression::parse(expr_spec)?,
            });
        }

        Ok(GroupStage {
            id_expression,
            fields,
            merging: false,
            results: None,
            position: 0,
        })
    }

    pub(crate) fn pull(
        &mut self,
        source: &mut Stage,
        ctx: &PipelineContext,
    ) -> Result<Option<Arc<Document>>> {
        if self.results.is_none() {
            self.populate(source, ctx)?;
        }
        let results = self.results.as_ref().unwrap();
        match results.get(self.position) {
            Some(doc) => {
                self.position += 1;
                Ok(Some(Arc::clone(doc)))
            }
            None => Ok(None),
        }
    }

    /// Consume the whole predecessor and build one document per group
    fn populate(&mut self, source: &mut Stage, ctx: &PipelineContext) -> Result<()> {
        let mut groups: HashMap<Value, Vec<Box<dyn Accumulator>>> = HashMap::new();

        while let Some(doc) = source.next_document()? {
            // Group key under total value equality; a missing key groups as null
            let key = self.id_expression.evaluate(&doc)?.unwrap_or(Value::Null);
            let accumulators = groups.entry(key).or_insert_with(|| {
                self.fields
                    .iter()
                    .map(|field| {
                        if self.merging {
                            field.op.merge_factory()
                        } else {
                            field.op.factory(ctx.in_shard())
                        }
                    })
                    .collect()
            });
            for (field, accumulator) in self.fields.iter().zip(accumulators.iter_mut()) {
                accumulator.process(field.expression.evaluate(&doc)?)?;
            }
        }

        let mut results = Vec::with_capacity(groups.len());
        for (key, mut accumulators) in groups {
            let mut out = Document::with_capacity(self.fields.len() + 1);
            out.push_field("_id", key)?;
            for (field, accumulator) in self.fields.iter().zip(accumulators.iter_mut()) {
                out.push_field(field.name.clone(), accumulator.finalize())?;
            }
            results.push(Arc::new(out));
        }
        self.results = Some(results);
        Ok(())
    }

    /// Shard part and coordinator part of this group
    ///
    /// The shard part is this stage unchanged (its accumulators switch to
    /// partial forms through the shard pipeline's context); the coordinator
    /// regroups the partial documents by `_id` with merge accumulators
    /// reading each partial's output field.
    pub(crate) fn split(self) -> (GroupStage, GroupStage) {
        let router_fields = self
            .fields
            .iter()
            .map(|field| GroupField {
                name: field.name.clone(),
                op: field.op,
                expression: Expression::FieldPath(
                    FieldPath::parse(&field.name).expect("group field names are valid paths"),
                ),
            })
            .collect();
        let router = GroupStage {
            id_expression: Expression::FieldPath(FieldPath::parse("_id").expect("static path")),
            fields: router_fields,
            merging: true,
            results: None,
            position: 0,
        };
        (self, router)
    }

    /// Fold the id and value expressions
    pub(crate) fn optimize(&mut self) {
        let id = std::mem::replace(&mut self.id_expression, Expression::Constant(Value::Null));
        self.id_expression = id.optimize();
        for field in &mut self.fields {
            let expression =
                std::mem::replace(&mut field.expression, Expression::Constant(Value::Null));
            field.expression = expression.optimize();
        }
    }

    /// A group fully produces its output: rebind the tracker to the
    /// id/value expression inputs
    pub(crate) fn manage_dependencies(&self, tracker: &mut DependencyTracker) {
        tracker.begin_bounded();
        self.id_expression.add_dependencies(tracker);
        for field in &self.fields {
            field.expression.add_dependencies(tracker);
        }
    }

    pub(crate) fn dispose(&mut self) {
        self.results = None;
    }

    pub(crate) fn serialize(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        object.insert("_id".to_string(), self.id_expression.to_json());
        for field in &self.fields {
            object.insert(
                field.name.clone(),
                serde_json::json!({ (field.op.name()): field.expression.to_json() }),
            );
        }
        serde_json::Value::Object(object)
    }
}

impl fmt::Debug for GroupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupStage")
            .field("spec", &self.serialize())
            .field("merging", &self.merging)
            .field("populated", &self.results.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::source::ArraySource;
    use crate::aggregation::stage::StageKind;
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

    fn run_group(
        spec: serde_json::Value,
        docs: Vec<serde_json::Value>,
    ) -> Vec<serde_json::Value> {
        let mut stage = GroupStage::parse(&spec).unwrap();
        let mut source = source_stage(docs);
        let ctx = PipelineContext::new();
        let mut out = Vec::new();
        while let Some(doc) = stage.pull(&mut source, &ctx).unwrap() {
            out.push(doc.to_json());
        }
        out
    }

    fn sorted_by_id(mut docs: Vec<serde_json::Value>) -> Vec<serde_json::Value> {
        docs.sort_by_key(|d| d["_id"].to_string());
        docs
    }

    #[test]
    fn test_group_sum_by_key() {
        let out = run_group(
            json!({"_id": "$k", "s": {"$sum": "$v"}}),
            vec![
                json!({"k": "x", "v": 1}),
                json!({"k": "x", "v": 2}),
                json!({"k": "y", "v": 5}),
            ],
        );
        assert_eq!(
            sorted_by_id(out),
            sorted_by_id(vec![json!({"_id": "x", "s": 3}), json!({"_id": "y", "s": 5})])
        );
    }

    #[test]
    fn test_group_null_id_single_bucket() {
        let out = run_group(
            json!({"_id": null, "count": {"$sum": 1}}),
            vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})],
        );
        assert_eq!(out, vec![json!({"_id": null, "count": 3})]);
    }

    #[test]
    fn test_group_missing_key_groups_as_null() {
        let out = run_group(
            json!({"_id": "$city", "count": {"$sum": 1}}),
            vec![json!({"city": "NYC"}), json!({})],
        );
        assert_eq!(out.len(), 2);
        assert!(out.iter().any(|d| d["_id"].is_null()));
    }

    #[test]
    fn test_group_key_equality_across_numeric_widths() {
        let out = run_group(
            json!({"_id": "$k", "count": {"$sum": 1}}),
            vec![json!({"k": 1}), json!({"k": 1.0}), json!({"k": 2})],
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_group_accumulator_order_follows_declaration() {
        let out = run_group(
            json!({"_id": null, "hi": {"$max": "$v"}, "lo": {"$min": "$v"}}),
            vec![json!({"v": 2}), json!({"v": 9})],
        );
        let names: Vec<String> = Document::from_json(&out[0])
            .unwrap()
            .fields()
            .map(|(n, _)| n.clone())
            .collect();
        assert_eq!(names, vec!["_id", "hi", "lo"]);
    }

    #[test]
    fn test_group_by_expression_key() {
        let out = run_group(
            json!({"_id": {"$mod": ["$n", 2]}, "count": {"$sum": 1}}),
            vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3}), json!({"n": 4})],
        );
        assert_eq!(
            sorted_by_id(out),
            sorted_by_id(vec![
                json!({"_id": 0, "count": 2}),
                json!({"_id": 1, "count": 2})
            ])
        );
    }

    #[test]
    fn test_group_parse_errors() {
        assert!(GroupStage::parse(&json!({"total": {"$sum": "$v"}})).is_err());
        assert!(GroupStage::parse(&json!({"_id": null, "x": 1})).is_err());
        assert!(GroupStage::parse(&json!({"_id": null, "x": {"$sum": 1, "$avg": 1}})).is_err());
        assert!(GroupStage::parse(&json!({"_id": null, "x": {"$median": 1}})).is_err());
        assert!(GroupStage::parse(&json!("nope")).is_err());
    }

    #[test]
    fn test_group_split_roundtrip_avg() {
        let stage = GroupStage::parse(&json!({"_id": "$k", "avg": {"$avg": "$v"}})).unwrap();
        let (shard, router) = stage.split();

        // Shard runs with the in-shard context, producing partials
        let shard_ctx = PipelineContext::new_for_shard();
        let mut shard_stage = shard;
        let mut partition_a = source_stage(vec![json!({"k": "x", "v": 2}), json!({"k": "x", "v": 4})]);
        let mut partials = Vec::new();
        while let Some(doc) = shard_stage.pull(&mut partition_a, &shard_ctx).unwrap() {
            partials.push(doc.to_json());
        }
        assert_eq!(partials.len(), 1);
        assert_eq!(partials[0]["avg"], json!({"sum": 6.0, "count": 2}));

        // Second shard partition
        let mut shard_stage_b =
            GroupStage::parse(&json!({"_id": "$k", "avg": {"$avg": "$v"}})).unwrap();
        let mut partition_b = source_stage(vec![json!({"k": "x", "v": 6})]);
        while let Some(doc) = shard_stage_b.pull(&mut partition_b, &shard_ctx).unwrap() {
            partials.push(doc.to_json());
        }

        // Router merges the partials
        let mut router_stage = router;
        let router_ctx = PipelineContext::new();
        let mut merged_input = source_stage(partials);
        let mut merged = Vec::new();
        while let Some(doc) = router_stage.pull(&mut merged_input, &router_ctx).unwrap() {
            merged.push(doc.to_json());
        }
        assert_eq!(merged, vec![json!({"_id": "x", "avg": 4.0})]);
    }

    #[test]
    fn test_group_dependencies() {
        let stage =
            GroupStage::parse(&json!({"_id": "$k", "s": {"$sum": "$v.n"}})).unwrap();
        let mut tracker = DependencyTracker::new();
        stage.manage_dependencies(&mut tracker);
        assert_eq!(
            tracker.to_projection().unwrap().to_json(),
            json!({"k": 1, "v.n": 1, "_id": 0})
        );
    }

    #[test]
    fn test_group_serialize_roundtrip() {
        let spec = json!({"_id": "$k", "s": {"$sum": "$v"}, "vals": {"$push": "$v"}});
        let stage = GroupStage::parse(&spec).unwrap();
        assert_eq!(stage.serialize(), spec);
    }
}
