// src/aggregation/accumulator.rs
//! Per-group accumulator state
//!
//! Each group owns one accumulator instance per configured output field.
//! An accumulator is fed one value per input document via `process` and
//! yields its result exactly once via `finalize`.
//!
//! Every kind comes in up to three forms for sharded execution:
//! the whole-pipeline form, the *partial* form run on each shard, and the
//! *merge* form the coordinator uses to combine shard partials. Only `$avg`
//! needs a distinct partial (it must ship its count); the merge forms
//! recombine (sum of sums, union of sets, concatenation of pushes).

use crate::document::Document;
use crate::error::{DocFlowError, Result};
use crate::value::Value;
use std::collections::HashSet;

/// Incremental per-group state
pub trait Accumulator {
    /// Accumulator name, e.g. "$sum"
    fn name(&self) -> &'static str;

    /// Feed the value of one input document; None means the field was missing
    fn process(&mut self, value: Option<Value>) -> Result<()>;

    /// Produce the group result. Called exactly once per instance.
    fn finalize(&mut self) -> Value;
}

/// The accumulator vocabulary of the `$group` stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorOp {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
    AddToSet,
}

impl AccumulatorOp {
    /// Resolve a spec name, with or without the `$` prefix
    pub fn parse(name: &str) -> Option<AccumulatorOp> {
        match name.trim_start_matches('$') {
            "sum" => Some(AccumulatorOp::Sum),
            "avg" => Some(AccumulatorOp::Avg),
            "min" => Some(AccumulatorOp::Min),
            "max" => Some(AccumulatorOp::Max),
            "first" => Some(AccumulatorOp::First),
            "last" => Some(AccumulatorOp::Last),
            "push" => Some(AccumulatorOp::Push),
            "addToSet" => Some(AccumulatorOp::AddToSet),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AccumulatorOp::Sum => "$sum",
            AccumulatorOp::Avg => "$avg",
            AccumulatorOp::Min => "$min",
            AccumulatorOp::Max => "$max",
            AccumulatorOp::First => "$first",
            AccumulatorOp::Last => "$last",
            AccumulatorOp::Push => "$push",
            AccumulatorOp::AddToSet => "$addToSet",
        }
    }

    /// The whole-pipeline accumulator; with `in_shard`, the partial form
    pub fn factory(&self, in_shard: bool) -> Box<dyn Accumulator> {
        match self {
            AccumulatorOp::Sum => Box::new(SumAccumulator::new()),
            AccumulatorOp::Avg if in_shard => Box::new(AvgPartialAccumulator::new()),
            AccumulatorOp::Avg => Box::new(AvgAccumulator::new()),
            AccumulatorOp::Min => Box::new(ExtremeAccumulator::min()),
            AccumulatorOp::Max => Box::new(ExtremeAccumulator::max()),
            AccumulatorOp::First => Box::new(FirstAccumulator::new()),
            AccumulatorOp::Last => Box::new(LastAccumulator::new()),
            AccumulatorOp::Push => Box::new(PushAccumulator::new()),
            AccumulatorOp::AddToSet => Box::new(AddToSetAccumulator::new()),
        }
    }

    /// The coordinator-side form combining shard partials
    pub fn merge_factory(&self) -> Box<dyn Accumulator> {
        match self {
            AccumulatorOp::Sum => Box::new(SumAccumulator::new()),
            AccumulatorOp::Avg => Box::new(AvgMergeAccumulator::new()),
            AccumulatorOp::Min => Box::new(ExtremeAccumulator::min()),
            AccumulatorOp::Max => Box::new(ExtremeAccumulator::max()),
            AccumulatorOp::First => Box::new(FirstAccumulator::new()),
            AccumulatorOp::Last => Box::new(LastAccumulator::new()),
            AccumulatorOp::Push => Box::new(ConcatAccumulator::new("$push")),
            AccumulatorOp::AddToSet => Box::new(UnionAccumulator::new()),
        }
    }
}

// ============================================================================
// NUMERIC ACCUMULATORS
// ============================================================================

/// $sum: integer arithmetic until a double appears; empty group sums to 0
struct SumAccumulator {
    int_total: i64,
    double_total: f64,
    saw_double: bool,
}

impl SumAccumulator {
    fn new() -> SumAccumulator {
        SumAccumulator {
            int_total: 0,
            double_total: 0.0,
            saw_double: false,
        }
    }
}

impl Accumulator for SumAccumulator {
    fn name(&self) -> &'static str {
        "$sum"
    }

    fn process(&mut self, value: Option<Value>) -> Result<()> {
        match value {
            Some(Value::Double(d)) => {
                self.double_total += d;
                self.saw_double = true;
            }
            Some(v) if v.is_numeric() => {
                let n = v.as_i64().unwrap();
                self.int_total = self.int_total.saturating_add(n);
                self.double_total += n as f64;
            }
            // Non-numeric, null and missing values don't contribute
            _ => {}
        }
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        if self.saw_double {
            Value::Double(self.double_total)
        } else {
            Value::int(self.int_total)
        }
    }
}

/// $avg: (sum, count) state; empty group averages to null
struct AvgAccumulator {
    sum: f64,
    count: u64,
}

impl AvgAccumulator {
    fn new() -> AvgAccumulator {
        AvgAccumulator { sum: 0.0, count: 0 }
    }

    fn observe(&mut self, value: Option<Value>) {
        if let Some(v) = value {
            if let Some(n) = v.as_f64() {
                self.sum += n;
                self.count += 1;
            }
        }
    }
}

impl Accumulator for AvgAccumulator {
    fn name(&self) -> &'static str {
        "$avg"
    }

    fn process(&mut self, value: Option<Value>) -> Result<()> {
        self.observe(value);
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Double(self.sum / self.count as f64)
        }
    }
}

/// Shard-side $avg: finalizes to the partial `{sum, count}` document
struct AvgPartialAccumulator {
    inner: AvgAccumulator,
}

impl AvgPartialAccumulator {
    fn new() -> AvgPartialAccumulator {
        AvgPartialAccumulator {
            inner: AvgAccumulator::new(),
        }
    }
}

impl Accumulator for AvgPartialAccumulator {
    fn name(&self) -> &'static str {
        "$avg"
    }

    fn process(&mut self, value: Option<Value>) -> Result<()> {
        self.inner.observe(value);
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        let mut partial = Document::with_capacity(2);
        partial
            .push_field("sum", Value::Double(self.inner.sum))
            .expect("fresh document");
        partial
            .push_field("count", Value::int(self.inner.count as i64))
            .expect("fresh document");
        Value::document(partial)
    }
}

/// Coordinator-side $avg: combines `{sum, count}` partials, divides at the end
struct AvgMergeAccumulator {
    sum: f64,
    count: u64,
}

impl AvgMergeAccumulator {
    fn new() -> AvgMergeAccumulator {
        AvgMergeAccumulator { sum: 0.0, count: 0 }
    }
}

impl Accumulator for AvgMergeAccumulator {
    fn name(&self) -> &'static str {
        "$avg"
    }

    fn process(&mut self, value: Option<Value>) -> Result<()> {
        let partial = match value {
            Some(Value::Document(doc)) => doc,
            other => {
                return Err(DocFlowError::TypeMismatch(format!(
                    "$avg merge expects {{sum, count}} partials, got {}",
                    other.map_or("missing", |v| v.type_name())
                )))
            }
        };
        let sum = partial.get("sum").and_then(Value::as_f64);
        let count = partial.get("count").and_then(Value::as_i64);
        match (sum, count) {
            (Some(s), Some(c)) if c >= 0 => {
                self.sum += s;
                self.count += c as u64;
                Ok(())
            }
            _ => Err(DocFlowError::TypeMismatch(
                "$avg merge expects {sum, count} partials".to_string(),
            )),
        }
    }

    fn finalize(&mut self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Double(self.sum / self.count as f64)
        }
    }
}

// ============================================================================
// ORDER-BASED ACCUMULATORS
// ============================================================================

/// $min / $max over the total value order; missing and null are skipped
struct ExtremeAccumulator {
    best: Option<Value>,
    want_max: bool,
}

impl ExtremeAccumulator {
    fn min() -> ExtremeAccumulator {
        ExtremeAccumulator {
            best: None,
            want_max: false,
        }
    }

    fn max() -> ExtremeAccumulator {
        ExtremeAccumulator {
            best: None,
            want_max: true,
        }
    }
}

impl Accumulator for ExtremeAccumulator {
    fn name(&self) -> &'static str {
        if self.want_max {
            "$max"
        } else {
            "$min"
        }
    }

    fn process(&mut self, value: Option<Value>) -> Result<()> {
        let candidate = match value {
            Some(v) if !v.is_null() => v,
            _ => return Ok(()),
        };
        let replace = match &self.best {
            None => true,
            Some(current) => {
                let ord = candidate.cmp_total(current);
                if self.want_max {
                    ord == std::cmp::Ordering::Greater
                } else {
                    ord == std::cmp::Ordering::Less
                }
            }
        };
        if replace {
            self.best = Some(candidate);
        }
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        self.best.take().unwrap_or(Value::Null)
    }
}

/// $first: the first value seen (missing records as null)
struct FirstAccumulator {
    taken: bool,
    value: Value,
}

impl FirstAccumulator {
    fn new() -> FirstAccumulator {
        FirstAccumulator {
            taken: false,
            value: Value::Null,
        }
    }
}

impl Accumulator for FirstAccumulator {
    fn name(&self) -> &'static str {
        "$first"
    }

    fn process(&mut self, value: Option<Value>) -> Result<()> {
        if !self.taken {
            self.taken = true;
            self.value = value.unwrap_or(Value::Null);
        }
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        std::mem::replace(&mut self.value, Value::Null)
    }
}

/// $last: the most recent value seen (missing records as null)
struct LastAccumulator {
    value: Value,
}

impl LastAccumulator {
    fn new() -> LastAccumulator {
        LastAccumulator { value: Value::Null }
    }
}

impl Accumulator for LastAccumulator {
    fn name(&self) -> &'static str {
        "$last"
    }

    fn process(&mut self, value: Option<Value>) -> Result<()> {
        self.value = value.unwrap_or(Value::Null);
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        std::mem::replace(&mut self.value, Value::Null)
    }
}

// ============================================================================
// COLLECTION ACCUMULATORS
// ============================================================================

/// $push: collects values in arrival order; missing values are skipped
struct PushAccumulator {
    items: Vec<Value>,
}

impl PushAccumulator {
    fn new() -> PushAccumulator {
        PushAccumulator { items: Vec::new() }
    }
}

impl Accumulator for PushAccumulator {
    fn name(&self) -> &'static str {
        "$push"
    }

    fn process(&mut self, value: Option<Value>) -> Result<()> {
        if let Some(v) = value {
            self.items.push(v);
        }
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        Value::array(std::mem::take(&mut self.items))
    }
}

/// $addToSet: collects distinct values under Value equality; order unspecified
struct AddToSetAccumulator {
    seen: HashSet<Value>,
}

impl AddToSetAccumulator {
    fn new() -> AddToSetAccumulator {
        AddToSetAccumulator {
            seen: HashSet::new(),
        }
    }
}

impl Accumulator for AddToSetAccumulator {
    fn name(&self) -> &'static str {
        "$addToSet"
    }

    fn process(&mut self, value: Option<Value>) -> Result<()> {
        if let Some(v) = value {
            self.seen.insert(v);
        }
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        Value::array(std::mem::take(&mut self.seen).into_iter().collect())
    }
}

/// Merge form of $push: concatenates shard arrays in arrival order
struct ConcatAccumulator {
    op_name: &'static str,
    items: Vec<Value>,
}

impl ConcatAccumulator {
    fn new(op_name: &'static str) -> ConcatAccumulator {
        ConcatAccumulator {
            op_name,
            items: Vec::new(),
        }
    }
}

impl Accumulator for ConcatAccumulator {
    fn name(&self) -> &'static str {
        self.op_name
    }

    fn process(&mut self, value: Option<Value>) -> Result<()> {
        match value {
            Some(Value::Array(items)) => {
                self.items.extend(items.iter().cloned());
                Ok(())
            }
            other => Err(DocFlowError::TypeMismatch(format!(
                "{} merge expects shard arrays, got {}",
                self.op_name,
                other.map_or("missing", |v| v.type_name())
            ))),
        }
    }

    fn finalize(&mut self) -> Value {
        Value::array(std::mem::take(&mut self.items))
    }
}

/// Merge form of $addToSet: unions shard sets
struct UnionAccumulator {
    seen: HashSet<Value>,
}

impl UnionAccumulator {
    fn new() -> UnionAccumulator {
        UnionAccumulator {
            seen: HashSet::new(),
        }
    }
}

impl Accumulator for UnionAccumulator {
    fn name(&self) -> &'static str {
        "$addToSet"
    }

    fn process(&mut self, value: Option<Value>) -> Result<()> {
        match value {
            Some(Value::Array(items)) => {
                for item in items.iter() {
                    self.seen.insert(item.clone());
                }
                Ok(())
            }
            other => Err(DocFlowError::TypeMismatch(format!(
                "$addToSet merge expects shard arrays, got {}",
                other.map_or("missing", |v| v.type_name())
            ))),
        }
    }

    fn finalize(&mut self) -> Value {
        Value::array(std::mem::take(&mut self.seen).into_iter().collect())
    }
}
